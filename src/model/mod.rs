mod error;
mod gpu;
mod importer;
mod material;
mod mesh;
mod registry;
mod texture;
mod vertex;

pub use error::{ImportError, MaterialError, MeshError};
pub use gpu::{GpuDevice, GpuGeometry};
pub use importer::{
    import_scene, smooth_normals, tangent_space, ImportOptions, ImportedMaterial, ImportedMesh,
    ImportedScene,
};
pub use material::{Material, MaterialCache, MaterialLibrary, MaterialPool, TexturePaths, TextureType};
pub use mesh::{correct_handedness, union_extents, usable_texture_path, Mesh, MeshData, SubMesh};
pub use registry::MeshRegistry;
pub use texture::Texture;
pub use vertex::Vertex;

#[cfg(test)]
mod tests;

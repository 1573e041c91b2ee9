use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported scene format: `{0}`")]
    UnsupportedFormat(String),
    #[error("glTF import failed: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("OBJ import failed: {0}")]
    Obj(#[from] tobj::LoadError),
    #[error("scene contains no triangle meshes")]
    EmptyScene,
    #[error("mesh `{mesh}` is malformed: {reason}")]
    Malformed { mesh: String, reason: String },
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("failed to import `{}`", path.display())]
    Import {
        path: PathBuf,
        #[source]
        source: ImportError,
    },
    #[error("failed to create GPU resources for `{label}`: {reason}")]
    GpuResource { label: String, reason: String },
}

impl MeshError {
    pub fn is_import(&self) -> bool {
        matches!(self, MeshError::Import { .. })
    }
}

/// Raised by a [`MaterialLibrary`](super::MaterialLibrary). Never fatal to a mesh load.
#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("failed to load texture `{}`: {source}", path.display())]
    Texture {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("material `{0}` has no usable texture")]
    NoTextures(String),
}

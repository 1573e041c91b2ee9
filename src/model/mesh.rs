use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use glam::Vec3;

use super::gpu::{GpuDevice, GpuGeometry};
use super::importer::{import_scene, ImportOptions, ImportedMaterial, ImportedScene};
use super::{Material, MaterialLibrary, MeshError, TexturePaths, TextureType, Vertex};

#[derive(Debug, Clone, Default)]
pub struct SubMesh {
    pub index_count: u32,
    pub base_index: u32,
    // added to every index of this sub-mesh at draw time
    pub base_vertex: u32,
    pub material: Option<Rc<Material>>,
    pub max_extents: Vec3,
    pub min_extents: Vec3,
}

impl SubMesh {
    pub fn index_range(&self) -> Range<u32> {
        self.base_index..self.base_index + self.index_count
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    // sub-mesh local, never rebased
    pub indices: Vec<u32>,
    pub sub_meshes: Vec<SubMesh>,
    pub max_extents: Vec3,
    pub min_extents: Vec3,
}

impl MeshData {
    /// Flattens `scene` in sub-mesh order. With a material library, each source
    /// material index is resolved once per call and shared by every sub-mesh using it.
    pub fn from_scene(
        scene: &ImportedScene,
        source: &Path,
        mut materials: Option<&mut (dyn MaterialLibrary + '_)>,
    ) -> Self {
        let key = source.to_string_lossy();
        let mut sub_meshes = Vec::with_capacity(scene.meshes.len());
        // a failed library load is remembered as `None` and never retried
        let mut resolved: HashMap<usize, Option<Rc<Material>>> = HashMap::new();
        let mut vertex_count = 0u32;
        let mut index_count = 0u32;

        for (i, imported) in scene.meshes.iter().enumerate() {
            let mut sub_mesh = SubMesh {
                index_count: imported.face_count() as u32 * 3,
                base_index: index_count,
                base_vertex: vertex_count,
                ..Default::default()
            };

            vertex_count += imported.vertex_count() as u32;
            index_count += sub_mesh.index_count;

            if let Some(library) = materials.as_deref_mut() {
                let material_index = imported.material_index;
                sub_mesh.material = match resolved.get(&material_index) {
                    Some(material) => material.clone(),
                    None => {
                        let resolution = scene.materials.get(material_index).map(|material| {
                            resolve_material(library, material, &format!("{}{}", key, i), source)
                        });
                        match resolution {
                            Some(Resolution::Loaded(material)) => {
                                resolved.insert(material_index, Some(Rc::clone(&material)));
                                Some(material)
                            }
                            Some(Resolution::Failed) => {
                                resolved.insert(material_index, None);
                                None
                            }
                            Some(Resolution::NoTextures) | None => None,
                        }
                    }
                };
            }

            sub_meshes.push(sub_mesh);
        }

        let mut vertices = Vec::with_capacity(vertex_count as usize);
        let mut indices = Vec::with_capacity(index_count as usize);

        for (imported, sub_mesh) in scene.meshes.iter().zip(sub_meshes.iter_mut()) {
            let first = imported.positions.first().copied().unwrap_or(Vec3::ZERO);
            sub_mesh.max_extents = first;
            sub_mesh.min_extents = first;

            let tangent_frames = imported.tangents.as_deref().zip(imported.bitangents.as_deref());

            for (k, &position) in imported.positions.iter().enumerate() {
                let normal = imported.normals.get(k).copied().unwrap_or(Vec3::ZERO);
                let mut vertex = Vertex {
                    position: position.into(),
                    normal: normal.into(),
                    ..Default::default()
                };

                if let Some((tangents, bitangents)) = tangent_frames {
                    if let (Some(&tangent), Some(&bitangent)) = (tangents.get(k), bitangents.get(k)) {
                        vertex.tangent = correct_handedness(normal, tangent, bitangent).into();
                        vertex.bitangent = bitangent.into();
                    }
                }

                sub_mesh.max_extents = sub_mesh.max_extents.max(position);
                sub_mesh.min_extents = sub_mesh.min_extents.min(position);

                if let Some(uv) = imported.tex_coords.as_ref().and_then(|uvs| uvs.get(k)) {
                    vertex.tex_coord = (*uv).into();
                }

                vertices.push(vertex);
            }

            for face in &imported.faces {
                indices.extend_from_slice(face);
            }
        }

        let (max_extents, min_extents) = union_extents(&sub_meshes);

        Self {
            vertices,
            indices,
            sub_meshes,
            max_extents,
            min_extents,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Whether every sub-mesh starts where the previous one ended, its indices
    /// stay inside its own vertex run, and the table covers both arrays.
    pub fn is_contiguous(&self) -> bool {
        let vertex_total = self.vertices.len() as u32;
        let mut base_index = 0u32;
        let mut base_vertex = 0u32;

        for (i, sub_mesh) in self.sub_meshes.iter().enumerate() {
            let starts_in_order = if i == 0 {
                sub_mesh.base_vertex == 0
            } else {
                sub_mesh.base_vertex >= base_vertex
            };
            if sub_mesh.base_index != base_index || !starts_in_order {
                return false;
            }

            let vertex_end = self
                .sub_meshes
                .get(i + 1)
                .map_or(vertex_total, |next| next.base_vertex);
            let Some(index_end) = base_index.checked_add(sub_mesh.index_count) else {
                return false;
            };
            let Some(indices) = self.indices.get(base_index as usize..index_end as usize) else {
                return false;
            };
            let in_run = |index: u32| {
                sub_mesh
                    .base_vertex
                    .checked_add(index)
                    .is_some_and(|vertex| vertex < vertex_end)
            };
            if !indices.iter().all(|&index| in_run(index)) {
                return false;
            }

            base_index = index_end;
            base_vertex = sub_mesh.base_vertex;
        }

        base_index as usize == self.indices.len() && base_vertex <= vertex_total
    }

    pub fn release_materials(&mut self, materials: &mut dyn MaterialLibrary) {
        for sub_mesh in &mut self.sub_meshes {
            if let Some(material) = sub_mesh.material.take() {
                materials.release(material);
            }
        }
    }
}

pub fn correct_handedness(normal: Vec3, tangent: Vec3, bitangent: Vec3) -> Vec3 {
    if normal.cross(tangent).dot(bitangent) < 0.0 {
        -tangent
    } else {
        tangent
    }
}

// returns (max, min)
pub fn union_extents(sub_meshes: &[SubMesh]) -> (Vec3, Vec3) {
    let Some(first) = sub_meshes.first() else {
        return (Vec3::ZERO, Vec3::ZERO);
    };

    sub_meshes
        .iter()
        .fold((first.max_extents, first.min_extents), |(max, min), sub_mesh| {
            (max.max(sub_mesh.max_extents), min.min(sub_mesh.min_extents))
        })
}

pub fn usable_texture_path(raw: &str) -> Option<String> {
    let path = raw.replace('\\', "/");
    (path.len() > 4 && !path.starts_with(' ')).then_some(path)
}

enum Resolution {
    Loaded(Rc<Material>),
    Failed,
    // no channel survived the path filter; a later sub-mesh may still try
    NoTextures,
}

fn resolve_material(
    library: &mut dyn MaterialLibrary,
    material: &ImportedMaterial,
    name: &str,
    source: &Path,
) -> Resolution {
    let base = source.parent().unwrap_or_else(|| Path::new(""));
    let mut paths = TexturePaths::default();

    for ty in TextureType::ALL {
        let Some(texture) = material.texture(ty).and_then(usable_texture_path) else {
            continue;
        };
        log::info!("Found {} texture: {}", ty, texture);

        let texture = PathBuf::from(texture);
        paths.set(ty, if texture.is_relative() { base.join(texture) } else { texture });
    }

    if paths.is_empty() {
        return Resolution::NoTextures;
    }

    match library.load(name, &paths) {
        Ok(material) => Resolution::Loaded(material),
        Err(e) => {
            log::warn!("Material `{}` unavailable: {}", name, e);
            Resolution::Failed
        }
    }
}

#[derive(Debug)]
pub struct Mesh<G = GpuGeometry> {
    name: String,
    data: MeshData,
    geometry: G,
}

impl<G> Mesh<G> {
    pub fn load<D>(
        device: &D,
        path: &Path,
        options: &ImportOptions,
        load_materials: bool,
        materials: &mut dyn MaterialLibrary,
    ) -> Result<Self, MeshError>
    where
        D: GpuDevice<Geometry = G>,
    {
        let scene = import_scene(path, options).map_err(|source| {
            log::error!("Failed to import {}: {}", path.display(), source);
            MeshError::Import {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let name = path.to_string_lossy().into_owned();
        let library = if load_materials { Some(&mut *materials) } else { None };
        let mut data = MeshData::from_scene(&scene, path, library);

        match device.create_geometry(&name, &data.vertices, &data.indices) {
            Ok(geometry) => {
                log::info!(
                    "Loaded mesh `{}`: {} sub-meshes, {} vertices, {} indices",
                    name,
                    data.sub_meshes.len(),
                    data.vertex_count(),
                    data.index_count()
                );
                Ok(Self { name, data, geometry })
            }
            Err(e) => {
                data.release_materials(materials);
                Err(e)
            }
        }
    }

    /// Uploads caller-built arrays. The sub-mesh table must already be contiguous.
    pub fn from_data<D>(device: &D, name: &str, data: MeshData) -> Result<Self, MeshError>
    where
        D: GpuDevice<Geometry = G>,
    {
        debug_assert!(data.is_contiguous(), "sub-mesh table of `{}` is not contiguous", name);

        let geometry = device.create_geometry(name, &data.vertices, &data.indices)?;
        Ok(Self {
            name: name.to_string(),
            data,
            geometry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &MeshData {
        &self.data
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.data.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.data.indices
    }

    pub fn sub_meshes(&self) -> &[SubMesh] {
        &self.data.sub_meshes
    }

    pub fn max_extents(&self) -> Vec3 {
        self.data.max_extents
    }

    pub fn min_extents(&self) -> Vec3 {
        self.data.min_extents
    }

    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    pub(crate) fn release_materials(&mut self, materials: &mut dyn MaterialLibrary) {
        self.data.release_materials(materials);
    }
}

impl Mesh<GpuGeometry> {
    pub fn render(&self, render_pass: &mut wgpu::RenderPass<'_>, fallback: &wgpu::BindGroup, material_group: u32) {
        render_pass.set_vertex_buffer(0, self.geometry.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.geometry.index_buffer.slice(..), wgpu::IndexFormat::Uint32);

        for sub_mesh in self.sub_meshes() {
            let bind_group = sub_mesh
                .material
                .as_deref()
                .and_then(Material::bind_group)
                .unwrap_or(fallback);
            render_pass.set_bind_group(material_group, bind_group, &[]);
            render_pass.draw_indexed(sub_mesh.index_range(), sub_mesh.base_vertex as i32, 0..1);
        }
    }
}

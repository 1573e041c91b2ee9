use std::collections::HashMap;
use std::path::Path;

use glam::{Vec2, Vec3};

use super::{ImportError, TextureType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub triangulate: bool,
    pub gen_smooth_normals: bool,
    pub flip_uvs: bool,
    pub calc_tangent_space: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            triangulate: true,
            gen_smooth_normals: true,
            flip_uvs: true,
            calc_tangent_space: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportedMesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Option<Vec<Vec3>>,
    pub bitangents: Option<Vec<Vec3>>,
    pub tex_coords: Option<Vec<Vec2>>,
    pub faces: Vec<[u32; 3]>,
    pub material_index: usize,
}

impl ImportedMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportedMaterial {
    pub name: String,
    textures: HashMap<TextureType, String>,
}

impl ImportedMaterial {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            textures: HashMap::new(),
        }
    }

    // raw path as written in the source asset
    pub fn texture(&self, ty: TextureType) -> Option<&str> {
        self.textures.get(&ty).map(String::as_str)
    }

    pub fn set_texture(&mut self, ty: TextureType, path: impl Into<String>) {
        self.textures.insert(ty, path.into());
    }
}

/// A parsed asset: sub-meshes in source order plus the materials they index into.
#[derive(Debug, Clone, Default)]
pub struct ImportedScene {
    pub meshes: Vec<ImportedMesh>,
    pub materials: Vec<ImportedMaterial>,
}

pub fn import_scene(path: &Path, options: &ImportOptions) -> Result<ImportedScene, ImportError> {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();

    let mut scene = match extension.as_str() {
        "gltf" | "glb" => read_gltf(path, options)?,
        "obj" => read_obj(path, options)?,
        _ => return Err(ImportError::UnsupportedFormat(extension)),
    };

    scene.meshes.retain(|mesh| {
        let keep = mesh.vertex_count() > 0 && mesh.face_count() > 0;
        if !keep {
            log::warn!("{}: dropping empty mesh `{}`", path.display(), mesh.name);
        }
        keep
    });

    if scene.meshes.is_empty() {
        return Err(ImportError::EmptyScene);
    }

    for mesh in &mut scene.meshes {
        validate(mesh)?;
        post_process(mesh, options);
    }

    log::debug!(
        "Imported {}: {} meshes, {} materials",
        path.display(),
        scene.meshes.len(),
        scene.materials.len()
    );

    Ok(scene)
}

fn validate(mesh: &ImportedMesh) -> Result<(), ImportError> {
    let count = mesh.vertex_count();
    let malformed = |reason: String| ImportError::Malformed {
        mesh: mesh.name.clone(),
        reason,
    };

    if let Some(face) = mesh.faces.iter().find(|face| face.iter().any(|&i| i as usize >= count)) {
        return Err(malformed(format!("face {:?} indexes past {} vertices", face, count)));
    }
    if mesh.tex_coords.as_ref().is_some_and(|uvs| uvs.len() != count) {
        return Err(malformed("texture coordinate count differs from vertex count".into()));
    }
    Ok(())
}

fn post_process(mesh: &mut ImportedMesh, options: &ImportOptions) {
    if mesh.normals.len() != mesh.vertex_count() {
        mesh.normals = if options.gen_smooth_normals {
            smooth_normals(&mesh.positions, &mesh.faces)
        } else {
            vec![Vec3::ZERO; mesh.vertex_count()]
        };
    }

    if options.calc_tangent_space && mesh.tangents.is_none() {
        match &mesh.tex_coords {
            Some(uvs) => {
                let (tangents, bitangents) = tangent_space(&mesh.positions, &mesh.normals, uvs, &mesh.faces);
                mesh.tangents = Some(tangents);
                mesh.bitangents = Some(bitangents);
            }
            None => log::debug!("Mesh `{}` has no texture coordinates, skipping tangent space", mesh.name),
        }
    }

    if options.flip_uvs {
        if let Some(uvs) = &mut mesh.tex_coords {
            for uv in uvs.iter_mut() {
                uv.y = 1.0 - uv.y;
            }
        }
    }
}

// area-weighted
pub fn smooth_normals(positions: &[Vec3], faces: &[[u32; 3]]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];

    for &[a, b, c] in faces {
        let (a, b, c) = (a as usize, b as usize, c as usize);
        let n = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }

    for n in &mut normals {
        *n = n.normalize_or_zero();
    }
    normals
}

/// Per-vertex tangent and bitangent from UV gradients, orthogonalised against the normal.
/// Bitangents are not derived from the tangent, so mirrored UVs keep their handedness.
pub fn tangent_space(
    positions: &[Vec3],
    normals: &[Vec3],
    uvs: &[Vec2],
    faces: &[[u32; 3]],
) -> (Vec<Vec3>, Vec<Vec3>) {
    let mut tangents = vec![Vec3::ZERO; positions.len()];
    let mut bitangents = vec![Vec3::ZERO; positions.len()];

    for &[a, b, c] in faces {
        let (a, b, c) = (a as usize, b as usize, c as usize);
        let edge1 = positions[b] - positions[a];
        let edge2 = positions[c] - positions[a];
        let duv1 = uvs[b] - uvs[a];
        let duv2 = uvs[c] - uvs[a];

        let det = duv1.x * duv2.y - duv2.x * duv1.y;
        if det.abs() < f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;

        let tangent = (edge1 * duv2.y - edge2 * duv1.y) * r;
        let bitangent = (edge2 * duv1.x - edge1 * duv2.x) * r;

        for i in [a, b, c] {
            tangents[i] += tangent;
            bitangents[i] += bitangent;
        }
    }

    for ((t, b), &n) in tangents.iter_mut().zip(bitangents.iter_mut()).zip(normals) {
        let mut tangent = (*t - n * n.dot(*t)).normalize_or_zero();
        if tangent == Vec3::ZERO {
            tangent = n.any_orthonormal_vector();
        }
        let mut bitangent = (*b - n * n.dot(*b)).normalize_or_zero();
        if bitangent == Vec3::ZERO {
            bitangent = n.cross(tangent);
        }
        *t = tangent;
        *b = bitangent;
    }

    (tangents, bitangents)
}

fn default_material(materials: &mut Vec<ImportedMaterial>, slot: &mut Option<usize>) -> usize {
    *slot.get_or_insert_with(|| {
        materials.push(ImportedMaterial::new("default"));
        materials.len() - 1
    })
}

fn read_obj(path: &Path, options: &ImportOptions) -> Result<ImportedScene, ImportError> {
    let (models, obj_materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: options.triangulate,
            single_index: true,
            ignore_points: true,
            ignore_lines: true,
            ..Default::default()
        },
    )?;

    let obj_materials = obj_materials.unwrap_or_else(|e| {
        log::warn!("{}: material library unavailable: {}", path.display(), e);
        Vec::new()
    });

    let mut materials: Vec<ImportedMaterial> = obj_materials.iter().map(obj_material).collect();
    let mut default_slot = None;
    let mut meshes = Vec::with_capacity(models.len());

    for model in models {
        let mesh = model.mesh;
        let malformed = |reason: &str| ImportError::Malformed {
            mesh: model.name.clone(),
            reason: reason.to_string(),
        };

        if mesh.face_arities.iter().any(|&arity| arity != 3) {
            return Err(malformed("non-triangle faces without triangulation"));
        }
        if mesh.indices.len() % 3 != 0 {
            return Err(malformed("index count is not a multiple of three"));
        }

        let positions: Vec<Vec3> = mesh.positions.chunks_exact(3).map(Vec3::from_slice).collect();

        let normals = if mesh.normals.len() == mesh.positions.len() {
            mesh.normals.chunks_exact(3).map(Vec3::from_slice).collect()
        } else {
            Vec::new()
        };

        let tex_coords = (!mesh.texcoords.is_empty())
            .then(|| mesh.texcoords.chunks_exact(2).map(Vec2::from_slice).collect());

        let faces = mesh
            .indices
            .chunks_exact(3)
            .map(|f| [f[0], f[1], f[2]])
            .collect();

        let material_index = match mesh.material_id {
            Some(id) if id < obj_materials.len() => id,
            _ => default_material(&mut materials, &mut default_slot),
        };

        meshes.push(ImportedMesh {
            name: model.name,
            positions,
            normals,
            tangents: None,
            bitangents: None,
            tex_coords,
            faces,
            material_index,
        });
    }

    Ok(ImportedScene { meshes, materials })
}

fn obj_material(material: &tobj::Material) -> ImportedMaterial {
    let mut imported = ImportedMaterial::new(material.name.as_str());

    let channels = [
        (TextureType::Diffuse, &material.diffuse_texture),
        (TextureType::Specular, &material.specular_texture),
        (TextureType::Ambient, &material.ambient_texture),
        (TextureType::Height, &material.normal_texture),
        (TextureType::Shininess, &material.shininess_texture),
        (TextureType::Opacity, &material.dissolve_texture),
    ];
    // the file name is the last token after any `-bm 1`-style options
    for (ty, texture) in channels {
        if let Some(file) = texture.as_deref().and_then(|value| value.split_whitespace().last()) {
            imported.set_texture(ty, file);
        }
    }

    // statements tobj does not model itself
    let extra = [
        ("bump", TextureType::Height),
        ("map_Ke", TextureType::Emissive),
        ("norm", TextureType::Normals),
        ("disp", TextureType::Displacement),
        ("refl", TextureType::Reflection),
    ];
    for (key, ty) in extra {
        if imported.texture(ty).is_some() {
            continue;
        }
        if let Some(file) = material
            .unknown_param
            .get(key)
            .and_then(|value| value.split_whitespace().last())
        {
            imported.set_texture(ty, file);
        }
    }

    imported
}

fn read_gltf(path: &Path, options: &ImportOptions) -> Result<ImportedScene, ImportError> {
    let gltf::Gltf { document, blob } = gltf::Gltf::open(path)?;
    let buffers = gltf::import_buffers(&document, path.parent(), blob)?;

    let mut materials: Vec<ImportedMaterial> = document.materials().map(|m| gltf_material(&m)).collect();
    let mut default_slot = None;
    let mut meshes = Vec::new();

    for mesh in document.meshes() {
        let mesh_name = mesh.name().unwrap_or("mesh");

        for primitive in mesh.primitives() {
            let name = format!("{}#{}", mesh_name, primitive.index());
            let reader = primitive.reader(|buffer| Some(buffers[buffer.index()].0.as_slice()));

            let positions: Vec<Vec3> = reader
                .read_positions()
                .ok_or_else(|| ImportError::Malformed {
                    mesh: name.clone(),
                    reason: "no position data".into(),
                })?
                .map(Vec3::from)
                .collect();

            let normals: Vec<Vec3> = reader
                .read_normals()
                .map(|iter| iter.map(Vec3::from).collect())
                .unwrap_or_default();

            // glTF puts the UV origin top-left; bring it to the bottom-left convention of the other readers
            let tex_coords: Option<Vec<Vec2>> = reader
                .read_tex_coords(0)
                .map(|iter| iter.into_f32().map(|[u, v]| Vec2::new(u, 1.0 - v)).collect());

            let (tangents, bitangents) = match reader.read_tangents() {
                Some(iter) if normals.len() == positions.len() => {
                    let raw: Vec<[f32; 4]> = iter.collect();
                    let tangents: Vec<Vec3> = raw.iter().map(|t| Vec3::new(t[0], t[1], t[2])).collect();
                    let bitangents = raw
                        .iter()
                        .zip(&normals)
                        .map(|(t, n)| n.cross(Vec3::new(t[0], t[1], t[2])) * t[3])
                        .collect();
                    (Some(tangents), Some(bitangents))
                }
                _ => (None, None),
            };

            let indices: Vec<u32> = reader
                .read_indices()
                .map(|iter| iter.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());

            let faces = match primitive.mode() {
                gltf::mesh::Mode::Triangles => triangle_list(&indices),
                gltf::mesh::Mode::TriangleStrip if options.triangulate => triangle_strip(&indices),
                gltf::mesh::Mode::TriangleFan if options.triangulate => triangle_fan(&indices),
                mode => {
                    log::warn!("{}: skipping `{}` with primitive mode {:?}", path.display(), name, mode);
                    continue;
                }
            };

            let material_index = match primitive.material().index() {
                Some(index) => index,
                None => default_material(&mut materials, &mut default_slot),
            };

            meshes.push(ImportedMesh {
                name,
                positions,
                normals,
                tangents,
                bitangents,
                tex_coords,
                faces,
                material_index,
            });
        }
    }

    Ok(ImportedScene { meshes, materials })
}

fn gltf_material(material: &gltf::Material) -> ImportedMaterial {
    let mut imported = ImportedMaterial::new(material.name().unwrap_or(""));

    let channels = [
        (
            TextureType::Diffuse,
            material.pbr_metallic_roughness().base_color_texture().map(|info| info.texture()),
        ),
        (TextureType::Normals, material.normal_texture().map(|normal| normal.texture())),
        (TextureType::Emissive, material.emissive_texture().map(|info| info.texture())),
        (TextureType::Lightmap, material.occlusion_texture().map(|occlusion| occlusion.texture())),
    ];

    for (ty, texture) in channels {
        if let Some(texture) = texture {
            imported.set_texture(ty, gltf_image_path(&texture.source()));
        }
    }

    imported
}

// embedded images are named `*<index>`
fn gltf_image_path(image: &gltf::Image) -> String {
    match image.source() {
        gltf::image::Source::Uri { uri, .. } if !uri.starts_with("data:") => uri.to_string(),
        _ => format!("*{}", image.index()),
    }
}

fn triangle_list(indices: &[u32]) -> Vec<[u32; 3]> {
    indices.chunks_exact(3).map(|f| [f[0], f[1], f[2]]).collect()
}

fn triangle_strip(indices: &[u32]) -> Vec<[u32; 3]> {
    indices
        .windows(3)
        .enumerate()
        .map(|(i, w)| if i % 2 == 0 { [w[0], w[1], w[2]] } else { [w[1], w[0], w[2]] })
        .collect()
}

fn triangle_fan(indices: &[u32]) -> Vec<[u32; 3]> {
    match indices.split_first() {
        Some((&hub, rest)) => rest.windows(2).map(|w| [hub, w[0], w[1]]).collect(),
        None => Vec::new(),
    }
}

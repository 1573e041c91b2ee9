use super::*;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use approx::assert_relative_eq;
use assert_fs::prelude::*;
use glam::Vec3;

// records buffer sizes instead of allocating
#[derive(Default)]
struct HeadlessDevice {
    uploads: Cell<usize>,
}

#[derive(Debug)]
struct HeadlessGeometry {
    vertex_bytes: usize,
    index_bytes: usize,
}

impl GpuDevice for HeadlessDevice {
    type Geometry = HeadlessGeometry;

    fn create_geometry(
        &self,
        _label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<HeadlessGeometry, MeshError> {
        self.uploads.set(self.uploads.get() + 1);
        Ok(HeadlessGeometry {
            vertex_bytes: std::mem::size_of_val(vertices),
            index_bytes: std::mem::size_of_val(indices),
        })
    }
}

struct FailingDevice;

impl GpuDevice for FailingDevice {
    type Geometry = HeadlessGeometry;

    fn create_geometry(&self, label: &str, _: &[Vertex], _: &[u32]) -> Result<HeadlessGeometry, MeshError> {
        Err(MeshError::GpuResource {
            label: label.to_string(),
            reason: "out of memory".into(),
        })
    }
}

#[derive(Default)]
struct RecordingLibrary {
    pool: MaterialPool,
    loads: Vec<(String, TexturePaths)>,
    released: usize,
}

impl MaterialLibrary for RecordingLibrary {
    fn load(&mut self, name: &str, paths: &TexturePaths) -> Result<Rc<Material>, MaterialError> {
        if let Some(material) = self.pool.get(name) {
            return Ok(material);
        }
        self.loads.push((name.to_string(), paths.clone()));
        Ok(self.pool.insert(Material::new(name, paths.clone())))
    }

    fn release(&mut self, material: Rc<Material>) {
        self.released += 1;
        self.pool.release(material);
    }
}

// refuses every material, like a cache whose images are all missing
#[derive(Default)]
struct BrokenLibrary {
    attempts: Vec<String>,
}

impl MaterialLibrary for BrokenLibrary {
    fn load(&mut self, name: &str, _: &TexturePaths) -> Result<Rc<Material>, MaterialError> {
        self.attempts.push(name.to_string());
        Err(MaterialError::NoTextures(name.to_string()))
    }

    fn release(&mut self, _: Rc<Material>) {}
}

fn test_models_path() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("models");
    path
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test_log::test]
fn test_unit_quad() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();
    let path = test_models_path().join("quad.obj");

    let mesh = registry.load(&device, &mut library, &path, true).unwrap();

    assert_eq!(mesh.vertices().len(), 4);
    assert_eq!(mesh.indices(), &[0, 1, 2, 0, 2, 3]);
    assert_eq!(mesh.sub_meshes().len(), 1);

    let sub_mesh = &mesh.sub_meshes()[0];
    assert_eq!(sub_mesh.base_index, 0);
    assert_eq!(sub_mesh.base_vertex, 0);
    assert_eq!(sub_mesh.index_count, 6);
    assert_eq!(sub_mesh.min_extents, Vec3::ZERO);
    assert_eq!(sub_mesh.max_extents, Vec3::new(1.0, 1.0, 0.0));
    assert_eq!(mesh.min_extents(), Vec3::ZERO);
    assert_eq!(mesh.max_extents(), Vec3::new(1.0, 1.0, 0.0));

    for vertex in mesh.vertices() {
        assert_eq!(vertex.normal, [0.0, 0.0, 1.0]);
    }

    assert_eq!(mesh.geometry().vertex_bytes, 4 * std::mem::size_of::<Vertex>());
    assert_eq!(mesh.geometry().index_bytes, 6 * 4);
    assert!(mesh.data().is_contiguous());
}

#[test]
fn test_quad_uvs_are_flipped() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let path = test_models_path().join("quad.obj");

    let mesh = Mesh::load(&device, &path, &ImportOptions::default(), false, &mut library).unwrap();
    assert_eq!(mesh.vertices()[0].tex_coord, [0.0, 1.0]);
    assert_eq!(mesh.vertices()[2].tex_coord, [1.0, 0.0]);

    let options = ImportOptions {
        flip_uvs: false,
        ..Default::default()
    };
    let mesh = Mesh::load(&device, &path, &options, false, &mut library).unwrap();
    assert_eq!(mesh.vertices()[0].tex_coord, [0.0, 0.0]);
    assert_eq!(mesh.vertices()[2].tex_coord, [1.0, 1.0]);
}

#[test]
fn test_quad_texture_path_is_normalised_and_resolved() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let path = test_models_path().join("quad.obj");

    let mesh = Mesh::load(&device, &path, &ImportOptions::default(), true, &mut library).unwrap();

    assert_eq!(library.loads.len(), 1);
    let (name, paths) = &library.loads[0];
    assert_eq!(name, &format!("{}0", key(&path)));
    assert_eq!(
        paths.get(TextureType::Diffuse),
        Some(test_models_path().join("textures/checker.png").as_path())
    );
    assert_eq!(paths.len(), 1);

    let material = mesh.sub_meshes()[0].material.as_ref().unwrap();
    assert_eq!(material.name, *name);
}

#[test]
fn test_without_materials_library_is_untouched() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let path = test_models_path().join("quad.obj");

    let mesh = Mesh::load(&device, &path, &ImportOptions::default(), false, &mut library).unwrap();

    assert!(library.loads.is_empty());
    assert!(mesh.sub_meshes().iter().all(|sub_mesh| sub_mesh.material.is_none()));
}

#[test_log::test]
fn test_shared_material_and_running_offsets() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let path = test_models_path().join("two_parts.obj");

    let mesh = Mesh::load(&device, &path, &ImportOptions::default(), true, &mut library).unwrap();
    let sub_meshes = mesh.sub_meshes();

    assert_eq!(sub_meshes.len(), 3);
    assert_eq!(mesh.vertices().len(), 9);
    assert_eq!(mesh.indices().len(), 9);

    let offsets: Vec<_> = sub_meshes.iter().map(|s| (s.base_index, s.base_vertex)).collect();
    assert_eq!(offsets, vec![(0, 0), (3, 3), (6, 6)]);
    // indices stay local to their sub-mesh
    assert_eq!(&mesh.indices()[3..6], &[0, 1, 2]);
    assert!(mesh.data().is_contiguous());

    // one load for the shared material, named after the first sub-mesh using it
    assert_eq!(library.loads.len(), 1);
    assert_eq!(library.loads[0].0, format!("{}0", key(&path)));
    let left = sub_meshes[0].material.as_ref().unwrap();
    let right = sub_meshes[1].material.as_ref().unwrap();
    assert!(Rc::ptr_eq(left, right));

    // `a.pn` is too short to be a file name
    assert!(sub_meshes[2].material.is_none());
}

#[test]
fn test_bounds_union() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let path = test_models_path().join("two_parts.obj");

    let mesh = Mesh::load(&device, &path, &ImportOptions::default(), false, &mut library).unwrap();
    let sub_meshes = mesh.sub_meshes();

    assert_eq!(sub_meshes[1].min_extents, Vec3::new(2.0, 0.0, 0.0));
    assert_eq!(sub_meshes[1].max_extents, Vec3::new(3.0, 1.0, 1.0));
    assert_eq!(sub_meshes[2].min_extents, Vec3::new(-2.0, -2.0, -1.0));
    assert_eq!(sub_meshes[2].max_extents, Vec3::new(-1.0, -1.0, -1.0));

    assert_eq!(mesh.min_extents(), Vec3::new(-2.0, -2.0, -1.0));
    assert_eq!(mesh.max_extents(), Vec3::new(3.0, 1.0, 1.0));

    for sub_mesh in sub_meshes {
        assert!(mesh.min_extents().cmple(sub_mesh.min_extents).all());
        assert!(mesh.max_extents().cmpge(sub_mesh.max_extents).all());
    }
}

#[test]
fn test_generated_normals_for_part_without_any() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let path = test_models_path().join("two_parts.obj");

    let mesh = Mesh::load(&device, &path, &ImportOptions::default(), false, &mut library).unwrap();

    for vertex in &mesh.vertices()[6..9] {
        let normal = Vec3::from(vertex.normal);
        assert_relative_eq!(normal.length(), 1.0, epsilon = 1e-5);
        // no texture coordinates, so no tangent frame
        assert_eq!(vertex.tangent, [0.0; 3]);
        assert_eq!(vertex.bitangent, [0.0; 3]);
    }
}

#[test]
fn test_tangent_frames_are_right_handed() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();

    for file in ["quad.obj", "two_parts.obj", "triangle.gltf"] {
        let path = test_models_path().join(file);
        let mesh = Mesh::load(&device, &path, &ImportOptions::default(), false, &mut library).unwrap();

        for vertex in mesh.vertices() {
            let n = Vec3::from(vertex.normal);
            let t = Vec3::from(vertex.tangent);
            let b = Vec3::from(vertex.bitangent);
            assert!(n.cross(t).dot(b) >= 0.0, "{}: left-handed frame {:?}", file, vertex);
        }
    }
}

#[test_log::test]
fn test_gltf_negative_tangent_w_is_flipped() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let path = test_models_path().join("triangle.gltf");

    let mesh = Mesh::load(&device, &path, &ImportOptions::default(), true, &mut library).unwrap();

    assert_eq!(mesh.vertices().len(), 3);
    assert_eq!(mesh.indices(), &[0, 1, 2]);
    for vertex in mesh.vertices() {
        assert_relative_eq!(vertex.tangent[0], -1.0, epsilon = 1e-6);
        assert_relative_eq!(vertex.bitangent[1], -1.0, epsilon = 1e-6);
    }

    // glTF's top-left origin survives the flip unchanged
    assert_eq!(mesh.vertices()[1].tex_coord, [1.0, 0.0]);
    assert_eq!(mesh.vertices()[2].tex_coord, [0.0, 1.0]);

    let (_, paths) = &library.loads[0];
    assert_eq!(
        paths.get(TextureType::Diffuse),
        Some(test_models_path().join("albedo.png").as_path())
    );
}

#[test]
fn test_correct_handedness() {
    assert_eq!(correct_handedness(Vec3::Z, Vec3::X, Vec3::Y), Vec3::X);
    assert_eq!(correct_handedness(Vec3::Z, Vec3::X, -Vec3::Y), -Vec3::X);
}

#[test]
fn test_union_extents_of_nothing() {
    assert_eq!(union_extents(&[]), (Vec3::ZERO, Vec3::ZERO));
}

#[test]
fn test_usable_texture_path() {
    assert_eq!(usable_texture_path("maps\\brick.png").as_deref(), Some("maps/brick.png"));
    assert_eq!(usable_texture_path("brick.png").as_deref(), Some("brick.png"));
    assert_eq!(usable_texture_path(""), None);
    assert_eq!(usable_texture_path("a.pn"), None);
    assert_eq!(usable_texture_path("*0"), None);
    assert_eq!(usable_texture_path(" brick.png"), None);
}

#[test]
fn test_load_is_idempotent() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();
    let path = test_models_path().join("quad.obj");

    let first = registry.load(&device, &mut library, &path, true).unwrap();
    let second = registry.load(&device, &mut library, &path, true).unwrap();

    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(device.uploads.get(), 1);
    assert_eq!(library.loads.len(), 1);
    assert_eq!(registry.len(), 1);
    assert!(registry.is_loaded(&key(&path)));
}

#[test_log::test]
fn test_missing_file_is_an_import_error() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry: MeshRegistry<HeadlessGeometry> = MeshRegistry::new();
    let path = test_models_path().join("does_not_exist.obj");

    let err = registry.load(&device, &mut library, &path, true).unwrap_err();

    assert!(err.is_import());
    assert!(!registry.is_loaded(&key(&path)));
    assert!(registry.is_empty());
    assert_eq!(device.uploads.get(), 0);
}

#[test]
fn test_unsupported_format_is_an_import_error() {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("model.fbx");
    file.write_str("not a mesh").unwrap();

    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();

    let err = registry.load(&device, &mut library, file.path(), false).unwrap_err();
    assert!(matches!(
        err,
        MeshError::Import {
            source: ImportError::UnsupportedFormat(_),
            ..
        }
    ));
}

#[test]
fn test_file_with_only_points_is_empty() {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("points.obj");
    file.write_str("v 0 0 0\nv 1 0 0\np 1 2\n").unwrap();

    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();

    let err = registry.load(&device, &mut library, file.path(), false).unwrap_err();
    assert!(err.is_import());
    assert!(registry.is_empty());
}

#[test]
fn test_missing_material_library_still_loads_geometry() {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("orphan.obj");
    file.write_str("mtllib gone.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl nothing\nf 1 2 3\n")
        .unwrap();

    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();

    let mesh = registry.load(&device, &mut library, file.path(), true).unwrap();
    assert_eq!(mesh.vertices().len(), 3);
    assert!(mesh.sub_meshes()[0].material.is_none());
    assert!(library.loads.is_empty());
}

#[test]
fn test_failed_material_load_leaves_sub_mesh_without_material() {
    let device = HeadlessDevice::default();
    let path = test_models_path().join("two_parts.obj");

    let mut library = BrokenLibrary::default();

    let mesh = Mesh::load(&device, &path, &ImportOptions::default(), true, &mut library).unwrap();
    assert!(mesh.sub_meshes().iter().all(|sub_mesh| sub_mesh.material.is_none()));

    // the shared index fails once and the failure is reused by the second part
    assert_eq!(library.attempts, vec![format!("{}0", key(&path))]);
}

#[test_log::test]
fn test_unload_releases_materials() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();
    let path = test_models_path().join("two_parts.obj");

    let mesh = registry.load(&device, &mut library, &path, true).unwrap();
    let material_name = format!("{}0", key(&path));
    assert!(library.pool.contains(&material_name));

    assert!(registry.unload(mesh, &mut library));

    assert!(!registry.is_loaded(&key(&path)));
    assert_eq!(library.released, 2);
    assert!(!library.pool.contains(&material_name));
}

#[test]
fn test_unload_keeps_material_shared_with_other_mesh() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();

    let mesh = registry
        .load(&device, &mut library, test_models_path().join("quad.obj"), true)
        .unwrap();

    // another holder of the same material instance
    let material = mesh.sub_meshes()[0].material.clone().unwrap();
    let name = material.name.clone();

    assert!(registry.unload(mesh, &mut library));
    assert!(library.pool.contains(&name));

    library.release(material);
    assert!(!library.pool.contains(&name));
}

#[test]
fn test_unload_of_foreign_mesh_is_rejected() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();
    let path = test_models_path().join("quad.obj");

    registry.load(&device, &mut library, &path, false).unwrap();
    let stranger = Rc::new(Mesh::load(&device, &path, &ImportOptions::default(), false, &mut library).unwrap());

    assert!(!registry.unload(stranger, &mut library));
    assert!(registry.is_loaded(&key(&path)));
}

#[test]
fn test_reload_after_unload_creates_new_instance() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();
    let path = test_models_path().join("quad.obj");

    let first = registry.load(&device, &mut library, &path, true).unwrap();
    let first_ptr = Rc::as_ptr(&first);
    registry.unload(first, &mut library);

    let second = registry.load(&device, &mut library, &path, true).unwrap();
    assert_ne!(Rc::as_ptr(&second), first_ptr);
    assert_eq!(device.uploads.get(), 2);
    assert_eq!(library.loads.len(), 2);
}

#[test]
fn test_gpu_failure_releases_materials() {
    let mut library = RecordingLibrary::default();
    let mut registry: MeshRegistry<HeadlessGeometry> = MeshRegistry::new();
    let path = test_models_path().join("two_parts.obj");

    let err = registry.load(&FailingDevice, &mut library, &path, true).unwrap_err();

    assert!(matches!(err, MeshError::GpuResource { .. }));
    assert!(!err.is_import());
    assert!(registry.is_empty());
    assert_eq!(library.loads.len(), 1);
    assert!(library.pool.is_empty());
}

#[test]
fn test_load_from_memory() {
    let device = HeadlessDevice::default();
    let mut registry = MeshRegistry::new();

    let vertex = |x: f32, y: f32| Vertex {
        position: [x, y, 0.0],
        normal: [0.0, 0.0, 1.0],
        ..Default::default()
    };
    let data = MeshData {
        vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(0.0, 1.0)],
        indices: vec![0, 1, 2],
        sub_meshes: vec![SubMesh {
            index_count: 3,
            max_extents: Vec3::new(1.0, 1.0, 0.0),
            ..Default::default()
        }],
        max_extents: Vec3::new(1.0, 1.0, 0.0),
        min_extents: Vec3::ZERO,
    };
    assert!(data.is_contiguous());

    let mesh = registry.load_from_memory(&device, "triangle", data.clone()).unwrap();
    let again = registry.load_from_memory(&device, "triangle", data).unwrap();

    assert!(Rc::ptr_eq(&mesh, &again));
    assert_eq!(mesh.name(), "triangle");
    assert_eq!(mesh.geometry().index_bytes, 12);
    assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["triangle"]);
    assert_eq!(device.uploads.get(), 1);
}

#[test]
fn test_is_contiguous_rejects_gaps() {
    let sub_mesh = |base_index, base_vertex| SubMesh {
        index_count: 3,
        base_index,
        base_vertex,
        ..Default::default()
    };
    let mut data = MeshData {
        vertices: vec![Vertex::default(); 6],
        indices: vec![0, 1, 2, 0, 1, 2],
        sub_meshes: vec![sub_mesh(0, 0), sub_mesh(3, 3)],
        ..Default::default()
    };
    assert!(data.is_contiguous());

    data.sub_meshes[1].base_index = 4;
    assert!(!data.is_contiguous());

    data.sub_meshes[1].base_index = 3;
    data.indices[2] = 3;
    assert!(!data.is_contiguous());
}

#[test]
fn test_is_contiguous_survives_overflowing_offsets() {
    let mut data = MeshData {
        vertices: vec![Vertex::default(); 3],
        indices: vec![0, 1, u32::MAX],
        sub_meshes: vec![SubMesh {
            index_count: 3,
            ..Default::default()
        }],
        ..Default::default()
    };
    assert!(!data.is_contiguous());

    data.indices[2] = 2;
    data.sub_meshes.push(SubMesh {
        index_count: u32::MAX,
        base_index: 3,
        base_vertex: u32::MAX,
        ..Default::default()
    });
    assert!(!data.is_contiguous());
}

#[test]
fn test_clear_unloads_everything() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let mut registry = MeshRegistry::new();

    let quad = registry.load(&device, &mut library, test_models_path().join("quad.obj"), true).unwrap();
    let parts = registry
        .load(&device, &mut library, test_models_path().join("two_parts.obj"), true)
        .unwrap();
    drop((quad, parts));

    registry.clear(&mut library);

    assert!(registry.is_empty());
    assert!(library.pool.is_empty());
}

#[test]
fn test_gltf_embedded_image_is_filtered_out() {
    let device = HeadlessDevice::default();
    let mut library = RecordingLibrary::default();
    let path = test_models_path().join("textured.gltf");

    let mesh = Mesh::load(&device, &path, &ImportOptions::default(), true, &mut library).unwrap();

    assert_eq!(library.loads.len(), 1);
    let (_, paths) = &library.loads[0];
    assert_eq!(paths.len(), 3);
    assert_eq!(paths.get(TextureType::Emissive), None);
    assert_eq!(
        paths.get(TextureType::Normals),
        Some(test_models_path().join("maps/normal.png").as_path())
    );
    assert_eq!(
        paths.get(TextureType::Lightmap),
        Some(test_models_path().join("maps/occlusion.png").as_path())
    );

    // the second primitive only has the texture-less default material
    assert!(mesh.sub_meshes()[0].material.is_some());
    assert!(mesh.sub_meshes()[1].material.is_none());
}

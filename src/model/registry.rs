use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use super::gpu::{GpuDevice, GpuGeometry};
use super::importer::ImportOptions;
use super::mesh::{Mesh, MeshData};
use super::{MaterialLibrary, MeshError};

pub struct MeshRegistry<G = GpuGeometry> {
    meshes: HashMap<String, Rc<Mesh<G>>>,
    options: ImportOptions,
}

impl<G> Default for MeshRegistry<G> {
    fn default() -> Self {
        Self::with_options(ImportOptions::default())
    }
}

impl<G> MeshRegistry<G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ImportOptions) -> Self {
        Self {
            meshes: HashMap::new(),
            options,
        }
    }

    pub fn load<D>(
        &mut self,
        device: &D,
        materials: &mut dyn MaterialLibrary,
        path: impl AsRef<Path>,
        load_materials: bool,
    ) -> Result<Rc<Mesh<G>>, MeshError>
    where
        D: GpuDevice<Geometry = G>,
    {
        let path = path.as_ref();
        let key = path.to_string_lossy().into_owned();

        if let Some(mesh) = self.meshes.get(&key) {
            log::debug!("Mesh cache hit: {}", key);
            return Ok(Rc::clone(mesh));
        }

        let mesh = Rc::new(Mesh::load(device, path, &self.options, load_materials, materials)?);
        self.meshes.insert(key, Rc::clone(&mesh));
        Ok(mesh)
    }

    // an existing entry wins and `data` is dropped
    pub fn load_from_memory<D>(
        &mut self,
        device: &D,
        name: &str,
        data: MeshData,
    ) -> Result<Rc<Mesh<G>>, MeshError>
    where
        D: GpuDevice<Geometry = G>,
    {
        if let Some(mesh) = self.meshes.get(name) {
            log::debug!("Mesh cache hit: {}", name);
            return Ok(Rc::clone(mesh));
        }

        let mesh = Rc::new(Mesh::from_data(device, name, data)?);
        log::info!(
            "Registered mesh `{}`: {} sub-meshes, {} vertices",
            name,
            mesh.sub_meshes().len(),
            mesh.vertices().len()
        );
        self.meshes.insert(name.to_string(), Rc::clone(&mesh));
        Ok(mesh)
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.meshes.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Rc<Mesh<G>>> {
        self.meshes.get(key).cloned()
    }

    /// Removes `mesh` from the registry and releases its materials.
    /// Returns `false` if the mesh was not registered here.
    pub fn unload(&mut self, mesh: Rc<Mesh<G>>, materials: &mut dyn MaterialLibrary) -> bool {
        let key = self
            .meshes
            .iter()
            .find(|(_, cached)| Rc::ptr_eq(cached, &mesh))
            .map(|(key, _)| key.clone());

        let Some(key) = key else {
            log::warn!("Unload requested for unregistered mesh `{}`", mesh.name());
            return false;
        };

        self.meshes.remove(&key);
        retire(&key, mesh, materials);
        true
    }

    pub fn clear(&mut self, materials: &mut dyn MaterialLibrary) {
        for (key, mesh) in self.meshes.drain() {
            retire(&key, mesh, materials);
        }
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.meshes.keys().map(String::as_str)
    }
}

fn retire<G>(key: &str, mesh: Rc<Mesh<G>>, materials: &mut dyn MaterialLibrary) {
    match Rc::try_unwrap(mesh) {
        Ok(mut mesh) => {
            mesh.release_materials(materials);
            log::info!("Unloaded mesh `{}`", key);
        }
        Err(mesh) => log::warn!(
            "Mesh `{}` unloaded with {} handles still alive; its resources go with the last one",
            key,
            Rc::strong_count(&mesh) - 1
        ),
    }
}

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use super::texture::Texture;
use super::MaterialError;

// lookup order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureType {
    Diffuse,
    Specular,
    Ambient,
    Emissive,
    Height,
    Normals,
    Shininess,
    Opacity,
    Displacement,
    Lightmap,
    Reflection,
}

impl TextureType {
    pub const COUNT: usize = 11;

    pub const ALL: [TextureType; Self::COUNT] = [
        TextureType::Diffuse,
        TextureType::Specular,
        TextureType::Ambient,
        TextureType::Emissive,
        TextureType::Height,
        TextureType::Normals,
        TextureType::Shininess,
        TextureType::Opacity,
        TextureType::Displacement,
        TextureType::Lightmap,
        TextureType::Reflection,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TextureType::Diffuse => "diffuse",
            TextureType::Specular => "specular",
            TextureType::Ambient => "ambient",
            TextureType::Emissive => "emissive",
            TextureType::Height => "height",
            TextureType::Normals => "normals",
            TextureType::Shininess => "shininess",
            TextureType::Opacity => "opacity",
            TextureType::Displacement => "displacement",
            TextureType::Lightmap => "lightmap",
            TextureType::Reflection => "reflection",
        }
    }

    pub fn is_color(self) -> bool {
        matches!(
            self,
            TextureType::Diffuse | TextureType::Ambient | TextureType::Emissive | TextureType::Specular
        )
    }
}

impl fmt::Display for TextureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TexturePaths([Option<PathBuf>; TextureType::COUNT]);

impl TexturePaths {
    pub fn get(&self, ty: TextureType) -> Option<&Path> {
        self.0[ty.index()].as_deref()
    }

    pub fn set(&mut self, ty: TextureType, path: impl Into<PathBuf>) {
        self.0[ty.index()] = Some(path.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    pub fn len(&self) -> usize {
        self.0.iter().flatten().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TextureType, &Path)> + '_ {
        TextureType::ALL
            .into_iter()
            .filter_map(|ty| self.get(ty).map(|path| (ty, path)))
    }
}

pub struct Material {
    pub name: String,
    pub texture_paths: TexturePaths,
    textures: Vec<(TextureType, Texture)>,
    bind_group: Option<wgpu::BindGroup>,
}

impl Material {
    pub fn new(name: impl Into<String>, texture_paths: TexturePaths) -> Self {
        Self {
            name: name.into(),
            texture_paths,
            textures: Vec::new(),
            bind_group: None,
        }
    }

    pub fn texture(&self, ty: TextureType) -> Option<&Texture> {
        self.textures
            .iter()
            .find(|(channel, _)| *channel == ty)
            .map(|(_, texture)| texture)
    }

    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.bind_group.as_ref()
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("name", &self.name)
            .field("texture_paths", &self.texture_paths)
            .field("uploaded", &self.textures.len())
            .finish()
    }
}

/// The material boundary seen by the mesh loader. It never learns how textures reach the GPU.
pub trait MaterialLibrary {
    /// Returns the material cached under `name`, creating it from `paths` on first use.
    fn load(&mut self, name: &str, paths: &TexturePaths) -> Result<Rc<Material>, MaterialError>;

    /// Gives a handle back. The material is dropped once nothing but the library holds it.
    fn release(&mut self, material: Rc<Material>);
}

#[derive(Debug, Default)]
pub struct MaterialPool {
    entries: HashMap<String, Rc<Material>>,
}

impl MaterialPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Rc<Material>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn insert(&mut self, material: Material) -> Rc<Material> {
        let material = Rc::new(material);
        self.entries.insert(material.name.clone(), Rc::clone(&material));
        material
    }

    /// Drops `material` and evicts its entry when the pool was the last other holder.
    /// Returns whether the entry was evicted.
    pub fn release(&mut self, material: Rc<Material>) -> bool {
        let name = material.name.clone();
        let pooled = self
            .entries
            .get(&name)
            .is_some_and(|entry| Rc::ptr_eq(entry, &material));
        drop(material);

        if !pooled {
            return false;
        }

        let unused = self
            .entries
            .get(&name)
            .is_some_and(|entry| Rc::strong_count(entry) == 1);
        if unused {
            self.entries.remove(&name);
            log::debug!("Evicted material `{}`", name);
        }
        unused
    }

    pub fn purge_unused(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, material| Rc::strong_count(material) > 1);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// wgpu-backed [`MaterialLibrary`]: uploads every channel and binds the diffuse map.
pub struct MaterialCache {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    layout: Arc<wgpu::BindGroupLayout>,
    fallback: Texture,
    fallback_bind_group: wgpu::BindGroup,
    pool: MaterialPool,
}

impl MaterialCache {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        layout: Arc<wgpu::BindGroupLayout>,
    ) -> Self {
        let fallback = Texture::solid(&device, &queue, [255, 255, 255, 255], Some("Fallback Diffuse"));
        let fallback_bind_group = create_bind_group(&device, &layout, &fallback, "fallback");

        Self {
            device,
            queue,
            layout,
            fallback,
            fallback_bind_group,
            pool: MaterialPool::new(),
        }
    }

    pub fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        })
    }

    pub fn fallback_bind_group(&self) -> &wgpu::BindGroup {
        &self.fallback_bind_group
    }

    pub fn purge_unused(&mut self) -> usize {
        self.pool.purge_unused()
    }
}

impl MaterialLibrary for MaterialCache {
    fn load(&mut self, name: &str, paths: &TexturePaths) -> Result<Rc<Material>, MaterialError> {
        if let Some(material) = self.pool.get(name) {
            return Ok(material);
        }

        let mut material = Material::new(name, paths.clone());
        for (ty, path) in paths.iter() {
            match Texture::from_path(&self.device, &self.queue, path, ty.is_color()) {
                Ok(texture) => material.textures.push((ty, texture)),
                Err(e) => log::warn!("Material `{}`: {} texture unavailable: {}", name, ty, e),
            }
        }

        if material.textures.is_empty() {
            return Err(MaterialError::NoTextures(name.to_string()));
        }

        let diffuse = material.texture(TextureType::Diffuse).unwrap_or(&self.fallback);
        let bind_group = create_bind_group(&self.device, &self.layout, diffuse, name);
        material.bind_group = Some(bind_group);

        log::info!("Loaded material `{}` ({} textures)", name, material.textures.len());
        Ok(self.pool.insert(material))
    }

    fn release(&mut self, material: Rc<Material>) {
        self.pool.release(material);
    }
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    diffuse: &Texture,
    name: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{} Bind Group", name)),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&diffuse.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&diffuse.sampler),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diffuse_only(path: &str) -> TexturePaths {
        let mut paths = TexturePaths::default();
        paths.set(TextureType::Diffuse, path);
        paths
    }

    #[test]
    fn test_texture_type_order() {
        assert_eq!(TextureType::ALL.len(), TextureType::COUNT);
        for (i, ty) in TextureType::ALL.iter().enumerate() {
            assert_eq!(ty.index(), i);
        }
        assert_eq!(TextureType::ALL[0], TextureType::Diffuse);
        assert_eq!(TextureType::ALL[10], TextureType::Reflection);
    }

    #[test]
    fn test_texture_paths_iter_skips_empty_channels() {
        let mut paths = TexturePaths::default();
        assert!(paths.is_empty());

        paths.set(TextureType::Normals, "brick_n.png");
        paths.set(TextureType::Diffuse, "brick.png");

        let collected: Vec<_> = paths.iter().collect();
        assert_eq!(
            collected,
            vec![
                (TextureType::Diffuse, Path::new("brick.png")),
                (TextureType::Normals, Path::new("brick_n.png")),
            ]
        );
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_pool_returns_shared_instance() {
        let mut pool = MaterialPool::new();
        let first = pool.insert(Material::new("crate.obj0", diffuse_only("crate.png")));
        let second = pool.get("crate.obj0").unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_release_keeps_material_while_referenced() {
        let mut pool = MaterialPool::new();
        let a = pool.insert(Material::new("scene.obj0", diffuse_only("wood.png")));
        let b = Rc::clone(&a);

        assert!(!pool.release(a));
        assert!(pool.contains("scene.obj0"));

        assert!(pool.release(b));
        assert!(!pool.contains("scene.obj0"));
    }

    #[test]
    fn test_release_of_foreign_handle_is_ignored() {
        let mut pool = MaterialPool::new();
        let _pooled = pool.insert(Material::new("shared", TexturePaths::default()));
        let stranger = Rc::new(Material::new("shared", TexturePaths::default()));

        assert!(!pool.release(stranger));
        assert!(pool.contains("shared"));
    }

    #[test]
    fn test_purge_unused() {
        let mut pool = MaterialPool::new();
        let kept = pool.insert(Material::new("kept", TexturePaths::default()));
        drop(pool.insert(Material::new("dropped", TexturePaths::default())));

        assert_eq!(pool.purge_unused(), 1);
        assert!(pool.contains("kept"));
        assert!(!pool.contains("dropped"));
        drop(kept);
    }
}

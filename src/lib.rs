use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use winit::window::Window;

pub mod model;
pub mod renderer;
pub mod scene;

use model::{MaterialCache, Mesh, MeshRegistry};
use renderer::Renderer;
use scene::Scene;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "mesh-viewer".to_string(),
        }
    }
}

pub struct State {
    window: Arc<Window>,
    pub scene: Scene,
    renderer: Renderer<'static>,
    registry: MeshRegistry,
    materials: MaterialCache,
    mesh: Option<Rc<Mesh>>,
}

impl State {
    pub fn new(window: Window, model_path: &Path, load_materials: bool) -> Result<Self> {
        let window = Arc::new(window);
        let size = window.inner_size();

        log::info!("Creating WGPU instance...");
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        log::info!("Window size: {}x{}", size.width, size.height);
        let surface = instance
            .create_surface(Arc::clone(&window))
            .context("Failed to create surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow!("Failed to find an appropriate adapter"))?;

        let info = adapter.get_info();
        log::info!("Using adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Primary Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        ))
        .context("Failed to create device")?;
        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow!("Surface is incompatible with the adapter"))?;
        log::debug!("Selected surface format: {:?}", surface_format);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let material_layout = Arc::new(MaterialCache::create_bind_group_layout(&device));
        let mut materials = MaterialCache::new(Arc::clone(&device), Arc::clone(&queue), Arc::clone(&material_layout));
        let renderer = Renderer::new(Arc::clone(&device), queue, config, surface, &material_layout);
        let scene = Scene::new(size.width, size.height);

        let mut registry = MeshRegistry::new();
        let mesh = registry
            .load(device.as_ref(), &mut materials, model_path, load_materials)
            .with_context(|| format!("Failed to load {}", model_path.display()))?;

        log::info!(
            "Model bounds: min {:?}, max {:?}",
            mesh.min_extents(),
            mesh.max_extents()
        );

        Ok(Self {
            window,
            scene,
            renderer,
            registry,
            materials,
            mesh: Some(mesh),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.renderer.resize(width, height);
            self.scene.resize(width, height);
        }
    }

    pub fn update(&mut self) {
        self.scene.update();
    }

    pub fn render(&mut self) -> Result<()> {
        let result = self.renderer.render(
            &self.scene,
            self.mesh.as_deref(),
            self.materials.fallback_bind_group(),
        );

        match result {
            Err(e) => match e.downcast_ref::<wgpu::SurfaceError>() {
                Some(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    log::warn!("Surface lost, reconfiguring");
                    self.renderer.reconfigure();
                    Ok(())
                }
                Some(wgpu::SurfaceError::Timeout) => {
                    log::warn!("Surface timeout, skipping frame");
                    Ok(())
                }
                _ => Err(e),
            },
            ok => ok,
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(mesh) = self.mesh.take() {
            self.registry.unload(mesh, &mut self.materials);
        }
        self.registry.clear(&mut self.materials);

        let purged = self.materials.purge_unused();
        log::info!("Shut down, {} materials purged", purged);
    }
}

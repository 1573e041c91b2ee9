pub mod camera;
pub mod transform;

pub use camera::Camera;
pub use transform::Transform;

use glam::{Mat4, Vec3};
use std::time::Instant;

// where the sample puts the viewer and the model
pub const CAMERA_POSITION: Vec3 = Vec3::new(0.0, 0.0, 100.0);
pub const MODEL_OFFSET: Vec3 = Vec3::new(0.0, -20.0, 0.0);
pub const MODEL_SCALE: f32 = 0.6;

pub struct Scene {
    pub camera: Camera,
    pub transform: Transform,
    // radians per second around Y
    pub spin_rate: f32,
    start: Instant,
}

impl Scene {
    pub fn new(width: u32, height: u32) -> Self {
        let mut camera = Camera::new(CAMERA_POSITION, 1.0);
        camera.update_projection(width, height);

        Self {
            camera,
            transform: Transform::from_translation(MODEL_OFFSET).with_uniform_scale(MODEL_SCALE),
            spin_rate: 1.0,
            start: Instant::now(),
        }
    }

    pub fn update(&mut self) {
        self.set_time(self.start.elapsed().as_secs_f32());
    }

    /// Poses the model as it is `seconds` after start.
    pub fn set_time(&mut self, seconds: f32) {
        self.transform.set_yaw(seconds * self.spin_rate);
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.update_projection(width, height);
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.transform.to_matrix()
    }
}

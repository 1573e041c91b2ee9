use std::mem::size_of_val;

use wgpu::util::DeviceExt;

use super::{MeshError, Vertex};

/// Creates the GPU objects backing a mesh.
pub trait GpuDevice {
    type Geometry;

    fn create_geometry(
        &self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<Self::Geometry, MeshError>;
}

// vertex and index buffers for one mesh, laid out per `Vertex::desc`
#[derive(Debug)]
pub struct GpuGeometry {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
}

impl GpuDevice for wgpu::Device {
    type Geometry = GpuGeometry;

    fn create_geometry(
        &self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<GpuGeometry, MeshError> {
        let max_buffer_size = self.limits().max_buffer_size;
        for (kind, size) in [("vertex", size_of_val(vertices)), ("index", size_of_val(indices))] {
            if size as u64 > max_buffer_size {
                return Err(MeshError::GpuResource {
                    label: label.to_string(),
                    reason: format!("{} buffer of {} bytes exceeds device limit of {}", kind, size, max_buffer_size),
                });
            }
        }

        self.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_buffer = self.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Vertex Buffer", label)),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = self.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Index Buffer", label)),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let validation = pollster::block_on(self.pop_error_scope());
        let out_of_memory = pollster::block_on(self.pop_error_scope());

        if let Some(error) = validation.or(out_of_memory) {
            // nothing from a failed upload outlives the call
            vertex_buffer.destroy();
            index_buffer.destroy();
            log::error!("Failed to create GPU buffers for `{}`: {}", label, error);
            return Err(MeshError::GpuResource {
                label: label.to_string(),
                reason: error.to_string(),
            });
        }

        Ok(GpuGeometry {
            vertex_buffer,
            index_buffer,
        })
    }
}

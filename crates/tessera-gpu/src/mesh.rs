//! Indexed geometry in device-local vertex and index buffers.

use crate::command::CommandPool;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::frame_backend::FrameContext;
use crate::memory::GpuBuffer;
use crate::transfer::upload_buffer;
use ash::vk;

/// Usage requested for mesh vertex buffers.
pub const VERTEX_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::VERTEX_BUFFER;
/// Usage requested for mesh index buffers.
pub const INDEX_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::INDEX_BUFFER;

/// Vertex type with a fixed input layout at binding 0.
pub trait Vertex: bytemuck::Pod {
    /// Per-vertex binding at slot 0 with the stride of `Self`.
    fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription>;
}

/// Byte sizes and index count of a mesh, checked before anything is
/// allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshLayout {
    pub vertex_bytes: u64,
    pub index_bytes: u64,
    pub index_count: u32,
}

impl MeshLayout {
    /// Validate `vertices` and `indices`.
    ///
    /// Both must be non-empty and every index must name a vertex.
    pub fn new<V: Vertex>(vertices: &[V], indices: &[u32]) -> Result<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(GpuError::InvalidState(format!(
                "Mesh needs vertices and indices, got {} and {}",
                vertices.len(),
                indices.len()
            )));
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(GpuError::InvalidState(format!(
                "Index {index} out of range for {} vertices",
                vertices.len()
            )));
        }

        Ok(Self {
            vertex_bytes: std::mem::size_of_val(vertices) as u64,
            index_bytes: std::mem::size_of_val(indices) as u64,
            index_count: indices.len() as u32,
        })
    }
}

/// Vertex buffer, 32-bit index buffer and the number of indices to draw.
pub struct Mesh {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
}

impl Mesh {
    /// Upload vertices and indices through staging buffers.
    ///
    /// Blocks until both copies have completed.
    pub fn upload<V: Vertex>(
        gpu: &GpuContext,
        pool: &CommandPool,
        vertices: &[V],
        indices: &[u32],
        name: &str,
    ) -> Result<Self> {
        let layout = MeshLayout::new(vertices, indices)?;

        let vertex_buffer = upload_buffer(
            gpu,
            pool,
            bytemuck::cast_slice(vertices),
            VERTEX_USAGE,
            &format!("{name}-vertices"),
        )?;
        let index_buffer = upload_buffer(
            gpu,
            pool,
            bytemuck::cast_slice(indices),
            INDEX_USAGE,
            &format!("{name}-indices"),
        )?;

        tracing::debug!(
            name,
            vertices = vertices.len(),
            indices = layout.index_count,
            "Mesh uploaded"
        );

        Ok(Self {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: layout.index_count,
        })
    }

    /// Bind both buffers and draw every index once.
    pub fn draw(&self, frame: &FrameContext<'_>) {
        frame.bind_vertex_buffer(&self.vertices);
        frame.bind_index_buffer(&self.indices, vk::IndexType::UINT32);
        frame.draw_indexed(self.index_count, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::device_local_usage;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Point {
        position: [f32; 2],
        color: [f32; 3],
    }

    impl Vertex for Point {
        fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
            vec![
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: 0,
                },
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 1,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: 8,
                },
            ]
        }
    }

    fn quad() -> [Point; 4] {
        [Point {
            position: [0.0; 2],
            color: [1.0; 3],
        }; 4]
    }

    #[test]
    fn layout_sizes_follow_element_sizes() {
        let layout = MeshLayout::new(&quad(), &[0, 1, 2, 2, 3, 0]).unwrap();
        assert_eq!(layout.vertex_bytes, 4 * 20);
        assert_eq!(layout.index_bytes, 6 * 4);
        assert_eq!(layout.index_count, 6);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let err = MeshLayout::new(&quad(), &[0, 1, 4]).unwrap_err();
        assert!(matches!(err, GpuError::InvalidState(_)));
    }

    #[test]
    fn empty_mesh_is_rejected() {
        assert!(MeshLayout::new(&quad(), &[]).is_err());
        assert!(MeshLayout::new::<Point>(&[], &[0]).is_err());
    }

    #[test]
    fn mesh_buffers_are_transfer_destinations() {
        let vertex = device_local_usage(VERTEX_USAGE);
        assert!(vertex.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(vertex.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!vertex.contains(vk::BufferUsageFlags::INDEX_BUFFER));

        let index = device_local_usage(INDEX_USAGE);
        assert!(index.contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(index.contains(vk::BufferUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn binding_stride_is_vertex_size() {
        let binding = Point::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 20);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }
}

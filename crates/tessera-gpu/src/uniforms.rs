//! Per-frame uniform buffers.

use crate::descriptors::UniformWrites;
use crate::error::{GpuError, Result};
use crate::memory::{GpuAllocator, GpuBuffer};
use ash::vk;
use std::marker::PhantomData;

/// One persistently mapped uniform buffer per frame slot.
///
/// Write slot `k` only after that slot's fence has been waited on, i.e. from
/// inside the frame's record callback.
pub struct PerFrameUniforms<T: bytemuck::Pod> {
    buffers: Vec<GpuBuffer>,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> PerFrameUniforms<T> {
    /// Allocate `frames` host-visible buffers sized for one `T`.
    pub fn new(allocator: &GpuAllocator, frames: usize, name: &str) -> Result<Self> {
        let size = std::mem::size_of::<T>() as u64;
        let buffers = (0..frames)
            .map(|slot| {
                allocator.create_buffer(
                    size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                    &format!("{name} [{slot}]"),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            buffers,
            _marker: PhantomData,
        })
    }

    /// Overwrite the uniform for `frame_slot`.
    pub fn write(&self, frame_slot: usize, value: &T) -> Result<()> {
        self.buffers
            .get(frame_slot)
            .ok_or_else(|| GpuError::InvalidState(format!("No uniform buffer for slot {frame_slot}")))?
            .write(std::slice::from_ref(value))
    }

    pub fn buffer(&self, frame_slot: usize) -> Option<vk::Buffer> {
        self.buffers.get(frame_slot).map(|b| b.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Descriptor writes pointing slot `i` at buffer `i`.
    pub fn descriptor_writes(&self) -> UniformWrites {
        UniformWrites {
            buffers: self.buffers.iter().map(|b| (b.buffer, b.size)).collect(),
        }
    }
}

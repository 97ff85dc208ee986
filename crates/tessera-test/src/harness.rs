//! Headless device harness.

use ash::vk;
use tessera_gpu::command::CommandPool;
use tessera_gpu::transfer::{readback_buffer, upload_buffer, upload_image};
use tessera_gpu::{GpuContext, GpuContextBuilder, GpuImage, GpuRuntime};

use crate::{Result, TestError};

/// GPU context without a surface plus a graphics command pool.
///
/// Resources created through the harness must be dropped before it.
pub struct HeadlessDevice {
    command_pool: CommandPool,
    context: GpuContext,
}

impl HeadlessDevice {
    /// Create a headless context with validation enabled.
    pub fn new() -> Result<Self> {
        tessera_core::init_logging("warn");

        let runtime = GpuRuntime::initialize()?;
        let context = GpuContextBuilder::new()
            .app_name("tessera-test")
            .validation(true)
            .build_headless(&runtime)?;

        let command_pool = unsafe {
            CommandPool::new(
                context.device(),
                context.graphics_queue_family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
        }?;

        Ok(Self {
            command_pool,
            context,
        })
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.context
    }

    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Upload `bytes` to a device-local buffer and copy them back.
    pub fn round_trip(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let buffer = upload_buffer(
            &self.context,
            &self.command_pool,
            bytes,
            vk::BufferUsageFlags::TRANSFER_SRC,
            "round-trip",
        )?;
        let read = readback_buffer(&self.context, &self.command_pool, &buffer)?;

        if read.len() != bytes.len() {
            return Err(TestError::Mismatch(format!(
                "read {} bytes, uploaded {}",
                read.len(),
                bytes.len()
            )));
        }
        Ok(read)
    }

    /// Upload RGBA8 pixels as a sampled texture with `mip_levels` levels.
    pub fn upload_rgba(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> Result<GpuImage> {
        let image = upload_image(
            &self.context,
            &self.command_pool,
            pixels,
            width,
            height,
            vk::Format::R8G8B8A8_SRGB,
            mip_levels,
            "test-texture",
        )?;
        Ok(image)
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            let _ = device.device_wait_idle();
            self.command_pool.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkerboard;
    use tessera_gpu::image::{create_image_view, find_depth_format};
    use tessera_gpu::render_pass::{create_framebuffers, AttachmentSet, RenderPass};
    use tessera_gpu::targets::RenderTargets;
    use tessera_gpu::transfer::mip_level_count;
    use tessera_gpu::{Mesh, Vertex};

    // These tests require a Vulkan device and are skipped by default

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn headless_device_creation() {
        let harness = HeadlessDevice::new().unwrap();
        assert!(harness.gpu().is_headless());
        assert_eq!(harness.gpu().runtime().live_contexts(), 1);
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn buffer_round_trip() {
        let harness = HeadlessDevice::new().unwrap();
        let data: Vec<u32> = (0..1024).map(|i| i * 7 + 3).collect();
        let bytes = bytemuck::cast_slice(&data);

        let read = harness.round_trip(bytes).unwrap();
        assert_eq!(read, bytes);
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn texture_upload_with_mipmaps() {
        let harness = HeadlessDevice::new().unwrap();
        let pixels = checkerboard(64, 32, 8);
        let levels = mip_level_count(64, 32);

        let image = harness.upload_rgba(&pixels, 64, 32, levels).unwrap();
        assert_eq!(image.mip_levels, 7);
        assert_eq!(image.extent.width, 64);
    }

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Corner([f32; 2]);

    impl Vertex for Corner {
        fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
            vec![vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            }]
        }
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn mesh_upload_sizes_buffers() {
        let harness = HeadlessDevice::new().unwrap();
        let corners = [Corner([0.0, 0.0]), Corner([1.0, 0.0]), Corner([1.0, 1.0])];

        let mesh = Mesh::upload(harness.gpu(), harness.command_pool(), &corners, &[0, 1, 2], "tri")
            .unwrap();
        assert_eq!(mesh.index_count, 3);
        assert_eq!(mesh.vertices.size, 24);
        assert_eq!(mesh.indices.size, 12);

        let rejected =
            Mesh::upload(harness.gpu(), harness.command_pool(), &corners, &[0, 3], "bad");
        assert!(rejected.is_err());
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn short_pixel_slice_is_rejected() {
        let harness = HeadlessDevice::new().unwrap();
        assert!(harness.upload_rgba(&[0u8; 4], 2, 2, 1).is_err());
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn offscreen_framebuffer_matches_attachments() {
        let harness = HeadlessDevice::new().unwrap();
        let gpu = harness.gpu();
        let device = gpu.device();
        let extent = vk::Extent2D {
            width: 128,
            height: 96,
        };

        let depth_format =
            unsafe { find_depth_format(gpu.instance(), gpu.physical_device()) }.unwrap();
        let attachments =
            AttachmentSet::new(vk::Format::B8G8R8A8_SRGB, depth_format, gpu.msaa_samples());
        let render_pass = unsafe { RenderPass::new(device, attachments) }.unwrap();

        // Stand-in for a swapchain image.
        let resolve = gpu
            .allocator()
            .create_image(
                extent.width,
                extent.height,
                1,
                vk::SampleCountFlags::TYPE_1,
                vk::Format::B8G8R8A8_SRGB,
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                "resolve",
            )
            .unwrap();
        let resolve_view = unsafe {
            create_image_view(
                device,
                resolve.image,
                resolve.format,
                vk::ImageAspectFlags::COLOR,
                1,
            )
        }
        .unwrap();

        let targets = unsafe { RenderTargets::new(gpu, &attachments, extent) }.unwrap();
        assert_eq!(targets.extent(), extent);
        assert_eq!(targets.color_view().is_some(), attachments.is_multisampled());

        let framebuffers = unsafe {
            create_framebuffers(
                device,
                &render_pass,
                targets.color_view(),
                targets.depth_view(),
                &[resolve_view],
                extent,
            )
        }
        .unwrap();
        assert_eq!(framebuffers.len(), 1);

        unsafe {
            for framebuffer in framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            targets.destroy(device);
            device.destroy_image_view(resolve_view, None);
            render_pass.destroy(device);
        }
    }
}

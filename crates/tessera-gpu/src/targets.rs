//! Framebuffer-sized render targets.

use crate::context::GpuContext;
use crate::error::Result;
use crate::image::create_image_view;
use crate::memory::GpuImage;
use crate::render_pass::AttachmentSet;
use ash::vk;

/// Multisampled colour target and depth target sized to the swapchain.
///
/// Created and destroyed only together with the swapchain.
pub struct RenderTargets {
    color: Option<(GpuImage, vk::ImageView)>,
    depth: GpuImage,
    depth_view: vk::ImageView,
}

impl RenderTargets {
    /// Create colour (when multisampled) and depth targets for `extent`.
    ///
    /// # Safety
    /// The context must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        attachments: &AttachmentSet,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let device = gpu.device();
        let allocator = gpu.allocator();

        let color = if attachments.is_multisampled() {
            let image = allocator.create_image(
                extent.width,
                extent.height,
                1,
                attachments.samples,
                attachments.color_format,
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                "color target",
            )?;
            let view = create_image_view(
                device,
                image.image,
                attachments.color_format,
                vk::ImageAspectFlags::COLOR,
                1,
            )?;
            Some((image, view))
        } else {
            None
        };

        let depth = allocator.create_image(
            extent.width,
            extent.height,
            1,
            attachments.samples,
            attachments.depth_format,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            "depth target",
        );
        let depth = match depth {
            Ok(depth) => depth,
            Err(e) => {
                if let Some((_, view)) = &color {
                    device.destroy_image_view(*view, None);
                }
                return Err(e);
            }
        };
        let depth_view = match create_image_view(
            device,
            depth.image,
            attachments.depth_format,
            vk::ImageAspectFlags::DEPTH,
            1,
        ) {
            Ok(view) => view,
            Err(e) => {
                if let Some((_, view)) = &color {
                    device.destroy_image_view(*view, None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            color,
            depth,
            depth_view,
        })
    }

    /// View of the multisampled colour target, if any.
    pub fn color_view(&self) -> Option<vk::ImageView> {
        self.color.as_ref().map(|(_, view)| *view)
    }

    /// View of the depth target.
    pub fn depth_view(&self) -> vk::ImageView {
        self.depth_view
    }

    /// Extent the targets were created with.
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.depth.extent.width,
            height: self.depth.extent.height,
        }
    }

    /// Destroy colour then depth resources.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(self, device: &ash::Device) {
        if let Some((image, view)) = self.color {
            device.destroy_image_view(view, None);
            drop(image);
        }
        device.destroy_image_view(self.depth_view, None);
        drop(self.depth);
    }
}

//! Swapchain lifecycle: creation, recreation and teardown of everything
//! sized to the surface.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::render_pass::{create_framebuffers, RenderPass};
use crate::swapchain::{
    calculate_extent, select_present_mode, select_surface_format, AcquireOutcome, PresentOutcome,
    Swapchain, SwapchainParams,
};
use crate::targets::RenderTargets;
use ash::vk;

/// Result of a recreation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    /// The swapchain and its dependents were rebuilt.
    Recreated,
    /// The framebuffer has zero area; nothing was touched.
    Deferred,
}

/// Owns the swapchain, its views, the render targets and framebuffers.
pub struct SwapchainManager {
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: Swapchain,
    targets: Option<RenderTargets>,
    framebuffers: Vec<vk::Framebuffer>,
    vsync: bool,
}

impl SwapchainManager {
    /// Create the swapchain and its image views.
    ///
    /// Framebuffer resources are added by
    /// [`create_framebuffer_resources`](Self::create_framebuffer_resources)
    /// once the render pass exists.
    ///
    /// # Safety
    /// The context must have a surface.
    pub unsafe fn new(gpu: &GpuContext, framebuffer_size: (u32, u32), vsync: bool) -> Result<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(gpu.instance(), gpu.device());
        let swapchain = build_swapchain(gpu, &swapchain_loader, framebuffer_size, vsync)?;

        Ok(Self {
            swapchain_loader,
            swapchain,
            targets: None,
            framebuffers: Vec::new(),
            vsync,
        })
    }

    /// Create colour and depth targets, then one framebuffer per image.
    ///
    /// # Safety
    /// The render pass must have been created for this swapchain's format.
    pub unsafe fn create_framebuffer_resources(
        &mut self,
        gpu: &GpuContext,
        render_pass: &RenderPass,
    ) -> Result<()> {
        let targets = RenderTargets::new(gpu, &render_pass.attachments, self.swapchain.extent)?;
        let framebuffers = create_framebuffers(
            gpu.device(),
            render_pass,
            targets.color_view(),
            targets.depth_view(),
            &self.swapchain.image_views,
            targets.extent(),
        );
        let framebuffers = match framebuffers {
            Ok(framebuffers) => framebuffers,
            Err(e) => {
                targets.destroy(gpu.device());
                return Err(e);
            }
        };

        self.targets = Some(targets);
        self.framebuffers = framebuffers;
        Ok(())
    }

    /// Rebuild the swapchain and everything sized to it.
    ///
    /// Waits for the device to go idle, destroys colour and depth targets,
    /// framebuffers, views and the swapchain, then creates them again in the
    /// reverse order. A zero-area framebuffer defers the rebuild.
    ///
    /// Fails before touching anything if the surface now prefers a format
    /// other than the one the render pass was built for.
    ///
    /// # Safety
    /// No other thread may be using the device.
    pub unsafe fn recreate(
        &mut self,
        gpu: &GpuContext,
        render_pass: &RenderPass,
        framebuffer_size: (u32, u32),
    ) -> Result<RecreateOutcome> {
        if framebuffer_size.0 == 0 || framebuffer_size.1 == 0 {
            tracing::debug!("Framebuffer has zero area, deferring swapchain recreation");
            return Ok(RecreateOutcome::Deferred);
        }

        let support = gpu.surface()?.support(gpu.physical_device())?;
        let surface_format = select_surface_format(&support.formats)
            .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))?;
        check_format_unchanged(surface_format.format, render_pass.attachments.color_format)?;

        gpu.wait_idle()?;
        self.destroy_resources(gpu.device());

        self.swapchain = build_swapchain(gpu, &self.swapchain_loader, framebuffer_size, self.vsync)?;
        self.create_framebuffer_resources(gpu, render_pass)?;

        tracing::info!(
            width = self.swapchain.extent.width,
            height = self.swapchain.extent.height,
            present_mode = ?self.swapchain.present_mode,
            images = self.swapchain.images.len(),
            "Swapchain recreated"
        );

        Ok(RecreateOutcome::Recreated)
    }

    unsafe fn destroy_resources(&mut self, device: &ash::Device) {
        if let Some(targets) = self.targets.take() {
            targets.destroy(device);
        }
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer, None);
        }
        self.swapchain.destroy_views(device);
        self.swapchain.destroy(&self.swapchain_loader);
    }

    /// Change the vsync preference. Takes effect on the next recreation.
    pub fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }

    /// Current vsync preference.
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Current swapchain image format.
    pub fn format(&self) -> vk::Format {
        self.swapchain.format
    }

    /// Number of swapchain images.
    pub fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    /// Framebuffer for a swapchain image.
    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| GpuError::InvalidState(format!("No framebuffer for image {image_index}")))
    }

    /// Acquire the next image.
    ///
    /// # Safety
    /// The semaphore must be unsignaled with no pending signal.
    pub unsafe fn acquire(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        self.swapchain
            .acquire_next_image(&self.swapchain_loader, semaphore, u64::MAX)
    }

    /// Present an image.
    ///
    /// # Safety
    /// `image_index` must have been acquired and rendered.
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        self.swapchain
            .present(&self.swapchain_loader, queue, image_index, &[wait_semaphore])
    }

    /// Destroy everything owned by the manager.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.destroy_resources(device);
    }
}

/// The render pass and pipelines are tied to the format chosen at startup.
pub fn check_format_unchanged(selected: vk::Format, render_pass_format: vk::Format) -> Result<()> {
    if selected != render_pass_format {
        return Err(GpuError::SwapchainCreation(format!(
            "Surface format changed from {render_pass_format:?} to {selected:?}"
        )));
    }
    Ok(())
}

unsafe fn build_swapchain(
    gpu: &GpuContext,
    swapchain_loader: &ash::khr::swapchain::Device,
    framebuffer_size: (u32, u32),
    vsync: bool,
) -> Result<Swapchain> {
    let surface = gpu.surface()?;
    let support = surface.support(gpu.physical_device())?;

    let surface_format = select_surface_format(&support.formats)
        .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))?;
    let present_mode = select_present_mode(&support.present_modes, vsync);
    let extent = calculate_extent(&support.capabilities, framebuffer_size.0, framebuffer_size.1);

    let params = SwapchainParams {
        surface: surface.surface,
        capabilities: &support.capabilities,
        surface_format,
        present_mode,
        extent,
        graphics_queue_family: gpu.graphics_queue_family(),
        present_queue_family: gpu.present_queue_family(),
    };

    Swapchain::new(gpu.device(), swapchain_loader, &params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_format_passes() {
        assert!(check_format_unchanged(vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_SRGB).is_ok());
    }

    #[test]
    fn changed_format_is_an_error() {
        let err =
            check_format_unchanged(vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_SRGB).unwrap_err();
        assert!(matches!(err, GpuError::SwapchainCreation(_)));
    }
}

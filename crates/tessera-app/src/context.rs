//! Context facade over the window, device and swapchain.

use std::sync::Arc;

use ash::vk;
use tessera_core::constants::DEFAULT_CLEAR_DEPTH;
use tessera_gpu::image::find_depth_format;
use tessera_gpu::{
    AttachmentSet, CommandPool, FrameContext, FramePipeliner, FrameSlots, FrameStats, FrameStatus,
    GpuContext, GpuContextBuilder, GpuRuntime, RenderPass, SwapchainFrames, SwapchainManager,
};
use tracing::{error, info};
use winit::window::Window;

use crate::config::AppConfig;

/// Everything needed to draw frames into a window.
///
/// Dropping the context waits for the device to go idle, then destroys frame
/// slots, the command pool, swapchain resources, the render pass and finally
/// the device, surface and instance.
pub struct Context {
    gpu: GpuContext,
    swapchain: SwapchainManager,
    render_pass: RenderPass,
    command_pool: CommandPool,
    slots: FrameSlots,
    pipeliner: FramePipeliner,
    clear_color: [f32; 4],
    terminate: bool,
    /// Declared after `gpu` so the surface is destroyed before the window.
    window: Arc<Window>,
}

impl Context {
    /// Create the GPU context, swapchain, render pass and frame slots for
    /// `window`.
    pub fn new(window: Arc<Window>, runtime: &GpuRuntime, config: &AppConfig) -> anyhow::Result<Self> {
        let gpu = GpuContextBuilder::new()
            .app_name(&config.title)
            .validation(config.validation)
            .build_for_window(runtime, window.as_ref())?;

        info!("GPU: {}", gpu.profile().summary());

        let size = window.inner_size();
        let framebuffer_size = (size.width.max(1), size.height.max(1));

        // SAFETY: The context was built with a surface.
        let mut swapchain = unsafe { SwapchainManager::new(&gpu, framebuffer_size, config.vsync)? };

        let frames_in_flight = config.frames_in_flight.max(1);
        // SAFETY: The swapchain belongs to this context.
        let resources = unsafe { create_frame_resources(&gpu, &mut swapchain, frames_in_flight) };
        let (render_pass, command_pool, slots) = match resources {
            Ok(resources) => resources,
            Err(e) => {
                // SAFETY: Nothing has been submitted yet.
                unsafe { swapchain.destroy(gpu.device()) };
                return Err(e.into());
            }
        };

        info!(
            "Swapchain created: {}x{} ({} images, {} frames in flight)",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count(),
            frames_in_flight
        );

        Ok(Self {
            gpu,
            swapchain,
            render_pass,
            command_pool,
            slots,
            pipeliner: FramePipeliner::new(frames_in_flight),
            clear_color: config.clear_color,
            terminate: false,
            window,
        })
    }

    /// Drive one frame, calling `record` inside the render pass.
    ///
    /// Returns [`FrameStatus::Paused`] while the window has zero area.
    pub fn draw_frame<F>(&mut self, record: F) -> tessera_gpu::Result<FrameStatus>
    where
        F: FnOnce(&mut FrameContext<'_>),
    {
        let size = self.window.inner_size();
        // SAFETY: Swapchain, render pass and slots were all created from `self.gpu`.
        let mut frames = unsafe {
            SwapchainFrames::new(
                &self.gpu,
                &mut self.swapchain,
                &self.render_pass,
                &self.slots,
                (size.width, size.height),
            )
        }
        .with_clear(self.clear_color, DEFAULT_CLEAR_DEPTH);

        self.pipeliner.draw_frame(&mut frames, record)
    }

    /// Rebuild the swapchain after the next present.
    pub fn notify_resized(&mut self) {
        self.pipeliner.notify_resized();
    }

    /// Switch between FIFO and the lowest-latency present mode.
    ///
    /// The swapchain is rebuilt before the next frame starts.
    pub fn set_vsync(&mut self, vsync: bool) {
        if self.swapchain.vsync() == vsync {
            return;
        }
        info!("VSync {}", if vsync { "enabled" } else { "disabled" });
        self.swapchain.set_vsync(vsync);
        self.pipeliner.request_recreate();
    }

    pub fn vsync(&self) -> bool {
        self.swapchain.vsync()
    }

    /// Ask the run loop to stop after the current frame.
    pub fn request_exit(&mut self) {
        self.terminate = true;
    }

    pub fn should_terminate(&self) -> bool {
        self.terminate
    }

    /// Whether frames are being skipped until the window has a usable size.
    pub fn is_paused(&self) -> bool {
        self.pipeliner.is_paused()
    }

    /// Block until the device has finished all submitted work.
    pub fn wait_idle(&self) -> tessera_gpu::Result<()> {
        self.gpu.wait_idle()
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Width over height of the swapchain.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Command pool on the graphics queue, for one-shot uploads.
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Frame counters since startup.
    pub fn stats(&self) -> FrameStats {
        self.pipeliner.stats()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        let device = self.gpu.device();
        // SAFETY: The device is idle and nothing else references these objects.
        unsafe {
            self.slots.destroy(device);
            self.command_pool.destroy(device);
            self.swapchain.destroy(device);
            self.render_pass.destroy(device);
        }

        info!(
            "Context destroyed after {} frames",
            self.pipeliner.stats().presents
        );
    }
}

/// Render pass, framebuffers, command pool and frame slots.
///
/// On failure everything created here is destroyed again; framebuffer
/// resources stay with the swapchain manager.
unsafe fn create_frame_resources(
    gpu: &GpuContext,
    swapchain: &mut SwapchainManager,
    frames_in_flight: usize,
) -> tessera_gpu::Result<(RenderPass, CommandPool, FrameSlots)> {
    let device = gpu.device();

    let depth_format = find_depth_format(gpu.instance(), gpu.physical_device())?;
    let attachments = AttachmentSet::new(swapchain.format(), depth_format, gpu.msaa_samples());
    let render_pass = RenderPass::new(device, attachments)?;

    if let Err(e) = swapchain.create_framebuffer_resources(gpu, &render_pass) {
        render_pass.destroy(device);
        return Err(e);
    }

    let command_pool = match CommandPool::new(
        device,
        gpu.graphics_queue_family(),
        vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
    ) {
        Ok(pool) => pool,
        Err(e) => {
            render_pass.destroy(device);
            return Err(e);
        }
    };

    match FrameSlots::new(device, &command_pool, frames_in_flight) {
        Ok(slots) => Ok((render_pass, command_pool, slots)),
        Err(e) => {
            command_pool.destroy(device);
            render_pass.destroy(device);
            Err(e)
        }
    }
}

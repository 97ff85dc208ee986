//! `TesseraApp` trait definition.

use tessera_gpu::FrameContext;
use winit::event::{KeyEvent, WindowEvent};

use crate::context::Context;

/// Trait for Tessera applications.
///
/// The runner creates the window, the GPU context and the swapchain, then
/// calls these hooks from the event loop thread.
pub trait TesseraApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the context has been created. Create pipelines and
    /// other GPU resources here.
    fn init(ctx: &mut Context) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering with the time since the last frame
    /// in seconds.
    #[allow(unused_variables)]
    fn update(&mut self, ctx: &mut Context, dt: f32) {}

    /// Record draw commands.
    ///
    /// Called inside the render pass, after the frame slot's fence has been
    /// waited on, so per-slot resources may be written here. Viewport and
    /// scissor cover the whole swapchain image.
    fn render(&mut self, frame: &mut FrameContext<'_>) -> anyhow::Result<()>;

    /// Handle a window resize.
    ///
    /// The swapchain is rebuilt by the framework after the next present.
    /// Not called for zero-sized (minimized) windows.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut Context, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a keyboard event.
    #[allow(unused_variables)]
    fn on_key(&mut self, ctx: &mut Context, event: &KeyEvent) {}

    /// Handle a window event before the framework does.
    ///
    /// Return `true` to stop the framework from processing it.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Release resources before shutdown.
    ///
    /// The device is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut Context) {}
}

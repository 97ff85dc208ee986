//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use tessera_gpu::{FrameContext, GpuRuntime};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::TesseraApp;
use crate::config::AppConfig;
use crate::context::Context;

/// Run a [`TesseraApp`] until its window closes or it requests exit.
///
/// Initializes logging, creates the window and GPU context and runs the event
/// loop. An error from initialization or any frame ends the loop and is
/// returned.
pub fn run_app<A: TesseraApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    run(config, |ctx| A::init(ctx).map(TraitApp))
}

/// Run `callback` once per rendered frame until the window closes.
///
/// The callback runs on the event loop thread inside the render pass, with
/// viewport and scissor set to the swapchain extent. Returns after the device
/// has gone idle.
pub fn run_forever<F>(config: AppConfig, callback: F) -> anyhow::Result<()>
where
    F: FnMut(&mut FrameContext<'_>) + 'static,
{
    run(config, move |_ctx| Ok(ClosureApp { callback }))
}

/// Hooks the runner drives; implemented for trait apps and closures.
trait Frontend {
    fn update(&mut self, ctx: &mut Context, dt: f32);
    fn render(&mut self, frame: &mut FrameContext<'_>) -> anyhow::Result<()>;
    fn on_resize(&mut self, ctx: &mut Context, width: u32, height: u32) -> anyhow::Result<()>;
    fn on_key(&mut self, ctx: &mut Context, event: &KeyEvent);
    fn on_event(&mut self, event: &WindowEvent) -> bool;
    fn cleanup(&mut self, ctx: &mut Context);
}

struct TraitApp<A>(A);

impl<A: TesseraApp> Frontend for TraitApp<A> {
    fn update(&mut self, ctx: &mut Context, dt: f32) {
        self.0.update(ctx, dt);
    }

    fn render(&mut self, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        self.0.render(frame)
    }

    fn on_resize(&mut self, ctx: &mut Context, width: u32, height: u32) -> anyhow::Result<()> {
        self.0.on_resize(ctx, width, height)
    }

    fn on_key(&mut self, ctx: &mut Context, event: &KeyEvent) {
        self.0.on_key(ctx, event);
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        self.0.on_event(event)
    }

    fn cleanup(&mut self, ctx: &mut Context) {
        self.0.cleanup(ctx);
    }
}

struct ClosureApp<F> {
    callback: F,
}

impl<F: FnMut(&mut FrameContext<'_>)> Frontend for ClosureApp<F> {
    fn update(&mut self, _ctx: &mut Context, _dt: f32) {}

    fn render(&mut self, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        (self.callback)(frame);
        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut Context, _width: u32, _height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_key(&mut self, _ctx: &mut Context, _event: &KeyEvent) {}

    fn on_event(&mut self, _event: &WindowEvent) -> bool {
        false
    }

    fn cleanup(&mut self, _ctx: &mut Context) {}
}

type InitFn<D> = Box<dyn FnOnce(&mut Context) -> anyhow::Result<D>>;

fn run<D, I>(config: AppConfig, init: I) -> anyhow::Result<()>
where
    D: Frontend + 'static,
    I: FnOnce(&mut Context) -> anyhow::Result<D> + 'static,
{
    tessera_core::init_logging("info");

    info!("{} starting...", config.title);

    let runtime = GpuRuntime::initialize()?;
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<D> {
        config,
        runtime,
        init: Some(Box::new(init)),
        state: None,
        error: None,
    };

    event_loop.run_app(&mut runner)?;

    // Normally already torn down in `exiting`.
    if let Some(state) = runner.state.take() {
        state.shutdown();
    }

    match runner.error.take() {
        Some(e) => {
            error!("{} stopped: {e:#}", runner.config.title);
            Err(e)
        }
        None => {
            info!("{} exited", runner.config.title);
            Ok(())
        }
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<D: Frontend> {
    config: AppConfig,
    runtime: GpuRuntime,
    init: Option<InitFn<D>>,
    state: Option<AppState<D>>,
    error: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<D: Frontend> {
    app: D,
    ctx: Context,
    last_frame_time: Instant,
}

impl<D: Frontend + 'static> ApplicationHandler for AppRunner<D> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(init) = self.init.take() else {
            return;
        };

        info!("Creating application state...");

        match self.create_state(event_loop, init) {
            Ok(state) => {
                state.ctx.window().request_redraw();
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize application")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        // Let the app handle the event first
        if state.app.on_event(&event) {
            return;
        }

        let result = match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                state.ctx.request_exit();
                Ok(())
            }
            WindowEvent::Resized(size) => state.handle_resize(size),
            WindowEvent::KeyboardInput { event, .. } => {
                state.app.on_key(&mut state.ctx, &event);
                Ok(())
            }
            WindowEvent::RedrawRequested => state.render_frame(),
            _ => Ok(()),
        };

        if let Err(e) = result {
            self.fail(event_loop, e);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(state) = &self.state else {
            return;
        };

        if state.ctx.should_terminate() {
            event_loop.exit();
            return;
        }

        let paused = state.ctx.is_paused();
        event_loop.set_control_flow(control_flow(paused));
        if !paused {
            state.ctx.window().request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.take() {
            state.shutdown();
        }
    }
}

impl<D: Frontend + 'static> AppRunner<D> {
    fn create_state(
        &self,
        event_loop: &ActiveEventLoop,
        init: InitFn<D>,
    ) -> anyhow::Result<AppState<D>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut ctx = Context::new(window, &self.runtime, &self.config)?;
        let app = init(&mut ctx)?;

        Ok(AppState {
            app,
            ctx,
            last_frame_time: Instant::now(),
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        if self.error.is_none() {
            self.error = Some(e);
        }
        event_loop.exit();
    }
}

/// Event-loop mode for the next iteration.
///
/// While paused a minimized window produces no frames, so the loop sleeps
/// until the next resize or other event.
fn control_flow(paused: bool) -> ControlFlow {
    if paused {
        ControlFlow::Wait
    } else {
        ControlFlow::Poll
    }
}

impl<D: Frontend> AppState<D> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        self.app.update(&mut self.ctx, dt);

        let app = &mut self.app;
        let mut render_result = Ok(());
        self.ctx
            .draw_frame(|frame| render_result = app.render(frame))?;
        render_result
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) -> anyhow::Result<()> {
        self.ctx.notify_resized();

        if size.width == 0 || size.height == 0 {
            return Ok(());
        }

        self.app.on_resize(&mut self.ctx, size.width, size.height)?;
        self.ctx.window().request_redraw();
        Ok(())
    }

    fn shutdown(mut self) {
        info!("Starting cleanup...");

        let stats = self.ctx.stats();
        info!(
            presents = stats.presents,
            abandoned = stats.abandoned,
            recreations = stats.recreations,
            "Frame statistics"
        );

        if let Err(e) = self.ctx.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first, the context is dropped after
        self.app.cleanup(&mut self.ctx);

        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_context_sleeps_until_next_event() {
        assert!(matches!(control_flow(true), ControlFlow::Wait));
    }

    #[test]
    fn running_context_polls() {
        assert!(matches!(control_flow(false), ControlFlow::Poll));
    }
}

//! Windowed run loop for Tessera.
//!
//! This crate owns the window, the GPU context and everything sized to the
//! swapchain, and drives frames for either a [`TesseraApp`] implementation or
//! a plain closure.
//!
//! # Example
//!
//! ```no_run
//! use tessera_app::{run_app, AppConfig, Context, FrameContext, TesseraApp};
//!
//! struct Clear;
//!
//! impl TesseraApp for Clear {
//!     fn init(_ctx: &mut Context) -> anyhow::Result<Self> {
//!         Ok(Clear)
//!     }
//!
//!     fn render(&mut self, _frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
//!         // The render pass has already cleared the frame.
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<Clear>(AppConfig::new("Clear"))
//! }
//! ```

mod app;
mod config;
mod context;
mod runner;

pub use app::TesseraApp;
pub use config::AppConfig;
pub use context::Context;
pub use runner::{run_app, run_forever};

// Re-export commonly used types for convenience
pub use tessera_gpu::{FrameContext, FrameStatus, GpuContext};
pub use winit::event::{KeyEvent, WindowEvent};
pub use winit::keyboard::{Key, KeyCode, NamedKey, PhysicalKey};

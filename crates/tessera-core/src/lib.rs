//! Core plumbing shared by the Tessera crates.
//!
//! This crate provides:
//! - The workspace-wide error type
//! - Logging initialization (tracing with an env filter)
//! - TOML configuration loading

pub mod config;
pub mod error;
pub mod logging;

pub use config::load_toml;
pub use error::{Error, Result};
pub use logging::init_logging;

/// Renderer-wide constants.
pub mod constants {
    /// Number of frame slots recorded concurrently with GPU execution.
    pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
    /// Default colour the render pass clears to.
    pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.018, 0.016, 0.018, 1.0];
    /// Depth the render pass clears to.
    pub const DEFAULT_CLEAR_DEPTH: f32 = 1.0;
}

//! Test harness for Tessera.
//!
//! Provides a headless device for exercising uploads, readback and render
//! targets without a window.

pub mod harness;

pub use harness::HeadlessDevice;

use tessera_gpu::GpuError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Data mismatch: {0}")]
    Mismatch(String),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Deterministic RGBA checkerboard, `cell` pixels per square.
pub fn checkerboard(width: u32, height: u32, cell: u32) -> Vec<u8> {
    let cell = cell.max(1);
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let value = if light { 220 } else { 40 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

//! Tessera demo viewer.
//!
//! Opens a window and clears it every frame. Given shaders it also draws a
//! textured full-screen triangle (`--vertex`/`--fragment`) and a vertex
//! coloured quad from vertex and index buffers
//! (`--mesh-vertex`/`--mesh-fragment`).
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p tessera-viewer -- [OPTIONS]
//! ```
//!
//! ## Keys
//!
//! - `V`: toggle vsync
//! - `Escape`: quit
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use std::path::PathBuf;

use clap::Parser;
use tessera_app::{run_app, AppConfig};

use crate::app::{ShaderPaths, Viewer, ViewerShaders, SHADERS};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, default_value = "tessera.toml")]
    config: PathBuf,
    /// Force vsync on or off
    #[arg(long)]
    vsync: Option<bool>,
    /// Window width
    #[arg(long)]
    width: Option<u32>,
    /// Window height
    #[arg(long)]
    height: Option<u32>,
    /// Enable Vulkan validation layers
    #[arg(long)]
    validation: Option<bool>,
    /// SPIR-V vertex shader for the textured pass
    #[arg(long, requires = "fragment")]
    vertex: Option<PathBuf>,
    /// SPIR-V fragment shader for the textured pass
    #[arg(long, requires = "vertex")]
    fragment: Option<PathBuf>,
    /// SPIR-V vertex shader for the indexed quad
    #[arg(long, requires = "mesh_fragment")]
    mesh_vertex: Option<PathBuf>,
    /// SPIR-V fragment shader for the indexed quad
    #[arg(long, requires = "mesh_vertex")]
    mesh_fragment: Option<PathBuf>,
}

fn shader_paths(vertex: Option<PathBuf>, fragment: Option<PathBuf>) -> Option<ShaderPaths> {
    match (vertex, fragment) {
        (Some(vertex), Some(fragment)) => Some(ShaderPaths { vertex, fragment }),
        _ => None,
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_toml(&args.config)?
        .unwrap_or_else(|| AppConfig::new("Tessera Viewer").with_size(1280, 720));
    if let Some(vsync) = args.vsync {
        config.vsync = vsync;
    }
    if let Some(validation) = args.validation {
        config.validation = validation;
    }
    let width = args.width.unwrap_or(config.width);
    let height = args.height.unwrap_or(config.height);
    config = config.with_size(width, height);

    // Only set here, before the app is created.
    let _ = SHADERS.set(ViewerShaders {
        textured: shader_paths(args.vertex, args.fragment),
        geometric: shader_paths(args.mesh_vertex, args.mesh_fragment),
    });

    run_app::<Viewer>(config)
}

//! Vulkan bootstrap layer for Tessera.
//!
//! This crate provides:
//! - Runtime handle, instance and debug messenger
//! - Device selection by capability score
//! - Buffer/image creation, uploads and mipmaps via gpu-allocator
//! - Indexed meshes in device-local vertex and index buffers
//! - Swapchain creation and recreation
//! - Render pass and framebuffer-sized targets
//! - Frame pacing over a fixed number of frames in flight

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod frame;
pub mod frame_backend;
pub mod image;
pub mod instance;
pub mod memory;
pub mod mesh;
pub mod pipeline;
pub mod render_pass;
pub mod runtime;
pub mod surface;
pub mod swapchain;
pub mod swapchain_manager;
pub mod sync;
pub mod targets;
pub mod transfer;
pub mod uniforms;

pub use capabilities::{DeviceProfile, GpuVendor};
pub use command::CommandPool;
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    DescriptorBinding, DescriptorPool, DescriptorWriter, ModelKind, TexturedWrites, UniformWrites,
};
pub use error::{GpuError, Result};
pub use frame::{BoundPipeline, FrameBackend, FramePipeliner, FrameStats, FrameStatus};
pub use frame_backend::{FrameContext, SwapchainFrames};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use mesh::{Mesh, MeshLayout, Vertex};
pub use pipeline::{load_spirv, GraphicsPipeline, GraphicsPipelineConfig};
pub use render_pass::{AttachmentSet, RenderPass};
pub use runtime::GpuRuntime;
pub use swapchain_manager::{RecreateOutcome, SwapchainManager};
pub use sync::FrameSlots;
pub use uniforms::PerFrameUniforms;

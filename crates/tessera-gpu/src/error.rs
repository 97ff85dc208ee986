//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found or initialized.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// Enumeration returned no physical devices at all.
    #[error("No Vulkan-capable GPU found")]
    NoDevices,

    /// Devices exist but none scored above zero.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Validation was requested but a layer is missing.
    #[error("Validation layer not available: {0}")]
    MissingValidationLayer(String),

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// No memory type matches the requested filter and properties.
    #[error("No memory type matches filter {type_filter:#b} with {properties:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// None of the candidate formats support the requested features.
    #[error("No supported format among {0:?}")]
    UnsupportedFormat(Vec<vk::Format>),

    /// Linear blitting is required for mipmap generation.
    #[error("Format {0:?} does not support linear filtering")]
    LinearFilteringUnsupported(vk::Format),

    /// Layout transition pair has no barrier recipe.
    #[error("Unsupported layout transition {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module could not be loaded or created.
    #[error("Shader load failed: {0}")]
    ShaderLoad(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

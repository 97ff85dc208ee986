//! GPU context management.

use crate::capabilities::DeviceProfile;
use crate::device::{
    create_logical_device, select_physical_device, LogicalDevice, SelectedDevice,
};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, DebugMessenger};
use crate::memory::GpuAllocator;
use crate::runtime::{ContextRegistration, GpuRuntime};
use crate::surface::SurfaceContext;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Device handle: instance, selected device, queues and allocator.
///
/// Everything created from a context must be destroyed before it.
pub struct GpuContext {
    pub(crate) instance: ash::Instance,
    pub(crate) debug_messenger: Option<DebugMessenger>,
    pub(crate) surface: Option<SurfaceContext>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) profile: DeviceProfile,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) allocator: GpuAllocator,

    // Queue families and queues
    pub(crate) graphics_queue_family: u32,
    pub(crate) present_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,

    // Dropped last so the count only falls once teardown is complete
    registration: ContextRegistration,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Profile the device was selected with.
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Sample count used for colour and depth targets.
    pub fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.profile.max_sample_count
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &GpuAllocator {
        &self.allocator
    }

    /// Runtime this context was created from.
    pub fn runtime(&self) -> &GpuRuntime {
        self.registration.runtime()
    }

    /// Surface being presented to.
    pub fn surface(&self) -> Result<&SurfaceContext> {
        self.surface
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Context was created without a surface".into()))
    }

    /// Whether the context was created without a surface.
    pub fn is_headless(&self) -> bool {
        self.surface.is_none()
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue. May be the graphics queue.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the present queue family index.
    pub fn present_queue_family(&self) -> u32 {
        self.present_queue_family
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.shutdown();

            self.device.destroy_device(None);
            if let Some(surface) = &self.surface {
                surface.destroy();
            }
            if let Some(messenger) = &self.debug_messenger {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
        tracing::debug!("GPU context destroyed");
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Tessera".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    ///
    /// When enabled, a missing validation layer fails the build.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build a context that presents to `window`.
    pub fn build_for_window<W>(self, runtime: &GpuRuntime, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let instance = unsafe {
            create_instance(
                runtime.entry(),
                &self.app_name,
                Some(display),
                self.enable_validation,
            )
        }?;
        let surface = match unsafe { SurfaceContext::from_window(runtime.entry(), &instance, window) }
        {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { destroy_partial(&instance, None, None, None) };
                return Err(e);
            }
        };

        self.finish(runtime, instance, Some(surface))
    }

    /// Build a context without a surface, for offscreen work and tests.
    pub fn build_headless(self, runtime: &GpuRuntime) -> Result<GpuContext> {
        let instance =
            unsafe { create_instance(runtime.entry(), &self.app_name, None, self.enable_validation) }?;
        self.finish(runtime, instance, None)
    }

    fn finish(
        self,
        runtime: &GpuRuntime,
        instance: ash::Instance,
        surface: Option<SurfaceContext>,
    ) -> Result<GpuContext> {
        let debug_messenger = if self.enable_validation {
            match unsafe { DebugMessenger::new(runtime.entry(), &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { destroy_partial(&instance, None, surface.as_ref(), None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let parts = unsafe { open_device(&instance, surface.as_ref()) };
        let (selected, logical, allocator, device) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                unsafe {
                    destroy_partial(&instance, None, surface.as_ref(), debug_messenger.as_ref());
                }
                return Err(e);
            }
        };

        Ok(GpuContext {
            instance,
            debug_messenger,
            surface,
            physical_device: selected.physical_device,
            profile: selected.profile,
            device,
            allocator,
            graphics_queue_family: logical.graphics_queue_family,
            present_queue_family: logical.present_queue_family,
            graphics_queue: logical.graphics_queue,
            present_queue: logical.present_queue,
            registration: runtime.register_context(),
        })
    }
}

/// Select a device, create it and its allocator.
///
/// On failure the logical device (if created) is destroyed again.
unsafe fn open_device(
    instance: &ash::Instance,
    surface: Option<&SurfaceContext>,
) -> Result<(SelectedDevice, LogicalDevice, GpuAllocator, Arc<ash::Device>)> {
    let selected = select_physical_device(instance, surface)?;
    tracing::info!("Selected GPU: {}", selected.profile.summary());

    let logical = create_logical_device(instance, &selected, surface.is_some())?;
    let device = Arc::new(logical.device.clone());

    match GpuAllocator::new(instance, Arc::clone(&device), selected.physical_device) {
        Ok(allocator) => Ok((selected, logical, allocator, device)),
        Err(e) => {
            destroy_partial(instance, Some(&device), None, None);
            Err(e)
        }
    }
}

/// Tear down whatever part of a context was built before a failure.
///
/// The instance is always destroyed.
unsafe fn destroy_partial(
    instance: &ash::Instance,
    device: Option<&ash::Device>,
    surface: Option<&SurfaceContext>,
    debug_messenger: Option<&DebugMessenger>,
) {
    if let Some(device) = device {
        device.destroy_device(None);
    }
    if let Some(surface) = surface {
        surface.destroy();
    }
    if let Some(messenger) = debug_messenger {
        messenger.destroy();
    }
    instance.destroy_instance(None);
}

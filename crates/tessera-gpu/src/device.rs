//! Physical device selection and logical device creation.

use crate::capabilities::{pick_best, DeviceProfile};
use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use ash::vk;
use std::ffi::c_char;

/// Queue families needed for rendering and presentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both families were found.
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Graphics and presentation run on the same family.
    pub fn shares_family(&self) -> bool {
        self.is_complete() && self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        for family in [self.graphics, self.present].into_iter().flatten() {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Find graphics and present queue families.
///
/// Without a surface the present family mirrors the graphics family.
///
/// # Safety
/// The instance, physical device and surface must be valid.
pub unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<&SurfaceContext>,
) -> Result<QueueFamilyIndices> {
    let families = instance.get_physical_device_queue_family_properties(physical_device);

    let mut indices = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && indices.graphics.is_none() {
            indices.graphics = Some(i);
        }

        let can_present = match surface {
            Some(surface) => surface.supports_present(physical_device, i)?,
            None => family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
        };
        if can_present && indices.present.is_none() {
            indices.present = Some(i);
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Chosen physical device and its profile.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub profile: DeviceProfile,
}

/// Select the best physical device.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<&SurfaceContext>,
) -> Result<SelectedDevice> {
    let devices = instance.enumerate_physical_devices()?;

    let profiles = devices
        .iter()
        .map(|&device| DeviceProfile::query(instance, device, surface))
        .collect::<Result<Vec<_>>>()?;

    let best = pick_best(&profiles)?;

    Ok(SelectedDevice {
        physical_device: devices[best],
        profile: profiles[best].clone(),
    })
}

/// Logical device and the queues retrieved from it.
pub struct LogicalDevice {
    pub device: ash::Device,
    pub graphics_queue_family: u32,
    pub present_queue_family: u32,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

/// Create the logical device and retrieve queues.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
    presentable: bool,
) -> Result<LogicalDevice> {
    let families = selected.profile.queue_families;
    let graphics_family = families.graphics.ok_or(GpuError::NoSuitableDevice)?;
    let present_family = families.present.ok_or(GpuError::NoSuitableDevice)?;

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let mut extension_names: Vec<*const c_char> = Vec::new();
    if presentable {
        extension_names.push(ash::khr::swapchain::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_subset::NAME.as_ptr());

    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(true)
        .sample_rate_shading(selected.profile.sample_rate_shading);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = instance
        .create_device(selected.physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let graphics_queue = device.get_device_queue(graphics_family, 0);
    let present_queue = device.get_device_queue(present_family, 0);

    Ok(LogicalDevice {
        device,
        graphics_queue_family: graphics_family,
        present_queue_family: present_family,
        graphics_queue,
        present_queue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completeness_requires_both_families() {
        let mut indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        indices.graphics = Some(0);
        assert!(!indices.is_complete());
        indices.present = Some(2);
        assert!(indices.is_complete());
        assert!(!indices.shares_family());
    }

    #[test]
    fn unique_families_deduplicates() {
        let shared = QueueFamilyIndices {
            graphics: Some(1),
            present: Some(1),
        };
        assert_eq!(shared.unique_families(), vec![1]);
        assert!(shared.shares_family());

        let split = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(3),
        };
        assert_eq!(split.unique_families(), vec![0, 3]);
    }
}

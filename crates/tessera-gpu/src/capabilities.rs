//! GPU capability detection and device scoring.

use crate::device::{find_queue_families, QueueFamilyIndices};
use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use ash::vk;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// What a device offers for presenting to a particular surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationSupport {
    /// `VK_KHR_swapchain` is available.
    pub has_swapchain_extension: bool,
    /// Number of surface formats reported.
    pub format_count: usize,
    /// Number of present modes reported.
    pub present_mode_count: usize,
}

/// Everything the selector needs to know about one physical device.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Device name
    pub device_name: String,
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Discrete, integrated, ...
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Queue families found on this device
    pub queue_families: QueueFamilyIndices,
    /// `None` when selecting without a surface
    pub presentation: Option<PresentationSupport>,
    /// Anisotropic sampling support
    pub sampler_anisotropy: bool,
    /// Per-sample shading support
    pub sample_rate_shading: bool,
    /// Highest sample count usable for both colour and depth
    pub max_sample_count: vk::SampleCountFlags,
    /// `maxImageDimension2D`
    pub max_image_dimension_2d: u32,
    /// `maxSamplerAnisotropy`
    pub max_sampler_anisotropy: f32,
}

impl DeviceProfile {
    /// Query a device profile.
    ///
    /// # Safety
    /// The instance, physical device and surface must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface: Option<&SurfaceContext>,
    ) -> Result<Self> {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);
        let queue_families = find_queue_families(instance, physical_device, surface)?;

        let presentation = match surface {
            Some(surface) => {
                let has_swapchain_extension = instance
                    .enumerate_device_extension_properties(physical_device)?
                    .iter()
                    .any(|ext| CStr::from_ptr(ext.extension_name.as_ptr()) == ash::khr::swapchain::NAME);
                let support = surface.support(physical_device)?;
                Some(PresentationSupport {
                    has_swapchain_extension,
                    format_count: support.formats.len(),
                    present_mode_count: support.present_modes.len(),
                })
            }
            None => None,
        };

        Ok(Self {
            device_name: CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned(),
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_type: properties.device_type,
            api_version: properties.api_version,
            queue_families,
            presentation,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            sample_rate_shading: features.sample_rate_shading == vk::TRUE,
            max_sample_count: max_usable_sample_count(&properties.limits),
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
        })
    }

    /// Suitability score; zero means unusable.
    pub fn score(&self) -> u64 {
        if !self.queue_families.is_complete() {
            return 0;
        }
        if let Some(presentation) = self.presentation {
            if !presentation.has_swapchain_extension
                || presentation.format_count == 0
                || presentation.present_mode_count == 0
            {
                return 0;
            }
        }
        if !self.sampler_anisotropy {
            return 0;
        }

        let mut score = 0;
        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        }
        score += sample_count_bonus(self.max_sample_count);
        score += u64::from(self.max_image_dimension_2d);
        if self.queue_families.shares_family() {
            score += 100;
        }
        score
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {:?} MSAA",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.max_sample_count,
        )
    }
}

/// Score bonus for the highest usable sample count.
pub fn sample_count_bonus(samples: vk::SampleCountFlags) -> u64 {
    match samples {
        vk::SampleCountFlags::TYPE_64 => 350,
        vk::SampleCountFlags::TYPE_32 => 300,
        vk::SampleCountFlags::TYPE_16 => 200,
        vk::SampleCountFlags::TYPE_8 => 150,
        vk::SampleCountFlags::TYPE_4 => 100,
        vk::SampleCountFlags::TYPE_2 => 50,
        _ => 0,
    }
}

/// Highest sample count supported by both colour and depth framebuffers.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Index of the best-scoring profile.
///
/// Ties go to the first device enumerated.
pub fn pick_best(profiles: &[DeviceProfile]) -> Result<usize> {
    if profiles.is_empty() {
        return Err(GpuError::NoDevices);
    }

    let mut best = None;
    let mut best_score = 0;
    for (index, profile) in profiles.iter().enumerate() {
        let score = profile.score();
        tracing::debug!(device = %profile.device_name, score, "Scored GPU");
        if score > best_score {
            best_score = score;
            best = Some(index);
        }
    }

    best.ok_or(GpuError::NoSuitableDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> DeviceProfile {
        DeviceProfile {
            device_name: "test".to_string(),
            vendor: GpuVendor::Other(0),
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            api_version: vk::API_VERSION_1_2,
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(1),
            },
            presentation: Some(PresentationSupport {
                has_swapchain_extension: true,
                format_count: 2,
                present_mode_count: 1,
            }),
            sampler_anisotropy: true,
            sample_rate_shading: true,
            max_sample_count: vk::SampleCountFlags::TYPE_1,
            max_image_dimension_2d: 4096,
            max_sampler_anisotropy: 16.0,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
    }

    #[test]
    fn baseline_score_is_image_dimension() {
        assert_eq!(profile().score(), 4096);
    }

    #[test]
    fn missing_capabilities_score_zero() {
        let mut p = profile();
        p.queue_families.present = None;
        assert_eq!(p.score(), 0);

        let mut p = profile();
        p.sampler_anisotropy = false;
        assert_eq!(p.score(), 0);

        for presentation in [
            PresentationSupport {
                has_swapchain_extension: false,
                format_count: 2,
                present_mode_count: 1,
            },
            PresentationSupport {
                has_swapchain_extension: true,
                format_count: 0,
                present_mode_count: 1,
            },
            PresentationSupport {
                has_swapchain_extension: true,
                format_count: 2,
                present_mode_count: 0,
            },
        ] {
            let mut p = profile();
            p.presentation = Some(presentation);
            assert_eq!(p.score(), 0);
        }
    }

    #[test]
    fn headless_profile_skips_surface_checks() {
        let mut p = profile();
        p.presentation = None;
        assert_eq!(p.score(), 4096);
    }

    #[test]
    fn discrete_and_shared_family_bonuses() {
        let base = profile().score();

        let mut discrete = profile();
        discrete.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        assert_eq!(discrete.score(), base + 1000);

        let mut shared = profile();
        shared.queue_families.present = Some(0);
        assert_eq!(shared.score(), base + 100);
    }

    #[test]
    fn score_is_monotonic_in_sample_count() {
        let tiers = [
            vk::SampleCountFlags::TYPE_1,
            vk::SampleCountFlags::TYPE_2,
            vk::SampleCountFlags::TYPE_4,
            vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_16,
            vk::SampleCountFlags::TYPE_32,
            vk::SampleCountFlags::TYPE_64,
        ];
        let scores: Vec<u64> = tiers
            .iter()
            .map(|&samples| {
                let mut p = profile();
                p.max_sample_count = samples;
                p.score()
            })
            .collect();
        assert!(scores.windows(2).all(|w| w[0] < w[1]), "{scores:?}");
    }

    #[test]
    fn score_is_monotonic_in_image_dimension() {
        let mut previous = 0;
        for dimension in [1024, 2048, 8192, 16384] {
            let mut p = profile();
            p.max_image_dimension_2d = dimension;
            assert!(p.score() > previous);
            previous = p.score();
        }
    }

    #[test]
    fn usable_sample_count_respects_both_limits() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);

        let single = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&single), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn pick_best_prefers_highest_then_first() {
        let low = profile();
        let mut high = profile();
        high.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        let twin = high.clone();

        assert_eq!(pick_best(&[low.clone(), high, twin]).unwrap(), 1);
        assert_eq!(pick_best(&[low]).unwrap(), 0);
    }

    #[test]
    fn pick_best_errors() {
        assert!(matches!(pick_best(&[]), Err(GpuError::NoDevices)));

        let mut unusable = profile();
        unusable.sampler_anisotropy = false;
        assert!(matches!(
            pick_best(&[unusable]),
            Err(GpuError::NoSuitableDevice)
        ));
    }
}

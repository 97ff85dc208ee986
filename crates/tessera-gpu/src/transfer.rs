//! Host-to-device uploads, layout transitions and mipmap generation.
//!
//! Every operation here records into a one-shot command buffer on the
//! graphics queue and blocks until that queue is idle.

use crate::command::{execute_single_time_commands, CommandPool};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::{GpuBuffer, GpuImage};
use ash::vk;

/// Access masks and pipeline stages for one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier recipe for a layout transition.
///
/// Only the two transitions the upload path needs are supported.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        (from, to) => Err(GpuError::UnsupportedLayoutTransition { from, to }),
    }
}

/// Number of levels in a full mip chain for a `width` x `height` image.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    u32::BITS - width.max(height).max(1).leading_zeros()
}

/// Extent of each level, halving per axis and never dropping below 1.
pub fn mip_chain(width: u32, height: u32, levels: u32) -> Vec<vk::Extent2D> {
    let mut extent = vk::Extent2D {
        width: width.max(1),
        height: height.max(1),
    };
    let mut chain = Vec::with_capacity(levels as usize);
    for _ in 0..levels {
        chain.push(extent);
        extent = vk::Extent2D {
            width: if extent.width > 1 { extent.width / 2 } else { 1 },
            height: if extent.height > 1 { extent.height / 2 } else { 1 },
        };
    }
    chain
}

fn color_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(base_mip_level)
        .level_count(level_count)
        .base_array_layer(0)
        .layer_count(1)
}

fn color_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(mip_level)
        .base_array_layer(0)
        .layer_count(1)
}

#[allow(clippy::too_many_arguments)]
unsafe fn record_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

/// Record a layout transition over every mip level.
///
/// # Safety
/// The command buffer must be recording.
pub unsafe fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    mip_levels: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let masks = transition_masks(old_layout, new_layout)?;
    record_barrier(
        device,
        cmd,
        image,
        color_range(0, mip_levels),
        old_layout,
        new_layout,
        masks.src_access,
        masks.dst_access,
        masks.src_stage,
        masks.dst_stage,
    );
    Ok(())
}

/// Transition every mip level of `image` between layouts.
pub fn transition_image_layout(
    gpu: &GpuContext,
    pool: &CommandPool,
    image: &GpuImage,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let device = gpu.device();
    unsafe {
        execute_single_time_commands(device, pool, gpu.graphics_queue(), |cmd| {
            record_layout_transition(device, cmd, image.image, image.mip_levels, old_layout, new_layout)
        })
    }
}

/// Copy `size` bytes between buffers.
pub fn copy_buffer(
    gpu: &GpuContext,
    pool: &CommandPool,
    src: &GpuBuffer,
    dst: &GpuBuffer,
    size: u64,
) -> Result<()> {
    if size > src.size || size > dst.size {
        return Err(GpuError::InvalidState(format!(
            "Copy of {size} bytes exceeds buffer sizes ({} -> {})",
            src.size, dst.size
        )));
    }

    let device = gpu.device();
    let region = vk::BufferCopy::default().size(size);
    unsafe {
        execute_single_time_commands(device, pool, gpu.graphics_queue(), |cmd| {
            device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]);
            Ok(())
        })
    }
}

/// Size in bytes of one texel for the uncompressed formats uploads accept.
pub fn bytes_per_texel(format: vk::Format) -> Result<u64> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => 1,
        vk::Format::R8G8_UNORM | vk::Format::R8G8_SRGB => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT => 4,
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        other => return Err(GpuError::UnsupportedFormat(vec![other])),
    };
    Ok(size)
}

/// Bytes needed for mip level 0 of a tightly packed `width`x`height` image.
pub fn image_byte_size(width: u32, height: u32, format: vk::Format) -> Result<u64> {
    Ok(u64::from(width) * u64::from(height) * bytes_per_texel(format)?)
}

/// Fail unless `len` is exactly the size of a tightly packed image.
pub fn check_pixel_len(len: usize, width: u32, height: u32, format: vk::Format) -> Result<()> {
    let expected = image_byte_size(width, height, format)?;
    if len as u64 != expected {
        return Err(GpuError::InvalidState(format!(
            "{width}x{height} {format:?} image needs {expected} bytes, got {len}"
        )));
    }
    Ok(())
}

/// Copy tightly packed pixels into mip level 0 of an image in
/// TRANSFER_DST_OPTIMAL.
///
/// Fails if `src` is smaller than the image's base level.
pub fn copy_buffer_to_image(
    gpu: &GpuContext,
    pool: &CommandPool,
    src: &GpuBuffer,
    image: &GpuImage,
) -> Result<()> {
    let needed = image_byte_size(image.extent.width, image.extent.height, image.format)?;
    if src.size < needed {
        return Err(GpuError::InvalidState(format!(
            "Image copy needs {needed} bytes, buffer holds {}",
            src.size
        )));
    }

    let device = gpu.device();
    let region = vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(color_layers(0))
        .image_offset(vk::Offset3D::default())
        .image_extent(image.extent);

    unsafe {
        execute_single_time_commands(device, pool, gpu.graphics_queue(), |cmd| {
            device.cmd_copy_buffer_to_image(
                cmd,
                src.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            Ok(())
        })
    }
}

/// Host-visible, coherent buffer filled with `bytes`.
pub fn create_staging_buffer(gpu: &GpuContext, bytes: &[u8]) -> Result<GpuBuffer> {
    if bytes.is_empty() {
        return Err(GpuError::InvalidState("Cannot stage zero bytes".to_string()));
    }

    let staging = gpu.allocator().create_buffer(
        bytes.len() as u64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        "staging",
    )?;
    staging.write_bytes(0, bytes)?;
    Ok(staging)
}

/// Usage of a device-local buffer filled by [`upload_buffer`].
pub const fn device_local_usage(usage: vk::BufferUsageFlags) -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::from_raw(usage.as_raw() | vk::BufferUsageFlags::TRANSFER_DST.as_raw())
}

/// Upload `bytes` into a new device-local buffer.
///
/// `usage` is extended with `TRANSFER_DST`. Returns once the copy finished;
/// the staging buffer is released before returning.
pub fn upload_buffer(
    gpu: &GpuContext,
    pool: &CommandPool,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    let staging = create_staging_buffer(gpu, bytes)?;
    let buffer = gpu.allocator().create_buffer(
        bytes.len() as u64,
        device_local_usage(usage),
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        name,
    )?;

    copy_buffer(gpu, pool, &staging, &buffer, bytes.len() as u64)?;

    tracing::trace!(name, bytes = bytes.len(), "Uploaded buffer");
    Ok(buffer)
}

/// Upload tightly packed pixels into a new sampled image.
///
/// `pixels` must hold exactly `width * height` texels of `format`.
/// With `mip_levels > 1` the remaining levels are generated by blitting.
/// The image ends in SHADER_READ_ONLY_OPTIMAL.
#[allow(clippy::too_many_arguments)]
pub fn upload_image(
    gpu: &GpuContext,
    pool: &CommandPool,
    pixels: &[u8],
    width: u32,
    height: u32,
    format: vk::Format,
    mip_levels: u32,
    name: &str,
) -> Result<GpuImage> {
    check_pixel_len(pixels.len(), width, height, format)?;

    let staging = create_staging_buffer(gpu, pixels)?;
    let image = gpu.allocator().create_image(
        width,
        height,
        mip_levels.max(1),
        vk::SampleCountFlags::TYPE_1,
        format,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        name,
    )?;

    transition_image_layout(
        gpu,
        pool,
        &image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    copy_buffer_to_image(gpu, pool, &staging, &image)?;

    if image.mip_levels > 1 {
        generate_mipmaps(gpu, pool, &image)?;
    } else {
        transition_image_layout(
            gpu,
            pool,
            &image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
    }

    tracing::trace!(name, width, height, mip_levels, "Uploaded image");
    Ok(image)
}

/// Fill mip levels 1.. of an image whose levels are all in
/// TRANSFER_DST_OPTIMAL and whose level 0 holds the base pixels.
///
/// Every level ends in SHADER_READ_ONLY_OPTIMAL.
#[allow(clippy::cast_possible_wrap)]
pub fn generate_mipmaps(gpu: &GpuContext, pool: &CommandPool, image: &GpuImage) -> Result<()> {
    let properties = unsafe {
        gpu.instance()
            .get_physical_device_format_properties(gpu.physical_device(), image.format)
    };
    if !properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        return Err(GpuError::LinearFilteringUnsupported(image.format));
    }

    let levels = image.mip_levels;
    let chain = mip_chain(image.extent.width, image.extent.height, levels);
    let device = gpu.device();

    unsafe {
        execute_single_time_commands(device, pool, gpu.graphics_queue(), |cmd| {
            for level in 1..levels {
                let src = chain[(level - 1) as usize];
                let dst = chain[level as usize];

                record_barrier(
                    device,
                    cmd,
                    image.image,
                    color_range(level - 1, 1),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::TRANSFER_READ,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                );

                let blit = vk::ImageBlit::default()
                    .src_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: src.width as i32,
                            y: src.height as i32,
                            z: 1,
                        },
                    ])
                    .src_subresource(color_layers(level - 1))
                    .dst_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: dst.width as i32,
                            y: dst.height as i32,
                            z: 1,
                        },
                    ])
                    .dst_subresource(color_layers(level));

                device.cmd_blit_image(
                    cmd,
                    image.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );

                record_barrier(
                    device,
                    cmd,
                    image.image,
                    color_range(level - 1, 1),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::AccessFlags::TRANSFER_READ,
                    vk::AccessFlags::SHADER_READ,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                );
            }

            // The last level was only ever written.
            record_barrier(
                device,
                cmd,
                image.image,
                color_range(levels - 1, 1),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            );
            Ok(())
        })
    }
}

/// Copy a device buffer back to host memory.
///
/// `src` must have been created with `TRANSFER_SRC` usage.
pub fn readback_buffer(gpu: &GpuContext, pool: &CommandPool, src: &GpuBuffer) -> Result<Vec<u8>> {
    let readback = gpu.allocator().create_buffer(
        src.size,
        vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        "readback",
    )?;
    copy_buffer(gpu, pool, src, &readback, src.size)?;
    readback.read_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_transitions() {
        let to_transfer = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_transfer.src_access, vk::AccessFlags::empty());
        assert_eq!(to_transfer.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_transfer.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_transfer.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_shader = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_shader.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_shader.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_shader.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn other_transitions_are_rejected() {
        let result = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert!(matches!(
            result,
            Err(GpuError::UnsupportedLayoutTransition { .. })
        ));
    }

    #[test]
    fn level_count_matches_largest_axis() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 1), 2);
        assert_eq!(mip_level_count(512, 512), 10);
        assert_eq!(mip_level_count(640, 480), 10);
        assert_eq!(mip_level_count(1, 1000), 10);
    }

    #[test]
    fn mip_chain_reaches_one_by_one() {
        for (width, height) in [(1, 1), (7, 3), (256, 256), (640, 480), (1, 4096)] {
            let levels = mip_level_count(width, height);
            let chain = mip_chain(width, height, levels);
            assert_eq!(chain.len(), levels as usize);
            assert_eq!(chain[0], vk::Extent2D { width, height });
            assert_eq!(chain.last(), Some(&vk::Extent2D { width: 1, height: 1 }));
            for pair in chain.windows(2) {
                assert!(pair[1].width >= 1 && pair[1].height >= 1);
                assert!(pair[1].width <= pair[0].width && pair[1].height <= pair[0].height);
            }
        }
    }

    #[test]
    fn mip_chain_halves_with_floor() {
        let chain = mip_chain(5, 2, 3);
        assert_eq!(
            chain,
            vec![
                vk::Extent2D { width: 5, height: 2 },
                vk::Extent2D { width: 2, height: 1 },
                vk::Extent2D { width: 1, height: 1 },
            ]
        );
    }

    #[test]
    fn short_pixel_buffer_is_rejected() {
        let err = check_pixel_len(4, 2, 2, vk::Format::R8G8B8A8_SRGB).unwrap_err();
        assert!(matches!(err, GpuError::InvalidState(_)));
        assert!(check_pixel_len(17, 2, 2, vk::Format::R8G8B8A8_SRGB).is_err());
        assert!(check_pixel_len(16, 2, 2, vk::Format::R8G8B8A8_SRGB).is_ok());
    }

    #[test]
    fn image_size_follows_texel_size() {
        assert_eq!(image_byte_size(3, 5, vk::Format::R8_UNORM).unwrap(), 15);
        assert_eq!(image_byte_size(64, 32, vk::Format::B8G8R8A8_SRGB).unwrap(), 8192);
        assert_eq!(
            image_byte_size(2, 2, vk::Format::R32G32B32A32_SFLOAT).unwrap(),
            64
        );
    }

    #[test]
    fn compressed_formats_are_not_uploadable() {
        assert!(matches!(
            bytes_per_texel(vk::Format::BC1_RGB_UNORM_BLOCK),
            Err(GpuError::UnsupportedFormat(_))
        ));
    }
}

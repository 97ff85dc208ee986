//! Descriptor layouts, pools and writes.
//!
//! Layouts are described as data ([`DescriptorBinding`] lists) and filled by a
//! [`DescriptorWriter`] chosen per [`ModelKind`].

use crate::error::Result;
use ash::vk;

/// Binding slot of the per-frame uniform buffer.
pub const UNIFORM_BINDING: u32 = 0;
/// Binding slot of the texture sampler in textured layouts.
pub const SAMPLER_BINDING: u32 = 1;

/// Kind of resource bound at a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl BindingKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub slot: u32,
    pub kind: BindingKind,
    pub stage: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    pub const fn new(slot: u32, kind: BindingKind, stage: vk::ShaderStageFlags) -> Self {
        Self { slot, kind, stage }
    }

    fn layout_binding(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.slot)
            .descriptor_type(self.kind.descriptor_type())
            .descriptor_count(1)
            .stage_flags(self.stage)
    }
}

/// Create a descriptor set layout from a binding list.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_set_layout(
    device: &ash::Device,
    bindings: &[DescriptorBinding],
) -> Result<vk::DescriptorSetLayout> {
    let layout_bindings: Vec<_> = bindings.iter().map(DescriptorBinding::layout_binding).collect();
    let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);

    let layout = device.create_descriptor_set_layout(&layout_info, None)?;
    Ok(layout)
}

/// Pool sizes for `sets` copies of a layout, one entry per descriptor type.
pub fn pool_sizes(bindings: &[DescriptorBinding], sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        let ty = binding.kind.descriptor_type();
        match sizes.iter_mut().find(|size| size.ty == ty) {
            Some(size) => size.descriptor_count += sets,
            None => sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: sets,
            }),
        }
    }
    sizes
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    /// Pool holding one set of `bindings` per frame slot.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn for_frames(
        device: &ash::Device,
        bindings: &[DescriptorBinding],
        frames: u32,
    ) -> Result<Self> {
        Self::new(device, frames, &pool_sizes(bindings, frames))
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate descriptor sets.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = device.allocate_descriptor_sets(&alloc_info)?;
        Ok(sets)
    }

    /// Allocate `count` sets sharing one layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_per_frame(
        &self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        self.allocate(device, &layouts)
    }

    /// Destroy the pool, releasing its sets.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}

/// Write a uniform buffer descriptor.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write a combined image sampler descriptor for a shader-readable image.
///
/// # Safety
/// Device, image view and sampler must be valid.
pub unsafe fn write_combined_image_sampler(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .sampler(sampler)
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(std::slice::from_ref(&image_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// How a model's resources are exposed to its shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Uniform buffer plus a sampled texture.
    Textured,
    /// Uniform buffer only.
    Geometric,
}

impl ModelKind {
    /// Bindings of this model's descriptor set layout.
    pub fn bindings(self) -> Vec<DescriptorBinding> {
        let uniform = DescriptorBinding::new(
            UNIFORM_BINDING,
            BindingKind::UniformBuffer,
            vk::ShaderStageFlags::VERTEX,
        );
        match self {
            Self::Geometric => vec![uniform],
            Self::Textured => vec![
                uniform,
                DescriptorBinding::new(
                    SAMPLER_BINDING,
                    BindingKind::CombinedImageSampler,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        }
    }
}

/// Fills one descriptor set per frame slot.
pub trait DescriptorWriter {
    /// Layout this writer fills.
    fn model_kind(&self) -> ModelKind;

    /// Write every binding of the set used by `frame_slot`.
    ///
    /// # Safety
    /// The set must have been allocated with this writer's layout and must
    /// not be in use by the GPU.
    unsafe fn write_set(&self, device: &ash::Device, set: vk::DescriptorSet, frame_slot: usize);
}

/// Per-frame uniform buffers, one `(buffer, range)` per slot.
#[derive(Debug, Clone, Default)]
pub struct UniformWrites {
    pub buffers: Vec<(vk::Buffer, u64)>,
}

impl DescriptorWriter for UniformWrites {
    fn model_kind(&self) -> ModelKind {
        ModelKind::Geometric
    }

    unsafe fn write_set(&self, device: &ash::Device, set: vk::DescriptorSet, frame_slot: usize) {
        if let Some(&(buffer, range)) = self.buffers.get(frame_slot) {
            write_uniform_buffer(device, set, UNIFORM_BINDING, buffer, 0, range);
        }
    }
}

/// Per-frame uniforms plus one texture shared by every slot.
#[derive(Debug, Clone)]
pub struct TexturedWrites {
    pub uniforms: UniformWrites,
    pub image_view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl DescriptorWriter for TexturedWrites {
    fn model_kind(&self) -> ModelKind {
        ModelKind::Textured
    }

    unsafe fn write_set(&self, device: &ash::Device, set: vk::DescriptorSet, frame_slot: usize) {
        self.uniforms.write_set(device, set, frame_slot);
        write_combined_image_sampler(device, set, SAMPLER_BINDING, self.image_view, self.sampler);
    }
}

/// Write `sets[i]` for frame slot `i`.
///
/// # Safety
/// See [`DescriptorWriter::write_set`].
pub unsafe fn write_frame_sets(
    device: &ash::Device,
    writer: &dyn DescriptorWriter,
    sets: &[vk::DescriptorSet],
) {
    for (slot, &set) in sets.iter().enumerate() {
        writer.write_set(device, set, slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_kinds_bind_uniform_at_slot_zero() {
        for kind in [ModelKind::Geometric, ModelKind::Textured] {
            let bindings = kind.bindings();
            assert_eq!(bindings[0].slot, UNIFORM_BINDING);
            assert_eq!(bindings[0].kind, BindingKind::UniformBuffer);
        }
    }

    #[test]
    fn textured_adds_fragment_sampler() {
        let bindings = ModelKind::Textured.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].slot, SAMPLER_BINDING);
        assert_eq!(bindings[1].kind, BindingKind::CombinedImageSampler);
        assert_eq!(bindings[1].stage, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ModelKind::Geometric.bindings().len(), 1);
    }

    #[test]
    fn pool_sizes_scale_with_frames() {
        let sizes = pool_sizes(&ModelKind::Textured.bindings(), 2);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 2);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 2);
    }

    #[test]
    fn pool_sizes_merge_same_type() {
        let stage = vk::ShaderStageFlags::VERTEX;
        let bindings = [
            DescriptorBinding::new(0, BindingKind::UniformBuffer, stage),
            DescriptorBinding::new(1, BindingKind::CombinedImageSampler, stage),
            DescriptorBinding::new(2, BindingKind::UniformBuffer, stage),
        ];
        let sizes = pool_sizes(&bindings, 3);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 6);
        assert_eq!(sizes[1].descriptor_count, 3);
    }

    #[test]
    fn layout_binding_carries_fields() {
        let binding = DescriptorBinding::new(
            4,
            BindingKind::CombinedImageSampler,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .layout_binding();
        assert_eq!(binding.binding, 4);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(binding.descriptor_count, 1);
    }

    #[test]
    fn writers_report_their_model() {
        let uniforms = UniformWrites::default();
        assert_eq!(uniforms.model_kind(), ModelKind::Geometric);
        let textured = TexturedWrites {
            uniforms,
            image_view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
        };
        assert_eq!(textured.model_kind(), ModelKind::Textured);
    }
}

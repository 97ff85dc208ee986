//! Render pass and the positional attachment contract shared with framebuffers.
//!
//! With multisampling the attachments are, in order:
//!
//! | index | attachment | samples |
//! |-------|------------|---------|
//! | 0 | colour target | device maximum |
//! | 1 | depth target | device maximum |
//! | 2 | swapchain image (resolve) | 1 |
//!
//! Without multisampling the swapchain image is attachment 0 and there is
//! no resolve attachment. Framebuffer views are produced by the same
//! [`AttachmentSet`] so the two orders cannot drift apart.

use crate::error::Result;
use ash::vk;

/// Index of the colour attachment.
pub const COLOR_ATTACHMENT: u32 = 0;
/// Index of the depth attachment.
pub const DEPTH_ATTACHMENT: u32 = 1;
/// Index of the resolve attachment when multisampling.
pub const RESOLVE_ATTACHMENT: u32 = 2;

/// Formats and sample count of the render pass attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentSet {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

impl AttachmentSet {
    pub fn new(
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            color_format,
            depth_format,
            samples,
        }
    }

    /// Whether a separate colour target is resolved into the swapchain image.
    pub fn is_multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    /// Number of attachments in the render pass.
    pub fn attachment_count(&self) -> usize {
        if self.is_multisampled() {
            3
        } else {
            2
        }
    }

    /// Attachment descriptions in positional order.
    pub fn descriptions(&self) -> Vec<vk::AttachmentDescription> {
        let color_final = if self.is_multisampled() {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        };

        let mut descriptions = vec![
            vk::AttachmentDescription::default()
                .format(self.color_format)
                .samples(self.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(color_final),
            vk::AttachmentDescription::default()
                .format(self.depth_format)
                .samples(self.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];

        if self.is_multisampled() {
            descriptions.push(
                vk::AttachmentDescription::default()
                    .format(self.color_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            );
        }

        descriptions
    }

    /// Views for one framebuffer, in attachment order.
    ///
    /// `color_target` is ignored without multisampling.
    pub fn framebuffer_views(
        &self,
        color_target: Option<vk::ImageView>,
        depth_target: vk::ImageView,
        swapchain_view: vk::ImageView,
    ) -> Vec<vk::ImageView> {
        match color_target {
            Some(color) if self.is_multisampled() => vec![color, depth_target, swapchain_view],
            _ => vec![swapchain_view, depth_target],
        }
    }

    /// Clear values for every attachment that is cleared on load.
    pub fn clear_values(&self, color: [f32; 4], depth: f32) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        ]
    }
}

/// Render pass wrapper.
pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    pub attachments: AttachmentSet,
}

impl RenderPass {
    /// Create the single-subpass render pass for `attachments`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, attachments: AttachmentSet) -> Result<Self> {
        let descriptions = attachments.descriptions();

        let color_refs = [vk::AttachmentReference {
            attachment: COLOR_ATTACHMENT,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: DEPTH_ATTACHMENT,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_refs = [vk::AttachmentReference {
            attachment: RESOLVE_ATTACHMENT,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref);
        if attachments.is_multisampled() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass];
        let dependencies = [dependency];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&descriptions)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = device.create_render_pass(&create_info, None)?;

        tracing::debug!(
            color = ?attachments.color_format,
            depth = ?attachments.depth_format,
            samples = ?attachments.samples,
            "Render pass created"
        );

        Ok(Self {
            render_pass,
            attachments,
        })
    }

    /// Destroy the render pass.
    ///
    /// # Safety
    /// No pipeline or framebuffer may still be in use with it.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_render_pass(self.render_pass, None);
    }
}

/// Attachment view lists for every swapchain image.
pub fn framebuffer_attachment_lists(
    attachments: &AttachmentSet,
    color_target: Option<vk::ImageView>,
    depth_target: vk::ImageView,
    swapchain_views: &[vk::ImageView],
) -> Vec<Vec<vk::ImageView>> {
    swapchain_views
        .iter()
        .map(|&view| attachments.framebuffer_views(color_target, depth_target, view))
        .collect()
}

/// Create one framebuffer per swapchain image.
///
/// # Safety
/// All handles must be valid and the views must match `render_pass`.
pub unsafe fn create_framebuffers(
    device: &ash::Device,
    render_pass: &RenderPass,
    color_target: Option<vk::ImageView>,
    depth_target: vk::ImageView,
    swapchain_views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let lists = framebuffer_attachment_lists(
        &render_pass.attachments,
        color_target,
        depth_target,
        swapchain_views,
    );

    let mut framebuffers = Vec::with_capacity(lists.len());
    for views in &lists {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.render_pass)
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        match device.create_framebuffer(&create_info, None) {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    device.destroy_framebuffer(framebuffer, None);
                }
                return Err(e.into());
            }
        }
    }

    Ok(framebuffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn msaa() -> AttachmentSet {
        AttachmentSet::new(
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_4,
        )
    }

    fn view(raw: u64) -> vk::ImageView {
        vk::ImageView::from_raw(raw)
    }

    #[test]
    fn multisampled_descriptions_follow_positional_contract() {
        let set = msaa();
        let descriptions = set.descriptions();
        assert_eq!(descriptions.len(), set.attachment_count());

        let color = &descriptions[COLOR_ATTACHMENT as usize];
        assert_eq!(color.samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let depth = &descriptions[DEPTH_ATTACHMENT as usize];
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );

        let resolve = &descriptions[RESOLVE_ATTACHMENT as usize];
        assert_eq!(resolve.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(resolve.load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(resolve.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn single_sample_presents_the_colour_attachment() {
        let set = AttachmentSet::new(
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_1,
        );
        let descriptions = set.descriptions();
        assert_eq!(descriptions.len(), 2);
        assert_eq!(descriptions[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(
            set.framebuffer_views(Some(view(1)), view(2), view(3)),
            vec![view(3), view(2)]
        );
    }

    #[test]
    fn framebuffer_views_match_attachment_order() {
        assert_eq!(
            msaa().framebuffer_views(Some(view(1)), view(2), view(3)),
            vec![view(1), view(2), view(3)]
        );
    }

    #[test]
    fn rebuilt_lists_reference_new_targets() {
        let set = msaa();
        let swapchain_views = [view(10), view(11), view(12)];

        let before = framebuffer_attachment_lists(&set, Some(view(1)), view(2), &swapchain_views);
        let after = framebuffer_attachment_lists(&set, Some(view(5)), view(6), &swapchain_views);

        assert_eq!(after.len(), swapchain_views.len());
        for (i, views) in after.iter().enumerate() {
            assert_eq!(views, &vec![view(5), view(6), swapchain_views[i]]);
            assert!(!views.contains(&view(1)) && !views.contains(&view(2)));
        }
        assert_ne!(before, after);
    }

    #[test]
    fn clear_values_cover_colour_and_depth() {
        let values = msaa().clear_values([0.018, 0.016, 0.018, 1.0], 1.0);
        unsafe {
            assert_eq!(values[0].color.float32, [0.018, 0.016, 0.018, 1.0]);
            assert!((values[1].depth_stencil.depth - 1.0).abs() < f32::EPSILON);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }
}

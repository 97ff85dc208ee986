//! Vulkan implementation of [`FrameBackend`] over a swapchain.

use crate::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use crate::context::GpuContext;
use crate::error::Result;
use crate::frame::{BoundPipeline, FrameBackend};
use crate::memory::GpuBuffer;
use crate::pipeline::GraphicsPipeline;
use crate::render_pass::RenderPass;
use crate::swapchain::{AcquireOutcome, PresentOutcome};
use crate::swapchain_manager::{RecreateOutcome, SwapchainManager};
use crate::sync::{reset_fence, wait_for_fence, FrameSlots};
use ash::vk;

/// Stages that wait for the acquired image.
pub const IMAGE_WAIT_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw(),
);

/// Borrowed view of everything one frame touches.
pub struct SwapchainFrames<'a> {
    gpu: &'a GpuContext,
    swapchain: &'a mut SwapchainManager,
    render_pass: &'a RenderPass,
    slots: &'a FrameSlots,
    framebuffer_size: (u32, u32),
    clear_color: [f32; 4],
    clear_depth: f32,
}

impl<'a> SwapchainFrames<'a> {
    /// # Safety
    /// The swapchain, render pass and slots must belong to `gpu`, and the
    /// swapchain's framebuffers must have been created for `render_pass`.
    pub unsafe fn new(
        gpu: &'a GpuContext,
        swapchain: &'a mut SwapchainManager,
        render_pass: &'a RenderPass,
        slots: &'a FrameSlots,
        framebuffer_size: (u32, u32),
    ) -> Self {
        Self {
            gpu,
            swapchain,
            render_pass,
            slots,
            framebuffer_size,
            clear_color: tessera_core::constants::DEFAULT_CLEAR_COLOR,
            clear_depth: tessera_core::constants::DEFAULT_CLEAR_DEPTH,
        }
    }

    /// Override the clear values.
    pub fn with_clear(mut self, color: [f32; 4], depth: f32) -> Self {
        self.clear_color = color;
        self.clear_depth = depth;
        self
    }
}

impl<'a> FrameBackend for SwapchainFrames<'a> {
    type Frame = FrameContext<'a>;

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        unsafe { wait_for_fence(self.gpu.device(), self.slots.get(slot).in_flight, u64::MAX) }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        unsafe { self.swapchain.acquire(self.slots.get(slot).image_available) }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        unsafe { reset_fence(self.gpu.device(), self.slots.get(slot).in_flight) }
    }

    fn begin_recording(
        &mut self,
        slot: usize,
        image_index: u32,
        bound: BoundPipeline,
    ) -> Result<FrameContext<'a>> {
        let gpu: &'a GpuContext = self.gpu;
        let device = gpu.device();
        let command_buffer = self.slots.get(slot).command_buffer;
        let framebuffer = self.swapchain.framebuffer(image_index)?;
        let extent = self.swapchain.extent();
        let clear_values = self
            .render_pass
            .attachments
            .clear_values(self.clear_color, self.clear_depth);

        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            begin_command_buffer(
                device,
                command_buffer,
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )?;

            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            };
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }

        Ok(FrameContext {
            device,
            command_buffer,
            image_index,
            frame_slot: slot,
            extent,
            bound,
        })
    }

    fn end_recording(&mut self, _slot: usize, frame: FrameContext<'a>) -> Result<BoundPipeline> {
        unsafe {
            frame.device.cmd_end_render_pass(frame.command_buffer);
            end_command_buffer(frame.device, frame.command_buffer)?;
        }
        Ok(frame.bound)
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame_slot = self.slots.get(slot);
        unsafe {
            submit_command_buffers(
                self.gpu.device(),
                self.gpu.graphics_queue(),
                &[frame_slot.command_buffer],
                &[frame_slot.image_available],
                &[IMAGE_WAIT_STAGES],
                &[frame_slot.render_finished],
                frame_slot.in_flight,
            )
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        unsafe {
            self.swapchain.present(
                self.gpu.present_queue(),
                image_index,
                self.slots.get(slot).render_finished,
            )
        }
    }

    fn recreate_swapchain(&mut self) -> Result<RecreateOutcome> {
        unsafe {
            self.swapchain
                .recreate(self.gpu, self.render_pass, self.framebuffer_size)
        }
    }
}

/// Recording state handed to the client inside the render pass.
///
/// Viewport and scissor are already set to the swapchain extent.
pub struct FrameContext<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
    image_index: u32,
    frame_slot: usize,
    extent: vk::Extent2D,
    bound: BoundPipeline,
}

impl FrameContext<'_> {
    pub fn device(&self) -> &ash::Device {
        self.device
    }

    /// Command buffer being recorded, for commands not wrapped here.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Swapchain image being rendered.
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Frame slot in use; index per-frame resources with this.
    pub fn frame_slot(&self) -> usize {
        self.frame_slot
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Bind a pipeline unless it is already bound this frame.
    pub fn bind_pipeline(&mut self, pipeline: &GraphicsPipeline) {
        if self.bound.bind(pipeline.pipeline) {
            unsafe {
                self.device.cmd_bind_pipeline(
                    self.command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.pipeline,
                );
            }
        }
    }

    /// Bind descriptor sets starting at set 0.
    pub fn bind_descriptor_sets(&self, pipeline: &GraphicsPipeline, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                0,
                sets,
                &[],
            );
        }
    }

    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        pipeline: &GraphicsPipeline,
        stages: vk::ShaderStageFlags,
        value: &T,
    ) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                pipeline.layout,
                stages,
                0,
                bytemuck::bytes_of(value),
            );
        }
    }

    pub fn bind_vertex_buffer(&self, buffer: &GpuBuffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, 0, &[buffer.buffer], &[0]);
        }
    }

    pub fn bind_index_buffer(&self, buffer: &GpuBuffer, index_type: vk::IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer.buffer, 0, index_type);
        }
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .cmd_draw(self.command_buffer, vertex_count, instance_count, 0, 0);
        }
    }

    pub fn draw_indexed(&self, index_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .cmd_draw_indexed(self.command_buffer, index_count, instance_count, 0, 0, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_wait_covers_color_and_depth() {
        assert!(IMAGE_WAIT_STAGES.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(IMAGE_WAIT_STAGES.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(!IMAGE_WAIT_STAGES.contains(vk::PipelineStageFlags::VERTEX_SHADER));
    }
}

//! Graphics pipeline creation.

use crate::error::{GpuError, Result};
use crate::mesh::Vertex;
use crate::render_pass::RenderPass;
use ash::vk;
use std::path::Path;

/// Minimum fraction of samples shaded when sample-rate shading is on.
pub const MIN_SAMPLE_SHADING: f32 = 0.2;

/// Graphics pipeline configuration.
#[derive(Clone)]
pub struct GraphicsPipelineConfig {
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    /// Shade at sample rate when the render pass is multisampled.
    pub sample_shading: bool,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            vertex_shader: Vec::new(),
            fragment_shader: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            sample_shading: false,
        }
    }
}

impl GraphicsPipelineConfig {
    /// Config with the given shaders and defaults for everything else.
    pub fn with_shaders(vertex_shader: Vec<u32>, fragment_shader: Vec<u32>) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            ..Self::default()
        }
    }

    /// Use the vertex input layout of `V`.
    pub fn with_vertex<V: Vertex>(mut self) -> Self {
        self.vertex_bindings = vec![V::binding_description()];
        self.vertex_attributes = V::attribute_descriptions();
        self
    }

    /// Minimum sample shading for a pass with `samples`, if enabled.
    pub fn min_sample_shading(&self, samples: vk::SampleCountFlags) -> Option<f32> {
        (self.sample_shading && samples != vk::SampleCountFlags::TYPE_1)
            .then_some(MIN_SAMPLE_SHADING)
    }
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create a graphics pipeline for subpass 0 of `render_pass`.
    ///
    /// Rasterization samples follow the render pass. Viewport and scissor
    /// are dynamic.
    ///
    /// # Safety
    /// The device must be valid and shader code must be valid SPIR-V.
    pub unsafe fn new(
        device: &ash::Device,
        config: &GraphicsPipelineConfig,
        render_pass: &RenderPass,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let vert_module = create_shader_module(device, &config.vertex_shader)
            .map_err(|e| GpuError::PipelineCreation(format!("Vertex: {e}")))?;
        let frag_module = match create_shader_module(device, &config.fragment_shader) {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(vert_module, None);
                return Err(GpuError::PipelineCreation(format!("Fragment: {e}")));
            }
        };

        let result = build_pipeline(
            device,
            config,
            render_pass,
            vert_module,
            frag_module,
            descriptor_set_layouts,
            push_constant_ranges,
        );

        device.destroy_shader_module(vert_module, None);
        device.destroy_shader_module(frag_module, None);

        result
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    Ok(device.create_shader_module(&create_info, None)?)
}

unsafe fn build_pipeline(
    device: &ash::Device,
    config: &GraphicsPipelineConfig,
    render_pass: &RenderPass,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
    descriptor_set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<GraphicsPipeline> {
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(c"main"),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&config.vertex_bindings)
        .vertex_attribute_descriptions(&config.vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(config.topology)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(config.polygon_mode)
        .cull_mode(config.cull_mode)
        .front_face(config.front_face)
        .depth_bias_enable(false)
        .line_width(1.0);

    let samples = render_pass.attachments.samples;
    let mut multisampling =
        vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(samples);
    multisampling = match config.min_sample_shading(samples) {
        Some(min) => multisampling
            .sample_shading_enable(true)
            .min_sample_shading(min),
        None => multisampling.sample_shading_enable(false),
    };

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(config.depth_test)
        .depth_write_enable(config.depth_write)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(descriptor_set_layouts)
        .push_constant_ranges(push_constant_ranges);
    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass.render_pass)
        .subpass(0);

    let pipelines =
        match device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) {
            Ok(pipelines) => pipelines,
            Err((_pipelines, e)) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(GpuError::PipelineCreation(e.to_string()));
            }
        };

    Ok(GraphicsPipeline {
        pipeline: pipelines[0],
        layout,
    })
}

/// Read a SPIR-V binary into words.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path)
        .map_err(|e| GpuError::ShaderLoad(format!("{}: {e}", path.display())))?;
    ash::util::read_spv(&mut file)
        .map_err(|e| GpuError::ShaderLoad(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn temp_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tessera-{}-{name}", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn load_spirv_reads_words() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 7];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let path = temp_file("ok.spv", &bytes);

        let loaded = load_spirv(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, words);
    }

    #[test]
    fn load_spirv_rejects_truncated_file() {
        let path = temp_file("short.spv", &[0x03, 0x02, 0x23, 0x07, 0x00]);
        let result = load_spirv(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(GpuError::ShaderLoad(_))));
    }

    #[test]
    fn load_spirv_missing_file() {
        let result = load_spirv("/nonexistent/shader.spv");
        assert!(matches!(result, Err(GpuError::ShaderLoad(msg)) if msg.contains("shader.spv")));
    }

    #[test]
    fn sample_shading_needs_multisampling() {
        let mut config = GraphicsPipelineConfig::default();
        assert_eq!(config.min_sample_shading(vk::SampleCountFlags::TYPE_4), None);

        config.sample_shading = true;
        assert_eq!(
            config.min_sample_shading(vk::SampleCountFlags::TYPE_4),
            Some(MIN_SAMPLE_SHADING)
        );
        assert_eq!(config.min_sample_shading(vk::SampleCountFlags::TYPE_1), None);
    }

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Position([f32; 3]);

    impl Vertex for Position {
        fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
            vec![vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            }]
        }
    }

    #[test]
    fn with_vertex_sets_input_layout() {
        let config = GraphicsPipelineConfig::default().with_vertex::<Position>();
        assert_eq!(config.vertex_bindings.len(), 1);
        assert_eq!(config.vertex_bindings[0].stride, 12);
        assert_eq!(config.vertex_attributes.len(), 1);
        assert_eq!(config.vertex_attributes[0].format, vk::Format::R32G32B32_SFLOAT);
    }
}


//! Viewer application implementation.

use std::path::PathBuf;
use std::sync::OnceLock;

use ash::vk;
use tessera_app::{Context, FrameContext, Key, KeyEvent, NamedKey, TesseraApp};
use tessera_gpu::descriptors::{create_set_layout, write_frame_sets};
use tessera_gpu::image::{create_image_view, create_sampler};
use tessera_gpu::transfer::{mip_level_count, upload_image};
use tessera_gpu::{
    load_spirv, DescriptorPool, DescriptorWriter, GpuImage, GraphicsPipeline,
    GraphicsPipelineConfig, Mesh, ModelKind, PerFrameUniforms, TexturedWrites, Vertex,
};
use tracing::info;
use winit::event::ElementState;

/// Texture edge length in pixels.
const TEXTURE_SIZE: u32 = 256;

/// Checker cell size in pixels.
const CHECKER_CELL: u32 = 32;

/// Shaders for both passes, set from the command line.
pub static SHADERS: OnceLock<ViewerShaders> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

/// Each pass is drawn only when its shaders were given.
#[derive(Debug, Clone, Default)]
pub struct ViewerShaders {
    pub textured: Option<ShaderPaths>,
    pub geometric: Option<ShaderPaths>,
}

/// Uniform block read by the vertex shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ViewerUniforms {
    time: f32,
    aspect: f32,
    _pad: [f32; 2],
}

impl ViewerUniforms {
    fn new(time: f32, extent: vk::Extent2D) -> Self {
        Self {
            time,
            aspect: extent.width as f32 / extent.height.max(1) as f32,
            _pad: [0.0; 2],
        }
    }
}

/// Position in clip space and a per-vertex colour.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ColoredVertex {
    position: [f32; 2],
    color: [f32; 3],
}

impl Vertex for ColoredVertex {
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(ColoredVertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(ColoredVertex, color) as u32,
            },
        ]
    }
}

/// Centered quad with one colour per corner, as two triangles.
fn quad(half_extent: f32) -> ([ColoredVertex; 4], [u32; 6]) {
    let h = half_extent;
    let vertices = [
        ColoredVertex {
            position: [-h, -h],
            color: [1.0, 0.3, 0.2],
        },
        ColoredVertex {
            position: [h, -h],
            color: [0.2, 1.0, 0.3],
        },
        ColoredVertex {
            position: [h, h],
            color: [0.2, 0.3, 1.0],
        },
        ColoredVertex {
            position: [-h, h],
            color: [1.0, 1.0, 0.3],
        },
    ];
    (vertices, [0, 1, 2, 2, 3, 0])
}

/// Per-frame descriptor sets for `writer`'s model kind.
///
/// # Safety
/// The device must be valid and the writer's resources alive.
unsafe fn frame_descriptor_sets(
    device: &ash::Device,
    writer: &dyn DescriptorWriter,
    frames: usize,
) -> anyhow::Result<(vk::DescriptorSetLayout, DescriptorPool, Vec<vk::DescriptorSet>)> {
    let bindings = writer.model_kind().bindings();
    let set_layout = create_set_layout(device, &bindings)?;
    let pool = match DescriptorPool::for_frames(device, &bindings, frames as u32) {
        Ok(pool) => pool,
        Err(e) => {
            device.destroy_descriptor_set_layout(set_layout, None);
            return Err(e.into());
        }
    };
    match pool.allocate_per_frame(device, set_layout, frames) {
        Ok(sets) => {
            write_frame_sets(device, writer, &sets);
            Ok((set_layout, pool, sets))
        }
        Err(e) => {
            pool.destroy(device);
            device.destroy_descriptor_set_layout(set_layout, None);
            Err(e.into())
        }
    }
}

/// Rotating vertex-coloured quad drawn from vertex and index buffers.
struct GeometricPass {
    pipeline: GraphicsPipeline,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    uniforms: PerFrameUniforms<ViewerUniforms>,
    mesh: Mesh,
}

impl GeometricPass {
    fn new(ctx: &Context, paths: &ShaderPaths) -> anyhow::Result<Self> {
        let gpu = ctx.gpu();
        let device = gpu.device();
        let frames = ctx.frames_in_flight();

        let mut config =
            GraphicsPipelineConfig::with_shaders(load_spirv(&paths.vertex)?, load_spirv(&paths.fragment)?)
                .with_vertex::<ColoredVertex>();
        config.cull_mode = vk::CullModeFlags::NONE;
        config.depth_test = false;
        config.depth_write = false;

        let (vertices, indices) = quad(0.5);
        let mesh = Mesh::upload(gpu, ctx.command_pool(), &vertices, &indices, "viewer-quad")?;
        let uniforms = PerFrameUniforms::new(gpu.allocator(), frames, "viewer-quad-uniforms")?;
        let writes = uniforms.descriptor_writes();
        debug_assert_eq!(writes.model_kind(), ModelKind::Geometric);

        // SAFETY: All handles come from this context; nothing is in flight yet.
        unsafe {
            let (set_layout, descriptor_pool, descriptor_sets) =
                frame_descriptor_sets(device, &writes, frames)?;
            let pipeline =
                match GraphicsPipeline::new(device, &config, ctx.render_pass(), &[set_layout], &[]) {
                    Ok(pipeline) => pipeline,
                    Err(e) => {
                        descriptor_pool.destroy(device);
                        device.destroy_descriptor_set_layout(set_layout, None);
                        return Err(e.into());
                    }
                };

            info!(indices = mesh.index_count, "Geometric pass ready");

            Ok(Self {
                pipeline,
                set_layout,
                descriptor_pool,
                descriptor_sets,
                uniforms,
                mesh,
            })
        }
    }

    fn record(&self, frame: &mut FrameContext<'_>, time: f32) -> anyhow::Result<()> {
        let slot = frame.frame_slot();
        self.uniforms
            .write(slot, &ViewerUniforms::new(time, frame.extent()))?;

        frame.bind_pipeline(&self.pipeline);
        frame.bind_descriptor_sets(&self.pipeline, &self.descriptor_sets[slot..=slot]);
        self.mesh.draw(frame);
        Ok(())
    }

    fn destroy(self, device: &ash::Device) {
        // SAFETY: Called with the device idle.
        unsafe {
            self.pipeline.destroy(device);
            self.descriptor_pool.destroy(device);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
        drop(self.mesh);
        drop(self.uniforms);
    }
}

/// Full-screen triangle sampling a mipmapped checker texture.
struct TexturedPass {
    pipeline: GraphicsPipeline,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    uniforms: PerFrameUniforms<ViewerUniforms>,
    sampler: vk::Sampler,
    texture_view: vk::ImageView,
    texture: GpuImage,
}

impl TexturedPass {
    fn new(ctx: &Context, paths: &ShaderPaths) -> anyhow::Result<Self> {
        let gpu = ctx.gpu();
        let device = gpu.device();
        let frames = ctx.frames_in_flight();

        let mut config =
            GraphicsPipelineConfig::with_shaders(load_spirv(&paths.vertex)?, load_spirv(&paths.fragment)?);
        config.cull_mode = vk::CullModeFlags::NONE;
        config.depth_test = false;
        config.depth_write = false;
        config.sample_shading = gpu.profile().sample_rate_shading;

        let levels = mip_level_count(TEXTURE_SIZE, TEXTURE_SIZE);
        let texture = upload_image(
            gpu,
            ctx.command_pool(),
            &checkerboard(TEXTURE_SIZE, CHECKER_CELL),
            TEXTURE_SIZE,
            TEXTURE_SIZE,
            vk::Format::R8G8B8A8_SRGB,
            levels,
            "viewer-checker",
        )?;
        let uniforms = PerFrameUniforms::new(gpu.allocator(), frames, "viewer-uniforms")?;

        // SAFETY: All handles come from this context; nothing is in flight yet.
        unsafe {
            let texture_view = create_image_view(
                device,
                texture.image,
                texture.format,
                vk::ImageAspectFlags::COLOR,
                levels,
            )?;
            let sampler = match create_sampler(device, levels, gpu.profile().max_sampler_anisotropy) {
                Ok(sampler) => sampler,
                Err(e) => {
                    device.destroy_image_view(texture_view, None);
                    return Err(e.into());
                }
            };
            let destroy_sampling = || {
                device.destroy_sampler(sampler, None);
                device.destroy_image_view(texture_view, None);
            };

            let writes = TexturedWrites {
                uniforms: uniforms.descriptor_writes(),
                image_view: texture_view,
                sampler,
            };
            debug_assert_eq!(writes.model_kind(), ModelKind::Textured);
            let (set_layout, descriptor_pool, descriptor_sets) =
                match frame_descriptor_sets(device, &writes, frames) {
                    Ok(sets) => sets,
                    Err(e) => {
                        destroy_sampling();
                        return Err(e);
                    }
                };

            let pipeline =
                match GraphicsPipeline::new(device, &config, ctx.render_pass(), &[set_layout], &[]) {
                    Ok(pipeline) => pipeline,
                    Err(e) => {
                        descriptor_pool.destroy(device);
                        device.destroy_descriptor_set_layout(set_layout, None);
                        destroy_sampling();
                        return Err(e.into());
                    }
                };

            info!(levels, frames, "Textured pass ready");

            Ok(Self {
                pipeline,
                set_layout,
                descriptor_pool,
                descriptor_sets,
                uniforms,
                sampler,
                texture_view,
                texture,
            })
        }
    }

    fn record(&self, frame: &mut FrameContext<'_>, time: f32) -> anyhow::Result<()> {
        let extent = frame.extent();
        let slot = frame.frame_slot();

        // The slot's fence has been waited on, so its buffer is free to write.
        self.uniforms.write(slot, &ViewerUniforms::new(time, extent))?;

        frame.bind_pipeline(&self.pipeline);
        frame.bind_descriptor_sets(&self.pipeline, &self.descriptor_sets[slot..=slot]);
        frame.draw(3, 1);
        Ok(())
    }

    fn destroy(self, device: &ash::Device) {
        // SAFETY: Called with the device idle.
        unsafe {
            self.pipeline.destroy(device);
            self.descriptor_pool.destroy(device);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_sampler(self.sampler, None);
            device.destroy_image_view(self.texture_view, None);
        }
        drop(self.texture);
        drop(self.uniforms);
    }
}

/// Viewer application state.
pub struct Viewer {
    textured: Option<TexturedPass>,
    geometric: Option<GeometricPass>,
    time: f32,
}

impl TesseraApp for Viewer {
    fn init(ctx: &mut Context) -> anyhow::Result<Self> {
        let shaders = SHADERS.get().cloned().unwrap_or_default();
        let textured = shaders
            .textured
            .as_ref()
            .map(|paths| TexturedPass::new(ctx, paths))
            .transpose()?;
        let geometric = match shaders.geometric.as_ref().map(|paths| GeometricPass::new(ctx, paths)) {
            Some(Ok(pass)) => Some(pass),
            Some(Err(e)) => {
                if let Some(pass) = textured {
                    ctx.wait_idle()?;
                    pass.destroy(ctx.gpu().device());
                }
                return Err(e);
            }
            None => None,
        };
        if textured.is_none() && geometric.is_none() {
            info!("No shaders given, clearing only");
        }

        info!("Press V to toggle vsync, Escape to quit");

        Ok(Self {
            textured,
            geometric,
            time: 0.0,
        })
    }

    fn update(&mut self, _ctx: &mut Context, dt: f32) {
        self.time += dt;
    }

    fn render(&mut self, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        if let Some(pass) = &self.textured {
            pass.record(frame, self.time)?;
        }
        if let Some(pass) = &self.geometric {
            pass.record(frame, self.time)?;
        }
        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut Context, width: u32, height: u32) -> anyhow::Result<()> {
        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn on_key(&mut self, ctx: &mut Context, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }

        match &event.logical_key {
            Key::Named(NamedKey::Escape) => ctx.request_exit(),
            Key::Character(c) if c.eq_ignore_ascii_case("v") => {
                let vsync = !ctx.vsync();
                ctx.set_vsync(vsync);
            }
            _ => {}
        }
    }

    fn cleanup(&mut self, ctx: &mut Context) {
        let device = ctx.gpu().device();
        if let Some(pass) = self.geometric.take() {
            pass.destroy(device);
        }
        if let Some(pass) = self.textured.take() {
            pass.destroy(device);
        }
    }
}

/// RGBA checkerboard of `size` x `size` pixels.
fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let value = if ((x / cell) + (y / cell)) % 2 == 0 { 230 } else { 25 };
            [value, value, value, 255]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_size_and_corners() {
        let pixels = checkerboard(64, 32);
        assert_eq!(pixels.len(), 64 * 64 * 4);
        assert_eq!(pixels[0], 230);
        // Last pixel is in cell (1, 1), same parity as the origin.
        assert_eq!(pixels[pixels.len() - 4], 230);
        // First pixel of cell (1, 0)
        assert_eq!(pixels[32 * 4], 25);
    }

    #[test]
    fn uniforms_are_std140_sized() {
        assert_eq!(std::mem::size_of::<ViewerUniforms>(), 16);
    }

    #[test]
    fn uniform_aspect_guards_zero_height() {
        let uniforms = ViewerUniforms::new(1.0, vk::Extent2D { width: 800, height: 0 });
        assert!(uniforms.aspect.is_finite());
        let uniforms = ViewerUniforms::new(1.0, vk::Extent2D { width: 800, height: 400 });
        assert_eq!(uniforms.aspect, 2.0);
    }

    #[test]
    fn quad_indices_cover_two_triangles() {
        let (vertices, indices) = quad(0.5);
        let layout = tessera_gpu::MeshLayout::new(&vertices, &indices).unwrap();
        assert_eq!(layout.index_count, 6);
        assert_eq!(layout.vertex_bytes, 4 * 20);
        assert_eq!(layout.index_bytes, 6 * 4);
        assert!(vertices.iter().all(|v| v.position.iter().all(|c| c.abs() == 0.5)));
    }

    #[test]
    fn colored_vertex_layout_matches_struct() {
        let binding = ColoredVertex::binding_description();
        assert_eq!(binding.stride, 20);
        let attributes = ColoredVertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 8);
        assert_eq!(attributes[1].location, 1);
    }
}

//! Graphics and compute pipelines built from materials
//!
//! A graphics pipeline combines a material's stages and descriptor set layout
//! with one subpass of a render pass and a [`PipelineState`]. Viewport and
//! scissor are dynamic. A compute pipeline only needs a compute material.

use ash::{vk, Device};
use bitflags::bitflags;

use crate::render::backends::vulkan::rendering::commands::{ActiveRenderPass, CommandRecorder};
use crate::render::backends::vulkan::rendering::vertex_layout::VertexLayout;
use crate::render::backends::vulkan::resources::material::{Material, MaterialKind};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

bitflags! {
    /// Color channels a blend attachment writes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WriteChannels: u32 {
        /// Red
        const R = 0b0001;
        /// Green
        const G = 0b0010;
        /// Blue
        const B = 0b0100;
        /// Alpha
        const A = 0b1000;
        /// Red, green and blue
        const RGB = Self::R.bits() | Self::G.bits() | Self::B.bits();
        /// All four channels
        const RGBA = Self::RGB.bits() | Self::A.bits();
    }
}

impl WriteChannels {
    /// Vulkan color write mask
    pub fn to_vk(self) -> vk::ColorComponentFlags {
        let mut mask = vk::ColorComponentFlags::empty();
        for (channel, flag) in [
            (Self::R, vk::ColorComponentFlags::R),
            (Self::G, vk::ColorComponentFlags::G),
            (Self::B, vk::ColorComponentFlags::B),
            (Self::A, vk::ColorComponentFlags::A),
        ] {
            if self.contains(channel) {
                mask |= flag;
            }
        }
        mask
    }
}

/// Blend state of one color attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendAttachment {
    /// Channels written
    pub channels: WriteChannels,
    /// Alpha blending on or off
    pub enabled: bool,
}

impl Default for BlendAttachment {
    fn default() -> Self {
        Self {
            channels: WriteChannels::RGBA,
            enabled: false,
        }
    }
}

impl BlendAttachment {
    fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(self.channels.to_vk())
            .blend_enable(self.enabled)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    }
}

/// Where a pipeline's vertices come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VertexInput {
    /// Mesh vertex buffers in the engine's vertex format
    #[default]
    Mesh,
    /// No vertex buffers; the vertex shader generates positions
    Generated,
}

/// Fixed-function state of a graphics pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Depth test on or off
    pub depth_test: bool,
    /// Depth writes on or off
    pub depth_write: bool,
    /// Per color attachment blending, missing entries use the default
    pub blend: Vec<BlendAttachment>,
    /// Vertex source
    pub vertex_input: VertexInput,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            blend: Vec::new(),
            vertex_input: VertexInput::Mesh,
        }
    }
}

impl PipelineState {
    /// State for a fullscreen pass: no culling, no depth, generated vertices
    pub fn fullscreen() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: false,
            depth_write: false,
            vertex_input: VertexInput::Generated,
            ..Self::default()
        }
    }

    /// Set the blend state of color attachment `index`
    pub fn with_blend(mut self, index: usize, channels: WriteChannels, enabled: bool) -> Self {
        if self.blend.len() <= index {
            self.blend.resize(index + 1, BlendAttachment::default());
        }
        self.blend[index] = BlendAttachment { channels, enabled };
        self
    }

    /// Set the cull mode
    pub fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Blend states for exactly `color_count` attachments
    pub fn blend_attachments(&self, color_count: usize) -> Vec<vk::PipelineColorBlendAttachmentState> {
        (0..color_count)
            .map(|i| self.blend.get(i).copied().unwrap_or_default().to_vk())
            .collect()
    }
}

/// Where a graphics pipeline plugs into a render pass
#[derive(Debug, Clone, Copy)]
pub struct SubpassTarget {
    /// Render pass handle
    pub render_pass: vk::RenderPass,
    /// Subpass index
    pub subpass: u32,
    /// Color attachments the subpass writes
    pub color_count: usize,
    /// Rasterization sample count
    pub samples: vk::SampleCountFlags,
}

/// Something that records its own draw calls
pub trait Drawable {
    /// Bind vertex and index buffers and draw
    fn draw(&self, pass: &mut ActiveRenderPass<'_>);
}

/// Draws a single triangle covering the screen; positions come from `gl_VertexIndex`
#[derive(Debug, Clone, Copy, Default)]
pub struct FullscreenTriangle;

impl Drawable for FullscreenTriangle {
    fn draw(&self, pass: &mut ActiveRenderPass<'_>) {
        pass.cmd_draw(3, 1, 0, 0);
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create a graphics pipeline for one subpass
    ///
    /// The material must have been committed so its descriptor set layout exists.
    pub fn new(
        device: &Device,
        material: &Material,
        target: SubpassTarget,
        state: &PipelineState,
    ) -> VulkanResult<Self> {
        if material.kind() != MaterialKind::Visual {
            return Err(VulkanError::InvalidOperation {
                reason: format!("material '{}' is not a visual material", material.name()),
            });
        }
        if !material.is_committed() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("material '{}' must be committed before pipeline creation", material.name()),
            });
        }

        let shader_stages = material.stage_infos();

        let bindings = [VertexLayout::binding_description()];
        let attributes = VertexLayout::attribute_descriptions();
        let vertex_input_info = match state.vertex_input {
            VertexInput::Mesh => vk::PipelineVertexInputStateCreateInfo::builder()
                .vertex_binding_descriptions(&bindings)
                .vertex_attribute_descriptions(&attributes),
            VertexInput::Generated => vk::PipelineVertexInputStateCreateInfo::builder(),
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set while recording
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(state.cull_mode)
            .front_face(state.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(target.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(state.depth_test)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = state.blend_attachments(target.color_count);
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let set_layouts = [material.descriptor_set_layout()];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(target.render_pass)
            .subpass(target.subpass);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                log::error!("[PIPELINE] '{}' subpass {} failed: {:?}", material.name(), target.subpass, err);
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(err));
            }
        };

        log::debug!("[PIPELINE] Created graphics pipeline for '{}' subpass {}", material.name(), target.subpass);
        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Bind the pipeline and the material's descriptor set for object `object`
    pub fn bind(&self, pass: &mut ActiveRenderPass<'_>, material: &Material, object: usize) {
        pass.cmd_bind_pipeline(self.pipeline);
        self.bind_descriptors(pass, material, object);
    }

    /// Rebind only the descriptor set, with the dynamic offsets of `object`
    pub fn bind_descriptors(&self, pass: &mut ActiveRenderPass<'_>, material: &Material, object: usize) {
        let set = material.descriptor_set();
        if set != vk::DescriptorSet::null() {
            pass.cmd_bind_descriptor_sets(self.layout, &[set], &material.dynamic_offsets(object));
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        log::debug!("[PIPELINE] Dropping GraphicsPipeline {:?}", self.pipeline);
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Work groups of edge `group_size` needed to cover `extent` at mip `level`
///
/// `group_size` must match the `local_size` the compute shader declares.
///
/// # Panics
///
/// Panics if the level's extent is not a multiple of `group_size`.
pub fn dispatch_groups(extent: [u32; 3], level: u32, group_size: u32) -> [u32; 3] {
    extent.map(|dim| {
        let scaled = dim >> level;
        assert!(
            group_size > 0 && scaled > 0 && scaled % group_size == 0,
            "extent {:?} at level {} is not a multiple of the local group size {}",
            extent, level, group_size
        );
        scaled / group_size
    })
}

/// Compute pipeline wrapper with RAII cleanup
pub struct ComputePipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl ComputePipeline {
    /// Create a compute pipeline from a committed compute material
    pub fn new(device: &Device, material: &Material) -> VulkanResult<Self> {
        if material.kind() != MaterialKind::Compute || material.shaders().len() != 1 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("material '{}' needs exactly one compute stage", material.name()),
            });
        }
        if !material.is_committed() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("material '{}' must be committed before pipeline creation", material.name()),
            });
        }

        let set_layouts = [material.descriptor_set_layout()];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let stage = material.shaders()[0].stage_info();
        let pipeline_info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(layout);
        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                log::error!("[PIPELINE] compute '{}' failed: {:?}", material.name(), err);
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(err));
            }
        };

        log::debug!("[PIPELINE] Created compute pipeline for '{}'", material.name());
        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Bind and dispatch enough groups of `group_size` to cover `extent` at mip `level`
    pub fn dispatch(
        &self,
        recorder: &mut CommandRecorder,
        material: &Material,
        extent: [u32; 3],
        level: u32,
        group_size: u32,
    ) {
        let [x, y, z] = dispatch_groups(extent, level, group_size);
        recorder.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline);
        let set = material.descriptor_set();
        if set != vk::DescriptorSet::null() {
            recorder.cmd_bind_descriptor_sets(
                vk::PipelineBindPoint::COMPUTE,
                self.layout,
                &[set],
                &material.dynamic_offsets(0),
            );
        }
        recorder.cmd_dispatch(x, y, z);
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        log::debug!("[PIPELINE] Dropping ComputePipeline {:?}", self.pipeline);
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

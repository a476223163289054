//! Render passes built from attachment groups and subpasses
//!
//! A [`RenderPass`] turns an [`AttachmentGroup`] and a list of [`Subpass`]
//! declarations into a Vulkan render pass, one framebuffer per swap image and,
//! lazily, one graphics pipeline per subpass and material instance.
//!
//! The descriptive part lives in [`RenderPassLayout::describe`], which needs
//! no device:
//!
//! - attachments are described in group order with the depth attachment last,
//!   and only when some subpass enables depth
//! - load ops follow each attachment's clear flag, store ops its store flag
//! - every attachment starts UNDEFINED and ends in its resting layout; render
//!   targets of an off-screen pass end in SHADER_READ_ONLY_OPTIMAL so later
//!   passes can sample them
//! - `n` subpasses get `n + 1` dependencies: one from outside the pass into
//!   subpass 0, then one out of every subpass into the next or out of the pass
//!
//! Malformed declarations (depth read and written by one subpass, resolve
//! counts that differ from color counts, indices past the group) panic.
//!
//! Material instances are created per subpass from the [`MaterialStore`].
//! A pass recorded once per frame needs one instance per in-flight slot; a
//! pass recorded several times per frame with different parameters needs one
//! per recording.

use ash::{vk, Device};

use crate::render::backends::vulkan::rendering::commands::CommandRecorder;
use crate::render::backends::vulkan::rendering::pipeline::{
    Drawable, FullscreenTriangle, GraphicsPipeline, PipelineState, SubpassTarget, VertexInput,
};
use crate::render::backends::vulkan::resources::attachment_group::{AttachmentGroup, MAX_ATTACHMENTS};
use crate::render::backends::vulkan::resources::image::ImageKind;
use crate::render::backends::vulkan::resources::material::Material;
use crate::render::backends::vulkan::resources::material_store::MaterialStore;
use crate::render::backends::vulkan::{GpuDevice, VulkanError, VulkanResult};

/// Most subpasses one render pass may hold
pub const MAX_SUBPASSES: usize = 20;

/// An attachment read by a subpass through `subpassInput`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputAttachment {
    /// Attachment index in the group
    pub attachment: u32,
    /// Parameter name in the subpass material
    pub parameter: String,
    /// Descriptor binding in the fragment stage
    pub binding: u32,
}

/// One subpass: its material, the attachments it touches and its pipeline state
#[derive(Debug, Clone, PartialEq)]
pub struct Subpass {
    name: String,
    material: String,
    colors: Vec<u32>,
    inputs: Vec<InputAttachment>,
    resolves: Vec<u32>,
    depth_enable: bool,
    state: PipelineState,
}

impl Subpass {
    /// A subpass drawing with the named material
    pub fn new(name: impl Into<String>, material: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            material: material.into(),
            colors: Vec::new(),
            inputs: Vec::new(),
            resolves: Vec::new(),
            depth_enable: false,
            state: PipelineState::default(),
        }
    }

    /// Write to attachment `index`
    pub fn with_color(mut self, index: u32) -> Self {
        self.colors.push(index);
        self
    }

    /// Write to several attachments, in order
    pub fn with_colors(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.colors.extend(indices);
        self
    }

    /// Read attachment `index` as the input attachment `parameter` at `binding`
    pub fn with_input(mut self, parameter: &str, index: u32, binding: u32) -> Self {
        self.inputs.push(InputAttachment {
            attachment: index,
            parameter: parameter.to_string(),
            binding,
        });
        self
    }

    /// Resolve the next color attachment into attachment `index`
    pub fn with_resolve(mut self, index: u32) -> Self {
        self.resolves.push(index);
        self
    }

    /// Test and write the group's depth attachment
    pub fn with_depth(mut self, enable: bool) -> Self {
        self.depth_enable = enable;
        self
    }

    /// Fixed-function state of the subpass pipeline
    pub fn with_state(mut self, state: PipelineState) -> Self {
        self.state = state;
        self
    }

    /// Subpass name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Material name
    pub fn material(&self) -> &str {
        &self.material
    }

    /// Color attachment indices
    pub fn colors(&self) -> &[u32] {
        &self.colors
    }

    /// Input attachments
    pub fn inputs(&self) -> &[InputAttachment] {
        &self.inputs
    }

    /// Whether depth is enabled
    pub fn depth_enabled(&self) -> bool {
        self.depth_enable
    }

    /// Pipeline state
    pub fn state(&self) -> &PipelineState {
        &self.state
    }
}

/// Attachment references of one subpass
#[derive(Debug, Clone, Default)]
pub struct SubpassReferences {
    /// Color references
    pub colors: Vec<vk::AttachmentReference>,
    /// Input references
    pub inputs: Vec<vk::AttachmentReference>,
    /// Resolve references, empty or one per color reference
    pub resolves: Vec<vk::AttachmentReference>,
    /// Depth reference when depth is enabled
    pub depth: Option<vk::AttachmentReference>,
}

/// Everything needed to create a render pass, derived without a device
#[derive(Debug, Clone)]
pub struct RenderPassLayout {
    /// One description per attachment in group order
    pub attachments: Vec<vk::AttachmentDescription>,
    /// References per subpass
    pub subpasses: Vec<SubpassReferences>,
    /// Subpass dependencies, one more than there are subpasses
    pub dependencies: Vec<vk::SubpassDependency>,
    /// Whether the depth attachment takes part in the pass
    pub uses_depth: bool,
    /// Rasterization samples of the pass
    pub samples: vk::SampleCountFlags,
}

fn reference(attachment: u32, layout: vk::ImageLayout) -> vk::AttachmentReference {
    vk::AttachmentReference { attachment, layout }
}

fn load_op(clear: bool) -> vk::AttachmentLoadOp {
    if clear {
        vk::AttachmentLoadOp::CLEAR
    } else {
        vk::AttachmentLoadOp::DONT_CARE
    }
}

fn store_op(store: bool) -> vk::AttachmentStoreOp {
    if store {
        vk::AttachmentStoreOp::STORE
    } else {
        vk::AttachmentStoreOp::DONT_CARE
    }
}

impl RenderPassLayout {
    /// Describe attachments, subpass references and dependencies
    ///
    /// `max_samples` is used for multisampled attachments.
    ///
    /// # Panics
    ///
    /// Panics on an empty group, a subpass count outside `1..=MAX_SUBPASSES`,
    /// or a malformed subpass.
    pub fn describe(
        group: &AttachmentGroup,
        subpasses: &[Subpass],
        off_screen: bool,
        max_samples: vk::SampleCountFlags,
    ) -> Self {
        assert!(!group.is_empty(), "a render pass needs at least one attachment");
        assert!(group.len() <= MAX_ATTACHMENTS, "{} attachments exceed the limit", group.len());
        assert!(
            !subpasses.is_empty() && subpasses.len() <= MAX_SUBPASSES,
            "a render pass needs 1 to {} subpasses, got {}",
            MAX_SUBPASSES,
            subpasses.len()
        );

        let uses_depth = subpasses.iter().any(Subpass::depth_enabled);
        let depth_index = group.depth_index();
        let multisampled = group.any_multisampled();
        let samples = if multisampled { max_samples } else { vk::SampleCountFlags::TYPE_1 };

        let mut attachments = Vec::with_capacity(group.len());
        for attachment in group.iter() {
            let image = attachment.image();
            let description = if attachment.is_depth() {
                if !uses_depth {
                    continue;
                }
                vk::AttachmentDescription::builder()
                    .format(image.format)
                    .samples(samples)
                    .load_op(load_op(attachment.should_clear()))
                    .store_op(store_op(attachment.should_store()))
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(image.resting_layout)
                    .build()
            } else {
                let final_layout = if off_screen && image.kind == ImageKind::RenderTarget {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                } else {
                    image.resting_layout
                };
                let attachment_samples = if attachment.is_multisampled() {
                    max_samples
                } else {
                    vk::SampleCountFlags::TYPE_1
                };
                vk::AttachmentDescription::builder()
                    .format(image.format)
                    .samples(attachment_samples)
                    .load_op(load_op(attachment.should_clear()))
                    .store_op(store_op(attachment.should_store()))
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(final_layout)
                    .build()
            };
            attachments.push(description);
        }

        let references = subpasses
            .iter()
            .map(|subpass| Self::subpass_references(group, subpass, depth_index))
            .collect();

        Self {
            attachments,
            subpasses: references,
            dependencies: Self::dependencies(subpasses.len()),
            uses_depth,
            samples,
        }
    }

    fn subpass_references(group: &AttachmentGroup, subpass: &Subpass, depth_index: Option<u32>) -> SubpassReferences {
        let name = subpass.name();
        let check = |index: u32, what: &str| {
            assert!(
                (index as usize) < group.len(),
                "subpass '{}' {} attachment {} is out of range, group holds {}",
                name, what, index, group.len()
            );
        };

        for &index in &subpass.colors {
            check(index, "color");
            assert!(Some(index) != depth_index, "subpass '{}' uses the depth attachment as a color attachment", name);
        }
        for &index in &subpass.resolves {
            check(index, "resolve");
            assert!(Some(index) != depth_index, "subpass '{}' cannot resolve into the depth attachment", name);
        }
        assert!(
            subpass.resolves.is_empty() || subpass.resolves.len() == subpass.colors.len(),
            "subpass '{}' has {} color references but {} resolve references",
            name,
            subpass.colors.len(),
            subpass.resolves.len()
        );

        let mut inputs = Vec::with_capacity(subpass.inputs.len());
        for input in &subpass.inputs {
            check(input.attachment, "input");
            let is_depth = Some(input.attachment) == depth_index;
            assert!(
                !(is_depth && subpass.depth_enable),
                "subpass '{}' cannot read depth as an input while writing it",
                name
            );
            let layout = if is_depth {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            };
            inputs.push(reference(input.attachment, layout));
        }

        let depth = if subpass.depth_enable {
            let index = depth_index
                .unwrap_or_else(|| panic!("subpass '{}' enables depth but the group has no depth attachment", name));
            Some(reference(index, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL))
        } else {
            None
        };

        SubpassReferences {
            colors: subpass
                .colors
                .iter()
                .map(|&i| reference(i, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .collect(),
            inputs,
            resolves: subpass
                .resolves
                .iter()
                .map(|&i| reference(i, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .collect(),
            depth,
        }
    }

    /// Dependencies for `count` subpasses
    pub fn dependencies(count: usize) -> Vec<vk::SubpassDependency> {
        let mut dependencies = Vec::with_capacity(count + 1);
        dependencies.push(
            vk::SubpassDependency::builder()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::MEMORY_READ)
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dependency_flags(vk::DependencyFlags::BY_REGION)
                .build(),
        );

        for i in 0..count as u32 {
            let last = i as usize + 1 == count;
            let dependency = if last {
                vk::SubpassDependency::builder()
                    .src_subpass(i)
                    .dst_subpass(vk::SUBPASS_EXTERNAL)
                    .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                    .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ)
            } else {
                vk::SubpassDependency::builder()
                    .src_subpass(i)
                    .dst_subpass(i + 1)
                    .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                    .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ)
            };
            dependencies.push(dependency.dependency_flags(vk::DependencyFlags::BY_REGION).build());
        }
        dependencies
    }

    /// Subpass descriptions pointing into this layout's reference arrays
    pub fn subpass_descriptions(&self) -> Vec<vk::SubpassDescription> {
        self.subpasses
            .iter()
            .map(|refs| {
                let mut description = vk::SubpassDescription::builder()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&refs.colors)
                    .input_attachments(&refs.inputs);
                if !refs.resolves.is_empty() {
                    description = description.resolve_attachments(&refs.resolves);
                }
                if let Some(depth) = refs.depth.as_ref() {
                    description = description.depth_stencil_attachment(depth);
                }
                description.build()
            })
            .collect()
    }
}

/// Views and layer count of the framebuffer for one swap image
///
/// # Panics
///
/// Panics if the attachments' layer counts disagree when more than one view
/// is bound.
pub fn framebuffer_views(group: &AttachmentGroup, uses_depth: bool, swap_index: usize) -> (Vec<vk::ImageView>, u32) {
    let views: Vec<vk::ImageView> = group
        .iter()
        .filter(|attachment| uses_depth || !attachment.is_depth())
        .map(|attachment| attachment.images().get(swap_index).view)
        .collect();

    let layers = if views.len() == 1 {
        group.iter().next().map_or(1, |attachment| attachment.image().layers)
    } else {
        1
    };
    (views, layers)
}

/// A render pass with its framebuffers, material instances and pipelines
pub struct RenderPass {
    device: Device,
    name: String,
    group: AttachmentGroup,
    subpasses: Vec<Subpass>,
    off_screen: bool,
    layout: RenderPassLayout,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    materials: Vec<Vec<Material>>,
    pipelines: Vec<Vec<Option<GraphicsPipeline>>>,
}

impl RenderPass {
    /// Create the render pass, its framebuffers and `instances` material instances per subpass
    pub fn new(
        gpu: &GpuDevice,
        store: &MaterialStore,
        name: impl Into<String>,
        group: AttachmentGroup,
        subpasses: Vec<Subpass>,
        off_screen: bool,
        instances: usize,
    ) -> VulkanResult<Self> {
        let name = name.into();
        assert!(instances > 0, "render pass '{}' needs at least one material instance", name);

        let layout = RenderPassLayout::describe(&group, &subpasses, off_screen, gpu.max_usable_sample_count());
        let device = gpu.device().clone();
        let (render_pass, framebuffers) = Self::create_objects(&device, &name, &group, &layout)?;

        let mut pass = Self {
            device,
            name,
            group,
            subpasses,
            off_screen,
            layout,
            render_pass,
            framebuffers,
            materials: Vec::new(),
            pipelines: Vec::new(),
        };

        for subpass in &pass.subpasses {
            pass.materials.push(store.create_materials(subpass.material(), instances)?);
            pass.pipelines.push((0..instances).map(|_| None).collect());
        }
        pass.bind_input_attachments();

        log::debug!(
            "Render pass '{}' created: {} attachments, {} subpasses, {} framebuffers",
            pass.name,
            pass.layout.attachments.len(),
            pass.subpasses.len(),
            pass.framebuffers.len()
        );
        Ok(pass)
    }

    fn create_objects(
        device: &Device,
        name: &str,
        group: &AttachmentGroup,
        layout: &RenderPassLayout,
    ) -> VulkanResult<(vk::RenderPass, Vec<vk::Framebuffer>)> {
        let subpass_descriptions = layout.subpass_descriptions();
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&layout.attachments)
            .subpasses(&subpass_descriptions)
            .dependencies(&layout.dependencies);

        let render_pass = unsafe {
            device.create_render_pass(&create_info, None).map_err(|e| {
                log::error!("Render pass '{}' creation failed: {:?}", name, e);
                VulkanError::Api(e)
            })?
        };

        let mut framebuffers = Vec::with_capacity(group.swap_count());
        for swap_index in 0..group.swap_count() {
            let (views, layers) = framebuffer_views(group, layout.uses_depth, swap_index);
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&views)
                .width(group.width())
                .height(group.height())
                .layers(layers);

            match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    log::error!("Framebuffer {} of render pass '{}' failed: {:?}", swap_index, name, e);
                    unsafe {
                        for framebuffer in framebuffers {
                            device.destroy_framebuffer(framebuffer, None);
                        }
                        device.destroy_render_pass(render_pass, None);
                    }
                    return Err(VulkanError::Api(e));
                }
            }
        }

        Ok((render_pass, framebuffers))
    }

    fn bind_input_attachments(&mut self) {
        for (subpass, materials) in self.subpasses.iter().zip(self.materials.iter_mut()) {
            for (instance, material) in materials.iter_mut().enumerate() {
                for input in subpass.inputs() {
                    if let Some(attachment) = self.group.get(input.attachment) {
                        let image = *attachment.images().get(instance);
                        material.add_input_attachment(&input.parameter, input.binding, &image);
                    }
                }
            }
        }
    }

    fn destroy_objects(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
    }

    /// Recreate the pass for a new attachment group
    ///
    /// Used when the swap image count or the attachment size changes. The GPU
    /// must be idle. Materials keep their parameters; pipelines are rebuilt by
    /// the next commit.
    pub fn rebuild(&mut self, gpu: &GpuDevice, group: AttachmentGroup) -> VulkanResult<()> {
        let layout = RenderPassLayout::describe(&group, &self.subpasses, self.off_screen, gpu.max_usable_sample_count());

        for pipelines in &mut self.pipelines {
            pipelines.iter_mut().for_each(|pipeline| *pipeline = None);
        }
        self.destroy_objects();

        let (render_pass, framebuffers) = Self::create_objects(&self.device, &self.name, &group, &layout)?;
        self.render_pass = render_pass;
        self.framebuffers = framebuffers;
        self.layout = layout;
        self.group = group;
        self.bind_input_attachments();

        log::debug!("Render pass '{}' rebuilt at {}x{}", self.name, self.group.width(), self.group.height());
        Ok(())
    }

    /// Render pass and framebuffer for a swap image
    pub fn handles(&self, swap_index: usize) -> (vk::RenderPass, vk::Framebuffer) {
        (self.render_pass, self.framebuffers[swap_index % self.framebuffers.len()])
    }

    /// Render pass name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attachment group
    pub fn attachment_group(&self) -> &AttachmentGroup {
        &self.group
    }

    /// Mutable attachment group, for clear values
    pub fn attachment_group_mut(&mut self) -> &mut AttachmentGroup {
        &mut self.group
    }

    /// Derived layout
    pub fn layout(&self) -> &RenderPassLayout {
        &self.layout
    }

    /// Number of subpasses
    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }

    /// Material of `subpass` for `instance`
    pub fn material(&self, subpass: usize, instance: usize) -> &Material {
        &self.materials[subpass][instance]
    }

    /// Mutable material of `subpass` for `instance`
    pub fn material_mut(&mut self, subpass: usize, instance: usize) -> &mut Material {
        &mut self.materials[subpass][instance]
    }

    /// Material instances of `subpass`
    pub fn materials_mut(&mut self, subpass: usize) -> &mut [Material] {
        &mut self.materials[subpass]
    }

    /// Commit every subpass material of `instance`, creating missing pipelines
    pub fn commit_parameters_to_gpu(&mut self, gpu: &GpuDevice, instance: usize) -> VulkanResult<()> {
        for (index, subpass) in self.subpasses.iter().enumerate() {
            let material = &mut self.materials[index][instance];
            material.commit_to_gpu(gpu)?;

            let slot = &mut self.pipelines[index][instance];
            if slot.is_none() {
                let target = SubpassTarget {
                    render_pass: self.render_pass,
                    subpass: index as u32,
                    color_count: subpass.colors().len(),
                    samples: self.layout.samples,
                };
                *slot = Some(GraphicsPipeline::new(&self.device, material, target, subpass.state())?);
            }
        }
        Ok(())
    }

    fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.group
            .iter()
            .filter(|attachment| self.layout.uses_depth || !attachment.is_depth())
            .map(|attachment| attachment.clear_value().to_vk())
            .collect()
    }

    /// Record the whole pass into `recorder`
    ///
    /// Subpasses with generated vertices draw one fullscreen triangle; the
    /// others draw every object, rebinding dynamic offsets per object.
    pub fn record(
        &self,
        recorder: &mut CommandRecorder,
        swap_index: usize,
        instance: usize,
        objects: &[&dyn Drawable],
    ) -> VulkanResult<()> {
        let (render_pass, framebuffer) = self.handles(swap_index);
        let clear_values = self.clear_values();
        let mut pass = recorder.begin_render_pass(render_pass, framebuffer, self.group.extent(), &clear_values)?;

        for (index, subpass) in self.subpasses.iter().enumerate() {
            if index > 0 {
                pass.next_subpass();
            }

            let material = &self.materials[index][instance];
            let pipeline = self.pipelines[index][instance].as_ref().ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!(
                    "render pass '{}' subpass '{}' was recorded before its parameters were committed",
                    self.name,
                    subpass.name()
                ),
            })?;

            pipeline.bind(&mut pass, material, 0);
            match subpass.state().vertex_input {
                VertexInput::Generated => FullscreenTriangle.draw(&mut pass),
                VertexInput::Mesh => {
                    let per_object = material.has_dynamic_bindings();
                    for (object_index, object) in objects.iter().enumerate() {
                        if per_object && object_index > 0 {
                            pipeline.bind_descriptors(&mut pass, material, object_index);
                        }
                        object.draw(&mut pass);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        log::debug!("Dropping render pass '{}'", self.name);
        self.destroy_objects();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use crate::render::backends::vulkan::resources::image::{ImageResource, ResourceSet};

    fn view(raw: u64) -> vk::ImageView {
        vk::ImageView::from_raw(raw)
    }

    fn target(raw: u64) -> ImageResource {
        ImageResource::new(ImageKind::RenderTarget, vk::Format::R16G16B16A16_SFLOAT, 64, 64).with_handles(
            vk::Image::null(),
            view(raw),
            vk::Sampler::null(),
        )
    }

    fn depth(raw: u64) -> ImageResource {
        ImageResource::new(ImageKind::Depth, vk::Format::D32_SFLOAT, 64, 64).with_handles(
            vk::Image::null(),
            view(raw),
            vk::Sampler::null(),
        )
    }

    fn color_depth_group() -> AttachmentGroup {
        let mut group = AttachmentGroup::new(64, 64);
        group.add_attachment("color", ResourceSet::new(vec![target(1), target(2), target(3)]), true, true);
        group.set_depth_attachment("depth", ResourceSet::shared(depth(10), 3), true, false);
        group
    }

    #[test]
    fn test_color_and_depth_descriptions() {
        let group = color_depth_group();
        let subpasses = vec![Subpass::new("mrt", "mrt").with_color(0).with_depth(true)];
        let layout = RenderPassLayout::describe(&group, &subpasses, true, vk::SampleCountFlags::TYPE_4);

        assert_eq!(layout.attachments.len(), 2);
        let color = &layout.attachments[0];
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(color.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(color.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(color.samples, vk::SampleCountFlags::TYPE_1);

        let depth = &layout.attachments[1];
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(depth.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);

        let refs = &layout.subpasses[0];
        assert_eq!(refs.colors.len(), 1);
        assert_eq!(refs.depth.map(|d| d.attachment), Some(1));
        assert_eq!(layout.samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_on_screen_keeps_resting_layout() {
        let group = color_depth_group();
        let subpasses = vec![Subpass::new("mrt", "mrt").with_color(0)];
        let layout = RenderPassLayout::describe(&group, &subpasses, false, vk::SampleCountFlags::TYPE_1);

        assert!(!layout.uses_depth);
        assert_eq!(layout.attachments.len(), 1);
        assert_eq!(layout.attachments[0].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_framebuffer_views_per_swap_image() {
        let group = color_depth_group();
        for swap_index in 0..3 {
            let (views, layers) = framebuffer_views(&group, true, swap_index);
            assert_eq!(views, vec![view(swap_index as u64 + 1), view(10)]);
            assert_eq!(layers, 1);
        }
        let (views, _) = framebuffer_views(&group, false, 0);
        assert_eq!(views.len(), 1);
    }

    #[test]
    fn test_single_view_uses_layer_count() {
        let cube = ImageResource::new(ImageKind::RenderTarget, vk::Format::R8G8B8A8_UNORM, 32, 32).with_layers(6);
        let mut group = AttachmentGroup::new(32, 32);
        group.add_attachment("faces", ResourceSet::shared(cube, 2), true, true);

        let (views, layers) = framebuffer_views(&group, false, 1);
        assert_eq!(views.len(), 1);
        assert_eq!(layers, 6);
    }

    #[test]
    fn test_dependency_chain() {
        let deps = RenderPassLayout::dependencies(2);
        assert_eq!(deps.len(), 3);

        assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[0].dst_subpass, 0);
        assert_eq!(deps[0].dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        assert_eq!((deps[1].src_subpass, deps[1].dst_subpass), (0, 1));
        assert_eq!(deps[1].dst_access_mask, vk::AccessFlags::SHADER_READ);
        assert_eq!(deps[1].dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);

        assert_eq!((deps[2].src_subpass, deps[2].dst_subpass), (1, vk::SUBPASS_EXTERNAL));
        assert_eq!(deps[2].dst_access_mask, vk::AccessFlags::MEMORY_READ);
        assert!(deps.iter().all(|d| d.dependency_flags == vk::DependencyFlags::BY_REGION));
    }

    #[test]
    fn test_input_attachment_references() {
        let mut group = AttachmentGroup::new(64, 64);
        group.add_attachment("albedo", ResourceSet::shared(target(1), 2), true, true);
        group.add_attachment("present", ResourceSet::shared(target(2), 2), true, true);
        let subpasses = vec![
            Subpass::new("gbuffer", "mrt").with_color(0),
            Subpass::new("composite", "deferred_output").with_color(1).with_input("albedo", 0, 1),
        ];
        let layout = RenderPassLayout::describe(&group, &subpasses, false, vk::SampleCountFlags::TYPE_1);

        assert_eq!(layout.subpasses[1].inputs.len(), 1);
        assert_eq!(layout.subpasses[1].inputs[0].layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(layout.dependencies.len(), 3);

        let descriptions = layout.subpass_descriptions();
        assert_eq!(descriptions.len(), 2);
        assert_eq!(descriptions[1].input_attachment_count, 1);
        assert!(descriptions[1].p_depth_stencil_attachment.is_null());
    }

    #[test]
    fn test_multisampled_attachment_uses_max_samples() {
        let mut group = AttachmentGroup::new(64, 64);
        group.add_attachment("msaa", ResourceSet::shared(target(1).with_multisampling(true), 1), true, false);
        group.add_attachment("resolved", ResourceSet::shared(target(2), 1), false, true);
        let subpasses = vec![Subpass::new("main", "mrt").with_color(0).with_resolve(1)];
        let layout = RenderPassLayout::describe(&group, &subpasses, true, vk::SampleCountFlags::TYPE_8);

        assert_eq!(layout.attachments[0].samples, vk::SampleCountFlags::TYPE_8);
        assert_eq!(layout.attachments[1].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(layout.samples, vk::SampleCountFlags::TYPE_8);
        assert_eq!(layout.subpass_descriptions()[0].p_resolve_attachments.is_null(), false);
    }

    #[test]
    #[should_panic(expected = "cannot read depth as an input while writing it")]
    fn test_depth_input_and_output_panics() {
        let group = color_depth_group();
        let subpasses = vec![Subpass::new("bad", "mrt").with_color(0).with_depth(true).with_input("depth", 1, 0)];
        RenderPassLayout::describe(&group, &subpasses, true, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    #[should_panic(expected = "resolve references")]
    fn test_resolve_count_mismatch_panics() {
        let mut group = AttachmentGroup::new(64, 64);
        group.add_attachment("a", ResourceSet::shared(target(1), 1), true, true);
        group.add_attachment("b", ResourceSet::shared(target(2), 1), true, true);
        group.add_attachment("c", ResourceSet::shared(target(3), 1), true, true);
        let subpasses = vec![Subpass::new("main", "mrt").with_colors([0, 1]).with_resolve(2)];
        RenderPassLayout::describe(&group, &subpasses, true, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    #[should_panic(expected = "no depth attachment")]
    fn test_depth_without_attachment_panics() {
        let mut group = AttachmentGroup::new(64, 64);
        group.add_attachment("a", ResourceSet::shared(target(1), 1), true, true);
        let subpasses = vec![Subpass::new("main", "mrt").with_color(0).with_depth(true)];
        RenderPassLayout::describe(&group, &subpasses, true, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    #[should_panic(expected = "1 to 20 subpasses")]
    fn test_subpass_limit() {
        let mut group = AttachmentGroup::new(64, 64);
        group.add_attachment("a", ResourceSet::shared(target(1), 1), true, true);
        let subpasses = vec![Subpass::new("main", "mrt").with_color(0); MAX_SUBPASSES + 1];
        RenderPassLayout::describe(&group, &subpasses, true, vk::SampleCountFlags::TYPE_1);
    }
}

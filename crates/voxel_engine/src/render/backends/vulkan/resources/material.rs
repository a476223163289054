//! Materials: shader stages plus the descriptor set feeding them
//!
//! A [`Material`] owns up to [`MAX_SHADER_STAGES`] compiled stages and one
//! parameter container per descriptor binding. Bindings are keyed by binding
//! number and may hold one of three things:
//!
//! - a [`ParameterGroup`] of uniform values, bound as `UNIFORM_BUFFER`
//! - a [`DynamicParameters`] block, one group per object, bound as
//!   `UNIFORM_BUFFER_DYNAMIC` and indexed with dynamic offsets
//! - a single named image, bound with the descriptor type of its [`UsageType`]
//!
//! GPU objects are created lazily by the first [`Material::commit_to_gpu`]:
//! the descriptor set layout, a pool sized for exactly one set, the set itself
//! and one host-visible buffer per uniform binding. Every group is frozen at
//! that point. Later commits only copy fresh parameter bytes into the buffers
//! and rewrite image descriptors that changed. Declaring a new binding once the
//! set exists is a programming error and panics.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::{vk, Device};

use crate::render::backends::vulkan::resources::buffer::Buffer;
use crate::render::backends::vulkan::resources::descriptor_set::{
    DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter,
};
use crate::render::backends::vulkan::resources::image::{ImageBinding, ImageResource, UsageType};
use crate::render::backends::vulkan::resources::parameters::{DynamicParameters, ParameterGroup, ParameterValue};
use crate::render::backends::vulkan::rendering::shader::{ShaderModule, ShaderStage};
use crate::render::backends::vulkan::{GpuDevice, VulkanResult};

/// Highest binding number a material may declare, exclusive
pub const BINDING_MAX: u32 = 30;

/// Most shader stages one material holds
pub const MAX_SHADER_STAGES: usize = 2;

/// What a material is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialKind {
    /// Vertex and fragment stages used by a graphics pipeline
    Visual,
    /// A single compute stage used by a compute pipeline
    Compute,
}

impl MaterialKind {
    /// Whether a stage may appear in a material of this kind
    pub fn allows(self, stage: ShaderStage) -> bool {
        match self {
            Self::Visual => matches!(stage, ShaderStage::Vertex | ShaderStage::Fragment),
            Self::Compute => stage == ShaderStage::Compute,
        }
    }

    /// Pipeline bind point the descriptor set is bound at
    pub fn bind_point(self) -> vk::PipelineBindPoint {
        match self {
            Self::Visual => vk::PipelineBindPoint::GRAPHICS,
            Self::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum BindingContent {
    Uniform(ParameterGroup),
    Dynamic(DynamicParameters),
    Image { usage: UsageType, group: ParameterGroup },
}

impl BindingContent {
    fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::Uniform(_) => UsageType::UniformBuffer.descriptor_type(),
            Self::Dynamic(_) => UsageType::DynamicUniformBuffer.descriptor_type(),
            Self::Image { usage, .. } => usage.descriptor_type(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Uniform(_) => "uniform block",
            Self::Dynamic(_) => "dynamic uniform block",
            Self::Image { .. } => "image",
        }
    }

    fn freeze(&mut self) {
        match self {
            Self::Uniform(group) | Self::Image { group, .. } => group.freeze(),
            Self::Dynamic(objects) => objects.freeze(),
        }
    }

    fn image(&self) -> Option<&ImageBinding> {
        match self {
            Self::Image { group, .. } => group.samplers().next().map(|(_, binding)| binding),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MaterialBinding {
    stages: vk::ShaderStageFlags,
    content: BindingContent,
}

// Field order is drop order: buffers and the pool go before the layout
struct MaterialGpuState {
    device: Device,
    buffers: BTreeMap<u32, Buffer>,
    // Only held so the set's pool lives as long as the set
    _pool: Option<DescriptorPool>,
    layout: DescriptorSetLayout,
    set: vk::DescriptorSet,
    min_offset_alignment: usize,
}

/// Shader stages and the descriptor set their parameters live in
pub struct Material {
    name: String,
    kind: MaterialKind,
    shaders: Vec<Arc<ShaderModule>>,
    bindings: BTreeMap<u32, MaterialBinding>,
    images_dirty: bool,
    gpu: Option<MaterialGpuState>,
}

impl Material {
    /// Create a material without stages or bindings
    pub fn new(name: impl Into<String>, kind: MaterialKind) -> Self {
        Self {
            name: name.into(),
            kind,
            shaders: Vec::with_capacity(MAX_SHADER_STAGES),
            bindings: BTreeMap::new(),
            images_dirty: false,
            gpu: None,
        }
    }

    /// Attach a compiled stage
    ///
    /// # Panics
    ///
    /// Panics if the stage does not fit the material kind, is already present
    /// or the material is full.
    pub fn with_shader(mut self, shader: Arc<ShaderModule>) -> Self {
        let stage = shader.stage();
        assert!(
            self.kind.allows(stage),
            "material '{}' of kind {:?} cannot hold a {:?} stage",
            self.name, self.kind, stage
        );
        assert!(
            self.shaders.iter().all(|s| s.stage() != stage),
            "material '{}' already has a {:?} stage",
            self.name, stage
        );
        assert!(
            self.shaders.len() < MAX_SHADER_STAGES,
            "material '{}' already holds {} stages",
            self.name, MAX_SHADER_STAGES
        );
        self.shaders.push(shader);
        self
    }

    /// Material name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Material kind
    pub fn kind(&self) -> MaterialKind {
        self.kind
    }

    /// Attached stages in the order they were added
    pub fn shaders(&self) -> &[Arc<ShaderModule>] {
        &self.shaders
    }

    /// Stage create infos for pipeline creation
    pub fn stage_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo> {
        self.shaders.iter().map(|shader| shader.stage_info()).collect()
    }

    /// Uniform parameters of a binding, creating the binding on first use
    ///
    /// # Panics
    ///
    /// Panics if the binding holds something other than a uniform block, or if
    /// the call would change the descriptor layout after it was built.
    pub fn parameters(&mut self, stage: ShaderStage, binding: u32) -> &mut ParameterGroup {
        let entry = self.binding_entry(stage, binding, || BindingContent::Uniform(ParameterGroup::new()));
        match &mut entry.content {
            BindingContent::Uniform(group) => group,
            other => panic!("binding {} holds a {}, not a uniform block", binding, other.describe()),
        }
    }

    /// Per-object parameters of a dynamic binding, creating `count` objects on first use
    ///
    /// # Panics
    ///
    /// Panics if the binding holds something else, or already holds a different
    /// object count.
    pub fn dynamic_parameters(&mut self, stage: ShaderStage, binding: u32, count: usize) -> &mut DynamicParameters {
        let entry = self.binding_entry(stage, binding, || BindingContent::Dynamic(DynamicParameters::new(count)));
        match &mut entry.content {
            BindingContent::Dynamic(objects) => {
                assert_eq!(
                    objects.len(),
                    count,
                    "dynamic binding {} was declared with {} objects",
                    binding,
                    objects.len()
                );
                objects
            }
            other => panic!("binding {} holds a {}, not a dynamic uniform block", binding, other.describe()),
        }
    }

    /// Bind an image under `name`, read in the layout `usage` requires
    ///
    /// Rebinding a different image to an existing binding is allowed at any
    /// time; the descriptor is rewritten by the next commit.
    pub fn set_image(
        &mut self,
        name: &str,
        stage: ShaderStage,
        binding: u32,
        image: &ImageResource,
        usage: UsageType,
    ) -> &mut Self {
        assert!(usage.is_image(), "{:?} cannot bind image '{}'", usage, name);
        let image_binding = image.binding(usage);
        let entry = self.binding_entry(stage, binding, || BindingContent::Image {
            usage,
            group: ParameterGroup::new(),
        });
        match &mut entry.content {
            BindingContent::Image { usage: declared, group } => {
                assert_eq!(
                    *declared, usage,
                    "binding {} was declared as {:?}, cannot rebind '{}' as {:?}",
                    binding, declared, name, usage
                );
                group.set(name, ParameterValue::Sampler(image_binding));
            }
            other => panic!("binding {} holds a {}, cannot bind image '{}'", binding, other.describe(), name),
        }
        self.images_dirty = true;
        self
    }

    /// Bind an attachment of an earlier subpass as an input attachment
    pub fn add_input_attachment(&mut self, name: &str, binding: u32, image: &ImageResource) -> &mut Self {
        self.set_image(name, ShaderStage::Fragment, binding, image, UsageType::InputAttachment)
    }

    fn binding_entry(
        &mut self,
        stage: ShaderStage,
        binding: u32,
        create: impl FnOnce() -> BindingContent,
    ) -> &mut MaterialBinding {
        assert!(
            self.kind.allows(stage),
            "material '{}' of kind {:?} has no {:?} stage",
            self.name, self.kind, stage
        );
        assert!(binding < BINDING_MAX, "binding {} exceeds the limit of {}", binding, BINDING_MAX);

        let built = self.gpu.is_some();
        let name = &self.name;
        let entry = self.bindings.entry(binding).or_insert_with(|| {
            if built {
                log::error!("material '{}' gained binding {} after its descriptor set was built", name, binding);
                panic!("material '{}' cannot add binding {} after commit_to_gpu", name, binding);
            }
            MaterialBinding {
                stages: vk::ShaderStageFlags::empty(),
                content: create(),
            }
        });

        if !entry.stages.contains(stage.flags()) {
            assert!(
                !built,
                "material '{}' cannot expose binding {} to {:?} after commit_to_gpu",
                name, binding, stage
            );
            entry.stages |= stage.flags();
        }
        entry
    }

    /// Layout bindings in binding order
    pub fn layout_builder(&self) -> DescriptorSetLayoutBuilder {
        self.bindings
            .iter()
            .fold(DescriptorSetLayoutBuilder::new(), |builder, (binding, entry)| {
                builder.add_binding(*binding, entry.content.descriptor_type(), entry.stages)
            })
    }

    /// Number of declared bindings
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Dynamic offsets for `object`, one per dynamic binding in binding order
    pub fn dynamic_offsets_with(&self, object: usize, min_offset_alignment: usize) -> Vec<u32> {
        self.bindings
            .values()
            .filter_map(|entry| match &entry.content {
                BindingContent::Dynamic(objects) => Some(objects.dynamic_offset(object, min_offset_alignment)),
                _ => None,
            })
            .collect()
    }

    /// Dynamic offsets for `object` using the committed device alignment
    ///
    /// Empty before the first commit.
    pub fn dynamic_offsets(&self, object: usize) -> Vec<u32> {
        self.gpu
            .as_ref()
            .map(|state| self.dynamic_offsets_with(object, state.min_offset_alignment))
            .unwrap_or_default()
    }

    /// Whether the material has any dynamic binding
    pub fn has_dynamic_bindings(&self) -> bool {
        self.bindings
            .values()
            .any(|entry| matches!(entry.content, BindingContent::Dynamic(_)))
    }

    /// Whether the descriptor objects have been built
    pub fn is_committed(&self) -> bool {
        self.gpu.is_some()
    }

    /// Descriptor set, null before the first commit or for a material without bindings
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.gpu.as_ref().map_or_else(vk::DescriptorSet::null, |state| state.set)
    }

    /// Descriptor set layout, null before the first commit
    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.gpu
            .as_ref()
            .map_or_else(vk::DescriptorSetLayout::null, |state| state.layout.handle())
    }

    /// Build descriptor objects on first call, then copy parameters to the GPU
    pub fn commit_to_gpu(&mut self, gpu: &GpuDevice) -> VulkanResult<()> {
        if self.gpu.is_none() {
            self.build_descriptors(gpu)?;
        }

        let Some(state) = self.gpu.as_mut() else {
            return Ok(());
        };
        let mut writer = DescriptorSetWriter::new();

        for (binding, entry) in &self.bindings {
            let (needed, descriptor_range) = match &entry.content {
                BindingContent::Uniform(group) => (group.packed_size(), group.packed_size()),
                BindingContent::Dynamic(objects) => (
                    objects.buffer_size(state.min_offset_alignment),
                    objects.stride(state.min_offset_alignment),
                ),
                BindingContent::Image { .. } => continue,
            };

            let needed = needed.max(1) as vk::DeviceSize;
            let stale = state.buffers.get(binding).map_or(true, |buffer| buffer.size() < needed);
            if stale {
                log::debug!("material '{}': allocating {} bytes for binding {}", self.name, needed, binding);
                let buffer = Buffer::uniform(gpu, needed)?;
                writer = writer.write_buffer(
                    *binding,
                    entry.content.descriptor_type(),
                    buffer.handle(),
                    0,
                    descriptor_range.max(1) as vk::DeviceSize,
                );
                state.buffers.insert(*binding, buffer);
            }

            if let Some(buffer) = state.buffers.get(binding) {
                let alignment = state.min_offset_alignment;
                buffer.with_mapped(|bytes| match &entry.content {
                    BindingContent::Uniform(group) => {
                        group.write_std140(bytes);
                    }
                    BindingContent::Dynamic(objects) => objects.write_std140(bytes, alignment),
                    BindingContent::Image { .. } => {}
                })?;
            }
        }

        if self.images_dirty {
            for (binding, entry) in &self.bindings {
                match entry.content.image() {
                    Some(image) => {
                        writer = writer.write_image(
                            *binding,
                            entry.content.descriptor_type(),
                            image.view,
                            image.sampler,
                            image.layout,
                        );
                    }
                    None if matches!(entry.content, BindingContent::Image { .. }) => {
                        log::warn!("material '{}': image binding {} has no image assigned", self.name, binding);
                    }
                    None => {}
                }
            }
            self.images_dirty = false;
        }

        if !writer.is_empty() && state.set != vk::DescriptorSet::null() {
            log::trace!("material '{}': {} descriptor writes", self.name, writer.len());
            writer.update(&state.device, state.set);
        }
        Ok(())
    }

    fn build_descriptors(&mut self, gpu: &GpuDevice) -> VulkanResult<()> {
        let device = gpu.device().clone();
        let builder = self.layout_builder();
        let layout = builder.build(&device)?;

        let (pool, set) = if builder.bindings().is_empty() {
            (None, vk::DescriptorSet::null())
        } else {
            let pool = DescriptorPool::new(device.clone(), 1, &builder.pool_sizes(1))?;
            let set = pool.allocate_descriptor_sets(&[layout.handle()])?[0];
            (Some(pool), set)
        };

        for entry in self.bindings.values_mut() {
            entry.content.freeze();
        }
        self.images_dirty = true;

        log::debug!(
            "material '{}': descriptor set built with {} bindings",
            self.name,
            builder.bindings().len()
        );

        let min_offset_alignment = usize::try_from(gpu.min_uniform_buffer_offset_alignment())
            .unwrap_or(1)
            .max(1);
        self.gpu = Some(MaterialGpuState {
            device,
            buffers: BTreeMap::new(),
            _pool: pool,
            layout,
            set,
            min_offset_alignment,
        });
        Ok(())
    }

    /// Release descriptor objects and buffers
    ///
    /// The GPU must no longer be using the set. Parameter values are kept, and
    /// a later commit rebuilds everything.
    pub fn release_gpu(&mut self) {
        if self.gpu.take().is_some() {
            log::debug!("material '{}': released GPU resources", self.name);
        }
    }
}

impl Clone for Material {
    /// A fresh instance with the same stages and parameters and no GPU objects
    fn clone(&self) -> Self {
        let mut bindings = self.bindings.clone();
        for entry in bindings.values_mut() {
            match &mut entry.content {
                BindingContent::Uniform(group) | BindingContent::Image { group, .. } => group.thaw(),
                BindingContent::Dynamic(objects) => objects.thaw(),
            }
        }
        Self {
            name: self.name.clone(),
            kind: self.kind,
            shaders: self.shaders.clone(),
            bindings,
            images_dirty: false,
            gpu: None,
        }
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("shaders", &self.shaders.len())
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("committed", &self.is_committed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::backends::vulkan::resources::image::ImageKind;

    fn voxel_texture() -> ImageResource {
        ImageResource::new(ImageKind::Texture3D, vk::Format::R8G8B8A8_UNORM, 256, 256).with_depth(256)
    }

    #[test]
    fn test_layout_in_binding_order() {
        let mut material = Material::new("mrt", MaterialKind::Visual);
        material
            .set_image("albedo", ShaderStage::Fragment, 2, &voxel_texture(), UsageType::CombinedImageSampler);
        material.parameters(ShaderStage::Vertex, 0).set("projection", Mat4::identity());
        material.dynamic_parameters(ShaderStage::Vertex, 1, 3);

        let builder = material.layout_builder();
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        assert_eq!(bindings[2].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[2].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_shared_binding_merges_stages() {
        let mut material = Material::new("voxelizer", MaterialKind::Visual);
        material.parameters(ShaderStage::Vertex, 0).set("view", Mat4::identity());
        material.parameters(ShaderStage::Fragment, 0);

        let builder = material.layout_builder();
        assert_eq!(builder.bindings().len(), 1);
        assert_eq!(
            builder.bindings()[0].stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_parameters_keep_insertion_order() {
        let mut material = Material::new("mrt", MaterialKind::Visual);
        let group = material.parameters(ShaderStage::Vertex, 0);
        group.set("model", Mat4::identity());
        group.set("color", Vec3::x());
        let names: Vec<&str> = material.parameters(ShaderStage::Vertex, 0).iter().map(|s| s.name()).collect();
        assert_eq!(names, ["model", "color"]);
    }

    #[test]
    #[should_panic(expected = "has no Compute stage")]
    fn test_visual_material_rejects_compute_stage() {
        let mut material = Material::new("mrt", MaterialKind::Visual);
        material.parameters(ShaderStage::Compute, 0);
    }

    #[test]
    #[should_panic(expected = "not a uniform block")]
    fn test_binding_content_is_fixed() {
        let mut material = Material::new("mrt", MaterialKind::Visual);
        material.dynamic_parameters(ShaderStage::Vertex, 0, 2);
        material.parameters(ShaderStage::Vertex, 0);
    }

    #[test]
    #[should_panic(expected = "exceeds the limit")]
    fn test_binding_limit() {
        let mut material = Material::new("mrt", MaterialKind::Visual);
        material.parameters(ShaderStage::Vertex, BINDING_MAX);
    }

    #[test]
    fn test_dynamic_offsets_follow_binding_order() {
        let mut material = Material::new("mrt", MaterialKind::Visual);
        material.dynamic_parameters(ShaderStage::Fragment, 4, 2).object(0).set("tint", Vec3::x());
        material.dynamic_parameters(ShaderStage::Vertex, 1, 2).object(0).set("model", Mat4::identity());

        assert!(material.has_dynamic_bindings());
        assert_eq!(material.dynamic_offsets_with(0, 256), vec![0, 0]);
        // model packs into 79 bytes and tint into 27, both round up to one 256 byte stride
        assert_eq!(material.dynamic_offsets_with(1, 256), vec![256, 256]);
        assert!(material.dynamic_offsets(1).is_empty());
    }

    #[test]
    fn test_image_rebind_and_layout() {
        let mut material = Material::new("deferred_output", MaterialKind::Visual);
        let target = ImageResource::new(ImageKind::RenderTarget, vk::Format::R16G16B16A16_SFLOAT, 64, 64);
        material.add_input_attachment("positions", 1, &target);
        material.add_input_attachment("positions", 1, &target);

        let builder = material.layout_builder();
        assert_eq!(builder.bindings()[0].descriptor_type, vk::DescriptorType::INPUT_ATTACHMENT);
        let entry = &material.bindings[&1];
        let image = entry.content.image().copied().unwrap();
        assert_eq!(image.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_clone_is_uncommitted_and_unfrozen() {
        let mut material = Material::new("clear_3d_texture", MaterialKind::Compute);
        material.parameters(ShaderStage::Compute, 0).set("lod", 0_i32);
        material.parameters(ShaderStage::Compute, 0).freeze();

        let mut copy = material.clone();
        assert!(!copy.is_committed());
        assert_eq!(copy.descriptor_set(), vk::DescriptorSet::null());
        copy.parameters(ShaderStage::Compute, 0).set("extra", 1.0_f32);
        assert_eq!(copy.parameters(ShaderStage::Compute, 0).len(), 2);
    }

    #[test]
    fn test_kind_bind_points() {
        assert_eq!(MaterialKind::Visual.bind_point(), vk::PipelineBindPoint::GRAPHICS);
        assert_eq!(MaterialKind::Compute.bind_point(), vk::PipelineBindPoint::COMPUTE);
        assert!(MaterialKind::Compute.allows(ShaderStage::Compute));
        assert!(!MaterialKind::Compute.allows(ShaderStage::Vertex));
    }
}

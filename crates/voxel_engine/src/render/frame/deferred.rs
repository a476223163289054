//! Voxel cone traced deferred renderer
//!
//! Assembles the passes, materials and pipelines the frame orchestrator
//! drives. Every frame slot owns its voxel volumes, G-buffer targets and
//! material instances, so a slot can be rewritten as soon as its fences signal
//! without touching work another slot still has in flight.
//!
//! | Stage        | Material           | Writes                              |
//! |--------------|--------------------|-------------------------------------|
//! | clear        | `clear_3d_texture` | every level of both volumes         |
//! | voxelize z/y/x | `voxelizer`      | level 0 of both volumes             |
//! | mip level k  | `downsize`         | level k + 1 of both volumes         |
//! | G-buffer     | `mrt`              | normals, albedo, positions, depth   |
//! | composite    | `deferred_output`  | swapchain image                     |

use ash::{vk, Device};

use crate::core::config::{LightingConfig, RendererConfig, RenderingMode, VoxelConfig};
use crate::foundation::math::{Mat4, Vec3, Vec3Ext};
use crate::render::backends::vulkan::{
    AttachmentGroup, CommandRecorder, ComputePipeline, Drawable, GpuDevice, ImageDesc, ImageKind, Material,
    MaterialStore, OwnedImage, PipelineState, RenderPass, ResourceSet, ShaderStage, Subpass, SwapchainTarget,
    UsageType, VulkanError, VulkanResult, WriteChannels,
};

use super::orchestrator::{FrameStages, FrameState};
use super::schedule::{FrameStage, VoxelAxis};
use super::voxel_views::{sampling_rays, voxel_views, VoxelView};

/// Format of the G-buffer color targets
pub const GBUFFER_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Format of the voxel volumes and the voxelization target
pub const VOXEL_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Coarser levels the composite samples through dedicated bindings
pub const LOD_SAMPLER_COUNT: u32 = 5;

const VOXEL_CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 0.0];

/// Composite sampler bindings for one coarser level of detail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LodSamplers {
    /// Mip level sampled
    pub level: u32,
    /// Albedo parameter name
    pub albedo_name: String,
    /// Albedo binding
    pub albedo_binding: u32,
    /// Normal parameter name
    pub normal_name: String,
    /// Normal binding
    pub normal_binding: u32,
}

/// Bindings of `voxel_albedos1..5` and `voxel_normals1..5`
///
/// Levels the volume does not have fall back to its coarsest level so the
/// shader's layout is always complete.
pub fn lod_samplers(lod_count: u32) -> Vec<LodSamplers> {
    let coarsest = lod_count.saturating_sub(1);
    (1..=LOD_SAMPLER_COUNT)
        .map(|lod| LodSamplers {
            level: lod.min(coarsest),
            albedo_name: format!("voxel_albedos{}", lod),
            albedo_binding: 7 + lod,
            normal_name: format!("voxel_normals{}", lod),
            normal_binding: 7 + lod + LOD_SAMPLER_COUNT,
        })
        .collect()
}

/// A mesh and its model matrix
pub struct SceneObject {
    /// Records the draw
    pub drawable: Box<dyn Drawable>,
    /// Object to world
    pub model: Mat4,
}

/// Viewer camera
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// World to view
    pub view: Mat4,
    /// View to clip
    pub projection: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, -5.0),
            view: Mat4::identity(),
            projection: Mat4::identity(),
        }
    }
}

struct VoxelImages {
    albedo: OwnedImage,
    normal: OwnedImage,
    target: OwnedImage,
}

impl VoxelImages {
    fn new(gpu: &GpuDevice, voxels: &VoxelConfig) -> VulkanResult<Self> {
        let edge = voxels.cube_dimensions;
        Ok(Self {
            albedo: OwnedImage::new(gpu, ImageDesc::new_volume(VOXEL_FORMAT, edge, voxels.lod_count))?,
            normal: OwnedImage::new(gpu, ImageDesc::new_volume(VOXEL_FORMAT, edge, voxels.lod_count))?,
            target: OwnedImage::new(gpu, ImageDesc::new_2d(ImageKind::RenderTarget, VOXEL_FORMAT, edge, edge))?,
        })
    }
}

struct GBufferImages {
    normals: OwnedImage,
    albedo: OwnedImage,
    positions: OwnedImage,
    depth: OwnedImage,
}

impl GBufferImages {
    fn new(gpu: &GpuDevice, extent: vk::Extent2D) -> VulkanResult<Self> {
        let target = |gpu: &GpuDevice| {
            OwnedImage::new(gpu, ImageDesc::new_2d(ImageKind::RenderTarget, GBUFFER_FORMAT, extent.width, extent.height))
        };
        Ok(Self {
            normals: target(gpu)?,
            albedo: target(gpu)?,
            positions: target(gpu)?,
            depth: OwnedImage::new(
                gpu,
                ImageDesc::new_2d(ImageKind::Depth, gpu.depth_format(), extent.width, extent.height),
            )?,
        })
    }
}

fn gbuffer_group(extent: vk::Extent2D, images: &[GBufferImages]) -> AttachmentGroup {
    let normals = ResourceSet::new(images.iter().map(|i| i.normals.resource()).collect());
    let albedo = ResourceSet::new(images.iter().map(|i| i.albedo.resource()).collect());
    let positions = ResourceSet::new(images.iter().map(|i| i.positions.resource()).collect());
    let depth = ResourceSet::new(images.iter().map(|i| i.depth.resource()).collect());

    let mut group = AttachmentGroup::new(extent.width, extent.height);
    group.add_attachment("normals", normals, true, true);
    group.add_attachment("albedo", albedo, true, true);
    group.add_attachment("world_positions", positions, true, true);
    group.set_depth_attachment("depth", depth, true, true);
    group.set_clear_color([0.0; 4]).set_clear_depth(1.0, 0);
    group
}

fn composite_group(swapchain: &SwapchainTarget) -> AttachmentGroup {
    let extent = swapchain.extent();
    let mut group = AttachmentGroup::new(extent.width, extent.height);
    group.add_attachment("present", swapchain.images().clone(), true, true);
    group
}

fn bind_composite_inputs(
    material: &mut Material,
    gbuffer: &GBufferImages,
    voxels: &VoxelImages,
    lod_count: u32,
) {
    let sampler = UsageType::CombinedImageSampler;
    let fragment = ShaderStage::Fragment;
    material
        .set_image("normals", fragment, 1, &gbuffer.normals.resource(), sampler)
        .set_image("albedo", fragment, 2, &gbuffer.albedo.resource(), sampler)
        .set_image("world_positions", fragment, 3, &gbuffer.positions.resource(), sampler)
        .set_image("depth", fragment, 4, &gbuffer.depth.resource(), sampler)
        .set_image("voxel_normals", fragment, 6, &voxels.normal.resource(), sampler)
        .set_image("voxel_albedos", fragment, 7, &voxels.albedo.resource(), sampler);

    for lod in lod_samplers(lod_count) {
        material
            .set_image(&lod.albedo_name, fragment, lod.albedo_binding, &voxels.albedo.level_resource(lod.level), sampler)
            .set_image(&lod.normal_name, fragment, lod.normal_binding, &voxels.normal.level_resource(lod.level), sampler);
    }
}

fn compute_pipeline<'p>(
    device: &Device,
    pipeline: &'p mut Option<ComputePipeline>,
    material: &Material,
) -> VulkanResult<&'p ComputePipeline> {
    if pipeline.is_none() {
        *pipeline = Some(ComputePipeline::new(device, material)?);
    }
    pipeline.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
        reason: format!("compute pipeline for '{}' missing", material.name()),
    })
}

/// Deferred renderer with voxel cone traced lighting
///
/// Fields drop in declaration order: passes and pipelines go before the
/// images their framebuffers and descriptors point at.
pub struct DeferredVoxelRenderer<'a> {
    gpu: &'a GpuDevice,
    gbuffer: RenderPass,
    voxelize: RenderPass,
    composite: RenderPass,
    clear_pipeline: Option<ComputePipeline>,
    downsize_pipeline: Option<ComputePipeline>,
    /// `[slot][volume * lod_count + level]`
    clear_materials: Vec<Vec<Material>>,
    /// `[slot][level]`, reading `level` and writing `level + 1`
    downsize_materials: Vec<Vec<Material>>,
    objects: Vec<SceneObject>,
    scene_locked: bool,
    camera: Camera,
    mode: RenderingMode,
    voxels: VoxelConfig,
    lighting: LightingConfig,
    views: [VoxelView; 3],
    extent: vk::Extent2D,
    gbuffer_images: Vec<GBufferImages>,
    voxel_images: Vec<VoxelImages>,
}

impl<'a> DeferredVoxelRenderer<'a> {
    /// Build every pass and material instance for `max_frames_in_flight` slots
    pub fn new(
        gpu: &'a GpuDevice,
        swapchain: &SwapchainTarget,
        store: &MaterialStore,
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(|reason| VulkanError::InitializationFailed(format!("invalid renderer configuration: {}", reason)))?;

        let slots = config.max_frames_in_flight;
        let voxels = config.voxels.clone();
        let lods = voxels.lod_count;
        let extent = swapchain.extent();

        let voxel_images = (0..slots).map(|_| VoxelImages::new(gpu, &voxels)).collect::<VulkanResult<Vec<_>>>()?;
        let gbuffer_images = (0..slots).map(|_| GBufferImages::new(gpu, extent)).collect::<VulkanResult<Vec<_>>>()?;

        let mrt_state = (0..3).fold(PipelineState::default(), |state, index| {
            state.with_blend(index, WriteChannels::RGBA, false)
        });
        let gbuffer = RenderPass::new(
            gpu,
            store,
            "gbuffer",
            gbuffer_group(extent, &gbuffer_images),
            vec![Subpass::new("geometry", "mrt").with_colors([0, 1, 2]).with_depth(true).with_state(mrt_state)],
            true,
            slots,
        )?;

        let mut voxel_group = AttachmentGroup::new(voxels.cube_dimensions, voxels.cube_dimensions);
        voxel_group.add_attachment(
            "voxel_2d_view",
            ResourceSet::new(voxel_images.iter().map(|v| v.target.resource()).collect()),
            true,
            false,
        );
        voxel_group.set_clear_color(VOXEL_CLEAR_COLOR);
        let voxel_state = PipelineState {
            depth_test: false,
            depth_write: false,
            ..PipelineState::default()
        }
        .with_cull_mode(vk::CullModeFlags::NONE);
        let mut voxelize = RenderPass::new(
            gpu,
            store,
            "voxelize",
            voxel_group,
            vec![Subpass::new("voxelize", "voxelizer").with_color(0).with_state(voxel_state)],
            true,
            slots * VoxelAxis::ORDER.len(),
        )?;

        let mut composite = RenderPass::new(
            gpu,
            store,
            "composite",
            composite_group(swapchain),
            vec![Subpass::new("composite", "deferred_output").with_color(0).with_state(PipelineState::fullscreen())],
            false,
            slots,
        )?;

        let mut clear_materials = Vec::with_capacity(slots);
        let mut downsize_materials = Vec::with_capacity(slots);
        for (slot, (volumes, gbuffer_targets)) in voxel_images.iter().zip(&gbuffer_images).enumerate() {
            for axis in VoxelAxis::ORDER {
                let material = voxelize.material_mut(0, slot * VoxelAxis::ORDER.len() + axis.index());
                material
                    .set_image("voxel_albedo_texture", ShaderStage::Fragment, 1, &volumes.albedo.level_resource(0), UsageType::StorageImage)
                    .set_image("voxel_normal_texture", ShaderStage::Fragment, 4, &volumes.normal.level_resource(0), UsageType::StorageImage);
            }

            bind_composite_inputs(composite.material_mut(0, slot), gbuffer_targets, volumes, lods);

            let mut clears = Vec::with_capacity(2 * lods as usize);
            for volume in [&volumes.albedo, &volumes.normal] {
                for level in 0..lods {
                    let mut material = store.create_material("clear_3d_texture")?;
                    material.set_image("texture_3d", ShaderStage::Compute, 0, &volume.level_resource(level), UsageType::StorageImage);
                    clears.push(material);
                }
            }
            clear_materials.push(clears);

            let mut downsizes = Vec::with_capacity(lods.saturating_sub(1) as usize);
            for level in 0..lods.saturating_sub(1) {
                let mut material = store.create_material("downsize")?;
                material
                    .set_image("r_texture_1", ShaderStage::Compute, 0, &volumes.albedo.level_resource(level), UsageType::CombinedImageSampler)
                    .set_image("r_texture_2", ShaderStage::Compute, 1, &volumes.normal.level_resource(level), UsageType::CombinedImageSampler)
                    .set_image("w_texture_1", ShaderStage::Compute, 2, &volumes.albedo.level_resource(level + 1), UsageType::StorageImage)
                    .set_image("w_texture_2", ShaderStage::Compute, 3, &volumes.normal.level_resource(level + 1), UsageType::StorageImage);
                downsizes.push(material);
            }
            downsize_materials.push(downsizes);
        }

        log::info!(
            "Deferred voxel renderer ready: {} slots, {}^3 voxels, {} levels of detail, {}x{} output",
            slots,
            voxels.cube_dimensions,
            lods,
            extent.width,
            extent.height
        );

        Ok(Self {
            gpu,
            gbuffer,
            voxelize,
            composite,
            clear_pipeline: None,
            downsize_pipeline: None,
            clear_materials,
            downsize_materials,
            objects: Vec::new(),
            scene_locked: false,
            camera: Camera::default(),
            mode: config.rendering_mode,
            views: voxel_views(&voxels),
            voxels,
            lighting: config.lighting.clone(),
            extent,
            gbuffer_images,
            voxel_images,
        })
    }

    /// Add an object to the scene and return its index
    ///
    /// Objects are fixed once the first frame is recorded, since per-object
    /// uniform blocks are sized by the object count.
    pub fn add_object(&mut self, drawable: Box<dyn Drawable>, model: Mat4) -> VulkanResult<usize> {
        if self.scene_locked {
            return Err(VulkanError::InvalidOperation {
                reason: "objects cannot be added after the first frame".to_string(),
            });
        }
        self.objects.push(SceneObject { drawable, model });
        Ok(self.objects.len() - 1)
    }

    /// Replace the model matrix of object `index`
    pub fn set_model(&mut self, index: usize, model: Mat4) {
        if let Some(object) = self.objects.get_mut(index) {
            object.model = model;
        } else {
            log::warn!("No scene object {}", index);
        }
    }

    /// Scene objects
    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    /// Set the viewer camera
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    /// Viewer camera
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Set what the composite outputs
    pub fn set_rendering_mode(&mut self, mode: RenderingMode) {
        log::info!("Rendering mode: {:?}", mode);
        self.mode = mode;
    }

    /// Switch to the next rendering mode
    pub fn cycle_rendering_mode(&mut self) -> RenderingMode {
        self.set_rendering_mode(self.mode.next());
        self.mode
    }

    /// Current rendering mode
    pub fn rendering_mode(&self) -> RenderingMode {
        self.mode
    }

    /// Move the light
    pub fn set_light(&mut self, lighting: LightingConfig) {
        self.lighting = lighting;
    }

    /// Follow a resized swapchain
    ///
    /// The device must be idle. G-buffer targets are recreated at the new size
    /// and both screen-sized passes are rebuilt.
    pub fn resize(&mut self, swapchain: &SwapchainTarget) -> VulkanResult<()> {
        let extent = swapchain.extent();
        let gbuffer_images = (0..self.gbuffer_images.len())
            .map(|_| GBufferImages::new(self.gpu, extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        self.gbuffer.rebuild(self.gpu, gbuffer_group(extent, &gbuffer_images))?;
        self.composite.rebuild(self.gpu, composite_group(swapchain))?;
        for (slot, (targets, volumes)) in gbuffer_images.iter().zip(&self.voxel_images).enumerate() {
            bind_composite_inputs(self.composite.material_mut(0, slot), targets, volumes, self.voxels.lod_count);
        }

        self.gbuffer_images = gbuffer_images;
        self.extent = extent;
        log::info!("Renderer resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn models(&mut self) -> VulkanResult<Vec<Mat4>> {
        if self.objects.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "scene has no objects to draw".to_string(),
            });
        }
        self.scene_locked = true;
        Ok(self.objects.iter().map(|object| object.model).collect())
    }

    fn record_clear(&mut self, slot: usize, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        let lods = self.voxels.lod_count as usize;
        let edge = self.voxels.cube_dimensions;
        let group_size = self.voxels.local_group_size;
        let materials = &mut self.clear_materials[slot];
        for material in materials.iter_mut() {
            material.commit_to_gpu(self.gpu)?;
        }

        let pipeline = compute_pipeline(self.gpu.device(), &mut self.clear_pipeline, &materials[0])?;
        for (index, material) in materials.iter().enumerate() {
            pipeline.dispatch(recorder, material, [edge; 3], (index % lods) as u32, group_size);
        }
        Ok(())
    }

    fn record_voxelize(&mut self, axis: VoxelAxis, slot: usize, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        let models = self.models()?;
        let instance = slot * VoxelAxis::ORDER.len() + axis.index();
        let view = &self.views[axis.index()];
        let screen = self.views[VoxelAxis::Z.index()].view_projection();
        let edge = self.voxels.cube_dimensions as f32;

        let material = self.voxelize.material_mut(0, instance);
        material
            .parameters(ShaderStage::Vertex, 0)
            .set("view", view.view)
            .set("projection", view.projection)
            .set("light_position", self.lighting.position())
            .set("eye_position", view.eye);
        material
            .parameters(ShaderStage::Fragment, 2)
            .set("inverse_view_projection", view.inverse_view_projection())
            .set("project_to_voxel_screen", screen)
            .set("voxel_coords", Vec3::new(edge, edge, edge));
        let objects = material.dynamic_parameters(ShaderStage::Vertex, 3, models.len());
        for (index, model) in models.iter().enumerate() {
            objects.object(index).set("model", *model);
        }

        self.voxelize.commit_parameters_to_gpu(self.gpu, instance)?;
        let drawables: Vec<&dyn Drawable> = self.objects.iter().map(|object| object.drawable.as_ref()).collect();
        self.voxelize.record(recorder, slot, instance, &drawables)
    }

    fn record_mip_level(&mut self, level: u32, slot: usize, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        let edge = self.voxels.cube_dimensions;
        let group_size = self.voxels.local_group_size;
        let material = self
            .downsize_materials
            .get_mut(slot)
            .and_then(|levels| levels.get_mut(level as usize))
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("volume has no mip level {} to downsample into", level + 1),
            })?;
        material.commit_to_gpu(self.gpu)?;

        let pipeline = compute_pipeline(self.gpu.device(), &mut self.downsize_pipeline, material)?;
        pipeline.dispatch(recorder, material, [edge; 3], level + 1, group_size);
        Ok(())
    }

    fn record_gbuffer(&mut self, slot: usize, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        let models = self.models()?;

        let material = self.gbuffer.material_mut(0, slot);
        material
            .parameters(ShaderStage::Vertex, 0)
            .set("view", self.camera.view)
            .set("projection", self.camera.projection)
            .set("lightPosition", self.lighting.position());
        let objects = material.dynamic_parameters(ShaderStage::Vertex, 1, models.len());
        for (index, model) in models.iter().enumerate() {
            objects.object(index).set("model", *model);
        }

        self.gbuffer.commit_parameters_to_gpu(self.gpu, slot)?;
        let drawables: Vec<&dyn Drawable> = self.objects.iter().map(|object| object.drawable.as_ref()).collect();
        self.gbuffer.record(recorder, slot, slot, &drawables)
    }

    fn record_composite(&mut self, frame: &FrameState, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        let z_view = &self.views[VoxelAxis::Z.index()];
        let eye_inverse_view = self.camera.view.try_inverse().unwrap_or_else(Mat4::identity);

        let material = self.composite.material_mut(0, frame.slot);
        material
            .parameters(ShaderStage::Vertex, 0)
            .set("width", self.extent.width as f32)
            .set("height", self.extent.height as f32);
        material
            .parameters(ShaderStage::Fragment, 5)
            .set("world_cam_position", self.camera.position.extend(1.0))
            .set("world_light_position", self.lighting.position())
            .set("light_color", self.lighting.color())
            .set("voxel_size_in_world_space", self.voxels.voxel_size(0).extend(1.0))
            .set("mode", self.mode.shader_value())
            .set("sampling_rays", sampling_rays().to_vec())
            .set("vox_view_projection", z_view.view_projection())
            .set("num_of_lods", self.voxels.lod_count as i32)
            .set("eye_in_world_space", z_view.eye)
            .set("eye_inverse_view_matrix", eye_inverse_view);

        self.composite.commit_parameters_to_gpu(self.gpu, frame.slot)?;
        self.composite.record(recorder, frame.image_index as usize, frame.slot, &[])
    }
}

impl FrameStages<CommandRecorder> for DeferredVoxelRenderer<'_> {
    fn record(&mut self, stage: FrameStage, frame: &FrameState, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        match stage {
            FrameStage::Clear => self.record_clear(frame.slot, recorder),
            FrameStage::Voxelize(axis) => self.record_voxelize(axis, frame.slot, recorder),
            FrameStage::MipLevel(level) => self.record_mip_level(level, frame.slot, recorder),
            FrameStage::GBuffer => self.record_gbuffer(frame.slot, recorder),
            FrameStage::Composite => self.record_composite(frame, recorder),
        }
    }
}

impl Drop for DeferredVoxelRenderer<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            log::warn!("Device did not go idle before renderer teardown: {}", e);
        }
        log::debug!("Deferred voxel renderer dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lod_sampler_bindings() {
        let samplers = lod_samplers(6);
        let albedo: Vec<u32> = samplers.iter().map(|s| s.albedo_binding).collect();
        let normal: Vec<u32> = samplers.iter().map(|s| s.normal_binding).collect();
        assert_eq!(albedo, vec![8, 9, 10, 11, 12]);
        assert_eq!(normal, vec![13, 14, 15, 16, 17]);
        assert_eq!(samplers[0].albedo_name, "voxel_albedos1");
        assert_eq!(samplers[4].normal_name, "voxel_normals5");
        assert_eq!(samplers.iter().map(|s| s.level).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_missing_levels_use_coarsest() {
        let levels: Vec<u32> = lod_samplers(3).iter().map(|s| s.level).collect();
        assert_eq!(levels, vec![1, 2, 2, 2, 2]);
        assert!(lod_samplers(1).iter().all(|s| s.level == 0));
    }

    #[test]
    fn test_default_camera_is_finite() {
        let camera = Camera::default();
        assert!(camera.view.try_inverse().is_some());
        assert_eq!(camera.position.z, -5.0);
    }
}

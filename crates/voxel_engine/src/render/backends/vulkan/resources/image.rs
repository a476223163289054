//! Image resources as seen by render passes and materials
//!
//! An [`ImageResource`] is a plain description of a GPU image: kind, format,
//! dimensions, the layout it rests in between passes, and the handles needed to
//! bind it. [`OwnedImage`] creates and owns the GPU objects behind one.

use ash::{vk, Device};

use crate::render::backends::vulkan::{GpuDevice, QueueRole, VulkanError, VulkanResult};

/// Kinds of images the engine binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Sampled 2D texture
    Texture2D,
    /// 3D volume, sampled or written as storage
    Texture3D,
    /// Layered 2D texture
    Texture2DArray,
    /// Six-face cube texture
    Cube,
    /// Color attachment that later passes sample
    RenderTarget,
    /// Depth attachment
    Depth,
    /// Swapchain image
    Present,
}

impl ImageKind {
    /// Layout an image of this kind rests in between passes
    pub fn resting_layout(self) -> vk::ImageLayout {
        match self {
            Self::Texture2D | Self::Texture2DArray | Self::Cube => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::Texture3D => vk::ImageLayout::GENERAL,
            Self::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::Depth => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

/// How a shader binding consumes a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageType {
    /// Plain uniform buffer
    UniformBuffer,
    /// Uniform buffer indexed with a dynamic offset per object
    DynamicUniformBuffer,
    /// Image read through a sampler
    CombinedImageSampler,
    /// Attachment read by a later subpass
    InputAttachment,
    /// Image written or read with imageLoad/imageStore
    StorageImage,
}

impl UsageType {
    /// Descriptor type for this usage
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::DynamicUniformBuffer => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        }
    }

    /// Whether this usage binds an image
    pub fn is_image(self) -> bool {
        matches!(self, Self::CombinedImageSampler | Self::InputAttachment | Self::StorageImage)
    }
}

/// Description of one GPU image and the handles needed to bind it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageResource {
    /// Image kind
    pub kind: ImageKind,
    /// Pixel format
    pub format: vk::Format,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Depth in texels, 1 for anything but volumes
    pub depth: u32,
    /// Array layer count
    pub layers: u32,
    /// Layout the image rests in between passes
    pub resting_layout: vk::ImageLayout,
    /// Whether the image has more than one sample per texel
    pub multisampled: bool,
    /// Image handle
    pub image: vk::Image,
    /// Default view
    pub view: vk::ImageView,
    /// Sampler used when the image is bound with a sampler
    pub sampler: vk::Sampler,
}

impl ImageResource {
    /// Describe an image with null handles and the kind's resting layout
    pub fn new(kind: ImageKind, format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            kind,
            format,
            width,
            height,
            depth: 1,
            layers: if kind == ImageKind::Cube { 6 } else { 1 },
            resting_layout: kind.resting_layout(),
            multisampled: false,
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
        }
    }

    /// Attach GPU handles
    pub fn with_handles(mut self, image: vk::Image, view: vk::ImageView, sampler: vk::Sampler) -> Self {
        self.image = image;
        self.view = view;
        self.sampler = sampler;
        self
    }

    /// Set the volume depth
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Set the array layer count
    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self
    }

    /// Override the resting layout
    pub fn with_resting_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.resting_layout = layout;
        self
    }

    /// Mark the image as multisampled
    pub fn with_multisampling(mut self, multisampled: bool) -> Self {
        self.multisampled = multisampled;
        self
    }

    /// Whether this is a depth image
    pub fn is_depth(&self) -> bool {
        self.kind == ImageKind::Depth
    }

    /// Layout the image must be in for the given usage
    pub fn usage_layout(&self, usage: UsageType) -> vk::ImageLayout {
        if self.kind == ImageKind::Texture3D || usage == UsageType::StorageImage {
            return vk::ImageLayout::GENERAL;
        }
        match (usage, self.kind) {
            (UsageType::InputAttachment | UsageType::CombinedImageSampler, ImageKind::Depth) => {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            }
            (UsageType::InputAttachment | UsageType::CombinedImageSampler, _) => {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            }
            _ => self.resting_layout,
        }
    }

    /// Layout used while the image is an attachment of a subpass
    pub fn attachment_layout(&self) -> vk::ImageLayout {
        if self.is_depth() {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        }
    }

    /// Descriptor-ready reference for a usage
    pub fn binding(&self, usage: UsageType) -> ImageBinding {
        assert!(usage.is_image(), "{:?} does not bind an image", usage);
        ImageBinding {
            kind: self.kind,
            usage,
            view: self.view,
            sampler: self.sampler,
            layout: self.usage_layout(usage),
        }
    }
}

/// An image bound to a shader: view, sampler and the layout it is read in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBinding {
    /// Kind of the bound image
    pub kind: ImageKind,
    /// How the shader consumes it
    pub usage: UsageType,
    /// View handle
    pub view: vk::ImageView,
    /// Sampler handle, null for storage images and input attachments
    pub sampler: vk::Sampler,
    /// Layout at the time the shader reads it
    pub layout: vk::ImageLayout,
}

/// One image per swap image
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSet {
    images: Vec<ImageResource>,
}

impl ResourceSet {
    /// Wrap per-swap-image images
    pub fn new(images: Vec<ImageResource>) -> Self {
        assert!(!images.is_empty(), "a resource set needs at least one image");
        Self { images }
    }

    /// The same image for every swap image
    pub fn shared(image: ImageResource, swap_count: usize) -> Self {
        Self::new(vec![image; swap_count.max(1)])
    }

    /// Image for a swap index
    pub fn get(&self, swap_index: usize) -> &ImageResource {
        &self.images[swap_index % self.images.len()]
    }

    /// First image, which every other image matches in kind and size
    pub fn first(&self) -> &ImageResource {
        &self.images[0]
    }

    /// Number of distinct entries
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Always false, sets are never empty
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Iterate over the images
    pub fn iter(&self) -> impl Iterator<Item = &ImageResource> {
        self.images.iter()
    }
}

/// Parameters for creating an [`OwnedImage`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Image kind
    pub kind: ImageKind,
    /// Pixel format
    pub format: vk::Format,
    /// Extent in texels
    pub extent: vk::Extent3D,
    /// Mip level count
    pub mip_levels: u32,
    /// Sample count
    pub samples: vk::SampleCountFlags,
}

impl ImageDesc {
    /// Single-sampled 2D image
    pub fn new_2d(kind: ImageKind, format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            kind,
            format,
            extent: vk::Extent3D { width, height, depth: 1 },
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    /// Cubic 3D volume with a mip chain
    pub fn new_volume(format: vk::Format, edge: u32, mip_levels: u32) -> Self {
        Self {
            kind: ImageKind::Texture3D,
            format,
            extent: vk::Extent3D { width: edge, height: edge, depth: edge },
            mip_levels,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    fn usage(&self) -> vk::ImageUsageFlags {
        match self.kind {
            ImageKind::RenderTarget => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT
            }
            ImageKind::Depth => {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT
            }
            ImageKind::Texture3D => {
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
            }
            ImageKind::Texture2D | ImageKind::Texture2DArray | ImageKind::Cube => {
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
            }
            ImageKind::Present => vk::ImageUsageFlags::empty(),
        }
    }

    fn aspect(&self) -> vk::ImageAspectFlags {
        match (self.kind, self.format) {
            (ImageKind::Depth, vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT) => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            (ImageKind::Depth, _) => vk::ImageAspectFlags::DEPTH,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    fn view_type(&self) -> vk::ImageViewType {
        match self.kind {
            ImageKind::Texture3D => vk::ImageViewType::TYPE_3D,
            ImageKind::Texture2DArray => vk::ImageViewType::TYPE_2D_ARRAY,
            ImageKind::Cube => vk::ImageViewType::CUBE,
            _ => vk::ImageViewType::TYPE_2D,
        }
    }

    fn layers(&self) -> u32 {
        if self.kind == ImageKind::Cube { 6 } else { 1 }
    }
}

/// GPU image, memory, views and sampler with RAII cleanup
pub struct OwnedImage {
    device: Device,
    desc: ImageDesc,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    level_views: Vec<vk::ImageView>,
    sampler: vk::Sampler,
}

impl OwnedImage {
    /// Create the image and transition it to its resting layout
    pub fn new(gpu: &GpuDevice, desc: ImageDesc) -> VulkanResult<Self> {
        assert!(desc.kind != ImageKind::Present, "present images belong to the swapchain");
        assert!(
            desc.extent.width > 0 && desc.extent.height > 0 && desc.extent.depth > 0,
            "image extent must be non-zero, got {:?}",
            desc.extent
        );

        let device = gpu.device().clone();
        let image_type = if desc.kind == ImageKind::Texture3D { vk::ImageType::TYPE_3D } else { vk::ImageType::TYPE_2D };
        let flags = if desc.kind == ImageKind::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(image_type)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.layers())
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage())
            .samples(desc.samples);

        // Volumes are written on the compute queue and read on the graphics queue
        let families = gpu.queue_families();
        let family_indices = [families.graphics, families.compute];
        let image_info = if desc.kind == ImageKind::Texture3D && families.graphics != families.compute {
            image_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            image_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let image = unsafe {
            device.create_image(&image_info, None)
                .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create image: {:?}", e)))?
        };

        // From here on every handle is owned by `this`, so early returns clean up
        let mut this = Self {
            device: device.clone(),
            desc,
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            level_views: Vec::new(),
            sampler: vk::Sampler::null(),
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = gpu.find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        this.memory = unsafe {
            device.allocate_memory(&alloc_info, None)
                .map_err(|e| VulkanError::InitializationFailed(format!("Failed to allocate image memory: {:?}", e)))?
        };
        unsafe {
            device.bind_image_memory(image, this.memory, 0)
                .map_err(|e| VulkanError::InitializationFailed(format!("Failed to bind image memory: {:?}", e)))?;
        }

        this.view = this.create_view(0, desc.mip_levels)?;
        if desc.kind == ImageKind::Texture3D && desc.mip_levels > 1 {
            for level in 0..desc.mip_levels {
                let view = this.create_view(level, 1)?;
                this.level_views.push(view);
            }
        }

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(desc.mip_levels as f32);

        this.sampler = unsafe {
            device.create_sampler(&sampler_info, None)
                .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create sampler: {:?}", e)))?
        };

        this.transition_to_resting_layout(gpu)?;

        log::debug!(
            "Created {:?} image {}x{}x{} ({:?}, {} levels)",
            desc.kind, desc.extent.width, desc.extent.height, desc.extent.depth, desc.format, desc.mip_levels
        );
        Ok(this)
    }

    fn create_view(&self, base_level: u32, level_count: u32) -> VulkanResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(self.desc.view_type())
            .format(self.desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.desc.aspect(),
                base_mip_level: base_level,
                level_count,
                base_array_layer: 0,
                layer_count: self.desc.layers(),
            });

        unsafe {
            self.device.create_image_view(&view_info, None)
                .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create image view: {:?}", e)))
        }
    }

    fn transition_to_resting_layout(&self, gpu: &GpuDevice) -> VulkanResult<()> {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(self.desc.kind.resting_layout())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.desc.aspect(),
                base_mip_level: 0,
                level_count: self.desc.mip_levels,
                base_array_layer: 0,
                layer_count: self.desc.layers(),
            })
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .build();

        gpu.submit_one_shot(QueueRole::Graphics, |recorder| {
            recorder.cmd_image_barriers(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                &[barrier],
            );
            Ok(())
        })
    }

    /// Description covering every mip level
    pub fn resource(&self) -> ImageResource {
        ImageResource::new(self.desc.kind, self.desc.format, self.desc.extent.width, self.desc.extent.height)
            .with_depth(self.desc.extent.depth)
            .with_layers(self.desc.layers())
            .with_multisampling(self.desc.samples != vk::SampleCountFlags::TYPE_1)
            .with_handles(self.image, self.view, self.sampler)
    }

    /// Description of a single mip level of a volume
    pub fn level_resource(&self, level: u32) -> ImageResource {
        let view = if self.level_views.is_empty() {
            assert_eq!(level, 0, "image has a single mip level");
            self.view
        } else {
            self.level_views[level as usize]
        };
        let extent = self.desc.extent;
        ImageResource::new(self.desc.kind, self.desc.format, (extent.width >> level).max(1), (extent.height >> level).max(1))
            .with_depth((extent.depth >> level).max(1))
            .with_handles(self.image, view, self.sampler)
    }

    /// Mip level count
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }
}

impl Drop for OwnedImage {
    fn drop(&mut self) {
        unsafe {
            if self.sampler != vk::Sampler::null() {
                self.device.destroy_sampler(self.sampler, None);
            }
            for view in self.level_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resting_layouts() {
        assert_eq!(ImageKind::Texture3D.resting_layout(), vk::ImageLayout::GENERAL);
        assert_eq!(ImageKind::RenderTarget.resting_layout(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(ImageKind::Present.resting_layout(), vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(ImageKind::Depth.resting_layout(), vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_usage_layouts() {
        let target = ImageResource::new(ImageKind::RenderTarget, vk::Format::R8G8B8A8_UNORM, 64, 64);
        assert_eq!(target.usage_layout(UsageType::InputAttachment), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(target.usage_layout(UsageType::CombinedImageSampler), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(target.usage_layout(UsageType::StorageImage), vk::ImageLayout::GENERAL);

        let volume = ImageResource::new(ImageKind::Texture3D, vk::Format::R8G8B8A8_UNORM, 8, 8).with_depth(8);
        assert_eq!(volume.usage_layout(UsageType::CombinedImageSampler), vk::ImageLayout::GENERAL);

        let depth = ImageResource::new(ImageKind::Depth, vk::Format::D32_SFLOAT, 64, 64);
        assert_eq!(depth.usage_layout(UsageType::CombinedImageSampler), vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert_eq!(depth.attachment_layout(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_binding_carries_usage_layout() {
        let target = ImageResource::new(ImageKind::RenderTarget, vk::Format::R8G8B8A8_UNORM, 64, 64);
        let binding = target.binding(UsageType::CombinedImageSampler);
        assert_eq!(binding.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(binding.kind, ImageKind::RenderTarget);
    }

    #[test]
    #[should_panic(expected = "does not bind an image")]
    fn test_binding_rejects_buffer_usage() {
        let target = ImageResource::new(ImageKind::Texture2D, vk::Format::R8G8B8A8_UNORM, 4, 4);
        let _ = target.binding(UsageType::UniformBuffer);
    }

    #[test]
    fn test_resource_set_wraps_swap_index() {
        let a = ImageResource::new(ImageKind::Present, vk::Format::B8G8R8A8_UNORM, 800, 600);
        let set = ResourceSet::shared(a, 3);
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(4).width, 800);
        assert_eq!(ImageResource::new(ImageKind::Cube, vk::Format::R8G8B8A8_UNORM, 4, 4).layers, 6);
    }
}

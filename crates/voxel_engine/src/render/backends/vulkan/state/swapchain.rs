//! Swapchain the composite pass renders into
//!
//! The surface comes from the windowing layer. This module picks a format,
//! present mode, extent and image count for it, creates one view per
//! swapchain image and exposes those images as a [`ResourceSet`] of present
//! images so they can be used as a render pass attachment.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;

use crate::render::backends::vulkan::resources::image::{ImageKind, ImageResource, ResourceSet};
use crate::render::backends::vulkan::{GpuDevice, VulkanError, VulkanResult};

/// Surface properties a swapchain is configured from
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Surface capabilities
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Query the surface through the loader
    pub fn query(gpu: &GpuDevice, surface_loader: &Surface, surface: vk::SurfaceKHR) -> VulkanResult<Self> {
        let physical_device = gpu.physical_device();
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .map_err(VulkanError::Api)?,
            })
        }
    }

    /// sRGB BGRA if available, otherwise the first reported format
    pub fn choose_format(&self) -> VulkanResult<vk::SurfaceFormatKHR> {
        self.formats
            .iter()
            .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| self.formats.first())
            .copied()
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))
    }

    /// MAILBOX when supported, FIFO otherwise
    pub fn choose_present_mode(&self) -> vk::PresentModeKHR {
        self.present_modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }

    /// The surface's current extent, or the window extent clamped to the limits
    pub fn choose_extent(&self, window_extent: vk::Extent2D) -> vk::Extent2D {
        let caps = &self.capabilities;
        if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: window_extent.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: window_extent.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        }
    }

    /// One more than the minimum, capped by the maximum when there is one
    pub fn choose_image_count(&self) -> u32 {
        let caps = &self.capabilities;
        let wanted = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            wanted.min(caps.max_image_count)
        } else {
            wanted
        }
    }
}

/// Swapchain, its image views and the loader used to acquire and present
pub struct SwapchainTarget {
    device: ash::Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    image_views: Vec<vk::ImageView>,
    images: ResourceSet,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl SwapchainTarget {
    /// Create a swapchain for `surface`
    pub fn new(
        gpu: &GpuDevice,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        Self::create(gpu, surface_loader, surface, window_extent, vk::SwapchainKHR::null())
    }

    fn create(
        gpu: &GpuDevice,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let device = gpu.device().clone();
        let loader = SwapchainLoader::new(gpu.instance(), &device);
        let support = SurfaceSupport::query(gpu, surface_loader, surface)?;

        let format = support.choose_format()?;
        let extent = support.choose_extent(window_extent);
        let image_count = support.choose_image_count();

        let families = gpu.queue_families();
        let family_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(support.choose_present_mode())
            .clipped(true)
            .old_swapchain(old_swapchain);
        create_info = if families.graphics == families.present {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = unsafe {
            loader.create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut target = Self {
            device,
            loader,
            swapchain,
            image_views: Vec::new(),
            images: ResourceSet::shared(ImageResource::new(ImageKind::Present, format.format, extent.width, extent.height), 1),
            format,
            extent,
        };

        let raw_images = unsafe {
            target.loader.get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };

        let mut resources = Vec::with_capacity(raw_images.len());
        for image in raw_images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe {
                target.device.create_image_view(&view_info, None)
                    .map_err(VulkanError::Api)?
            };
            target.image_views.push(view);
            resources.push(
                ImageResource::new(ImageKind::Present, format.format, extent.width, extent.height)
                    .with_handles(image, view, vk::Sampler::null()),
            );
        }
        target.images = ResourceSet::new(resources);

        log::debug!(
            "Swapchain created: {} images, {}x{}, {:?}",
            target.image_views.len(),
            extent.width,
            extent.height,
            format.format
        );
        Ok(target)
    }

    /// Replace the swapchain after a resize; the GPU must be idle
    pub fn recreate(
        &mut self,
        gpu: &GpuDevice,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        let replacement = Self::create(gpu, surface_loader, surface, window_extent, self.swapchain)?;
        *self = replacement;
        Ok(())
    }

    /// Acquire the next image, signaling `image_available` when it is ready
    pub fn acquire_next_image(&self, image_available: vk::Semaphore, timeout_ns: u64) -> VulkanResult<u32> {
        let result = unsafe {
            self.loader.acquire_next_image(self.swapchain, timeout_ns, image_available, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::warn!("Swapchain is suboptimal for the surface");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date during acquire_next_image");
                Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR))
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Queue image `index` for presentation once `render_done` is signaled
    pub fn present(&self, queue: vk::Queue, index: u32, render_done: vk::Semaphore) -> VulkanResult<()> {
        let wait_semaphores = [render_done];
        let swapchains = [self.swapchain];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(_) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date during queue_present");
                Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR))
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Present images, one per swapchain image
    pub fn images(&self) -> &ResourceSet {
        &self.images
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.image_views.len()
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Surface format
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Raw swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl Drop for SwapchainTarget {
    fn drop(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

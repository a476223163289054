//! Vulkan device context
//!
//! Wraps a logical device created by the windowing layer together with the
//! queues and command pools the engine submits on. Instance creation, device
//! selection and extension negotiation happen outside this crate; the engine
//! only needs the handles.

use ash::{vk, Device, Instance};
use thiserror::Error;

use crate::render::backends::vulkan::rendering::commands::{CommandPool, CommandRecorder};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Setup of a GPU object failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// A fence did not signal within the configured bound
    #[error("Fence wait timed out after {timeout_ns} ns")]
    FenceTimeout {
        /// The bound that elapsed
        timeout_ns: u64,
    },

    /// A SPIR-V file could not be read or was malformed
    #[error("Failed to load shader {path}: {reason}")]
    ShaderLoad {
        /// Path of the shader file
        path: String,
        /// What went wrong
        reason: String,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Queues the engine submits work on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Graphics queue, also used for one-shot transfers
    Graphics,
    /// Async compute queue
    Compute,
}

/// Queue family indices of an already created logical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family with graphics support
    pub graphics: u32,
    /// Family with compute support
    pub compute: u32,
    /// Family that can present to the surface
    pub present: u32,
}

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// The device, its queues and a command pool per queue role
pub struct GpuDevice {
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    device: Device,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_pool: CommandPool,
    compute_pool: CommandPool,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: vk::PhysicalDeviceLimits,
    depth_format: vk::Format,
}

impl GpuDevice {
    /// Wrap an existing logical device
    ///
    /// The caller keeps ownership of the instance and device and must destroy
    /// them after this wrapper is dropped.
    pub fn new(
        instance: Instance,
        physical_device: vk::PhysicalDevice,
        device: Device,
        families: QueueFamilies,
    ) -> VulkanResult<Self> {
        let (graphics_queue, compute_queue, present_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.compute, 0),
                device.get_device_queue(families.present, 0),
            )
        };

        let graphics_pool = CommandPool::new(device.clone(), families.graphics)?;
        let compute_pool = CommandPool::new(device.clone(), families.compute)?;

        let (memory_properties, properties) = unsafe {
            (
                instance.get_physical_device_memory_properties(physical_device),
                instance.get_physical_device_properties(physical_device),
            )
        };

        let depth_format = Self::find_supported_format(
            &instance,
            physical_device,
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
        .ok_or_else(|| VulkanError::InitializationFailed("No supported depth format".to_string()))?;

        log::debug!(
            "GpuDevice ready: graphics family {}, compute family {}, present family {}, depth {:?}",
            families.graphics, families.compute, families.present, depth_format
        );

        Ok(Self {
            instance,
            physical_device,
            device,
            families,
            graphics_queue,
            compute_queue,
            present_queue,
            graphics_pool,
            compute_pool,
            memory_properties,
            limits: properties.limits,
            depth_format,
        })
    }

    fn find_supported_format(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        candidates.iter().copied().find(|format| {
            let props = unsafe { instance.get_physical_device_format_properties(physical_device, *format) };
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                _ => props.optimal_tiling_features.contains(features),
            }
        })
    }

    /// Get the logical device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Get the instance
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Get the physical device handle
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Queue family indices
    pub fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    /// Queue for a role
    pub fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics_queue,
            QueueRole::Compute => self.compute_queue,
        }
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Command pool for a role
    pub fn command_pool(&self, role: QueueRole) -> &CommandPool {
        match role {
            QueueRole::Graphics => &self.graphics_pool,
            QueueRole::Compute => &self.compute_pool,
        }
    }

    /// Minimum offset alignment for dynamic uniform buffers
    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.limits.min_uniform_buffer_offset_alignment
    }

    /// Highest sample count usable for both color and depth attachments
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        max_sample_count(
            self.limits.framebuffer_color_sample_counts & self.limits.framebuffer_depth_sample_counts,
        )
    }

    /// Best supported depth attachment format
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Find a memory type index that satisfies the filter and properties
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.memory_properties, type_filter, properties)
    }

    /// Record and submit a one-shot command buffer, blocking until the queue is idle
    pub fn submit_one_shot<F>(&self, role: QueueRole, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder) -> VulkanResult<()>,
    {
        let pool = self.command_pool(role);
        let mut recorder = pool.begin_single_time()?;
        record(&mut recorder)?;
        let command_buffer = recorder.end()?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        let queue = self.queue(role);

        let result = unsafe {
            self.device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .and_then(|()| self.device.queue_wait_idle(queue))
        };
        pool.free_command_buffers(&command_buffers);
        result.map_err(VulkanError::Api)
    }

    /// Block until every queue is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

/// Pick the highest single sample count present in `counts`
pub fn max_sample_count(counts: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|candidate| counts.contains(*candidate))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Find a memory type index that satisfies the filter and properties
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_sample_count_picks_highest() {
        let counts = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_8;
        assert_eq!(max_sample_count(counts), vk::SampleCountFlags::TYPE_8);
        assert_eq!(max_sample_count(vk::SampleCountFlags::TYPE_1), vk::SampleCountFlags::TYPE_1);
        assert_eq!(max_sample_count(vk::SampleCountFlags::empty()), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_find_memory_type() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        props.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 0);
        assert!(matches!(
            find_memory_type(&props, 0b011, host),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }
}

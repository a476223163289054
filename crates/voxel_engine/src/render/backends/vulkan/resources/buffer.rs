//! Host-visible buffers for uniform data

use ash::{vk, Device};
use crate::render::backends::vulkan::{GpuDevice, VulkanResult, VulkanError};

/// Buffer with its own memory allocation
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    pub fn new(
        gpu: &GpuDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let device = gpu.device().clone();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = match gpu.find_memory_type(requirements.memory_type_bits, properties) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let this = Self { device, buffer, memory, size };
        unsafe {
            this.device.bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }
        Ok(this)
    }

    /// Create a host-visible, host-coherent uniform buffer
    pub fn uniform(gpu: &GpuDevice, size: vk::DeviceSize) -> VulkanResult<Self> {
        Self::new(
            gpu,
            size.max(1),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Map the whole buffer, hand the bytes to `write`, then unmap
    pub fn with_mapped<R>(&self, write: impl FnOnce(&mut [u8]) -> R) -> VulkanResult<R> {
        let len = usize::try_from(self.size).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("Buffer of {} bytes cannot be mapped on this host", self.size),
        })?;

        let result = unsafe {
            let ptr = self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            let bytes = std::slice::from_raw_parts_mut(ptr.cast::<u8>(), len);
            let result = write(bytes);
            self.device.unmap_memory(self.memory);
            result
        };

        Ok(result)
    }

    /// Get the buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get the buffer size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

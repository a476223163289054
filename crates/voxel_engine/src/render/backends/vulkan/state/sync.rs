//! Semaphores and fences with RAII cleanup
//!
//! Semaphores order GPU work across submissions and queues; fences let the CPU
//! observe completion. Every fence wait is bounded: a wait that runs out of time
//! reports [`VulkanError::FenceTimeout`] instead of blocking forever.

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Binary semaphore
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Map the result of a bounded fence wait
pub fn fence_wait_result(result: Result<(), vk::Result>, timeout_ns: u64) -> VulkanResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(VulkanError::FenceTimeout { timeout_ns }),
        Err(e) => Err(VulkanError::Api(e)),
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device.create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Wait for the fence, giving up after `timeout_ns`
    pub fn wait(&self, timeout_ns: u64) -> VulkanResult<()> {
        let result = unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ns) };
        fence_wait_result(result, timeout_ns)
    }

    /// Reset the fence to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Whether the fence is signaled, without blocking
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe {
            self.device.get_fence_status(self.fence)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_fence_timeout() {
        assert!(fence_wait_result(Ok(()), 10).is_ok());
        assert!(matches!(
            fence_wait_result(Err(vk::Result::TIMEOUT), 10),
            Err(VulkanError::FenceTimeout { timeout_ns: 10 })
        ));
        assert!(matches!(
            fence_wait_result(Err(vk::Result::ERROR_DEVICE_LOST), 10),
            Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
        ));
    }
}

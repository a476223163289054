// Vulkan state management

pub mod swapchain;
pub mod sync;

pub use swapchain::*;
pub use sync::*;

//! Rendering: the Vulkan backend and the frame orchestration built on it

pub mod backends;
pub mod frame;

// Vulkan device wrapper and error types

pub mod context;

pub use context::*;

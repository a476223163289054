//! Vulkan resource management
//!
//! Buffers, images, descriptor sets, shader parameters and the materials that
//! tie them to shader bindings.

/// Host-visible uniform buffers
pub mod buffer;

/// Image descriptions and owned GPU images
pub mod image;

/// Descriptor set layouts, pools and writes
pub mod descriptor_set;

/// Typed shader parameters packed to std140
pub mod parameters;

/// Materials: shader stages plus their parameter bindings
pub mod material;

/// Named prototype materials
pub mod material_store;

/// Render pass attachments
pub mod attachment_group;

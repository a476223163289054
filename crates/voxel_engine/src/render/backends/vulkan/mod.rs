//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules.

/// Device wrapper and error types
pub mod initialization;

/// GPU resources: buffers, images, descriptors, parameters and materials
pub mod resources;

/// Shaders, pipelines, render passes and command recording
pub mod rendering;

/// Synchronization objects and the swapchain
pub mod state;

// Re-export core initialization types
pub use initialization::context::{GpuDevice, QueueFamilies, QueueRole, VulkanError, VulkanResult};

// Re-export resource types
pub use resources::attachment_group::{Attachment, AttachmentGroup, ClearValue, MAX_ATTACHMENTS};
pub use resources::buffer::Buffer;
pub use resources::descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter};
pub use resources::image::{ImageBinding, ImageDesc, ImageKind, ImageResource, OwnedImage, ResourceSet, UsageType};
pub use resources::material::{Material, MaterialKind, BINDING_MAX, MAX_SHADER_STAGES};
pub use resources::material_store::{MaterialKey, MaterialStore, ShaderKey};
pub use resources::parameters::{DynamicParameters, ParameterError, ParameterGroup, ParameterKind, ParameterValue};

// Re-export rendering types
pub use rendering::commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use rendering::pipeline::{
    BlendAttachment, ComputePipeline, Drawable, FullscreenTriangle, GraphicsPipeline, PipelineState, VertexInput,
    WriteChannels,
};
pub use rendering::render_pass::{RenderPass, RenderPassLayout, Subpass, MAX_SUBPASSES};
pub use rendering::shader::{ShaderModule, ShaderStage};
pub use rendering::vertex_layout::{Vertex, VertexLayout};

// Re-export state types
pub use state::swapchain::SwapchainTarget;
pub use state::sync::{Fence, Semaphore};

//! # Voxel Engine
//!
//! A Vulkan frame-graph, material and synchronization engine driving a
//! voxel cone traced deferred renderer.
//!
//! ## Features
//!
//! - **Render pass builder**: declarative attachment groups and subpasses turned into
//!   render passes, subpass dependencies and per-swap-image framebuffers
//! - **Materials**: insertion-ordered shader parameter groups packed to std140 and
//!   committed into descriptor sets on first use
//! - **Frame orchestration**: compute clear, three voxelization passes, mip chain,
//!   G-buffer and composite submissions chained with semaphores across the graphics
//!   and compute queues, with fences bounding the frames in flight
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voxel_engine::prelude::*;
//!
//! fn run(gpu: &GpuDevice, swapchain: &SwapchainTarget, store: &MaterialStore) -> VulkanResult<()> {
//!     let config = RendererConfig::default();
//!     let mut renderer = DeferredVoxelRenderer::new(gpu, swapchain, store, &config)?;
//!     renderer.add_object(Box::new(FullscreenTriangle), Mat4::identity())?;
//!
//!     let schedule = FrameSchedule::new(config.voxels.lod_count);
//!     let backend = VulkanFrameBackend::new(
//!         gpu,
//!         swapchain,
//!         &schedule,
//!         config.max_frames_in_flight,
//!         config.fence_timeout_ns,
//!     )?;
//!     let mut orchestrator = FrameOrchestrator::new(backend, schedule, &config)?;
//!
//!     loop {
//!         orchestrator.draw_frame(&mut renderer);
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        core::config::{RendererConfig, RenderingMode, VoxelConfig, LightingConfig, ShaderLibraryConfig},
        foundation::math::{Vec2, Vec3, Vec4, Mat4},
        render::backends::vulkan::{
            GpuDevice, VulkanError, VulkanResult, QueueRole, SwapchainTarget,
            MaterialStore, Material, MaterialKind, ShaderStage, ParameterGroup, ParameterValue,
            AttachmentGroup, Subpass, RenderPass, GraphicsPipeline, ComputePipeline,
            Drawable, FullscreenTriangle,
        },
        render::frame::{
            FrameOrchestrator, FrameStages, FrameBackend, VulkanFrameBackend, FrameSchedule,
            DeferredVoxelRenderer, Camera, FrameStage, VoxelAxis,
        },
    };
}

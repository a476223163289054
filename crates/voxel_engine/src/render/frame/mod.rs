//! Frame orchestration
//!
//! The [`FrameSchedule`] plans a frame's submissions, a [`FrameBackend`] turns
//! them into queue submissions, and [`FrameOrchestrator`] rotates frames through
//! their slots. [`DeferredVoxelRenderer`] records the stages.

pub mod backend;
pub mod deferred;
pub mod orchestrator;
pub mod schedule;
pub mod voxel_views;

pub use backend::{FrameBackend, VulkanFrameBackend};
pub use deferred::{Camera, DeferredVoxelRenderer, SceneObject};
pub use orchestrator::{FrameOrchestrator, FrameStages, FrameState};
pub use schedule::{FenceName, FrameSchedule, FrameStage, SignalName, StageSubmission, VoxelAxis, Wait};
pub use voxel_views::{sampling_rays, voxel_view, voxel_views, VoxelView};

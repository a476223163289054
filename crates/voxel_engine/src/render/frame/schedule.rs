//! Per-frame submission plan
//!
//! A frame is a fixed chain of queue submissions. The plan here is pure data:
//! which queue each stage runs on, which semaphores it waits on (and at which
//! pipeline stage), which it signals and which fence it carries. The
//! orchestrator walks the plan; the backend turns names into Vulkan objects.
//!
//! ```text
//! compute:   clear ─┐                     ┌─ mip 0 ─ mip 1 ─ … ─┐
//! graphics:         └─ Z ─ Y ─ X ─────────┘                     │
//! graphics:  acquire ─ G-buffer ──────────────────── composite ─┴─ present
//! ```
//!
//! Every binary semaphore is signaled once and waited once per frame, and
//! every submission is planned after the submission that signals what it
//! waits on.

use ash::vk;

use crate::render::backends::vulkan::QueueRole;

/// Axis a voxelization pass projects along, in submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoxelAxis {
    /// Looking down the Z axis
    Z,
    /// Looking down the Y axis
    Y,
    /// Looking down the X axis
    X,
}

impl VoxelAxis {
    /// Submission order of the three passes
    pub const ORDER: [Self; 3] = [Self::Z, Self::Y, Self::X];

    /// Position in [`Self::ORDER`]
    pub fn index(self) -> usize {
        match self {
            Self::Z => 0,
            Self::Y => 1,
            Self::X => 2,
        }
    }
}

/// One submission of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStage {
    /// Compute clear of both voxel volumes
    Clear,
    /// Voxelization along one axis
    Voxelize(VoxelAxis),
    /// Downsample into mip `level + 1` from `level`
    MipLevel(u32),
    /// Geometry into the G-buffer
    GBuffer,
    /// Cone traced lighting into the swapchain image
    Composite,
}

impl FrameStage {
    /// Queue the stage is submitted to
    pub fn queue(self) -> QueueRole {
        match self {
            Self::Clear | Self::MipLevel(_) => QueueRole::Compute,
            Self::Voxelize(_) | Self::GBuffer | Self::Composite => QueueRole::Graphics,
        }
    }
}

/// Semaphores of a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalName {
    /// Swapchain image acquired
    ImageAvailable,
    /// Volumes cleared
    ClearDone,
    /// Voxelization along an axis finished
    VoxelDone(VoxelAxis),
    /// Mip chain may start
    MipStart,
    /// Mip `level + 1` written
    MipDone(u32),
    /// G-buffer written
    GBufferDone,
    /// Composite finished, image may be presented
    RenderDone,
}

/// A semaphore of a particular frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId {
    /// Which semaphore
    pub name: SignalName,
    /// Frame slot that owns it
    pub slot: usize,
}

/// Fences of a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FenceName {
    /// Signaled when the last voxelization pass finishes
    Voxelize,
    /// Signaled when the G-buffer pass finishes
    GBuffer,
    /// Signaled when the composite finishes
    Frame,
}

impl FenceName {
    /// Every fence a slot owns
    pub const ALL: [Self; 3] = [Self::Voxelize, Self::GBuffer, Self::Frame];
}

/// A semaphore wait and the pipeline stage it blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    /// Semaphore waited on
    pub semaphore: SignalName,
    /// First pipeline stage that must wait
    pub stage: vk::PipelineStageFlags,
}

impl Wait {
    fn new(semaphore: SignalName, stage: vk::PipelineStageFlags) -> Self {
        Self { semaphore, stage }
    }
}

/// Everything the backend needs to submit one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSubmission {
    /// The stage
    pub stage: FrameStage,
    /// Queue it runs on
    pub queue: QueueRole,
    /// Semaphores waited before it runs
    pub waits: Vec<Wait>,
    /// Semaphores signaled when it finishes
    pub signals: Vec<SignalName>,
    /// Fence signaled when it finishes
    pub fence: Option<FenceName>,
}

impl StageSubmission {
    fn new(stage: FrameStage) -> Self {
        Self {
            stage,
            queue: stage.queue(),
            waits: Vec::new(),
            signals: Vec::new(),
            fence: None,
        }
    }

    fn wait(mut self, semaphore: SignalName, stage: vk::PipelineStageFlags) -> Self {
        self.waits.push(Wait::new(semaphore, stage));
        self
    }

    fn signal(mut self, semaphore: SignalName) -> Self {
        self.signals.push(semaphore);
        self
    }

    fn fence(mut self, fence: FenceName) -> Self {
        self.fence = Some(fence);
        self
    }
}

/// Submission plan shared by every frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSchedule {
    lod_count: u32,
    submissions: Vec<StageSubmission>,
}

impl FrameSchedule {
    /// Plan a frame for a volume with `lod_count` levels of detail
    ///
    /// # Panics
    ///
    /// Panics if `lod_count` is zero.
    pub fn new(lod_count: u32) -> Self {
        assert!(lod_count > 0, "voxel volume needs at least one level of detail");
        let fragment = vk::PipelineStageFlags::FRAGMENT_SHADER;
        let compute = vk::PipelineStageFlags::COMPUTE_SHADER;
        let mip_count = lod_count - 1;

        let mut submissions = vec![StageSubmission::new(FrameStage::Clear).signal(SignalName::ClearDone)];

        let mut previous = SignalName::ClearDone;
        for axis in VoxelAxis::ORDER {
            let mut submission = StageSubmission::new(FrameStage::Voxelize(axis))
                .wait(previous, fragment)
                .signal(SignalName::VoxelDone(axis));
            if axis == VoxelAxis::X {
                if mip_count > 0 {
                    submission = submission.signal(SignalName::MipStart);
                }
                submission = submission.fence(FenceName::Voxelize);
            }
            submissions.push(submission);
            previous = SignalName::VoxelDone(axis);
        }

        for level in 0..mip_count {
            let after = if level == 0 { SignalName::MipStart } else { SignalName::MipDone(level - 1) };
            submissions.push(
                StageSubmission::new(FrameStage::MipLevel(level))
                    .wait(after, compute)
                    .signal(SignalName::MipDone(level)),
            );
        }

        submissions.push(
            StageSubmission::new(FrameStage::GBuffer)
                .wait(SignalName::ImageAvailable, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .signal(SignalName::GBufferDone)
                .fence(FenceName::GBuffer),
        );

        let mut composite = StageSubmission::new(FrameStage::Composite)
            .wait(SignalName::GBufferDone, fragment)
            .wait(SignalName::VoxelDone(VoxelAxis::X), fragment);
        if mip_count > 0 {
            composite = composite.wait(SignalName::MipDone(mip_count - 1), fragment);
        }
        submissions.push(composite.signal(SignalName::RenderDone).fence(FenceName::Frame));

        Self { lod_count, submissions }
    }

    /// Levels of detail the plan downsamples into
    pub fn lod_count(&self) -> u32 {
        self.lod_count
    }

    /// Submissions in the order they are made
    pub fn submissions(&self) -> &[StageSubmission] {
        &self.submissions
    }

    /// Semaphores each slot needs
    pub fn semaphores(&self) -> Vec<SignalName> {
        let mut names = vec![SignalName::ImageAvailable];
        for submission in &self.submissions {
            for signal in &submission.signals {
                if !names.contains(signal) {
                    names.push(*signal);
                }
            }
        }
        names
    }

    /// Semaphore presentation waits on
    pub fn present_wait(&self) -> SignalName {
        SignalName::RenderDone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stages(schedule: &FrameSchedule) -> Vec<FrameStage> {
        schedule.submissions().iter().map(|s| s.stage).collect()
    }

    #[test]
    fn test_stage_order() {
        let schedule = FrameSchedule::new(3);
        assert_eq!(
            stages(&schedule),
            vec![
                FrameStage::Clear,
                FrameStage::Voxelize(VoxelAxis::Z),
                FrameStage::Voxelize(VoxelAxis::Y),
                FrameStage::Voxelize(VoxelAxis::X),
                FrameStage::MipLevel(0),
                FrameStage::MipLevel(1),
                FrameStage::GBuffer,
                FrameStage::Composite,
            ]
        );
    }

    #[test]
    fn test_queues() {
        let schedule = FrameSchedule::new(6);
        for submission in schedule.submissions() {
            let expected = match submission.stage {
                FrameStage::Clear | FrameStage::MipLevel(_) => QueueRole::Compute,
                _ => QueueRole::Graphics,
            };
            assert_eq!(submission.queue, expected, "{:?}", submission.stage);
        }
    }

    #[test]
    fn test_voxelize_chain() {
        let schedule = FrameSchedule::new(6);
        let waits: Vec<SignalName> = schedule.submissions()[1..4].iter().map(|s| s.waits[0].semaphore).collect();
        assert_eq!(
            waits,
            vec![
                SignalName::ClearDone,
                SignalName::VoxelDone(VoxelAxis::Z),
                SignalName::VoxelDone(VoxelAxis::Y),
            ]
        );
        assert!(schedule.submissions()[1..4]
            .iter()
            .all(|s| s.waits[0].stage == vk::PipelineStageFlags::FRAGMENT_SHADER));
    }

    #[test]
    fn test_composite_waits_for_geometry_voxels_and_mips() {
        let schedule = FrameSchedule::new(6);
        let composite = schedule.submissions().last().unwrap();
        let waited: Vec<SignalName> = composite.waits.iter().map(|w| w.semaphore).collect();
        assert_eq!(
            waited,
            vec![
                SignalName::GBufferDone,
                SignalName::VoxelDone(VoxelAxis::X),
                SignalName::MipDone(4),
            ]
        );
        assert_eq!(composite.signals, vec![SignalName::RenderDone]);
        assert_eq!(composite.fence, Some(FenceName::Frame));
        assert_eq!(schedule.present_wait(), SignalName::RenderDone);
    }

    #[test]
    fn test_single_lod_has_no_mip_chain() {
        let schedule = FrameSchedule::new(1);
        assert_eq!(schedule.submissions().len(), 6);
        assert!(!schedule.semaphores().contains(&SignalName::MipStart));
        let composite = schedule.submissions().last().unwrap();
        assert_eq!(composite.waits.len(), 2);
    }

    #[test]
    fn test_image_available_gates_gbuffer_only() {
        let schedule = FrameSchedule::new(6);
        let waiters: Vec<FrameStage> = schedule
            .submissions()
            .iter()
            .filter(|s| s.waits.iter().any(|w| w.semaphore == SignalName::ImageAvailable))
            .map(|s| s.stage)
            .collect();
        assert_eq!(waiters, vec![FrameStage::GBuffer]);
    }

    #[test]
    fn test_each_semaphore_signaled_and_waited_once() {
        let schedule = FrameSchedule::new(6);
        let mut signaled: HashMap<SignalName, usize> = HashMap::new();
        let mut waited: HashMap<SignalName, usize> = HashMap::new();
        for (position, submission) in schedule.submissions().iter().enumerate() {
            for wait in &submission.waits {
                *waited.entry(wait.semaphore).or_default() += 1;
                if wait.semaphore != SignalName::ImageAvailable {
                    let signaler = schedule
                        .submissions()
                        .iter()
                        .position(|s| s.signals.contains(&wait.semaphore))
                        .unwrap();
                    assert!(signaler < position, "{:?} waits before its signal is submitted", submission.stage);
                }
            }
            for signal in &submission.signals {
                *signaled.entry(*signal).or_default() += 1;
            }
        }
        *waited.entry(schedule.present_wait()).or_default() += 1;

        assert!(signaled.values().all(|count| *count == 1));
        for name in schedule.semaphores() {
            assert_eq!(waited.get(&name), Some(&1), "{:?}", name);
        }
        assert_eq!(schedule.semaphores().len(), 1 + 1 + 3 + 1 + 5 + 2);
    }

    #[test]
    fn test_fences() {
        let schedule = FrameSchedule::new(6);
        let fenced: Vec<(FrameStage, FenceName)> = schedule
            .submissions()
            .iter()
            .filter_map(|s| s.fence.map(|f| (s.stage, f)))
            .collect();
        assert_eq!(
            fenced,
            vec![
                (FrameStage::Voxelize(VoxelAxis::X), FenceName::Voxelize),
                (FrameStage::GBuffer, FenceName::GBuffer),
                (FrameStage::Composite, FenceName::Frame),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "at least one level")]
    fn test_zero_lods_panics() {
        let _ = FrameSchedule::new(0);
    }
}

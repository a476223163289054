//! Frame orchestration
//!
//! Frames rotate through `max_frames_in_flight` slots. Before a slot is
//! reused, its fences are waited with a bound; only then are its parameters
//! rewritten and its command buffers re-recorded. The submissions themselves
//! follow the [`FrameSchedule`].

use crate::core::config::RendererConfig;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

use super::backend::FrameBackend;
use super::schedule::{FenceName, FrameSchedule, FrameStage};

/// Where the current frame lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    /// Frames started before this one
    pub frame: u64,
    /// Slot whose resources this frame uses
    pub slot: usize,
    /// Swapchain image the frame presents
    pub image_index: u32,
}

/// Records the work of each stage
///
/// Called once per stage per frame, after the slot's fences have signaled, so
/// implementations may freely update the slot's parameters before recording.
pub trait FrameStages<R> {
    /// Update parameters for `stage`, commit them and record its commands
    fn record(&mut self, stage: FrameStage, frame: &FrameState, recorder: &mut R) -> VulkanResult<()>;
}

/// Drives frames through a [`FrameBackend`]
pub struct FrameOrchestrator<B: FrameBackend> {
    backend: B,
    schedule: FrameSchedule,
    fence_timeout_ns: u64,
    frame: u64,
}

impl<B: FrameBackend> FrameOrchestrator<B> {
    /// Create an orchestrator; the backend must hold one slot per frame in flight
    pub fn new(backend: B, schedule: FrameSchedule, config: &RendererConfig) -> VulkanResult<Self> {
        if backend.slot_count() != config.max_frames_in_flight {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "backend holds {} slots but {} frames may be in flight",
                    backend.slot_count(),
                    config.max_frames_in_flight
                ),
            });
        }
        if schedule.lod_count() != config.voxels.lod_count {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "schedule plans {} levels of detail, configuration asks for {}",
                    schedule.lod_count(),
                    config.voxels.lod_count
                ),
            });
        }

        log::info!(
            "Frame orchestrator ready: {} frames in flight, {} submissions per frame",
            config.max_frames_in_flight,
            schedule.submissions().len()
        );
        Ok(Self {
            backend,
            schedule,
            fence_timeout_ns: config.fence_timeout_ns,
            frame: 0,
        })
    }

    /// Frames started so far
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Slot the next frame will use
    pub fn next_slot(&self) -> usize {
        (self.frame % self.backend.slot_count() as u64) as usize
    }

    /// Submission plan
    pub fn schedule(&self) -> &FrameSchedule {
        &self.schedule
    }

    /// Backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Record, submit and present one frame
    ///
    /// The slot's fences are reset only after the image was acquired, so a
    /// failed acquire leaves them signaled for the next attempt.
    pub fn try_draw_frame<S: FrameStages<B::Recorder>>(&mut self, stages: &mut S) -> VulkanResult<FrameState> {
        let slot = self.next_slot();
        self.backend.wait_fences(slot, &FenceName::ALL, self.fence_timeout_ns)?;

        let image_index = self.backend.acquire_image(slot)?;
        self.backend.reset_fences(slot, &FenceName::ALL)?;

        let state = FrameState {
            frame: self.frame,
            slot,
            image_index,
        };
        log::trace!("Frame {} on slot {} presenting image {}", state.frame, slot, image_index);

        for submission in self.schedule.submissions() {
            let mut recorder = self.backend.begin(slot, submission.stage)?;
            stages.record(submission.stage, &state, &mut recorder)?;
            self.backend.submit(slot, submission, recorder)?;
        }

        self.backend.present(slot, image_index)?;
        self.frame += 1;
        Ok(state)
    }

    /// Draw one frame; any failure is fatal
    ///
    /// # Panics
    ///
    /// Panics when the frame cannot be completed, including when a fence does
    /// not signal within the configured timeout.
    pub fn draw_frame<S: FrameStages<B::Recorder>>(&mut self, stages: &mut S) -> FrameState {
        match self.try_draw_frame(stages) {
            Ok(state) => state,
            Err(e) => {
                log::error!("Frame {} failed: {}", self.frame, e);
                panic!("frame {} failed: {}", self.frame, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frame::schedule::{SignalName, StageSubmission, VoxelAxis};
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(FrameStage, usize),
        Submit(FrameStage, usize, Vec<SignalName>),
        Present(usize, u32),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct MockBackend {
        slots: usize,
        images: u32,
        next_image: u32,
        log: Log,
        // fence -> generation of the slot that submitted it
        in_flight: HashMap<(usize, FenceName), u64>,
        unsignaled: HashSet<(usize, FenceName)>,
        generations: Vec<u64>,
        stall_after_waits: Option<usize>,
        skip_fence_waits: bool,
        waits: usize,
    }

    impl MockBackend {
        fn new(slots: usize, log: Log) -> Self {
            Self {
                slots,
                images: 3,
                next_image: 0,
                log,
                in_flight: HashMap::new(),
                unsignaled: HashSet::new(),
                generations: vec![0; slots],
                stall_after_waits: None,
                skip_fence_waits: false,
                waits: 0,
            }
        }
    }

    struct MockRecorder {
        slot: usize,
        stage: FrameStage,
    }

    impl FrameBackend for MockBackend {
        type Recorder = MockRecorder;

        fn slot_count(&self) -> usize {
            self.slots
        }

        fn wait_fences(&mut self, slot: usize, fences: &[FenceName], timeout_ns: u64) -> VulkanResult<()> {
            if self.stall_after_waits == Some(self.waits) {
                return Err(VulkanError::FenceTimeout { timeout_ns });
            }
            self.waits += 1;
            if !self.skip_fence_waits {
                for fence in fences {
                    self.in_flight.remove(&(slot, *fence));
                }
            }
            self.log.borrow_mut().push(Event::Wait(slot));
            Ok(())
        }

        fn reset_fences(&mut self, slot: usize, fences: &[FenceName]) -> VulkanResult<()> {
            for fence in fences {
                assert!(!self.in_flight.contains_key(&(slot, *fence)), "reset of an in-flight fence");
                self.unsignaled.insert((slot, *fence));
            }
            self.generations[slot] += 1;
            self.log.borrow_mut().push(Event::Reset(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> VulkanResult<u32> {
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.images;
            self.log.borrow_mut().push(Event::Acquire(slot));
            Ok(image)
        }

        fn begin(&mut self, slot: usize, stage: FrameStage) -> VulkanResult<MockRecorder> {
            // Fences submitted earlier in this frame are expected; only the
            // slot's previous use must have signaled.
            let current = self.generations[slot];
            assert!(
                !self.in_flight.iter().any(|((s, _), generation)| *s == slot && *generation < current),
                "slot {} re-recorded while its work is in flight",
                slot
            );
            Ok(MockRecorder { slot, stage })
        }

        fn submit(&mut self, slot: usize, submission: &StageSubmission, recorder: MockRecorder) -> VulkanResult<()> {
            assert_eq!((recorder.slot, recorder.stage), (slot, submission.stage));
            if let Some(fence) = submission.fence {
                assert!(self.unsignaled.remove(&(slot, fence)), "fence {:?} submitted without reset", fence);
                self.in_flight.insert((slot, fence), self.generations[slot]);
            }
            self.log
                .borrow_mut()
                .push(Event::Submit(submission.stage, slot, submission.signals.clone()));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
            self.log.borrow_mut().push(Event::Present(slot, image_index));
            Ok(())
        }
    }

    struct MockStages {
        log: Log,
    }

    impl FrameStages<MockRecorder> for MockStages {
        fn record(&mut self, stage: FrameStage, frame: &FrameState, recorder: &mut MockRecorder) -> VulkanResult<()> {
            assert_eq!(recorder.stage, stage);
            self.log.borrow_mut().push(Event::Record(stage, frame.slot));
            Ok(())
        }
    }

    fn setup(slots: usize) -> (FrameOrchestrator<MockBackend>, MockStages, Log) {
        crate::foundation::logging::init_for_tests();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let config = RendererConfig::default().with_max_frames_in_flight(slots);
        let schedule = FrameSchedule::new(config.voxels.lod_count);
        let orchestrator = FrameOrchestrator::new(MockBackend::new(slots, log.clone()), schedule, &config).unwrap();
        (orchestrator, MockStages { log: log.clone() }, log)
    }

    #[test]
    fn test_slots_rotate() {
        let (mut orchestrator, mut stages, _log) = setup(2);
        let slots: Vec<usize> = (0..5).map(|_| orchestrator.draw_frame(&mut stages).slot).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(orchestrator.frame_count(), 5);
        assert_eq!(orchestrator.next_slot(), 1);
    }

    #[test]
    fn test_fences_waited_before_slot_is_rewritten() {
        // The mock panics if a slot is recorded while its fences are in flight
        let (mut orchestrator, mut stages, log) = setup(2);
        for _ in 0..6 {
            orchestrator.draw_frame(&mut stages);
        }

        let events = log.borrow();
        let first_record = events.iter().position(|e| matches!(e, Event::Record(_, 0))).unwrap();
        let first_wait = events.iter().position(|e| *e == Event::Wait(0)).unwrap();
        let first_reset = events.iter().position(|e| *e == Event::Reset(0)).unwrap();
        let first_acquire = events.iter().position(|e| *e == Event::Acquire(0)).unwrap();
        assert!(first_wait < first_acquire);
        assert!(first_acquire < first_reset);
        assert!(first_reset < first_record);
    }

    #[test]
    fn test_every_fence_is_in_flight_after_a_frame() {
        let (mut orchestrator, mut stages, _log) = setup(2);
        orchestrator.draw_frame(&mut stages);
        let backend = orchestrator.backend();
        for fence in FenceName::ALL {
            assert_eq!(backend.in_flight.get(&(0, fence)), Some(&1));
        }
        assert!(backend.unsignaled.is_empty());
    }

    #[test]
    #[should_panic(expected = "in-flight fence")]
    fn test_reused_slot_without_signaled_fences_is_caught() {
        let (mut orchestrator, mut stages, _log) = setup(1);
        orchestrator.backend_mut().skip_fence_waits = true;
        orchestrator.draw_frame(&mut stages);
        orchestrator.draw_frame(&mut stages);
    }

    #[test]
    fn test_frame_submission_order() {
        let (mut orchestrator, mut stages, log) = setup(2);
        let state = orchestrator.draw_frame(&mut stages);

        let submitted: Vec<FrameStage> = log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Submit(stage, _, _) => Some(*stage),
                _ => None,
            })
            .collect();
        let planned: Vec<FrameStage> = orchestrator.schedule().submissions().iter().map(|s| s.stage).collect();
        assert_eq!(submitted, planned);
        assert_eq!(submitted[0], FrameStage::Clear);
        assert_eq!(submitted[1], FrameStage::Voxelize(VoxelAxis::Z));
        assert_eq!(*submitted.last().unwrap(), FrameStage::Composite);
        assert_eq!(log.borrow().last(), Some(&Event::Present(0, state.image_index)));
    }

    #[test]
    fn test_composite_waits_on_voxels_and_gbuffer() {
        let (orchestrator, _stages, _log) = setup(2);
        let composite = orchestrator
            .schedule()
            .submissions()
            .iter()
            .find(|s| s.stage == FrameStage::Composite)
            .unwrap();
        let waits: Vec<SignalName> = composite.waits.iter().map(|w| w.semaphore).collect();
        assert!(waits.contains(&SignalName::VoxelDone(VoxelAxis::X)));
        assert!(waits.contains(&SignalName::GBufferDone));
    }

    #[test]
    fn test_image_index_follows_acquire() {
        let (mut orchestrator, mut stages, _log) = setup(2);
        let images: Vec<u32> = (0..4).map(|_| orchestrator.draw_frame(&mut stages).image_index).collect();
        assert_eq!(images, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_timeout_is_reported() {
        let (mut orchestrator, mut stages, log) = setup(2);
        orchestrator.backend_mut().stall_after_waits = Some(1);
        orchestrator.draw_frame(&mut stages);

        let result = orchestrator.try_draw_frame(&mut stages);
        assert!(matches!(result, Err(VulkanError::FenceTimeout { .. })));
        assert_eq!(orchestrator.frame_count(), 1);
        assert!(!log.borrow().iter().any(|e| matches!(e, Event::Record(_, 1))));
    }

    #[test]
    #[should_panic(expected = "frame 0 failed")]
    fn test_timeout_is_fatal() {
        let (mut orchestrator, mut stages, _log) = setup(2);
        orchestrator.backend_mut().stall_after_waits = Some(0);
        orchestrator.draw_frame(&mut stages);
    }

    #[test]
    fn test_slot_count_must_match_config() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let config = RendererConfig::default().with_max_frames_in_flight(3);
        let schedule = FrameSchedule::new(config.voxels.lod_count);
        let result = FrameOrchestrator::new(MockBackend::new(2, log), schedule, &config);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }
}

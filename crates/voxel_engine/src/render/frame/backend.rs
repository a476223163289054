//! Submission backend
//!
//! [`FrameBackend`] is the seam between the frame orchestrator and the GPU: it
//! owns the fences, semaphores and command buffers of every frame slot and
//! turns a [`StageSubmission`] into a queue submission. The orchestrator only
//! speaks in slots and names, so its ordering rules can be exercised without a
//! device.

use std::collections::HashMap;

use ash::vk;
use slotmap::{new_key_type, SlotMap};

use crate::render::backends::vulkan::{
    CommandRecorder, Fence, GpuDevice, QueueRole, Semaphore, SwapchainTarget, VulkanError, VulkanResult,
};

use super::schedule::{FenceName, FrameSchedule, FrameStage, SemaphoreId, SignalName, StageSubmission};

/// GPU side of frame orchestration
pub trait FrameBackend {
    /// Recorder handed to stages
    type Recorder;

    /// Number of frame slots the backend holds objects for
    fn slot_count(&self) -> usize;

    /// Block until the named fences of `slot` signal, giving up after `timeout_ns`
    fn wait_fences(&mut self, slot: usize, fences: &[FenceName], timeout_ns: u64) -> VulkanResult<()>;

    /// Reset the named fences of `slot` to unsignaled
    fn reset_fences(&mut self, slot: usize, fences: &[FenceName]) -> VulkanResult<()>;

    /// Acquire the next presentable image, signaling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> VulkanResult<u32>;

    /// Start recording `stage` for `slot`
    fn begin(&mut self, slot: usize, stage: FrameStage) -> VulkanResult<Self::Recorder>;

    /// Finish `recorder` and submit it with the submission's waits, signals and fence
    fn submit(&mut self, slot: usize, submission: &StageSubmission, recorder: Self::Recorder) -> VulkanResult<()>;

    /// Present `image_index` once the slot's render-done semaphore signals
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;
}

new_key_type! {
    /// Key of a semaphore in the backend arena
    pub struct SemaphoreKey;
    /// Key of a fence in the backend arena
    pub struct FenceKey;
}

/// [`FrameBackend`] over a real device and swapchain
pub struct VulkanFrameBackend<'a> {
    gpu: &'a GpuDevice,
    swapchain: &'a SwapchainTarget,
    slot_count: usize,
    acquire_timeout_ns: u64,
    semaphores: SlotMap<SemaphoreKey, Semaphore>,
    fences: SlotMap<FenceKey, Fence>,
    semaphore_keys: HashMap<SemaphoreId, SemaphoreKey>,
    fence_keys: HashMap<(usize, FenceName), FenceKey>,
    command_buffers: HashMap<FrameStage, Vec<vk::CommandBuffer>>,
}

impl<'a> VulkanFrameBackend<'a> {
    /// Create the semaphores, fences and command buffers of `slot_count` slots
    ///
    /// Fences start signaled so the first wait on each slot returns at once.
    pub fn new(
        gpu: &'a GpuDevice,
        swapchain: &'a SwapchainTarget,
        schedule: &FrameSchedule,
        slot_count: usize,
        acquire_timeout_ns: u64,
    ) -> VulkanResult<Self> {
        if slot_count == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "frame backend needs at least one slot".to_string(),
            });
        }

        let device = gpu.device();
        let mut semaphores = SlotMap::with_key();
        let mut fences = SlotMap::with_key();
        let mut semaphore_keys = HashMap::new();
        let mut fence_keys = HashMap::new();

        for slot in 0..slot_count {
            for name in schedule.semaphores() {
                let key = semaphores.insert(Semaphore::new(device.clone())?);
                semaphore_keys.insert(SemaphoreId { name, slot }, key);
            }
            for name in FenceName::ALL {
                let key = fences.insert(Fence::new(device.clone(), true)?);
                fence_keys.insert((slot, name), key);
            }
        }

        let mut command_buffers = HashMap::new();
        for submission in schedule.submissions() {
            let pool = gpu.command_pool(submission.queue);
            command_buffers.insert(submission.stage, pool.allocate_command_buffers(slot_count as u32)?);
        }

        log::debug!(
            "Frame backend created: {} slots, {} semaphores, {} fences, {} command buffers",
            slot_count,
            semaphores.len(),
            fences.len(),
            command_buffers.len() * slot_count
        );

        Ok(Self {
            gpu,
            swapchain,
            slot_count,
            acquire_timeout_ns,
            semaphores,
            fences,
            semaphore_keys,
            fence_keys,
            command_buffers,
        })
    }

    fn semaphore(&self, slot: usize, name: SignalName) -> VulkanResult<vk::Semaphore> {
        self.semaphore_keys
            .get(&SemaphoreId { name, slot })
            .and_then(|key| self.semaphores.get(*key))
            .map(Semaphore::handle)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no semaphore {:?} for slot {}", name, slot),
            })
    }

    fn fence(&self, slot: usize, name: FenceName) -> VulkanResult<&Fence> {
        self.fence_keys
            .get(&(slot, name))
            .and_then(|key| self.fences.get(*key))
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no fence {:?} for slot {}", name, slot),
            })
    }

    fn command_buffer(&self, slot: usize, stage: FrameStage) -> VulkanResult<vk::CommandBuffer> {
        self.command_buffers
            .get(&stage)
            .and_then(|buffers| buffers.get(slot))
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("stage {:?} has no command buffer for slot {}", stage, slot),
            })
    }
}

impl FrameBackend for VulkanFrameBackend<'_> {
    type Recorder = CommandRecorder;

    fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn wait_fences(&mut self, slot: usize, fences: &[FenceName], timeout_ns: u64) -> VulkanResult<()> {
        for name in fences {
            self.fence(slot, *name)?.wait(timeout_ns).map_err(|e| {
                log::error!("Fence {:?} of slot {} did not signal: {}", name, slot, e);
                e
            })?;
        }
        Ok(())
    }

    fn reset_fences(&mut self, slot: usize, fences: &[FenceName]) -> VulkanResult<()> {
        for name in fences {
            self.fence(slot, *name)?.reset()?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> VulkanResult<u32> {
        let image_available = self.semaphore(slot, SignalName::ImageAvailable)?;
        self.swapchain.acquire_next_image(image_available, self.acquire_timeout_ns)
    }

    fn begin(&mut self, slot: usize, stage: FrameStage) -> VulkanResult<CommandRecorder> {
        let mut recorder = CommandRecorder::new(self.command_buffer(slot, stage)?, self.gpu.device().clone());
        recorder.begin()?;
        Ok(recorder)
    }

    fn submit(&mut self, slot: usize, submission: &StageSubmission, recorder: CommandRecorder) -> VulkanResult<()> {
        let command_buffers = [recorder.end()?];

        let mut wait_semaphores = Vec::with_capacity(submission.waits.len());
        let mut wait_stages = Vec::with_capacity(submission.waits.len());
        for wait in &submission.waits {
            wait_semaphores.push(self.semaphore(slot, wait.semaphore)?);
            wait_stages.push(wait.stage);
        }
        let signal_semaphores = submission
            .signals
            .iter()
            .map(|name| self.semaphore(slot, *name))
            .collect::<VulkanResult<Vec<_>>>()?;
        let fence = match submission.fence {
            Some(name) => self.fence(slot, name)?.handle(),
            None => vk::Fence::null(),
        };

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.gpu
                .device()
                .queue_submit(self.gpu.queue(submission.queue), &[submit_info.build()], fence)
                .map_err(|e| {
                    log::error!("Submitting {:?} for slot {} failed: {:?}", submission.stage, slot, e);
                    VulkanError::Api(e)
                })
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let render_done = self.semaphore(slot, SignalName::RenderDone)?;
        self.swapchain.present(self.gpu.present_queue(), image_index, render_done)
    }
}

impl Drop for VulkanFrameBackend<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            log::warn!("Device did not go idle before frame backend teardown: {}", e);
        }
        for (stage, buffers) in self.command_buffers.drain() {
            let role: QueueRole = stage.queue();
            self.gpu.command_pool(role).free_command_buffers(&buffers);
        }
        log::debug!("Frame backend dropped");
    }
}

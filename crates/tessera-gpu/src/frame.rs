//! Frame pacing protocol.
//!
//! [`FramePipeliner`] drives one frame at a time through a [`FrameBackend`]:
//!
//! 1. wait on the slot's fence
//! 2. acquire an image (out-of-date: recreate and abandon the frame)
//! 3. reset the fence
//! 4. record the slot's command buffer, calling back into the client
//! 5. submit, signalling the slot's fence
//! 6. present (out-of-date, suboptimal or a pending resize: recreate)
//! 7. advance to the next slot and forget the bound pipeline
//!
//! The fence is only reset once an image has been acquired, so an abandoned
//! frame never leaves a slot waiting on work that was not submitted.

use crate::error::Result;
use crate::swapchain::{AcquireOutcome, PresentOutcome};
use crate::swapchain_manager::RecreateOutcome;
use ash::vk;

/// Pipeline currently bound on the command buffer being recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundPipeline(Option<vk::Pipeline>);

impl BoundPipeline {
    /// Currently bound pipeline.
    pub fn get(&self) -> Option<vk::Pipeline> {
        self.0
    }

    /// Mark `pipeline` as bound. Returns `false` if it already was, in which
    /// case no bind command needs recording.
    pub fn bind(&mut self, pipeline: vk::Pipeline) -> bool {
        if self.0 == Some(pipeline) {
            return false;
        }
        self.0 = Some(pipeline);
        true
    }

    /// Forget the bound pipeline.
    pub fn clear(&mut self) {
        self.0 = None;
    }
}

/// Where a slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence observed signaled; no GPU work outstanding.
    Idle,
    /// Waiting for the swapchain to hand out an image.
    Acquiring,
    /// Command buffer is being recorded.
    Recording,
    /// Work submitted; fence will signal on completion.
    Submitted,
}

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Submitted and presented; `recreated` if the swapchain was rebuilt
    /// during the frame.
    Presented { recreated: bool },
    /// Acquire reported out-of-date; nothing was submitted.
    Abandoned,
    /// A recreation is waiting for a non-zero framebuffer.
    Paused,
}

/// Counters for the frames driven so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub fence_waits: u64,
    pub presents: u64,
    pub abandoned: u64,
    pub recreations: u64,
}

/// The GPU side of the frame protocol.
///
/// Slots are indices in `0..slot_count()`. `Frame` is handed to the record
/// callback between `begin_recording` and `end_recording`.
pub trait FrameBackend {
    /// Recording handle given to the client.
    type Frame;

    fn slot_count(&self) -> usize;

    /// Block until the slot's previous submission has finished.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Return the slot's fence to unsignaled.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    /// Reset the command buffer and open the render pass on `image_index`.
    fn begin_recording(
        &mut self,
        slot: usize,
        image_index: u32,
        bound: BoundPipeline,
    ) -> Result<Self::Frame>;

    /// Close the render pass and command buffer.
    fn end_recording(&mut self, slot: usize, frame: Self::Frame) -> Result<BoundPipeline>;

    fn submit(&mut self, slot: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    fn recreate_swapchain(&mut self) -> Result<RecreateOutcome>;
}

/// Drives frames round-robin over a fixed number of slots.
pub struct FramePipeliner {
    current_slot: usize,
    slot_states: Vec<SlotState>,
    bound: BoundPipeline,
    resize_requested: bool,
    recreate_pending: bool,
    paused: bool,
    stats: FrameStats,
}

impl FramePipeliner {
    /// Create a pipeliner for `slot_count` frames in flight.
    pub fn new(slot_count: usize) -> Self {
        Self {
            current_slot: 0,
            slot_states: vec![SlotState::Idle; slot_count.max(1)],
            bound: BoundPipeline::default(),
            resize_requested: false,
            recreate_pending: false,
            paused: false,
            stats: FrameStats::default(),
        }
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slot_states.len()
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slot_states[slot]
    }

    /// Bound-pipeline cache; empty between frames.
    pub fn bound_pipeline(&self) -> BoundPipeline {
        self.bound
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Record that the surface changed size; honoured after the next present.
    pub fn notify_resized(&mut self) {
        self.resize_requested = true;
    }

    /// Rebuild the swapchain before the next frame touches any slot.
    pub fn request_recreate(&mut self) {
        self.recreate_pending = true;
    }

    /// Whether the last recreation was deferred for a zero-area framebuffer.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Run one frame.
    ///
    /// `record` is called once, inside the render pass, if an image was
    /// acquired.
    pub fn draw_frame<B, F>(&mut self, backend: &mut B, record: F) -> Result<FrameStatus>
    where
        B: FrameBackend,
        F: FnOnce(&mut B::Frame),
    {
        let mut recreated = false;
        if self.recreate_pending {
            if !self.recreate(backend)? {
                return Ok(FrameStatus::Paused);
            }
            recreated = true;
        }

        let slot = self.current_slot;

        backend.wait_for_slot(slot)?;
        self.stats.fence_waits += 1;
        self.slot_states[slot] = SlotState::Idle;

        self.slot_states[slot] = SlotState::Acquiring;
        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired { image_index, .. } => image_index,
            AcquireOutcome::OutOfDate => {
                // Fence still signaled, so the slot is immediately reusable.
                self.slot_states[slot] = SlotState::Idle;
                self.stats.abandoned += 1;
                tracing::debug!(slot, "Swapchain out of date on acquire");
                self.recreate(backend)?;
                return Ok(FrameStatus::Abandoned);
            }
        };

        backend.reset_slot(slot)?;

        self.slot_states[slot] = SlotState::Recording;
        self.bound.clear();
        let mut frame = backend.begin_recording(slot, image_index, self.bound)?;
        record(&mut frame);
        self.bound = backend.end_recording(slot, frame)?;

        backend.submit(slot)?;
        self.slot_states[slot] = SlotState::Submitted;

        let outcome = backend.present(slot, image_index)?;
        self.stats.presents += 1;

        let resized = std::mem::take(&mut self.resize_requested);
        if outcome.needs_recreate() || resized {
            tracing::debug!(?outcome, resized, "Recreating swapchain after present");
            recreated |= self.recreate(backend)?;
        }

        self.current_slot = (slot + 1) % self.slot_states.len();
        self.bound.clear();

        Ok(FrameStatus::Presented { recreated })
    }

    fn recreate<B: FrameBackend>(&mut self, backend: &mut B) -> Result<bool> {
        match backend.recreate_swapchain()? {
            RecreateOutcome::Recreated => {
                // The new swapchain already matches the current size.
                self.resize_requested = false;
                self.recreate_pending = false;
                self.paused = false;
                self.stats.recreations += 1;
                Ok(true)
            }
            RecreateOutcome::Deferred => {
                self.recreate_pending = true;
                self.paused = true;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Begin(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate,
    }

    struct MockFrame {
        bound: BoundPipeline,
        binds_recorded: u32,
    }

    impl MockFrame {
        fn bind(&mut self, pipeline: vk::Pipeline) {
            if self.bound.bind(pipeline) {
                self.binds_recorded += 1;
            }
        }
    }

    /// Synthetic swapchain whose GPU finishes work as soon as it is waited on.
    struct MockBackend {
        slots: usize,
        images: u32,
        next_image: u32,
        fence_signaled: Vec<bool>,
        in_use: Vec<bool>,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        zero_area: bool,
        binds_per_frame: Vec<u32>,
        log: Vec<Event>,
    }

    impl MockBackend {
        fn new(slots: usize, images: u32) -> Self {
            Self {
                slots,
                images,
                next_image: 0,
                fence_signaled: vec![true; slots],
                in_use: vec![false; slots],
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                zero_area: false,
                binds_per_frame: Vec::new(),
                log: Vec::new(),
            }
        }

        fn count(&self, event: fn(&Event) -> bool) -> usize {
            self.log.iter().filter(|e| event(e)).count()
        }
    }

    impl FrameBackend for MockBackend {
        type Frame = MockFrame;

        fn slot_count(&self) -> usize {
            self.slots
        }

        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.log.push(Event::Wait(slot));
            self.in_use[slot] = false;
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.log.push(Event::Acquire(slot));
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            assert!(self.fence_signaled[slot], "reset of unsignaled fence");
            self.log.push(Event::Reset(slot));
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn begin_recording(
            &mut self,
            slot: usize,
            image_index: u32,
            bound: BoundPipeline,
        ) -> Result<MockFrame> {
            assert!(!self.in_use[slot], "slot {slot} reused while in flight");
            self.log.push(Event::Begin(slot, image_index));
            Ok(MockFrame {
                bound,
                binds_recorded: 0,
            })
        }

        fn end_recording(&mut self, _slot: usize, frame: MockFrame) -> Result<BoundPipeline> {
            self.binds_per_frame.push(frame.binds_recorded);
            Ok(frame.bound)
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.log.push(Event::Submit(slot));
            self.in_use[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.log.push(Event::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn recreate_swapchain(&mut self) -> Result<RecreateOutcome> {
            if self.zero_area {
                return Ok(RecreateOutcome::Deferred);
            }
            self.log.push(Event::Recreate);
            Ok(RecreateOutcome::Recreated)
        }
    }

    #[test]
    fn five_frames_over_two_slots_and_three_images() {
        let mut backend = MockBackend::new(2, 3);
        let mut pipeliner = FramePipeliner::new(backend.slot_count());

        let mut slots_after = Vec::new();
        for _ in 0..5 {
            let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
            assert_eq!(status, FrameStatus::Presented { recreated: false });
            slots_after.push(pipeliner.current_slot());
        }

        assert_eq!(slots_after, vec![1, 0, 1, 0, 1]);
        assert_eq!(pipeliner.stats().presents, 5);
        assert_eq!(pipeliner.stats().fence_waits, 5);
        assert_eq!(pipeliner.stats().recreations, 0);

        let presented: Vec<u32> = backend
            .log
            .iter()
            .filter_map(|e| match e {
                Event::Present(_, image) => Some(*image),
                _ => None,
            })
            .collect();
        assert_eq!(presented, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn protocol_order_within_a_frame() {
        let mut backend = MockBackend::new(2, 3);
        let mut pipeliner = FramePipeliner::new(2);
        pipeliner.draw_frame(&mut backend, |_| {}).unwrap();

        assert_eq!(
            backend.log,
            vec![
                Event::Wait(0),
                Event::Acquire(0),
                Event::Reset(0),
                Event::Begin(0, 0),
                Event::Submit(0),
                Event::Present(0, 0),
            ]
        );
        assert_eq!(pipeliner.slot_state(0), SlotState::Submitted);
        assert_eq!(pipeliner.slot_state(1), SlotState::Idle);
    }

    #[test]
    fn every_slot_is_waited_on_before_reuse() {
        let mut backend = MockBackend::new(3, 2);
        let mut pipeliner = FramePipeliner::new(3);
        for _ in 0..10 {
            pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
        }

        // Every Begin(slot) is preceded by Wait(slot) since that slot's last Submit.
        let mut waited = [true; 3];
        for event in &backend.log {
            match *event {
                Event::Wait(slot) => waited[slot] = true,
                Event::Submit(slot) => waited[slot] = false,
                Event::Begin(slot, _) => assert!(waited[slot]),
                _ => {}
            }
        }
    }

    #[test]
    fn out_of_date_acquire_abandons_without_reset() {
        let mut backend = MockBackend::new(2, 3);
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let mut pipeliner = FramePipeliner::new(2);

        let mut recorded = false;
        let status = pipeliner
            .draw_frame(&mut backend, |_| recorded = true)
            .unwrap();

        assert_eq!(status, FrameStatus::Abandoned);
        assert!(!recorded);
        assert_eq!(pipeliner.current_slot(), 0);
        assert_eq!(pipeliner.slot_state(0), SlotState::Idle);
        assert_eq!(backend.count(|e| matches!(e, Event::Reset(_))), 0);
        assert_eq!(backend.count(|e| matches!(e, Event::Submit(_))), 0);
        assert_eq!(pipeliner.stats().recreations, 1);
        assert_eq!(pipeliner.stats().abandoned, 1);

        // The same slot is usable straight away.
        let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: false });
        assert_eq!(pipeliner.current_slot(), 1);
    }

    #[test]
    fn suboptimal_present_and_resize_recreate_after_frame() {
        let mut backend = MockBackend::new(2, 3);
        backend.present_script.push_back(PresentOutcome::Suboptimal);
        backend.present_script.push_back(PresentOutcome::OutOfDate);
        let mut pipeliner = FramePipeliner::new(2);

        for _ in 0..2 {
            let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
            assert_eq!(status, FrameStatus::Presented { recreated: true });
        }

        pipeliner.notify_resized();
        let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: true });

        // Flag is consumed.
        let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: false });
        assert_eq!(pipeliner.stats().recreations, 3);
        assert_eq!(pipeliner.stats().presents, 4);
    }

    #[test]
    fn zero_area_pauses_until_resized() {
        let mut backend = MockBackend::new(2, 3);
        backend.zero_area = true;
        let mut pipeliner = FramePipeliner::new(2);

        pipeliner.notify_resized();
        let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: false });
        assert!(pipeliner.is_paused());

        let waits = backend.count(|e| matches!(e, Event::Wait(_)));
        for _ in 0..3 {
            let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
            assert_eq!(status, FrameStatus::Paused);
        }
        assert_eq!(backend.count(|e| matches!(e, Event::Wait(_))), waits);

        // Restoring the window delivers a resize before the next redraw.
        backend.zero_area = false;
        pipeliner.notify_resized();
        let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: true });
        assert!(!pipeliner.is_paused());
        assert_eq!(pipeliner.stats().recreations, 1);
        assert_eq!(backend.count(|e| matches!(e, Event::Recreate)), 1);

        let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();
        assert_eq!(status, FrameStatus::Presented { recreated: false });
        assert_eq!(pipeliner.stats().recreations, 1);
    }

    #[test]
    fn requested_recreate_runs_before_next_frame() {
        let mut backend = MockBackend::new(2, 3);
        let mut pipeliner = FramePipeliner::new(2);

        pipeliner.request_recreate();
        assert!(!pipeliner.is_paused());
        let status = pipeliner.draw_frame(&mut backend, |_| {}).unwrap();

        assert_eq!(status, FrameStatus::Presented { recreated: true });
        assert_eq!(backend.log[0], Event::Recreate);
        assert_eq!(backend.log[1], Event::Wait(0));
        assert_eq!(pipeliner.stats().recreations, 1);
    }

    #[test]
    fn bound_pipeline_cache_resets_every_frame() {
        let mut backend = MockBackend::new(2, 3);
        let mut pipeliner = FramePipeliner::new(2);
        let pipeline = vk::Pipeline::from_raw(7);

        for _ in 0..3 {
            pipeliner
                .draw_frame(&mut backend, |frame| {
                    frame.bind(pipeline);
                    frame.bind(pipeline);
                })
                .unwrap();
            assert_eq!(pipeliner.bound_pipeline().get(), None);
        }

        // One real bind per frame, the repeat is elided.
        assert_eq!(backend.binds_per_frame, vec![1, 1, 1]);
    }

    #[test]
    fn bound_pipeline_tracks_changes() {
        let mut bound = BoundPipeline::default();
        let a = vk::Pipeline::from_raw(1);
        let b = vk::Pipeline::from_raw(2);
        assert!(bound.bind(a));
        assert!(!bound.bind(a));
        assert!(bound.bind(b));
        assert_eq!(bound.get(), Some(b));
        bound.clear();
        assert!(bound.bind(b));
    }
}

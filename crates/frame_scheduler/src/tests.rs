use std::collections::VecDeque;
use std::convert::Infallible;

use headless_backend::{FenceRegistry, HeadlessDevice, HeadlessDeviceConfig};
use render_protocol::{
    BufferId, BufferInfo, BufferModifier, FenceFd, FrameRenderer, PixelFormat, PresentError,
    PresentEvent, PresentableBuffer, PresentationBackend, Submission,
};

use super::*;

/// Consumer that holds on to every buffer until the producer runs dry, then
/// hands back the oldest one per blocking dispatch.
struct HoardingPresenter {
    explicit_sync: bool,
    fences: FenceRegistry,
    next_buffer: u64,
    on_screen: VecDeque<PresentableBuffer>,
    pending_callbacks: usize,
    release_dispatches: usize,
    destroyed: usize,
    last_release_fence: Option<i32>,
}

impl HoardingPresenter {
    fn new(explicit_sync: bool, fences: &FenceRegistry) -> Self {
        Self {
            explicit_sync,
            fences: fences.clone(),
            next_buffer: 0,
            on_screen: VecDeque::new(),
            pending_callbacks: 0,
            release_dispatches: 0,
            destroyed: 0,
            last_release_fence: None,
        }
    }
}

impl PresentationBackend for HoardingPresenter {
    fn supports_explicit_sync(&self) -> bool {
        self.explicit_sync
    }

    fn import_buffer(&mut self, _buffer: &BufferInfo) -> Result<PresentableBuffer, PresentError> {
        self.next_buffer += 1;
        Ok(PresentableBuffer::from_raw(self.next_buffer))
    }

    fn destroy_buffer(&mut self, _buffer: PresentableBuffer) {
        self.destroyed += 1;
    }

    fn submit(&mut self, submission: Submission) -> Result<(), PresentError> {
        if let Some(fence) = submission.acquire_fence {
            self.fences.wait_descriptor(&fence).expect("acquire fence");
            self.fences.close_descriptor(fence);
        }
        self.on_screen.push_back(submission.buffer);
        if submission.frame_callback {
            self.pending_callbacks += 1;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PresentError> {
        Ok(())
    }

    fn dispatch(&mut self) -> Result<Vec<PresentEvent>, PresentError> {
        if self.pending_callbacks > 0 {
            self.pending_callbacks -= 1;
            return Ok(vec![PresentEvent::FrameDone {
                presented_frames: self.on_screen.len() as u64,
            }]);
        }
        let Some(buffer) = self.on_screen.pop_front() else {
            return Ok(vec![PresentEvent::Closed]);
        };
        self.release_dispatches += 1;
        let fence = self.explicit_sync.then(|| {
            let handle = self.fences.create(true);
            let descriptor = self.fences.export(&handle).expect("export release fence");
            self.fences.destroy(handle);
            descriptor
        });
        self.last_release_fence = fence.as_ref().map(FenceFd::as_raw);
        Ok(vec![PresentEvent::Released { buffer, fence }])
    }

    fn dispatch_pending(&mut self) -> Result<Vec<PresentEvent>, PresentError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingRenderer {
    targets: Vec<BufferId>,
}

impl FrameRenderer<HeadlessDevice> for RecordingRenderer {
    type Error = Infallible;

    fn render_frame(
        &mut self,
        _device: &mut HeadlessDevice,
        target: &BufferInfo,
    ) -> Result<(), Infallible> {
        self.targets.push(target.id);
        Ok(())
    }
}

fn pool_config(explicit_sync: bool, unbounded: bool) -> PoolConfig {
    PoolConfig {
        width: 64,
        height: 64,
        format: PixelFormat::Xrgb8888,
        modifier: BufferModifier::Linear,
        explicit_sync,
        unbounded,
    }
}

struct Harness {
    fences: FenceRegistry,
    device: HeadlessDevice,
    presenter: HoardingPresenter,
}

impl Harness {
    fn new(explicit_sync: bool) -> Self {
        let fences = FenceRegistry::new();
        Self {
            device: HeadlessDevice::new(HeadlessDeviceConfig::default(), fences.clone()),
            presenter: HoardingPresenter::new(explicit_sync, &fences),
            fences,
        }
    }

    fn pool(&mut self, config: PoolConfig) -> BufferPool {
        BufferPool::populate(config, &mut self.device, &mut self.presenter).expect("populate pool")
    }
}

fn slot_index(pool: &BufferPool, target: BufferId) -> usize {
    pool.slots()
        .iter()
        .position(|slot| slot.buffer().id == target)
        .expect("target belongs to the pool")
}

#[test]
fn populate_imports_every_slot() {
    let mut harness = Harness::new(false);
    let pool = harness.pool(pool_config(false, false));
    assert_eq!(pool.slots().len(), POOL_SIZE);
    assert!(pool.slots().iter().all(|slot| slot.state() == SlotState::Free));
    assert!(pool.slots().iter().all(|slot| slot.presentable().is_some()));
    assert_eq!(harness.device.live_buffers(), POOL_SIZE);

    pool.teardown(&mut harness.device, &mut harness.presenter);
    assert_eq!(harness.device.live_buffers(), 0);
    assert_eq!(harness.presenter.destroyed, POOL_SIZE);
}

#[test]
fn populate_failure_releases_created_slots() {
    let fences = FenceRegistry::new();
    let mut device = HeadlessDevice::new(
        HeadlessDeviceConfig {
            memory_limit_bytes: Some(2 * 64 * 64 * 4),
            ..HeadlessDeviceConfig::default()
        },
        fences.clone(),
    );
    let mut presenter = HoardingPresenter::new(false, &fences);
    let error = BufferPool::populate(pool_config(false, false), &mut device, &mut presenter)
        .expect_err("third buffer exceeds the limit");
    assert!(matches!(error, PoolError::Allocation { slot: 2, .. }));
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(presenter.destroyed, 2);
}

#[test]
fn fifth_acquisition_blocks_until_a_release() {
    let mut harness = Harness::new(false);
    let mut pool = harness.pool(pool_config(false, false));
    for expected in 0..POOL_SIZE {
        let acquired = pool.acquire().expect("free slot");
        assert_eq!(acquired.index, expected);
        let presentable = pool.slot(acquired.index).presentable().expect("imported");
        harness
            .presenter
            .on_screen
            .push_back(presentable);
        pool.mark_submitted(acquired.index);
    }
    assert!(pool.acquire().is_none());

    let acquired = pool
        .acquire_blocking(&mut harness.presenter)
        .expect("blocking acquire");
    assert_eq!(acquired.index, 0);
    assert!(acquired.release_fence.is_none());
    assert_eq!(harness.presenter.release_dispatches, 1);
}

#[test]
fn explicit_release_fence_is_handed_back() {
    let mut harness = Harness::new(true);
    let mut pool = harness.pool(pool_config(true, false));
    for _ in 0..POOL_SIZE {
        let acquired = pool.acquire().expect("free slot");
        let presentable = pool.slot(acquired.index).presentable().expect("imported");
        harness.presenter.on_screen.push_back(presentable);
        pool.mark_submitted(acquired.index);
    }

    let acquired = pool
        .acquire_blocking(&mut harness.presenter)
        .expect("blocking acquire");
    assert_eq!(acquired.index, 0);
    let fence = acquired.release_fence.expect("release fence");
    assert_eq!(Some(fence.as_raw()), harness.presenter.last_release_fence);
    assert_eq!(pool.slot(0).state(), SlotState::Free);
    assert!(!pool.slot(0).has_release_fence());
    harness.fences.close_descriptor(fence);
}

#[test]
fn release_with_fence_leaves_slot_pending() {
    let mut harness = Harness::new(true);
    let mut pool = harness.pool(pool_config(true, false));
    let acquired = pool.acquire().expect("free slot");
    pool.mark_submitted(acquired.index);
    let handle = harness.fences.create(false);
    let fence = harness.fences.export(&handle).expect("export");
    pool.release(acquired.index, Some(fence));
    assert_eq!(pool.slot(0).state(), SlotState::ReleasePending);

    // A pending slot is still the first candidate.
    let again = pool.acquire().expect("pending slot is acquirable");
    assert_eq!(again.index, 0);
    assert!(again.release_fence.is_some());
}

#[test]
#[should_panic(expected = "released while Free")]
fn releasing_a_free_slot_panics() {
    let mut harness = Harness::new(false);
    let mut pool = harness.pool(pool_config(false, false));
    pool.release(1, None);
}

#[test]
#[should_panic(expected = "submitted while InUse")]
fn resubmitting_an_in_use_slot_panics() {
    let mut harness = Harness::new(false);
    let mut pool = harness.pool(pool_config(false, false));
    pool.mark_submitted(0);
    pool.mark_submitted(0);
}

#[test]
#[should_panic(expected = "already holds a pending release fence")]
fn second_pending_fence_panics() {
    let mut harness = Harness::new(true);
    let mut pool = harness.pool(pool_config(true, true));
    let first = harness.fences.create(false);
    let second = harness.fences.create(false);
    pool.mark_submitted(0);
    pool.release(0, Some(harness.fences.export(&first).expect("export")));
    pool.release(0, Some(harness.fences.export(&second).expect("export")));
}

#[test]
fn six_frames_cycle_through_the_pool() {
    let mut harness = Harness::new(false);
    let pool = harness.pool(pool_config(false, false));
    let mut scheduler = FrameScheduler::new(SchedulerConfig::default(), pool);
    let mut renderer = RecordingRenderer::default();

    let mut used = Vec::new();
    for _ in 0..6 {
        let slot = scheduler
            .render_frame(&mut harness.device, &mut harness.presenter, &mut renderer)
            .expect("render frame");
        used.push(slot);
    }
    assert_eq!(used, [0, 1, 2, 3, 0, 1]);
    let rendered: Vec<usize> = renderer
        .targets
        .iter()
        .map(|target| slot_index(scheduler.pool(), *target))
        .collect();
    assert_eq!(rendered, used);
    assert_eq!(harness.presenter.release_dispatches, 2);
    assert_eq!(scheduler.frames(), 6);
}

#[test]
fn explicit_sync_frames_leave_no_fences_behind() {
    let mut harness = Harness::new(true);
    let pool = harness.pool(pool_config(true, false));
    let mut scheduler = FrameScheduler::new(
        SchedulerConfig {
            explicit_sync: true,
            unbounded: false,
        },
        pool,
    );
    let mut renderer = RecordingRenderer::default();
    let frames = scheduler
        .run(
            &mut harness.device,
            &mut harness.presenter,
            &mut renderer,
            &CancellationToken::new(),
            Some(6),
        )
        .expect("run");
    assert_eq!(frames, 6);
    assert_eq!(harness.fences.open_descriptors(), 0);
    assert_eq!(harness.fences.live_fences(), 0);

    scheduler.teardown(&mut harness.device, &mut harness.presenter);
    assert_eq!(harness.device.live_buffers(), 0);
}

#[test]
fn unbounded_mode_redraws_slot_zero_without_dispatch() {
    let mut harness = Harness::new(false);
    let pool = harness.pool(pool_config(false, true));
    let mut scheduler = FrameScheduler::new(
        SchedulerConfig {
            explicit_sync: false,
            unbounded: true,
        },
        pool,
    );
    let mut renderer = RecordingRenderer::default();
    for _ in 0..5 {
        let slot = scheduler
            .render_frame(&mut harness.device, &mut harness.presenter, &mut renderer)
            .expect("render frame");
        assert_eq!(slot, 0);
    }
    assert_eq!(harness.presenter.pending_callbacks, 0);
    assert_eq!(harness.presenter.release_dispatches, 0);
}

#[test]
fn first_frame_without_a_buffer_is_fatal() {
    let mut harness = Harness::new(false);
    let mut pool = harness.pool(pool_config(false, false));
    for index in 0..POOL_SIZE {
        pool.mark_submitted(index);
    }
    let mut scheduler = FrameScheduler::new(SchedulerConfig::default(), pool);
    let error = scheduler
        .render_frame(
            &mut harness.device,
            &mut harness.presenter,
            &mut RecordingRenderer::default(),
        )
        .expect_err("every slot is in use");
    assert!(matches!(error, FrameError::FirstBufferUnavailable));
}

#[test]
fn cancelled_run_renders_nothing() {
    let mut harness = Harness::new(false);
    let pool = harness.pool(pool_config(false, false));
    let mut scheduler = FrameScheduler::new(SchedulerConfig::default(), pool);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut renderer = RecordingRenderer::default();
    let frames = scheduler
        .run(
            &mut harness.device,
            &mut harness.presenter,
            &mut renderer,
            &cancel,
            None,
        )
        .expect("run");
    assert_eq!(frames, 0);
    assert!(renderer.targets.is_empty());
}

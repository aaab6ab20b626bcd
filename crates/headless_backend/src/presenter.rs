use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use render_protocol::{
    BufferInfo, FenceFd, PresentError, PresentEvent, PresentableBuffer, PresentationBackend,
    Submission,
};
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::fences::FenceRegistry;

const REQUEST_QUEUE_CAPACITY: usize = 64;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenterConfig {
    pub refresh_rate_hz: f64,
    pub explicit_sync: bool,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 60.0,
            explicit_sync: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PresenterStartError {
    #[error("refresh rate {0} Hz is not a positive finite number")]
    InvalidRefreshRate(f64),
    #[error("spawn compositor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

enum CompositorRequest {
    Import(PresentableBuffer),
    Destroy(PresentableBuffer),
    Commit(Submission),
}

/// Client end of an in-process compositor running on its own thread.
///
/// Submissions queue up locally until `flush`; events produced by the
/// compositor are only observed through `dispatch`/`dispatch_pending`.
pub struct HeadlessPresenter {
    config: PresenterConfig,
    fences: FenceRegistry,
    requests: Producer<CompositorRequest>,
    outgoing: VecDeque<CompositorRequest>,
    events: Receiver<PresentEvent>,
    imported: HashSet<PresentableBuffer>,
    next_buffer: u64,
    stop_requested: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl HeadlessPresenter {
    pub fn start(config: PresenterConfig, fences: FenceRegistry) -> Result<Self, PresenterStartError> {
        if !config.refresh_rate_hz.is_finite() || config.refresh_rate_hz <= 0.0 {
            return Err(PresenterStartError::InvalidRefreshRate(config.refresh_rate_hz));
        }
        let (requests, request_consumer) = RingBuffer::new(REQUEST_QUEUE_CAPACITY);
        let (event_sender, events) = crossbeam_channel::unbounded();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let worker_stop_requested = Arc::clone(&stop_requested);
        let refresh_interval = Duration::from_secs_f64(1.0 / config.refresh_rate_hz);
        let compositor_fences = fences.clone();

        let join_handle = std::thread::Builder::new()
            .name("headless_compositor".to_owned())
            .spawn(move || {
                let mut compositor = Compositor::new(compositor_fences, event_sender);
                compositor.run(refresh_interval, worker_stop_requested, request_consumer);
            })?;
        log::info!(
            "headless compositor at {:.1} Hz, explicit sync {}",
            config.refresh_rate_hz,
            if config.explicit_sync { "on" } else { "off" }
        );

        Ok(Self {
            config,
            fences,
            requests,
            outgoing: VecDeque::new(),
            events,
            imported: HashSet::new(),
            next_buffer: 0,
            stop_requested,
            join_handle: Some(join_handle),
        })
    }

    fn enqueue(&mut self, request: CompositorRequest) {
        self.outgoing.push_back(request);
    }

    fn drain_events(&mut self, events: &mut Vec<PresentEvent>) {
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    if events.last().is_none_or(|event| !matches!(event, PresentEvent::Closed)) {
                        events.push(PresentEvent::Closed);
                    }
                    return;
                }
            }
        }
    }
}

impl PresentationBackend for HeadlessPresenter {
    fn supports_explicit_sync(&self) -> bool {
        self.config.explicit_sync
    }

    fn import_buffer(&mut self, buffer: &BufferInfo) -> Result<PresentableBuffer, PresentError> {
        if buffer.width == 0 || buffer.height == 0 {
            return Err(PresentError::ImportFailed(format!(
                "buffer {:?} has no pixels",
                buffer.id
            )));
        }
        self.next_buffer += 1;
        let presentable = PresentableBuffer::from_raw(self.next_buffer);
        self.imported.insert(presentable);
        self.enqueue(CompositorRequest::Import(presentable));
        Ok(presentable)
    }

    fn destroy_buffer(&mut self, buffer: PresentableBuffer) {
        if !self.imported.remove(&buffer) {
            log::warn!("destroying unknown presentable buffer {buffer:?}");
            return;
        }
        self.enqueue(CompositorRequest::Destroy(buffer));
        if let Err(error) = self.flush() {
            log::debug!("destroy of {buffer:?} not delivered: {error}");
        }
    }

    fn submit(&mut self, submission: Submission) -> Result<(), PresentError> {
        let rejection = if !self.imported.contains(&submission.buffer) {
            Some(PresentError::UnknownBuffer(submission.buffer))
        } else if submission.acquire_fence.is_some() && !self.config.explicit_sync {
            Some(PresentError::ExplicitSyncUnsupported)
        } else {
            None
        };
        if let Some(error) = rejection {
            // The descriptor was handed over with the submission.
            if let Some(fence) = submission.acquire_fence {
                self.fences.close_descriptor(fence);
            }
            return Err(error);
        }
        self.enqueue(CompositorRequest::Commit(submission));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PresentError> {
        while let Some(request) = self.outgoing.pop_front() {
            let mut pending = request;
            loop {
                match self.requests.push(pending) {
                    Ok(()) => break,
                    Err(PushError::Full(returned)) => {
                        if self.requests.is_abandoned() {
                            return Err(PresentError::Disconnected);
                        }
                        pending = returned;
                        std::thread::yield_now();
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self) -> Result<Vec<PresentEvent>, PresentError> {
        self.flush()?;
        let first = self.events.recv().map_err(|_| PresentError::Disconnected)?;
        let mut events = vec![first];
        self.drain_events(&mut events);
        Ok(events)
    }

    fn dispatch_pending(&mut self) -> Result<Vec<PresentEvent>, PresentError> {
        self.flush()?;
        let mut events = Vec::new();
        self.drain_events(&mut events);
        Ok(events)
    }
}

impl Drop for HeadlessPresenter {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
        if let Some(join_handle) = self.join_handle.take() {
            if join_handle.join().is_err() {
                log::error!("headless compositor thread panicked");
            }
        }
    }
}

struct Commit {
    buffer: PresentableBuffer,
    acquire_fence: Option<FenceFd>,
    frame_callback: bool,
}

struct Compositor {
    fences: FenceRegistry,
    events: Sender<PresentEvent>,
    imported: HashSet<PresentableBuffer>,
    pending: Option<Commit>,
    /// Buffer on screen and whether its commit used explicit sync.
    displayed: Option<(PresentableBuffer, bool)>,
    frame_callback_requested: bool,
    /// Release fences signaled once the next refresh has flipped away.
    release_fences: Vec<render_protocol::FenceHandle>,
    presented_frames: u64,
}

impl Compositor {
    fn new(fences: FenceRegistry, events: Sender<PresentEvent>) -> Self {
        Self {
            fences,
            events,
            imported: HashSet::new(),
            pending: None,
            displayed: None,
            frame_callback_requested: false,
            release_fences: Vec::new(),
            presented_frames: 0,
        }
    }

    fn run(
        &mut self,
        refresh_interval: Duration,
        stop_requested: Arc<AtomicBool>,
        mut requests: Consumer<CompositorRequest>,
    ) {
        let mut next_refresh = Instant::now() + refresh_interval;
        while !stop_requested.load(Ordering::Acquire) {
            while let Ok(request) = requests.pop() {
                self.apply(request);
            }
            let now = Instant::now();
            if now < next_refresh {
                std::thread::sleep(IDLE_SLEEP.min(next_refresh - now));
                continue;
            }
            next_refresh += refresh_interval;
            if next_refresh < now {
                next_refresh = now + refresh_interval;
            }
            if !self.refresh() {
                break;
            }
        }
        self.shutdown();
    }

    fn apply(&mut self, request: CompositorRequest) {
        match request {
            CompositorRequest::Import(buffer) => {
                self.imported.insert(buffer);
            }
            CompositorRequest::Destroy(buffer) => {
                self.imported.remove(&buffer);
                if self.displayed.is_some_and(|(displayed, _)| displayed == buffer) {
                    self.displayed = None;
                }
            }
            CompositorRequest::Commit(submission) => {
                let commit = Commit {
                    buffer: submission.buffer,
                    acquire_fence: submission.acquire_fence,
                    frame_callback: submission.frame_callback,
                };
                if let Some(replaced) = self.pending.replace(commit) {
                    // Superseded before reaching the screen.
                    if let Some(fence) = replaced.acquire_fence {
                        self.fences.close_descriptor(fence);
                    }
                    let on_screen = self.displayed.is_some_and(|(buffer, _)| buffer == replaced.buffer);
                    let still_pending = self
                        .pending
                        .as_ref()
                        .is_some_and(|pending| pending.buffer == replaced.buffer);
                    if !on_screen && !still_pending {
                        self.send(PresentEvent::Released {
                            buffer: replaced.buffer,
                            fence: None,
                        });
                    }
                    self.frame_callback_requested |= replaced.frame_callback;
                }
            }
        }
    }

    /// One display refresh. Returns false once the client is gone.
    fn refresh(&mut self) -> bool {
        for fence in self.release_fences.drain(..) {
            if let Err(error) = self.fences.signal(&fence) {
                log::warn!("signal release fence: {error}");
            }
            self.fences.destroy(fence);
        }

        if let Some(commit) = self.pending.take() {
            let explicit = commit.acquire_fence.is_some();
            if let Some(fence) = commit.acquire_fence {
                if let Err(error) = self.fences.wait_descriptor(&fence) {
                    log::warn!("acquire fence wait failed: {error}");
                }
                self.fences.close_descriptor(fence);
            }
            self.presented_frames += 1;
            self.frame_callback_requested |= commit.frame_callback;
            if let Some((previous, previous_explicit)) =
                self.displayed.replace((commit.buffer, explicit))
            {
                if previous != commit.buffer && !self.release(previous, previous_explicit) {
                    return false;
                }
            }
        }

        if std::mem::take(&mut self.frame_callback_requested) {
            return self.send(PresentEvent::FrameDone {
                presented_frames: self.presented_frames,
            });
        }
        true
    }

    fn release(&mut self, buffer: PresentableBuffer, explicit: bool) -> bool {
        if !self.imported.contains(&buffer) {
            return true;
        }
        let fence = if explicit {
            let handle = self.fences.create(false);
            match self.fences.export(&handle) {
                Ok(descriptor) => {
                    self.release_fences.push(handle);
                    Some(descriptor)
                }
                Err(error) => {
                    log::warn!("export release fence: {error}");
                    self.fences.destroy(handle);
                    None
                }
            }
        } else {
            None
        };
        self.send(PresentEvent::Released { buffer, fence })
    }

    fn send(&self, event: PresentEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn shutdown(&mut self) {
        if let Some(commit) = self.pending.take() {
            if let Some(fence) = commit.acquire_fence {
                self.fences.close_descriptor(fence);
            }
        }
        for fence in self.release_fences.drain(..) {
            self.fences.destroy(fence);
        }
        self.fences.signal_all();
        let _ = self.events.send(PresentEvent::Closed);
        log::debug!("headless compositor stopped after {} frames", self.presented_frames);
    }
}

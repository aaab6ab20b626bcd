use std::error::Error;

use render_protocol::{
    BufferAllocator, FenceError, FenceFd, FenceProvider, FrameRenderer, PresentError,
    PresentationBackend, Submission,
};

use crate::cancel::CancellationToken;
use crate::pool::{AcquiredSlot, BufferPool};
use crate::statistics::FrameStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerConfig {
    pub explicit_sync: bool,
    /// Submit without waiting for frame callbacks and keep drawing into
    /// slot 0.
    pub unbounded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("no window buffer available for the first frame")]
    FirstBufferUnavailable,
    #[error("presentation: {0}")]
    Present(#[from] PresentError),
    #[error("fence: {0}")]
    Fence(#[from] FenceError),
    #[error("render: {0}")]
    Render(#[source] Box<dyn Error + Send + Sync>),
}

/// Drives the produce/submit/wait cycle over a `BufferPool`.
#[derive(Debug)]
pub struct FrameScheduler {
    config: SchedulerConfig,
    pool: BufferPool,
    statistics: FrameStatistics,
}

impl FrameScheduler {
    pub fn new(config: SchedulerConfig, pool: BufferPool) -> Self {
        if config.unbounded {
            log::warn!("unbounded mode: slot 0 is redrawn while it may be on screen");
        }
        Self {
            config,
            pool,
            statistics: FrameStatistics::new(),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn frames(&self) -> u64 {
        self.statistics.frames()
    }

    fn acquire<P>(&mut self, presenter: &mut P) -> Result<AcquiredSlot, FrameError>
    where
        P: PresentationBackend + ?Sized,
    {
        if let Some(acquired) = self.pool.acquire() {
            return Ok(acquired);
        }
        if self.frames() == 0 {
            return Err(FrameError::FirstBufferUnavailable);
        }
        Ok(self.pool.acquire_blocking(presenter)?)
    }

    /// Renders one frame into a free slot and submits it. Returns the slot
    /// index that was used.
    pub fn render_frame<D, P, R>(
        &mut self,
        device: &mut D,
        presenter: &mut P,
        renderer: &mut R,
    ) -> Result<usize, FrameError>
    where
        D: BufferAllocator + FenceProvider + ?Sized,
        P: PresentationBackend + ?Sized,
        R: FrameRenderer<D> + ?Sized,
    {
        let AcquiredSlot {
            index,
            release_fence,
        } = self.acquire(presenter)?;
        if let Some(fence) = release_fence {
            let waited = device.wait_descriptor(&fence);
            device.close_descriptor(fence);
            waited?;
        }

        let slot = self.pool.slot(index);
        let target = slot.buffer().clone();
        let presentable = slot
            .presentable()
            .ok_or(PresentError::Disconnected)?;
        renderer
            .render_frame(device, &target)
            .map_err(|error| FrameError::Render(Box::new(error)))?;

        let acquire_fence = if self.config.explicit_sync {
            Some(Self::acquire_fence(device)?)
        } else {
            None
        };
        presenter.submit(Submission {
            buffer: presentable,
            acquire_fence,
            frame_callback: !self.config.unbounded,
        })?;
        self.pool.mark_submitted(index);

        if self.config.unbounded {
            presenter.flush()?;
        } else {
            self.wait_for_frame_callback(presenter)?;
        }

        if let Some(report) = self.statistics.frame_completed() {
            log::info!("{report}");
        }
        Ok(index)
    }

    /// Fence covering the rendering just issued, as a descriptor for the
    /// consumer. The local fence is not needed past the duplication.
    fn acquire_fence<D>(device: &mut D) -> Result<FenceFd, FenceError>
    where
        D: FenceProvider + ?Sized,
    {
        let fence = device.create_fence()?;
        let descriptor = device.dup_as_descriptor(&fence);
        device.destroy_fence(fence);
        descriptor
    }

    fn wait_for_frame_callback<P>(&mut self, presenter: &mut P) -> Result<(), FrameError>
    where
        P: PresentationBackend + ?Sized,
    {
        loop {
            let summary = self.pool.apply_events(presenter.dispatch()?);
            if summary.frame_done {
                return Ok(());
            }
            if summary.closed {
                return Err(PresentError::Disconnected.into());
            }
        }
    }

    /// Renders until cancelled or `frame_limit` frames are done. The final
    /// throughput report is emitted however the loop ends.
    pub fn run<D, P, R>(
        &mut self,
        device: &mut D,
        presenter: &mut P,
        renderer: &mut R,
        cancel: &CancellationToken,
        frame_limit: Option<u64>,
    ) -> Result<u64, FrameError>
    where
        D: BufferAllocator + FenceProvider + ?Sized,
        P: PresentationBackend + ?Sized,
        R: FrameRenderer<D> + ?Sized,
    {
        let result = loop {
            if cancel.is_cancelled() {
                log::info!("render loop cancelled after {} frames", self.frames());
                break Ok(self.frames());
            }
            if frame_limit.is_some_and(|limit| self.frames() >= limit) {
                break Ok(self.frames());
            }
            if let Err(error) = self.render_frame(device, presenter, renderer) {
                break Err(error);
            }
        };
        if let Some(report) = self.statistics.report(true) {
            log::info!("{report}");
        }
        result
    }

    pub fn teardown<D, P>(self, device: &mut D, presenter: &mut P)
    where
        D: BufferAllocator + FenceProvider + ?Sized,
        P: PresentationBackend + ?Sized,
    {
        self.pool.teardown(device, presenter);
    }
}

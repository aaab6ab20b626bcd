use render_protocol::{
    AllocationError, BufferAllocator, BufferInfo, BufferModifier, BufferRequest, BufferRole,
    FenceFd, FenceProvider, PixelFormat, PresentError, PresentEvent, PresentableBuffer,
    PresentationBackend,
};

pub const POOL_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Free,
    /// Submitted and owned by the presentation consumer.
    InUse,
    /// Released with a fence that must signal before the next write.
    ReleasePending,
}

#[derive(Debug)]
pub struct BufferSlot {
    buffer: BufferInfo,
    presentable: Option<PresentableBuffer>,
    state: SlotState,
    release_fence: Option<FenceFd>,
}

impl BufferSlot {
    pub fn buffer(&self) -> &BufferInfo {
        &self.buffer
    }

    pub fn presentable(&self) -> Option<PresentableBuffer> {
        self.presentable
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn has_release_fence(&self) -> bool {
        self.release_fence.is_some()
    }
}

/// A slot handed to the producer. A carried release fence must be waited on
/// and closed before writing into the buffer.
#[derive(Debug)]
#[must_use]
pub struct AcquiredSlot {
    pub index: usize,
    pub release_fence: Option<FenceFd>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub modifier: BufferModifier,
    pub explicit_sync: bool,
    /// Always hand out slot 0, even while the consumer still scans it out.
    pub unbounded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("allocate window buffer {slot}: {source}")]
    Allocation {
        slot: usize,
        #[source]
        source: AllocationError,
    },
    #[error("import window buffer {slot}: {source}")]
    Import {
        slot: usize,
        #[source]
        source: PresentError,
    },
}

/// What a batch of presentation events amounted to besides slot releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSummary {
    pub frame_done: bool,
    pub closed: bool,
}

/// Fixed set of window buffers shared between the producer loop and the
/// presentation consumer.
#[derive(Debug)]
pub struct BufferPool {
    config: PoolConfig,
    slots: Vec<BufferSlot>,
}

impl BufferPool {
    /// Allocates and imports every slot. A failure tears down the slots
    /// created so far.
    pub fn populate<D, P>(
        config: PoolConfig,
        device: &mut D,
        presenter: &mut P,
    ) -> Result<Self, PoolError>
    where
        D: BufferAllocator + FenceProvider + ?Sized,
        P: PresentationBackend + ?Sized,
    {
        let mut pool = Self {
            config,
            slots: Vec::with_capacity(POOL_SIZE),
        };
        for slot in 0..POOL_SIZE {
            let buffer = match device.allocate(&BufferRequest {
                role: BufferRole::WindowBuffer,
                format: config.format,
                modifier: config.modifier,
                width: config.width,
                height: config.height,
            }) {
                Ok(buffer) => buffer,
                Err(source) => {
                    pool.teardown(device, presenter);
                    return Err(PoolError::Allocation { slot, source });
                }
            };
            let presentable = match presenter.import_buffer(&buffer) {
                Ok(presentable) => presentable,
                Err(source) => {
                    device.destroy(buffer.id);
                    pool.teardown(device, presenter);
                    return Err(PoolError::Import { slot, source });
                }
            };
            log::debug!(
                "window buffer {slot}: {}x{}, modifier {:?}",
                buffer.width,
                buffer.height,
                buffer.modifier
            );
            pool.slots.push(BufferSlot {
                buffer,
                presentable: Some(presentable),
                state: SlotState::Free,
                release_fence: None,
            });
        }
        Ok(pool)
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn slots(&self) -> &[BufferSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> &BufferSlot {
        &self.slots[index]
    }

    /// Non-blocking scan for a writable slot. `None` means every slot is
    /// still owned by the consumer.
    pub fn acquire(&mut self) -> Option<AcquiredSlot> {
        let index = if self.config.unbounded {
            if self.slots.is_empty() {
                return None;
            }
            if self.slots[0].state == SlotState::InUse {
                log::debug!("reusing slot 0 while the consumer still holds it");
            }
            0
        } else {
            self.slots.iter().position(|slot| {
                matches!(slot.state, SlotState::Free | SlotState::ReleasePending)
            })?
        };
        let slot = &mut self.slots[index];
        let release_fence = slot.release_fence.take();
        if slot.state == SlotState::ReleasePending {
            slot.state = SlotState::Free;
        }
        Some(AcquiredSlot {
            index,
            release_fence,
        })
    }

    /// Blocks in the consumer's event dispatch until a slot frees up.
    pub fn acquire_blocking<P>(&mut self, presenter: &mut P) -> Result<AcquiredSlot, PresentError>
    where
        P: PresentationBackend + ?Sized,
    {
        loop {
            if let Some(acquired) = self.acquire() {
                return Ok(acquired);
            }
            let summary = self.apply_events(presenter.dispatch()?);
            if summary.closed {
                return Err(PresentError::Disconnected);
            }
        }
    }

    pub fn mark_submitted(&mut self, index: usize) {
        let unbounded = self.config.unbounded;
        let slot = &mut self.slots[index];
        assert!(
            unbounded || slot.state == SlotState::Free,
            "slot {index} submitted while {:?}",
            slot.state
        );
        slot.state = SlotState::InUse;
    }

    pub fn release(&mut self, index: usize, fence: Option<FenceFd>) {
        let config = self.config;
        let slot = &mut self.slots[index];
        assert!(
            config.unbounded || slot.state == SlotState::InUse,
            "slot {index} released while {:?}",
            slot.state
        );
        match fence {
            Some(fence) => {
                assert!(
                    config.explicit_sync,
                    "release fence for slot {index} without explicit sync"
                );
                assert!(
                    slot.release_fence.is_none(),
                    "slot {index} already holds a pending release fence"
                );
                slot.release_fence = Some(fence);
                slot.state = SlotState::ReleasePending;
            }
            None => slot.state = SlotState::Free,
        }
    }

    pub fn slot_for(&self, presentable: PresentableBuffer) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.presentable == Some(presentable))
    }

    pub fn apply_events(&mut self, events: Vec<PresentEvent>) -> EventSummary {
        let mut summary = EventSummary::default();
        for event in events {
            match event {
                PresentEvent::Released { buffer, fence } => match self.slot_for(buffer) {
                    Some(index) => self.release(index, fence),
                    None => log::warn!("release for unknown buffer {buffer:?}"),
                },
                PresentEvent::FrameDone { presented_frames } => {
                    log::trace!("frame done, {presented_frames} presented");
                    summary.frame_done = true;
                }
                PresentEvent::Closed => summary.closed = true,
            }
        }
        summary
    }

    /// Releases every slot in reverse order: consumer token, pending fence,
    /// then the buffer itself.
    pub fn teardown<D, P>(mut self, device: &mut D, presenter: &mut P)
    where
        D: BufferAllocator + FenceProvider + ?Sized,
        P: PresentationBackend + ?Sized,
    {
        while let Some(slot) = self.slots.pop() {
            if let Some(presentable) = slot.presentable {
                presenter.destroy_buffer(presentable);
            }
            if let Some(fence) = slot.release_fence {
                device.close_descriptor(fence);
            }
            device.destroy(slot.buffer.id);
        }
    }
}

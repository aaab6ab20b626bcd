use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use render_protocol::{FenceError, FenceFd, FenceHandle};

const FIRST_DESCRIPTOR: i32 = 100;

#[derive(Debug)]
struct FenceState {
    signaled: bool,
    /// Handles plus descriptors still referring to this fence.
    refs: u32,
}

#[derive(Debug, Default)]
struct FenceTable {
    next_fence: u64,
    next_descriptor: i32,
    fences: HashMap<u64, FenceState>,
    descriptors: HashMap<i32, u64>,
}

impl FenceTable {
    fn insert(&mut self, signaled: bool) -> u64 {
        self.next_fence += 1;
        let id = self.next_fence;
        self.fences.insert(id, FenceState { signaled, refs: 1 });
        id
    }

    fn export(&mut self, id: u64) -> Result<FenceFd, FenceError> {
        let state = self.fences.get_mut(&id).ok_or(FenceError::UnknownFence(id))?;
        state.refs += 1;
        if self.next_descriptor < FIRST_DESCRIPTOR {
            self.next_descriptor = FIRST_DESCRIPTOR;
        }
        let raw = self.next_descriptor;
        self.next_descriptor = self.next_descriptor.checked_add(1).unwrap_or(FIRST_DESCRIPTOR);
        self.descriptors.insert(raw, id);
        FenceFd::from_raw(raw).ok_or(FenceError::InvalidDescriptor(raw))
    }

    fn unref(&mut self, id: u64) {
        let Some(state) = self.fences.get_mut(&id) else {
            panic!("fence {id} released more often than referenced");
        };
        state.refs -= 1;
        if state.refs == 0 {
            self.fences.remove(&id);
        }
    }

    fn resolve(&self, descriptor: &FenceFd) -> Result<u64, FenceError> {
        self.descriptors
            .get(&descriptor.as_raw())
            .copied()
            .ok_or(FenceError::InvalidDescriptor(descriptor.as_raw()))
    }
}

/// Software sync objects shared by the device and the compositor thread.
#[derive(Debug, Clone, Default)]
pub struct FenceRegistry {
    shared: Arc<(Mutex<FenceTable>, Condvar)>,
}

impl FenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, FenceTable> {
        self.shared
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(&self, signaled: bool) -> FenceHandle {
        FenceHandle::from_raw(self.table().insert(signaled))
    }

    pub fn signal(&self, fence: &FenceHandle) -> Result<(), FenceError> {
        let mut table = self.table();
        let state = table
            .fences
            .get_mut(&fence.raw())
            .ok_or(FenceError::UnknownFence(fence.raw()))?;
        state.signaled = true;
        self.shared.1.notify_all();
        Ok(())
    }

    pub fn wait(&self, fence: &FenceHandle) -> Result<(), FenceError> {
        self.wait_id(fence.raw())
    }

    pub fn destroy(&self, fence: FenceHandle) {
        self.table().unref(fence.raw());
    }

    pub fn export(&self, fence: &FenceHandle) -> Result<FenceFd, FenceError> {
        self.table().export(fence.raw())
    }

    pub fn wait_descriptor(&self, descriptor: &FenceFd) -> Result<(), FenceError> {
        let id = self.table().resolve(descriptor)?;
        self.wait_id(id)
    }

    pub fn close_descriptor(&self, descriptor: FenceFd) {
        let raw = descriptor.into_raw();
        let mut table = self.table();
        let removed = table.descriptors.remove(&raw);
        match removed {
            Some(id) => table.unref(id),
            None => log::warn!("closing unknown fence descriptor {raw}"),
        }
    }

    /// Signals every live fence so no waiter outlives the compositor.
    pub fn signal_all(&self) {
        let mut table = self.table();
        for state in table.fences.values_mut() {
            state.signaled = true;
        }
        self.shared.1.notify_all();
    }

    pub fn live_fences(&self) -> usize {
        self.table().fences.len()
    }

    pub fn open_descriptors(&self) -> usize {
        self.table().descriptors.len()
    }

    fn wait_id(&self, id: u64) -> Result<(), FenceError> {
        let mut table = self.table();
        loop {
            let signaled = table.fences.get(&id).map(|state| state.signaled);
            match signaled {
                None => return Err(FenceError::UnknownFence(id)),
                Some(true) => return Ok(()),
                Some(false) => {
                    table = self
                        .shared
                        .1
                        .wait(table)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }
    }
}

/// Raw descriptor value meaning "no fence" at the descriptor boundary.
pub const NO_FENCE_FD: i32 = -1;

/// A completion fence created and owned by the producer.
///
/// Not `Clone`: a fence is destroyed exactly once through the
/// `FenceProvider` that created it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct FenceHandle(u64);

impl FenceHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A fence exported as an integer descriptor for cross-process signaling.
///
/// Passing a `FenceFd` by value transfers ownership of the descriptor. Keeping
/// a copy requires an explicit `FenceProvider::dup_as_descriptor`.
#[must_use = "fence descriptors must be waited on, handed off or closed"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct FenceFd(i32);

impl FenceFd {
    /// Wraps a raw descriptor. `NO_FENCE_FD` and other negative values yield
    /// `None`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        if raw < 0 {
            return None;
        }
        Some(Self(raw))
    }

    pub fn as_raw(&self) -> i32 {
        self.0
    }

    pub fn into_raw(self) -> i32 {
        self.0
    }
}

//! Window buffer pool and the frame loop that feeds it to the presentation
//! consumer.

mod cancel;
mod pool;
mod scheduler;
mod statistics;

pub use cancel::CancellationToken;
pub use pool::{
    AcquiredSlot, BufferPool, BufferSlot, EventSummary, POOL_SIZE, PoolConfig, PoolError,
    SlotState,
};
pub use scheduler::{FrameError, FrameScheduler, SchedulerConfig};
pub use statistics::{FrameReport, FrameStatistics, REPORT_INTERVAL};

#[cfg(test)]
mod tests;

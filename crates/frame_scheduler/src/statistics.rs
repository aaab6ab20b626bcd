use std::fmt;
use std::time::{Duration, Instant};

pub const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Throughput over the frames rendered since timing restarted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub frames: u64,
    pub elapsed: Duration,
}

impl FrameReport {
    pub fn fps(&self) -> f64 {
        self.frames as f64 / self.elapsed.as_secs_f64()
    }
}

impl fmt::Display for FrameReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "Rendered {:5} frames in {:.3} sec ({:.3} fps)",
            self.frames,
            self.elapsed.as_secs_f64(),
            self.fps()
        )
    }
}

/// Frame counter with periodic throughput reports. Timing restarts once the
/// first frame completes so start-up cost does not skew the rate.
#[derive(Debug, Clone)]
pub struct FrameStatistics {
    interval: Duration,
    frames: u64,
    start: Instant,
    last_report: Instant,
}

impl FrameStatistics {
    pub fn new() -> Self {
        Self::with_interval(REPORT_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            frames: 0,
            start: now,
            last_report: now,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Counts one finished frame and returns a report when one is due.
    pub fn frame_completed(&mut self) -> Option<FrameReport> {
        self.frames += 1;
        if self.frames == 1 {
            let now = Instant::now();
            self.start = now;
            self.last_report = now;
            return None;
        }
        self.report(false)
    }

    /// Builds a report when the interval elapsed, or unconditionally with
    /// `force`. Nothing is reported before any time has passed.
    pub fn report(&mut self, force: bool) -> Option<FrameReport> {
        let now = Instant::now();
        if !force && now.duration_since(self.last_report) <= self.interval {
            return None;
        }
        let elapsed = now.duration_since(self.start);
        if elapsed.is_zero() {
            return None;
        }
        self.last_report = now;
        Some(FrameReport {
            frames: self.frames.saturating_sub(1),
            elapsed,
        })
    }
}

impl Default for FrameStatistics {
    fn default() -> Self {
        Self::new()
    }
}

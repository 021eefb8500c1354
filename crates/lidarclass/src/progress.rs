use crate::error::Stage;
use log::info;
use std::time::{Duration, Instant};

/// Rate-limited progress lines for one streaming pass.
pub(crate) struct Progress {
    stage: Stage,
    total: u64,
    start: Instant,
    last: Instant,
}

impl Progress {
    const MIN_INTERVAL: Duration = Duration::from_millis(200);

    pub(crate) fn new(stage: Stage, total: u64) -> Self {
        let now = Instant::now();
        Self {
            stage,
            total: total.max(1),
            start: now,
            last: now,
        }
    }

    /// Log `done` points if at least 200 ms have passed since the last line.
    pub(crate) fn update(&mut self, done: u64) {
        if self.last.elapsed() < Self::MIN_INTERVAL {
            return;
        }
        self.last = Instant::now();

        let rate = self.rate_mps(done);
        let remaining = self.total.saturating_sub(done) as f64;
        let eta = if rate > 0.0 {
            remaining / (rate * 1_000_000.0)
        } else {
            0.0
        };

        info!(
            "{}: {:.1}% | {:.2}M pts/s | ETA {:.0}s",
            self.stage,
            done as f64 / self.total as f64 * 100.0,
            rate,
            eta
        );
    }

    /// Million points per second since the pass started.
    #[inline]
    pub(crate) fn rate_mps(&self, done: u64) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64().max(1e-9);
        done as f64 / 1_000_000.0 / elapsed
    }

    #[inline]
    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

//! Progress tracker
//!
//! Counts resolved samples and smooths throughput with an exponential moving
//! average over batch completions. A slow batch or a backoff wait between two
//! completions pulls the rate down, so the ETA reacts to slowdowns.
//!
//! Samples resolved by an earlier run count toward `processed` but never
//! toward throughput.

use sbe_common::events::ProgressReport;
use std::time::Duration;
use tokio::time::Instant;

/// Default EMA smoothing factor
pub const DEFAULT_ALPHA: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    prior_succeeded: usize,
    prior_skipped: usize,
    succeeded: usize,
    skipped: usize,
    pending_retry: usize,
    started_at: Instant,
    last_completion: Instant,
    /// Samples/second; `None` until the first batch completes
    smoothed_rate: Option<f64>,
    alpha: f64,
}

impl ProgressTracker {
    /// Tracker for a run over `total` samples, `prior_*` of which were
    /// resolved before this run started
    pub fn new(total: usize, prior_succeeded: usize, prior_skipped: usize) -> Self {
        Self::with_alpha(total, prior_succeeded, prior_skipped, DEFAULT_ALPHA)
    }

    pub fn with_alpha(total: usize, prior_succeeded: usize, prior_skipped: usize, alpha: f64) -> Self {
        let now = Instant::now();
        Self {
            total,
            prior_succeeded,
            prior_skipped,
            succeeded: 0,
            skipped: 0,
            pending_retry: 0,
            started_at: now,
            last_completion: now,
            smoothed_rate: None,
            alpha: alpha.clamp(f64::EPSILON, 1.0),
        }
    }

    /// Resolve samples without an external call (cache hits, local failures)
    ///
    /// Counts toward this run's totals but not toward throughput.
    pub fn record_resolved_locally(&mut self, succeeded: usize, skipped: usize) {
        self.succeeded += succeeded;
        self.skipped += skipped;
    }

    /// Record one finished Analyze call and feed the rate average
    ///
    /// A call that resolved nothing (recoverable failure) feeds a rate of 0.
    pub fn record_batch(&mut self, succeeded: usize, skipped: usize) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_completion).as_secs_f64();
        self.last_completion = now;
        self.succeeded += succeeded;
        self.skipped += skipped;

        if dt <= 0.0 {
            return;
        }
        let sample = (succeeded + skipped) as f64 / dt;
        self.smoothed_rate = Some(match self.smoothed_rate {
            None => sample,
            Some(rate) => self.alpha * sample + (1.0 - self.alpha) * rate,
        });
    }

    pub fn set_pending_retry(&mut self, pending: usize) {
        self.pending_retry = pending;
    }

    pub fn processed(&self) -> usize {
        self.prior_succeeded + self.prior_skipped + self.succeeded + self.skipped
    }

    pub fn processed_this_run(&self) -> usize {
        self.succeeded + self.skipped
    }

    /// Samples/second, `None` before the first timed batch
    pub fn rate(&self) -> Option<f64> {
        self.smoothed_rate
    }

    pub fn report(&self) -> ProgressReport {
        let processed = self.processed().min(self.total);
        let remaining = self.total - processed;

        let percentage = if self.total == 0 {
            100.0
        } else {
            processed as f64 / self.total as f64 * 100.0
        };

        let eta = if remaining == 0 {
            Some(Duration::ZERO)
        } else {
            match self.smoothed_rate {
                Some(rate) if rate > 0.0 => Duration::try_from_secs_f64(remaining as f64 / rate).ok(),
                _ => None,
            }
        };

        ProgressReport {
            processed,
            processed_this_run: self.processed_this_run(),
            total: self.total,
            percentage,
            eta,
            elapsed: self.started_at.elapsed(),
            succeeded: self.prior_succeeded + self.succeeded,
            skipped: self.prior_skipped + self.skipped,
            pending_retry: self.pending_retry,
        }
    }
}

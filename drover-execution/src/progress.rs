//! Progress tracking and reporting for workers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One accepted progress report
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub message: Option<String>,
}

/// Turns completed work units into a percentage of the total.
///
/// Percent is `completed / total * 100`, clamped to `[0, 100]` and never
/// lower than a value it already returned. A tracker with no work reports
/// 100 from the start.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: f64,
    completed: f64,
    percent: f64,
}

impl ProgressTracker {
    pub fn new(total: f64) -> Self {
        let empty = !total.is_finite() || total <= 0.0;
        Self {
            total: if empty { 0.0 } else { total },
            completed: 0.0,
            percent: if empty { 100.0 } else { 0.0 },
        }
    }

    /// Tracker whose total is the sum of `units`
    pub fn for_units<I>(units: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        Self::new(units.into_iter().filter(|u| u.is_finite() && *u > 0.0).sum())
    }

    /// Record `amount` more completed work and return the new percent
    pub fn advance(&mut self, amount: f64) -> f64 {
        if amount.is_finite() && amount > 0.0 && self.total > 0.0 {
            self.completed += amount;
            let raw = (self.completed / self.total * 100.0).clamp(0.0, 100.0);
            self.percent = self.percent.max(raw);
        }
        self.percent
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn is_done(&self) -> bool {
        self.percent >= 100.0
    }
}

/// Hands worker progress to whoever supervises the worker.
///
/// Non-increasing and non-finite values are ignored, so the stream of
/// updates a receiver sees is strictly increasing within `[0, 100]`.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<ProgressUpdate>,
    last: Arc<AtomicU64>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let reporter = Self {
            sender,
            last: Arc::new(AtomicU64::new((-1.0f64).to_bits())),
        };
        (reporter, receiver)
    }

    /// Report progress. Returns false if the value was ignored.
    pub fn report(&self, percent: f64, message: Option<String>) -> bool {
        if !percent.is_finite() {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0);
        let accepted = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                (percent > f64::from_bits(bits)).then_some(percent.to_bits())
            })
            .is_ok();
        if accepted {
            // A dropped receiver means nobody is listening any more.
            let _ = self.sender.send(ProgressUpdate { percent, message });
        }
        accepted
    }

    pub fn report_tracker(&self, tracker: &ProgressTracker, message: Option<String>) -> bool {
        self.report(tracker.percent(), message)
    }

    /// Last accepted percent, if any
    pub fn last_percent(&self) -> Option<f64> {
        let last = f64::from_bits(self.last.load(Ordering::SeqCst));
        (last >= 0.0).then_some(last)
    }
}

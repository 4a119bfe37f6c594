//! Run counters and the event stream consumed by the presentation layer.

use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;

/// Counters for a single run. Snapshots are plain copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
    pub bytes: u64,
}

impl RunStats {
    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / 1024.0 / 1024.0
    }
}

/// Messages published while a run is in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress {
        fraction: f64,
        label: String,
        stats: RunStats,
    },
    Log(String),
}

/// Terminal result of one fetch attempt, as seen by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Downloaded { filename: String, bytes: u64 },
    Failed { reason: String },
}

struct Inner {
    stats: RunStats,
    completed: usize,
    total_pending: usize,
}

/// Single point of mutation for [`RunStats`].
///
/// Fetch tasks report terminal outcomes only; every update happens under
/// one lock and is followed by a progress event.
pub struct StatsAggregator {
    inner: Mutex<Inner>,
    events: Option<UnboundedSender<Event>>,
}

impl StatsAggregator {
    pub fn new(events: Option<UnboundedSender<Event>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stats: RunStats::default(),
                completed: 0,
                total_pending: 0,
            }),
            events,
        }
    }

    /// Record the result of filtering: total considered, skipped, and the
    /// number of items queued for download.
    pub fn set_plan(&self, total: usize, skipped: usize, pending: usize) {
        let mut inner = self.lock();
        inner.stats.total = total;
        inner.stats.skipped = skipped;
        inner.total_pending = pending;
    }

    /// Count one finished item: exactly one of `downloaded`/`failed` moves.
    pub fn on_item_complete(&self, outcome: &ItemOutcome) {
        let (fraction, stats, label) = {
            let mut inner = self.lock();
            let label = match outcome {
                ItemOutcome::Downloaded { filename, bytes } => {
                    inner.stats.downloaded += 1;
                    inner.stats.bytes += bytes;
                    filename.clone()
                }
                ItemOutcome::Failed { reason } => {
                    inner.stats.failed += 1;
                    error_label(reason)
                }
            };
            inner.completed += 1;
            (fraction_of(&inner), inner.stats, label)
        };
        self.emit(Event::Progress {
            fraction,
            label,
            stats,
        });
    }

    /// `completed / total_pending`; `1.0` when nothing was queued.
    pub fn progress_fraction(&self) -> f64 {
        fraction_of(&self.lock())
    }

    pub fn snapshot(&self) -> RunStats {
        self.lock().stats
    }

    /// Publish a human-readable log line.
    pub fn log(&self, line: impl Into<String>) {
        self.emit(Event::Log(line.into()));
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.events {
            // A consumer that went away is not the engine's problem.
            let _ = tx.send(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Counters stay consistent even if a holder panicked mid-update,
        // since every update is a handful of integer increments.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn fraction_of(inner: &Inner) -> f64 {
    if inner.total_pending == 0 {
        1.0
    } else {
        inner.completed as f64 / inner.total_pending as f64
    }
}

/// Short failure label for progress displays: `Error: <first 30 chars>...`.
fn error_label(reason: &str) -> String {
    let head: String = reason.chars().take(30).collect();
    format!("Error: {}...", head)
}

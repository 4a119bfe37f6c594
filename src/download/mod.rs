//! Download engine: adaptive batch scheduler over a two-phase fetcher.
//!
//! The pending queue is processed in strict batches: every item of batch k
//! finishes before batch k+1 starts. Each batch's failure ratio, rate-limit
//! signals and latency feed [`tuning::ConcurrencyState`], which sizes the
//! next batch. Cancellation is checked before each batch and before each
//! item; items already in flight run to completion and count normally.

pub mod error;
pub mod exif;
pub mod fetch;
pub mod file;
pub mod filter;
pub mod handle;
pub mod progress;
pub mod tuning;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::archive::Record;
use crate::backoff::{self, BackoffConfig};
use fetch::Fetch;
use progress::{Event, ItemOutcome, RunStats, StatsAggregator};
use tuning::{Adjustment, BatchOutcome, ConcurrencyState, TuningParams};

/// Subset of application config consumed by the download engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub(crate) output_dir: PathBuf,
    pub(crate) year_filter: Option<BTreeSet<i32>>,
    pub(crate) max_concurrency: usize,
    pub(crate) tuning: TuningParams,
    pub(crate) rate_limit_cooldown: BackoffConfig,
    pub(crate) auto_tune: bool,
    pub(crate) add_metadata: bool,
    pub(crate) skip_existing: bool,
    pub(crate) dry_run: bool,
}

/// Lifecycle of a run. A finished run always reports `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Cancelling,
    Completed,
}

/// One scheduled batch and the decision taken after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchRecord {
    pub concurrency: usize,
    pub outcome: BatchOutcome,
    pub adjustment: Adjustment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub stats: RunStats,
    pub final_concurrency: usize,
    pub batches: Vec<BatchRecord>,
    pub cancelled: bool,
    pub state: RunState,
}

fn transition(state: &mut RunState, next: RunState) {
    tracing::debug!(from = ?*state, to = ?next, "run state");
    *state = next;
}

/// Entry point for the download engine.
///
/// Only output-directory creation fails the run; per-item failures are
/// counted in the returned stats.
pub async fn run(
    fetcher: &dyn Fetch,
    records: Vec<Record>,
    config: &DownloadConfig,
    cancel: CancellationToken,
    events: Option<UnboundedSender<Event>>,
) -> Result<RunReport> {
    let mut state = RunState::Idle;
    let aggregator = StatsAggregator::new(events);

    if !config.dry_run {
        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create output directory {}",
                    config.output_dir.display()
                )
            })?;
    }

    let records = match &config.year_filter {
        Some(years) if !years.is_empty() => {
            let list: Vec<String> = years.iter().map(|y| y.to_string()).collect();
            aggregator.log(format!("Filtering to years: {}", list.join(", ")));
            let kept = filter::filter_years(records, Some(years));
            if kept.is_empty() {
                aggregator.log("No items match the selected years.");
            }
            kept
        }
        _ => records,
    };
    let total = records.len();

    let partition =
        filter::partition_existing(records, &config.output_dir, config.skip_existing);
    let pending = partition.pending;
    aggregator.set_plan(total, partition.skip.len(), pending.len());
    aggregator.log(format!(
        "Queued {} files ({} skipped).",
        pending.len(),
        partition.skip.len()
    ));

    let mut concurrency = ConcurrencyState::new(config.max_concurrency, pending.len());
    let mut batches = Vec::new();
    let mut cancelled = false;

    if config.dry_run {
        for record in &pending {
            match record.location_raw() {
                "" => aggregator.log(format!("[DRY RUN] Would download {}", record.canonical_name())),
                place => aggregator.log(format!(
                    "[DRY RUN] Would download {} ({})",
                    record.canonical_name(),
                    place
                )),
            }
        }
    } else if pending.is_empty() {
        if total > 0 {
            aggregator.log("All files are already downloaded!");
        }
    } else {
        transition(&mut state, RunState::Running);
        let mut next = 0usize;
        let mut rate_limited_streak = 0u32;

        while next < pending.len() {
            if cancel.is_cancelled() {
                transition(&mut state, RunState::Cancelling);
                cancelled = true;
                break;
            }

            let width = if config.auto_tune {
                concurrency.current()
            } else {
                concurrency.ceiling()
            };
            let end = (next + width).min(pending.len());
            let batch = &pending[next..end];
            aggregator.log(format!(
                "Downloading batch {}-{} / {} at concurrency {}.",
                next + 1,
                end,
                pending.len(),
                width
            ));

            let (outcome, abandoned) =
                run_batch(fetcher, batch, config, &cancel, &aggregator).await;
            next = end;

            if abandoned > 0 {
                tracing::debug!(abandoned, "items abandoned after cancellation");
                transition(&mut state, RunState::Cancelling);
                cancelled = true;
            }

            let adjustment = if config.auto_tune {
                concurrency.retune(&outcome, &config.tuning)
            } else {
                Adjustment::Unchanged
            };
            log_adjustment(&aggregator, &adjustment, &outcome);
            tracing::debug!(
                progress = aggregator.progress_fraction(),
                next = concurrency.current(),
                "batch finished"
            );
            batches.push(BatchRecord {
                concurrency: width,
                outcome,
                adjustment,
            });

            if outcome.rate_limited {
                let delay = config.rate_limit_cooldown.delay_for_retry(rate_limited_streak);
                rate_limited_streak = rate_limited_streak.saturating_add(1);
                if next < pending.len() && !delay.is_zero() {
                    aggregator.log(format!("Cooling down for {}s after rate limit.", delay.as_secs()));
                    backoff::wait_or_cancel(delay, &cancel).await;
                }
            } else {
                rate_limited_streak = 0;
            }
        }
    }

    if cancelled {
        aggregator.log("Download cancelled.");
    }
    transition(&mut state, RunState::Completed);

    Ok(RunReport {
        stats: aggregator.snapshot(),
        final_concurrency: if config.auto_tune {
            concurrency.current()
        } else {
            concurrency.ceiling()
        },
        batches,
        cancelled,
        state,
    })
}

/// Run one batch with a gate as wide as the batch and wait for all of it.
///
/// Returns the batch outcome and the number of items abandoned because
/// cancellation was observed before they started.
async fn run_batch(
    fetcher: &dyn Fetch,
    batch: &[Record],
    config: &DownloadConfig,
    cancel: &CancellationToken,
    aggregator: &StatsAggregator,
) -> (BatchOutcome, usize) {
    let started = Instant::now();
    let gate = batch.len().max(1);

    let results: Vec<Option<(bool, bool)>> = stream::iter(batch.iter().cloned())
        .map(|record: Record| async move {
            if cancel.is_cancelled() {
                return None;
            }
            let result = fetcher
                .fetch(&record, &config.output_dir, config.add_metadata)
                .await;
            Some(record_result(&record, result, aggregator))
        })
        .buffer_unordered(gate)
        .collect()
        .await;

    let attempted: Vec<(bool, bool)> = results.iter().flatten().copied().collect();
    let abandoned = results.len() - attempted.len();
    let outcome = BatchOutcome {
        attempted: attempted.len(),
        failed: attempted.iter().filter(|(ok, _)| !ok).count(),
        rate_limited: attempted.iter().any(|(_, limited)| *limited),
        elapsed: started.elapsed(),
    };
    (outcome, abandoned)
}

/// Feed one terminal result to the aggregator. Returns `(success, rate_limited)`.
fn record_result(
    record: &Record,
    result: std::result::Result<fetch::Fetched, error::FetchError>,
    aggregator: &StatsAggregator,
) -> (bool, bool) {
    match result {
        Ok(fetched) => {
            tracing::debug!(path = %fetched.path.display(), bytes = fetched.bytes, "saved");
            aggregator.on_item_complete(&ItemOutcome::Downloaded {
                filename: fetched.filename,
                bytes: fetched.bytes,
            });
            (true, false)
        }
        Err(e) => {
            let rate_limited = e.is_rate_limited();
            tracing::debug!(
                name = %record.canonical_name(),
                phase = %e.phase(),
                status = ?e.http_status(),
                "fetch failed: {}",
                e
            );
            if rate_limited {
                aggregator.log("Rate limit detected on a request.");
            } else {
                aggregator.log(format!("Download failed: {}: {}", record.canonical_name(), e));
            }
            aggregator.on_item_complete(&ItemOutcome::Failed {
                reason: e.to_string(),
            });
            (false, rate_limited)
        }
    }
}

fn log_adjustment(aggregator: &StatsAggregator, adjustment: &Adjustment, outcome: &BatchOutcome) {
    match adjustment {
        Adjustment::RateLimited { to, .. } => {
            aggregator.log(format!("Rate limit encountered, reducing concurrency to {}.", to))
        }
        Adjustment::HighFailureRate { to, .. } => {
            aggregator.log(format!("High error rate in batch, lowering concurrency to {}.", to))
        }
        Adjustment::Increased { to, .. } => aggregator.log(format!(
            "Stable & fast ({:.2}s each). Bumping concurrency to {}.",
            outcome.secs_per_item(),
            to
        )),
        Adjustment::Unchanged => {}
    }
}

/// Human-readable elapsed time, e.g. `1h 02m 03s`.
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

//! Command surface for presentation layers: start a run, watch its events,
//! cancel it, and collect the final report.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::fetch::Fetch;
use super::progress::Event;
use super::{DownloadConfig, RunReport};
use crate::archive::Record;

/// A run executing on the tokio runtime.
pub struct RunHandle {
    cancel: CancellationToken,
    events: Option<UnboundedReceiver<Event>>,
    task: JoinHandle<Result<RunReport>>,
}

impl RunHandle {
    /// Spawn a run with its own cancellation gate.
    pub fn start(fetcher: Arc<dyn Fetch>, records: Vec<Record>, config: DownloadConfig) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let run_token = cancel.clone();
        let task = tokio::spawn(async move {
            super::run(fetcher.as_ref(), records, &config, run_token, Some(tx)).await
        });
        Self {
            cancel,
            events: Some(rx),
            task,
        }
    }

    /// Stop launching new items. In-flight items finish and still count.
    /// Safe to call any number of times, including after completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Take the event receiver. The stream ends when the run finishes.
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<Event>> {
        self.events.take()
    }

    /// Wait for the run to finish.
    pub async fn join(self) -> Result<RunReport> {
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffConfig;
    use crate::download::error::FetchError;
    use crate::download::fetch::Fetched;
    use crate::download::tuning::TuningParams;
    use crate::download::RunState;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::path::Path;
    use std::time::Duration;

    /// Succeeds after a short sleep without touching disk.
    struct SlowFetcher;

    #[async_trait]
    impl Fetch for SlowFetcher {
        async fn fetch(
            &self,
            record: &Record,
            output_dir: &Path,
            _write_metadata: bool,
        ) -> std::result::Result<Fetched, FetchError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let filename = format!("{}.jpg", record.canonical_name());
            Ok(Fetched {
                path: output_dir.join(&filename),
                filename,
                bytes: 1,
            })
        }
    }

    fn config(dir: &Path) -> DownloadConfig {
        DownloadConfig {
            output_dir: dir.to_path_buf(),
            year_filter: None,
            max_concurrency: 2,
            tuning: TuningParams::default(),
            rate_limit_cooldown: BackoffConfig::DISABLED,
            auto_tune: false,
            add_metadata: false,
            skip_existing: true,
            dry_run: false,
        }
    }

    fn records(n: i64) -> Vec<Record> {
        (0..n)
            .map(|i| {
                Record::new(
                    Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(i),
                    format!("mock://{i}"),
                    "",
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_run_to_completion_streams_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = RunHandle::start(Arc::new(SlowFetcher), records(3), config(dir.path()));
        let mut rx = handle.take_events().unwrap();
        assert!(handle.take_events().is_none());

        let mut progress = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Progress { .. }) {
                progress += 1;
            }
        }
        let report = handle.join().await.unwrap();

        assert_eq!(progress, 3);
        assert_eq!(report.stats.downloaded, 3);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_stops_remaining_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = RunHandle::start(Arc::new(SlowFetcher), records(10), config(dir.path()));
        let mut rx = handle.take_events().unwrap();

        // Cancel as soon as the first item completes.
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Progress { .. }) {
                handle.cancel();
                handle.cancel();
                break;
            }
        }
        let report = handle.join().await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.state, RunState::Completed);
        assert!(report.stats.downloaded < 10);
        assert_eq!(report.stats.failed, 0);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = RunHandle::start(Arc::new(SlowFetcher), records(1), config(dir.path()));
        let mut rx = handle.take_events().unwrap();
        // The stream closes once the run has finished.
        while rx.recv().await.is_some() {}

        handle.cancel();
        let report = handle.join().await.unwrap();

        assert_eq!(report.stats.downloaded, 1);
        assert!(!report.cancelled);
    }
}

//! memories-dl: bulk downloader for saved-media archive exports.
//!
//! Reads the export JSON, skips items already on disk, and fetches the rest
//! in batches whose width adapts to how the server is coping: rate limits
//! halve it, error-heavy batches step it down, clean fast batches step it up.

#![warn(clippy::all)]

mod archive;
mod backoff;
mod cli;
mod config;
mod download;
mod shutdown;
mod types;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use download::exif::{Annotate, ExifAnnotator, NoopAnnotator};
use download::fetch::HttpFetcher;
use download::handle::RunHandle;
use download::progress::Event;

/// Return a progress bar, hidden when disabled or stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    match ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!("Falling back to default progress style: {}", e),
    }
    pb
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = config::Config::from_cli(cli)?;

    let records = archive::load(&config.json_path).with_context(|| {
        format!(
            "Failed to read archive export {}",
            config.json_path.display()
        )
    })?;
    tracing::info!("Found {} items in archive.", records.len());

    if config.list_years {
        let years = archive::years(&records);
        if years.is_empty() {
            println!("No dated items in archive.");
        }
        for year in years {
            let count = records.iter().filter(|r| r.year() == year).count();
            println!("{year}  ({count} items)");
        }
        return Ok(());
    }

    let annotator: Arc<dyn Annotate> = if config.set_exif {
        Arc::new(ExifAnnotator)
    } else {
        Arc::new(NoopAnnotator)
    };
    let fetcher = HttpFetcher::new(config.request_timeout, annotator)
        .context("Failed to build HTTP client")?;

    let download_config = config.download_config();
    tracing::info!(
        concurrency = config.max_concurrency,
        auto_tune = config.auto_tune,
        "Saving to {}",
        config.directory.display()
    );

    let started = Instant::now();
    let shutdown_token =
        shutdown::install_signal_handler().context("Failed to install signal handlers")?;
    let mut handle = RunHandle::start(Arc::new(fetcher), records, download_config);

    let pb = create_progress_bar(config.no_progress_bar);
    if let Some(mut events) = handle.take_events() {
        let mut stop_requested = false;
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled(), if !stop_requested => {
                    stop_requested = true;
                    handle.cancel();
                }
                event = events.recv() => match event {
                    Some(Event::Progress {
                        fraction,
                        label,
                        stats,
                    }) => {
                        let pending = stats.total.saturating_sub(stats.skipped) as u64;
                        pb.set_length(pending);
                        pb.set_position((fraction * pending as f64).round() as u64);
                        pb.set_message(label);
                    }
                    Some(Event::Log(line)) => pb.suspend(|| tracing::info!("{}", line)),
                    None => break,
                },
            }
        }
    }

    let report = handle.join().await.context("Download run failed")?;
    pb.finish_and_clear();

    for (i, batch) in report.batches.iter().enumerate() {
        tracing::debug!(
            batch = i + 1,
            concurrency = batch.concurrency,
            attempted = batch.outcome.attempted,
            failed = batch.outcome.failed,
            rate_limited = batch.outcome.rate_limited,
            adjustment = ?batch.adjustment,
            "tuning trace"
        );
    }
    tracing::debug!(state = ?report.state, "run finished");

    let stats = report.stats;
    if config.dry_run {
        tracing::info!("── Dry Run Summary ──");
        tracing::info!(
            "  {} files would be downloaded",
            stats.total - stats.skipped
        );
        tracing::info!("  destination: {}", config.directory.display());
        return Ok(());
    }

    tracing::info!("── Summary ──");
    if report.cancelled {
        tracing::info!("  Interrupted before all batches ran");
    }
    tracing::info!(
        "  {} downloaded, {} skipped, {} failed, {} total",
        stats.downloaded,
        stats.skipped,
        stats.failed,
        stats.total
    );
    tracing::info!("  {:.2} MB written", stats.megabytes());
    tracing::info!(
        "  elapsed: {}",
        download::format_duration(started.elapsed())
    );
    tracing::info!(
        "  final concurrency: {} over {} batches",
        report.final_concurrency,
        report.batches.len()
    );
    if stats.failed > 0 {
        tracing::warn!(
            "{} downloads failed; run again to retry them",
            stats.failed
        );
    }

    Ok(())
}

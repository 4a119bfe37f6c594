use clap::Parser;
use crate::types::*;

#[derive(Parser, Debug)]
#[command(
    name = "memories-dl",
    version,
    about = "Download every item of a saved-media archive export"
)]
pub struct Cli {
    /// Path to the archive export JSON (the file holding "Saved Media")
    pub json_path: String,

    /// Local directory for downloads
    #[arg(short = 'd', long, default_value = "memories")]
    pub directory: String,

    /// Maximum number of concurrent downloads
    #[arg(short = 'c', long, default_value_t = 40)]
    pub max_concurrency: u16,

    /// Keep concurrency pinned at the maximum instead of auto-tuning
    #[arg(long)]
    pub no_auto_tune: bool,

    /// Write capture date and GPS position into downloaded JPEGs
    #[arg(long)]
    pub set_exif: bool,

    /// Download again even when the output file already exists
    #[arg(long)]
    pub no_skip_existing: bool,

    /// Only download items captured in this year (repeatable)
    #[arg(short = 'y', long = "year")]
    pub years: Vec<i32>,

    /// Print the years present in the archive and exit
    #[arg(long)]
    pub list_years: bool,

    /// Show what would be downloaded without touching the network
    #[arg(long)]
    pub dry_run: bool,

    /// Timeout in seconds for each HTTP request
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Batch failure ratio above which concurrency steps down
    #[arg(long, default_value_t = 0.30)]
    pub failure_ratio: f64,

    /// Seconds per item below which a clean batch steps concurrency up
    #[arg(long, default_value_t = 1.5)]
    pub fast_item_secs: f64,

    /// Base cooldown in seconds after a rate-limited batch (0 disables)
    #[arg(long, default_value_t = 2)]
    pub rate_limit_cooldown_secs: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::download::tuning::TuningParams;
use crate::download::DownloadConfig;

/// Highest concurrency accepted from the command line.
const MAX_CONCURRENCY: u16 = 100;

/// Longest base cooldown accepted after a rate-limited batch.
const MAX_COOLDOWN_SECS: u64 = 300;

/// Application configuration.
#[derive(Debug)]
pub struct Config {
    pub json_path: PathBuf,
    pub directory: PathBuf,
    pub years: BTreeSet<i32>,
    pub request_timeout: Duration,
    pub tuning: TuningParams,
    pub rate_limit_cooldown: BackoffConfig,
    pub max_concurrency: u16,
    pub auto_tune: bool,
    pub set_exif: bool,
    pub skip_existing: bool,
    pub list_years: bool,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> anyhow::Result<Self> {
        if cli.max_concurrency == 0 || cli.max_concurrency > MAX_CONCURRENCY {
            anyhow::bail!(
                "--max-concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY,
                cli.max_concurrency
            );
        }
        if cli.timeout_secs == 0 {
            anyhow::bail!("--timeout-secs must be at least 1");
        }
        if !(0.0..=1.0).contains(&cli.failure_ratio) {
            anyhow::bail!(
                "--failure-ratio must be between 0 and 1, got {}",
                cli.failure_ratio
            );
        }
        if !cli.fast_item_secs.is_finite() || cli.fast_item_secs <= 0.0 {
            anyhow::bail!(
                "--fast-item-secs must be a positive number, got {}",
                cli.fast_item_secs
            );
        }
        if cli.rate_limit_cooldown_secs > MAX_COOLDOWN_SECS {
            anyhow::bail!(
                "--rate-limit-cooldown-secs must be at most {}, got {}",
                MAX_COOLDOWN_SECS,
                cli.rate_limit_cooldown_secs
            );
        }

        Ok(Self {
            json_path: expand_tilde(&cli.json_path),
            directory: expand_tilde(&cli.directory),
            years: cli.years.into_iter().collect(),
            request_timeout: Duration::from_secs(cli.timeout_secs),
            tuning: TuningParams {
                failure_ratio_threshold: cli.failure_ratio,
                fast_item_secs: cli.fast_item_secs,
            },
            rate_limit_cooldown: match cli.rate_limit_cooldown_secs {
                0 => BackoffConfig::DISABLED,
                base => BackoffConfig {
                    base_delay_secs: base,
                    max_delay_secs: base * 15,
                },
            },
            max_concurrency: cli.max_concurrency,
            auto_tune: !cli.no_auto_tune,
            set_exif: cli.set_exif,
            skip_existing: !cli.no_skip_existing,
            list_years: cli.list_years,
            dry_run: cli.dry_run,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    /// Engine-facing subset of the configuration.
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            output_dir: self.directory.clone(),
            year_filter: (!self.years.is_empty()).then(|| self.years.clone()),
            max_concurrency: self.max_concurrency as usize,
            tuning: self.tuning,
            rate_limit_cooldown: self.rate_limit_cooldown,
            auto_tune: self.auto_tune,
            add_metadata: self.set_exif,
            skip_existing: self.skip_existing,
            dry_run: self.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn make_cli(args: &[&str]) -> crate::cli::Cli {
        let mut argv = vec!["memories-dl", "export.json"];
        argv.extend_from_slice(args);
        crate::cli::Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Documents");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Documents"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            expand_tilde("relative/path"),
            PathBuf::from("relative/path")
        );
    }

    #[test]
    fn test_defaults_map_to_download_config() {
        let cfg = Config::from_cli(make_cli(&[])).unwrap();
        let dl = cfg.download_config();
        assert_eq!(dl.max_concurrency, 40);
        assert!(dl.auto_tune);
        assert!(dl.skip_existing);
        assert!(!dl.add_metadata);
        assert!(!dl.dry_run);
        assert_eq!(dl.year_filter, None);
        assert_eq!(dl.tuning, TuningParams::default());
        assert_eq!(dl.rate_limit_cooldown, BackoffConfig::default());
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_flags_invert_defaults() {
        let cfg = Config::from_cli(make_cli(&[
            "--no-auto-tune",
            "--no-skip-existing",
            "--set-exif",
            "-y",
            "2021",
        ]))
        .unwrap();
        let dl = cfg.download_config();
        assert!(!dl.auto_tune);
        assert!(!dl.skip_existing);
        assert!(dl.add_metadata);
        assert_eq!(dl.year_filter, Some([2021].into_iter().collect()));
    }

    #[test]
    fn test_zero_cooldown_disables_backoff() {
        let cfg = Config::from_cli(make_cli(&["--rate-limit-cooldown-secs", "0"])).unwrap();
        assert_eq!(cfg.rate_limit_cooldown, BackoffConfig::DISABLED);
    }

    #[test]
    fn test_rejects_out_of_range_concurrency() {
        assert!(Config::from_cli(make_cli(&["-c", "0"])).is_err());
        assert!(Config::from_cli(make_cli(&["-c", "101"])).is_err());
        assert!(Config::from_cli(make_cli(&["-c", "100"])).is_ok());
    }

    #[test]
    fn test_rejects_bad_tuning_values() {
        assert!(Config::from_cli(make_cli(&["--failure-ratio", "1.5"])).is_err());
        assert!(Config::from_cli(make_cli(&["--fast-item-secs", "0"])).is_err());
        assert!(Config::from_cli(make_cli(&["--timeout-secs", "0"])).is_err());
    }

    #[test]
    fn test_cooldown_is_bounded() {
        let cfg = Config::from_cli(make_cli(&["--rate-limit-cooldown-secs", "300"])).unwrap();
        assert_eq!(cfg.rate_limit_cooldown.max_delay_secs, 4500);
        assert!(
            Config::from_cli(make_cli(&["--rate-limit-cooldown-secs", "301"])).is_err()
        );
        assert!(Config::from_cli(make_cli(&[
            "--rate-limit-cooldown-secs",
            &u64::MAX.to_string(),
        ]))
        .is_err());
    }
}

//! Functions and structures related to configuring a kvdrill load test.
//!
//! kvdrill is configured at run time by passing in the options and flags
//! defined by the [`Configuration`] structure. All options are validated once
//! at startup; an invalid configuration aborts the engine before any request
//! is sent.

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::path::PathBuf;

use crate::util;
use crate::DrillError;

/// Runtime options available when launching a kvdrill load test.
///
/// Defaults match the reference key-value workload: 30 virtual users pounding
/// `http://127.0.0.1:8000` for three minutes, draining for up to three
/// seconds, summarized at the 50th, 90th, 95th and 99th percentiles.
///
/// kvdrill leverages [`gumdrop`](https://docs.rs/gumdrop/) to derive the
/// run-time help from the below structure, shown when passing a `-h` flag.
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"kvdrill generates synthetic set/get load against the HTTP API of a
key-value store, and summarizes per-request latency by percentile.

The following runtime options are available when launching a kvdrill load test:"#
)]
pub struct Configuration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,

    /// Defines host to load test (ie http://10.21.32.33)
    #[options(short = "H", default = "http://127.0.0.1:8000")]
    pub host: String,
    /// Sets concurrent virtual users
    #[options(short = "u", default = "30")]
    pub vus: usize,
    /// Stops load test after (30s, 20m, 3h, 1h30m, etc)
    #[options(short = "t", meta = "TIME", default = "3m")]
    pub duration: String,
    /// Maximum time in-flight iterations may drain after stopping
    #[options(short = "s", meta = "TIME", default = "3s")]
    pub graceful_stop: String,
    /// Sets percentile ranks the summary reports
    #[options(no_short, meta = "LIST", default = "50,90,95,99")]
    pub percentiles: String,
    /// Sets how many times each user runs the scenario then exits (0 = unlimited)
    #[options(no_short, meta = "VALUE")]
    pub iterations: usize,
    /// Sets per-request timeout, in seconds (default: 60)
    #[options(no_short, meta = "VALUE")]
    pub timeout: Option<u64>,

    /// How often to optionally print running metrics
    #[options(no_short, meta = "TIME")]
    pub running_metrics: Option<usize>,
    /// Create a json-formatted report file
    #[options(no_short, meta = "NAME")]
    pub report_file: String,
    /// Doesn't display metrics at end of load test
    #[options(no_short)]
    pub no_print_metrics: bool,
    /// Do not track status code metrics
    #[options(no_short)]
    pub no_status_codes: bool,

    /// Enables kvdrill log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases log file verbosity (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases kvdrill verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases kvdrill verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
}

impl Configuration {
    /// Parse the configured percentile ranks into an ordered set.
    ///
    /// Ranks are comma separated, each greater than 0 and at most 100;
    /// duplicates collapse and out-of-order ranks are sorted.
    pub(crate) fn percentile_ranks(&self) -> Result<Vec<f32>, DrillError> {
        let mut ranks: Vec<f32> = Vec::new();
        for rank_string in self.percentiles.split(',') {
            let rank = match rank_string.trim().parse::<f32>() {
                Ok(rank) => rank,
                Err(_) => {
                    return Err(DrillError::InvalidOption {
                        option: "--percentiles".to_string(),
                        value: self.percentiles.to_string(),
                        detail: format!(
                            "`{}` is not a valid percentile rank.",
                            rank_string.trim()
                        ),
                    });
                }
            };
            if !(rank > 0.0 && rank <= 100.0) {
                return Err(DrillError::InvalidOption {
                    option: "--percentiles".to_string(),
                    value: self.percentiles.to_string(),
                    detail: "percentile ranks must be greater than 0 and at most 100."
                        .to_string(),
                });
            }
            ranks.push(rank);
        }
        // An ordered set: summaries report ranks in increasing order, once each.
        ranks.sort_by(|a, b| a.partial_cmp(b).unwrap());
        ranks.dedup();
        Ok(ranks)
    }

    /// Validate the configuration, failing fast before any request is sent.
    pub(crate) fn validate(&self) -> Result<(), DrillError> {
        if self.vus < 1 {
            return Err(DrillError::InvalidOption {
                option: "--vus".to_string(),
                value: self.vus.to_string(),
                detail: "at least 1 virtual user is required.".to_string(),
            });
        }

        if !util::valid_timespan(&self.duration) {
            return Err(DrillError::InvalidOption {
                option: "--duration".to_string(),
                value: self.duration.to_string(),
                detail: "expected a non-negative time span, such as 90, \"30s\" or \"3m\"."
                    .to_string(),
            });
        }

        if !util::valid_timespan(&self.graceful_stop) {
            return Err(DrillError::InvalidOption {
                option: "--graceful-stop".to_string(),
                value: self.graceful_stop.to_string(),
                detail: "expected a non-negative time span, such as 3, \"3s\" or \"1m\"."
                    .to_string(),
            });
        }

        self.percentile_ranks()?;

        util::is_valid_host(&self.host)?;

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err(DrillError::InvalidOption {
                    option: "--timeout".to_string(),
                    value: timeout.to_string(),
                    detail: "the request timeout must be at least 1 second.".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Optionally initialize the kvdrill logger which writes to standard out
    /// and/or to a configurable log file.
    pub(crate) fn initialize_logger(&self) {
        // Configure debug output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                _ => LevelFilter::Warn,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Open the log file if configured.
        let log_file: Option<PathBuf> = if !self.log_file.is_empty() {
            Some(PathBuf::from(&self.log_file))
        // Otherwise disable the log.
        } else {
            None
        };

        if let Some(log_to_file) = log_file {
            match std::fs::File::create(&log_to_file) {
                Ok(file) => {
                    match CombinedLogger::init(vec![
                        SimpleLogger::new(debug_level, Config::default()),
                        WriteLogger::new(log_level, Config::default(), file),
                    ]) {
                        Ok(_) => (),
                        Err(e) => {
                            info!("failed to initialize CombinedLogger: {}", e);
                        }
                    }
                    info!("Writing to log file: {}", log_to_file.display());
                }
                Err(e) => {
                    eprintln!(
                        "WARNING: failed to create log file {}: {}",
                        log_to_file.display(),
                        e
                    );
                }
            }
        } else {
            match CombinedLogger::init(vec![SimpleLogger::new(debug_level, Config::default())]) {
                Ok(_) => (),
                Err(e) => {
                    info!("failed to initialize CombinedLogger: {}", e);
                }
            }
        }

        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}

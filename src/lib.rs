//! # kvdrill
//!
//! kvdrill is a synthetic load-generation engine that exercises the HTTP API
//! of a key-value store. It simulates many concurrent clients ("virtual
//! users") issuing timed sequences of set/get requests, and aggregates
//! per-request latency and outcome into percentile summaries.
//!
//! kvdrill uses [`reqwest`](https://docs.rs/reqwest/) to provide a convenient
//! HTTP client, and [`tokio`](https://docs.rs/tokio/) to run every virtual
//! user as an independent concurrent task.
//!
//! ## Running a load test
//!
//! The `kvdrill` binary drives the reference workload: each user POSTs 151
//! keys to `/set` with a 200 ms pause after each request, then reads the same
//! keys back from `/get` with a 100 ms pause, repeating until the configured
//! duration expires. Pass the `-h` flag to see all run-time options.
//!
//! ```bash
//! $ kvdrill --host http://127.0.0.1:8000 -u30 -t3m -s3s
//! ```
//!
//! When the duration expires the engine raises a stop signal; each user
//! finishes its in-flight iteration (never aborting mid-request) and exits.
//! Users still mid-iteration when the graceful stop period expires are
//! force-terminated and counted as incomplete iterations in the summary.
//!
//! ## Embedding the engine
//!
//! The engine is also usable as a library, optionally swapping the reference
//! workload for a custom one built from the same shapes (sequential named
//! groups of paced request loops):
//!
//! ```rust,no_run
//! use gumdrop::Options;
//!
//! use kvdrill::config::Configuration;
//! use kvdrill::KvDrill;
//!
//! fn main() -> Result<(), kvdrill::DrillError> {
//!     let configuration = Configuration::parse_args_default_or_exit();
//!     let metrics = KvDrill::initialize_with_config(configuration)?.execute()?;
//!
//!     // Percentile summaries are returned per tag.
//!     for (tag, tag_metrics) in &metrics.tags {
//!         println!("{}: p99 {}ms", tag, tag_metrics.percentile(99.0));
//!     }
//!
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod driver;
pub mod metrics;
pub mod prelude;
mod report;
pub mod scenario;
mod user;
pub mod util;

use chrono::prelude::*;
use gumdrop::Options;
use lazy_static::lazy_static;
use std::sync::RwLock;
use std::{fmt, io, time};
use tokio::runtime::Runtime;

use crate::config::Configuration;
use crate::driver::KvUser;
use crate::metrics::{DrillMetric, DrillMetrics};
use crate::scenario::Scenario;
use crate::user::UserCommand;

// CANCELED is a global flag raised by the ctrl-c handler, observed read-only
// by the scheduler loop like a duration expiry.
lazy_static! {
    static ref CANCELED: RwLock<bool> = RwLock::new(false);
}

/// An enumeration of all errors a [`KvDrill`](./struct.KvDrill.html) can return.
#[derive(Debug)]
pub enum DrillError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a ['tokio::task::JoinError'](https://tokio-rs.github.io/tokio/doc/tokio/task/struct.JoinError.html).
    TokioJoin(tokio::task::JoinError),
    /// Failed to parse a hostname.
    InvalidHost {
        /// The invalid hostname that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// [`KvDrill`](./struct.KvDrill.html) has no workload defined.
    NoWorkload {
        /// An optional explanation of the error.
        detail: String,
    },
}
/// Implement a helper to provide a text description of all possible types of errors.
impl DrillError {
    fn describe(&self) -> &str {
        match *self {
            DrillError::Io(_) => "io::Error",
            DrillError::Reqwest(_) => "reqwest::Error",
            DrillError::TokioJoin(_) => "tokio::task::JoinError",
            DrillError::InvalidHost { .. } => "failed to parse hostname",
            DrillError::InvalidOption { .. } => "invalid option or value specified",
            DrillError::NoWorkload { .. } => "no workload defined",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for DrillError {
    // Implement display of error with `{}` marker.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DrillError::Io(ref source) => write!(f, "DrillError: {} ({})", self.describe(), source),
            DrillError::Reqwest(ref source) => {
                write!(f, "DrillError: {} ({})", self.describe(), source)
            }
            DrillError::TokioJoin(ref source) => {
                write!(f, "DrillError: {} ({})", self.describe(), source)
            }
            DrillError::InvalidHost {
                ref parse_error, ..
            } => write!(f, "DrillError: {} ({})", self.describe(), parse_error),
            DrillError::InvalidOption {
                ref option,
                ref value,
                ref detail,
            } => write!(
                f,
                "DrillError: {} ({} = '{}': {})",
                self.describe(),
                option,
                value,
                detail
            ),
            _ => write!(f, "DrillError: {}", self.describe()),
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for DrillError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            DrillError::Io(ref source) => Some(source),
            DrillError::Reqwest(ref source) => Some(source),
            DrillError::TokioJoin(ref source) => Some(source),
            DrillError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for DrillError {
    fn from(err: reqwest::Error) -> DrillError {
        DrillError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for DrillError {
    fn from(err: io::Error) -> DrillError {
        DrillError::Io(err)
    }
}

/// Auto-convert TokioJoin errors.
impl From<tokio::task::JoinError> for DrillError {
    fn from(err: tokio::task::JoinError) -> DrillError {
        DrillError::TokioJoin(err)
    }
}

#[derive(Clone, Debug, PartialEq)]
/// A [`KvDrill`](./struct.KvDrill.html) load test moves through each of the
/// following phases during a complete run.
pub enum DrillPhase {
    /// No load test is running.
    Idle,
    /// Users are being spawned.
    Starting,
    /// All users are spawned and generating load until the duration expires.
    Running,
    /// The stop signal was raised, users are draining in-flight iterations.
    Stopping,
    /// Exiting the load test.
    Shutdown,
}

#[derive(Debug)]
/// Internal global run state for the load test.
struct DrillRunState {
    /// Unbounded sender cloned into every user task to send metrics to the parent.
    metrics_tx: flume::Sender<DrillMetric>,
    /// Unbounded receiver drained by the parent into the aggregates.
    metrics_rx: flume::Receiver<DrillMetric>,
    /// Collection of all user tasks so they can be tracked and stopped later.
    users: Vec<tokio::task::JoinHandle<()>>,
    /// All unbounded senders used to ask user tasks to exit.
    user_channels: Vec<flume::Sender<UserCommand>>,
    /// This variable accounts for time spent doing things which is then
    /// subtracted from the time sleeping to avoid an unintentional drift in
    /// events that are supposed to happen regularly.
    drift_timer: tokio::time::Instant,
    /// Timer tracking when to display running metrics, if enabled.
    running_metrics_timer: time::Instant,
}

/// Global internal state for the load test.
pub struct KvDrill {
    /// The workload each user runs, by default the reference kv workload.
    scenario: Scenario,
    /// Configuration object holding options set when launching the load test.
    configuration: Configuration,
    /// How long (in seconds) the load test should run.
    run_time: usize,
    /// How long (in seconds) in-flight iterations may drain after the stop signal.
    graceful_stop: usize,
    /// Which phase the load test is currently operating in.
    phase: DrillPhase,
    /// When the load test started.
    started: Option<time::Instant>,
    /// All metrics merged together.
    metrics: DrillMetrics,
}
/// kvdrill's internal global state.
impl KvDrill {
    /// Load configuration from command line options and initialize a
    /// [`KvDrill`](./struct.KvDrill.html) running the reference workload.
    ///
    /// # Example
    /// ```rust,no_run
    /// use kvdrill::KvDrill;
    ///
    /// let drill = KvDrill::initialize();
    /// ```
    pub fn initialize() -> Result<KvDrill, DrillError> {
        KvDrill::initialize_with_config(Configuration::parse_args_default_or_exit())
    }

    /// Initialize a [`KvDrill`](./struct.KvDrill.html) with an already loaded
    /// configuration.
    ///
    /// This is generally used by tests and embedders.
    ///
    /// # Example
    /// ```rust
    /// use gumdrop::Options;
    /// use kvdrill::config::Configuration;
    /// use kvdrill::KvDrill;
    ///
    /// let configuration = Configuration::parse_args_default(&["--vus", "1"]).unwrap();
    /// let drill = KvDrill::initialize_with_config(configuration);
    /// ```
    pub fn initialize_with_config(configuration: Configuration) -> Result<KvDrill, DrillError> {
        Ok(KvDrill {
            scenario: scenario::kv_workload(),
            configuration,
            run_time: 0,
            graceful_stop: 0,
            phase: DrillPhase::Idle,
            started: None,
            metrics: DrillMetrics::default(),
        })
    }

    /// Replace the reference workload with a custom scenario.
    pub fn set_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = scenario;
        self
    }

    // Update the phase the load test is currently operating in.
    fn set_phase(&mut self, phase: DrillPhase) {
        debug!("phase change: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Execute the load test, returning the final metrics.
    ///
    /// Validates the configuration, spawns the configured number of users at
    /// the same instant, runs until the duration expires (or every user
    /// reaches its iteration limit), drains in-flight iterations within the
    /// grace period, and force-terminates stragglers. Only configuration
    /// errors abort the run; request failures are absorbed into the metrics.
    pub fn execute(mut self) -> Result<DrillMetrics, DrillError> {
        // If version flag is set, display package name and version and exit.
        if self.configuration.version {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }

        self.configuration.initialize_logger();

        // A workload issuing at least one request is required.
        if self.scenario.requests_per_iteration() == 0 {
            return Err(DrillError::NoWorkload {
                detail: "No scenario groups or steps are defined.".to_string(),
            });
        }

        // Validate the configuration; nothing is spawned and no request is
        // sent when validation fails.
        self.configuration.validate()?;

        // Configure the validated run time and grace period.
        self.run_time = util::parse_timespan(&self.configuration.duration);
        self.graceful_stop = util::parse_timespan(&self.configuration.graceful_stop);
        info!(
            "run_time = {}, graceful_stop = {}",
            self.run_time, self.graceful_stop
        );
        info!("global host configured: {}", self.configuration.host);

        // Prepare the empty aggregates.
        self.metrics = DrillMetrics::initialize(&self.configuration)?;

        let rt = Runtime::new()?;
        rt.block_on(self.start())
    }

    // Run the load test to completion inside the tokio runtime.
    async fn start(mut self) -> Result<DrillMetrics, DrillError> {
        // Catch ctrl-c to allow clean shutdown mid-run.
        util::setup_ctrlc_handler();

        let started = time::Instant::now();
        self.started = Some(started);
        self.metrics.started = Some(Local::now());

        let (metrics_tx, metrics_rx) = flume::unbounded();
        let mut run_state = DrillRunState {
            metrics_tx,
            metrics_rx,
            users: Vec::new(),
            user_channels: Vec::new(),
            drift_timer: tokio::time::Instant::now(),
            running_metrics_timer: time::Instant::now(),
        };

        // Spawn all users at (approximately) the same instant, no ramp-up.
        self.set_phase(DrillPhase::Starting);
        self.spawn_users(&mut run_state, started)?;

        // Generate load until the duration timer expires, the run is
        // canceled, or every user reaches its iteration limit.
        self.set_phase(DrillPhase::Running);
        loop {
            self.sync_metrics(&run_state);

            if self.run_time == 0 || util::timer_expired(started, self.run_time) {
                info!("stopping after {} seconds...", started.elapsed().as_secs());
                break;
            }
            if *CANCELED.read().unwrap() {
                info!("canceled, stopping...");
                break;
            }
            if run_state.users.iter().all(|user| user.is_finished()) {
                info!("all users have completed their iterations, stopping...");
                break;
            }

            // Optionally print running metrics.
            if let Some(running_metrics) = self.configuration.running_metrics {
                if util::timer_expired(run_state.running_metrics_timer, running_metrics) {
                    run_state.running_metrics_timer = time::Instant::now();
                    info!(
                        "printing running metrics after {} seconds...",
                        started.elapsed().as_secs()
                    );
                    println!("{}", self.metrics);
                }
            }

            run_state.drift_timer =
                util::sleep_minus_drift(time::Duration::from_millis(100), run_state.drift_timer)
                    .await;
        }

        // Raise the stop signal: users finish their in-flight iteration and
        // exit, bounded by the grace period.
        self.set_phase(DrillPhase::Stopping);
        info!("waiting for users to exit");
        for user_channel in &run_state.user_channels {
            // A user that already exited has dropped its receiver.
            let _ = user_channel.send(UserCommand::Exit);
        }

        let drain_started = time::Instant::now();
        loop {
            self.sync_metrics(&run_state);

            run_state.users.retain(|user| !user.is_finished());
            if run_state.users.is_empty() {
                break;
            }

            if self.graceful_stop == 0 || util::timer_expired(drain_started, self.graceful_stop) {
                // The only forced-abort path: reported as incomplete
                // iterations, not as per-request errors.
                self.metrics.incomplete_iterations = run_state.users.len();
                warn!(
                    "graceful stop of {} seconds expired, force-terminating {} user(s) mid-iteration",
                    self.graceful_stop,
                    run_state.users.len()
                );
                for user in &run_state.users {
                    user.abort();
                }
                break;
            }

            run_state.drift_timer =
                util::sleep_minus_drift(time::Duration::from_millis(100), run_state.drift_timer)
                    .await;
        }

        // Wait for every user task, including any just aborted, to fully
        // terminate before returning control.
        for user in run_state.users.drain(..) {
            let _ = user.await;
        }

        // Collect any samples that arrived while shutting down.
        self.sync_metrics(&run_state);
        self.set_phase(DrillPhase::Shutdown);

        if !self.configuration.report_file.is_empty() {
            report::write_json_report(&self.configuration.report_file, &self.metrics)?;
        }

        if !self.configuration.no_print_metrics {
            info!(
                "printing metrics after {} seconds...",
                self.metrics.duration
            );
            println!("{}", self.metrics);
        }

        Ok(self.metrics)
    }

    // Spawn one task per configured user, each with its own client and
    // command channel.
    fn spawn_users(
        &mut self,
        run_state: &mut DrillRunState,
        started: time::Instant,
    ) -> Result<(), DrillError> {
        for user_number in 1..=self.configuration.vus {
            let (user_sender, user_receiver) = flume::unbounded();
            let user = KvUser::new(
                user_number,
                &self.configuration,
                run_state.metrics_tx.clone(),
                started,
            )?;
            run_state.user_channels.push(user_sender);
            run_state.users.push(tokio::spawn(user::user_main(
                user,
                self.scenario.clone(),
                user_receiver,
            )));
        }
        info!("launched {} users...", self.configuration.vus);

        Ok(())
    }

    // Fold all samples waiting on the metrics channel into the aggregates.
    fn sync_metrics(&mut self, run_state: &DrillRunState) {
        while let Ok(message) = run_state.metrics_rx.try_recv() {
            self.metrics.record(message);
        }
        // Keep the running duration current for live summaries.
        if let Some(started) = self.started {
            self.metrics.duration = started.elapsed().as_secs() as usize;
        }
    }
}

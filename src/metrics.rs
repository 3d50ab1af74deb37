//! Metrics collected and aggregated during load tests.
//!
//! Every request a virtual user makes produces a [`RequestMetric`] which is
//! sent over an unbounded channel to the parent process, where it is folded
//! into a per-tag [`TagMetrics`] aggregate. When
//! [`KvDrill::execute()`](../struct.KvDrill.html#method.execute) completes it
//! returns the merged [`DrillMetrics`] object.
//!
//! Response times are retained in a rounded histogram so a long load test
//! requires bounded memory: times below 100 ms are stored exactly, times
//! below 500 ms round to the nearest 10 ms, times below 1 second round to the
//! nearest 100 ms, and anything slower rounds to the nearest second. All
//! percentile values are therefore accurate to within the bucket width of the
//! reported value.

use chrono::prelude::*;
use num_format::{Locale, ToFormattedString};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::config::Configuration;
use crate::driver::KvMethod;
use crate::util;
use crate::DrillError;

/// Messages sent from user tasks to the parent over the metrics channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DrillMetric {
    /// One sample recorded for one request.
    Request(RequestMetric),
    /// One completed scenario iteration by one user.
    Iteration(IterationMetric),
}

/// The sample recorded for a single request, regardless of outcome.
///
/// Immutable once sent to the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetric {
    /// How many milliseconds the load test had been running when the request was made.
    pub elapsed: u64,
    /// The tag used to bucket this request's metrics (ie "post", "get").
    pub tag: String,
    /// The method being used (ie Get, Post).
    pub method: KvMethod,
    /// The full URL that was requested.
    pub url: String,
    /// How many milliseconds the request took.
    pub response_time: u64,
    /// The HTTP response code, 0 if the request failed below the HTTP layer.
    pub status_code: u16,
    /// Whether or not the request returned status 200.
    pub success: bool,
    /// Which user made the request.
    pub user: usize,
    /// The optional transport error caused by this request.
    pub error: String,
}
impl RequestMetric {
    pub(crate) fn new(tag: &str, method: KvMethod, url: &str, elapsed: u128, user: usize) -> Self {
        RequestMetric {
            elapsed: elapsed as u64,
            tag: tag.to_string(),
            method,
            url: url.to_string(),
            response_time: 0,
            status_code: 0,
            success: false,
            user,
            error: "".to_string(),
        }
    }

    // Record how long the request took.
    pub(crate) fn set_response_time(&mut self, response_time: u128) {
        self.response_time = response_time as u64;
    }

    // Record the returned `status_code`.
    pub(crate) fn set_status_code(&mut self, status_code: Option<StatusCode>) {
        self.status_code = match status_code {
            Some(status_code) => status_code.as_u16(),
            None => 0,
        };
    }
}

/// Recorded when a user completes a full scenario run (all groups, in order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationMetric {
    /// How many milliseconds the load test had been running when the iteration completed.
    pub elapsed: u64,
    /// Which user completed the iteration.
    pub user: usize,
    /// How many milliseconds the full iteration took.
    pub run_time: u64,
}

/// Metrics aggregated for all requests sharing one tag.
///
/// [`RequestMetric`]s are sent by user tasks to the parent process where they
/// are merged together into this structure, stored in [`DrillMetrics::tags`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TagMetrics {
    /// The tag for which metrics are being collected.
    pub tag: String,
    /// The method requests with this tag use.
    pub method: KvMethod,
    /// Per-response-time counters, tracking how often requests complete with this
    /// response time. Times are rounded as described in the module documentation.
    pub response_times: BTreeMap<usize, usize>,
    /// The shortest response time seen so far, unrounded.
    pub min_response_time: usize,
    /// The longest response time seen so far, unrounded.
    pub max_response_time: usize,
    /// Total combined response times seen so far.
    pub total_response_time: usize,
    /// Total number of response times seen so far.
    pub response_time_counter: usize,
    /// Per-status-code counters, tracking how often each response code was returned.
    pub status_code_counts: HashMap<u16, usize>,
    /// Total number of requests with this tag that returned status 200.
    pub success_count: usize,
    /// Total number of requests with this tag that failed (non-200 status or
    /// transport error).
    pub fail_count: usize,
}
impl TagMetrics {
    /// Create a new TagMetrics object.
    pub(crate) fn new(tag: &str, method: KvMethod) -> Self {
        TagMetrics {
            tag: tag.to_string(),
            method,
            response_times: BTreeMap::new(),
            min_response_time: 0,
            max_response_time: 0,
            total_response_time: 0,
            response_time_counter: 0,
            status_code_counts: HashMap::new(),
            success_count: 0,
            fail_count: 0,
        }
    }

    /// Track response time.
    pub(crate) fn record_time(&mut self, response_time: u64) {
        let response_time_usize = response_time as usize;

        // Update minimum if this one is fastest yet.
        if self.min_response_time == 0
            || (response_time_usize > 0 && response_time_usize < self.min_response_time)
        {
            self.min_response_time = response_time_usize;
        }

        // Update maximum if this one is slowest yet.
        if response_time_usize > self.max_response_time {
            self.max_response_time = response_time_usize;
        }

        self.total_response_time += response_time_usize;
        self.response_time_counter += 1;

        // Round the response time so similar times combine together, bounding
        // the memory required to aggregate a long load test.
        // No rounding for 1-100ms response times.
        let rounded_response_time = if response_time < 100 {
            response_time_usize
        }
        // Round to nearest 10 for 100-500ms response times.
        else if response_time < 500 {
            ((response_time as f64 / 10.0).round() * 10.0) as usize
        }
        // Round to nearest 100 for 500-1000ms response times.
        else if response_time < 1000 {
            ((response_time as f64 / 100.0).round() * 100.0) as usize
        }
        // Round to nearest 1000 for all larger response times.
        else {
            ((response_time as f64 / 1000.0).round() * 1000.0) as usize
        };

        let counter = match self.response_times.get(&rounded_response_time) {
            Some(c) => *c + 1,
            None => 1,
        };
        self.response_times.insert(rounded_response_time, counter);
        debug!("incremented {} counter: {}", rounded_response_time, counter);
    }

    /// Increment counter for status code, creating new counter if first time seeing status code.
    pub(crate) fn record_status_code(&mut self, status_code: u16) {
        let counter = match self.status_code_counts.get(&status_code) {
            Some(c) => *c + 1,
            None => 1,
        };
        self.status_code_counts.insert(status_code, counter);
    }

    /// The mean response time for this tag, in milliseconds.
    pub fn average_response_time(&self) -> f32 {
        if self.response_time_counter == 0 {
            return 0.0;
        }
        self.total_response_time as f32 / self.response_time_counter as f32
    }

    /// The response time that `percent` of requests with this tag finished within.
    ///
    /// Nearest-rank: the smallest recorded value `v` such that at least
    /// `percent`% of recorded response times are less than or equal to `v`,
    /// looked up in the rounded histogram and clamped to the unrounded
    /// minimum and maximum.
    pub fn percentile(&self, percent: f32) -> usize {
        calculate_percentile(
            &self.response_times,
            self.response_time_counter,
            self.min_response_time,
            self.max_response_time,
            percent,
        )
    }
}
/// Implement ordering for TagMetrics.
impl Ord for TagMetrics {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.method, &self.tag).cmp(&(&other.method, &other.tag))
    }
}
/// Implement partial-ordering for TagMetrics.
impl PartialOrd for TagMetrics {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// All metrics optionally collected during a kvdrill load test.
///
/// Only the parent aggregation loop mutates this structure; it is returned to
/// the caller once every user has terminated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrillMetrics {
    /// Aggregated per-tag metrics, keyed by tag.
    pub tags: BTreeMap<String, TagMetrics>,
    /// Total completed scenario iterations across all users.
    pub iterations: usize,
    /// Users that were force-terminated mid-iteration when the grace period expired.
    pub incomplete_iterations: usize,
    /// Total milliseconds spent in completed iterations, across all users.
    pub total_iteration_time: usize,
    /// Number of users simulated during this load test.
    pub users: usize,
    /// The percentile ranks the summary reports, in increasing order.
    pub percentile_ranks: Vec<f32>,
    /// The host the load test was run against.
    pub host: String,
    /// How many seconds the load test ran.
    pub duration: usize,
    /// When the load test started.
    #[serde(skip)]
    pub started: Option<DateTime<Local>>,
    /// Flag indicating whether or not to display status_codes.
    pub(crate) display_status_codes: bool,
}
impl DrillMetrics {
    /// Prepare an empty DrillMetrics from a validated configuration.
    pub(crate) fn initialize(configuration: &Configuration) -> Result<Self, DrillError> {
        Ok(DrillMetrics {
            users: configuration.vus,
            percentile_ranks: configuration.percentile_ranks()?,
            host: configuration.host.clone(),
            display_status_codes: !configuration.no_status_codes,
            ..DrillMetrics::default()
        })
    }

    /// Fold one message from the metrics channel into the aggregates.
    pub(crate) fn record(&mut self, metric: DrillMetric) {
        match metric {
            DrillMetric::Request(request_metric) => self.record_request(request_metric),
            DrillMetric::Iteration(iteration_metric) => self.record_iteration(iteration_metric),
        }
    }

    fn record_request(&mut self, request_metric: RequestMetric) {
        let tag_metrics = self
            .tags
            .entry(request_metric.tag.clone())
            .or_insert_with(|| TagMetrics::new(&request_metric.tag, request_metric.method));
        tag_metrics.record_time(request_metric.response_time);
        tag_metrics.record_status_code(request_metric.status_code);
        if request_metric.success {
            tag_metrics.success_count += 1;
        } else {
            tag_metrics.fail_count += 1;
        }
    }

    fn record_iteration(&mut self, iteration_metric: IterationMetric) {
        self.iterations += 1;
        self.total_iteration_time += iteration_metric.run_time as usize;
    }

    /// Total requests recorded across all tags.
    pub fn requests(&self) -> usize {
        self.tags.values().map(|t| t.response_time_counter).sum()
    }

    /// Prepares a table of requests and fails.
    pub(crate) fn fmt_requests(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            return Ok(());
        }

        writeln!(fmt, "\n === PER TAG METRICS ===")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>13} | {:>14} | {:>8} | {:>7}",
            "Name", "# reqs", "# fails", "req/s", "fail/s"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;

        let mut aggregate_total_count = 0;
        let mut aggregate_fail_count = 0;
        for tag_metrics in self.tags.values() {
            let total_count = tag_metrics.response_time_counter;
            let fail_percent = if total_count > 0 {
                tag_metrics.fail_count as f32 / total_count as f32 * 100.0
            } else {
                0.0
            };
            let (reqs, fails) =
                per_second_calculations(self.duration, total_count, tag_metrics.fail_count);
            // Compress 100.0 and 0.0 to 100 and 0 respectively to save width.
            let fail_and_percent = if fail_percent as usize == 100 || fail_percent as usize == 0 {
                format!(
                    "{} ({}%)",
                    format_number(tag_metrics.fail_count),
                    fail_percent as usize
                )
            } else {
                format!(
                    "{} ({:.1}%)",
                    format_number(tag_metrics.fail_count),
                    fail_percent
                )
            };
            writeln!(
                fmt,
                " {:<24} | {:>13} | {:>14} | {:>8.reqs_p$} | {:>7.fails_p$}",
                util::truncate_string(&tag_metrics.tag, 24),
                format_number(total_count),
                fail_and_percent,
                reqs,
                fails,
                reqs_p = determine_precision(reqs),
                fails_p = determine_precision(fails),
            )?;
            aggregate_total_count += total_count;
            aggregate_fail_count += tag_metrics.fail_count;
        }
        if self.tags.len() > 1 {
            writeln!(
                fmt,
                " -------------------------+---------------+----------------+----------+--------"
            )?;
            let aggregate_fail_percent = if aggregate_total_count > 0 {
                aggregate_fail_count as f32 / aggregate_total_count as f32 * 100.0
            } else {
                0.0
            };
            let (reqs, fails) =
                per_second_calculations(self.duration, aggregate_total_count, aggregate_fail_count);
            let fail_and_percent =
                if aggregate_fail_percent as usize == 100 || aggregate_fail_percent as usize == 0 {
                    format!(
                        "{} ({}%)",
                        format_number(aggregate_fail_count),
                        aggregate_fail_percent as usize
                    )
                } else {
                    format!(
                        "{} ({:.1}%)",
                        format_number(aggregate_fail_count),
                        aggregate_fail_percent
                    )
                };
            writeln!(
                fmt,
                " {:<24} | {:>13} | {:>14} | {:>8.reqs_p$} | {:>7.fails_p$}",
                "Aggregated",
                format_number(aggregate_total_count),
                fail_and_percent,
                reqs,
                fails,
                reqs_p = determine_precision(reqs),
                fails_p = determine_precision(fails),
            )?;
        }

        Ok(())
    }

    /// Prepares a table of response times.
    pub(crate) fn fmt_response_times(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>11} | {:>10} | {:>11} | {:>10}",
            "Name", "Avg (ms)", "Min", "Max", "Median"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;

        for tag_metrics in self.tags.values() {
            let average = tag_metrics.average_response_time();
            writeln!(
                fmt,
                " {:<24} | {:>11.avg_p$} | {:>10} | {:>11} | {:>10}",
                util::truncate_string(&tag_metrics.tag, 24),
                average,
                format_number(tag_metrics.min_response_time),
                format_number(tag_metrics.max_response_time),
                format_number(tag_metrics.percentile(50.0)),
                avg_p = determine_precision(average),
            )?;
        }

        Ok(())
    }

    /// Prepares a table of the slowest response times within the configured percentiles.
    pub(crate) fn fmt_percentiles(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() || self.percentile_ranks.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " Slowest response within specified percentile of requests (in ms):"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        let mut header = format!(" {:<24}", "Name");
        for rank in &self.percentile_ranks {
            header.push_str(&format!(" | {:>6}", format_rank(*rank)));
        }
        writeln!(fmt, "{}", header)?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;

        for tag_metrics in self.tags.values() {
            let mut row = format!(" {:<24}", util::truncate_string(&tag_metrics.tag, 24));
            for rank in &self.percentile_ranks {
                row.push_str(&format!(
                    " | {:>6}",
                    format_number(tag_metrics.percentile(*rank))
                ));
            }
            writeln!(fmt, "{}", row)?;
        }

        Ok(())
    }

    /// Optionally prepares a table of response status codes.
    pub(crate) fn fmt_status_codes(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() || !self.display_status_codes {
            return Ok(());
        }

        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<24} | {:>51}", "Name", "Status codes")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;

        let mut aggregated_status_code_counts: HashMap<u16, usize> = HashMap::new();
        for tag_metrics in self.tags.values() {
            let codes = prepare_status_codes(
                &tag_metrics.status_code_counts,
                &mut Some(&mut aggregated_status_code_counts),
            );
            writeln!(
                fmt,
                " {:<24} | {:>51}",
                util::truncate_string(&tag_metrics.tag, 24),
                codes,
            )?;
        }
        if self.tags.len() > 1 {
            writeln!(
                fmt,
                " -------------------------+---------------------------------------------------"
            )?;
            let codes = prepare_status_codes(&aggregated_status_code_counts, &mut None);
            writeln!(fmt, " {:<24} | {:>51}", "Aggregated", codes)?;
        }

        Ok(())
    }

    /// Prepares an overview of the configuration and run.
    pub(crate) fn fmt_overview(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " Users: {}", self.users)?;
        writeln!(fmt, " Target host: {}", self.host)?;
        if let Some(started) = self.started {
            writeln!(
                fmt,
                " Started: {} (ran for {})",
                started.format("%Y-%m-%d %H:%M:%S"),
                format_duration(self.duration),
            )?;
        }
        if self.incomplete_iterations > 0 {
            writeln!(
                fmt,
                " Iterations: {} completed, {} incomplete (grace period expired)",
                format_number(self.iterations),
                format_number(self.incomplete_iterations),
            )?;
        } else {
            writeln!(fmt, " Iterations: {} completed", format_number(self.iterations))?;
        }
        writeln!(fmt, "\n {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;

        Ok(())
    }
}

impl fmt::Display for DrillMetrics {
    /// Implement display of metrics with `{}` marker.
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_requests(fmt)?;
        self.fmt_response_times(fmt)?;
        self.fmt_percentiles(fmt)?;
        self.fmt_status_codes(fmt)?;
        self.fmt_overview(fmt)
    }
}

/// Get the response time that a certain percent of the requests finished within.
///
/// Nearest-rank over the rounded histogram: walk the sorted times summing
/// counters until at least `ceil(percent / 100 * total)` requests are
/// covered, clamping the rounded bucket value into the observed min/max.
pub(crate) fn calculate_percentile(
    response_times: &BTreeMap<usize, usize>,
    total_requests: usize,
    min: usize,
    max: usize,
    percent: f32,
) -> usize {
    if total_requests == 0 {
        return 0;
    }

    let percentile_request =
        ((total_requests as f32 * percent / 100.0).ceil() as usize).clamp(1, total_requests);

    let mut total_count: usize = 0;
    for (value, counter) in response_times {
        total_count += counter;
        if total_count >= percentile_request {
            // Times are stored rounded, so the matching bucket can fall outside
            // the actual observed range.
            if *value < min {
                return min;
            } else if *value > max {
                return max;
            } else {
                return *value;
            }
        }
    }
    max
}

/// Calculate per-second average for total and fail counts.
pub(crate) fn per_second_calculations(duration: usize, total: usize, fail: usize) -> (f32, f32) {
    let requests_per_second;
    let fails_per_second;
    if duration == 0 {
        requests_per_second = 0.0;
        fails_per_second = 0.0;
    } else {
        requests_per_second = total as f32 / duration as f32;
        fails_per_second = fail as f32 / duration as f32;
    }
    (requests_per_second, fails_per_second)
}

fn determine_precision(value: f32) -> usize {
    if value < 1000.0 {
        2
    } else {
        0
    }
}

/// Format large number in locale appropriate style.
pub(crate) fn format_number(number: usize) -> String {
    (number).to_formatted_string(&Locale::en)
}

// Display a percentile rank, without a trailing ".0" for whole ranks.
fn format_rank(rank: f32) -> String {
    if rank.fract() == 0.0 {
        format!("{}%", rank as usize)
    } else {
        format!("{}%", rank)
    }
}

// Display seconds as hh:mm:ss.
fn format_duration(duration: usize) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        duration / 3600,
        (duration % 3600) / 60,
        duration % 60
    )
}

/// Helper to count and aggregate seen status codes.
pub(crate) fn prepare_status_codes(
    status_code_counts: &HashMap<u16, usize>,
    aggregate_counts: &mut Option<&mut HashMap<u16, usize>>,
) -> String {
    let mut codes: String = "".to_string();
    for (status_code, count) in status_code_counts {
        if codes.is_empty() {
            codes = format!("{} [{}]", format_number(*count), status_code);
        } else {
            codes = format!("{}, {} [{}]", codes.clone(), format_number(*count), status_code);
        }
        if let Some(aggregate_status_code_counts) = aggregate_counts.as_mut() {
            let new_count = match aggregate_status_code_counts.get(status_code) {
                Some(existing) => *existing + *count,
                None => *count,
            };
            aggregate_status_code_counts.insert(*status_code, new_count);
        }
    }
    codes
}

//! Optionally writes a json-formatted summary report after running a load test.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;

use crate::metrics::{DrillMetrics, TagMetrics};
use crate::DrillError;

/// The metrics reported about one request tag.
#[derive(Debug, Clone, Serialize)]
pub struct TagReport {
    pub tag: String,
    pub method: String,
    pub number_of_requests: usize,
    pub number_of_successes: usize,
    pub number_of_failures: usize,
    pub response_time_average: f32,
    pub response_time_minimum: usize,
    pub response_time_maximum: usize,
    /// The configured percentile ranks resolved to response times, keyed
    /// "p50", "p99.9", etc.
    pub response_time_percentiles: BTreeMap<String, usize>,
    pub status_code_counts: BTreeMap<u16, usize>,
}

/// Helper to generate a single tag report.
fn get_tag_report(tag_metrics: &TagMetrics, percentile_ranks: &[f32]) -> TagReport {
    let mut response_time_percentiles = BTreeMap::new();
    for rank in percentile_ranks {
        let key = if rank.fract() == 0.0 {
            format!("p{}", *rank as usize)
        } else {
            format!("p{}", rank)
        };
        response_time_percentiles.insert(key, tag_metrics.percentile(*rank));
    }

    TagReport {
        tag: tag_metrics.tag.to_string(),
        method: tag_metrics.method.to_string(),
        number_of_requests: tag_metrics.response_time_counter,
        number_of_successes: tag_metrics.success_count,
        number_of_failures: tag_metrics.fail_count,
        response_time_average: tag_metrics.average_response_time(),
        response_time_minimum: tag_metrics.min_response_time,
        response_time_maximum: tag_metrics.max_response_time,
        response_time_percentiles,
        status_code_counts: tag_metrics.status_code_counts.iter().map(|(k, v)| (*k, *v)).collect(),
    }
}

/// The full machine-readable summary of a completed load test.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub package: &'static str,
    pub version: &'static str,
    pub started: String,
    pub duration: usize,
    pub host: String,
    pub users: usize,
    pub iterations: usize,
    pub incomplete_iterations: usize,
    pub tags: Vec<TagReport>,
}

impl Report {
    /// Build a report from the final metrics.
    pub(crate) fn build(metrics: &DrillMetrics) -> Report {
        Report {
            package: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            started: match metrics.started {
                Some(started) => started.format("%Y-%m-%d %H:%M:%S").to_string(),
                None => "".to_string(),
            },
            duration: metrics.duration,
            host: metrics.host.to_string(),
            users: metrics.users,
            iterations: metrics.iterations,
            incomplete_iterations: metrics.incomplete_iterations,
            tags: metrics
                .tags
                .values()
                .map(|tag_metrics| get_tag_report(tag_metrics, &metrics.percentile_ranks))
                .collect(),
        }
    }
}

/// Write the json-formatted report to the configured file.
pub(crate) fn write_json_report(path: &str, metrics: &DrillMetrics) -> Result<(), DrillError> {
    let report = Report::build(metrics);
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &report)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    info!("wrote json report file: {}", path);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::KvMethod;
    use crate::metrics::{DrillMetric, RequestMetric};

    #[test]
    fn report_resolves_percentiles() {
        let mut metrics = DrillMetrics::default();
        metrics.percentile_ranks = vec![50.0, 99.9];
        metrics.users = 1;
        for response_time in 1..=10 {
            let mut request_metric =
                RequestMetric::new("get", KvMethod::Get, "http://127.0.0.1/get", 0, 1);
            request_metric.set_response_time(response_time);
            request_metric.status_code = 200;
            request_metric.success = true;
            metrics.record(DrillMetric::Request(request_metric));
        }

        let report = Report::build(&metrics);
        assert_eq!(report.tags.len(), 1);
        let tag_report = &report.tags[0];
        assert_eq!(tag_report.tag, "get");
        assert_eq!(tag_report.method, "GET");
        assert_eq!(tag_report.number_of_requests, 10);
        assert_eq!(tag_report.number_of_successes, 10);
        assert_eq!(tag_report.number_of_failures, 0);
        assert_eq!(tag_report.response_time_percentiles.get("p50"), Some(&5));
        assert_eq!(tag_report.response_time_percentiles.get("p99.9"), Some(&10));
        assert_eq!(tag_report.status_code_counts.get(&200), Some(&10));
    }
}

use gumdrop::Options;
use httpmock::MockServer;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use kvdrill::prelude::*;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.
///
/// The following options are configured by default, if not set to a custom value:
///  --host <mock-server>
///  --vus 1
///  --duration 5s
///  --graceful-stop 1
///  -q --no-print-metrics
#[allow(dead_code)]
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> Configuration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare server_url here no matter what, so its lifetime is sufficient when needed.
    let server_url = server.base_url();

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using mock server if not otherwise configured.
    if !has_option(&configuration, "--host") {
        configuration.extend_from_slice(&["--host", &server_url]);
    }

    // Default to testing with 1 user if not otherwise configured.
    if !has_option(&configuration, "--vus") {
        configuration.extend_from_slice(&["--vus", "1"]);
    }

    // Default to running for 5 seconds if not otherwise configured.
    if !has_option(&configuration, "--duration") {
        configuration.extend_from_slice(&["--duration", "5s"]);
    }

    // Default to draining for at most 1 second if not otherwise configured.
    if !has_option(&configuration, "--graceful-stop") {
        configuration.extend_from_slice(&["--graceful-stop", "1"]);
    }

    // Keep test output quiet.
    if !has_option(&configuration, "-q") {
        configuration.push("-q");
    }
    if !has_option(&configuration, "--no-print-metrics") {
        configuration.push("--no-print-metrics");
    }

    // Parse these options to generate a Configuration.
    Configuration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

// An option counts as set whether passed as "--option value" or "--option=value".
fn has_option(configuration: &[&str], option: &str) -> bool {
    configuration
        .iter()
        .any(|value| *value == option || value.starts_with(&format!("{}=", option)))
}

/// Build a compact version of the reference workload: the same two groups,
/// tags, endpoints and key namespace, with a configurable key count and pause
/// so one iteration completes in test-friendly time.
#[allow(dead_code)]
pub fn fast_kv_scenario(keys: usize, pause: Duration) -> Scenario {
    Scenario::new()
        .register_group(
            Group::new("Set Requests").register_step(Step::new(
                "post",
                keys,
                pause,
                Arc::new(|vu_id, local_index| KvRequestSpec {
                    method: KvMethod::Post,
                    path: "/set".to_string(),
                    query: Vec::new(),
                    payload: Some(json!({
                        "key": generate_key(vu_id, local_index),
                        "value": format!("test-value-{}", local_index),
                    })),
                }),
            )),
        )
        .register_group(
            Group::new("Get Requests").register_step(Step::new(
                "get",
                keys,
                pause,
                Arc::new(|vu_id, local_index| KvRequestSpec {
                    method: KvMethod::Get,
                    path: "/get".to_string(),
                    query: vec![("key".to_string(), generate_key(vu_id, local_index))],
                    payload: None,
                }),
            )),
        )
}

/// Confirm that percentile values never decrease as the rank increases.
#[allow(dead_code)]
pub fn assert_percentiles_non_decreasing(tag_metrics: &TagMetrics) {
    let mut previous = 0;
    for rank in &[50.0, 90.0, 95.0, 99.0] {
        let value = tag_metrics.percentile(*rank);
        assert!(
            value >= previous,
            "percentile {} ({}) is smaller than the previous rank ({})",
            rank,
            value,
            previous
        );
        previous = value;
    }
}

/// Helper to delete test artifacts, if existing.
#[allow(dead_code)]
pub fn cleanup_files(files: Vec<&str>) {
    for file in files {
        if std::path::Path::new(file).exists() {
            std::fs::remove_file(file).expect("failed to remove file");
        }
    }
}

use httpmock::prelude::*;
use serial_test::serial;
use std::time::Duration;

mod common;

use kvdrill::prelude::*;

const REPORT_FILE: &str = "kvdrill-test-report.json";

#[test]
#[serial]
// A json report is written at the end of the run, with the configured
// percentile ranks resolved to response times per tag.
fn test_json_report() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(POST).path("/set");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(GET).path("/get");
        then.status(500);
    });

    let configuration = common::build_configuration(
        &server,
        vec![
            "--vus",
            "1",
            "--iterations",
            "1",
            "--duration",
            "30s",
            "--report-file",
            REPORT_FILE,
            "--percentiles",
            "50,99",
        ],
    );
    let drill_metrics = KvDrill::initialize_with_config(configuration)
        .unwrap()
        .set_scenario(common::fast_kv_scenario(4, Duration::from_millis(1)))
        .execute()
        .unwrap();

    let report_contents =
        std::fs::read_to_string(REPORT_FILE).expect("no report file was written");
    let report: serde_json::Value =
        serde_json::from_str(&report_contents).expect("report file is not valid json");
    common::cleanup_files(vec![REPORT_FILE]);

    assert_eq!(report["package"], "kvdrill");
    assert_eq!(report["users"], 1);
    assert_eq!(report["iterations"], 1);
    assert_eq!(report["incomplete_iterations"], 0);

    // One entry per tag, in tag order: "get" sorts before "post".
    let tags = report["tags"].as_array().unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0]["tag"], "get");
    assert_eq!(tags[0]["method"], "GET");
    assert_eq!(tags[0]["number_of_requests"], 4);
    assert_eq!(tags[0]["number_of_successes"], 0);
    assert_eq!(tags[0]["number_of_failures"], 4);
    assert_eq!(tags[1]["tag"], "post");
    assert_eq!(tags[1]["number_of_successes"], 4);
    assert_eq!(tags[1]["number_of_failures"], 0);

    // The configured ranks are resolved to values, non-decreasing by rank.
    let percentiles = tags[1]["response_time_percentiles"].as_object().unwrap();
    assert_eq!(percentiles.len(), 2);
    let p50 = percentiles["p50"].as_u64().unwrap();
    let p99 = percentiles["p99"].as_u64().unwrap();
    assert!(p50 <= p99);

    // The report matches the returned metrics.
    let post_metrics = drill_metrics.tags.get("post").unwrap();
    assert_eq!(p50, post_metrics.percentile(50.0) as u64);
    assert_eq!(p99, post_metrics.percentile(99.0) as u64);
}

use httpmock::prelude::*;
use serial_test::serial;
use std::time::{Duration, Instant};

mod common;

use kvdrill::prelude::*;

const SET_PATH: &str = "/set";
const GET_PATH: &str = "/get";

fn mock_kv_endpoints(server: &MockServer) {
    server.mock(|when, then| {
        when.method(POST).path(SET_PATH);
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(GET).path(GET_PATH);
        then.status(200)
            .json_body(serde_json::json!({ "value": "test-value" }));
    });
}

#[test]
#[serial]
// The duration expires while every user is mid-iteration; with a generous
// grace period each user finishes its in-flight iteration before
// terminating, and nothing is force-aborted.
fn test_drain_completes_in_flight_iterations() {
    let server = MockServer::start();
    mock_kv_endpoints(&server);

    // 8 keys at 100ms pacing per group: one iteration takes roughly 1.6
    // seconds, longer than the 1 second duration.
    let configuration = common::build_configuration(
        &server,
        vec!["--vus", "4", "--duration", "1", "--graceful-stop", "10s"],
    );
    let started = Instant::now();
    let drill_metrics = KvDrill::initialize_with_config(configuration)
        .unwrap()
        .set_scenario(common::fast_kv_scenario(8, Duration::from_millis(100)))
        .execute()
        .unwrap();

    // Every user was mid-iteration at the stop signal, finished draining, and
    // exited without starting another iteration.
    assert_eq!(drill_metrics.iterations, 4);
    assert_eq!(drill_metrics.incomplete_iterations, 0);

    // All 4 users issued their full iteration: 8 sets and 8 gets each.
    let post_metrics = drill_metrics.tags.get("post").unwrap();
    assert_eq!(post_metrics.response_time_counter, 32);
    let get_metrics = drill_metrics.tags.get("get").unwrap();
    assert_eq!(get_metrics.response_time_counter, 32);

    // The engine returned well within duration + graceful stop.
    assert!(started.elapsed() < Duration::from_secs(11));
}

#[test]
#[serial]
// The duration expires mid-iteration and the iterations are far longer than
// the grace period: every user is force-terminated, reported as an
// incomplete iteration rather than as request errors, and the engine returns
// within duration + graceful stop.
fn test_force_terminate_stragglers() {
    let server = MockServer::start();
    mock_kv_endpoints(&server);

    // 50 keys at 100ms pacing per group: one iteration takes at least 10
    // seconds, far longer than duration plus grace.
    let configuration = common::build_configuration(
        &server,
        vec!["--vus", "3", "--duration", "1", "--graceful-stop", "1"],
    );
    let started = Instant::now();
    let drill_metrics = KvDrill::initialize_with_config(configuration)
        .unwrap()
        .set_scenario(common::fast_kv_scenario(50, Duration::from_millis(100)))
        .execute()
        .unwrap();
    let elapsed = started.elapsed();

    // No user completed an iteration; all three were aborted mid-iteration.
    assert_eq!(drill_metrics.iterations, 0);
    assert_eq!(drill_metrics.incomplete_iterations, 3);

    // Requests made before the abort were still sampled.
    let post_metrics = drill_metrics.tags.get("post").unwrap();
    assert!(post_metrics.response_time_counter > 0);
    assert_eq!(post_metrics.fail_count, 0);

    // Total run time is bounded by duration + graceful stop plus scheduling
    // slack.
    assert!(
        elapsed < Duration::from_secs(6),
        "engine took {:?} to return",
        elapsed
    );
}

#[test]
#[serial]
// A zero-length duration raises the stop signal immediately: the in-flight
// first iteration drains and the engine returns promptly.
fn test_zero_duration() {
    let server = MockServer::start();
    mock_kv_endpoints(&server);

    let configuration = common::build_configuration(
        &server,
        vec!["--vus", "2", "--duration", "0", "--graceful-stop", "10s"],
    );
    let started = Instant::now();
    let drill_metrics = KvDrill::initialize_with_config(configuration)
        .unwrap()
        .set_scenario(common::fast_kv_scenario(2, Duration::from_millis(1)))
        .execute()
        .unwrap();

    // Each user's in-flight iteration completed, nothing was force-aborted.
    assert!(drill_metrics.iterations >= 2);
    assert_eq!(drill_metrics.incomplete_iterations, 0);
    assert!(started.elapsed() < Duration::from_secs(10));
}

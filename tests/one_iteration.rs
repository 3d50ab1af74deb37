use httpmock::prelude::*;
use serial_test::serial;
use std::time::Duration;

mod common;

use kvdrill::prelude::*;

const SET_PATH: &str = "/set";
const GET_PATH: &str = "/get";

#[test]
#[serial]
// Run a single user through exactly one iteration of a compact workload with
// the target returning 200 for everything. Each key gets its own mock, so a
// hit on every mock proves the user touched exactly the expected key
// namespace, in full.
fn test_one_complete_iteration() {
    let server = MockServer::start();

    let set_requests = server.mock(|when, then| {
        when.method(POST).path(SET_PATH);
        then.status(200);
    });
    // One mock per expected key: key-1-0 through key-1-4.
    let get_requests: Vec<_> = (0..5)
        .map(|local_index| {
            let key = generate_key(1, local_index);
            server.mock(|when, then| {
                when.method(GET).path(GET_PATH).query_param("key", key.as_str());
                then.status(200)
                    .json_body(serde_json::json!({ "value": format!("test-value-{}", local_index) }));
            })
        })
        .collect();

    let configuration = common::build_configuration(
        &server,
        vec!["--vus", "1", "--iterations", "1", "--duration", "30s"],
    );
    let drill_metrics = KvDrill::initialize_with_config(configuration)
        .unwrap()
        .set_scenario(common::fast_kv_scenario(5, Duration::from_millis(1)))
        .execute()
        .unwrap();

    // The server saw every set request, and each key was read exactly once.
    assert_eq!(set_requests.hits(), 5);
    for get_request in &get_requests {
        assert_eq!(get_request.hits(), 1);
    }

    // Confirm kvdrill and the web server agree on the load.
    let post_metrics = drill_metrics.tags.get("post").unwrap();
    assert_eq!(post_metrics.response_time_counter, 5);
    assert_eq!(post_metrics.success_count, 5);
    assert_eq!(post_metrics.fail_count, 0);
    assert_eq!(post_metrics.status_code_counts[&200], 5);

    let get_metrics = drill_metrics.tags.get("get").unwrap();
    assert_eq!(get_metrics.response_time_counter, 5);
    assert_eq!(get_metrics.success_count, 5);
    assert_eq!(get_metrics.fail_count, 0);
    assert_eq!(get_metrics.status_code_counts[&200], 5);

    // Exactly one iteration completed, nothing was force-terminated.
    assert_eq!(drill_metrics.iterations, 1);
    assert_eq!(drill_metrics.incomplete_iterations, 0);
    assert_eq!(drill_metrics.users, 1);

    // Percentile values never decrease as the rank increases.
    common::assert_percentiles_non_decreasing(post_metrics);
    common::assert_percentiles_non_decreasing(get_metrics);
}

#[test]
#[serial]
// Run the full 151-key range of the reference workload (with the pacing
// removed so the test completes quickly): one user, one iteration, 151 set
// samples and 151 get samples, all successful.
fn test_full_key_range() {
    let server = MockServer::start();

    let set_requests = server.mock(|when, then| {
        when.method(POST).path(SET_PATH);
        then.status(200);
    });
    let get_requests = server.mock(|when, then| {
        when.method(GET).path(GET_PATH);
        then.status(200)
            .json_body(serde_json::json!({ "value": "test-value" }));
    });

    let configuration = common::build_configuration(
        &server,
        vec!["--vus", "1", "--iterations", "1", "--duration", "30s"],
    );
    let drill_metrics = KvDrill::initialize_with_config(configuration)
        .unwrap()
        .set_scenario(common::fast_kv_scenario(151, Duration::from_millis(0)))
        .execute()
        .unwrap();

    assert_eq!(set_requests.hits(), 151);
    assert_eq!(get_requests.hits(), 151);

    let post_metrics = drill_metrics.tags.get("post").unwrap();
    assert_eq!(post_metrics.response_time_counter, 151);
    assert_eq!(post_metrics.success_count, 151);
    assert_eq!(post_metrics.fail_count, 0);

    let get_metrics = drill_metrics.tags.get("get").unwrap();
    assert_eq!(get_metrics.response_time_counter, 151);
    assert_eq!(get_metrics.success_count, 151);
    assert_eq!(get_metrics.fail_count, 0);

    assert_eq!(drill_metrics.iterations, 1);
    assert_eq!(drill_metrics.incomplete_iterations, 0);
}

#[test]
#[serial]
// Each user iterates the scenario the configured number of times before
// exiting, and the engine returns as soon as every user is done.
fn test_multiple_iterations() {
    let server = MockServer::start();

    let set_requests = server.mock(|when, then| {
        when.method(POST).path(SET_PATH);
        then.status(200);
    });
    let get_requests = server.mock(|when, then| {
        when.method(GET).path(GET_PATH);
        then.status(200)
            .json_body(serde_json::json!({ "value": "test-value" }));
    });

    let configuration = common::build_configuration(
        &server,
        vec!["--vus", "2", "--iterations", "3", "--duration", "30s"],
    );
    let drill_metrics = KvDrill::initialize_with_config(configuration)
        .unwrap()
        .set_scenario(common::fast_kv_scenario(2, Duration::from_millis(1)))
        .execute()
        .unwrap();

    // 2 users x 3 iterations x 2 keys for each tag.
    assert_eq!(set_requests.hits(), 12);
    assert_eq!(get_requests.hits(), 12);
    assert_eq!(drill_metrics.iterations, 6);
    assert_eq!(drill_metrics.incomplete_iterations, 0);

    let post_metrics = drill_metrics.tags.get("post").unwrap();
    assert_eq!(post_metrics.success_count, 12);
    assert_eq!(post_metrics.fail_count, 0);
}

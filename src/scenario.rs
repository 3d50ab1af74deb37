//! Workload scenario definitions.
//!
//! A [`Scenario`] is an ordered list of named [`Group`]s, each an ordered
//! list of [`Step`]s. A step loops a bounded number of times, building one
//! request per loop index from its template and pausing a fixed delay after
//! each request. Every virtual user runs the scenario's groups strictly
//! sequentially, so within one user no request overlaps another.
//!
//! The engine intentionally supports only this shape: sequential grouped
//! steps with fixed pacing. [`kv_workload`] builds the reference key-value
//! workload of one set group followed by one get group.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::driver::{KvMethod, KvRequestSpec};

/// Upper bound (inclusive) on the per-user key index, giving each user 151
/// distinct keys per scenario run.
pub const KEY_INDEX_MAX: usize = 150;

/// Fixed pause after each set request.
pub const SET_PAUSE: Duration = Duration::from_millis(200);

/// Fixed pause after each get request.
pub const GET_PAUSE: Duration = Duration::from_millis(100);

/// Derive the key a user reads and writes at a given loop index.
///
/// Pure and deterministic: the same user and index always produce the same
/// key, distinct users never share a key, and distinct indexes never collide
/// for the same user. The iteration counter is deliberately not folded in, so
/// successive iterations of one user overwrite the same keys.
///
/// # Example
/// ```rust
/// use kvdrill::scenario::generate_key;
///
/// assert_eq!(generate_key(1, 0), "key-1-0");
/// assert_eq!(generate_key(30, 150), "key-30-150");
/// ```
pub fn generate_key(vu_id: usize, local_index: usize) -> String {
    format!("key-{}-{}", vu_id, local_index)
}

/// Builds the request for one loop index of a step, from the user's identity
/// and the index.
pub type StepTemplate = Arc<dyn Fn(usize, usize) -> KvRequestSpec + Send + Sync>;

/// One paced request loop within a group.
#[derive(Clone)]
pub struct Step {
    /// Tag used to bucket this step's samples (ie "post", "get").
    pub tag: String,
    /// How many requests the step issues, looping index 0 up to `count`.
    pub count: usize,
    /// Fixed pause after each request.
    pub pause: Duration,
    /// Builds the request for a given user and loop index.
    pub template: StepTemplate,
}
impl Step {
    /// Create a new step issuing `count` paced requests.
    pub fn new(tag: &str, count: usize, pause: Duration, template: StepTemplate) -> Self {
        trace!("new step: {}", tag);
        Step {
            tag: tag.to_string(),
            count,
            pause,
            template,
        }
    }
}

/// A named, ordered sequence of steps.
#[derive(Clone)]
pub struct Group {
    /// The name of the group.
    pub name: String,
    /// The steps the group runs, in registration order.
    pub steps: Vec<Step>,
}
impl Group {
    /// Create a new group.
    pub fn new(name: &str) -> Self {
        trace!("new group: {}", name);
        Group {
            name: name.to_string(),
            steps: Vec::new(),
        }
    }

    /// Register a step with the group, in the order it should run.
    pub fn register_step(mut self, step: Step) -> Self {
        trace!("{} register_step: {}", self.name, step.tag);
        self.steps.push(step);
        self
    }
}

/// An ordered sequence of groups, run to completion once per iteration.
#[derive(Clone, Default)]
pub struct Scenario {
    /// The groups each user runs sequentially, in registration order.
    pub groups: Vec<Group>,
}
impl Scenario {
    /// Create a new, empty scenario.
    pub fn new() -> Self {
        Scenario { groups: Vec::new() }
    }

    /// Register a group with the scenario, in the order it should run.
    pub fn register_group(mut self, group: Group) -> Self {
        trace!("register_group: {}", group.name);
        self.groups.push(group);
        self
    }

    /// How many requests one complete iteration of this scenario issues.
    pub fn requests_per_iteration(&self) -> usize {
        self.groups
            .iter()
            .map(|group| group.steps.iter().map(|step| step.count).sum::<usize>())
            .sum()
    }
}

/// Build the reference key-value workload.
///
/// A "Set Requests" group POSTs `{"key": "key-<user>-<index>",
/// "value": "test-value-<index>"}` to `/set` for indexes 0 through
/// [`KEY_INDEX_MAX`], pausing 200 ms after each request, then a
/// "Get Requests" group reads the same keys back with
/// `GET /get?key=<key>`, pausing 100 ms after each. 302 requests per
/// iteration in total.
pub fn kv_workload() -> Scenario {
    Scenario::new()
        .register_group(
            Group::new("Set Requests").register_step(Step::new(
                "post",
                KEY_INDEX_MAX + 1,
                SET_PAUSE,
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
                KEY_INDEX_MAX + 1,
                GET_PAUSE,
                Arc::new(|vu_id, local_index| KvRequestSpec {
                    method: KvMethod::Get,
                    path: "/get".to_string(),
                    query: vec![("key".to_string(), generate_key(vu_id, local_index))],
                    payload: None,
                }),
            )),
        )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_unique_per_user() {
        // A user's keys are injective across the full index range.
        let mut keys = HashSet::new();
        for local_index in 0..=KEY_INDEX_MAX {
            assert!(keys.insert(generate_key(1, local_index)));
        }
        assert_eq!(keys.len(), KEY_INDEX_MAX + 1);
    }

    #[test]
    fn keys_unique_across_users() {
        // Distinct users never share a key, for any index.
        for local_index in 0..=KEY_INDEX_MAX {
            assert_ne!(generate_key(1, local_index), generate_key(2, local_index));
            assert_ne!(generate_key(10, local_index), generate_key(101, local_index));
        }
    }

    #[test]
    fn keys_deterministic() {
        assert_eq!(generate_key(7, 42), generate_key(7, 42));
        assert_eq!(generate_key(1, 0), "key-1-0");
        assert_eq!(generate_key(30, 150), "key-30-150");
    }

    #[test]
    fn workload_shape() {
        let scenario = kv_workload();

        // Two groups, sets strictly before gets.
        assert_eq!(scenario.groups.len(), 2);
        assert_eq!(scenario.groups[0].name, "Set Requests");
        assert_eq!(scenario.groups[1].name, "Get Requests");

        // One step each, 151 requests each, 302 per iteration.
        assert_eq!(scenario.groups[0].steps.len(), 1);
        assert_eq!(scenario.groups[1].steps.len(), 1);
        assert_eq!(scenario.groups[0].steps[0].count, 151);
        assert_eq!(scenario.groups[1].steps[0].count, 151);
        assert_eq!(scenario.requests_per_iteration(), 302);

        // Tags and pacing match the reference workload.
        assert_eq!(scenario.groups[0].steps[0].tag, "post");
        assert_eq!(scenario.groups[0].steps[0].pause, Duration::from_millis(200));
        assert_eq!(scenario.groups[1].steps[0].tag, "get");
        assert_eq!(scenario.groups[1].steps[0].pause, Duration::from_millis(100));
    }

    #[test]
    fn set_template() {
        let scenario = kv_workload();
        let spec = (scenario.groups[0].steps[0].template)(1, 3);

        assert_eq!(spec.method, KvMethod::Post);
        assert_eq!(spec.path, "/set");
        assert!(spec.query.is_empty());
        assert_eq!(
            spec.payload.unwrap(),
            json!({"key": "key-1-3", "value": "test-value-3"})
        );
    }

    #[test]
    fn get_template() {
        let scenario = kv_workload();
        let spec = (scenario.groups[1].steps[0].template)(2, 150);

        assert_eq!(spec.method, KvMethod::Get);
        assert_eq!(spec.path, "/get");
        assert_eq!(
            spec.query,
            vec![("key".to_string(), "key-2-150".to_string())]
        );
        assert!(spec.payload.is_none());
    }
}

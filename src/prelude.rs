pub use crate::config::Configuration;
pub use crate::driver::{KvMethod, KvRequestSpec, KvUser, Outcome};
pub use crate::metrics::{DrillMetrics, TagMetrics};
pub use crate::scenario::{generate_key, kv_workload, Group, Scenario, Step, StepTemplate};
pub use crate::{DrillError, KvDrill};

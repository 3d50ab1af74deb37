//! The request driver: issues a single tagged request against the key-value
//! service and classifies the outcome.
//!
//! Each virtual user owns a [`KvUser`] with its own
//! [`reqwest::Client`](https://docs.rs/reqwest/*/reqwest/struct.Client.html)
//! instance. Every call to [`KvUser::execute`] performs one network request
//! and emits exactly one [`RequestMetric`](crate::metrics::RequestMetric) to
//! the parent, regardless of outcome. A request is a success only when the
//! service returns status 200; any other status, and any transport-level
//! failure such as a refused connection or an expired timeout, is recorded as
//! a failure. Failures are logged and absorbed into the metrics, never raised
//! as errors.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::Configuration;
use crate::metrics::{DrillMetric, RequestMetric};
use crate::DrillError;

/// Default per-request timeout, in seconds. Expiry classifies as a failure.
const DEFAULT_TIMEOUT: u64 = 60;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// HTTP methods the key-value workload uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KvMethod {
    Get,
    Post,
}

/// Display method in upper case.
impl fmt::Display for KvMethod {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", format!("{:?}", self).to_uppercase())
    }
}

/// A fully-formed request for the driver to issue, built by a
/// [`Step`](crate::scenario::Step) template.
#[derive(Debug, Clone)]
pub struct KvRequestSpec {
    /// The method to use (ie Get, Post).
    pub method: KvMethod,
    /// Path relative to the configured host, for example "/set".
    pub path: String,
    /// Optional query parameters appended to the URL.
    pub query: Vec<(String, String)>,
    /// Optional JSON payload sent as the request body.
    pub payload: Option<serde_json::Value>,
}

/// Classification of a single request, after the sample has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The service returned status 200.
    Success,
    /// Any other status, or a transport-level failure.
    Failure,
}

/// One virtual user's state, passed into the scenario runner.
///
/// The identity is assigned by the scheduler at spawn time and never changes
/// for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct KvUser {
    /// The user's identity, a unique integer starting at 1.
    pub id: usize,
    /// How many complete scenario runs this user has finished.
    pub iterations: usize,
    /// A local copy of the global configuration.
    pub config: Configuration,
    /// This user's reqwest client, used for all of its requests.
    pub(crate) client: Client,
    /// The base URL all request paths are joined to.
    pub(crate) base_url: Url,
    /// Channel used to send metrics to the parent.
    pub(crate) metrics_tx: flume::Sender<DrillMetric>,
    /// When the load test started, the epoch for sample timestamps.
    pub(crate) started: Instant,
}
impl KvUser {
    /// Create a user state with its own client.
    pub(crate) fn new(
        id: usize,
        configuration: &Configuration,
        metrics_tx: flume::Sender<DrillMetric>,
        started: Instant,
    ) -> Result<Self, DrillError> {
        let timeout = configuration.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(timeout))
            .build()?;
        // Host validity was confirmed before any user is spawned.
        let base_url = Url::parse(&configuration.host).map_err(|parse_error| {
            DrillError::InvalidHost {
                host: configuration.host.to_string(),
                detail: "failed to parse configured host".to_string(),
                parse_error,
            }
        })?;

        Ok(KvUser {
            id,
            iterations: 0,
            config: configuration.clone(),
            client,
            base_url,
            metrics_tx,
            started,
        })
    }

    /// A helper to join a request path and query onto the configured host.
    pub(crate) fn build_url(&self, spec: &KvRequestSpec) -> Result<Url, url::ParseError> {
        let mut url = self.base_url.join(&spec.path)?;
        if !spec.query.is_empty() {
            url.query_pairs_mut().extend_pairs(
                spec.query
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            );
        }
        Ok(url)
    }

    /// Issue one request and record one sample.
    ///
    /// Always returns an [`Outcome`]: request-level problems are classified
    /// and absorbed into the metrics rather than propagated.
    pub async fn execute(&self, tag: &str, spec: &KvRequestSpec) -> Outcome {
        let url = match self.build_url(spec) {
            Ok(url) => url,
            Err(e) => {
                // An unbuildable URL never reaches the network, record the
                // failure against the raw path instead.
                let mut raw_request = RequestMetric::new(
                    tag,
                    spec.method,
                    &spec.path,
                    self.started.elapsed().as_millis(),
                    self.id,
                );
                raw_request.error = e.to_string();
                warn!("user {}: invalid url for {} {}: {}", self.id, spec.method, spec.path, e);
                let _ = self.metrics_tx.send(DrillMetric::Request(raw_request));
                return Outcome::Failure;
            }
        };

        let mut raw_request = RequestMetric::new(
            tag,
            spec.method,
            url.as_str(),
            self.started.elapsed().as_millis(),
            self.id,
        );

        let mut request_builder = match spec.method {
            KvMethod::Get => self.client.get(url.clone()),
            KvMethod::Post => self.client.post(url.clone()),
        };
        if let Some(payload) = &spec.payload {
            request_builder = request_builder.json(payload);
        }

        // The sample spans dispatch to response receipt or failure detection.
        let started = Instant::now();
        let outcome = match request_builder.send().await {
            Ok(response) => {
                raw_request.set_response_time(started.elapsed().as_millis());
                raw_request.set_status_code(Some(response.status()));
                if response.status() == StatusCode::OK {
                    raw_request.success = true;
                    debug!("user {}: {} {} succeeded", self.id, spec.method, url);
                    Outcome::Success
                } else {
                    raw_request.success = false;
                    warn!(
                        "user {}: {} {} returned unexpected status {}",
                        self.id,
                        spec.method,
                        url,
                        response.status()
                    );
                    Outcome::Failure
                }
            }
            Err(e) => {
                raw_request.set_response_time(started.elapsed().as_millis());
                raw_request.success = false;
                raw_request.error = e.to_string();
                warn!("user {}: {} {} failed: {}", self.id, spec.method, url, e);
                Outcome::Failure
            }
        };

        // Best effort: the parent stops draining the channel only after all
        // users have terminated.
        let _ = self.metrics_tx.send(DrillMetric::Request(raw_request));

        outcome
    }
}

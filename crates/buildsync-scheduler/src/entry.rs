//! Builds observed on the remote service.

use crate::syncer::BuilderSynchronizer;
use crate::{SyncError, SyncResult};
use buildsync_core::{BuildRequest, BuildRequestId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Status a local build request should move to, as implied by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusUpdate {
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "running")]
    Running,
    /// The remote finished the build but the request never completed
    /// locally. Whoever consumes this decides whether it failed.
    #[serde(rename = "failedIfNotCompleted")]
    FailedIfNotCompleted,
}

impl StatusUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusUpdate::Scheduled => "scheduled",
            StatusUpdate::Running => "running",
            StatusUpdate::FailedIfNotCompleted => "failedIfNotCompleted",
        }
    }
}

impl std::fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending, running or finished build on a remote builder.
///
/// Built from the remote's JSON on every poll and never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBuildEntry {
    builder_name: String,
    slave_name: Option<String>,
    build_request_id: Option<BuildRequestId>,
    in_progress: bool,
    build_number: Option<u64>,
    started_at: Option<DateTime<Utc>>,
    url: String,
}

impl RemoteBuildEntry {
    /// Parse a build record such as
    /// `{"builderName": "b1", "number": 12, "currentStep": {...},
    ///   "times": [1458704983, null], "properties": [["build_request_id", "16733", "Force Build Form"]]}`.
    pub fn from_json(syncer: &BuilderSynchronizer, raw: &Value) -> SyncResult<Self> {
        let builder_name = raw.get("builderName").and_then(Value::as_str);
        if builder_name != Some(syncer.builder_name()) {
            return Err(SyncError::Protocol(format!(
                "expected a build of \"{}\" but got one of {:?}",
                syncer.builder_name(),
                builder_name
            )));
        }

        let mut slave_name = None;
        let mut build_request_id = None;
        let slave_property = syncer.slave_property_name();
        let request_property = syncer.build_request_property_name();
        for tuple in raw
            .get("properties")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(name) = tuple.get(0).and_then(Value::as_str) else {
                continue;
            };
            let value = tuple.get(1).and_then(property_value);
            if Some(name) == slave_property {
                slave_name = value;
            } else if name == request_property {
                build_request_id = value.and_then(|value| match value.parse() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!(builder = %syncer.builder_name(), %value, "Ignoring malformed build request id");
                        None
                    }
                });
            }
        }

        let times = raw.get("times").and_then(Value::as_array);
        let in_progress = raw.get("currentStep").is_some_and(is_truthy)
            || times.is_some_and(|times| !times.get(1).is_some_and(is_truthy));
        let started_at = times
            .and_then(|times| times.first())
            .and_then(Value::as_f64)
            .and_then(|seconds| {
                DateTime::from_timestamp(seconds.trunc() as i64, (seconds.fract() * 1e9) as u32)
            });

        let build_number = raw.get("number").and_then(Value::as_u64);
        let url = match build_number {
            Some(number) => syncer.url_for_build_number(number),
            None => syncer.url(),
        };

        Ok(Self {
            builder_name: syncer.builder_name().to_string(),
            slave_name,
            build_request_id,
            in_progress,
            build_number,
            started_at,
            url,
        })
    }

    pub fn builder_name(&self) -> &str {
        &self.builder_name
    }

    pub fn build_number(&self) -> Option<u64> {
        self.build_number
    }

    pub fn slave_name(&self) -> Option<&str> {
        self.slave_name.as_deref()
    }

    pub fn build_request_id(&self) -> Option<BuildRequestId> {
        self.build_request_id
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn is_pending(&self) -> bool {
        self.build_number.is_none()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn has_finished(&self) -> bool {
        !self.is_pending() && !self.is_in_progress()
    }

    /// The builder page for pending builds, the build page otherwise.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// How `request` should be updated to agree with this entry, or `None`
    /// when the two already agree. A request this entry is not correlated
    /// with always yields `None`.
    pub fn status_if_update_needed(&self, request: &BuildRequest) -> Option<StatusUpdate> {
        if self.build_request_id != Some(request.id) {
            return None;
        }
        if self.is_pending() {
            if request.is_pending() {
                return Some(StatusUpdate::Scheduled);
            }
        } else if self.is_in_progress() {
            if !request.has_started() || request.is_scheduled() {
                return Some(StatusUpdate::Running);
            }
        } else if !request.has_finished() {
            return Some(StatusUpdate::FailedIfNotCompleted);
        }
        None
    }
}

fn property_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

//! Status snapshots reported by backends.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::spec::JobSpec;
use crate::time::{lenient_secs, opt_lenient_secs, opt_timestamp};

/// Job state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Known to the adapter but not yet handed to the backend
    New,
    /// Waiting for resources
    Queued,
    /// Held by the user or the scheduler
    Held,
    /// Running
    Active,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Canceled,
}

impl JobState {
    /// Symbolic name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            JobState::New => "NEW",
            JobState::Queued => "QUEUED",
            JobState::Held => "HELD",
            JobState::Active => "ACTIVE",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Canceled => "CANCELED",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Canceled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobState {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NEW" => Ok(JobState::New),
            "QUEUED" => Ok(JobState::Queued),
            "HELD" => Ok(JobState::Held),
            "ACTIVE" => Ok(JobState::Active),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            "CANCELED" | "CANCELLED" => Ok(JobState::Canceled),
            _ => Err(CodecError::UnknownState(s.to_string())),
        }
    }
}

/// A node allocated to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedNode {
    pub name: String,
}

/// Runtime information about a job, as far as the backend knows it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CurrentInfo {
    /// Principal that owns the job
    #[serde(default)]
    pub owner: Option<String>,

    /// Host the job was submitted from
    #[serde(default)]
    pub submit_host: Option<String>,

    /// Nodes the job runs on
    #[serde(default)]
    pub resourcelist: Vec<AllocatedNode>,

    /// CPU time consumed, in seconds
    #[serde(default, with = "opt_lenient_secs")]
    pub cpu_time: Option<i64>,

    /// Wall time consumed, in seconds
    #[serde(default, with = "lenient_secs")]
    pub wall_time: i64,

    #[serde(default, with = "opt_timestamp")]
    pub submission_time: Option<NaiveDateTime>,

    #[serde(default, with = "opt_timestamp")]
    pub dispatch_time: Option<NaiveDateTime>,
}

/// Nested status record for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Backend-assigned identifier
    pub native_id: String,

    /// Current state
    pub state: JobState,

    /// Runtime information
    #[serde(default)]
    pub current_info: CurrentInfo,

    /// The spec the job was submitted with, echoed back
    #[serde(default)]
    pub spec: JobSpec,
}

impl StatusSnapshot {
    /// Create a snapshot with empty runtime info.
    pub fn new(native_id: impl Into<String>, state: JobState, spec: JobSpec) -> Self {
        Self {
            native_id: native_id.into(),
            state,
            current_info: CurrentInfo::default(),
            spec,
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_names_round_trip_through_from_str() {
        for state in [
            JobState::New,
            JobState::Queued,
            JobState::Held,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::Canceled,
        ] {
            assert_eq!(state.name().parse::<JobState>().unwrap(), state);
        }
        assert_eq!("cancelled".parse::<JobState>().unwrap(), JobState::Canceled);
        assert!("RUNNING".parse::<JobState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Active.is_terminal());
    }

    #[test]
    fn test_state_serializes_as_name() {
        assert_eq!(serde_json::to_value(JobState::Active).unwrap(), json!("ACTIVE"));
    }

    #[test]
    fn test_wall_time_coercion() {
        for raw in [json!("3600"), json!(3600.0), json!(3600)] {
            let info: CurrentInfo = serde_json::from_value(json!({ "wall_time": raw })).unwrap();
            assert_eq!(info.wall_time, 3600);
        }
    }

    #[test]
    fn test_missing_wall_time_defaults_to_zero() {
        let info: CurrentInfo = serde_json::from_value(json!({})).unwrap();
        assert_eq!(info.wall_time, 0);
        assert!(info.cpu_time.is_none());
        assert!(info.submission_time.is_none());
    }

    #[test]
    fn test_snapshot_decodes_nested_blocks() {
        let snapshot = StatusSnapshot::from_json(
            &json!({
                "native_id": "42",
                "state": "QUEUED",
                "current_info": {
                    "owner": "u1",
                    "wall_time": "10",
                    "cpu_time": null,
                    "submission_time": "2024-01-15T10:30:00"
                },
                "spec": {
                    "executable": "/bin/hostname",
                    "attributes": {"queue_name": "batch"},
                    "resources": {"node_count": 2}
                }
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(snapshot.native_id, "42");
        assert_eq!(snapshot.state, JobState::Queued);
        assert_eq!(snapshot.current_info.owner.as_deref(), Some("u1"));
        assert_eq!(snapshot.current_info.wall_time, 10);
        assert_eq!(snapshot.spec.resources.node_count, Some(2));
    }
}

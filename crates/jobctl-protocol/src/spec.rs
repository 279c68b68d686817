//! Job specification (submission wire schema).
//!
//! The spec is backend-agnostic: backends translate it into their own
//! submission form. Unknown fields are ignored so that callers may send
//! a superset of what this version understands.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::time::duration_secs;
use crate::{DEFAULT_DURATION_SECONDS, RESOURCE_SPEC_VERSION};

/// Free-form attributes passed through to the backend, keyed by name.
pub type CustomAttributes = BTreeMap<String, serde_json::Value>;

/// A runnable job description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Human-readable job name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Path to the program to run
    #[serde(default)]
    pub executable: String,

    /// Program arguments
    #[serde(default)]
    pub arguments: Vec<String>,

    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Whether the job inherits the submitter's environment
    #[serde(default = "default_inherit_environment")]
    pub inherit_environment: bool,

    /// Extra environment variables
    #[serde(default)]
    pub environment: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<String>,

    /// Script sourced before the executable starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_launch: Option<String>,

    /// Script sourced after the executable exits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_launch: Option<String>,

    /// Launcher name (e.g. "single", "mpirun", "srun")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher: Option<String>,

    /// Resource request
    #[serde(default)]
    pub resources: ResourceSpec,

    /// Scheduling attributes
    #[serde(default)]
    pub attributes: JobAttributes,
}

fn default_inherit_environment() -> bool {
    true
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            name: None,
            executable: String::new(),
            arguments: Vec::new(),
            directory: None,
            inherit_environment: true,
            environment: HashMap::new(),
            stdin_path: None,
            stdout_path: None,
            stderr_path: None,
            pre_launch: None,
            post_launch: None,
            launcher: None,
            resources: ResourceSpec::default(),
            attributes: JobAttributes::default(),
        }
    }
}

impl JobSpec {
    /// Create a spec for an executable with default resources and attributes.
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Resource request (version 1 layout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(rename = "__version", default = "default_resource_version")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes_per_node: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores_per_process: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_cores_per_process: Option<u32>,

    #[serde(default)]
    pub exclusive_node_use: bool,
}

fn default_resource_version() -> u32 {
    RESOURCE_SPEC_VERSION
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            version: RESOURCE_SPEC_VERSION,
            node_count: None,
            process_count: None,
            processes_per_node: None,
            cpu_cores_per_process: None,
            gpu_cores_per_process: None,
            exclusive_node_use: false,
        }
    }
}

/// Scheduling attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttributes {
    /// Wall-time limit
    #[serde(default = "default_duration", with = "duration_secs")]
    pub duration: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    /// Backend-specific attributes. Keys are namespaced with the backend
    /// name (`slurm.mem`) once the spec is bound to a backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_attributes: Option<CustomAttributes>,
}

fn default_duration() -> Duration {
    Duration::from_secs(DEFAULT_DURATION_SECONDS)
}

impl Default for JobAttributes {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            queue_name: None,
            account: None,
            reservation_id: None,
            project_name: None,
            custom_attributes: None,
        }
    }
}

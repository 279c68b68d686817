//! Flat status records.
//!
//! A [`FlatRecord`] is the single-level projection of a [`StatusSnapshot`]:
//! the current-info block, the echoed spec, and the spec's `attributes` and
//! `resources` blocks all land side by side at the top level. Each field is
//! named here, so two blocks can never write the same key.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::spec::CustomAttributes;
use crate::status::{AllocatedNode, JobState, StatusSnapshot};
use crate::time::format_timestamp;

/// One job, flattened for callers that want a plain JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub native_id: String,
    pub current_state: JobState,

    // current info
    pub owner: Option<String>,
    pub submit_host: Option<String>,
    pub resourcelist: Vec<AllocatedNode>,
    pub cpu_time: Option<i64>,
    pub wall_time: i64,
    /// `YYYY-MM-DD HH:MM:SS`
    pub submission_time: Option<String>,
    /// `YYYY-MM-DD HH:MM:SS`
    pub dispatch_time: Option<String>,

    // spec
    pub name: Option<String>,
    pub executable: String,
    pub arguments: Vec<String>,
    pub directory: Option<String>,
    pub inherit_environment: bool,
    pub environment: HashMap<String, String>,
    pub stdin_path: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub pre_launch: Option<String>,
    pub post_launch: Option<String>,
    pub launcher: Option<String>,

    // spec.attributes
    /// Wall-time limit in seconds
    pub duration: f64,
    pub queue_name: Option<String>,
    pub account: Option<String>,
    pub reservation_id: Option<String>,
    pub project_name: Option<String>,
    pub custom_attributes: Option<CustomAttributes>,

    // spec.resources
    #[serde(rename = "__version")]
    pub version: u32,
    pub node_count: Option<u32>,
    pub process_count: Option<u32>,
    pub processes_per_node: Option<u32>,
    pub cpu_cores_per_process: Option<u32>,
    pub gpu_cores_per_process: Option<u32>,
    pub exclusive_node_use: bool,
}

impl FlatRecord {
    /// Project a nested snapshot onto a flat record.
    pub fn project(snapshot: &StatusSnapshot) -> Self {
        let info = &snapshot.current_info;
        let spec = &snapshot.spec;
        let attributes = &spec.attributes;
        let resources = &spec.resources;

        Self {
            native_id: snapshot.native_id.clone(),
            current_state: snapshot.state,

            owner: info.owner.clone(),
            submit_host: info.submit_host.clone(),
            resourcelist: info.resourcelist.clone(),
            cpu_time: info.cpu_time,
            wall_time: info.wall_time,
            submission_time: info.submission_time.as_ref().map(format_timestamp),
            dispatch_time: info.dispatch_time.as_ref().map(format_timestamp),

            name: spec.name.clone(),
            executable: spec.executable.clone(),
            arguments: spec.arguments.clone(),
            directory: spec.directory.clone(),
            inherit_environment: spec.inherit_environment,
            environment: spec.environment.clone(),
            stdin_path: spec.stdin_path.clone(),
            stdout_path: spec.stdout_path.clone(),
            stderr_path: spec.stderr_path.clone(),
            pre_launch: spec.pre_launch.clone(),
            post_launch: spec.post_launch.clone(),
            launcher: spec.launcher.clone(),

            duration: attributes.duration.as_secs_f64(),
            queue_name: attributes.queue_name.clone(),
            account: attributes.account.clone(),
            reservation_id: attributes.reservation_id.clone(),
            project_name: attributes.project_name.clone(),
            custom_attributes: attributes.custom_attributes.clone(),

            version: resources.version,
            node_count: resources.node_count,
            process_count: resources.process_count,
            processes_per_node: resources.processes_per_node,
            cpu_cores_per_process: resources.cpu_cores_per_process,
            gpu_cores_per_process: resources.gpu_cores_per_process,
            exclusive_node_use: resources.exclusive_node_use,
        }
    }
}

impl From<&StatusSnapshot> for FlatRecord {
    fn from(snapshot: &StatusSnapshot) -> Self {
        Self::project(snapshot)
    }
}

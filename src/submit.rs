//! Job submission
//!
//! Decodes a JSON job spec, rewrites it for the target backend, dispatches
//! it and returns the backend's id for the job. Rewriting covers:
//! - native scheduler arguments folded into custom attributes
//! - custom attribute keys namespaced as `{backend}.{key}`
//! - the backend's default queue when the spec names none
//! - `~` in the executable path expanded to the user's home

use std::path::PathBuf;

use jobctl_protocol::{CustomAttributes, JobSpec};
use tracing::{debug, info};

use crate::backend::{BackendError, BackendHandle};
use crate::identity;
use crate::job::Job;
use crate::script;

/// Submission errors
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid job spec: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[source] BackendError),

    #[error("Backend accepted the job without assigning an id")]
    MissingNativeId,
}

/// Build a new map with every key prefixed by `{prefix}.`. The input is
/// left untouched.
pub fn namespace_custom_attributes(attributes: &CustomAttributes, prefix: &str) -> CustomAttributes {
    attributes
        .iter()
        .map(|(key, value)| (format!("{}.{}", prefix, key), value.clone()))
        .collect()
}

/// Submits specs to one backend
#[derive(Debug)]
pub struct Submitter<'a> {
    handle: &'a BackendHandle,
    native_args: Vec<String>,
    home: Option<PathBuf>,
}

impl<'a> Submitter<'a> {
    pub fn new(handle: &'a BackendHandle) -> Self {
        Self {
            handle,
            native_args: Vec::new(),
            home: None,
        }
    }

    /// Scheduler arguments to merge into the spec's custom attributes
    pub fn with_native_args(mut self, args: Vec<String>) -> Self {
        self.native_args = args;
        self
    }

    /// Home directory for `~` expansion, instead of the current user's
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Rewrite a decoded spec for this backend.
    pub fn prepare(&self, mut spec: JobSpec) -> JobSpec {
        let descriptor = self.handle.descriptor();

        let custom =
            script::merge_native_args(spec.attributes.custom_attributes.take(), &self.native_args);
        spec.attributes.custom_attributes = match custom {
            Some(original) if descriptor.namespaces_custom_attributes => {
                Some(namespace_custom_attributes(&original, &descriptor.name))
            }
            other => other,
        };

        let has_queue = spec
            .attributes
            .queue_name
            .as_deref()
            .is_some_and(|q| !q.trim().is_empty());
        if !has_queue {
            spec.attributes.queue_name = descriptor.default_queue.clone();
        }

        spec.executable = match &self.home {
            Some(home) => identity::expand_user_with(&spec.executable, home),
            None => identity::expand_user(&spec.executable),
        };

        spec
    }

    /// Decode, rewrite and dispatch a JSON spec. Returns the native id.
    pub fn submit(&self, raw_spec: &str) -> Result<String, SubmitError> {
        let spec = JobSpec::from_json(raw_spec)?;
        let spec = self.prepare(spec);
        debug!(backend = %self.handle.name(), executable = %spec.executable, "dispatching job");

        let mut job = Job::new(spec);
        self.handle.submit(&mut job).map_err(SubmitError::Dispatch)?;

        let native_id = job
            .native_id()
            .filter(|id| !id.is_empty())
            .ok_or(SubmitError::MissingNativeId)?
            .to_string();
        info!(backend = %self.handle.name(), native_id = %native_id, "job submitted");
        Ok(native_id)
    }
}

/// Submit a JSON spec to `handle` with no native arguments.
pub fn submit(handle: &BackendHandle, raw_spec: &str) -> Result<String, SubmitError> {
    Submitter::new(handle).submit(raw_spec)
}

//! Job handles
//!
//! A [`Job`] owns a full [`JobSpec`] and is the only thing a backend will
//! accept for submission. A [`JobRef`] is an identifier-only view of a job
//! that already exists on a backend; it is what lookups and cancellation
//! take. Keeping them apart means a bare identifier can never be submitted.

use std::fmt;

use jobctl_protocol::JobSpec;

/// A fully specified job, before or after dispatch.
#[derive(Debug, Clone)]
pub struct Job {
    spec: JobSpec,
    native_id: Option<String>,
}

impl Job {
    /// Create an undispatched job from a spec
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            native_id: None,
        }
    }

    /// The spec this job was built from
    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Backend-assigned identifier, once dispatched
    pub fn native_id(&self) -> Option<&str> {
        self.native_id.as_deref()
    }

    /// Record the identifier a backend assigned on dispatch.
    pub fn set_native_id(&mut self, native_id: impl Into<String>) {
        self.native_id = Some(native_id.into());
    }

    /// Identifier-only view of a dispatched job
    pub fn job_ref(&self) -> Option<JobRef> {
        self.native_id.as_deref().map(JobRef::new)
    }
}

/// Identifier-only view of a job known to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobRef {
    native_id: String,
}

impl JobRef {
    /// Build a reference from a native identifier. Surrounding whitespace
    /// is dropped.
    pub fn new(native_id: impl AsRef<str>) -> Self {
        Self {
            native_id: native_id.as_ref().trim().to_string(),
        }
    }

    pub fn native_id(&self) -> &str {
        &self.native_id
    }
}

impl From<&str> for JobRef {
    fn from(native_id: &str) -> Self {
        Self::new(native_id)
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.native_id)
    }
}

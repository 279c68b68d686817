//! Job-execution backends
//!
//! A backend accepts jobs, reports their status and cancels them. The
//! adapter reaches every backend through the [`Backend`] trait and holds a
//! resolved one in a [`BackendHandle`], which pairs it with the descriptor
//! (name and capabilities) it was built from.
//!
//! Implementations:
//! - [`local::LocalBackend`]: detached processes on this host
//! - [`slurm::SlurmBackend`]: `sbatch` / `squeue` / `scancel`
//! - [`mock::MockBackend`]: in-memory, with failure injection, for tests

pub mod local;
pub mod mock;
pub mod slurm;

use std::fmt;
use std::io;

use jobctl_protocol::StatusSnapshot;
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobRef};

pub use local::LocalBackend;
pub use mock::MockBackend;
pub use slurm::{CommandOutput, CommandRunner, Invocation, SlurmBackend, SlurmConfig, SystemRunner};

/// Backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Invalid job id specified: {native_id}")]
    NotFound { native_id: String },

    #[error("Dispatch rejected: {0}")]
    Dispatch(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("`{command}` exited with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    /// Create a not-found error for a job reference
    pub fn not_found(job: &JobRef) -> Self {
        BackendError::NotFound {
            native_id: job.native_id().to_string(),
        }
    }

    /// True when the backend does not know the job
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// The backend collaborator contract.
pub trait Backend: Send + Sync {
    /// Dispatch a job and record the native id on it.
    fn submit(&self, job: &mut Job) -> BackendResult<()>;

    /// Status of a single job. Zero or one snapshot.
    fn query_by_id(&self, job: &JobRef) -> BackendResult<Vec<StatusSnapshot>>;

    /// Status of every job owned by `owner`.
    fn query_by_owner(&self, owner: &str) -> BackendResult<Vec<StatusSnapshot>>;

    /// Status of every job the backend knows about.
    fn query_all(&self) -> BackendResult<Vec<StatusSnapshot>>;

    /// Request cancellation. Unknown ids fail with [`BackendError::NotFound`].
    fn cancel(&self, job: &JobRef) -> BackendResult<()>;
}

/// Kind of backend an entry resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local process executor
    Local,
    /// Slurm workload manager
    Slurm,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Slurm => "slurm",
        }
    }

    /// Whether custom attributes are namespaced unless configured otherwise.
    pub fn namespaces_by_default(&self) -> bool {
        !matches!(self, BackendKind::Local)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name and capabilities of a resolved backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    /// Registry name; prefixes custom attributes when namespacing
    pub name: String,
    pub kind: BackendKind,
    /// Rewrite custom attribute keys to `{name}.{key}` on submission
    pub namespaces_custom_attributes: bool,
    /// Queue used when a spec names none
    pub default_queue: Option<String>,
}

impl BackendDescriptor {
    /// Descriptor with the kind's default capabilities
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            namespaces_custom_attributes: kind.namespaces_by_default(),
            default_queue: None,
        }
    }

    pub fn with_namespacing(mut self, enabled: bool) -> Self {
        self.namespaces_custom_attributes = enabled;
        self
    }

    pub fn with_default_queue(mut self, queue: Option<String>) -> Self {
        self.default_queue = queue;
        self
    }
}

/// A live backend together with its descriptor.
pub struct BackendHandle {
    descriptor: BackendDescriptor,
    backend: Box<dyn Backend>,
}

impl BackendHandle {
    pub fn new(descriptor: BackendDescriptor, backend: Box<dyn Backend>) -> Self {
        Self { descriptor, backend }
    }

    /// Backend name, used for attribute namespacing
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn submit(&self, job: &mut Job) -> BackendResult<()> {
        self.backend.submit(job)
    }

    pub fn query_by_id(&self, job: &JobRef) -> BackendResult<Vec<StatusSnapshot>> {
        self.backend.query_by_id(job)
    }

    pub fn query_by_owner(&self, owner: &str) -> BackendResult<Vec<StatusSnapshot>> {
        self.backend.query_by_owner(owner)
    }

    pub fn query_all(&self) -> BackendResult<Vec<StatusSnapshot>> {
        self.backend.query_all()
    }

    pub fn cancel(&self, job: &JobRef) -> BackendResult<()> {
        self.backend.cancel(job)
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults_follow_kind() {
        assert!(!BackendDescriptor::new("local", BackendKind::Local).namespaces_custom_attributes);
        assert!(BackendDescriptor::new("slurm", BackendKind::Slurm).namespaces_custom_attributes);
        assert!(
            !BackendDescriptor::new("slurm", BackendKind::Slurm)
                .with_namespacing(false)
                .namespaces_custom_attributes
        );
    }

    #[test]
    fn test_not_found_error() {
        let err = BackendError::not_found(&JobRef::new("77"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Invalid job id specified: 77");
        assert!(!BackendError::Query("down".into()).is_not_found());
    }

    #[test]
    fn test_handle_delegates_to_backend() {
        let handle = BackendHandle::new(
            BackendDescriptor::new("mock", BackendKind::Slurm),
            Box::new(MockBackend::new()),
        );

        let mut job = Job::new(jobctl_protocol::JobSpec::new("/bin/true"));
        handle.submit(&mut job).unwrap();

        let id = job.job_ref().unwrap();
        assert_eq!(handle.query_by_id(&id).unwrap().len(), 1);
        assert_eq!(handle.query_all().unwrap().len(), 1);
        assert_eq!(handle.name(), "mock");
    }
}

//! Job cancellation
//!
//! Cancels a job by its backend id. The backend's answer is folded into a
//! [`CancelOutcome`] so callers can tell an unknown id (not an error for
//! the caller) apart from a backend fault.

use tracing::{info, warn};

use crate::backend::{BackendError, BackendHandle};
use crate::job::JobRef;

/// Message reported when the backend does not know the job
pub const NOT_FOUND_MESSAGE: &str = "Invalid job id specified";

/// Result of a cancel request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The backend accepted the request (or the job had already finished)
    Cancelled,
    /// The backend does not know the id
    NotFound,
    /// The backend failed; carries the detail
    BackendFailure(String),
}

impl CancelOutcome {
    /// Line to report to the caller, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            CancelOutcome::Cancelled => None,
            CancelOutcome::NotFound => Some(NOT_FOUND_MESSAGE),
            CancelOutcome::BackendFailure(detail) => Some(detail),
        }
    }

    /// Whether the caller should treat this as a failure
    pub fn is_fatal(&self) -> bool {
        matches!(self, CancelOutcome::BackendFailure(_))
    }
}

impl From<BackendError> for CancelOutcome {
    fn from(err: BackendError) -> Self {
        if err.is_not_found() {
            CancelOutcome::NotFound
        } else {
            CancelOutcome::BackendFailure(err.to_string())
        }
    }
}

/// Cancels jobs on one backend
#[derive(Debug)]
pub struct Canceller<'a> {
    handle: &'a BackendHandle,
}

impl<'a> Canceller<'a> {
    pub fn new(handle: &'a BackendHandle) -> Self {
        Self { handle }
    }

    /// Request cancellation of `native_id`
    pub fn cancel_job(&self, native_id: &str) -> CancelOutcome {
        let job = JobRef::new(native_id);
        if job.native_id().is_empty() {
            return CancelOutcome::NotFound;
        }

        match self.handle.cancel(&job) {
            Ok(()) => {
                info!(backend = %self.handle.name(), native_id = %job, "cancel requested");
                CancelOutcome::Cancelled
            }
            Err(err) => {
                warn!(backend = %self.handle.name(), native_id = %job, error = %err, "cancel failed");
                CancelOutcome::from(err)
            }
        }
    }
}

/// Cancel `native_id` on `handle`.
pub fn cancel(handle: &BackendHandle, native_id: &str) -> CancelOutcome {
    Canceller::new(handle).cancel_job(native_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendDescriptor, BackendKind, MockBackend};
    use crate::job::Job;
    use jobctl_protocol::{JobSpec, JobState};

    fn setup() -> (BackendHandle, MockBackend, String) {
        let mock = MockBackend::new();
        let mut job = Job::new(JobSpec::new("/bin/true"));
        mock.submit(&mut job).unwrap();
        let id = job.native_id().unwrap().to_string();
        let handle = BackendHandle::new(
            BackendDescriptor::new("mock", BackendKind::Slurm),
            Box::new(mock.clone()),
        );
        (handle, mock, id)
    }

    #[test]
    fn test_cancel_known_job() {
        let (handle, mock, id) = setup();
        assert_eq!(cancel(&handle, &id), CancelOutcome::Cancelled);
        let snapshots = mock.query_by_id(&JobRef::new(&id)).unwrap();
        assert_eq!(snapshots[0].state, JobState::Canceled);
    }

    #[test]
    fn test_cancel_unknown_job_is_not_found() {
        let (handle, _, _) = setup();
        let outcome = cancel(&handle, "999999");
        assert_eq!(outcome, CancelOutcome::NotFound);
        assert!(!outcome.is_fatal());
        assert_eq!(outcome.message(), Some("Invalid job id specified"));
    }

    #[test]
    fn test_blank_id_is_not_found() {
        let (handle, _, _) = setup();
        assert_eq!(cancel(&handle, "  "), CancelOutcome::NotFound);
    }

    #[test]
    fn test_backend_fault_is_distinct_from_not_found() {
        let (handle, mock, id) = setup();
        mock.fail_cancel("scheduler unreachable");

        let outcome = cancel(&handle, &id);
        assert!(outcome.is_fatal());
        assert!(matches!(outcome, CancelOutcome::BackendFailure(ref m) if m.contains("scheduler unreachable")));
    }

    #[test]
    fn test_cancelled_has_no_message() {
        assert_eq!(CancelOutcome::Cancelled.message(), None);
        assert!(!CancelOutcome::Cancelled.is_fatal());
    }
}

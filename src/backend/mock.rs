//! In-memory backend for tests
//!
//! Keeps submitted jobs in submission order behind a mutex and supports
//! failure injection per operation. Clones share state, so a test can hand
//! one clone to a [`BackendHandle`](super::BackendHandle) and keep another
//! to steer and inspect the backend.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use jobctl_protocol::{JobSpec, JobState, StatusSnapshot};

use super::{Backend, BackendError, BackendResult};
use crate::job::{Job, JobRef};

/// First native id handed out
const FIRST_NATIVE_ID: u64 = 1000;

#[derive(Debug, Default)]
struct MockState {
    jobs: Vec<StatusSnapshot>,
    submitted: u64,
}

/// Injected failures, one message per operation
#[derive(Debug, Clone, Default)]
pub struct MockFailures {
    pub submit: Option<String>,
    pub query: Option<String>,
    pub cancel: Option<String>,
}

/// In-memory backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    owner: String,
    submit_host: String,
    state: Arc<Mutex<MockState>>,
    failures: Arc<Mutex<MockFailures>>,
}

impl MockBackend {
    /// Create an empty backend that records jobs as owned by `mock-user`
    pub fn new() -> Self {
        Self::with_owner("mock-user")
    }

    /// Create an empty backend that records jobs as owned by `owner`
    pub fn with_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            submit_host: "mockhost".to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
            failures: Arc::new(Mutex::new(MockFailures::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn failures(&self) -> MutexGuard<'_, MockFailures> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every submit fail with `message`
    pub fn fail_submit(&self, message: impl Into<String>) {
        self.failures().submit = Some(message.into());
    }

    /// Make every query fail with `message`
    pub fn fail_query(&self, message: impl Into<String>) {
        self.failures().query = Some(message.into());
    }

    /// Make every cancel of a known job fail with `message`
    pub fn fail_cancel(&self, message: impl Into<String>) {
        self.failures().cancel = Some(message.into());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        *self.failures() = MockFailures::default();
    }

    /// Add a job directly, as if another client had submitted it.
    pub fn insert(&self, snapshot: StatusSnapshot) {
        self.state().jobs.push(snapshot);
    }

    /// Force a job into a state. Returns false if the job is unknown.
    pub fn set_state(&self, native_id: &str, state: JobState) -> bool {
        match self.state().jobs.iter_mut().find(|j| j.native_id == native_id) {
            Some(job) => {
                job.state = state;
                true
            }
            None => false,
        }
    }

    /// Specs of every job currently known, in submission order
    pub fn specs(&self) -> Vec<JobSpec> {
        self.state().jobs.iter().map(|j| j.spec.clone()).collect()
    }

    /// Number of jobs currently known
    pub fn len(&self) -> usize {
        self.state().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_query(&self) -> BackendResult<()> {
        match &self.failures().query {
            Some(message) => Err(BackendError::Query(message.clone())),
            None => Ok(()),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MockBackend {
    fn submit(&self, job: &mut Job) -> BackendResult<()> {
        if let Some(message) = &self.failures().submit {
            return Err(BackendError::Dispatch(message.clone()));
        }

        let mut state = self.state();
        let native_id = (FIRST_NATIVE_ID + state.submitted).to_string();
        state.submitted += 1;

        let mut snapshot = StatusSnapshot::new(&native_id, JobState::Queued, job.spec().clone());
        snapshot.current_info.owner = Some(self.owner.clone());
        snapshot.current_info.submit_host = Some(self.submit_host.clone());
        snapshot.current_info.submission_time = Some(Local::now().naive_local());
        state.jobs.push(snapshot);

        job.set_native_id(native_id);
        Ok(())
    }

    fn query_by_id(&self, job: &JobRef) -> BackendResult<Vec<StatusSnapshot>> {
        self.check_query()?;
        Ok(self
            .state()
            .jobs
            .iter()
            .filter(|j| j.native_id == job.native_id())
            .cloned()
            .collect())
    }

    fn query_by_owner(&self, owner: &str) -> BackendResult<Vec<StatusSnapshot>> {
        self.check_query()?;
        Ok(self
            .state()
            .jobs
            .iter()
            .filter(|j| j.current_info.owner.as_deref() == Some(owner))
            .cloned()
            .collect())
    }

    fn query_all(&self) -> BackendResult<Vec<StatusSnapshot>> {
        self.check_query()?;
        Ok(self.state().jobs.clone())
    }

    fn cancel(&self, job: &JobRef) -> BackendResult<()> {
        let failure = self.failures().cancel.clone();
        let mut state = self.state();

        let entry = state
            .jobs
            .iter_mut()
            .find(|j| j.native_id == job.native_id())
            .ok_or_else(|| BackendError::not_found(job))?;

        if let Some(message) = failure {
            return Err(BackendError::Rejected(message));
        }

        if !entry.state.is_terminal() {
            entry.state = JobState::Canceled;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(backend: &MockBackend, executable: &str) -> String {
        let mut job = Job::new(JobSpec::new(executable));
        backend.submit(&mut job).unwrap();
        job.native_id().unwrap().to_string()
    }

    #[test]
    fn test_submit_assigns_sequential_ids() {
        let backend = MockBackend::new();
        assert_eq!(submit(&backend, "/bin/a"), "1000");
        assert_eq!(submit(&backend, "/bin/b"), "1001");
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn test_submitted_job_is_queued_with_owner() {
        let backend = MockBackend::with_owner("u1");
        let id = submit(&backend, "/bin/a");

        let snapshots = backend.query_by_id(&JobRef::new(&id)).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].state, JobState::Queued);
        assert_eq!(snapshots[0].current_info.owner.as_deref(), Some("u1"));
        assert!(snapshots[0].current_info.submission_time.is_some());
    }

    #[test]
    fn test_cancel_unknown_job() {
        let backend = MockBackend::new();
        let err = backend.cancel(&JobRef::new("nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cancel_terminal_job_is_noop() {
        let backend = MockBackend::new();
        let id = submit(&backend, "/bin/a");
        backend.set_state(&id, JobState::Completed);

        backend.cancel(&JobRef::new(&id)).unwrap();
        let snapshots = backend.query_by_id(&JobRef::new(&id)).unwrap();
        assert_eq!(snapshots[0].state, JobState::Completed);
    }

    #[test]
    fn test_injected_failures() {
        let backend = MockBackend::new();
        let id = submit(&backend, "/bin/a");

        backend.fail_query("scheduler down");
        assert!(matches!(backend.query_all(), Err(BackendError::Query(_))));

        backend.fail_cancel("scheduler down");
        assert!(matches!(backend.cancel(&JobRef::new(&id)), Err(BackendError::Rejected(_))));

        backend.fail_submit("queue full");
        let mut job = Job::new(JobSpec::new("/bin/a"));
        assert!(matches!(backend.submit(&mut job), Err(BackendError::Dispatch(_))));
        assert!(job.native_id().is_none());

        backend.clear_failures();
        assert_eq!(backend.query_all().unwrap().len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let backend = MockBackend::new();
        let observer = backend.clone();
        submit(&backend, "/bin/a");
        assert_eq!(observer.len(), 1);
    }
}

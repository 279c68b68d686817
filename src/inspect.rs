//! Job status lookup
//!
//! Selects jobs on a backend and flattens each status snapshot into a
//! [`FlatRecord`].

use jobctl_protocol::FlatRecord;
use tracing::debug;

use crate::backend::{BackendError, BackendHandle};
use crate::job::JobRef;

/// Inspection errors
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("Query failed: {0}")]
    Query(#[source] BackendError),

    #[error("Failed to encode job records: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Which jobs to look up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    ById(String),
    ByOwner(String),
    All,
}

impl Selector {
    /// Build a selector from optional id and owner values. Blank values
    /// count as absent; an id wins over an owner.
    pub fn from_options(id: Option<&str>, owner: Option<&str>) -> Self {
        let present = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
        match (present(id), present(owner)) {
            (Some(id), _) => Selector::ById(id),
            (None, Some(owner)) => Selector::ByOwner(owner),
            (None, None) => Selector::All,
        }
    }
}

/// Look up jobs and flatten each into a record, in backend order.
pub fn inspect(handle: &BackendHandle, selector: &Selector) -> Result<Vec<FlatRecord>, InspectError> {
    let snapshots = match selector {
        Selector::ById(id) => handle.query_by_id(&JobRef::new(id)),
        Selector::ByOwner(owner) => handle.query_by_owner(owner),
        Selector::All => handle.query_all(),
    }
    .map_err(InspectError::Query)?;

    debug!(backend = %handle.name(), ?selector, jobs = snapshots.len(), "queried jobs");
    Ok(snapshots.iter().map(FlatRecord::project).collect())
}

/// Encode records as one JSON array
pub fn to_json(records: &[FlatRecord]) -> Result<String, InspectError> {
    Ok(serde_json::to_string(records)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendDescriptor, BackendKind, MockBackend};
    use crate::job::Job;
    use jobctl_protocol::{JobSpec, JobState, StatusSnapshot};

    fn handle_with(mock: &MockBackend) -> BackendHandle {
        BackendHandle::new(
            BackendDescriptor::new("mock", BackendKind::Slurm),
            Box::new(mock.clone()),
        )
    }

    fn submit(mock: &MockBackend) -> String {
        let mut job = Job::new(JobSpec::new("/bin/true"));
        mock.submit(&mut job).unwrap();
        job.native_id().unwrap().to_string()
    }

    #[test]
    fn test_selector_from_options() {
        assert_eq!(Selector::from_options(Some("12"), None), Selector::ById("12".into()));
        assert_eq!(Selector::from_options(None, Some("u1")), Selector::ByOwner("u1".into()));
        assert_eq!(Selector::from_options(None, None), Selector::All);
        assert_eq!(Selector::from_options(Some("  "), Some("")), Selector::All);
        assert_eq!(Selector::from_options(Some(""), Some("u1")), Selector::ByOwner("u1".into()));
        assert_eq!(Selector::from_options(Some("12"), Some("u1")), Selector::ById("12".into()));
    }

    #[test]
    fn test_by_id_returns_single_record() {
        let mock = MockBackend::new();
        let first = submit(&mock);
        submit(&mock);

        let records = inspect(&handle_with(&mock), &Selector::ById(first.clone())).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].native_id, first);
        assert_eq!(records[0].current_state, JobState::Queued);
    }

    #[test]
    fn test_unknown_id_is_empty_not_error() {
        let mock = MockBackend::new();
        let records = inspect(&handle_with(&mock), &Selector::ById("404".into())).unwrap();
        assert!(records.is_empty());
        assert_eq!(to_json(&records).unwrap(), "[]");
    }

    #[test]
    fn test_by_owner_filters() {
        let mock = MockBackend::with_owner("u1");
        submit(&mock);
        let mut other = StatusSnapshot::new("9", JobState::Active, JobSpec::new("/bin/x"));
        other.current_info.owner = Some("u2".into());
        mock.insert(other);

        let handle = handle_with(&mock);
        assert_eq!(inspect(&handle, &Selector::ByOwner("u1".into())).unwrap().len(), 1);
        assert_eq!(inspect(&handle, &Selector::ByOwner("u2".into())).unwrap()[0].native_id, "9");
        assert_eq!(inspect(&handle, &Selector::All).unwrap().len(), 2);
    }

    #[test]
    fn test_query_failure_is_fatal() {
        let mock = MockBackend::new();
        mock.fail_query("scheduler down");
        let err = inspect(&handle_with(&mock), &Selector::All).unwrap_err();
        assert!(matches!(err, InspectError::Query(BackendError::Query(_))));
    }

    #[test]
    fn test_json_array_of_flat_objects() {
        let mock = MockBackend::new();
        submit(&mock);
        let json = to_json(&inspect(&handle_with(&mock), &Selector::All).unwrap()).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let records = value.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].get("current_info").is_none());
        assert_eq!(records[0]["executable"], "/bin/true");
    }
}

//! jobctl - job-control adapter
//!
//! Submits jobs described by a backend-agnostic JSON spec to a named
//! execution backend, reports their status as flat JSON records, and
//! cancels them by id. Backends are configured in a TOML registry; the
//! built-in ones run jobs as local processes or through Slurm.

pub mod backend;
pub mod cancel;
pub mod config;
pub mod identity;
pub mod inspect;
pub mod job;
pub mod logging;
pub mod script;
pub mod submit;

pub use backend::{Backend, BackendDescriptor, BackendError, BackendHandle, BackendKind};
pub use cancel::{CancelOutcome, Canceller};
pub use config::{BackendEntry, BackendRegistry, ConfigError};
pub use inspect::{InspectError, Selector};
pub use job::{Job, JobRef};
pub use submit::{SubmitError, Submitter};

pub use jobctl_protocol::{FlatRecord, JobSpec, JobState, StatusSnapshot};

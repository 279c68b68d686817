//! jobctl Protocol Types
//!
//! Wire types shared by every jobctl operation: the backend-agnostic job
//! specification accepted on submission, the nested status snapshot that
//! backends report, and the flat record the inspector emits.

pub mod error;
pub mod record;
pub mod spec;
pub mod status;
pub mod time;

pub use error::CodecError;
pub use record::FlatRecord;
pub use spec::{CustomAttributes, JobAttributes, JobSpec, ResourceSpec};
pub use status::{AllocatedNode, CurrentInfo, JobState, StatusSnapshot};

/// Version tag written into `resources.__version`.
pub const RESOURCE_SPEC_VERSION: u32 = 1;

/// Default wall-time limit applied when a spec does not carry one (10 minutes).
pub const DEFAULT_DURATION_SECONDS: u64 = 600;

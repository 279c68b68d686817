//! Error types for the jobctl wire codec.

use thiserror::Error;

/// Errors raised while decoding lenient wire values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A time delta that is neither a number of seconds nor `[D-]HH:MM:SS`.
    #[error("invalid duration: '{0}'")]
    InvalidDuration(String),

    /// A timestamp in none of the accepted layouts.
    #[error("invalid timestamp: '{0}'")]
    InvalidTimestamp(String),

    /// A seconds counter that is negative or not a number.
    #[error("invalid seconds value: '{0}'")]
    InvalidSeconds(String),

    /// An unknown job state name.
    #[error("unknown job state: '{0}'")]
    UnknownState(String),
}

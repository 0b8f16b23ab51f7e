use derive_more::Display;
use grouploop_core::error::{ErrorClass, ErrorOrigin as CoreErrorOrigin, InternalError};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// Error
/// Public error type with a stable kind + origin taxonomy.
///

#[derive(Debug, Deserialize, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }

    /// True when retrying the same run cannot succeed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Validation | ErrorKind::Consistency)
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        let kind = match (err.class, err.origin) {
            (ErrorClass::Validation, _) => ErrorKind::Validation,
            (ErrorClass::InternalConsistency, _) => ErrorKind::Consistency,
            (_, CoreErrorOrigin::Executor) => ErrorKind::Executor,
            _ => ErrorKind::Internal,
        };

        Self::new(kind, err.origin.into(), err.message)
    }
}

///
/// ErrorKind
/// Public error taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    /// Caller input is unusable (null grouping value, bad config).
    Validation,

    /// Executor results disagree with the tracked group universe.
    Consistency,

    /// The backing executor failed or rejected a call.
    Executor,

    /// The caller cannot remediate this.
    Internal,
}

///
/// ErrorOrigin
/// Public origin taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    Checkpoint,
    Codec,
    Config,
    Controller,
    Evaluator,
    Executor,
    Serialize,
}

impl From<CoreErrorOrigin> for ErrorOrigin {
    fn from(origin: CoreErrorOrigin) -> Self {
        match origin {
            CoreErrorOrigin::Checkpoint => Self::Checkpoint,
            CoreErrorOrigin::Codec => Self::Codec,
            CoreErrorOrigin::Config => Self::Config,
            CoreErrorOrigin::Controller => Self::Controller,
            CoreErrorOrigin::Evaluator => Self::Evaluator,
            CoreErrorOrigin::Executor => Self::Executor,
            CoreErrorOrigin::Serialize => Self::Serialize,
        }
    }
}

///
/// TESTS
///

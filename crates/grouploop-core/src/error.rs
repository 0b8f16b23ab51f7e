use crate::{config::ConfigError, key::KeyError};
use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Facade crates project this into their public error surface.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    /// The variant (if present) must correspond to `origin`.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    /// Construct an InternalError without detail.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct a validation failure for one undefined grouping value.
    pub(crate) fn null_grouping_value(column: &str, row: usize, err: KeyError) -> Self {
        Self {
            class: ErrorClass::Validation,
            origin: ErrorOrigin::Codec,
            message: format!("grouping column '{column}' is null in group {row}: {err}"),
            detail: Some(ErrorDetail::Key(err)),
        }
    }

    /// Construct a controller-origin validation failure.
    pub(crate) fn controller_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Validation, ErrorOrigin::Controller, message)
    }

    /// Construct a controller-origin consistency failure.
    pub(crate) fn controller_consistency(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InternalConsistency,
            ErrorOrigin::Controller,
            message,
        )
    }

    /// Construct an evaluator-origin consistency failure.
    pub(crate) fn evaluator_consistency(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InternalConsistency,
            ErrorOrigin::Evaluator,
            message,
        )
    }

    /// Construct an executor-origin invariant violation.
    pub fn executor_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Executor,
            message,
        )
    }

    /// Construct an executor-origin internal error.
    pub fn executor_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Executor, message)
    }

    /// Construct an executor-origin unsupported error.
    pub fn executor_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, ErrorOrigin::Executor, message)
    }

    /// Construct a checkpoint-origin internal error.
    pub(crate) fn checkpoint_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Checkpoint, message)
    }

    /// Construct a serialize-origin internal error.
    pub(crate) fn serialize_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Serialize, message)
    }

    /// Construct a serialize-origin corruption error.
    pub(crate) fn serialize_corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Corruption, ErrorOrigin::Serialize, message)
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self.class, ErrorClass::Validation)
    }

    #[must_use]
    pub const fn is_consistency(&self) -> bool {
        matches!(self.class, ErrorClass::InternalConsistency)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

impl From<ConfigError> for InternalError {
    fn from(err: ConfigError) -> Self {
        Self {
            class: ErrorClass::Validation,
            origin: ErrorOrigin::Config,
            message: err.to_string(),
            detail: Some(ErrorDetail::Config(err)),
        }
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`InternalError`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Key(KeyError),
    #[error("{0}")]
    Config(ConfigError),
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///
/// `Validation` and `InternalConsistency` are fatal for a run and never
/// retried by the controller.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Corruption,
    Internal,
    InternalConsistency,
    InvariantViolation,
    Unsupported,
    Validation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Corruption => "corruption",
            Self::Internal => "internal",
            Self::InternalConsistency => "internal_consistency",
            Self::InvariantViolation => "invariant_violation",
            Self::Unsupported => "unsupported",
            Self::Validation => "validation",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Checkpoint,
    Codec,
    Config,
    Controller,
    Evaluator,
    Executor,
    Serialize,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Checkpoint => "checkpoint",
            Self::Codec => "codec",
            Self::Config => "config",
            Self::Controller => "controller",
            Self::Evaluator => "evaluator",
            Self::Executor => "executor",
            Self::Serialize => "serialize",
        };
        write!(f, "{label}")
    }
}

///
/// TESTS
///

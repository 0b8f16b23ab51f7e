//! Controller configuration.
//!
//! `IterationSettings` is the tunable, file-loadable part. `ControllerConfig`
//! is built once per run from caller input plus derived identifiers and is
//! immutable afterwards.

use crate::{
    checkpoint::{CheckpointSpec, RunId, generate_run_id},
    error::InternalError,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fs, path::Path};
use thiserror::Error as ThisError;

///
/// CONSTANTS
///

pub const DEFAULT_MAX_ITERATIONS: u32 = 100;
pub const DEFAULT_CHECKPOINT_PREFIX: &str = "grouploop_checkpoint";
pub const DEFAULT_MAX_STATE_BYTES: usize = 1024 * 1024;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config io error at '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("invalid config field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

///
/// IterationSettings
///
/// Loaded from the `[iteration]` table of a TOML document; every field is
/// optional and falls back to its default.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IterationSettings {
    /// Upper bound on update calls issued by `IterationController::run`.
    pub max_iterations: u32,
    /// Prefix of the per-run checkpoint relation name.
    pub checkpoint_prefix: String,
    /// Decode bound for typed group state, applied by
    /// `GroupState::decode_with`. The controller never decodes state itself.
    pub max_state_bytes: usize,
}

impl Default for IterationSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            checkpoint_prefix: DEFAULT_CHECKPOINT_PREFIX.to_string(),
            max_state_bytes: DEFAULT_MAX_STATE_BYTES,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsDocument {
    #[serde(default)]
    iteration: IterationSettings,
}

impl IterationSettings {
    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let document: SettingsDocument =
            toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        document.iteration.validate()?;

        Ok(document.iteration)
    }

    /// Read, parse, and validate settings from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

        Self::from_toml_str(&text)
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub fn with_checkpoint_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.checkpoint_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "max_iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_state_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_state_bytes",
                reason: "must be at least 1".to_string(),
            });
        }
        if !is_identifier(&self.checkpoint_prefix) {
            return Err(ConfigError::Invalid {
                field: "checkpoint_prefix",
                reason: format!(
                    "'{}' is not an identifier ([A-Za-z_][A-Za-z0-9_]*)",
                    self.checkpoint_prefix
                ),
            });
        }

        Ok(())
    }
}

///
/// ControllerConfig
///
/// Immutable per-run configuration: caller-provided source and grouping
/// columns, validated settings, and the derived checkpoint layout.
///

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    source: String,
    grouping_columns: Vec<String>,
    settings: IterationSettings,
    run_id: RunId,
    checkpoint: CheckpointSpec,
}

impl ControllerConfig {
    /// Validate caller input and derive the run's checkpoint layout.
    pub fn new<I, S>(
        source: impl Into<String>,
        grouping_columns: I,
        settings: IterationSettings,
    ) -> Result<Self, InternalError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source = source.into();
        if source.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "source",
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        let grouping_columns: Vec<String> = grouping_columns.into_iter().map(Into::into).collect();
        let mut seen = BTreeSet::new();
        for column in &grouping_columns {
            if column.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "grouping_columns",
                    reason: "column names must not be empty".to_string(),
                }
                .into());
            }
            if !seen.insert(column.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "grouping_columns",
                    reason: format!("column '{column}' is listed twice"),
                }
                .into());
            }
        }
        settings.validate()?;

        let run_id = generate_run_id();
        let relation = format!("{}_{}", settings.checkpoint_prefix, run_id.to_identifier());
        let checkpoint = CheckpointSpec::new(relation, grouping_columns.clone())?;

        Ok(Self {
            source,
            grouping_columns,
            settings,
            run_id,
            checkpoint,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn grouping_columns(&self) -> &[String] {
        &self.grouping_columns
    }

    #[must_use]
    pub const fn settings(&self) -> &IterationSettings {
        &self.settings
    }

    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    #[must_use]
    pub const fn checkpoint(&self) -> &CheckpointSpec {
        &self.checkpoint
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

///
/// TESTS
///

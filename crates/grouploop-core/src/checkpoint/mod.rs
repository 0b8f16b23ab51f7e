//! Module: checkpoint
//! Responsibility: terminal-record shape and checkpoint relation layout.
//! Does not own: provisioning or insert execution (executor port).
//! Boundary: finalize is the only producer of IterationRecord values.

mod run_id;

use crate::{
    error::InternalError,
    key::GroupKey,
    state::GroupState,
    value::Value,
};
use serde::{Deserialize, Serialize};

// re-exports
pub use run_id::{RunId, generate_run_id};

///
/// CONSTANTS
///

pub const GROUP_KEY_COLUMN: &str = "group_key";
pub const ITERATION_COLUMN: &str = "iteration";
pub const STATE_COLUMN: &str = "state";

/// Fixed leading columns of every checkpoint relation.
pub const RESERVED_COLUMNS: [&str; 3] = [GROUP_KEY_COLUMN, ITERATION_COLUMN, STATE_COLUMN];

///
/// CheckpointSpec
///
/// Layout of one run's checkpoint relation: group key (text), iteration
/// (integer), state (binary), then the original grouping columns.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CheckpointSpec {
    relation: String,
    grouping_columns: Vec<String>,
}

impl CheckpointSpec {
    /// Build a layout, rejecting grouping columns that shadow reserved columns.
    pub fn new(
        relation: impl Into<String>,
        grouping_columns: Vec<String>,
    ) -> Result<Self, InternalError> {
        let relation = relation.into();
        if relation.is_empty() {
            return Err(InternalError::checkpoint_internal(
                "checkpoint relation name must not be empty",
            ));
        }
        if let Some(column) = grouping_columns
            .iter()
            .find(|column| RESERVED_COLUMNS.contains(&column.as_str()))
        {
            return Err(InternalError::controller_validation(format!(
                "grouping column '{column}' collides with a reserved checkpoint column"
            )));
        }

        Ok(Self {
            relation,
            grouping_columns,
        })
    }

    #[must_use]
    pub fn relation(&self) -> &str {
        &self.relation
    }

    #[must_use]
    pub fn grouping_columns(&self) -> &[String] {
        &self.grouping_columns
    }

    /// Full ordered column list of the checkpoint relation.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        RESERVED_COLUMNS
            .iter()
            .map(ToString::to_string)
            .chain(self.grouping_columns.iter().cloned())
            .collect()
    }
}

///
/// IterationRecord
///
/// One terminal group as persisted at finalization.
/// `state` is `None` for failed groups.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IterationRecord {
    pub key: GroupKey,
    pub iteration: i64,
    pub state: Option<GroupState>,
    pub values: Vec<Value>,
}

///
/// RecordBatch
///
/// Column-major form of a record set: parallel arrays aligned by position,
/// handed to the executor in one bulk insert.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordBatch {
    pub keys: Vec<GroupKey>,
    pub iterations: Vec<i64>,
    pub states: Vec<Option<GroupState>>,
    pub values: Vec<Vec<Value>>,
}

impl RecordBatch {
    #[must_use]
    pub fn from_records(records: Vec<IterationRecord>) -> Self {
        let mut batch = Self {
            keys: Vec::with_capacity(records.len()),
            iterations: Vec::with_capacity(records.len()),
            states: Vec::with_capacity(records.len()),
            values: Vec::with_capacity(records.len()),
        };
        for record in records {
            batch.keys.push(record.key);
            batch.iterations.push(record.iteration);
            batch.states.push(record.state);
            batch.values.push(record.values);
        }

        batch
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// True when every column array has the same length.
    #[must_use]
    pub const fn is_aligned(&self) -> bool {
        let len = self.keys.len();
        self.iterations.len() == len && self.states.len() == len && self.values.len() == len
    }

    /// Convert back into row-major records.
    pub fn into_records(self) -> Result<Vec<IterationRecord>, InternalError> {
        if !self.is_aligned() {
            return Err(InternalError::executor_invariant(format!(
                "record batch arrays are misaligned (keys={}, iterations={}, states={}, values={})",
                self.keys.len(),
                self.iterations.len(),
                self.states.len(),
                self.values.len()
            )));
        }

        Ok(self
            .keys
            .into_iter()
            .zip(self.iterations)
            .zip(self.states)
            .zip(self.values)
            .map(|(((key, iteration), state), values)| IterationRecord {
                key,
                iteration,
                state,
                values,
            })
            .collect())
    }
}

///
/// TESTS
///

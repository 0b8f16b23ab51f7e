//! Module: executor
//! Responsibility: the query-executor port consumed by the controller.
//! Does not own: group lifecycle decisions or result interpretation.
//! Boundary: every executor interaction is one set-oriented call covering all
//! groups in the batch; the controller never issues per-group calls.

pub mod memory;

use crate::{
    checkpoint::{CheckpointSpec, RecordBatch},
    error::InternalError,
    expr::{ConditionExpression, StateExpression},
    key::GroupKey,
    state::GroupState,
    value::Value,
};

///
/// QueryExecutor
///
/// Set-oriented backing engine. Implementations evaluate caller expressions
/// against their own data for a whole batch at once.
///

pub trait QueryExecutor {
    /// Enumerate the distinct grouping tuples present in `source`.
    fn distinct_groups(
        &mut self,
        source: &str,
        grouping_columns: &[String],
    ) -> Result<Vec<Vec<Value>>, InternalError>;

    /// Create or replace the transient checkpoint relation.
    fn provision_checkpoint(&mut self, spec: &CheckpointSpec) -> Result<(), InternalError>;

    /// Evaluate `step` once per group in `batch`.
    /// Must return exactly one row per batch key.
    fn bulk_update(
        &mut self,
        batch: &UpdateBatch<'_>,
        step: &dyn StateExpression,
    ) -> Result<Vec<UpdateRow>, InternalError>;

    /// Evaluate `condition` once per group in `batch`.
    fn bulk_test(
        &mut self,
        batch: &TestBatch<'_>,
        condition: &dyn ConditionExpression,
    ) -> Result<Vec<TestRow>, InternalError>;

    /// Append records to the checkpoint relation; returns rows written.
    fn bulk_insert(
        &mut self,
        spec: &CheckpointSpec,
        batch: RecordBatch,
    ) -> Result<u64, InternalError>;
}

///
/// UpdateBatch
///
/// Parallel arrays over the active groups of one iteration, aligned by
/// position: `keys[i]`, `values[i]`, and `states[i]` describe one group.
///

#[derive(Clone, Debug)]
pub struct UpdateBatch<'a> {
    pub iteration: i64,
    pub source: &'a str,
    pub grouping_columns: &'a [String],
    pub keys: Vec<&'a GroupKey>,
    pub values: Vec<&'a [Value]>,
    pub states: Vec<Option<&'a GroupState>>,
}

impl<'a> UpdateBatch<'a> {
    #[must_use]
    pub fn new(
        iteration: i64,
        source: &'a str,
        grouping_columns: &'a [String],
        capacity: usize,
    ) -> Self {
        Self {
            iteration,
            source,
            grouping_columns,
            keys: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            states: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

///
/// TestBatch
///
/// Previous and current state of every active group, joined by key.
///

#[derive(Clone, Debug)]
pub struct TestBatch<'a> {
    pub iteration: i64,
    pub keys: Vec<&'a GroupKey>,
    pub previous: Vec<Option<&'a GroupState>>,
    pub current: Vec<Option<&'a GroupState>>,
}

impl<'a> TestBatch<'a> {
    #[must_use]
    pub fn new(iteration: i64, capacity: usize) -> Self {
        Self {
            iteration,
            keys: Vec::with_capacity(capacity),
            previous: Vec::with_capacity(capacity),
            current: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

///
/// UpdateRow
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateRow {
    pub key: GroupKey,
    pub state: Option<GroupState>,
}

///
/// TestRow
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestRow {
    pub key: GroupKey,
    pub converged: bool,
}

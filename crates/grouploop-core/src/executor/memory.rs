//! In-memory reference executor.
//!
//! Holds named relations and checkpoint tables in process memory and answers
//! every port call with one pass over the relation. Intended for tests,
//! embedding, and as the executable description of the port contract.

use crate::{
    checkpoint::{CheckpointSpec, IterationRecord, RecordBatch},
    error::InternalError,
    executor::{QueryExecutor, TestBatch, TestRow, UpdateBatch, UpdateRow},
    expr::{ConditionContext, ConditionExpression, SourceRows, StateExpression, StepContext},
    key::GroupKey,
    value::Value,
};
use std::collections::{BTreeMap, BTreeSet};

///
/// Relation
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Relation {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Relation {
    #[must_use]
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append one row; its arity must match the column list.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), InternalError> {
        if row.len() != self.columns.len() {
            return Err(InternalError::executor_invariant(format!(
                "row arity {} does not match {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);

        Ok(())
    }

    /// Builder form of [`Relation::push_row`].
    pub fn with_row(mut self, row: Vec<Value>) -> Result<Self, InternalError> {
        self.push_row(row)?;
        Ok(self)
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_indexes(&self, columns: &[String]) -> Result<Vec<usize>, InternalError> {
        columns
            .iter()
            .map(|column| {
                self.columns
                    .iter()
                    .position(|name| name == column)
                    .ok_or_else(|| {
                        InternalError::executor_invariant(format!("unknown column '{column}'"))
                    })
            })
            .collect()
    }
}

///
/// CallCounts
///
/// Number of port calls served, by kind.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CallCounts {
    pub distinct_groups: u64,
    pub provision: u64,
    pub bulk_update: u64,
    pub bulk_test: u64,
    pub bulk_insert: u64,
}

///
/// CheckpointTable
///

#[derive(Clone, Debug)]
struct CheckpointTable {
    spec: CheckpointSpec,
    records: Vec<IterationRecord>,
}

///
/// MemoryExecutor
///

#[derive(Clone, Debug, Default)]
pub struct MemoryExecutor {
    relations: BTreeMap<String, Relation>,
    checkpoints: BTreeMap<String, CheckpointTable>,
    calls: CallCounts,
}

impl MemoryExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.insert_relation(name, relation);
        self
    }

    /// Register or replace one named relation.
    pub fn insert_relation(&mut self, name: impl Into<String>, relation: Relation) {
        self.relations.insert(name.into(), relation);
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    /// Names of every provisioned checkpoint relation.
    pub fn checkpoint_names(&self) -> impl Iterator<Item = &str> {
        self.checkpoints.keys().map(String::as_str)
    }

    /// Records persisted into one checkpoint relation, in insert order.
    #[must_use]
    pub fn checkpoint(&self, name: &str) -> Option<&[IterationRecord]> {
        self.checkpoints
            .get(name)
            .map(|table| table.records.as_slice())
    }

    #[must_use]
    pub const fn calls(&self) -> CallCounts {
        self.calls
    }

    fn source(&self, name: &str) -> Result<&Relation, InternalError> {
        self.relations
            .get(name)
            .ok_or_else(|| InternalError::executor_invariant(format!("unknown relation '{name}'")))
    }
}

impl QueryExecutor for MemoryExecutor {
    fn distinct_groups(
        &mut self,
        source: &str,
        grouping_columns: &[String],
    ) -> Result<Vec<Vec<Value>>, InternalError> {
        self.calls.distinct_groups += 1;

        let relation = self.source(source)?;
        let indexes = relation.column_indexes(grouping_columns)?;

        let mut seen = BTreeSet::new();
        let mut null_tuples: Vec<Vec<Value>> = Vec::new();
        let mut groups = Vec::new();
        for row in relation.rows() {
            let tuple: Vec<Value> = indexes.iter().map(|idx| row[*idx].clone()).collect();
            match GroupKey::from_values(&tuple) {
                Ok(key) => {
                    if seen.insert(key) {
                        groups.push(tuple);
                    }
                }
                // Null tuples are reported as-is; rejecting them is the caller's job.
                Err(_) => {
                    if !null_tuples.contains(&tuple) {
                        null_tuples.push(tuple.clone());
                        groups.push(tuple);
                    }
                }
            }
        }

        Ok(groups)
    }

    fn provision_checkpoint(&mut self, spec: &CheckpointSpec) -> Result<(), InternalError> {
        self.calls.provision += 1;
        self.checkpoints.insert(
            spec.relation().to_string(),
            CheckpointTable {
                spec: spec.clone(),
                records: Vec::new(),
            },
        );

        Ok(())
    }

    fn bulk_update(
        &mut self,
        batch: &UpdateBatch<'_>,
        step: &dyn StateExpression,
    ) -> Result<Vec<UpdateRow>, InternalError> {
        self.calls.bulk_update += 1;

        if batch.values.len() != batch.len() || batch.states.len() != batch.len() {
            return Err(InternalError::executor_invariant(format!(
                "update batch arrays are misaligned (keys={}, values={}, states={})",
                batch.len(),
                batch.values.len(),
                batch.states.len()
            )));
        }

        let relation = self.source(batch.source)?;
        let indexes = relation.column_indexes(batch.grouping_columns)?;
        let wanted: BTreeSet<&GroupKey> = batch.keys.iter().copied().collect();

        // One pass partitions the source rows by group.
        let mut partitions: BTreeMap<GroupKey, Vec<&[Value]>> = BTreeMap::new();
        for row in relation.rows() {
            let tuple: Vec<Value> = indexes.iter().map(|idx| row[*idx].clone()).collect();
            let Ok(key) = GroupKey::from_values(&tuple) else {
                continue;
            };
            if wanted.contains(&key) {
                partitions.entry(key).or_default().push(row.as_slice());
            }
        }

        let mut out = Vec::with_capacity(batch.len());
        for (slot, key) in batch.keys.iter().enumerate() {
            let rows = partitions.remove(*key).unwrap_or_default();
            let ctx = StepContext::new(
                batch.iteration,
                key,
                batch.values[slot],
                batch.states[slot],
                SourceRows::new(relation.columns(), rows),
            );
            out.push(UpdateRow {
                key: (*key).clone(),
                state: step.evaluate(&ctx),
            });
        }

        Ok(out)
    }

    fn bulk_test(
        &mut self,
        batch: &TestBatch<'_>,
        condition: &dyn ConditionExpression,
    ) -> Result<Vec<TestRow>, InternalError> {
        self.calls.bulk_test += 1;

        if batch.previous.len() != batch.len() || batch.current.len() != batch.len() {
            return Err(InternalError::executor_invariant(format!(
                "test batch arrays are misaligned (keys={}, previous={}, current={})",
                batch.len(),
                batch.previous.len(),
                batch.current.len()
            )));
        }

        Ok(batch
            .keys
            .iter()
            .zip(batch.previous.iter().zip(&batch.current))
            .map(|(key, (previous, current))| {
                let ctx = ConditionContext::new(batch.iteration, key, *previous, *current);
                TestRow {
                    key: (*key).clone(),
                    converged: condition.evaluate(&ctx),
                }
            })
            .collect())
    }

    fn bulk_insert(
        &mut self,
        spec: &CheckpointSpec,
        batch: RecordBatch,
    ) -> Result<u64, InternalError> {
        self.calls.bulk_insert += 1;

        let table = self.checkpoints.get_mut(spec.relation()).ok_or_else(|| {
            InternalError::executor_invariant(format!(
                "checkpoint relation '{}' is not provisioned",
                spec.relation()
            ))
        })?;
        let arity = table.spec.grouping_columns().len();
        let records = batch.into_records()?;
        if let Some(record) = records.iter().find(|record| record.values.len() != arity) {
            return Err(InternalError::executor_invariant(format!(
                "record for group '{}' carries {} grouping values, relation expects {arity}",
                record.key,
                record.values.len()
            )));
        }

        let written = records.len() as u64;
        table.records.extend(records);

        Ok(written)
    }
}

///
/// TESTS
///

//! Module: state
//! Responsibility: per-group lifecycle bookkeeping for one controller run.
//! Does not own: executor calls, convergence evaluation, or persistence.
//! Boundary: the controller is the only mutator; everything else reads.


use crate::{
    checkpoint::IterationRecord,
    config::IterationSettings,
    error::InternalError,
    executor::{TestBatch, UpdateBatch, UpdateRow},
    key::GroupKey,
    serialize::{self, SerializeError},
    value::Value,
};
use derive_more::Deref;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, BTreeSet};

///
/// GroupState
///
/// Opaque per-group payload produced and consumed by caller expressions.
/// The controller never interprets these bytes.
///

#[derive(Clone, Debug, Deref, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GroupState(#[serde(with = "serde_bytes")] Vec<u8>);

impl GroupState {
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Encode a typed state as CBOR.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, SerializeError> {
        serialize::serialize(value).map(Self)
    }

    /// Decode a typed state produced by [`GroupState::encode`].
    pub fn decode<T: DeserializeOwned>(&self, max_bytes: usize) -> Result<T, SerializeError> {
        serialize::deserialize_bounded(&self.0, max_bytes)
    }

    /// Decode a typed state bounded by the run's `max_state_bytes`.
    pub fn decode_with<T: DeserializeOwned>(
        &self,
        settings: &IterationSettings,
    ) -> Result<T, SerializeError> {
        self.decode(settings.max_state_bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for GroupState {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

///
/// GroupStatus
///
/// `Converged` and `Failed` are terminal.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GroupStatus {
    Active,
    Converged,
    Failed,
}

impl GroupStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

///
/// GroupEntry
///

#[derive(Clone, Debug)]
pub struct GroupEntry {
    key: GroupKey,
    values: Vec<Value>,
    status: GroupStatus,
    current: Option<GroupState>,
    previous: Option<GroupState>,
}

impl GroupEntry {
    #[must_use]
    pub const fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Original grouping-column values of the group.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub const fn status(&self) -> GroupStatus {
        self.status
    }

    #[must_use]
    pub const fn current(&self) -> Option<&GroupState> {
        self.current.as_ref()
    }

    #[must_use]
    pub const fn previous(&self) -> Option<&GroupState> {
        self.previous.as_ref()
    }

    fn record(&self, iteration: i64) -> IterationRecord {
        IterationRecord {
            key: self.key.clone(),
            iteration,
            state: match self.status {
                GroupStatus::Failed => None,
                GroupStatus::Active | GroupStatus::Converged => self.current.clone(),
            },
            values: self.values.clone(),
        }
    }
}

///
/// StateStore
///
/// Arena of every group discovered at initialization, tagged by status.
///
/// The logical `active`, `previous`, `finished`, and `failed` mappings are
/// projections of this arena, so they are disjoint by construction and their
/// union is always the initial universe.
///

#[derive(Clone, Debug, Default)]
pub struct StateStore {
    entries: Vec<GroupEntry>,
    index: BTreeMap<GroupKey, usize>,
    active: usize,
    converged: usize,
    failed: usize,
    snapshot_valid: bool,
}

impl StateStore {
    /// Build the fixed universe; every group starts active with no state.
    pub(crate) fn from_groups(
        mut groups: Vec<(GroupKey, Vec<Value>)>,
    ) -> Result<Self, InternalError> {
        groups.sort_by(|(left, _), (right, _)| left.cmp(right));

        let mut store = Self::default();
        for (key, values) in groups {
            if store.index.contains_key(&key) {
                return Err(InternalError::executor_invariant(format!(
                    "distinct group enumeration returned group '{key}' twice"
                )));
            }
            store.index.insert(key.clone(), store.entries.len());
            store.entries.push(GroupEntry {
                key,
                values,
                status: GroupStatus::Active,
                current: None,
                previous: None,
            });
        }
        store.active = store.entries.len();

        Ok(store)
    }

    /// Size of the fixed group universe.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn active_len(&self) -> usize {
        self.active
    }

    #[must_use]
    pub const fn finished_len(&self) -> usize {
        self.converged
    }

    #[must_use]
    pub const fn failed_len(&self) -> usize {
        self.failed
    }

    /// True once no group remains active.
    #[must_use]
    pub const fn is_drained(&self) -> bool {
        self.active == 0
    }

    /// True between an update and its matching test.
    #[must_use]
    pub const fn snapshot_valid(&self) -> bool {
        self.snapshot_valid
    }

    #[must_use]
    pub fn entry(&self, key: &GroupKey) -> Option<&GroupEntry> {
        self.index.get(key).map(|slot| &self.entries[*slot])
    }

    #[must_use]
    pub fn status(&self, key: &GroupKey) -> Option<GroupStatus> {
        self.entry(key).map(GroupEntry::status)
    }

    /// Every group in key order.
    pub fn entries(&self) -> impl Iterator<Item = &GroupEntry> {
        self.entries.iter()
    }

    fn with_status(&self, status: GroupStatus) -> impl Iterator<Item = &GroupEntry> {
        self.entries.iter().filter(move |entry| entry.status == status)
    }

    /// Active groups and their current state.
    pub fn active(&self) -> impl Iterator<Item = (&GroupKey, Option<&GroupState>)> {
        self.with_status(GroupStatus::Active)
            .map(|entry| (&entry.key, entry.current.as_ref()))
    }

    /// Prior-iteration snapshot of active groups; empty outside the
    /// update/test window.
    pub fn previous(&self) -> impl Iterator<Item = (&GroupKey, Option<&GroupState>)> {
        let valid = self.snapshot_valid;
        self.with_status(GroupStatus::Active)
            .filter(move |_| valid)
            .map(|entry| (&entry.key, entry.previous.as_ref()))
    }

    /// Converged groups and their final state.
    pub fn finished(&self) -> impl Iterator<Item = (&GroupKey, Option<&GroupState>)> {
        self.with_status(GroupStatus::Converged)
            .map(|entry| (&entry.key, entry.current.as_ref()))
    }

    pub fn failed(&self) -> impl Iterator<Item = &GroupKey> {
        self.with_status(GroupStatus::Failed).map(|entry| &entry.key)
    }

    /// Parallel arrays over all active groups for one bulk update.
    pub(crate) fn update_batch<'a>(
        &'a self,
        iteration: i64,
        source: &'a str,
        grouping_columns: &'a [String],
    ) -> UpdateBatch<'a> {
        let mut batch = UpdateBatch::new(iteration, source, grouping_columns, self.active);
        for entry in self.with_status(GroupStatus::Active) {
            batch.keys.push(&entry.key);
            batch.values.push(&entry.values);
            batch.states.push(entry.current.as_ref());
        }

        batch
    }

    /// Parallel arrays pairing previous and current state of active groups.
    pub(crate) fn test_batch(&self, iteration: i64) -> TestBatch<'_> {
        let mut batch = TestBatch::new(iteration, self.active);
        for entry in self.with_status(GroupStatus::Active) {
            batch.keys.push(&entry.key);
            batch.previous.push(entry.previous.as_ref());
            batch.current.push(entry.current.as_ref());
        }

        batch
    }

    /// Apply one bulk update result.
    ///
    /// Rows are validated against the active set before anything mutates:
    /// every active group must be answered exactly once. Groups answered with
    /// no state move to `Failed`; the rest shift current into previous.
    /// Returns the groups that failed in this pass.
    pub(crate) fn apply_update(
        &mut self,
        rows: Vec<UpdateRow>,
    ) -> Result<Vec<GroupKey>, InternalError> {
        let mut results = BTreeMap::new();
        for row in rows {
            match self.status(&row.key) {
                Some(GroupStatus::Active) => {}
                Some(status) => {
                    return Err(InternalError::controller_consistency(format!(
                        "bulk update returned group '{}' which is already {status:?}",
                        row.key
                    )));
                }
                None => {
                    return Err(InternalError::controller_consistency(format!(
                        "bulk update returned unknown group '{}'",
                        row.key
                    )));
                }
            }
            if results.insert(row.key.clone(), row.state).is_some() {
                return Err(InternalError::controller_consistency(format!(
                    "bulk update returned group '{}' more than once",
                    row.key
                )));
            }
        }
        if results.len() != self.active {
            return Err(InternalError::controller_consistency(format!(
                "bulk update returned {} groups for {} active groups",
                results.len(),
                self.active
            )));
        }

        let mut failed = Vec::new();
        for entry in &mut self.entries {
            if entry.status != GroupStatus::Active {
                continue;
            }
            let Some(state) = results.remove(&entry.key) else {
                continue;
            };
            entry.previous = entry.current.take();
            match state {
                Some(state) => entry.current = Some(state),
                None => {
                    entry.status = GroupStatus::Failed;
                    entry.previous = None;
                    failed.push(entry.key.clone());
                }
            }
        }
        self.active -= failed.len();
        self.failed += failed.len();
        self.snapshot_valid = true;

        Ok(failed)
    }

    /// Move converged groups to `Finished`. Callers pass active keys only.
    pub(crate) fn retire_converged(
        &mut self,
        keys: &BTreeSet<GroupKey>,
    ) -> Result<usize, InternalError> {
        for key in keys {
            if self.status(key) != Some(GroupStatus::Active) {
                return Err(InternalError::controller_consistency(format!(
                    "cannot retire group '{key}': not active"
                )));
            }
        }
        for key in keys {
            let slot = self.index[key];
            let entry = &mut self.entries[slot];
            entry.status = GroupStatus::Converged;
            entry.previous = None;
        }
        self.active -= keys.len();
        self.converged += keys.len();

        Ok(keys.len())
    }

    /// Invalidate the previous-state snapshot until the next update.
    pub(crate) fn clear_previous(&mut self) {
        for entry in &mut self.entries {
            entry.previous = None;
        }
        self.snapshot_valid = false;
    }

    /// Terminal records with the given status, tagged with `iteration`.
    #[must_use]
    pub fn records(&self, status: GroupStatus, iteration: i64) -> Vec<IterationRecord> {
        self.with_status(status)
            .map(|entry| entry.record(iteration))
            .collect()
    }
}

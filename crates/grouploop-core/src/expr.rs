//! Algorithm plug-in interface.
//!
//! An algorithm supplies one [`StateExpression`] (the per-iteration step) and
//! one [`ConditionExpression`] (the convergence test). Both receive typed
//! contexts carrying the values a textual engine would substitute as
//! placeholders: iteration number, group key, and current/previous state.
//! Plain closures implement both traits.

use crate::{key::GroupKey, state::GroupState, value::Value};

///
/// RowRef
///
/// Borrowed view of one source row.
///

#[derive(Clone, Copy, Debug)]
pub struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowRef<'a> {
    #[must_use]
    pub const fn new(columns: &'a [String], values: &'a [Value]) -> Self {
        Self { columns, values }
    }

    /// Look up one column by name.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub const fn values(&self) -> &'a [Value] {
        self.values
    }
}

///
/// SourceRows
///
/// The source rows of one group, as handed to a state step.
///

#[derive(Clone, Debug)]
pub struct SourceRows<'a> {
    columns: &'a [String],
    rows: Vec<&'a [Value]>,
}

impl<'a> SourceRows<'a> {
    #[must_use]
    pub const fn new(columns: &'a [String], rows: Vec<&'a [Value]>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RowRef<'a>> + '_ {
        self.rows
            .iter()
            .map(|values| RowRef::new(self.columns, *values))
    }
}

///
/// StepContext
///
/// Inputs of one group's state step for one iteration.
///

#[derive(Clone, Debug)]
pub struct StepContext<'a> {
    iteration: i64,
    key: &'a GroupKey,
    values: &'a [Value],
    current: Option<&'a GroupState>,
    rows: SourceRows<'a>,
}

impl<'a> StepContext<'a> {
    #[must_use]
    pub const fn new(
        iteration: i64,
        key: &'a GroupKey,
        values: &'a [Value],
        current: Option<&'a GroupState>,
        rows: SourceRows<'a>,
    ) -> Self {
        Self {
            iteration,
            key,
            values,
            current,
            rows,
        }
    }

    #[must_use]
    pub const fn iteration(&self) -> i64 {
        self.iteration
    }

    #[must_use]
    pub const fn key(&self) -> &'a GroupKey {
        self.key
    }

    /// Grouping-column values of the group.
    #[must_use]
    pub const fn values(&self) -> &'a [Value] {
        self.values
    }

    /// State after the previous iteration; `None` before the first update.
    #[must_use]
    pub const fn current(&self) -> Option<&'a GroupState> {
        self.current
    }

    #[must_use]
    pub const fn rows(&self) -> &SourceRows<'a> {
        &self.rows
    }
}

///
/// ConditionContext
///
/// Paired snapshots of one group for one convergence test.
///

#[derive(Clone, Copy, Debug)]
pub struct ConditionContext<'a> {
    iteration: i64,
    key: &'a GroupKey,
    previous: Option<&'a GroupState>,
    current: Option<&'a GroupState>,
}

impl<'a> ConditionContext<'a> {
    #[must_use]
    pub const fn new(
        iteration: i64,
        key: &'a GroupKey,
        previous: Option<&'a GroupState>,
        current: Option<&'a GroupState>,
    ) -> Self {
        Self {
            iteration,
            key,
            previous,
            current,
        }
    }

    #[must_use]
    pub const fn iteration(&self) -> i64 {
        self.iteration
    }

    #[must_use]
    pub const fn key(&self) -> &'a GroupKey {
        self.key
    }

    #[must_use]
    pub const fn previous(&self) -> Option<&'a GroupState> {
        self.previous
    }

    #[must_use]
    pub const fn current(&self) -> Option<&'a GroupState> {
        self.current
    }
}

///
/// StateExpression
///
/// One iteration of an algorithm for one group. Returning `None` marks the
/// group as failed; siblings are unaffected.
///

pub trait StateExpression {
    fn evaluate(&self, ctx: &StepContext<'_>) -> Option<GroupState>;
}

impl<F> StateExpression for F
where
    F: Fn(&StepContext<'_>) -> Option<GroupState>,
{
    fn evaluate(&self, ctx: &StepContext<'_>) -> Option<GroupState> {
        self(ctx)
    }
}

///
/// ConditionExpression
///
/// Convergence predicate over one group's previous and current state.
///

pub trait ConditionExpression {
    fn evaluate(&self, ctx: &ConditionContext<'_>) -> bool;
}

impl<F> ConditionExpression for F
where
    F: Fn(&ConditionContext<'_>) -> bool,
{
    fn evaluate(&self, ctx: &ConditionContext<'_>) -> bool {
        self(ctx)
    }
}

///
/// TESTS
///

//! Convergence evaluation: one bulk join of previous and current state.
//!
//! The evaluator never mutates controller state. It validates the executor's
//! answer against the batch it asked about and hands back the converged set.

use crate::{
    error::InternalError,
    executor::{QueryExecutor, TestBatch},
    expr::ConditionExpression,
    key::GroupKey,
    obs::sink::{MetricsEvent, record},
};
use std::collections::BTreeSet;

///
/// Verdicts
///
/// Outcome of one evaluation pass.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Verdicts {
    pub converged: BTreeSet<GroupKey>,
    pub evaluated: usize,
}

///
/// ConvergenceEvaluator
///

pub struct ConvergenceEvaluator;

impl ConvergenceEvaluator {
    /// Run `condition` over every group in `batch` with one executor call.
    ///
    /// Zero rows for a non-empty batch means the tracked universe and the
    /// backing data disagree, which is a defect, not a transient fault.
    pub fn evaluate<E>(
        executor: &mut E,
        batch: &TestBatch<'_>,
        condition: &dyn ConditionExpression,
    ) -> Result<Verdicts, InternalError>
    where
        E: QueryExecutor + ?Sized,
    {
        if batch.is_empty() {
            return Ok(Verdicts::default());
        }

        let rows = executor.bulk_test(batch, condition)?;
        if rows.is_empty() {
            record(MetricsEvent::ConsistencyViolation);
            tracing::error!(
                iteration = batch.iteration,
                active = batch.len(),
                "convergence evaluation returned no rows for a non-empty active set"
            );

            return Err(InternalError::evaluator_consistency(format!(
                "convergence evaluation returned no rows for {} active groups at iteration {}",
                batch.len(),
                batch.iteration
            )));
        }

        let asked: BTreeSet<&GroupKey> = batch.keys.iter().copied().collect();
        let mut answered = BTreeSet::new();
        let mut verdicts = Verdicts::default();
        for row in rows {
            if !asked.contains(&row.key) {
                record(MetricsEvent::ConsistencyViolation);
                return Err(InternalError::evaluator_consistency(format!(
                    "convergence evaluation returned group '{}' which is not active",
                    row.key
                )));
            }
            if !answered.insert(row.key.clone()) {
                record(MetricsEvent::ConsistencyViolation);
                return Err(InternalError::evaluator_consistency(format!(
                    "convergence evaluation returned group '{}' more than once",
                    row.key
                )));
            }
            if row.converged {
                verdicts.converged.insert(row.key);
            }
        }
        verdicts.evaluated = answered.len();

        Ok(verdicts)
    }
}

///
/// TESTS
///

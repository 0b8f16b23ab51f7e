//! Module: controller
//! Responsibility: the per-group iteration lifecycle (initialize, update,
//! test, finalize) over one executor.
//! Does not own: expression semantics or executor internals.
//! Boundary: the only mutator of `StateStore` and the only caller of
//! checkpoint writes.

mod guard;

#[cfg(test)]
mod tests;

use crate::{
    checkpoint::{CheckpointSpec, RecordBatch},
    config::ControllerConfig,
    error::InternalError,
    evaluator::ConvergenceEvaluator,
    executor::QueryExecutor,
    expr::{ConditionExpression, StateExpression},
    key::{GroupKey, KeyError},
    obs::sink::{MetricsEvent, record},
    state::{GroupStatus, StateStore},
};

// re-exports
pub use guard::{ControllerGuard, scoped};

///
/// UpdateOutcome
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateOutcome {
    pub iteration: i64,
    /// Groups handed to the executor in this pass.
    pub evaluated: usize,
    /// Groups whose state came back undefined in this pass.
    pub failed: Vec<GroupKey>,
}

///
/// RunOutcome
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    /// Update calls issued.
    pub iterations: u32,
    /// True when every group was retired before the budget ran out.
    pub converged: bool,
}

///
/// FinalizeReport
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FinalizeReport {
    pub relation: String,
    pub iteration: i64,
    pub finished: u64,
    pub failed: u64,
    /// Groups still active at finalization; never persisted.
    pub dropped: usize,
}

///
/// IterationController
///
/// Drives every group of one source through update/test passes until each
/// group converges, fails, or the caller stops.
///
/// Invariants:
/// - the group universe is fixed by `initialize`;
/// - `finished` and `failed` only grow;
/// - each executor interaction covers all active groups in one call.
///

pub struct IterationController<'a, E: QueryExecutor + ?Sized> {
    executor: &'a mut E,
    config: ControllerConfig,
    store: StateStore,
    iteration: i64,
}

impl<'a, E> IterationController<'a, E>
where
    E: QueryExecutor + ?Sized,
{
    /// Discover the group universe and provision checkpoint storage.
    ///
    /// Any null grouping value aborts before provisioning.
    pub fn initialize(executor: &'a mut E, config: ControllerConfig) -> Result<Self, InternalError> {
        let tuples = executor.distinct_groups(config.source(), config.grouping_columns())?;
        let arity = config.grouping_columns().len();

        let mut groups = Vec::with_capacity(tuples.len());
        for (row, values) in tuples.into_iter().enumerate() {
            if values.len() != arity {
                return Err(InternalError::executor_invariant(format!(
                    "distinct group {row} has {} values for {arity} grouping columns",
                    values.len()
                )));
            }
            let key = GroupKey::from_values(&values).map_err(|err| {
                let KeyError::NullValue { position } = &err;
                let column = config.grouping_columns()[*position].clone();
                tracing::error!(source = config.source(), column = %column, row, "null grouping value");

                InternalError::null_grouping_value(&column, row, err)
            })?;
            groups.push((key, values));
        }

        let store = StateStore::from_groups(groups)?;
        executor.provision_checkpoint(config.checkpoint())?;

        record(MetricsEvent::Initialized {
            groups: store.len() as u64,
        });
        tracing::info!(
            source = config.source(),
            groups = store.len(),
            checkpoint = config.checkpoint().relation(),
            "iteration controller initialized"
        );

        Ok(Self {
            executor,
            config,
            store,
            iteration: -1,
        })
    }

    /// Advance every active group by one iteration.
    pub fn update(&mut self, step: &dyn StateExpression) -> Result<UpdateOutcome, InternalError> {
        self.iteration += 1;
        let iteration = self.iteration;

        if self.store.is_drained() {
            record(MetricsEvent::UpdateFinish {
                iteration,
                evaluated: 0,
                failed: 0,
            });
            tracing::debug!(iteration, "update skipped: no active groups");

            return Ok(UpdateOutcome {
                iteration,
                evaluated: 0,
                failed: Vec::new(),
            });
        }

        let rows = {
            let batch = self.store.update_batch(
                iteration,
                self.config.source(),
                self.config.grouping_columns(),
            );
            self.executor.bulk_update(&batch, step)?
        };
        let evaluated = rows.len();
        let failed = self.store.apply_update(rows).inspect_err(|err| {
            record(MetricsEvent::ConsistencyViolation);
            tracing::error!(iteration, error = %err.display_with_class(), "bulk update rejected");
        })?;

        for key in &failed {
            tracing::warn!(iteration, group = %key, "group state undefined; group failed");
        }
        record(MetricsEvent::UpdateFinish {
            iteration,
            evaluated: evaluated as u64,
            failed: failed.len() as u64,
        });
        tracing::debug!(
            iteration,
            evaluated,
            failed = failed.len(),
            active = self.store.active_len(),
            "update finished"
        );

        Ok(UpdateOutcome {
            iteration,
            evaluated,
            failed,
        })
    }

    /// Retire converged groups; returns true once no group remains active.
    ///
    /// Before the first update no group has a state to converge on, so the
    /// call retires nothing and returns false without an executor call.
    pub fn test(&mut self, condition: &dyn ConditionExpression) -> Result<bool, InternalError> {
        if self.store.is_drained() {
            return Ok(true);
        }
        if self.iteration < 0 {
            tracing::debug!("test skipped: no update has run");
            return Ok(false);
        }

        let verdicts = {
            let batch = self.store.test_batch(self.iteration);
            ConvergenceEvaluator::evaluate(&mut *self.executor, &batch, condition)?
        };
        let converged = self.store.retire_converged(&verdicts.converged)?;
        self.store.clear_previous();

        record(MetricsEvent::TestFinish {
            iteration: self.iteration,
            evaluated: verdicts.evaluated as u64,
            converged: converged as u64,
        });
        tracing::debug!(
            iteration = self.iteration,
            evaluated = verdicts.evaluated,
            converged,
            active = self.store.active_len(),
            "test finished"
        );

        Ok(self.store.is_drained())
    }

    /// Alternate update/test until every group retires or the configured
    /// iteration budget is spent. Budget exhaustion is not an error.
    pub fn run(
        &mut self,
        step: &dyn StateExpression,
        condition: &dyn ConditionExpression,
    ) -> Result<RunOutcome, InternalError> {
        let budget = self.config.settings().max_iterations;
        let mut iterations = 0;

        while iterations < budget {
            self.update(step)?;
            iterations += 1;
            if self.test(condition)? {
                return Ok(RunOutcome {
                    iterations,
                    converged: true,
                });
            }
        }

        tracing::info!(
            budget,
            active = self.store.active_len(),
            "iteration budget exhausted"
        );

        Ok(RunOutcome {
            iterations,
            converged: self.store.is_drained(),
        })
    }

    /// Persist terminal groups and consume the controller.
    ///
    /// Finished groups carry their final state, failed groups carry none;
    /// both are tagged with the current iteration. Active groups are dropped.
    ///
    /// Finished records are inserted first. If the failed-record insert then
    /// errors, the finished records are already persisted and the error
    /// message states how many.
    pub fn finalize(self) -> Result<FinalizeReport, InternalError> {
        let iteration = self.iteration;
        let spec: &CheckpointSpec = self.config.checkpoint();
        let finished = self.store.records(GroupStatus::Converged, iteration);
        let failed = self.store.records(GroupStatus::Failed, iteration);
        let dropped = self.store.active_len();

        let finished = self
            .executor
            .bulk_insert(spec, RecordBatch::from_records(finished))?;
        let failed = self
            .executor
            .bulk_insert(spec, RecordBatch::from_records(failed))
            .map_err(|mut err| {
                tracing::error!(
                    finished,
                    checkpoint = spec.relation(),
                    error = %err.display_with_class(),
                    "failed-record insert rejected after finished records were persisted"
                );
                err.message = format!(
                    "{} ({finished} finished records already persisted to '{}')",
                    err.message,
                    spec.relation()
                );
                err
            })?;

        record(MetricsEvent::Finalized {
            finished,
            failed,
            dropped: dropped as u64,
        });
        tracing::info!(
            iteration,
            finished,
            failed,
            dropped,
            checkpoint = spec.relation(),
            "iteration controller finalized"
        );

        Ok(FinalizeReport {
            relation: spec.relation().to_string(),
            iteration,
            finished,
            failed,
            dropped,
        })
    }

    /// Current iteration number; -1 before the first update.
    #[must_use]
    pub const fn iteration(&self) -> i64 {
        self.iteration
    }

    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub fn executor(&self) -> &E {
        &*self.executor
    }
}

use crate::{
    config::ControllerConfig,
    controller::{FinalizeReport, IterationController},
    error::InternalError,
    executor::QueryExecutor,
};
use std::{
    ops::{Deref, DerefMut},
    panic::{AssertUnwindSafe, catch_unwind},
};

///
/// ControllerGuard
///
/// Scoped controller: `finish` finalizes explicitly, dropping the guard
/// finalizes best-effort. Terminal groups reach the checkpoint on every exit
/// path, including early returns and panics in caller code.
///

pub struct ControllerGuard<'a, E: QueryExecutor + ?Sized> {
    controller: Option<IterationController<'a, E>>,
}

impl<'a, E> ControllerGuard<'a, E>
where
    E: QueryExecutor + ?Sized,
{
    pub fn initialize(executor: &'a mut E, config: ControllerConfig) -> Result<Self, InternalError> {
        let controller = IterationController::initialize(executor, config)?;

        Ok(Self {
            controller: Some(controller),
        })
    }

    /// Finalize now and surface the outcome.
    pub fn finish(mut self) -> Result<FinalizeReport, InternalError> {
        let controller = self.controller.take().ok_or_else(|| {
            InternalError::controller_consistency("controller guard finalized twice")
        })?;

        controller.finalize()
    }
}

impl<'a, E> Deref for ControllerGuard<'a, E>
where
    E: QueryExecutor + ?Sized,
{
    type Target = IterationController<'a, E>;

    fn deref(&self) -> &Self::Target {
        match &self.controller {
            Some(controller) => controller,
            // `finish` consumes the guard, so the slot is only empty in Drop.
            None => unreachable!("controller guard used after finish"),
        }
    }
}

impl<E> DerefMut for ControllerGuard<'_, E>
where
    E: QueryExecutor + ?Sized,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.controller {
            Some(controller) => controller,
            None => unreachable!("controller guard used after finish"),
        }
    }
}

impl<E> Drop for ControllerGuard<'_, E>
where
    E: QueryExecutor + ?Sized,
{
    fn drop(&mut self) {
        let Some(controller) = self.controller.take() else {
            return;
        };

        // Never unwind out of drop; an executor panic here is logged and swallowed.
        match catch_unwind(AssertUnwindSafe(|| controller.finalize())) {
            Ok(Ok(report)) => {
                tracing::debug!(
                    checkpoint = %report.relation,
                    finished = report.finished,
                    failed = report.failed,
                    "controller finalized on drop"
                );
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    error = %err.display_with_class(),
                    "finalization on drop failed"
                );
            }
            Err(_) => {
                tracing::warn!("finalization on drop panicked");
            }
        }
    }
}

/// Run `f` against a fresh controller and always finalize afterwards.
///
/// An error from `f` wins over a finalization error; the latter is logged.
pub fn scoped<'a, E, T, F>(
    executor: &'a mut E,
    config: ControllerConfig,
    f: F,
) -> Result<(T, FinalizeReport), InternalError>
where
    E: QueryExecutor + ?Sized,
    F: FnOnce(&mut IterationController<'a, E>) -> Result<T, InternalError>,
{
    let mut controller = IterationController::initialize(executor, config)?;
    let outcome = f(&mut controller);
    let report = controller.finalize();

    match (outcome, report) {
        (Ok(value), Ok(report)) => Ok((value, report)),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), report) => {
            if let Err(finalize_err) = report {
                tracing::warn!(
                    error = %finalize_err.display_with_class(),
                    "finalization after failed run also failed"
                );
            }

            Err(err)
        }
    }
}

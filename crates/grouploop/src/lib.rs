//! ## Crate layout
//! - `core`: key codec, state store, executor port, iteration controller,
//!   convergence evaluation, checkpoint records, and observability.
//! - `error`: stable public error taxonomy.
//!
//! An algorithm plugs in a `StateExpression` and a `ConditionExpression`;
//! the controller drives every group of the source through them with one
//! bulk executor call per pass.

pub use grouploop_core as core;

pub mod error;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::Error;

/// Run `f` against a fresh controller, always finalizing, with errors
/// projected into the public taxonomy.
pub fn run_scoped<'a, E, T, F>(
    executor: &'a mut E,
    config: crate::core::config::ControllerConfig,
    f: F,
) -> Result<(T, crate::core::controller::FinalizeReport), Error>
where
    E: crate::core::executor::QueryExecutor + ?Sized,
    F: FnOnce(
        &mut crate::core::controller::IterationController<'a, E>,
    ) -> Result<T, crate::core::error::InternalError>,
{
    crate::core::controller::scoped(executor, config, f).map_err(Error::from)
}

///
/// Prelude
///

pub mod prelude {
    pub use crate::core::prelude::*;
    pub use crate::error::{Error, ErrorKind};
}

///
/// TESTS
///

//! Core runtime for grouploop: group keys, per-group state, the iteration
//! controller, convergence evaluation, and the query-executor port.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod expr;
pub mod key;
pub mod obs;
pub mod serialize;
pub mod state;
pub mod value;


///
/// Prelude
///
/// Prelude contains only domain vocabulary and the controller entrypoints.
/// No errors, serializers, or metrics helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        config::{ControllerConfig, IterationSettings},
        controller::{ControllerGuard, IterationController, scoped},
        executor::{QueryExecutor, memory::MemoryExecutor},
        expr::{ConditionContext, ConditionExpression, StateExpression, StepContext},
        key::GroupKey,
        state::{GroupState, GroupStatus},
        value::Value,
    };
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tact-core: deterministic HTN planner for autonomous agent behavior.
//!
//! Given a declarative world state (facts as tuples) and a tree of task
//! definitions, the planner produces an ordered, executable sequence of
//! primitive actions by depth-first backtracking search over
//! author-declared alternatives, and preserves an already-running plan
//! across repeated planning ticks to avoid replanning churn.
//!
//! Selection is ordered and greedy: branch declaration order is priority.
//! This is not cost-optimal or heuristic planning.
//!
//! The crate is built to support many agents replanning frequently: task
//! and scope objects are drawn from a generation-checked [`Pool`] instead
//! of allocated per build, and a plan's traversal record lets later builds
//! stop the moment no strictly higher-priority alternative exists.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod builder;
mod condition;
mod executor;
mod plan;
mod pool;
mod query;
mod record;
mod scope;
mod task;
mod value;
mod world;

// Re-exports for the stable public API.
/// Plan building: outcomes, fatal errors, and per-build counters.
pub use builder::{PlanBuilder, PlanError, PlanOutcome, PlanStats};
/// Condition protocol and logical combinators.
pub use condition::{
    evaluate_condition, Alt, And, BoxCondition, Compare, CompareOp, Condition, Eval, EvalFlow,
    ForAll, Not, Or, ScopeSink, TrueCondition,
};
/// Tick-driven plan execution and the daemon contract.
pub use executor::{Daemon, ExecutorState, PlanExecutor};
/// Immutable plan output.
pub use plan::{Plan, PlanStep};
/// Pooled task/scope arena and generation-checked handles.
pub use pool::{Pool, PoolError, PoolStats, ScopeId, TaskId, TaskKind};
/// Pattern queries over world-state tuples.
pub use query::{PatternError, Query, Term};
/// Traversal records for priority-path pruning.
pub use record::TraversalRecord;
/// Variable-binding environments.
pub use scope::Scope;
/// Task contracts, branches, and the execution-side context.
pub use task::{
    Branch, CompoundTask, ContinuationTask, FactToken, PrimitiveTask, SetPlanFact, TaskCtx,
    TaskError, TaskFactory, TaskStatus, TempFacts,
};
/// Typed values and fact tuples.
pub use value::{Tuple, Value};
/// The tuple world-state store.
pub use world::WorldState;

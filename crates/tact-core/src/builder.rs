// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Depth-first backtracking plan builder.
//!
//! The builder takes a root task and decomposes it into a flat list of
//! primitive steps. `create_plan` is called at the agent's thinking
//! interval and returns one of three outcomes:
//!
//! - [`PlanOutcome::Planned`] — a valid plan was produced.
//! - [`PlanOutcome::Continue`] — the previous plan's traversal path was
//!   reached without finding a strictly higher-priority decomposition;
//!   whatever is currently running should keep running.
//! - [`PlanOutcome::Failed`] — every alternative exhausted; no plan exists.
//!
//! Decomposition runs as one synchronous depth-first call stack with no
//! suspension points. Re-entrant or concurrent calls on one builder are
//! impossible by construction (`&mut self`).
use std::sync::Arc;

use thiserror::Error;

use crate::condition::{Eval, EvalFlow};
use crate::plan::{Plan, PlanStep};
use crate::pool::{Pool, PoolError, PoolSession, ScopeId, TaskId, TaskKind};
use crate::record::TraversalRecord;
use crate::scope::Scope;
use crate::task::{Branch, TaskError};
use crate::value::Value;
use crate::world::WorldState;

/// Outcome of one planning call.
#[derive(Debug)]
pub enum PlanOutcome {
    /// A complete plan was decomposed; the caller owns it (and must release
    /// it back to the pool when done).
    Planned(Plan),
    /// No strictly higher-priority alternative exists versus the previous
    /// record; keep the currently running plan.
    Continue,
    /// Decomposition exhausted every alternative at the root.
    Failed,
}

/// Fatal planning errors.
///
/// Branch *exhaustion* is not an error — it is the expected backtracking
/// signal, surfacing only as [`PlanOutcome::Failed`] when the root runs
/// dry. Everything here is a protocol violation or a wrapped user fault.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A pooled handle was stale, mistyped, or the pool was corrupt.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// `Compare` referenced an unbound right-hand variable.
    #[error("comparison against unbound variable `{variable}`")]
    UnboundComparison {
        /// The unbound variable name.
        variable: Arc<str>,
    },
    /// A task's scope-binding injection failed.
    #[error("scope binding injection failed for `{task_type}`")]
    Binding {
        /// Concrete type of the task whose injection failed.
        task_type: &'static str,
        /// The task's reported failure.
        #[source]
        source: TaskError,
    },
    /// A branch task factory failed.
    #[error("task factory failed")]
    Factory {
        /// The factory's reported failure.
        #[source]
        source: TaskError,
    },
    /// An error surfaced while evaluating a specific branch; one frame of
    /// the root-to-failure chain.
    #[error("branch {index} `{name}` of `{task_type}`")]
    Branch {
        /// Zero-based declaration index of the branch.
        index: usize,
        /// The branch's declared name.
        name: Arc<str>,
        /// Concrete type of the owning compound task.
        task_type: &'static str,
        /// Snapshot of the evaluation scope at wrap time.
        bindings: Box<[(Arc<str>, Value)]>,
        /// The wrapped inner error.
        #[source]
        source: Box<PlanError>,
    },
    /// Composite root error naming the full branch path to the failure.
    #[error("decomposition failed in {path}")]
    Decomposition {
        /// Human-readable `Root -> branch -> …` chain.
        path: String,
        /// The chain of per-branch wraps.
        #[source]
        source: Box<PlanError>,
    },
    /// A continuation marker was produced alongside other steps.
    #[error("a continuation task must be the sole step of its plan")]
    ContinuationNotSole,
    /// The executor was ticked without a root task.
    #[error("no root task set on the executor")]
    NoRootTask,
}

/// Counters accumulated over one planning call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Number of query evaluations performed.
    pub query_evaluations: u64,
    /// Number of candidate scopes offered to sinks.
    pub results_enumerated: u64,
}

/// Internal decomposition signal. `Exhausted` drives backtracking;
/// `KeepCurrent` aborts the whole call in favor of the running plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decompose {
    Done,
    Exhausted,
    KeepCurrent,
}

/// Decomposes root tasks into executable plans.
///
/// The step buffer is reused across calls so a warm builder allocates
/// nothing on the happy path.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    steps: Vec<PlanStep>,
    stats: PlanStats,
}

impl PlanBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters from the most recent call.
    #[must_use]
    pub fn stats(&self) -> PlanStats {
        self.stats
    }

    /// Attempts to build a plan by decomposing `root` against `world`.
    ///
    /// `seed` bindings, if provided, are value-copied into the root scope
    /// before decomposition. `previous` is the traversal record of the plan
    /// currently running, used to prune the search at the priority boundary.
    ///
    /// # Errors
    /// Returns [`PlanError`] for protocol violations and wrapped user
    /// faults; the pool session is fully returned on every error path.
    pub fn create_plan<C: 'static>(
        &mut self,
        pool: &mut Pool<C>,
        ctx: &mut C,
        world: &WorldState,
        root: TaskId,
        seed: Option<&Scope>,
        previous: Option<&TraversalRecord>,
    ) -> Result<PlanOutcome, PlanError> {
        let mut stats = PlanStats::default();
        let result = self.run(pool, ctx, world, root, seed, previous, &mut stats);
        self.stats = stats;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run<C: 'static>(
        &mut self,
        pool: &mut Pool<C>,
        ctx: &mut C,
        world: &WorldState,
        root: TaskId,
        seed: Option<&Scope>,
        previous: Option<&TraversalRecord>,
        stats: &mut PlanStats,
    ) -> Result<PlanOutcome, PlanError> {
        self.steps.clear();
        let mut record = TraversalRecord::new();
        let mut session = PoolSession::new(pool);

        let root_scope = session.acquire_scope();
        if let Some(seed) = seed {
            session.scope_mut(root_scope)?.copy_from(seed);
        }

        let outcome = {
            let mut ev = Eval::new(world, &mut session, ctx, stats);
            match ev.kind(root)? {
                TaskKind::Primitive => {
                    // A primitive root is already a one-step plan; the seed
                    // scope becomes the step scope directly.
                    self.steps.push(PlanStep {
                        task: root,
                        scope: root_scope,
                    });
                    Decompose::Done
                }
                TaskKind::Compound => self
                    .decompose_compound(&mut ev, root, Some(root_scope), &mut record, previous)
                    .map_err(Self::compose_decomposition_error)?,
            }
        };

        match outcome {
            Decompose::KeepCurrent => Ok(PlanOutcome::Continue),
            Decompose::Exhausted => Ok(PlanOutcome::Failed),
            Decompose::Done => {
                if self.steps.is_empty() {
                    // Taskless plans are not valid.
                    return Ok(PlanOutcome::Failed);
                }
                session.commit(&self.steps);
                Ok(PlanOutcome::Planned(Plan::new(
                    self.steps.as_slice().into(),
                    record,
                )))
            }
        }
    }

    fn decompose_compound<C: 'static>(
        &mut self,
        ev: &mut Eval<'_, '_, C>,
        task: TaskId,
        scope_override: Option<ScopeId>,
        record: &mut TraversalRecord,
        previous: Option<&TraversalRecord>,
    ) -> Result<Decompose, PlanError> {
        // A nested compound evaluates against a fresh empty scope plus its
        // own injected bindings; parent values arrive only through task
        // configuration and injection. This is what enforces lexical
        // isolation between nesting levels.
        let scope = match scope_override {
            Some(scope) => scope,
            None => ev.acquire_scope(),
        };
        ev.bind_compound(task, scope)?;

        let branches = ev.branches(task)?;
        let task_type = ev.task_type_name(task)?;
        let base_steps = self.steps.len();
        record.push_frame();

        for (index, branch) in branches.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let cursor = index as u32;
            record.set_cursor(cursor);
            if previous.is_some_and(|prev| *prev == *record) {
                // We are about to walk the exact path of the running plan;
                // nothing strictly higher-priority was found before it.
                return Ok(Decompose::KeepCurrent);
            }

            match self.try_branch(ev, branch, scope, record, previous, base_steps) {
                Ok(Decompose::Exhausted) => {}
                Ok(decided) => return Ok(decided),
                Err(source) => {
                    let bindings = ev.scope(scope).map(Scope::capture).unwrap_or_default();
                    return Err(PlanError::Branch {
                        index,
                        name: branch.name_arc(),
                        task_type,
                        bindings,
                        source: Box::new(source),
                    });
                }
            }
        }

        record.pop_frame();
        Ok(Decompose::Exhausted)
    }

    fn try_branch<C: 'static>(
        &mut self,
        ev: &mut Eval<'_, '_, C>,
        branch: &Branch<C>,
        scope: ScopeId,
        record: &mut TraversalRecord,
        previous: Option<&TraversalRecord>,
        base_steps: usize,
    ) -> Result<Decompose, PlanError> {
        let mut outcome = Decompose::Exhausted;
        branch.precondition().evaluate(ev, scope, &mut |ev, bound| {
            let tasks =
                (branch.factory())(ev, bound).map_err(|source| PlanError::Factory { source })?;
            if tasks.is_empty() {
                // Nothing to perform; try the precondition's next binding.
                return Ok(EvalFlow::Continue);
            }

            let base_frames = record.len();
            match self.decompose_list(ev, &tasks, bound, record, previous)? {
                Decompose::Exhausted => {
                    // Full backtrack: pull out anything this attempt
                    // committed, then ask for the next binding.
                    self.steps.truncate(base_steps);
                    record.truncate(base_frames);
                    Ok(EvalFlow::Continue)
                }
                decided => {
                    outcome = decided;
                    Ok(EvalFlow::Stop)
                }
            }
        })?;
        Ok(outcome)
    }

    fn decompose_list<C: 'static>(
        &mut self,
        ev: &mut Eval<'_, '_, C>,
        tasks: &[TaskId],
        bound: ScopeId,
        record: &mut TraversalRecord,
        previous: Option<&TraversalRecord>,
    ) -> Result<Decompose, PlanError> {
        for &task in tasks {
            match ev.kind(task)? {
                TaskKind::Primitive => {
                    let step_scope = ev.clone_scope(bound)?;
                    ev.bind_primitive(task, step_scope)?;
                    self.steps.push(PlanStep {
                        task,
                        scope: step_scope,
                    });
                }
                TaskKind::Compound => {
                    match self.decompose_compound(ev, task, None, record, previous)? {
                        Decompose::Done => {}
                        undone => return Ok(undone),
                    }
                }
            }
        }
        Ok(Decompose::Done)
    }

    /// Compiles a chain of per-branch wraps into one composite error naming
    /// the full root-to-failure branch path.
    fn compose_decomposition_error(error: PlanError) -> PlanError {
        if !matches!(error, PlanError::Branch { .. }) {
            return error;
        }
        let mut path = String::from("Root");
        let mut current = &error;
        while let PlanError::Branch { name, source, .. } = current {
            path.push_str(" -> ");
            path.push_str(name);
            current = source.as_ref();
        }
        PlanError::Decomposition {
            path,
            source: Box::new(error),
        }
    }
}

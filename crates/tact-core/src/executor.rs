// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tick-driven plan execution.
//!
//! A [`PlanExecutor`] is owned by one agent. Each [`PlanExecutor::tick`]:
//!
//! 1. rebuilds the world state from registered daemons (in registration
//!    order) plus any live temporary facts,
//! 2. calls the plan builder with the previous plan's traversal record,
//! 3. swaps, keeps, or tears down the running plan according to the
//!    outcome, and
//! 4. executes exactly the current step of the active plan, if any.
//!
//! Lifecycle guarantees: every accepted `on_planned` is paired with an
//! `on_plan_finished`, and every `on_activate` with an `on_deactivate`,
//! across completion, failure, rejection, and replacement alike.
use crate::builder::{PlanBuilder, PlanError, PlanOutcome, PlanStats};
use crate::plan::{Plan, PlanStep};
use crate::pool::{Pool, TaskId};
use crate::task::{ContinuationTask, TaskCtx, TaskStatus, TempFacts};
use crate::world::WorldState;

/// Supplies world-state facts at the start of every tick.
///
/// Daemons are purely additive: they append facts to the world state and
/// are invoked once per tick each, in registration order. Typical daemons
/// publish perception, messaging, or order facts.
pub trait Daemon: Send {
    /// Appends this daemon's facts to the tick's world state.
    fn apply(&mut self, world: &mut WorldState);
}

/// Coarse executor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// No active plan.
    Idle,
    /// A plan is installed but its current step has not activated yet.
    Planned,
    /// The current step has activated and is executing.
    Running,
}

/// Owns the planning loop for one agent: daemons, a root task, the running
/// plan, and the plan-scoped temporary facts.
///
/// The pool and the opaque context are passed into [`PlanExecutor::tick`]
/// rather than owned, so several executors can share one pool under
/// external ownership rules.
#[derive(Default)]
pub struct PlanExecutor {
    builder: PlanBuilder,
    daemons: Vec<Box<dyn Daemon>>,
    root: Option<TaskId>,
    world: WorldState,
    plan: Option<Plan>,
    cursor: usize,
    activated: bool,
    temp: TempFacts,
}

impl PlanExecutor {
    /// Creates an idle executor with no daemons and no root task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a daemon. Daemons run in registration order.
    pub fn add_daemon(&mut self, daemon: impl Daemon + 'static) {
        self.daemons.push(Box::new(daemon));
    }

    /// Sets the root task decomposed on every tick.
    pub fn set_root(&mut self, root: TaskId) {
        self.root = Some(root);
    }

    /// The configured root task, if any.
    #[must_use]
    pub fn root(&self) -> Option<TaskId> {
        self.root
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ExecutorState {
        match (&self.plan, self.activated) {
            (None, _) => ExecutorState::Idle,
            (Some(_), false) => ExecutorState::Planned,
            (Some(_), true) => ExecutorState::Running,
        }
    }

    /// Index of the step currently being executed, when a plan is active.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.plan.as_ref().map(|_| self.cursor)
    }

    /// The live temporary facts (plan-scoped world-state additions).
    #[must_use]
    pub fn facts(&self) -> &TempFacts {
        &self.temp
    }

    /// Planning counters from the most recent tick's build.
    #[must_use]
    pub fn plan_stats(&self) -> PlanStats {
        self.builder.stats()
    }

    fn current_step(&self) -> Option<PlanStep> {
        self.plan
            .as_ref()
            .and_then(|plan| plan.steps().get(self.cursor).copied())
    }

    /// Runs one planner tick: rebuild the world, maintain the plan, then
    /// execute the current step.
    ///
    /// # Errors
    /// Propagates fatal planning errors ([`PlanError`]); the running plan is
    /// left untouched in that case so the caller can decide how to proceed.
    pub fn tick<C: 'static>(&mut self, pool: &mut Pool<C>, ctx: &mut C) -> Result<(), PlanError> {
        let root = self.root.ok_or(PlanError::NoRootTask)?;
        if !self.maintain_plan(root, pool, ctx)? {
            // No plan could be generated; abort whatever is ongoing.
            self.clear_plan(pool, ctx);
            return Ok(());
        }

        let Some(step) = self.current_step() else {
            return Ok(());
        };

        if !self.activated {
            let (task, scope) = pool.step_parts(step.task, step.scope)?;
            let accepted = task.on_activate(
                &mut TaskCtx {
                    ctx: &mut *ctx,
                    facts: &mut self.temp,
                },
                scope,
            );
            self.activated = true;
            if !accepted {
                tracing::warn!(step = self.cursor, "step activation rejected; replanning");
                self.clear_plan(pool, ctx);
                return Ok(());
            }
        }

        let (task, scope) = pool.step_parts(step.task, step.scope)?;
        let status = task.execute(
            &mut TaskCtx {
                ctx: &mut *ctx,
                facts: &mut self.temp,
            },
            scope,
        );
        match status {
            Ok(TaskStatus::Running) => {}
            Ok(TaskStatus::Success) => {
                task.on_deactivate(
                    &mut TaskCtx {
                        ctx: &mut *ctx,
                        facts: &mut self.temp,
                    },
                    scope,
                );
                self.activated = false;
                self.cursor += 1;
                let exhausted = self.plan.as_ref().is_some_and(|plan| self.cursor >= plan.len());
                if exhausted {
                    self.clear_plan(pool, ctx);
                }
            }
            Ok(TaskStatus::Failure) => {
                tracing::warn!(step = self.cursor, "step execution failed; replanning");
                self.clear_plan(pool, ctx);
            }
            Err(error) => {
                tracing::error!(
                    step = self.cursor,
                    error = %error,
                    "step execution errored; aborting plan"
                );
                self.clear_plan(pool, ctx);
            }
        }
        Ok(())
    }

    /// Tears down any active plan, firing the owed lifecycle hooks and
    /// returning the plan's objects to the pool.
    pub fn reset<C: 'static>(&mut self, pool: &mut Pool<C>, ctx: &mut C) {
        self.clear_plan(pool, ctx);
    }

    fn maintain_plan<C: 'static>(
        &mut self,
        root: TaskId,
        pool: &mut Pool<C>,
        ctx: &mut C,
    ) -> Result<bool, PlanError> {
        self.world.clear();
        for daemon in &mut self.daemons {
            daemon.apply(&mut self.world);
        }
        for (key, fact) in self.temp.iter() {
            self.world.add(key, fact.clone());
        }

        let previous = self.plan.as_ref().map(Plan::record);
        match self
            .builder
            .create_plan(pool, ctx, &self.world, root, None, previous)?
        {
            PlanOutcome::Planned(candidate) => {
                let continuation = candidate
                    .steps()
                    .first()
                    .is_some_and(|step| pool.is_task::<ContinuationTask>(step.task));
                if continuation {
                    if candidate.len() != 1 {
                        candidate.release(pool);
                        return Err(PlanError::ContinuationNotSole);
                    }
                    candidate.release(pool);
                    return Ok(true);
                }
                self.install_plan(candidate, pool, ctx)?;
                Ok(true)
            }
            PlanOutcome::Failed => Ok(false),
            PlanOutcome::Continue => Ok(true),
        }
    }

    /// Swaps in an accepted candidate: finishes the old plan, then offers
    /// `on_planned` to every new step in order. Any rejection finishes only
    /// the already-accepted prefix and discards the candidate.
    fn install_plan<C: 'static>(
        &mut self,
        candidate: Plan,
        pool: &mut Pool<C>,
        ctx: &mut C,
    ) -> Result<(), PlanError> {
        self.clear_plan(pool, ctx);

        let mut accepted = 0usize;
        let mut rejected = false;
        for index in 0..candidate.len() {
            let step = candidate.steps()[index];
            let (task, scope) = match pool.step_parts(step.task, step.scope) {
                Ok(parts) => parts,
                Err(error) => {
                    candidate.release(pool);
                    return Err(error.into());
                }
            };
            if task.on_planned(
                &mut TaskCtx {
                    ctx: &mut *ctx,
                    facts: &mut self.temp,
                },
                scope,
            ) {
                accepted += 1;
            } else {
                rejected = true;
                break;
            }
        }

        if rejected {
            tracing::warn!(
                accepted,
                total = candidate.len(),
                "candidate plan rejected by on_planned; discarding"
            );
            for index in 0..accepted {
                let step = candidate.steps()[index];
                let (task, scope) = match pool.step_parts(step.task, step.scope) {
                    Ok(parts) => parts,
                    Err(error) => {
                        candidate.release(pool);
                        return Err(error.into());
                    }
                };
                task.on_plan_finished(
                    &mut TaskCtx {
                        ctx: &mut *ctx,
                        facts: &mut self.temp,
                    },
                    scope,
                );
            }
            candidate.release(pool);
            return Ok(());
        }

        tracing::debug!(steps = candidate.len(), "plan accepted");
        self.plan = Some(candidate);
        self.cursor = 0;
        self.activated = false;
        Ok(())
    }

    fn clear_plan<C: 'static>(&mut self, pool: &mut Pool<C>, ctx: &mut C) {
        let Some(plan) = self.plan.take() else {
            return;
        };
        if self.activated {
            if let Some(step) = plan.steps().get(self.cursor).copied() {
                if let Ok((task, scope)) = pool.step_parts(step.task, step.scope) {
                    task.on_deactivate(
                        &mut TaskCtx {
                            ctx: &mut *ctx,
                            facts: &mut self.temp,
                        },
                        scope,
                    );
                }
            }
            self.activated = false;
        }
        for step in plan.steps() {
            if let Ok((task, scope)) = pool.step_parts(step.task, step.scope) {
                task.on_plan_finished(
                    &mut TaskCtx {
                        ctx: &mut *ctx,
                        facts: &mut self.temp,
                    },
                    scope,
                );
            } else {
                debug_assert!(false, "stale plan step during teardown");
            }
        }
        plan.release(pool);
        self.cursor = 0;
    }
}

impl Drop for PlanExecutor {
    fn drop(&mut self) {
        if self.plan.is_some() {
            tracing::warn!(
                "executor dropped with an active plan; call reset() so tasks return to the pool"
            );
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Task model: primitive and compound task contracts, branches, and the
//! execution-side context.
//!
//! Compound tasks declare an ordered array of [`Branch`]es (array order =
//! priority). The planner finds the first branch whose precondition holds,
//! runs its task factory, and recursively decomposes the produced list until
//! only primitive tasks remain. If a deeper decomposition fails, the search
//! backtracks: first through the remaining bindings of the same
//! precondition, then through the remaining branches.
//!
//! Task instances are drawn from the [`Pool`](crate::pool::Pool) inside
//! branch factories (via [`Eval::acquire_primitive`] /
//! [`Eval::acquire_compound`]) and configured per use; they are reusable
//! objects whose fields fully reset on reuse.
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::condition::{And, BoxCondition, Condition, Eval, TrueCondition};
use crate::pool::{ScopeId, TaskId};
use crate::scope::Scope;
use crate::value::Tuple;

/// Error type user tasks and factories report across the planner boundary.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of one execution tick of a primitive task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The task completed; the executor advances on the next tick.
    Success,
    /// The task failed; the executor abandons the plan and replans.
    Failure,
    /// The task spans multiple ticks and will be executed again.
    Running,
}

/// Execution-side context handed to every primitive-task hook.
///
/// `ctx` is the opaque caller context, threaded through unmodified. `facts`
/// is the owning executor's temporary-fact store: a task may register a
/// fact that lives in the world state for the remaining lifetime of the plan
/// that registered it (see [`SetPlanFact`]).
pub struct TaskCtx<'a, C> {
    /// Caller-supplied context; never inspected by the planner.
    pub ctx: &'a mut C,
    /// Temporary world-state facts scoped to the running plan.
    pub facts: &'a mut TempFacts,
}

/// A single executable action produced by decomposition.
///
/// All hooks default to success/no-op; implement only what the task needs.
/// Hook pairing is guaranteed by the executor: every accepted `on_planned`
/// is matched by an `on_plan_finished`, and every `on_activate` by an
/// `on_deactivate`.
pub trait PrimitiveTask<C>: Any + Send {
    /// Called every executor tick while this task is the current step.
    ///
    /// # Errors
    /// An error is treated exactly like [`TaskStatus::Failure`]: the plan is
    /// torn down and rebuilt on the next tick.
    fn execute(
        &mut self,
        _cx: &mut TaskCtx<'_, C>,
        _scope: &Scope,
    ) -> Result<TaskStatus, TaskError> {
        Ok(TaskStatus::Success)
    }

    /// Called when this task is committed into a freshly accepted plan,
    /// before any execution. Returning `false` rejects the whole candidate
    /// plan.
    fn on_planned(&mut self, _cx: &mut TaskCtx<'_, C>, _scope: &Scope) -> bool {
        true
    }

    /// Called when the owning plan finishes for any reason (completion,
    /// failure, or replacement) — possibly before this task ever executed.
    fn on_plan_finished(&mut self, _cx: &mut TaskCtx<'_, C>, _scope: &Scope) {}

    /// Called right before this task's first execution within the plan.
    /// Returning `false` means the step is no longer valid to perform; the
    /// executor treats it as a step failure and replans.
    fn on_activate(&mut self, _cx: &mut TaskCtx<'_, C>, _scope: &Scope) -> bool {
        true
    }

    /// Called when execution of this task ends, regardless of cause.
    /// Guaranteed to be called if `on_activate` was.
    fn on_deactivate(&mut self, _cx: &mut TaskCtx<'_, C>, _scope: &Scope) {}

    /// Copies configured instance values into this task's step scope under
    /// declared `?`-names, right before the step is committed.
    ///
    /// # Errors
    /// Failures are fatal to the current planning call.
    fn bind_scope(&self, _scope: &mut Scope) -> Result<(), TaskError> {
        Ok(())
    }
}

/// A task that decomposes into other tasks through declared branches.
pub trait CompoundTask<C: 'static>: Any + Send {
    /// The ordered branch alternatives for this task type, highest priority
    /// first. Invoked once, when the type is first drawn from a pool; every
    /// instance shares the resulting table.
    fn branches() -> Vec<Branch<C>>
    where
        Self: Sized;

    /// Copies configured instance values into the evaluation scope under
    /// declared `?`-names, immediately before branch evaluation. This is how
    /// a parent-resolved value becomes visible to this task's own
    /// preconditions and factories without exposing the rest of the parent's
    /// scope.
    ///
    /// # Errors
    /// Failures are fatal to the current planning call.
    fn bind_scope(&self, _scope: &mut Scope) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Factory producing the ordered task list of one branch, given the scope
/// the precondition bound. Tasks must be drawn from the pool through the
/// supplied [`Eval`]. Returning an empty list fails the branch attempt
/// softly (the precondition's next binding is tried).
pub type TaskFactory<C> =
    Box<dyn Fn(&mut Eval<'_, '_, C>, ScopeId) -> Result<Vec<TaskId>, TaskError> + Send + Sync>;

/// One named (precondition, task-factory) alternative of a compound task.
/// Branches are immutable and tried in declaration-order priority.
pub struct Branch<C: 'static> {
    name: Arc<str>,
    precondition: BoxCondition<C>,
    factory: TaskFactory<C>,
}

impl<C: 'static> Branch<C> {
    /// Builds a branch with an explicit precondition.
    pub fn new<P, F>(name: impl Into<Arc<str>>, precondition: P, factory: F) -> Self
    where
        P: Condition<C> + 'static,
        F: Fn(&mut Eval<'_, '_, C>, ScopeId) -> Result<Vec<TaskId>, TaskError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            precondition: Box::new(precondition),
            factory: Box::new(factory),
        }
    }

    /// Builds a branch whose precondition is the conjunction of `conditions`.
    pub fn all<F>(
        name: impl Into<Arc<str>>,
        conditions: Vec<BoxCondition<C>>,
        factory: F,
    ) -> Self
    where
        F: Fn(&mut Eval<'_, '_, C>, ScopeId) -> Result<Vec<TaskId>, TaskError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, And::new(conditions), factory)
    }

    /// Builds a branch with no precondition (always eligible).
    pub fn always<F>(name: impl Into<Arc<str>>, factory: F) -> Self
    where
        F: Fn(&mut Eval<'_, '_, C>, ScopeId) -> Result<Vec<TaskId>, TaskError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, TrueCondition, factory)
    }

    /// The branch's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub(crate) fn precondition(&self) -> &dyn Condition<C> {
        &*self.precondition
    }

    pub(crate) fn factory(&self) -> &TaskFactory<C> {
        &self.factory
    }
}

impl<C: 'static> fmt::Debug for Branch<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("precondition", &self.precondition)
            .finish_non_exhaustive()
    }
}

/// Marker primitive signalling "keep the currently running plan".
///
/// A compound task may declare a branch producing only this task; when a
/// plan consisting solely of a continuation is built, the executor discards
/// it and leaves the current plan untouched. It must be the only task of
/// its plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuationTask;

impl<C> PrimitiveTask<C> for ContinuationTask {}

/// Handle for one temporary fact registered with a [`TempFacts`] store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactToken(u64);

/// Temporary world-state facts scoped to the lifetime of a running plan.
///
/// The owning executor merges these into the world state every tick, after
/// daemons run. Entries are added and removed by tasks through their
/// lifecycle hooks.
#[derive(Debug, Default)]
pub struct TempFacts {
    entries: Vec<(FactToken, String, Tuple)>,
    next_token: u64,
}

impl TempFacts {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fact and returns its removal token.
    pub fn add(&mut self, key: impl Into<String>, fact: impl Into<Tuple>) -> FactToken {
        let token = FactToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        self.entries.push((token, key.into(), fact.into()));
        token
    }

    /// Removes a previously registered fact. Returns `false` if the token
    /// was already removed.
    pub fn remove(&mut self, token: FactToken) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _, _)| *entry != token);
        self.entries.len() != before
    }

    /// Iterates the live facts as (key, tuple) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tuple)> {
        self.entries
            .iter()
            .map(|(_, key, fact)| (key.as_str(), fact))
    }

    /// Number of live facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no fact is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Built-in primitive that plants a temporary world-state fact for the
/// lifetime of the plan that contains it.
///
/// The fact is registered when the plan is accepted (`on_planned`), so it is
/// visible to ticks executing steps *before* this one as well as after, and
/// it is removed when the plan finishes for any reason. Executing the task
/// itself is a no-op success.
#[derive(Debug, Default)]
pub struct SetPlanFact {
    key: String,
    fact: Tuple,
    token: Option<FactToken>,
}

impl SetPlanFact {
    /// Configures the fact to plant. Call after drawing from the pool.
    pub fn configure(&mut self, key: impl Into<String>, fact: impl Into<Tuple>) -> &mut Self {
        self.key = key.into();
        self.fact = fact.into();
        self
    }
}

impl<C> PrimitiveTask<C> for SetPlanFact {
    fn on_planned(&mut self, cx: &mut TaskCtx<'_, C>, _scope: &Scope) -> bool {
        debug_assert!(self.token.is_none(), "fact planted twice without cleanup");
        self.token = Some(cx.facts.add(self.key.clone(), self.fact.clone()));
        true
    }

    fn on_plan_finished(&mut self, cx: &mut TaskCtx<'_, C>, _scope: &Scope) {
        if let Some(token) = self.token.take() {
            let removed = cx.facts.remove(token);
            debug_assert!(removed, "temporary fact vanished before plan finish");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_fact_tokens_remove_exactly_once() {
        let mut facts = TempFacts::new();
        let a = facts.add("supply", ("wood", 3));
        let b = facts.add("supply", ("stone", 1));

        assert_eq!(facts.len(), 2);
        assert!(facts.remove(a));
        assert!(!facts.remove(a));
        assert_eq!(facts.iter().count(), 1);
        assert!(facts.remove(b));
        assert!(facts.is_empty());
    }

    #[test]
    fn set_plan_fact_lives_between_planned_and_finished() {
        let mut facts = TempFacts::new();
        let mut ctx = ();
        let mut task = SetPlanFact::default();
        task.configure("supply", ("wood", 3));
        let scope = Scope::new();

        let mut cx = TaskCtx {
            ctx: &mut ctx,
            facts: &mut facts,
        };
        assert!(PrimitiveTask::<()>::on_planned(&mut task, &mut cx, &scope));
        assert_eq!(cx.facts.len(), 1);

        PrimitiveTask::<()>::on_plan_finished(&mut task, &mut cx, &scope);
        assert!(cx.facts.is_empty());
    }
}

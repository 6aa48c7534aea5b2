// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Condition evaluation protocol and logical combinators.
//!
//! Conditions are evaluated during planning against the world state and the
//! current scope. Evaluation is continuation-passing: the caller supplies a
//! sink invoked once per candidate result scope, and the sink's return value
//! steers the search — [`EvalFlow::Stop`] means the caller is satisfied,
//! [`EvalFlow::Continue`] means "that result did not work out downstream,
//! offer the next alternative". This one push-style signal is the single
//! backtracking primitive every combinator composes; nested combinators
//! backtrack through ordinary call-stack recursion without materializing
//! result sets.
//!
//! A typical branch precondition:
//!
//! ```text
//! And(Query(enemy ?target ?position), IsInState(?target alert))
//! ```
//!
//! `Query` binds `?target`/`?position` for one enemy at a time; if the rest
//! of the branch rejects that enemy, the sink returns `Continue` and the
//! query offers the next one.
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::builder::{PlanError, PlanStats};
use crate::pool::{PoolError, PoolSession, ScopeId, TaskId, TaskKind};
use crate::query::Query;
use crate::scope::Scope;
use crate::task::{Branch, CompoundTask, PrimitiveTask};
use crate::value::Value;
use crate::world::WorldState;

/// Steering signal returned by result sinks and by condition evaluation.
///
/// A condition returns `Stop` when a sink stopped it and `Continue` when it
/// exhausted its alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalFlow {
    /// The caller is satisfied; stop enumerating alternatives.
    Stop,
    /// Keep enumerating (or: this condition is exhausted).
    Continue,
}

/// Result sink invoked once per candidate scope a condition produces.
pub type ScopeSink<'s, C> =
    dyn FnMut(&mut Eval<'_, '_, C>, ScopeId) -> Result<EvalFlow, PlanError> + 's;

/// A condition evaluated against (world state, scope, ambient context).
///
/// Implementations must invoke `sink` once per candidate result scope, stop
/// as soon as a sink returns [`EvalFlow::Stop`], and report `Stop`/`Continue`
/// upward as described on [`EvalFlow`].
pub trait Condition<C: 'static>: fmt::Debug + Send + Sync {
    /// Evaluates this condition, feeding candidate scopes into `sink`.
    ///
    /// # Errors
    /// Propagates pool-handle faults and hard condition errors (for example
    /// a comparison against an unbound right-hand variable).
    fn evaluate(
        &self,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError>;
}

/// Boxed condition trait object.
pub type BoxCondition<C> = Box<dyn Condition<C>>;

/// Evaluation context threaded through conditions and task factories.
///
/// Bundles the read-only world state, the planning pool session, the opaque
/// caller context, and the build's counters. The planner never inspects the
/// caller context; it is threaded unmodified into user code.
pub struct Eval<'a, 'p, C: 'static> {
    world: &'a WorldState,
    session: &'a mut PoolSession<'p, C>,
    ctx: &'a mut C,
    stats: &'a mut PlanStats,
}

impl<'a, 'p, C: 'static> Eval<'a, 'p, C> {
    pub(crate) fn new(
        world: &'a WorldState,
        session: &'a mut PoolSession<'p, C>,
        ctx: &'a mut C,
        stats: &'a mut PlanStats,
    ) -> Self {
        Self {
            world,
            session,
            ctx,
            stats,
        }
    }

    /// The world state this build is planning against (read-only).
    #[must_use]
    pub fn world(&self) -> &'a WorldState {
        self.world
    }

    /// Shared access to the caller-supplied planning context.
    #[must_use]
    pub fn ctx(&self) -> &C {
        self.ctx
    }

    /// Mutable access to the caller-supplied planning context.
    pub fn ctx_mut(&mut self) -> &mut C {
        self.ctx
    }

    /// Reads a pooled scope.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleScope`] for a stale handle.
    pub fn scope(&self, id: ScopeId) -> Result<&Scope, PoolError> {
        self.session.scope(id)
    }

    /// Mutates a pooled scope.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleScope`] for a stale handle.
    pub fn scope_mut(&mut self, id: ScopeId) -> Result<&mut Scope, PoolError> {
        self.session.scope_mut(id)
    }

    /// Draws a fresh empty scope for this build.
    pub fn acquire_scope(&mut self) -> ScopeId {
        self.session.acquire_scope()
    }

    /// Draws a value copy of `src` for this build.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleScope`] for a stale handle.
    pub fn clone_scope(&mut self, src: ScopeId) -> Result<ScopeId, PoolError> {
        self.session.clone_scope(src)
    }

    pub(crate) fn discard_scope(&mut self, id: ScopeId) {
        self.session.discard_scope(id);
    }

    /// Draws a primitive task for the branch currently being decomposed.
    /// This is the only way task factories may create tasks.
    ///
    /// # Errors
    /// Propagates pool corruption faults.
    pub fn acquire_primitive<T: PrimitiveTask<C> + Default>(
        &mut self,
    ) -> Result<(TaskId, &mut T), PoolError> {
        self.session.acquire_primitive::<T>()
    }

    /// Draws a compound task for the branch currently being decomposed.
    ///
    /// # Errors
    /// Propagates pool corruption faults.
    pub fn acquire_compound<T: CompoundTask<C> + Default>(
        &mut self,
    ) -> Result<(TaskId, &mut T), PoolError> {
        self.session.acquire_compound::<T>()
    }

    pub(crate) fn kind(&self, id: TaskId) -> Result<TaskKind, PoolError> {
        self.session.kind(id)
    }

    pub(crate) fn branches(&self, id: TaskId) -> Result<Arc<[Branch<C>]>, PoolError> {
        self.session.branches(id)
    }

    pub(crate) fn task_type_name(&self, id: TaskId) -> Result<&'static str, PoolError> {
        self.session.task_type_name(id)
    }

    pub(crate) fn bind_compound(&mut self, task: TaskId, scope: ScopeId) -> Result<(), PlanError> {
        self.session.bind_compound(task, scope)
    }

    pub(crate) fn bind_primitive(&mut self, task: TaskId, scope: ScopeId) -> Result<(), PlanError> {
        self.session.bind_primitive(task, scope)
    }

    pub(crate) fn note_query(&mut self) {
        self.stats.query_evaluations += 1;
    }

    pub(crate) fn note_result(&mut self) {
        self.stats.results_enumerated += 1;
    }
}

/// Always satisfied; yields the scope unchanged. The default precondition
/// when a branch declares none.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueCondition;

impl<C: 'static> Condition<C> for TrueCondition {
    fn evaluate(
        &self,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError> {
        sink(ev, scope)
    }
}

/// Logical AND: every scope produced by the first condition is threaded
/// through the remaining conditions recursively, so all conditions see (and
/// may refine) the bindings of those before them. Zero conditions are
/// vacuously satisfied.
pub struct And<C: 'static> {
    conditions: Vec<BoxCondition<C>>,
}

impl<C: 'static> And<C> {
    /// Builds a conjunction over `conditions`, evaluated in order.
    #[must_use]
    pub fn new(conditions: Vec<BoxCondition<C>>) -> Self {
        Self { conditions }
    }

    fn evaluate_from(
        &self,
        index: usize,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError> {
        if index >= self.conditions.len() {
            return sink(ev, scope);
        }
        self.conditions[index].evaluate(ev, scope, &mut |ev, bound| {
            self.evaluate_from(index + 1, ev, bound, &mut *sink)
        })
    }
}

impl<C: 'static> Condition<C> for And<C> {
    fn evaluate(
        &self,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError> {
        self.evaluate_from(0, ev, scope, sink)
    }
}

impl<C: 'static> fmt::Debug for And<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.conditions).finish()
    }
}

/// Logical OR with committed choice: conditions are tried in order, and the
/// first one that yields any result wins outright — later conditions are
/// never tried, even if every result of the winner is rejected downstream.
///
/// Backtracking *within* the winning condition's own alternatives still
/// flows through the sink. For cross-alternative backtracking use [`Alt`].
pub struct Or<C: 'static> {
    conditions: Vec<BoxCondition<C>>,
}

impl<C: 'static> Or<C> {
    /// Builds a committed-choice disjunction over `conditions`.
    #[must_use]
    pub fn new(conditions: Vec<BoxCondition<C>>) -> Self {
        Self { conditions }
    }
}

impl<C: 'static> Condition<C> for Or<C> {
    fn evaluate(
        &self,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError> {
        for condition in &self.conditions {
            let mut yielded = false;
            let signal = condition.evaluate(ev, scope, &mut |ev, bound| {
                yielded = true;
                sink(ev, bound)
            })?;
            if yielded {
                // Committed: defer entirely to how the winner played out.
                return Ok(signal);
            }
        }
        Ok(EvalFlow::Continue)
    }
}

impl<C: 'static> fmt::Debug for Or<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Or").field(&self.conditions).finish()
    }
}

/// Ordered alternatives with full backtracking: each condition is exhausted
/// (offering every result, honoring `Stop`) before the next is tried.
///
/// Where [`Or`] commits to the first condition that produces anything, `Alt`
/// lets the search fall through an entire failed alternative into the next.
pub struct Alt<C: 'static> {
    conditions: Vec<BoxCondition<C>>,
}

impl<C: 'static> Alt<C> {
    /// Builds a fully backtrackable alternative list over `conditions`.
    #[must_use]
    pub fn new(conditions: Vec<BoxCondition<C>>) -> Self {
        Self { conditions }
    }
}

impl<C: 'static> Condition<C> for Alt<C> {
    fn evaluate(
        &self,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError> {
        for condition in &self.conditions {
            if condition.evaluate(ev, scope, &mut *sink)? == EvalFlow::Stop {
                return Ok(EvalFlow::Stop);
            }
        }
        Ok(EvalFlow::Continue)
    }
}

impl<C: 'static> fmt::Debug for Alt<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Alt").field(&self.conditions).finish()
    }
}

/// Logical NOT: satisfied, yielding the *unmodified* original scope, exactly
/// when the inner condition yields no result. Never introduces bindings.
pub struct Not<C: 'static> {
    condition: BoxCondition<C>,
}

impl<C: 'static> Not<C> {
    /// Builds a negation of `condition`.
    #[must_use]
    pub fn new(condition: BoxCondition<C>) -> Self {
        Self { condition }
    }
}

impl<C: 'static> Condition<C> for Not<C> {
    fn evaluate(
        &self,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError> {
        let mut yielded = false;
        self.condition.evaluate(ev, scope, &mut |_, _| {
            yielded = true;
            Ok(EvalFlow::Stop)
        })?;
        if yielded {
            Ok(EvalFlow::Continue)
        } else {
            sink(ev, scope)
        }
    }
}

impl<C: 'static> fmt::Debug for Not<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Not").field(&self.condition).finish()
    }
}

/// Universal quantification: satisfied when `condition` holds for every
/// binding the query produces. Vacuously true when the query produces
/// nothing; short-circuits false on the first failing binding. On success it
/// yields the *original* scope — the query's own bindings are not exposed.
pub struct ForAll<C: 'static> {
    query: Query,
    condition: BoxCondition<C>,
}

impl<C: 'static> ForAll<C> {
    /// Builds a for-all over `query`'s bindings.
    #[must_use]
    pub fn new(query: Query, condition: BoxCondition<C>) -> Self {
        Self { query, condition }
    }
}

impl<C: 'static> Condition<C> for ForAll<C> {
    fn evaluate(
        &self,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError> {
        let mut all_satisfied = true;
        <Query as Condition<C>>::evaluate(&self.query, ev, scope, &mut |ev, bound| {
            let mut satisfied = false;
            self.condition.evaluate(ev, bound, &mut |_, _| {
                satisfied = true;
                // One success confirms this binding.
                Ok(EvalFlow::Stop)
            })?;
            if satisfied {
                Ok(EvalFlow::Continue)
            } else {
                all_satisfied = false;
                // One failure refutes the whole quantification.
                Ok(EvalFlow::Stop)
            }
        })?;
        if all_satisfied {
            sink(ev, scope)
        } else {
            Ok(EvalFlow::Continue)
        }
    }
}

impl<C: 'static> fmt::Debug for ForAll<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForAll")
            .field("query", &self.query)
            .field("condition", &self.condition)
            .finish()
    }
}

/// Comparison operator for [`Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Value equality.
    Equal,
    /// Value inequality.
    NotEqual,
    /// Strict ordering.
    LessThan,
    /// Non-strict ordering.
    LessThanOrEqual,
    /// Strict ordering.
    GreaterThan,
    /// Non-strict ordering.
    GreaterThanOrEqual,
}

#[derive(Debug, Clone)]
enum CompareRhs {
    Var(Arc<str>),
    Value(Value),
}

/// Compares a bound variable against another variable or a literal value.
///
/// An unbound left-hand variable fails the condition softly (no results); an
/// unbound right-hand *variable* is a hard error — referencing a variable
/// that was never bound is an authoring bug, not a world-state outcome.
///
/// Ordering: same-variant values compare natively; `Int`/`Float` mixes
/// coerce numerically; anything else falls back to lexicographic comparison
/// of the display forms. `Nil` orders below every non-`Nil` value and equals
/// itself.
#[derive(Debug, Clone)]
pub struct Compare {
    lhs: Arc<str>,
    op: CompareOp,
    rhs: CompareRhs,
}

impl Compare {
    /// Compares the binding of `lhs` against the binding of `rhs`.
    #[must_use]
    pub fn vars(lhs: impl Into<Arc<str>>, op: CompareOp, rhs: impl Into<Arc<str>>) -> Self {
        Self {
            lhs: lhs.into(),
            op,
            rhs: CompareRhs::Var(rhs.into()),
        }
    }

    /// Compares the binding of `lhs` against a literal value.
    #[must_use]
    pub fn value(lhs: impl Into<Arc<str>>, op: CompareOp, rhs: impl Into<Value>) -> Self {
        Self {
            lhs: lhs.into(),
            op,
            rhs: CompareRhs::Value(rhs.into()),
        }
    }

    fn ordering(a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::Nil, Value::Nil) => Ordering::Equal,
            (Value::Nil, _) => Ordering::Less,
            (_, Value::Nil) => Ordering::Greater,
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
            (Value::Str(x), Value::Str(y)) => x.as_ref().cmp(y.as_ref()),
            (Value::Id(x), Value::Id(y)) => x.cmp(y),
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }
}

impl<C: 'static> Condition<C> for Compare {
    fn evaluate(
        &self,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError> {
        let Some(lhs) = ev.scope(scope)?.get(&self.lhs).cloned() else {
            return Ok(EvalFlow::Continue);
        };
        let rhs = match &self.rhs {
            CompareRhs::Value(value) => value.clone(),
            CompareRhs::Var(name) => ev.scope(scope)?.get(name).cloned().ok_or_else(|| {
                PlanError::UnboundComparison {
                    variable: name.clone(),
                }
            })?,
        };
        let pass = match self.op {
            CompareOp::Equal => lhs == rhs,
            CompareOp::NotEqual => lhs != rhs,
            CompareOp::LessThan => Self::ordering(&lhs, &rhs) == Ordering::Less,
            CompareOp::LessThanOrEqual => Self::ordering(&lhs, &rhs) != Ordering::Greater,
            CompareOp::GreaterThan => Self::ordering(&lhs, &rhs) == Ordering::Greater,
            CompareOp::GreaterThanOrEqual => Self::ordering(&lhs, &rhs) != Ordering::Less,
        };
        if pass {
            sink(ev, scope)
        } else {
            Ok(EvalFlow::Continue)
        }
    }
}

/// Evaluates a condition outside a plan build.
///
/// Brackets a throwaway pool session, seeds a scope from `seed`, and feeds
/// every candidate result into `sink` as a plain [`Scope`] reference. All
/// session-drawn objects return to the pool before this function returns.
/// Intended for condition authoring, debugging, and tests; plan builds
/// evaluate conditions through their own session.
///
/// # Errors
/// Propagates pool faults and hard condition errors.
pub fn evaluate_condition<C: 'static>(
    condition: &dyn Condition<C>,
    pool: &mut crate::pool::Pool<C>,
    ctx: &mut C,
    world: &WorldState,
    seed: Option<&Scope>,
    sink: &mut dyn FnMut(&Scope) -> EvalFlow,
) -> Result<(), PlanError> {
    let mut stats = PlanStats::default();
    let mut session = PoolSession::new(pool);
    let scope = session.acquire_scope();
    if let Some(seed) = seed {
        session.scope_mut(scope)?.copy_from(seed);
    }
    let mut ev = Eval::new(world, &mut session, ctx, &mut stats);
    condition.evaluate(&mut ev, scope, &mut |ev, bound| Ok(sink(ev.scope(bound)?)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_coerces_mixed_numerics() {
        assert_eq!(
            Compare::ordering(&Value::Int(2), &Value::Float(2.5)),
            Ordering::Less
        );
        assert_eq!(
            Compare::ordering(&Value::Float(3.0), &Value::Int(2)),
            Ordering::Greater
        );
    }

    #[test]
    fn nil_orders_below_everything() {
        assert_eq!(
            Compare::ordering(&Value::Nil, &Value::Int(i64::MIN)),
            Ordering::Less
        );
        assert_eq!(Compare::ordering(&Value::Nil, &Value::Nil), Ordering::Equal);
    }

    #[test]
    fn incomparable_variants_fall_back_to_display_order() {
        assert_eq!(
            Compare::ordering(&Value::from("10"), &Value::Int(9)),
            Ordering::Less,
            "lexicographic: \"10\" < \"9\""
        );
    }
}

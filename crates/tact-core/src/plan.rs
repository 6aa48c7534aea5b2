// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Plans: the immutable output of a successful build.
use crate::pool::{Pool, ScopeId, TaskId};
use crate::record::TraversalRecord;

/// One committed action: a primitive task plus its planning-time bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    /// The pooled primitive task to execute.
    pub task: TaskId,
    /// The pooled scope holding the step's planning-time bindings.
    pub scope: ScopeId,
}

/// An ordered sequence of plan steps plus the traversal record that chose
/// them.
///
/// A plan owns its steps' pooled tasks and scopes until released. Release
/// consumes the plan, so releasing twice is unrepresentable; a plan dropped
/// without release leaks its pooled objects and logs a warning in debug
/// builds.
#[derive(Debug)]
pub struct Plan {
    steps: Box<[PlanStep]>,
    record: TraversalRecord,
    released: bool,
}

impl Plan {
    pub(crate) fn new(steps: Box<[PlanStep]>, record: TraversalRecord) -> Self {
        Self {
            steps,
            record,
            released: false,
        }
    }

    /// The committed steps, in execution order.
    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// The traversal record of this plan's decomposition. Feed it into the
    /// next build to keep this plan when nothing better exists.
    #[must_use]
    pub fn record(&self) -> &TraversalRecord {
        &self.record
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Plans are never empty; present for API completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns every step's task and scope to the pool, consuming the plan.
    pub fn release<C: 'static>(mut self, pool: &mut Pool<C>) {
        for step in &*self.steps {
            if pool.release_task(step.task).is_err() {
                debug_assert!(false, "plan step task already released");
            }
            if pool.release_scope(step.scope).is_err() {
                debug_assert!(false, "plan step scope already released");
            }
        }
        pool.note_released(self.steps.len() * 2);
        self.released = true;
    }
}

impl Drop for Plan {
    fn drop(&mut self) {
        if !self.released && cfg!(debug_assertions) {
            tracing::warn!(
                steps = self.steps.len(),
                "plan dropped without release; its pooled tasks and scopes leak"
            );
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared fixtures for the planner integration tests.
#![allow(dead_code)]

use tact_core::{
    Daemon, Eval, PrimitiveTask, Scope, TaskCtx, TaskError, TaskId, TaskStatus, Tuple, WorldState,
};

/// Planning/execution context for tests: a flat event log the fixture tasks
/// append lifecycle markers to.
#[derive(Debug, Default)]
pub struct Ctx {
    pub events: Vec<String>,
}

impl Ctx {
    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }
}

/// Configurable primitive that records every lifecycle hook it sees.
#[derive(Debug, Default)]
pub struct Note {
    pub text: String,
    /// Report `Failure` from `execute`.
    pub fail: bool,
    /// Report `Running` for this many ticks before succeeding.
    pub run_ticks: u32,
    /// Reject the candidate plan in `on_planned`.
    pub reject_planned: bool,
    /// Reject activation, forcing a replan.
    pub reject_activate: bool,
}

impl PrimitiveTask<Ctx> for Note {
    fn execute(
        &mut self,
        cx: &mut TaskCtx<'_, Ctx>,
        _scope: &Scope,
    ) -> Result<TaskStatus, TaskError> {
        cx.ctx.events.push(format!("exec:{}", self.text));
        if self.fail {
            return Ok(TaskStatus::Failure);
        }
        if self.run_ticks > 0 {
            self.run_ticks -= 1;
            return Ok(TaskStatus::Running);
        }
        Ok(TaskStatus::Success)
    }

    fn on_planned(&mut self, cx: &mut TaskCtx<'_, Ctx>, _scope: &Scope) -> bool {
        cx.ctx.events.push(format!("planned:{}", self.text));
        !self.reject_planned
    }

    fn on_plan_finished(&mut self, cx: &mut TaskCtx<'_, Ctx>, _scope: &Scope) {
        cx.ctx.events.push(format!("finished:{}", self.text));
    }

    fn on_activate(&mut self, cx: &mut TaskCtx<'_, Ctx>, _scope: &Scope) -> bool {
        cx.ctx.events.push(format!("activate:{}", self.text));
        !self.reject_activate
    }

    fn on_deactivate(&mut self, cx: &mut TaskCtx<'_, Ctx>, _scope: &Scope) {
        cx.ctx.events.push(format!("deactivate:{}", self.text));
    }
}

/// Draws and labels a [`Note`] inside a branch factory.
pub fn note(ev: &mut Eval<'_, '_, Ctx>, text: &str) -> Result<TaskId, TaskError> {
    let (id, task) = ev.acquire_primitive::<Note>()?;
    task.text = text.to_owned();
    Ok(id)
}

/// Daemon publishing a fixed fact list every tick.
#[derive(Debug, Default)]
pub struct FactsDaemon {
    pub facts: Vec<(String, Tuple)>,
}

impl FactsDaemon {
    pub fn new(facts: Vec<(String, Tuple)>) -> Self {
        Self { facts }
    }
}

impl Daemon for FactsDaemon {
    fn apply(&mut self, world: &mut WorldState) {
        for (key, fact) in &self.facts {
            world.add(key, fact.clone());
        }
    }
}

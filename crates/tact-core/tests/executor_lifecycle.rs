// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Executor semantics: hook pairing, rejection, teardown, continuation, and
//! plan-scoped temporary facts.
#![allow(missing_docs)]

mod common;

use common::{note, Ctx, FactsDaemon, Note};
use tact_core::{
    Branch, CompoundTask, ContinuationTask, Daemon, ExecutorState, PlanError, PlanExecutor, Pool,
    Query, SetPlanFact, Term, WorldState,
};

#[derive(Default)]
struct TwoSteps;

impl CompoundTask<Ctx> for TwoSteps {
    fn branches() -> Vec<Branch<Ctx>> {
        vec![Branch::always("march", |ev, _| {
            Ok(vec![note(ev, "a")?, note(ev, "b")?])
        })]
    }
}

fn executor_with_root<T: CompoundTask<Ctx> + Default>(
    pool: &mut Pool<Ctx>,
) -> PlanExecutor {
    let (root, _) = pool.acquire_compound::<T>().unwrap();
    let mut executor = PlanExecutor::new();
    executor.set_root(root);
    executor
}

#[test]
fn completed_plan_pairs_every_lifecycle_hook() {
    let mut pool: Pool<Ctx> = Pool::new();
    let mut executor = executor_with_root::<TwoSteps>(&mut pool);
    let mut ctx = Ctx::default();

    // Tick 1 plans and executes step a; tick 2 executes step b. Replanning
    // on tick 2 yields Continue thanks to the record, keeping the plan.
    executor.tick(&mut pool, &mut ctx).unwrap();
    assert_eq!(
        executor.state(),
        ExecutorState::Planned,
        "step a finished; step b not yet activated"
    );
    assert_eq!(executor.current_index(), Some(1));
    executor.tick(&mut pool, &mut ctx).unwrap();
    assert_eq!(executor.state(), ExecutorState::Idle);

    assert_eq!(
        ctx.events,
        [
            "planned:a",
            "planned:b",
            "activate:a",
            "exec:a",
            "deactivate:a",
            "activate:b",
            "exec:b",
            "deactivate:b",
            "finished:a",
            "finished:b",
        ]
    );
    assert_eq!(ctx.count("planned:"), ctx.count("finished:"));
    assert_eq!(ctx.count("activate:"), ctx.count("deactivate:"));

    // All pooled objects returned after the plan finished.
    let stats = pool.stats();
    assert_eq!(stats.live_tasks, 1, "only the root task stays live");
    assert_eq!(stats.live_scopes, 0);
    assert_eq!(stats.reserved, 0);
}

#[derive(Default)]
struct FailsMidway;

impl CompoundTask<Ctx> for FailsMidway {
    fn branches() -> Vec<Branch<Ctx>> {
        vec![Branch::always("march", |ev, _| {
            let first = note(ev, "ok")?;
            let (second, task) = ev.acquire_primitive::<Note>()?;
            task.text = "bad".to_owned();
            task.fail = true;
            Ok(vec![first, second])
        })]
    }
}

#[test]
fn step_failure_tears_down_and_replans_next_tick() {
    let mut pool: Pool<Ctx> = Pool::new();
    let mut executor = executor_with_root::<FailsMidway>(&mut pool);
    let mut ctx = Ctx::default();

    executor.tick(&mut pool, &mut ctx).unwrap(); // plans, executes "ok"
    executor.tick(&mut pool, &mut ctx).unwrap(); // "bad" fails, tears down
    assert_eq!(executor.state(), ExecutorState::Idle);

    assert_eq!(ctx.count("planned:"), ctx.count("finished:"));
    assert_eq!(ctx.count("activate:"), ctx.count("deactivate:"));
    assert_eq!(pool.stats().reserved, 0);

    // The failure forces a fresh plan on the next tick, not a retry of the
    // torn-down one.
    ctx.events.clear();
    executor.tick(&mut pool, &mut ctx).unwrap();
    assert!(ctx.events.contains(&"planned:ok".to_owned()));
}

#[derive(Default)]
struct SecondStepRejects;

impl CompoundTask<Ctx> for SecondStepRejects {
    fn branches() -> Vec<Branch<Ctx>> {
        vec![Branch::always("march", |ev, _| {
            let first = note(ev, "a")?;
            let (second, task) = ev.acquire_primitive::<Note>()?;
            task.text = "veto".to_owned();
            task.reject_planned = true;
            Ok(vec![first, second])
        })]
    }
}

#[test]
fn rejected_acceptance_finishes_only_the_accepted_prefix() {
    let mut pool: Pool<Ctx> = Pool::new();
    let mut executor = executor_with_root::<SecondStepRejects>(&mut pool);
    let mut ctx = Ctx::default();

    executor.tick(&mut pool, &mut ctx).unwrap();
    assert_eq!(executor.state(), ExecutorState::Idle);

    assert_eq!(
        ctx.events,
        ["planned:a", "planned:veto", "finished:a"],
        "the rejecting step and later steps must not be finished"
    );
    assert_eq!(pool.stats().reserved, 0, "the candidate was released");
    assert_eq!(pool.stats().live_tasks, 1);
}

#[derive(Default)]
struct RejectsActivation;

impl CompoundTask<Ctx> for RejectsActivation {
    fn branches() -> Vec<Branch<Ctx>> {
        vec![Branch::always("march", |ev, _| {
            let (id, task) = ev.acquire_primitive::<Note>()?;
            task.text = "stale".to_owned();
            task.reject_activate = true;
            Ok(vec![id])
        })]
    }
}

#[test]
fn rejected_activation_counts_as_step_failure() {
    let mut pool: Pool<Ctx> = Pool::new();
    let mut executor = executor_with_root::<RejectsActivation>(&mut pool);
    let mut ctx = Ctx::default();

    executor.tick(&mut pool, &mut ctx).unwrap();
    assert_eq!(executor.state(), ExecutorState::Idle);
    assert_eq!(ctx.count("activate:"), 1);
    assert_eq!(ctx.count("deactivate:"), 1, "deactivate still pairs up");
    assert_eq!(ctx.count("exec:"), 0, "the step never executed");
    assert_eq!(pool.stats().reserved, 0);
}

/// Killzone-style arrangement: an emergency branch on top, a continuation
/// branch in the middle (gated on the plan-scoped `busy` fact), and the
/// default behavior underneath. While the default plan runs, the
/// continuation branch wins over re-deriving the default behavior and keeps
/// the running plan; an emergency still preempts from above.
#[derive(Default)]
struct Patrol;

impl CompoundTask<Ctx> for Patrol {
    fn branches() -> Vec<Branch<Ctx>> {
        vec![
            Branch::new(
                "respond",
                Query::new("emergency", [Term::from("true")]).unwrap(),
                |ev, _| {
                    let (id, task) = ev.acquire_primitive::<Note>()?;
                    task.text = "respond".to_owned();
                    task.run_ticks = 2;
                    Ok(vec![id])
                },
            ),
            Branch::new(
                "carry-on",
                Query::new("busy", [Term::from("true")]).unwrap(),
                |ev, _| Ok(vec![ev.acquire_primitive::<ContinuationTask>()?.0]),
            ),
            Branch::always("patrol", |ev, _| {
                let (mark, fact) = ev.acquire_primitive::<SetPlanFact>()?;
                fact.configure("busy", ("true",));
                let (walk, task) = ev.acquire_primitive::<Note>()?;
                task.text = "patrol".to_owned();
                task.run_ticks = 5;
                Ok(vec![mark, walk])
            }),
        ]
    }
}

/// Publishes `emergency=true` from its `fire_at`-th application onward.
#[derive(Default)]
struct Alarm {
    fire_at: u32,
    applications: u32,
}

impl Daemon for Alarm {
    fn apply(&mut self, world: &mut WorldState) {
        self.applications += 1;
        if self.applications >= self.fire_at {
            world.add_value("emergency", "true");
        }
    }
}

#[test]
fn continuation_plan_keeps_the_running_plan() {
    let mut pool: Pool<Ctx> = Pool::new();
    let mut executor = executor_with_root::<Patrol>(&mut pool);
    executor.add_daemon(Alarm {
        fire_at: 4,
        ..Alarm::default()
    });
    let mut ctx = Ctx::default();

    // Tick 1: default branch plans [mark-busy, patrol]; mark-busy executes.
    executor.tick(&mut pool, &mut ctx).unwrap();
    assert_eq!(executor.facts().len(), 1, "busy fact planted");

    // Ticks 2-3: the emergency branch fails, the carry-on branch yields a
    // bare continuation, and the running patrol plan survives untouched.
    executor.tick(&mut pool, &mut ctx).unwrap();
    executor.tick(&mut pool, &mut ctx).unwrap();
    assert_eq!(executor.state(), ExecutorState::Running);
    assert_eq!(executor.current_index(), Some(1));
    assert_eq!(ctx.count("exec:patrol"), 2);
    assert_eq!(ctx.count("finished:"), 0, "the patrol plan is still live");
    assert_eq!(pool.stats().reserved, 4, "only the running plan is reserved");

    // Tick 4: the alarm fires; the strictly higher-priority branch preempts
    // the running plan, whose finish hooks retract the busy fact.
    executor.tick(&mut pool, &mut ctx).unwrap();
    assert_eq!(ctx.count("exec:respond"), 1);
    assert_eq!(ctx.count("finished:patrol"), 1);
    assert!(executor.facts().is_empty(), "busy fact retracted");
}

/// Plants a plan-scoped fact; a higher-priority branch becomes satisfiable
/// as soon as the fact is visible.
#[derive(Default)]
struct Worker;

impl CompoundTask<Ctx> for Worker {
    fn branches() -> Vec<Branch<Ctx>> {
        vec![
            Branch::new(
                "harvest",
                Query::new("field_marked", [Term::from("true")]).unwrap(),
                |ev, _| Ok(vec![note(ev, "harvest")?]),
            ),
            Branch::always("mark-field", |ev, _| {
                let (mark, task) = ev.acquire_primitive::<SetPlanFact>()?;
                task.configure("field_marked", ("true",));
                let (work, slow) = ev.acquire_primitive::<Note>()?;
                slow.text = "till".to_owned();
                slow.run_ticks = 3;
                Ok(vec![mark, work])
            }),
        ]
    }
}

#[test]
fn temporary_facts_live_for_the_registering_plan() {
    let mut pool: Pool<Ctx> = Pool::new();
    let mut executor = executor_with_root::<Worker>(&mut pool);
    let mut ctx = Ctx::default();

    // Tick 1: no mark yet, the fallback plan installs and plants the fact.
    executor.tick(&mut pool, &mut ctx).unwrap();
    assert_eq!(executor.facts().len(), 1, "fact registered at acceptance");

    // Tick 2: the planted fact satisfies the higher-priority branch; the
    // new plan replaces the old one, whose finish hooks retract the fact.
    executor.tick(&mut pool, &mut ctx).unwrap();
    assert!(executor.facts().is_empty(), "fact retracted on plan finish");
    assert_eq!(ctx.count("exec:harvest"), 1);
}

#[test]
fn tick_without_a_root_task_is_an_error() {
    let mut pool: Pool<Ctx> = Pool::new();
    let mut executor = PlanExecutor::new();
    let mut ctx = Ctx::default();

    let err = executor.tick(&mut pool, &mut ctx).unwrap_err();
    assert!(matches!(err, PlanError::NoRootTask));
}

#[test]
fn reset_fires_owed_hooks_and_returns_objects() {
    let mut pool: Pool<Ctx> = Pool::new();
    let mut executor = executor_with_root::<TwoSteps>(&mut pool);
    let mut ctx = Ctx::default();

    executor.tick(&mut pool, &mut ctx).unwrap();
    assert_eq!(executor.state(), ExecutorState::Running);

    executor.reset(&mut pool, &mut ctx);
    assert_eq!(executor.state(), ExecutorState::Idle);
    assert_eq!(ctx.count("planned:"), ctx.count("finished:"));
    assert_eq!(ctx.count("activate:"), ctx.count("deactivate:"));
    assert_eq!(pool.stats().reserved, 0);

    // Daemons registered and a fixed fact world keep working after reset.
    executor.add_daemon(FactsDaemon::new(vec![]));
    executor.tick(&mut pool, &mut ctx).unwrap();
}

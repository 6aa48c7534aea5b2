// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Pooling discipline across whole plan builds: round trips, slot reuse,
//! and stale-handle behavior.
#![allow(missing_docs)]

mod common;

use common::{note, Ctx, Note};
use tact_core::{Branch, CompoundTask, PlanBuilder, PlanOutcome, Pool, WorldState};

#[derive(Default)]
struct Chore;

impl CompoundTask<Ctx> for Chore {
    fn branches() -> Vec<Branch<Ctx>> {
        vec![Branch::always("do-it", |ev, _| {
            Ok(vec![note(ev, "sweep")?, note(ev, "mop")?])
        })]
    }
}

fn build_plan(pool: &mut Pool<Ctx>, root: tact_core::TaskId) -> tact_core::Plan {
    let mut builder = PlanBuilder::new();
    let mut ctx = Ctx::default();
    match builder
        .create_plan(pool, &mut ctx, &WorldState::new(), root, None, None)
        .unwrap()
    {
        PlanOutcome::Planned(plan) => plan,
        other => panic!("expected a plan, got {other:?}"),
    }
}

#[test]
fn released_plans_make_every_object_reusable() {
    let mut pool: Pool<Ctx> = Pool::new();
    let (root, _) = pool.acquire_compound::<Chore>().unwrap();

    let plan = build_plan(&mut pool, root);
    let step_tasks: Vec<_> = plan.steps().iter().map(|step| step.task).collect();
    plan.release(&mut pool);

    // The released handles are stale...
    for task in step_tasks {
        assert!(pool.primitive::<Note>(task).is_err());
    }

    // ...and a second build recycles the same slots instead of growing.
    let slots_before = pool.stats().task_slots;
    let plan = build_plan(&mut pool, root);
    assert_eq!(pool.stats().task_slots, slots_before);

    // Freshly drawn scopes start with zero bindings.
    let probe = pool.acquire_scope();
    assert!(pool.scope(probe).unwrap().is_empty());
    pool.release_scope(probe).unwrap();

    plan.release(&mut pool);
    let stats = pool.stats();
    assert_eq!(stats.live_tasks, 1);
    assert_eq!(stats.live_scopes, 0);
    assert_eq!(stats.reserved, 0);
}

#[test]
fn allocation_stays_bounded_across_repeated_builds() {
    let mut pool: Pool<Ctx> = Pool::new();
    let (root, _) = pool.acquire_compound::<Chore>().unwrap();

    let first = build_plan(&mut pool, root);
    first.release(&mut pool);
    let warm_tasks = pool.stats().task_slots;
    let warm_scopes = pool.stats().scope_slots;

    for _ in 0..32 {
        let plan = build_plan(&mut pool, root);
        plan.release(&mut pool);
    }

    let stats = pool.stats();
    assert_eq!(stats.task_slots, warm_tasks, "no new task slots once warm");
    assert_eq!(stats.scope_slots, warm_scopes, "no new scope slots once warm");
}

#[test]
fn step_scopes_survive_until_release() {
    let mut pool: Pool<Ctx> = Pool::new();
    let (root, _) = pool.acquire_compound::<Chore>().unwrap();

    let plan = build_plan(&mut pool, root);
    for step in plan.steps() {
        assert!(pool.scope(step.scope).is_ok());
        assert!(pool.primitive::<Note>(step.task).is_ok());
    }
    plan.release(&mut pool);
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Property tests over the query engine: determinism, arity admission, and
//! eager pattern validation.
#![allow(missing_docs)]

use proptest::prelude::*;
use tact_core::{
    evaluate_condition, Condition, EvalFlow, PatternError, Pool, Query, Term, Tuple, Value,
    WorldState,
};

fn run(query: &Query, world: &WorldState) -> Vec<Vec<(String, String)>> {
    let mut pool: Pool<()> = Pool::new();
    let mut out = Vec::new();
    evaluate_condition(
        query as &dyn Condition<()>,
        &mut pool,
        &mut (),
        world,
        None,
        &mut |scope| {
            let mut bindings: Vec<(String, String)> = scope
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_string()))
                .collect();
            bindings.sort();
            out.push(bindings);
            EvalFlow::Continue
        },
    )
    .expect("query evaluation must not fail");
    out.sort();
    out
}

fn world_of(tuples: &[Vec<i64>]) -> WorldState {
    let mut world = WorldState::new();
    for tuple in tuples {
        world.add(
            "k",
            tuple.iter().copied().map(Value::Int).collect::<Tuple>(),
        );
    }
    world
}

proptest! {
    // Result sets are order-insensitive and deterministic for fixed
    // (world state, pattern) inputs, and distinct-variable patterns admit
    // exactly the tuples of matching arity.
    #[test]
    fn distinct_var_queries_are_deterministic_and_arity_exact(
        tuples in proptest::collection::vec(proptest::collection::vec(0i64..4, 1..=3), 0..8),
        pattern_len in 1usize..=3,
    ) {
        let world = world_of(&tuples);
        let pattern: Vec<Term> = (0..pattern_len)
            .map(|i| Term::from(format!("?v{i}").as_str()))
            .collect();
        let query = Query::new("k", pattern).expect("valid pattern");

        let first = run(&query, &world);
        let second = run(&query, &world);
        prop_assert_eq!(&first, &second);

        // De-duplicated storage: count distinct tuples of the right arity.
        let mut admitted: Vec<&Vec<i64>> =
            tuples.iter().filter(|t| t.len() == pattern_len).collect();
        admitted.sort();
        admitted.dedup();
        prop_assert_eq!(first.len(), admitted.len());
    }

    // A trailing multi-wildcard admits every tuple at least as long as the
    // bound prefix.
    #[test]
    fn rest_admits_every_sufficiently_long_tuple(
        tuples in proptest::collection::vec(proptest::collection::vec(0i64..4, 1..=3), 0..8),
        prefix_len in 0usize..=2,
    ) {
        let world = world_of(&tuples);
        let mut pattern: Vec<Term> = (0..prefix_len)
            .map(|i| Term::from(format!("?v{i}").as_str()))
            .collect();
        pattern.push(Term::Rest);
        let query = Query::new("k", pattern).expect("valid pattern");

        let results = run(&query, &world);
        let mut admitted: Vec<&Vec<i64>> =
            tuples.iter().filter(|t| t.len() >= prefix_len).collect();
        admitted.sort();
        admitted.dedup();
        // Each stored (distinct) tuple is offered exactly once, even when
        // two tuples share a binding prefix.
        prop_assert_eq!(results.len(), admitted.len());
    }

    // Literal filtering matches exactly the stored values.
    #[test]
    fn literal_patterns_filter_exactly(
        values in proptest::collection::vec(0i64..4, 0..8),
        needle in 0i64..4,
    ) {
        let mut world = WorldState::new();
        for value in &values {
            world.add_value("k", Value::Int(*value));
        }
        let query = Query::new("k", [Term::from(needle)]).expect("valid pattern");
        let expected = usize::from(values.contains(&needle));
        prop_assert_eq!(run(&query, &world).len(), expected);
    }

    // `**` anywhere but last must fail at construction, whatever follows.
    #[test]
    fn misplaced_rest_always_fails_construction(
        lead in 0usize..3,
        trail in 1usize..3,
    ) {
        let mut pattern: Vec<Term> = (0..lead)
            .map(|i| Term::from(format!("?v{i}").as_str()))
            .collect();
        pattern.push(Term::Rest);
        for _ in 0..trail {
            pattern.push(Term::Any);
        }
        prop_assert_eq!(
            Query::new("k", pattern).unwrap_err(),
            PatternError::RestNotLast
        );
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pattern queries over world-state tuples.
//!
//! A [`Query`] matches the tuples stored under one world-state key against a
//! fixed pattern, binding `?`-variables into a fresh scope per matching
//! tuple. Given a world state containing:
//!
//! ```text
//! (enemy alpha #100 false)
//! (enemy beta  #200 true)
//! (enemy gamma #300 true)
//! ```
//!
//! - `(enemy alpha ?pos false)` matches only alpha, binding `?pos`.
//! - `(enemy ?name ?pos * )` matches every row with arity 4, binding
//!   `?name`/`?pos`; the `*` wildcard consumes one position unbound.
//! - `(enemy ?name **)` matches every row regardless of trailing arity.
//! - `(enemy ?name ?pos)` matches nothing here: without a wildcard the
//!   pattern arity must equal the tuple arity exactly.
use std::sync::Arc;

use thiserror::Error;

use crate::builder::PlanError;
use crate::condition::{Condition, Eval, EvalFlow, ScopeSink};
use crate::pool::ScopeId;
use crate::value::{Tuple, Value};

/// One element of a query pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Literal value; must equal the tuple element. String literals compare
    /// ASCII-case-insensitively.
    Lit(Value),
    /// `*` — matches and consumes exactly one position without binding.
    Any,
    /// `**` — matches zero or more trailing positions; must be last.
    Rest,
    /// `?name` — binds the tuple element, or requires equality with the
    /// existing binding (case-sensitive value equality).
    Var(Arc<str>),
}

impl From<&str> for Term {
    fn from(raw: &str) -> Self {
        match raw {
            "*" => Self::Any,
            "**" => Self::Rest,
            name if name.starts_with('?') => Self::Var(Arc::from(name)),
            lit => Self::Lit(Value::from(lit)),
        }
    }
}

impl From<Value> for Term {
    fn from(v: Value) -> Self {
        Self::Lit(v)
    }
}

impl From<bool> for Term {
    fn from(v: bool) -> Self {
        Self::Lit(Value::Bool(v))
    }
}

impl From<i64> for Term {
    fn from(v: i64) -> Self {
        Self::Lit(Value::Int(v))
    }
}

impl From<i32> for Term {
    fn from(v: i32) -> Self {
        Self::Lit(Value::Int(i64::from(v)))
    }
}

impl From<f64> for Term {
    fn from(v: f64) -> Self {
        Self::Lit(Value::Float(v))
    }
}

/// Pattern construction errors, raised eagerly so a malformed pattern can
/// never reach evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PatternError {
    /// A `**` element appeared anywhere but the final position.
    #[error("multi-wildcard (**) must be the final pattern element")]
    RestNotLast,
}

/// A validated pattern query against one world-state key.
#[derive(Debug, Clone)]
pub struct Query {
    key: String,
    pattern: Box<[Term]>,
    has_rest: bool,
}

impl Query {
    /// Builds a query, validating the pattern at construction time.
    ///
    /// # Errors
    /// Returns [`PatternError::RestNotLast`] if `**` is not the final
    /// element.
    pub fn new(
        key: impl Into<String>,
        pattern: impl IntoIterator<Item = Term>,
    ) -> Result<Self, PatternError> {
        let pattern: Box<[Term]> = pattern.into_iter().collect();
        let has_rest = matches!(pattern.last(), Some(Term::Rest));
        let misplaced = pattern
            .iter()
            .take(pattern.len().saturating_sub(1))
            .any(|term| matches!(term, Term::Rest));
        if misplaced {
            return Err(PatternError::RestNotLast);
        }
        Ok(Self {
            key: key.into(),
            pattern,
            has_rest,
        })
    }

    /// The world-state key this query inspects.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn admits(&self, tuple: &Tuple) -> bool {
        if self.has_rest {
            tuple.len() >= self.pattern.len() - 1
        } else {
            tuple.len() == self.pattern.len()
        }
    }

    fn literal_matches(lit: &Value, part: &Value) -> bool {
        match (lit, part) {
            (Value::Str(a), Value::Str(b)) => a.eq_ignore_ascii_case(b),
            _ => lit == part,
        }
    }
}

impl<C: 'static> Condition<C> for Query {
    fn evaluate(
        &self,
        ev: &mut Eval<'_, '_, C>,
        scope: ScopeId,
        sink: &mut ScopeSink<'_, C>,
    ) -> Result<EvalFlow, PlanError> {
        ev.note_query();
        let Some(tuples) = ev.world().tuple_set(&self.key) else {
            return Ok(EvalFlow::Continue);
        };
        let bound_len = if self.has_rest {
            self.pattern.len() - 1
        } else {
            self.pattern.len()
        };

        // Enumeration order over the set is unspecified; callers may only
        // rely on "fully exhausted before the next alternative".
        for tuple in tuples {
            if !self.admits(tuple) {
                continue;
            }

            let candidate = ev.clone_scope(scope)?;
            let mut matched = true;
            for (term, part) in self.pattern.iter().take(bound_len).zip(tuple.values()) {
                match term {
                    Term::Any => {}
                    Term::Rest => {
                        debug_assert!(false, "rest term inside the bound prefix");
                    }
                    Term::Var(name) => {
                        let existing = ev.scope(candidate)?.get(name).cloned();
                        if let Some(existing) = existing {
                            if existing != *part {
                                matched = false;
                            }
                        } else {
                            ev.scope_mut(candidate)?.set(name.clone(), part.clone());
                        }
                    }
                    Term::Lit(lit) => {
                        if !Self::literal_matches(lit, part) {
                            matched = false;
                        }
                    }
                }
                if !matched {
                    break;
                }
            }

            if matched {
                ev.note_result();
                if sink(ev, candidate)? == EvalFlow::Stop {
                    return Ok(EvalFlow::Stop);
                }
                // Sink asked for more alternatives: keep enumerating.
            } else {
                ev.discard_scope(candidate);
            }
        }

        Ok(EvalFlow::Continue)
    }
}

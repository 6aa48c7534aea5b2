// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource arena for pooled task and scope objects.
//!
//! Every task instance and scope used during planning is drawn from this
//! arena instead of freshly allocated, which bounds per-tick allocation to a
//! small constant regardless of how much backtracking a build performed.
//!
//! Slots are addressed by generation-checked handles ([`TaskId`],
//! [`ScopeId`]): releasing a slot bumps its generation, so handles held past
//! a release fail loudly instead of aliasing a recycled object. Task slots
//! are recycled through type-keyed free lists and every field is reset on
//! reuse by overwriting with the type's `Default` value.
//!
//! One plan build brackets a *session*: objects drawn during the build are
//! tracked, and at the end either the committed plan's objects are reserved
//! and the rest returned (success), or the whole session is returned
//! (failure or error). Sessions are plain stack values borrowing the pool,
//! so one-session-per-call is enforced by the borrow checker rather than by
//! thread-local bookkeeping.
use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::builder::PlanError;
use crate::plan::PlanStep;
use crate::scope::Scope;
use crate::task::{Branch, CompoundTask, PrimitiveTask};

/// Generation-checked handle to a pooled task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

/// Generation-checked handle to a pooled scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    index: u32,
    generation: u32,
}

/// Whether a pooled task is primitive or compound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// A directly executable step.
    Primitive,
    /// A task that decomposes through declared branches.
    Compound,
}

/// Errors emitted by pool handle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The task handle is stale (slot released) or was never issued.
    #[error("stale or unknown task handle")]
    StaleTask,
    /// The scope handle is stale (slot released) or was never issued.
    #[error("stale or unknown scope handle")]
    StaleScope,
    /// The handle refers to a task of the other kind.
    #[error("task handle does not refer to a {expected} task")]
    WrongKind {
        /// The kind the caller asked for.
        expected: &'static str,
    },
    /// The slot holds a task of a different concrete type.
    #[error("pooled task is not a `{0}`")]
    TypeMismatch(&'static str),
    /// Internal free-list or table invariant violated.
    #[error("pool state corrupted: {0}")]
    Corrupt(&'static str),
}

/// Point-in-time pool occupancy, for leak diagnosis in tests and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total task slots ever allocated.
    pub task_slots: usize,
    /// Task slots currently live (drawn or reserved).
    pub live_tasks: usize,
    /// Total scope slots ever allocated.
    pub scope_slots: usize,
    /// Scope slots currently live (drawn or reserved).
    pub live_scopes: usize,
    /// Objects currently reserved by undisposed plans.
    pub reserved: usize,
}

pub(crate) enum TaskObj<C: 'static> {
    Primitive(Box<dyn PrimitiveTask<C>>),
    Compound(Box<dyn CompoundTask<C>>),
}

struct TaskSlot<C: 'static> {
    generation: u32,
    live: bool,
    ty: TypeId,
    name: &'static str,
    obj: TaskObj<C>,
}

struct ScopeSlot {
    generation: u32,
    live: bool,
    scope: Scope,
}

/// Arena of reusable task and scope slots.
///
/// A pool is owned by one agent (or shared behind external synchronization)
/// and passed by `&mut` into every planning call; there is no global
/// instance. Compound branch tables are built once per concrete type on
/// first acquisition and shared from then on.
pub struct Pool<C: 'static> {
    tasks: Vec<TaskSlot<C>>,
    free_tasks: FxHashMap<TypeId, Vec<u32>>,
    scopes: Vec<ScopeSlot>,
    free_scopes: Vec<u32>,
    branch_tables: FxHashMap<TypeId, Arc<[Branch<C>]>>,
    reserved: usize,
    // Scratch sets reused across session commits so committing allocates
    // nothing once warm.
    scratch_tasks: FxHashSet<TaskId>,
    scratch_scopes: FxHashSet<ScopeId>,
}

impl<C: 'static> Default for Pool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> Pool<C> {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            free_tasks: FxHashMap::default(),
            scopes: Vec::new(),
            free_scopes: Vec::new(),
            branch_tables: FxHashMap::default(),
            reserved: 0,
            scratch_tasks: FxHashSet::default(),
            scratch_scopes: FxHashSet::default(),
        }
    }

    /// Creates a pool with pre-allocated slot capacity.
    #[must_use]
    pub fn with_capacity(tasks: usize, scopes: usize) -> Self {
        let mut pool = Self::new();
        pool.tasks.reserve(tasks);
        pool.scopes.reserve(scopes);
        pool
    }

    fn reuse_or_insert(
        &mut self,
        type_id: TypeId,
        name: &'static str,
        fresh: impl FnOnce() -> TaskObj<C>,
    ) -> u32 {
        if let Some(index) = self.free_tasks.get_mut(&type_id).and_then(Vec::pop) {
            let slot = &mut self.tasks[index as usize];
            debug_assert!(!slot.live, "free-list entry refers to a live slot");
            debug_assert_eq!(slot.ty, type_id, "free-list entry filed under the wrong type");
            slot.live = true;
            return index;
        }
        debug_assert!(self.tasks.len() < u32::MAX as usize, "task arena exhausted");
        #[allow(clippy::cast_possible_truncation)]
        let index = self.tasks.len() as u32;
        self.tasks.push(TaskSlot {
            generation: 0,
            live: true,
            ty: type_id,
            name,
            obj: fresh(),
        });
        index
    }

    /// Draws a primitive task of type `T` from the pool, resetting every
    /// field to its default. Returns the handle and the instance for
    /// configuration.
    ///
    /// # Errors
    /// Returns [`PoolError::Corrupt`] only if internal free-list typing was
    /// violated, which indicates a bug in the pool itself.
    pub fn acquire_primitive<T: PrimitiveTask<C> + Default>(
        &mut self,
    ) -> Result<(TaskId, &mut T), PoolError> {
        let index = self.reuse_or_insert(TypeId::of::<T>(), type_name::<T>(), || {
            TaskObj::Primitive(Box::new(T::default()))
        });
        let slot = &mut self.tasks[index as usize];
        let id = TaskId {
            index,
            generation: slot.generation,
        };
        let TaskObj::Primitive(obj) = &mut slot.obj else {
            return Err(PoolError::Corrupt(
                "primitive free-list entry holds a compound object",
            ));
        };
        let any: &mut dyn Any = &mut **obj;
        let Some(task) = any.downcast_mut::<T>() else {
            return Err(PoolError::Corrupt(
                "pooled object type does not match its free-list key",
            ));
        };
        *task = T::default();
        Ok((id, task))
    }

    /// Draws a compound task of type `T` from the pool.
    ///
    /// The type's branch table is built on first acquisition and shared by
    /// every later instance of `T`.
    ///
    /// # Errors
    /// Returns [`PoolError::Corrupt`] only if internal free-list typing was
    /// violated.
    pub fn acquire_compound<T: CompoundTask<C> + Default>(
        &mut self,
    ) -> Result<(TaskId, &mut T), PoolError> {
        self.branch_tables
            .entry(TypeId::of::<T>())
            .or_insert_with(|| T::branches().into());
        let index = self.reuse_or_insert(TypeId::of::<T>(), type_name::<T>(), || {
            TaskObj::Compound(Box::new(T::default()))
        });
        let slot = &mut self.tasks[index as usize];
        let id = TaskId {
            index,
            generation: slot.generation,
        };
        let TaskObj::Compound(obj) = &mut slot.obj else {
            return Err(PoolError::Corrupt(
                "compound free-list entry holds a primitive object",
            ));
        };
        let any: &mut dyn Any = &mut **obj;
        let Some(task) = any.downcast_mut::<T>() else {
            return Err(PoolError::Corrupt(
                "pooled object type does not match its free-list key",
            ));
        };
        *task = T::default();
        Ok((id, task))
    }

    /// Returns a task to its type's free list and invalidates the handle.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleTask`] if the handle is stale.
    pub fn release_task(&mut self, id: TaskId) -> Result<(), PoolError> {
        let slot = self
            .tasks
            .get_mut(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
            .ok_or(PoolError::StaleTask)?;
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        let ty = slot.ty;
        self.free_tasks.entry(ty).or_default().push(id.index);
        Ok(())
    }

    /// Draws a cleared scope from the pool.
    pub fn acquire_scope(&mut self) -> ScopeId {
        if let Some(index) = self.free_scopes.pop() {
            let slot = &mut self.scopes[index as usize];
            debug_assert!(!slot.live, "scope free-list entry refers to a live slot");
            slot.live = true;
            slot.scope.clear();
            return ScopeId {
                index,
                generation: slot.generation,
            };
        }
        debug_assert!(self.scopes.len() < u32::MAX as usize, "scope arena exhausted");
        #[allow(clippy::cast_possible_truncation)]
        let index = self.scopes.len() as u32;
        self.scopes.push(ScopeSlot {
            generation: 0,
            live: true,
            scope: Scope::new(),
        });
        ScopeId {
            index,
            generation: 0,
        }
    }

    /// Draws a scope containing a value copy of `src`'s bindings.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleScope`] if `src` is stale.
    pub fn clone_scope(&mut self, src: ScopeId) -> Result<ScopeId, PoolError> {
        self.scope(src)?;
        let dst = self.acquire_scope();
        let (si, di) = (src.index as usize, dst.index as usize);
        debug_assert_ne!(si, di, "clone source and destination collide");
        if si < di {
            let (left, right) = self.scopes.split_at_mut(di);
            right[0].scope.copy_from(&left[si].scope);
        } else {
            let (left, right) = self.scopes.split_at_mut(si);
            left[di].scope.copy_from(&right[0].scope);
        }
        Ok(dst)
    }

    /// Returns a scope to the free list and invalidates the handle.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleScope`] if the handle is stale.
    pub fn release_scope(&mut self, id: ScopeId) -> Result<(), PoolError> {
        let slot = self
            .scopes
            .get_mut(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
            .ok_or(PoolError::StaleScope)?;
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_scopes.push(id.index);
        Ok(())
    }

    /// Shared access to a pooled scope.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleScope`] if the handle is stale.
    pub fn scope(&self, id: ScopeId) -> Result<&Scope, PoolError> {
        self.scopes
            .get(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
            .map(|slot| &slot.scope)
            .ok_or(PoolError::StaleScope)
    }

    /// Mutable access to a pooled scope.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleScope`] if the handle is stale.
    pub fn scope_mut(&mut self, id: ScopeId) -> Result<&mut Scope, PoolError> {
        self.scopes
            .get_mut(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
            .map(|slot| &mut slot.scope)
            .ok_or(PoolError::StaleScope)
    }

    fn task_slot(&self, id: TaskId) -> Result<&TaskSlot<C>, PoolError> {
        self.tasks
            .get(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
            .ok_or(PoolError::StaleTask)
    }

    fn task_slot_mut(&mut self, id: TaskId) -> Result<&mut TaskSlot<C>, PoolError> {
        self.tasks
            .get_mut(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
            .ok_or(PoolError::StaleTask)
    }

    /// Reports whether the handle refers to a primitive or compound task.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleTask`] if the handle is stale.
    pub fn kind(&self, id: TaskId) -> Result<TaskKind, PoolError> {
        match self.task_slot(id)?.obj {
            TaskObj::Primitive(_) => Ok(TaskKind::Primitive),
            TaskObj::Compound(_) => Ok(TaskKind::Compound),
        }
    }

    /// Returns `true` when the live task behind `id` is of concrete type `T`.
    #[must_use]
    pub fn is_task<T: 'static>(&self, id: TaskId) -> bool {
        self.task_slot(id)
            .is_ok_and(|slot| slot.ty == TypeId::of::<T>())
    }

    /// The concrete type name of the task behind `id`, for diagnostics.
    ///
    /// # Errors
    /// Returns [`PoolError::StaleTask`] if the handle is stale.
    pub fn task_type_name(&self, id: TaskId) -> Result<&'static str, PoolError> {
        Ok(self.task_slot(id)?.name)
    }

    /// Typed shared access to a pooled primitive task.
    ///
    /// # Errors
    /// Fails on a stale handle, on a compound slot, or on a concrete-type
    /// mismatch.
    pub fn primitive<T: PrimitiveTask<C>>(&self, id: TaskId) -> Result<&T, PoolError> {
        let slot = self.task_slot(id)?;
        let TaskObj::Primitive(obj) = &slot.obj else {
            return Err(PoolError::WrongKind {
                expected: "primitive",
            });
        };
        let any: &dyn Any = &**obj;
        any.downcast_ref::<T>()
            .ok_or(PoolError::TypeMismatch(type_name::<T>()))
    }

    /// Typed mutable access to a pooled primitive task (for configuration).
    ///
    /// # Errors
    /// Fails on a stale handle, on a compound slot, or on a concrete-type
    /// mismatch.
    pub fn primitive_mut<T: PrimitiveTask<C>>(&mut self, id: TaskId) -> Result<&mut T, PoolError> {
        let slot = self.task_slot_mut(id)?;
        let TaskObj::Primitive(obj) = &mut slot.obj else {
            return Err(PoolError::WrongKind {
                expected: "primitive",
            });
        };
        let any: &mut dyn Any = &mut **obj;
        any.downcast_mut::<T>()
            .ok_or(PoolError::TypeMismatch(type_name::<T>()))
    }

    /// Typed shared access to a pooled compound task.
    ///
    /// # Errors
    /// Fails on a stale handle, on a primitive slot, or on a concrete-type
    /// mismatch.
    pub fn compound<T: CompoundTask<C>>(&self, id: TaskId) -> Result<&T, PoolError> {
        let slot = self.task_slot(id)?;
        let TaskObj::Compound(obj) = &slot.obj else {
            return Err(PoolError::WrongKind {
                expected: "compound",
            });
        };
        let any: &dyn Any = &**obj;
        any.downcast_ref::<T>()
            .ok_or(PoolError::TypeMismatch(type_name::<T>()))
    }

    /// Typed mutable access to a pooled compound task (for configuration).
    ///
    /// # Errors
    /// Fails on a stale handle, on a primitive slot, or on a concrete-type
    /// mismatch.
    pub fn compound_mut<T: CompoundTask<C>>(&mut self, id: TaskId) -> Result<&mut T, PoolError> {
        let slot = self.task_slot_mut(id)?;
        let TaskObj::Compound(obj) = &mut slot.obj else {
            return Err(PoolError::WrongKind {
                expected: "compound",
            });
        };
        let any: &mut dyn Any = &mut **obj;
        any.downcast_mut::<T>()
            .ok_or(PoolError::TypeMismatch(type_name::<T>()))
    }

    /// The shared branch table of the compound task behind `id`.
    pub(crate) fn branches(&self, id: TaskId) -> Result<Arc<[Branch<C>]>, PoolError> {
        let slot = self.task_slot(id)?;
        match slot.obj {
            TaskObj::Compound(_) => self
                .branch_tables
                .get(&slot.ty)
                .cloned()
                .ok_or(PoolError::Corrupt("compound task has no branch table")),
            TaskObj::Primitive(_) => Err(PoolError::WrongKind {
                expected: "compound",
            }),
        }
    }

    /// Injects the compound task's declared bindings into `scope`.
    pub(crate) fn bind_compound(&mut self, task: TaskId, scope: ScopeId) -> Result<(), PlanError> {
        let task_slot = self
            .tasks
            .get(task.index as usize)
            .filter(|slot| slot.live && slot.generation == task.generation)
            .ok_or(PoolError::StaleTask)?;
        let scope_slot = self
            .scopes
            .get_mut(scope.index as usize)
            .filter(|slot| slot.live && slot.generation == scope.generation)
            .ok_or(PoolError::StaleScope)?;
        let TaskObj::Compound(obj) = &task_slot.obj else {
            return Err(PoolError::WrongKind {
                expected: "compound",
            }
            .into());
        };
        obj.bind_scope(&mut scope_slot.scope)
            .map_err(|source| PlanError::Binding {
                task_type: task_slot.name,
                source,
            })
    }

    /// Injects the primitive task's declared bindings into its step scope.
    pub(crate) fn bind_primitive(&mut self, task: TaskId, scope: ScopeId) -> Result<(), PlanError> {
        let task_slot = self
            .tasks
            .get(task.index as usize)
            .filter(|slot| slot.live && slot.generation == task.generation)
            .ok_or(PoolError::StaleTask)?;
        let scope_slot = self
            .scopes
            .get_mut(scope.index as usize)
            .filter(|slot| slot.live && slot.generation == scope.generation)
            .ok_or(PoolError::StaleScope)?;
        let TaskObj::Primitive(obj) = &task_slot.obj else {
            return Err(PoolError::WrongKind {
                expected: "primitive",
            }
            .into());
        };
        obj.bind_scope(&mut scope_slot.scope)
            .map_err(|source| PlanError::Binding {
                task_type: task_slot.name,
                source,
            })
    }

    /// Simultaneous access to a step's executable task and its scope.
    pub(crate) fn step_parts(
        &mut self,
        task: TaskId,
        scope: ScopeId,
    ) -> Result<(&mut dyn PrimitiveTask<C>, &Scope), PoolError> {
        let scope_slot = self
            .scopes
            .get(scope.index as usize)
            .filter(|slot| slot.live && slot.generation == scope.generation)
            .ok_or(PoolError::StaleScope)?;
        let task_slot = self
            .tasks
            .get_mut(task.index as usize)
            .filter(|slot| slot.live && slot.generation == task.generation)
            .ok_or(PoolError::StaleTask)?;
        let TaskObj::Primitive(obj) = &mut task_slot.obj else {
            return Err(PoolError::WrongKind {
                expected: "primitive",
            });
        };
        Ok((&mut **obj, &scope_slot.scope))
    }

    pub(crate) fn note_reserved(&mut self, count: usize) {
        self.reserved += count;
    }

    pub(crate) fn note_released(&mut self, count: usize) {
        self.reserved = self.reserved.saturating_sub(count);
    }

    /// Point-in-time occupancy counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            task_slots: self.tasks.len(),
            live_tasks: self.tasks.iter().filter(|slot| slot.live).count(),
            scope_slots: self.scopes.len(),
            live_scopes: self.scopes.iter().filter(|slot| slot.live).count(),
            reserved: self.reserved,
        }
    }
}

/// Per-build session bookkeeping over a borrowed pool.
///
/// Dropping a session returns every still-drawn object to the pool, so the
/// error path needs no explicit cleanup; [`PoolSession::commit`] reserves
/// the committed plan's objects first.
pub(crate) struct PoolSession<'p, C: 'static> {
    pool: &'p mut Pool<C>,
    drawn_tasks: Vec<TaskId>,
    drawn_scopes: Vec<ScopeId>,
}

impl<'p, C: 'static> PoolSession<'p, C> {
    pub(crate) fn new(pool: &'p mut Pool<C>) -> Self {
        Self {
            pool,
            drawn_tasks: Vec::new(),
            drawn_scopes: Vec::new(),
        }
    }

    pub(crate) fn acquire_primitive<T: PrimitiveTask<C> + Default>(
        &mut self,
    ) -> Result<(TaskId, &mut T), PoolError> {
        let (id, task) = self.pool.acquire_primitive::<T>()?;
        self.drawn_tasks.push(id);
        Ok((id, task))
    }

    pub(crate) fn acquire_compound<T: CompoundTask<C> + Default>(
        &mut self,
    ) -> Result<(TaskId, &mut T), PoolError> {
        let (id, task) = self.pool.acquire_compound::<T>()?;
        self.drawn_tasks.push(id);
        Ok((id, task))
    }

    pub(crate) fn acquire_scope(&mut self) -> ScopeId {
        let id = self.pool.acquire_scope();
        self.drawn_scopes.push(id);
        id
    }

    pub(crate) fn clone_scope(&mut self, src: ScopeId) -> Result<ScopeId, PoolError> {
        let id = self.pool.clone_scope(src)?;
        self.drawn_scopes.push(id);
        Ok(id)
    }

    /// Returns a scope drawn by this session early, if it was the most
    /// recent draw. Used by the query engine to recycle per-candidate
    /// clones that failed to match.
    pub(crate) fn discard_scope(&mut self, id: ScopeId) {
        if self.drawn_scopes.last() == Some(&id) {
            self.drawn_scopes.pop();
            if self.pool.release_scope(id).is_err() {
                debug_assert!(false, "session failed to discard its own scope");
            }
        }
    }

    pub(crate) fn scope(&self, id: ScopeId) -> Result<&Scope, PoolError> {
        self.pool.scope(id)
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> Result<&mut Scope, PoolError> {
        self.pool.scope_mut(id)
    }

    pub(crate) fn kind(&self, id: TaskId) -> Result<TaskKind, PoolError> {
        self.pool.kind(id)
    }

    pub(crate) fn branches(&self, id: TaskId) -> Result<Arc<[Branch<C>]>, PoolError> {
        self.pool.branches(id)
    }

    pub(crate) fn task_type_name(&self, id: TaskId) -> Result<&'static str, PoolError> {
        self.pool.task_type_name(id)
    }

    pub(crate) fn bind_compound(&mut self, task: TaskId, scope: ScopeId) -> Result<(), PlanError> {
        self.pool.bind_compound(task, scope)
    }

    pub(crate) fn bind_primitive(&mut self, task: TaskId, scope: ScopeId) -> Result<(), PlanError> {
        self.pool.bind_primitive(task, scope)
    }

    /// Reserves the objects referenced by `steps` for the outgoing plan and
    /// returns every other session-drawn object to the pool.
    pub(crate) fn commit(mut self, steps: &[PlanStep]) {
        self.pool.scratch_tasks.clear();
        self.pool.scratch_scopes.clear();
        for step in steps {
            self.pool.scratch_tasks.insert(step.task);
            self.pool.scratch_scopes.insert(step.scope);
        }
        for id in std::mem::take(&mut self.drawn_tasks) {
            if !self.pool.scratch_tasks.contains(&id) && self.pool.release_task(id).is_err() {
                debug_assert!(false, "session drew a task it cannot release");
            }
        }
        for id in std::mem::take(&mut self.drawn_scopes) {
            if !self.pool.scratch_scopes.contains(&id) && self.pool.release_scope(id).is_err() {
                debug_assert!(false, "session drew a scope it cannot release");
            }
        }
        let reserved = self.pool.scratch_tasks.len() + self.pool.scratch_scopes.len();
        self.pool.note_reserved(reserved);
    }
}

impl<C: 'static> Drop for PoolSession<'_, C> {
    fn drop(&mut self) {
        for id in self.drawn_tasks.drain(..) {
            if self.pool.release_task(id).is_err() {
                debug_assert!(false, "session drew a task it cannot release");
            }
        }
        for id in self.drawn_scopes.drain(..) {
            if self.pool.release_scope(id).is_err() {
                debug_assert!(false, "session drew a scope it cannot release");
            }
        }
    }
}

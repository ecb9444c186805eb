// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! One cache entry: a [`Key`] paired with its mutable state.
//!
//! Grounded on `arc::detail::control_block` (`original_source/include/arc/
//! detail/control_block.hpp`). Value/error/waiters are colocated under one
//! `RwLock` here rather than split across a separately-synchronized set of
//! plain fields the way the C++ original does it (see DESIGN.md) — the
//! production task can't safely poke unsynchronized fields in safe Rust the
//! way a single-producer C++ object can, so we pay one extra lock word for
//! the same invariants.

use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Waker;

use parking_lot::RwLock;

use crate::error::TaskError;
use crate::handle::Handle;
use crate::key::Key;
use crate::Context;

/// A function that, given a pointer to its own (already-inserted) entry,
/// spawns a fresh producer task for that entry's key.
///
/// Mirrors `void (*create)(store_entry&)` in the C++ original: it is
/// reinvoked both on first insertion and on resurrection (§4.2).
pub(crate) type Recreate = Box<dyn Fn(NonNull<Entry>) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Waiters {
    pub(crate) continuations: Vec<Waker>,
    pub(crate) callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

pub(crate) struct Slot {
    pub(crate) value: Option<Box<dyn Any + Send + Sync>>,
    pub(crate) error: Option<Arc<TaskError>>,
    /// `Some` means "in progress, still accepting waiters"; `None` means
    /// "done" (value or error frozen, readable without waiting).
    pub(crate) waiters: Option<Waiters>,
}

pub(crate) struct Entry {
    pub(crate) key: Key,
    pub(crate) ctx: Context,
    refcount: AtomicUsize,
    slot: RwLock<Slot>,
    recreate: Recreate,
}

impl Entry {
    pub(crate) fn new(key: Key, ctx: Context, recreate: Recreate) -> Self {
        Entry {
            key,
            ctx,
            refcount: AtomicUsize::new(0),
            slot: RwLock::new(Slot {
                value: None,
                error: None,
                waiters: Some(Waiters::default()),
            }),
            recreate,
        }
    }

    pub(crate) fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Relaxed)
    }

    pub(crate) fn add_reference(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `true` if this call observed the 1-reference window and has
    /// handed the (not-yet-decremented) reference off to the scheduler's
    /// deferred-release queue. Returns `false` if it decremented in place
    /// (not the last reference).
    ///
    /// Mirrors `control_block::remove_reference`: the final decrement to
    /// zero is deliberately *not* performed here, only observed; it happens
    /// in [`crate::store::Store::release_reference`] so that store can
    /// detect the race between "last release" and "fresh submission".
    pub(crate) fn try_hand_off_last_reference(&self) -> bool {
        let mut refcount = self.refcount.load(Ordering::Acquire);
        loop {
            if refcount == 1 {
                return true;
            }
            match self.refcount.compare_exchange_weak(
                refcount,
                refcount - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return false,
                Err(actual) => refcount = actual,
            }
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.slot.read().waiters.is_none()
    }

    /// Registers `waker` as a continuation if the entry is still in
    /// progress.
    ///
    /// Returns `true` if enlisted (caller must wait), `false` if the entry
    /// was already done (caller should proceed immediately).
    pub(crate) fn try_add_continuation(&self, waker: Waker) -> bool {
        let mut slot = self.slot.write();
        match &mut slot.waiters {
            Some(waiters) => {
                waiters.continuations.push(waker);
                true
            }
            None => false,
        }
    }

    /// Registers `callback` to run once the entry completes.
    ///
    /// Returns `Ok(())` if enlisted. Returns `Err(callback)` handing the
    /// closure back, unused, if the entry was already done — the caller is
    /// expected to invoke it themselves in that case.
    pub(crate) fn try_add_callback(
        &self,
        callback: Box<dyn FnOnce() + Send>,
    ) -> Result<(), Box<dyn FnOnce() + Send>> {
        let mut slot = self.slot.write();
        match &mut slot.waiters {
            Some(waiters) => {
                waiters.callbacks.push(callback);
                Ok(())
            }
            None => Err(callback),
        }
    }

    /// Reads the stored value or error if the entry is done.
    pub(crate) fn try_read(&self) -> Option<Result<(), Arc<TaskError>>> {
        let slot = self.slot.read();
        if slot.waiters.is_some() {
            return None;
        }
        Some(match &slot.error {
            Some(err) => Err(Arc::clone(err)),
            None => Ok(()),
        })
    }

    /// Reads the entry's completed value as a type-erased raw pointer, or
    /// its error. Resolving the erased pointer to a concrete `&T` (by
    /// downcast, or by a [`crate::value_ref::Resolve`] projection for an
    /// aliased/up-cast view) is the caller's job.
    ///
    /// The pointer stays valid as long as the caller holds a `Handle` to
    /// this entry: completion is a one-shot write (`complete` no-ops
    /// afterwards) and teardown cannot run while any reference is
    /// outstanding, so the `Box<dyn Any>`'s heap allocation never moves or
    /// is freed out from under the caller.
    ///
    /// # Panics
    ///
    /// Panics if called on an entry that has not completed.
    pub(crate) fn read_erased(&self) -> Result<*const (dyn Any + Send + Sync), Arc<TaskError>> {
        let slot = self.slot.read();
        assert!(
            slot.waiters.is_none(),
            "read_erased called on an incomplete entry for `{}`",
            self.key.function_name()
        );
        match &slot.error {
            Some(err) => Err(Arc::clone(err)),
            None => {
                let value = slot.value.as_ref().expect("completed entry missing stored value");
                Ok(&**value as *const (dyn Any + Send + Sync))
            }
        }
    }

    /// Completes the entry with a successfully produced value, scheduling
    /// every installed continuation and running every installed callback
    /// inline (§4.3 `conditionally_complete`). Idempotent: a second call
    /// (e.g. the real `return` after an earlier [`Entry::publish`]) is a
    /// no-op.
    pub(crate) fn complete_value(&self, value: Box<dyn Any + Send + Sync>) {
        self.complete(Some(value), None);
    }

    pub(crate) fn complete_error(&self, error: Arc<TaskError>) {
        self.complete(None, Some(error));
    }

    /// Publishes an intermediate value early (§4.4 "yield"), unblocking
    /// waiters while the producer keeps running. The eventual final
    /// completion becomes a no-op thanks to the idempotence of [`complete`].
    pub(crate) fn publish(&self, value: Box<dyn Any + Send + Sync>) {
        self.complete(Some(value), None);
    }

    fn complete(&self, value: Option<Box<dyn Any + Send + Sync>>, error: Option<Arc<TaskError>>) {
        let mut slot = self.slot.write();
        if slot.waiters.is_none() {
            return;
        }
        slot.value = value;
        slot.error = error;
        let waiters = slot.waiters.take().expect("checked above");

        for waker in waiters.continuations {
            waker.wake();
        }
        // Callbacks run inline while still holding the write lock, per
        // §4.3: they must be short and must not re-enter this entry.
        for callback in waiters.callbacks {
            callback();
        }
    }

    /// Performs the actual final decrement (the one
    /// [`Entry::try_hand_off_last_reference`] deliberately deferred) and, if
    /// it lands on zero, reopens `waiters` in the same critical section so a
    /// racing resurrection can't observe "refcount zero, still done".
    ///
    /// Returns the pre-decrement refcount. Called only from
    /// [`crate::store::Store::release_reference`].
    pub(crate) fn decrement_and_reopen_waiters(&self) -> usize {
        let mut slot = self.slot.write();
        let old = self.refcount.fetch_sub(1, Ordering::AcqRel);
        if old == 1 && slot.waiters.is_none() {
            slot.waiters = Some(Waiters::default());
        }
        old
    }

    /// Drops the stored value/error, reopening `waiters` so a resurrecting
    /// submission can be signalled. Called once refcount has (logically)
    /// reached zero, before the table lock is taken to decide between
    /// erasure and resurrection.
    pub(crate) fn teardown_value(&self) {
        let mut slot = self.slot.write();
        slot.value = None;
        slot.error = None;
        if slot.waiters.is_none() {
            slot.waiters = Some(Waiters::default());
        }
    }

    pub(crate) fn recreate(&self, ptr: NonNull<Entry>) {
        (self.recreate)(ptr);
    }

    pub(crate) fn handle(self_ptr: NonNull<Entry>) -> Handle {
        Handle::new(self_ptr)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("refcount", &self.refcount())
            .field("done", &self.is_done())
            .finish()
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.refcount.load(Ordering::Relaxed),
            0,
            "entry for `{}` torn down with outstanding references",
            self.key.function_name()
        );
    }
}

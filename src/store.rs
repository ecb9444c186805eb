// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The deduplicating keyed table: `Key -> Entry`, with insert-or-find,
//! erase-on-zero, and resurrection.
//!
//! Grounded on `arc::detail::store` (`original_source/include/arc/detail/
//! store.hpp`, `src/arc.cpp`). The table lock there is a re-entrant guard
//! (`arc::extra::recursive_guard`) because a completion callback run while
//! the lock is held may itself call back into the store (e.g. a nested
//! `retrieve_reference` from a continuation). `parking_lot::ReentrantMutex`
//! is the direct Rust counterpart.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;

use parking_lot::ReentrantMutex;

use crate::entry::{Entry, Recreate};
use crate::handle::Handle;
use crate::key::Key;
use crate::Context;

struct StoreData {
    table: HashMap<Key, Box<Entry>>,
    empty_once: VecDeque<Box<dyn FnOnce() + Send>>,
}

pub(crate) struct Store {
    data: ReentrantMutex<RefCell<StoreData>>,
}

impl Store {
    pub(crate) fn new() -> Self {
        Store {
            data: ReentrantMutex::new(RefCell::new(StoreData {
                table: HashMap::new(),
                empty_once: VecDeque::new(),
            })),
        }
    }

    /// Finds or inserts the entry for `key`, returning a new reference to
    /// it. On fresh insertion, spawns the producer only after the table
    /// lock has been released (resolved Open Question, §9): a
    /// non-`async fn` producer body that itself calls back into
    /// [`Context`] before its first await point must not observe the table
    /// lock still held.
    pub(crate) fn retrieve_reference(&self, ctx: &Context, key: Key, recreate: Recreate) -> Handle {
        let guard = self.data.lock();
        let mut data = guard.borrow_mut();

        if let Some(entry) = data.table.get(&key) {
            let ptr = NonNull::from(entry.as_ref());
            tracing::trace!(function = entry.key.function_name(), "dedup hit");
            return Handle::new(ptr);
        }

        tracing::trace!(function = %key.function_name(), "dedup miss, inserting fresh entry");
        let entry = Box::new(Entry::new(key.clone(), ctx.clone(), recreate));
        let ptr = NonNull::from(entry.as_ref());
        data.table.insert(key, entry);
        let handle = Handle::new(ptr);

        drop(data);
        drop(guard);

        // Safety: `handle` keeps the entry alive across this call.
        unsafe { ptr.as_ref() }.recreate(ptr);

        handle
    }

    /// Performs the deferred final release for `handle`: the actual
    /// decrement-to-zero, then either resurrection (if a fresh submission
    /// raced the release) or erasure from the table.
    ///
    /// Mirrors `store::release_reference` in the C++ original line for
    /// line, including the race it exists to resolve: between this
    /// function observing "last reference" and acquiring the table lock, a
    /// concurrent [`Store::retrieve_reference`] may already have bumped the
    /// refcount back up. We detect that under the same lock and recreate
    /// the producer instead of erasing.
    pub(crate) fn release_reference(mut handle: Handle) {
        let ptr = handle.ptr();
        // Safety: `handle` still owns a live reference into the entry.
        let entry = unsafe { ptr.as_ref() };
        let ctx = entry.ctx.clone();

        let old_refcount = entry.decrement_and_reopen_waiters();
        handle.abandon();
        debug_assert!(
            old_refcount > 0,
            "refcount underflow releasing entry for `{}`",
            entry.key.function_name()
        );
        if old_refcount > 1 {
            return;
        }

        entry.teardown_value();

        let store = ctx.store();
        let guard = store.data.lock();
        let mut data = guard.borrow_mut();

        if entry.refcount() > 0 {
            tracing::trace!(function = entry.key.function_name(), "resurrecting entry");
            entry.recreate(ptr);
            return;
        }

        debug_assert_eq!(entry.refcount(), 0);
        tracing::trace!(function = entry.key.function_name(), "erasing entry");
        data.table
            .remove(&entry.key)
            .expect("entry being released must still be present in the table");

        if data.table.is_empty() {
            while let Some(cb) = data.empty_once.pop_front() {
                cb();
            }
        }
    }

    /// Runs `callback` once the table becomes (or already is) empty, one
    /// time only.
    pub(crate) fn set_empty_once_callback(&self, callback: Box<dyn FnOnce() + Send>) {
        let guard = self.data.lock();
        let mut data = guard.borrow_mut();

        if data.table.is_empty() {
            drop(data);
            drop(guard);
            callback();
        } else {
            data.empty_once.push_back(callback);
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let guard = self.data.lock();
        debug_assert!(
            guard.borrow().table.is_empty(),
            "store dropped with entries still referenced"
        );
    }
}

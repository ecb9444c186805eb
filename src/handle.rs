// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Refcounted reference into a [`crate::Store`] entry, with deferred
//! teardown.
//!
//! This is the Rust analog of `arc::detail::handle`. We can't use `Arc<T>`
//! for this: `Arc`'s destructor runs `T`'s drop glue synchronously the
//! instant the strong count hits zero, and the whole point of this type is
//! that the *last* release must not run the entry's teardown inline (it may
//! be running on the stack of the very task that just finished, and tearing
//! the value down there would extend that task's "critical section"
//! unpredictably). So `Handle` owns a raw, manually refcounted pointer into
//! entries kept alive by `Box`-stable storage in the [`crate::Store`] table,
//! the same way `kasync`'s `TaskRef` owns a raw pointer into a heap-boxed,
//! hand-refcounted task frame.
use std::fmt;
use std::ptr::NonNull;

use crate::entry::Entry;

pub(crate) struct Handle {
    entry: Option<NonNull<Entry>>,
}

// Safety: `Entry` is `Send + Sync` in every field it exposes across threads
// (atomics, a `parking_lot::RwLock`, and a `Context` that is itself
// `Send + Sync`), so a pointer to one may cross threads freely.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    /// Constructs a new handle to `entry`, incrementing its refcount.
    pub(crate) fn new(entry: NonNull<Entry>) -> Self {
        // Safety: callers only ever pass pointers to entries that are kept
        // alive by the store's table (or, transiently, by another live
        // `Handle`), so the entry outlives this borrow.
        unsafe { entry.as_ref() }.add_reference();
        Handle { entry: Some(entry) }
    }

    pub(crate) fn entry(&self) -> &Entry {
        // Safety: see `Handle::new` and `abandon`; a `Handle` with `Some`
        // always points at a live entry.
        unsafe {
            self.entry
                .expect("entry() called on an abandoned handle")
                .as_ref()
        }
    }

    pub(crate) fn ptr(&self) -> NonNull<Entry> {
        self.entry.expect("ptr() called on an abandoned handle")
    }

    /// Nulls the handle without touching the refcount. Used once ownership
    /// of the logical reference has been transferred elsewhere (e.g. into
    /// the scheduler's deferred-release queue, or because the atomic
    /// decrement already accounted for this handle).
    pub(crate) fn abandon(&mut self) -> Option<NonNull<Entry>> {
        self.entry.take()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        match self.entry {
            Some(entry) => Handle::new(entry),
            None => Handle { entry: None },
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let Some(ptr) = self.entry.take() else {
            return;
        };
        // Safety: still a live entry; we have not yet abandoned it.
        let entry = unsafe { ptr.as_ref() };
        if entry.try_hand_off_last_reference() {
            // We observed the "only one reference left" window: the atomic
            // decrement-to-zero has *not* happened yet. Hand the live
            // reference to the scheduler, which will perform the decrement
            // (and the erase-or-resurrect decision) off this call stack.
            entry
                .ctx
                .scheduler()
                .enqueue_release(Handle { entry: Some(ptr) }, false);
        }
        // Otherwise `try_hand_off_last_reference` already performed the
        // decrement in place; nothing further to do.
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry {
            Some(_) => f.debug_tuple("Handle").field(&"<entry>").finish(),
            None => f.write_str("Handle(empty)"),
        }
    }
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Refcounted access to a completed entry's value.
//!
//! This is the spec's `Result<T>`, renamed to avoid colliding with
//! `std::result::Result` (see DESIGN.md). Grounded on `arc::result`
//! (`original_source/include/arc/arc/result.hpp`): a shared-pointer-style
//! handle whose destruction releases the owning [`crate::handle::Handle`]
//! but defers the pointed-to value's actual destruction to the usual
//! teardown path (§3). Like the original, it is copyable (`Clone`), derefs
//! straight to `&T`, and supports an aliasing constructor
//! ([`ValueRef::alias`]) that views a donor's entry through a projection
//! while keeping that donor's entry alive.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{Failed, TaskError};
use crate::handle::Handle;
use crate::key::Key;

/// Resolves an entry's type-erased stored value into a `*const T` view of
/// it: the identity downcast for a directly-submitted [`crate::Cached`], or
/// a composed projection for one constructed via `Cached::map` (up-cast or
/// member alias, §4.6).
pub(crate) type Resolve<T> = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> *const T + Send + Sync>;

/// A reference to a produced value of type `T`, or to the error that
/// prevented its production.
///
/// Constructed only from a completed entry (see [`crate::future::Cached`])
/// or by aliasing another `ValueRef` (see [`ValueRef::alias`]).
pub struct ValueRef<T> {
    handle: Handle,
    result: Result<*const T, Arc<TaskError>>,
}

// Safety: the raw pointer targets a `T: Send + Sync` value owned by the
// entry behind `handle`, which is itself `Send + Sync`.
unsafe impl<T: Send + Sync> Send for ValueRef<T> {}
unsafe impl<T: Send + Sync> Sync for ValueRef<T> {}

impl<T: Any + 'static> ValueRef<T> {
    pub(crate) fn from_handle(handle: Handle, resolve: &Resolve<T>) -> Self {
        let result = handle.entry().read_erased().map(|ptr| {
            // Safety: `handle` keeps the entry (and the value `ptr` points
            // into) alive for at least as long as this borrow.
            resolve(unsafe { &*ptr })
        });
        ValueRef { handle, result }
    }

    /// Returns the produced value, or the error that failed its
    /// production.
    ///
    /// # Errors
    ///
    /// Returns [`Failed`] if the producing task panicked; every observer
    /// of the same entry sees the identical error payload by `Arc` identity
    /// (§8 property 4).
    pub fn get(&self) -> Result<&T, Failed> {
        match &self.result {
            Ok(ptr) => {
                // Safety: `self.handle` keeps the entry (and thus this
                // value) alive for the lifetime of the returned borrow;
                // the value is never mutated after completion.
                Ok(unsafe { &**ptr })
            }
            Err(err) => Err(Failed(Arc::clone(err))),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns the `I`-th key argument of the submission that produced
    /// this entry.
    ///
    /// # Panics
    ///
    /// Panics if `F` does not match the function that produced this entry
    /// (§4.1: a precondition violation, not a recoverable error).
    pub fn get_key<F: 'static, Args: 'static>(&self) -> &Args {
        self.key().downcast_args::<F, Args>()
    }

    pub(crate) fn key(&self) -> &Key {
        &self.handle.entry().key
    }

    pub(crate) fn into_handle(self) -> Handle {
        self.handle
    }

    /// Aliases `donor`'s entry: the returned `ValueRef` keeps the donor's
    /// entry alive (it clones the donor's `Handle`) while viewing it
    /// through `project` — a field of `U`, or an up-cast to a shared
    /// supertype/trait view (§4.6's aliasing constructor). If `donor`
    /// itself holds a producer error, the alias carries that same error
    /// rather than invoking `project`, mirroring the original's "either
    /// both pointer and donor are null or both are non-null" precondition.
    pub fn alias<U: Any + 'static>(donor: &ValueRef<U>, project: impl FnOnce(&U) -> &T) -> Self {
        let result = match donor.get() {
            Ok(value) => Ok(std::ptr::from_ref(project(value))),
            Err(failed) => Err(failed.0),
        };
        ValueRef {
            handle: donor.handle.clone(),
            result,
        }
    }
}

impl<T> Clone for ValueRef<T> {
    fn clone(&self) -> Self {
        ValueRef {
            handle: self.handle.clone(),
            result: self.result.clone(),
        }
    }
}

impl<T: Any + 'static> std::ops::Deref for ValueRef<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the producer failed; use [`ValueRef::get`] to handle that
    /// case without panicking.
    fn deref(&self) -> &T {
        self.get().expect("dereferenced a ValueRef holding a Failed producer error")
    }
}

impl<T> fmt::Debug for ValueRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRef")
            .field("is_ok", &self.result.is_ok())
            .finish()
    }
}

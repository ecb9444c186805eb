// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The user-visible awaitable: this is the spec's `Future<T>`, renamed
//! [`Cached`] to avoid colliding with `std::future::Future` (of which it is
//! also, itself, an implementation — see DESIGN.md).
//!
//! Grounded on `arc::future` (`original_source/include/arc/arc/future.hpp`).
//! That header distinguishes an up-cast constructor (`future(future<U>&&)`,
//! viewing a derived result as a base) from a member-alias constructor
//! (`future(value_tag<M>, future<U>&&)`, viewing one field of it). Rust has
//! no base-class subobjects, so both collapse to the same operation here —
//! "view this entry's eventual value as some other type via a pure function
//! of a reference to it" — and share one constructor, [`Cached::map`].

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::context::Context;
use crate::handle::Handle;
use crate::value_ref::{Resolve, ValueRef};

/// An awaitable reference to a (possibly still in-flight) cached
/// computation.
///
/// A default-constructed `Cached` holds no entry and is not awaitable
/// (§8 boundary behavior) — polling or waiting on one panics.
pub struct Cached<T> {
    handle: Option<Handle>,
    resolve: Resolve<T>,
    /// `true` for a `Cached` constructed directly from a submission (the
    /// entry's stored value really is a `T`); `false` for one built via
    /// [`Cached::map`]. §4.6 forbids chaining a second up-cast/alias on top
    /// of an already-mapped `Cached`, so `map` panics unless this is `true`.
    is_identity_resolve: bool,
    _marker: PhantomData<fn() -> T>,
}

fn identity_resolve<T: Any + Send + Sync + 'static>() -> Resolve<T> {
    std::sync::Arc::new(|value: &(dyn Any + Send + Sync)| {
        std::ptr::from_ref(
            value
                .downcast_ref::<T>()
                .expect("entry's stored value type does not match Cached<T>'s T"),
        )
    })
}

impl<T: Any + Send + Sync + 'static> Default for Cached<T> {
    fn default() -> Self {
        Cached {
            handle: None,
            resolve: identity_resolve(),
            is_identity_resolve: true,
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync + 'static> Cached<T> {
    pub(crate) fn new(handle: Handle) -> Self {
        Cached {
            handle: Some(handle),
            resolve: identity_resolve(),
            is_identity_resolve: true,
            _marker: PhantomData,
        }
    }

    /// Views `other`'s eventual entry through `project`: an up-cast to a
    /// shared supertype/trait object, or a projection onto one of `U`'s
    /// members (§4.6). The returned `Cached<T>` shares `other`'s entry —
    /// completing, aliasing, or dropping one does not start a second
    /// computation.
    ///
    /// # Panics
    ///
    /// Panics if `other` was itself built via `map`: chaining a second
    /// up-cast/alias on top of an already-mapped view is a precondition
    /// violation, not a recoverable error.
    pub fn map<U, F>(other: Cached<U>, project: F) -> Self
    where
        U: Any + Send + Sync + 'static,
        F: Fn(&U) -> &T + Send + Sync + 'static,
    {
        assert!(
            other.is_identity_resolve,
            "Cached::map called on an already-mapped Cached (chained up-cast/alias)"
        );
        let outer_resolve = other.resolve.clone();
        Cached {
            handle: other.handle,
            resolve: std::sync::Arc::new(move |value| {
                // Safety: `outer_resolve` returns a pointer into the same
                // erased value `value` borrows from.
                let u = unsafe { &*outer_resolve(value) };
                std::ptr::from_ref(project(u))
            }),
            is_identity_resolve: false,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    /// Consumes this `Cached`, returning its handle (if any) without
    /// waiting for completion. Used by
    /// [`crate::Context::set_caching_policy_global`] to pin an in-flight or
    /// completed entry for the context's lifetime.
    pub(crate) fn into_handle(mut self) -> Option<Handle> {
        self.handle.take()
    }

    /// Consumes the entry's value if already done; otherwise returns
    /// `None` and this `Cached` retains its handle.
    pub fn try_wait(&mut self) -> Option<ValueRef<T>> {
        let handle = self.handle.as_ref()?;
        if handle.entry().is_done() {
            let handle = self.handle.take().expect("checked above");
            Some(ValueRef::from_handle(handle, &self.resolve))
        } else {
            None
        }
    }

    /// Registers `callback` to run once this entry completes, consuming
    /// `self`. If already done, `callback` runs inline on the calling
    /// thread; otherwise it fires on whichever thread completes the
    /// producer (§4.6).
    ///
    /// # Panics
    ///
    /// Panics if called on a default-constructed `Cached`.
    pub fn async_wait_and_then(mut self, callback: impl FnOnce(ValueRef<T>) + Send + 'static) {
        if let Some(value) = self.try_wait() {
            callback(value);
            return;
        }

        let handle = self
            .handle
            .take()
            .expect("async_wait_and_then called on a default-constructed Cached");
        let callback_handle = handle.clone();
        let resolve = self.resolve.clone();
        let boxed: Box<dyn FnOnce() + Send> = Box::new(move || {
            callback(ValueRef::from_handle(callback_handle, &resolve));
        });

        match handle.entry().try_add_callback(boxed) {
            Ok(()) => {}
            Err(boxed) => {
                // Completed in the race window between `try_wait` and
                // here; the entry won't run our callback, so run it now.
                boxed();
            }
        }
    }

    /// Blocks the calling thread, contributing to the scheduler's worker
    /// loop, until this entry completes.
    ///
    /// Mirrors §4.5's "active-wait": the calling thread registers for
    /// notification and otherwise behaves like a scheduler worker, so this
    /// makes progress even with zero dedicated worker threads (§8 property
    /// 7).
    ///
    /// # Panics
    ///
    /// Panics if called on a default-constructed `Cached`.
    pub fn active_wait(&mut self, ctx: &Context) -> ValueRef<T> {
        if let Some(value) = self.try_wait() {
            return value;
        }

        let handle = self
            .handle
            .as_ref()
            .expect("active_wait called on a default-constructed Cached")
            .clone();

        let signal = Signal::new();
        let callback_signal = signal.clone();
        let boxed: Box<dyn FnOnce() + Send> = Box::new(move || callback_signal.set());

        if let Err(boxed) = handle.entry().try_add_callback(boxed) {
            boxed();
        }

        while !signal.is_set() {
            if !ctx.scheduler().run_one(ctx.runs_on_main_thread()) {
                signal.wait_timeout(Duration::from_millis(1));
            }
        }

        self.try_wait()
            .expect("completion callback fired but entry is not done")
    }
}

impl<T: Any + Send + Sync + 'static> Future for Cached<T> {
    type Output = ValueRef<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let handle = self
            .handle
            .as_ref()
            .expect("polled a default-constructed Cached<T>");

        if handle.entry().try_add_continuation(cx.waker().clone()) {
            return Poll::Pending;
        }

        let handle = self.handle.take().expect("checked above");
        Poll::Ready(ValueRef::from_handle(handle, &self.resolve))
    }
}

impl<T> fmt::Debug for Cached<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cached")
            .field("is_valid", &self.handle.is_some())
            .finish()
    }
}

/// A one-shot completion flag shared between [`Cached::active_wait`] and
/// the callback it installs on the entry.
#[derive(Clone)]
struct Signal(std::sync::Arc<(Mutex<bool>, Condvar)>);

impl Signal {
    fn new() -> Self {
        Signal(std::sync::Arc::new((Mutex::new(false), Condvar::new())))
    }

    fn set(&self) {
        let (lock, cv) = &*self.0;
        *lock.lock() = true;
        cv.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.0 .0.lock()
    }

    fn wait_timeout(&self, timeout: Duration) {
        let (lock, cv) = &*self.0;
        let mut guard = lock.lock();
        if !*guard {
            cv.wait_for(&mut guard, timeout);
        }
    }
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The facade: owns the [`Store`], [`Scheduler`], [`Globals`] and
//! [`Options`], and is the entry point for keyed submission.
//!
//! Grounded on `arc::context` (`original_source/include/arc/arc/
//! context.hpp`, `src/arc.cpp`). There, a `ControlBlock`'s `ctx` field is a
//! *non-owning* back-pointer: the context is guaranteed (by explicit
//! destruction order) to outlive every entry it created. The direct Rust
//! translation of a non-owning back-pointer that must cross thread
//! boundaries freely is a `'static` reference, not a refcounted one — an
//! `Arc`-based back-pointer would instead make every entry a strong owner
//! of the context, turning an intentional one-way "outlives" relationship
//! into a reference-counting cycle. So `Context` leaks its inner state
//! (`Box::leak`) and hands out `&'static` copies, exactly mirroring
//! `libs/kasync`'s own `Executor<P>`, whose `spawn`/worker methods
//! likewise require `&'static self` (see `executor.rs`,
//! `new_executor!`'s static-stub leak). Teardown is then a method
//! ([`Context::shutdown`]) rather than a destructor, the same way
//! `Executor::stop` halts worker loops without reclaiming the executor.

use std::any::Any;
use std::hash::Hash;
use std::ptr::NonNull;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::entry::{Entry, Recreate};
use crate::future::Cached;
use crate::globals::Globals;
use crate::handle::Handle;
use crate::key::Key;
use crate::options::Options;
use crate::scheduler::{Scheduler, WorkItem};
use crate::store::Store;

struct ContextInner {
    options: Options,
    store: Store,
    scheduler: Scheduler,
    globals: Globals,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// The runtime facade. Cheap to copy: internally a `'static` reference, see
/// the module docs for why this isn't `Arc`.
#[derive(Clone, Copy)]
pub struct Context(&'static ContextInner);

impl Context {
    /// Constructs a new runtime and spawns its worker threads.
    #[must_use]
    pub fn new(options: Options) -> Self {
        let main_thread_id = options.main_thread_id;
        let worker_thread_count = options.worker_thread_count;

        let inner: &'static ContextInner = Box::leak(Box::new(ContextInner {
            options,
            store: Store::new(),
            scheduler: Scheduler::new(main_thread_id),
            globals: Globals::new(),
            workers: Mutex::new(Vec::new()),
        }));
        let ctx = Context(inner);

        let workers = Scheduler::start_workers(&ctx, worker_thread_count);
        *inner.workers.lock() = workers;

        ctx
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.0.options
    }

    pub(crate) fn store(&self) -> &Store {
        &self.0.store
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.0.scheduler
    }

    /// Pushes an opaque closure onto the worker pool's ready queue (§6
    /// "scheduling primitives", the pushed/closure form as opposed to the
    /// awaitable `Future` form).
    pub fn schedule_on_worker_thread(&self, closure: impl FnOnce() + Send + 'static) {
        self.0
            .scheduler
            .schedule(WorkItem::Closure(Box::new(closure)), None, false);
    }

    pub fn schedule_on_worker_thread_after(&self, closure: impl FnOnce() + Send + 'static, at: Instant) {
        self.0
            .scheduler
            .schedule(WorkItem::Closure(Box::new(closure)), Some(at), false);
    }

    pub fn schedule_on_main_thread(&self, closure: impl FnOnce() + Send + 'static) {
        self.0
            .scheduler
            .schedule(WorkItem::Closure(Box::new(closure)), None, true);
    }

    pub fn schedule_on_main_thread_after(&self, closure: impl FnOnce() + Send + 'static, at: Instant) {
        self.0
            .scheduler
            .schedule(WorkItem::Closure(Box::new(closure)), Some(at), true);
    }

    /// Schedules a previously-produced unit of scheduler work (internal use:
    /// resuming a woken task, or enqueueing a deferred release).
    pub(crate) fn schedule_work(&self, item: WorkItem, at: Option<Instant>, main_thread: bool) {
        self.0.scheduler.schedule(item, at, main_thread);
    }

    /// Pins `cached`'s entry alive for the remainder of this context's
    /// lifetime (§4.7, §6).
    pub fn set_caching_policy_global<T: Any + Send + Sync + 'static>(&self, cached: Cached<T>) {
        if let Some(handle) = cached.into_handle() {
            self.0.globals.add(handle);
        }
    }

    /// As [`Context::set_caching_policy_global`], but pins the entry behind
    /// an already-resolved [`crate::ValueRef`] (spec §6's `Result`
    /// overload).
    pub fn set_caching_policy_global_result<T: Any + Send + Sync + 'static>(
        &self,
        value: crate::value_ref::ValueRef<T>,
    ) {
        self.0.globals.add(value.into_handle());
    }

    /// Runs `callback` once the store becomes (or already is) empty of
    /// entries. One-shot (§8 property 8).
    pub fn set_empty_once_callback(&self, callback: impl FnOnce() + Send + 'static) {
        self.0.store.set_empty_once_callback(Box::new(callback));
    }

    /// Whether the calling thread is this context's designated main
    /// thread.
    #[must_use]
    pub fn runs_on_main_thread(&self) -> bool {
        self.0.scheduler.main_thread_id() == Some(thread::current().id())
    }

    /// Volunteers the calling thread to the scheduler until it is stopped.
    /// With `worker_thread_count == 0`, this is how any work runs at all
    /// (§4.5 "active-wait liveness").
    pub fn assist(&self) {
        self.0.scheduler.assist();
    }

    /// Drains pinned globals (newest-first) and stops the scheduler, then
    /// joins every worker thread. Mirrors the C++ destructor sequence
    /// (§4.7, §9): globals torn down before the scheduler, so a global's
    /// own teardown can still submit work; a stop does not cancel
    /// in-flight tasks, it only stops workers from parking once their
    /// queues drain (§5).
    pub fn shutdown(&self) {
        self.0.globals.drain();
        self.0.scheduler.request_stop();

        let workers = std::mem::take(&mut *self.0.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }

    /// Blocks the calling thread, actively assisting the scheduler, until
    /// `deadline` elapses or the store is idle — used by tests that need a
    /// bounded-time check rather than a full shutdown.
    pub fn drain_for(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.0.scheduler.is_idle() {
                return;
            }
            thread::yield_now();
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

macro_rules! impl_submission {
    ($name:ident, [$($k:ident : $ty:ident),*]) => {
        #[allow(clippy::too_many_arguments)]
        pub fn $name<F, $($ty,)* T, Fut>(
            &self,
            function_name: &'static str,
            f: F,
            $($k: $ty,)*
        ) -> Cached<T>
        where
            F: Fn(Context, crate::task::Yield<T>, $($ty,)*) -> Fut + Copy + Send + Sync + 'static,
            $($ty: Eq + Hash + Clone + Send + Sync + 'static,)*
            T: Any + Send + Sync + 'static,
            Fut: std::future::Future<Output = T> + Send + 'static,
        {
            let args = ($($k.clone(),)*);
            let key = Key::new::<F, _>(function_name, args);

            let recreate: Recreate = Box::new(move |ptr: NonNull<Entry>| {
                // Safety: `ptr` is the entry this closure was registered on;
                // it is kept alive by the `Handle` spawned alongside it.
                let ctx = unsafe { ptr.as_ref() }.ctx;
                let self_handle = Entry::handle(ptr);
                let yielder = crate::task::Yield::new(ptr);
                let fut = f(ctx, yielder, $($k.clone(),)*);
                crate::task::spawn_producer::<T, _>(ctx, ptr, self_handle, fut);
            });

            let handle = self.store().retrieve_reference(self, key, recreate);
            Cached::new(handle)
        }
    };
}

impl Context {
    impl_submission!(get0, []);
    impl_submission!(get1, [k0: K0]);
    impl_submission!(get2, [k0: K0, k1: K1]);
    impl_submission!(get3, [k0: K0, k1: K1, k2: K2]);
    impl_submission!(get4, [k0: K0, k1: K1, k2: K2, k3: K3]);
    impl_submission!(get5, [k0: K0, k1: K1, k2: K2, k3: K3, k4: K4]);
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The two-pool cooperative scheduler.
//!
//! Grounded on `arc::detail::scheduler` (`original_source/include/arc/
//! detail/scheduler.hpp`, `src/arc.cpp`): one [`Pool`] for worker threads,
//! one for the distinguished main thread. `tracing` instrumentation follows
//! the span-per-tick convention used in the teacher's
//! `libs/kasync/src/executor.rs` worker loop.

mod pool;

use std::thread;
use std::time::Instant;

pub(crate) use pool::WorkItem;
use pool::{Pool, Pop};

use crate::handle::Handle;
use crate::task::TaskRef;
use crate::Context;

pub(crate) struct Scheduler {
    worker_pool: Pool,
    main_pool: Pool,
    main_thread_id: Option<thread::ThreadId>,
}

impl Scheduler {
    pub(crate) fn new(main_thread_id: Option<thread::ThreadId>) -> Self {
        Scheduler {
            worker_pool: Pool::new(),
            main_pool: Pool::new(),
            main_thread_id,
        }
    }

    /// Spawns `count` dedicated worker threads, each holding a clone of
    /// `ctx` (an `Arc`-backed handle, so the threads can outlive the
    /// function that started them without needing `&'static`).
    pub(crate) fn start_workers(ctx: &Context, count: usize) -> Vec<thread::JoinHandle<()>> {
        (0..count)
            .map(|i| {
                let ctx = ctx.clone();
                thread::Builder::new()
                    .name(format!("dedupe-rt-worker-{i}"))
                    .spawn(move || ctx.scheduler().worker(&ctx.scheduler().worker_pool))
                    .expect("failed to spawn worker thread")
            })
            .collect()
    }

    fn pool_for(&self, main_thread: bool) -> &Pool {
        if main_thread {
            &self.main_pool
        } else {
            &self.worker_pool
        }
    }

    pub(crate) fn schedule(&self, item: WorkItem, at: Option<Instant>, main_thread: bool) {
        let pool = self.pool_for(main_thread);
        match at {
            Some(at) => pool.schedule_after(item, at),
            None => pool.schedule(item),
        }
    }

    pub(crate) fn enqueue_release(&self, handle: Handle, main_thread: bool) {
        self.pool_for(main_thread).enqueue_release(handle);
    }

    pub(crate) fn request_stop(&self) {
        self.worker_pool.request_stop();
        self.main_pool.request_stop();
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.worker_pool.is_idle() && self.main_pool.is_idle()
    }

    /// Runs the worker loop on the calling thread, draining `pool` until it
    /// is stopped. Used both by dedicated worker threads and by
    /// [`Scheduler::assist`] (a caller volunteering its own thread).
    fn worker(&self, pool: &Pool) {
        let _span = tracing::debug_span!("scheduler worker").entered();

        while let Some(popped) = pool.pop() {
            match popped {
                Pop::Release(handle) => {
                    tracing::trace!("draining deferred release");
                    crate::store::Store::release_reference(handle);
                }
                Pop::Work(WorkItem::Resume(task)) => {
                    tracing::trace!(?task, "resuming task");
                    task.poll();
                }
                Pop::Work(WorkItem::Closure(f)) => {
                    tracing::trace!("running scheduled closure");
                    f();
                }
            }
        }
    }

    /// Volunteers the calling thread to drain the pool matching its
    /// identity (main pool if this is the designated main thread, worker
    /// pool otherwise) until [`Scheduler::request_stop`] is called.
    ///
    /// Mirrors `scheduler::assist()` in the C++ original: a caller-owned
    /// thread (e.g. a host program's main thread) contributes its own
    /// cycles to the scheduler instead of the scheduler owning every
    /// thread it runs on.
    pub(crate) fn assist(&self) {
        let main_thread = self.main_thread_id == Some(thread::current().id());
        self.worker(self.pool_for(main_thread));
    }

    pub(crate) fn main_thread_id(&self) -> Option<thread::ThreadId> {
        self.main_thread_id
    }

    /// Pops and runs exactly one unit of work from the chosen pool without
    /// blocking. Returns `false` if the pool had nothing ready.
    pub(crate) fn run_one(&self, main_thread: bool) -> bool {
        match self.pool_for(main_thread).try_pop() {
            Some(Pop::Release(handle)) => {
                crate::store::Store::release_reference(handle);
                true
            }
            Some(Pop::Work(WorkItem::Resume(task))) => {
                task.poll();
                true
            }
            Some(Pop::Work(WorkItem::Closure(f))) => {
                f();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

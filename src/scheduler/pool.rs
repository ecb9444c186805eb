// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! One work pool: a ready queue, a sorted timer list, a deferred-release
//! queue and a closure queue, guarded by a single mutex/condvar pair.
//!
//! Grounded on `ArcSchedulerWorkPool` (`original_source/include/arc/detail/
//! scheduler.hpp`) and its pop algorithm `ThreadSafeWorkPop` (`src/arc.cpp`).
//! The C++ version keeps four separately-synchronized containers and a
//! null-`coroutine_handle` sentinel to distinguish "resume" from "run
//! closure" work items; here a single `WorkItem` enum collapses that
//! distinction into the type system (see DESIGN.md).

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::handle::Handle;
use crate::task::TaskRef;

pub(crate) enum WorkItem {
    Resume(TaskRef),
    Closure(Box<dyn FnOnce() + Send>),
}

struct State {
    ready: VecDeque<WorkItem>,
    timers: Vec<(Instant, WorkItem)>,
    deferred_release: VecDeque<Handle>,
    unused_cache_size: usize,
    stopped: bool,
}

pub(crate) struct Pool {
    state: Mutex<State>,
    cv: Condvar,
}

impl Pool {
    pub(crate) fn new() -> Self {
        Pool {
            state: Mutex::new(State {
                ready: VecDeque::new(),
                timers: Vec::new(),
                deferred_release: VecDeque::new(),
                unused_cache_size: 0,
                stopped: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn schedule(&self, item: WorkItem) {
        let mut state = self.state.lock();
        state.ready.push_back(item);
        self.cv.notify_one();
    }

    pub(crate) fn schedule_after(&self, item: WorkItem, at: Instant) {
        let mut state = self.state.lock();
        let pos = state.timers.partition_point(|(t, _)| *t <= at);
        state.timers.insert(pos, (at, item));
        self.cv.notify_one();
    }

    /// Enqueues a handle whose last reference has (logically) been
    /// released, deferring the actual teardown decision to a worker.
    ///
    /// Bounded by an "unused cache" high-water mark: mirrors
    /// `unusedCachesize` in the C++ original, which exists purely to avoid
    /// the deferred-release queue growing without bound under bursty
    /// release traffic. We don't act on the bound here (no port of the
    /// original's backpressure policy exists in spec.md); we just track it
    /// for observability.
    pub(crate) fn enqueue_release(&self, handle: Handle) {
        let mut state = self.state.lock();
        state.deferred_release.push_back(handle);
        state.unused_cache_size = state.unused_cache_size.max(state.deferred_release.len());
        self.cv.notify_one();
    }

    pub(crate) fn request_stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.cv.notify_all();
    }

    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.ready.is_empty() && state.timers.is_empty() && state.deferred_release.is_empty()
    }

    /// Pops the next unit of work, in priority order: a deferred release
    /// first, then a due timer, then the ready queue. Blocks until work is
    /// available, a timer becomes due, or the pool is stopped (returning
    /// `None`).
    pub(crate) fn pop(&self) -> Option<Pop> {
        let mut state = self.state.lock();
        loop {
            if let Some(handle) = state.deferred_release.pop_front() {
                return Some(Pop::Release(handle));
            }

            let now = Instant::now();
            if let Some((deadline, _)) = state.timers.first() {
                if *deadline <= now {
                    let (_, item) = state.timers.remove(0);
                    return Some(Pop::Work(item));
                }
            }

            if let Some(item) = state.ready.pop_front() {
                return Some(Pop::Work(item));
            }

            if state.stopped
                && state.ready.is_empty()
                && state.timers.is_empty()
                && state.deferred_release.is_empty()
            {
                return None;
            }

            match state.timers.first() {
                Some((deadline, _)) => {
                    let timeout = deadline.saturating_duration_since(now);
                    let result = self.cv.wait_for(&mut state, timeout);
                    // Spurious or timer-driven wakeup: loop and re-check.
                    let _ = result;
                }
                None => self.cv.wait(&mut state),
            }
        }
    }
}

pub(crate) enum Pop {
    Work(WorkItem),
    Release(Handle),
}

impl Pool {
    /// Non-blocking variant of [`Pool::pop`]: returns `None` immediately
    /// instead of parking when there's nothing ready right now. Used by
    /// [`crate::future::Cached::active_wait`] to contribute to the
    /// scheduler without committing to the full worker loop.
    pub(crate) fn try_pop(&self) -> Option<Pop> {
        let mut state = self.state.lock();

        if let Some(handle) = state.deferred_release.pop_front() {
            return Some(Pop::Release(handle));
        }

        if let Some((deadline, _)) = state.timers.first() {
            if *deadline <= Instant::now() {
                let (_, item) = state.timers.remove(0);
                return Some(Pop::Work(item));
            }
        }

        state.ready.pop_front().map(Pop::Work)
    }
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! (EXPANSION) A bounded-concurrency consumer: enlist any number of
//! in-flight [`Cached`] computations, then drain their results one at a
//! time in completion order.
//!
//! Grounded on `arc::funnel` (`original_source/include/arc/arc/
//! funnel.hpp`). `push` there is fire-and-forget (it registers a
//! continuation on the future and returns immediately); `await` is the only
//! place that blocks, and it yields results in whatever order they finished
//! in, not the order they were pushed. The single-waiter assumption baked
//! into the original (`arc_CHECK_Assert(!stateIt->awaiter)`) carries over
//! here as a `debug_assert!`: a `Funnel` is meant to be awaited from one
//! place at a time.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Waker};

use parking_lot::Mutex;

use crate::future::Cached;
use crate::value_ref::ValueRef;
use crate::Context;

struct State<T> {
    ready: VecDeque<ValueRef<T>>,
    awaiter: Option<Waker>,
}

/// Decouples "how many computations are in flight" from "how many results
/// have been consumed" (§8 scenario S6).
pub struct Funnel<T> {
    ctx: Context,
    state: Arc<Mutex<State<T>>>,
    size: Arc<AtomicUsize>,
}

impl<T> Funnel<T>
where
    T: Any + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(ctx: Context) -> Self {
        Funnel {
            ctx,
            state: Arc::new(Mutex::new(State {
                ready: VecDeque::new(),
                awaiter: None,
            })),
            size: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enlists `cached`: once it completes (in any order relative to other
    /// pushes), its result is appended to the ready queue and the pending
    /// `await`, if any, is woken.
    pub fn push(&self, cached: Cached<T>) {
        self.size.fetch_add(1, Ordering::Relaxed);

        let ctx = self.ctx.clone();
        let state = Arc::clone(&self.state);
        let size = Arc::clone(&self.size);
        cached.async_wait_and_then(move |value| {
            let mut guard = state.lock();
            guard.ready.push_back(value);
            size.fetch_sub(1, Ordering::Relaxed);
            // Mirrors the original scheduling the waiting coroutine back
            // onto the worker pool instead of resuming it inline on
            // whichever thread happened to complete this computation.
            if let Some(waker) = guard.awaiter.take() {
                drop(guard);
                ctx.schedule_on_worker_thread(move || waker.wake());
            }
        });
    }

    /// The number of computations pushed but not yet consumed via `.await`
    /// (in flight plus ready-but-unread).
    #[must_use]
    pub fn size(&self) -> usize {
        let ready = self.state.lock().ready.len();
        self.size.load(Ordering::Relaxed) + ready
    }

    /// Borrows this funnel as a one-shot awaitable yielding the next
    /// completed result. Repeated awaits drain the queue one entry at a
    /// time; awaiting with nothing pushed and nothing in flight parks
    /// forever, same as the original.
    pub fn next(&self) -> Next<'_, T> {
        Next { funnel: self }
    }
}

/// The future returned by [`Funnel::next`].
pub struct Next<'a, T> {
    funnel: &'a Funnel<T>,
}

impl<T> Future for Next<'_, T>
where
    T: Any + Send + Sync + 'static,
{
    type Output = ValueRef<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let mut state = self.funnel.state.lock();
        if let Some(value) = state.ready.pop_front() {
            return Poll::Ready(value);
        }
        // Re-polling a `Pending` future without an intervening wake is
        // permitted by `Future`'s contract (unlike the single-shot
        // `await_suspend` this is grounded on), so the stored waker is
        // simply replaced rather than asserted absent.
        state.awaiter = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for Funnel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Funnel").field("size", &self.size()).finish()
    }
}

impl<T> Drop for Funnel<T> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.size(),
            0,
            "Funnel dropped with pushed computations still pending"
        );
    }
}

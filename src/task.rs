// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The producer task: a boxed `Future<Output = ()>` that completes its
//! [`Entry`] and reschedules itself on the worker pool when woken.
//!
//! Grounded on `arc::detail::promise_base`/the coroutine frame in
//! `original_source/include/arc/detail/promise_base.hpp`: a coroutine frame
//! there is a self-scheduling resumable object tied to one control block.
//! Here the "coroutine frame" is simply whatever `Future` the Rust compiler
//! generated for the user's `async fn`, and `TaskRef` supplies the
//! `std::task::Wake` glue `libs/kasync`'s own `TaskRef`
//! (`libs/kasync/src/task.rs`) hand-rolls for its intrusive task queue —
//! here backed by an ordinary `Arc` since we don't need an intrusive list.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Wake, Waker};

use futures::FutureExt;
use parking_lot::Mutex;

use crate::entry::Entry;
use crate::error::TaskError;
use crate::handle::Handle;
use crate::scheduler::WorkItem;
use crate::Context;

trait ErasedTask: Send + Sync {
    fn poll(self: Arc<Self>);
}

struct Task<F> {
    ctx: Context,
    future: Mutex<Option<Pin<Box<F>>>>,
}

impl<F> ErasedTask for Task<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    fn poll(self: Arc<Self>) {
        let mut slot = self.future.lock();
        let Some(mut future) = slot.take() else {
            // Already completed (or being polled concurrently, which
            // cannot happen: wake only ever re-enqueues once per
            // completion of a `poll` call).
            return;
        };

        let waker = Waker::from(Arc::clone(&self));
        let mut cx = TaskContext::from_waker(&waker);

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => drop(future),
            Poll::Pending => *slot = Some(future),
        }
    }
}

impl<F> Wake for Task<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let ctx = this.ctx;
        ctx.schedule_work(WorkItem::Resume(TaskRef(this)), None, false);
    }
}

/// A type-erased, schedulable handle to a running producer task.
#[derive(Clone)]
pub(crate) struct TaskRef(Arc<dyn ErasedTask>);

impl TaskRef {
    pub(crate) fn poll(self) {
        self.0.poll();
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaskRef")
    }
}

/// A handle a producer uses to publish an intermediate value before its
/// final return (§4.4 "yield", §5 suspension point 4).
///
/// Threaded into every producer function as an extra argument (see
/// [`spawn_producer`]'s caller in `context.rs`). Cheap to clone-by-value in
/// spirit, though producers typically only ever hold one.
pub struct Yield<T> {
    entry_ptr: NonNull<Entry>,
    _marker: std::marker::PhantomData<fn(T)>,
}

// Safety: `entry_ptr` points at an `Entry`, itself `Send + Sync`, kept
// alive for the producer's whole run by its `self_handle` — the same
// invariant `spawn_producer`'s own `unsafe { entry_ptr.as_ref() }` relies
// on.
unsafe impl<T> Send for Yield<T> {}
unsafe impl<T> Sync for Yield<T> {}

impl<T: Any + Send + Sync + 'static> Yield<T> {
    pub(crate) fn new(entry_ptr: NonNull<Entry>) -> Self {
        Yield {
            entry_ptr,
            _marker: std::marker::PhantomData,
        }
    }

    /// Publishes `value` as the entry's result, unblocking every current
    /// and future waiter immediately. The producer keeps running; its
    /// eventual `return` (or a later `publish`) is a no-op (§4.3's
    /// completion idempotence).
    pub fn publish(&self, value: T) {
        // Safety: see the type's own safety comment.
        let entry = unsafe { self.entry_ptr.as_ref() };
        entry.publish(Box::new(value));
    }
}

impl<T> fmt::Debug for Yield<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Yield")
    }
}

/// Builds and schedules the producer task backing `entry`: runs `body`
/// (which computes the task's output), catches a panic (§7), and completes
/// the entry with the value or the resulting [`TaskError`], finally
/// dropping `self_handle` to release the task's own reference.
///
/// `body` is `AssertUnwindSafe`-wrapped because the futures generated by
/// `async fn` routinely close over `&RwLock`/`&Mutex` guards across await
/// points that are not statically `UnwindSafe`; we rely on our own
/// panic boundary here rather than the type system's.
pub(crate) fn spawn_producer<T, Fut>(
    ctx: Context,
    entry_ptr: NonNull<Entry>,
    self_handle: Handle,
    body: Fut,
) where
    T: Any + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let future = async move {
        // Safety: `self_handle` keeps the entry alive for the duration of
        // this future.
        let entry = unsafe { entry_ptr.as_ref() };

        match AssertUnwindSafe(body).catch_unwind().await {
            Ok(value) => entry.complete_value(Box::new(value)),
            Err(payload) => entry.complete_error(TaskError::from_panic(payload)),
        }

        drop(self_handle);
    };

    let task = Arc::new(Task {
        ctx,
        future: Mutex::new(Some(Box::pin(future))),
    });

    ctx.schedule_work(WorkItem::Resume(TaskRef(task)), None, false);
}

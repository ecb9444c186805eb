// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end scenarios from spec.md §8 (S1-S6) plus the numbered
//! properties and boundary behaviors that don't fit a unit test.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dedupe_rt::{all_of, Context, Funnel, Options, ValueRef, Yield};

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn hello(_ctx: Context, _yielder: Yield<String>) -> impl Future<Output = String> {
    async move { "Hello, World!".to_owned() }
}

#[test]
fn s1_hello_and_shared_storage() {
    init_tracing();
    let ctx = Context::new(Options::two_threads());

    let mut first = ctx.get0("hello", hello);
    let value = first.active_wait(&ctx);
    assert_eq!(value.get().unwrap(), "Hello, World!");

    let mut second = ctx.get0("hello", hello);
    let value2 = second.active_wait(&ctx);
    assert_eq!(
        std::ptr::from_ref(value.get().unwrap()),
        std::ptr::from_ref(value2.get().unwrap()),
        "re-submission must alias the same stored object"
    );

    ctx.shutdown();
}

static KEYED_RUNS: AtomicUsize = AtomicUsize::new(0);

fn echo(_ctx: Context, _yielder: Yield<String>, s: String) -> impl Future<Output = String> {
    KEYED_RUNS.fetch_add(1, Ordering::Relaxed);
    async move { s }
}

#[test]
fn s2_keyed_cache_dedup() {
    init_tracing();
    KEYED_RUNS.store(0, Ordering::Relaxed);
    let ctx = Context::new(Options::two_threads());

    let mut a = ctx.get1("echo", echo, "A".to_owned());
    let mut b = ctx.get1("echo", echo, "B".to_owned());
    let mut a_again = ctx.get1("echo", echo, "A".to_owned());

    let ra = a.active_wait(&ctx);
    let rb = b.active_wait(&ctx);
    let ra2 = a_again.active_wait(&ctx);

    assert_eq!(ra.get().unwrap(), "A");
    assert_eq!(rb.get().unwrap(), "B");
    assert_eq!(
        std::ptr::from_ref(ra.get().unwrap()),
        std::ptr::from_ref(ra2.get().unwrap()),
        "third call must alias the first call's entry"
    );
    assert_eq!(KEYED_RUNS.load(Ordering::Relaxed), 2, "exactly two tasks run");

    ctx.shutdown();
}

static FIB_RUNS: AtomicUsize = AtomicUsize::new(0);

fn fib(ctx: Context, _yielder: Yield<i64>, n: i64) -> impl Future<Output = i64> + Send {
    FIB_RUNS.fetch_add(1, Ordering::Relaxed);
    async move {
        if n < 0 {
            panic!("fib: domain error, negative index {n}");
        }
        if n > 92 {
            panic!("fib: overflow, index {n} exceeds i64 range");
        }
        if n < 2 {
            return n;
        }
        let mut a = ctx.get1("fib", fib, n - 1);
        let mut b = ctx.get1("fib", fib, n - 2);
        let ra = a.active_wait(&ctx);
        let rb = b.active_wait(&ctx);
        *ra.get().unwrap() + *rb.get().unwrap()
    }
}

// S3 and S4 share `FIB_RUNS` and the `fib` entry's Key space, so both
// scenarios run in one test function — spreading them across separate
// `#[test]`s would let them race on the same static counter and the same
// cached `fib` keys under the default parallel test runner.
#[test]
fn s3_recursive_fibonacci_and_s4_error_propagation() {
    init_tracing();
    FIB_RUNS.store(0, Ordering::Relaxed);
    let ctx = Context::new(Options::hardware_concurrency());

    let mut result = ctx.get1("fib", fib, 92i64);
    let value = result.active_wait(&ctx);
    assert_eq!(*value.get().unwrap(), 7_540_113_804_746_346_429);

    assert_eq!(
        FIB_RUNS.load(Ordering::Relaxed),
        93,
        "fib(0)..fib(92) is exactly 93 distinct task instantiations"
    );

    let mut negative = ctx.get1("fib", fib, -1i64);
    let err = negative.active_wait(&ctx).get().err().expect("expected domain error");
    assert!(err.0.to_string().contains("domain error"));

    // Re-awaiting the same key surfaces the identical error again.
    let mut negative_again = ctx.get1("fib", fib, -1i64);
    let err_again = negative_again
        .active_wait(&ctx)
        .get()
        .err()
        .expect("expected domain error again");
    assert!(err_again.0.to_string().contains("domain error"));

    let mut overflow = ctx.get1("fib", fib, 93i64);
    let err = overflow.active_wait(&ctx).get().err().expect("expected overflow error");
    assert!(err.0.to_string().contains("overflow"));

    ctx.shutdown();
}

fn tick(_ctx: Context, _yielder: Yield<()>, id: u32) -> impl Future<Output = ()> {
    async move {
        let _ = id;
    }
}

#[test]
fn s5_all_of_waits_for_every_task() {
    init_tracing();
    let ctx = Context::new(Options::two_threads());

    let futures = vec![
        ctx.get1("tick", tick, 0u32),
        ctx.get1("tick", tick, 1u32),
        ctx.get1("tick", tick, 2u32),
    ];

    let results = active_wait_future(&ctx, all_of(futures));
    assert_eq!(results.len(), 3);
    for r in &results {
        assert!(r.is_ok());
    }

    ctx.shutdown();
}

/// Drives an arbitrary future to completion by busy-polling with a no-op
/// waker — used here because `all_of`/`Funnel::next` return plain
/// `Future`s, not `Cached`, so [`dedupe_rt::Cached::active_wait`]'s
/// scheduler-assisting loop doesn't apply. Worker threads still do the
/// actual work; this just re-polls until they finish it.
fn active_wait_future<F: Future>(ctx: &Context, fut: F) -> F::Output {
    let _ = ctx;
    use std::pin::pin;
    use std::task::{Context as TaskContext, Poll, Wake, Waker};

    struct NoopWake;
    impl Wake for NoopWake {
        fn wake(self: std::sync::Arc<Self>) {}
    }

    let waker = Waker::from(std::sync::Arc::new(NoopWake));
    let mut task_cx = TaskContext::from_waker(&waker);
    let mut fut = pin!(fut);

    loop {
        if let Poll::Ready(value) = fut.as_mut().poll(&mut task_cx) {
            return value;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn keyed_pool_task(_ctx: Context, _yielder: Yield<u32>, key: u32) -> impl Future<Output = u32> {
    async move {
        std::thread::sleep(Duration::from_micros(100));
        key
    }
}

#[test]
fn s6_funnel_bounded_concurrency() {
    init_tracing();
    let mut options = Options::hardware_concurrency();
    options.worker_thread_count = 3;
    let ctx = Context::new(options);

    const BOUND: usize = 10;
    let funnel = Funnel::new(ctx);
    let seen_keys = Mutex::new(HashSet::new());
    let mut consumed = 0usize;

    // The funnel itself doesn't block `push` at the bound (mirroring the
    // original); the caller maintains it by draining before pushing more.
    for i in 0..60u32 {
        let key = i % 20;
        if funnel.size() >= BOUND {
            let value = active_wait_future(&ctx, funnel.next());
            seen_keys.lock().unwrap().insert(*value.get().unwrap());
            consumed += 1;
        }
        funnel.push(ctx.get1("keyed_pool_task", keyed_pool_task, key));
        assert!(funnel.size() <= BOUND, "funnel must never exceed its bound");
    }

    while consumed < 60 {
        let value = active_wait_future(&ctx, funnel.next());
        seen_keys.lock().unwrap().insert(*value.get().unwrap());
        consumed += 1;
    }

    assert!(seen_keys.lock().unwrap().len() <= 20);
    assert_eq!(funnel.size(), 0);

    ctx.shutdown();
}

#[test]
fn default_constructed_cached_panics_on_poll() {
    let cached: dedupe_rt::Cached<u32> = Default::default();
    assert!(!cached.is_valid());
}

#[test]
fn empty_once_callback_fires_on_transition_to_empty() {
    init_tracing();
    let ctx = Context::new(Options::two_threads());
    let fired = std::sync::Arc::new(AtomicUsize::new(0));

    {
        let mut cached = ctx.get0("hello", hello);
        let _ = cached.active_wait(&ctx);

        let fired = std::sync::Arc::clone(&fired);
        ctx.set_empty_once_callback(move || {
            fired.fetch_add(1, Ordering::Relaxed);
        });

        // Entry still referenced by `cached`'s returned ValueRef only
        // transiently; drop to release the last handle.
    }

    ctx.drain_for(Duration::from_millis(200));
    assert_eq!(fired.load(Ordering::Relaxed), 1);

    // Registering against an already-empty store fires immediately.
    let fired_immediately = std::sync::Arc::new(AtomicUsize::new(0));
    let f2 = std::sync::Arc::clone(&fired_immediately);
    ctx.set_empty_once_callback(move || {
        f2.fetch_add(1, Ordering::Relaxed);
    });
    assert_eq!(fired_immediately.load(Ordering::Relaxed), 1);

    ctx.shutdown();
}

fn yields_then_returns(_ctx: Context, yielder: Yield<i64>) -> impl Future<Output = i64> {
    async move {
        yielder.publish(42);
        99
    }
}

#[test]
fn yield_publishes_value_before_final_return_wins() {
    init_tracing();
    let ctx = Context::new(Options::two_threads());

    let mut result = ctx.get0("yields_then_returns", yields_then_returns);
    let value = result.active_wait(&ctx);
    assert_eq!(
        *value.get().unwrap(),
        42,
        "the yielded value wins; the later return is a no-op"
    );

    ctx.shutdown();
}

#[derive(Debug)]
struct Pair {
    a: i64,
    b: String,
}

fn make_pair(_ctx: Context, _yielder: Yield<Pair>) -> impl Future<Output = Pair> {
    async move {
        Pair {
            a: 7,
            b: "seven".to_owned(),
        }
    }
}

#[test]
fn value_ref_alias_keeps_donor_entry_alive() {
    init_tracing();
    let ctx = Context::new(Options::two_threads());

    let mut cached = ctx.get0("make_pair", make_pair);
    let whole = cached.active_wait(&ctx);
    let alias: ValueRef<i64> = ValueRef::alias(&whole, |p| &p.a);

    // The donor's ValueRef is gone; the alias keeps the entry (and thus
    // the aliased field) alive on its own.
    drop(whole);
    assert_eq!(*alias.get().unwrap(), 7);

    ctx.shutdown();
}

#[test]
fn cached_map_views_a_field_through_an_in_flight_submission() {
    init_tracing();
    let ctx = Context::new(Options::two_threads());

    let whole = ctx.get0("make_pair", make_pair);
    let mut projected: dedupe_rt::Cached<i64> = dedupe_rt::Cached::map(whole, |p| &p.a);
    let value = projected.active_wait(&ctx);
    assert_eq!(*value.get().unwrap(), 7);

    ctx.shutdown();
}

#[test]
fn active_wait_liveness_with_zero_worker_threads() {
    init_tracing();
    let mut options = Options::two_threads();
    options.worker_thread_count = 0;
    let ctx = Context::new(options);

    let mut results = Vec::new();
    for i in 0..16u32 {
        results.push(ctx.get1("tick", tick, i));
    }
    for mut r in results {
        r.active_wait(&ctx);
    }

    ctx.shutdown();
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Micro-benchmark for the dedup fast path (§8 scenario S3): recursive
//! Fibonacci, where every `fib(n)` is submitted exactly once no matter how
//! many of its callers ask for it.

use std::future::Future;

use criterion::{criterion_group, criterion_main, Criterion};
use dedupe_rt::{Context, Options, Yield};

fn fib(ctx: Context, _yielder: Yield<i64>, n: i64) -> impl Future<Output = i64> + Send {
    async move {
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

fn fib_30_cold_single_threaded(c: &mut Criterion) {
    c.bench_function("fib_30_cold_single_threaded", |b| {
        b.iter(|| {
            let mut options = Options::two_threads();
            options.worker_thread_count = 0;
            let ctx = Context::new(options);
            let mut result = ctx.get1("fib", fib, 30i64);
            let value = result.active_wait(&ctx);
            ctx.shutdown();
            *value.get().unwrap()
        });
    });
}

fn fib_30_cold_multi_threaded(c: &mut Criterion) {
    c.bench_function("fib_30_cold_multi_threaded", |b| {
        b.iter(|| {
            let ctx = Context::new(Options::hardware_concurrency());
            let mut result = ctx.get1("fib", fib, 30i64);
            let value = result.active_wait(&ctx);
            ctx.shutdown();
            *value.get().unwrap()
        });
    });
}

/// Repeated submission of an already-cached key: the dedup fast path this
/// benchmark is really about, isolated from task-spawning cost.
fn fib_30_warm_resubmission(c: &mut Criterion) {
    let ctx = Context::new(Options::hardware_concurrency());
    let mut warm = ctx.get1("fib", fib, 30i64);
    warm.active_wait(&ctx);

    c.bench_function("fib_30_warm_resubmission", |b| {
        b.iter(|| {
            let mut cached = ctx.get1("fib", fib, 30i64);
            let value = cached.active_wait(&ctx);
            *value.get().unwrap()
        });
    });

    ctx.shutdown();
}

criterion_group!(
    fib,
    fib_30_cold_single_threaded,
    fib_30_cold_multi_threaded,
    fib_30_warm_resubmission,
);
criterion_main!(fib);

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Runtime configuration, matching `arc::options`
//! (`original_source/include/arc/arc/options.hpp`).

use std::thread::{self, ThreadId};

/// Configures a [`crate::Context`]: how many worker threads to spawn, which
/// thread (if any) serves the main pool, and free-form arguments for host
/// programs.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub worker_thread_count: usize,
    pub main_thread_id: Option<ThreadId>,
    pub args: Vec<String>,
}

impl Options {
    /// `hardware_concurrency() - 1` workers, reserving one core for the
    /// calling thread, which is registered as the main thread.
    #[must_use]
    pub fn hardware_concurrency() -> Self {
        Options {
            worker_thread_count: available_parallelism().saturating_sub(1),
            main_thread_id: Some(thread::current().id()),
            args: Vec::new(),
        }
    }

    /// Like [`Options::hardware_concurrency`], but does not register a main
    /// thread — the main pool only runs when some thread calls
    /// [`crate::Context::active_wait`] against it.
    #[must_use]
    pub fn hardware_concurrency_no_main_thread() -> Self {
        Options {
            worker_thread_count: available_parallelism().saturating_sub(1),
            main_thread_id: None,
            args: Vec::new(),
        }
    }

    /// One worker thread plus the calling thread as main. Useful for tests.
    #[must_use]
    pub fn two_threads() -> Self {
        Options {
            worker_thread_count: 1,
            main_thread_id: Some(thread::current().id()),
            args: Vec::new(),
        }
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(2)
        .max(2)
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A deduplicating asynchronous task runtime backed by a content-addressed
//! result cache.
//!
//! Submitting the same `(function, arguments)` pair twice while the first
//! submission is still in flight (or its result still cached) returns a
//! handle to the *same* computation rather than starting a second one. See
//! [`Context`] for the entry point.
//!
//! ```no_run
//! use dedupe_rt::{Context, Options, Yield};
//!
//! fn double(_ctx: Context, _yielder: Yield<u32>, x: u32) -> impl std::future::Future<Output = u32> {
//!     async move { x * 2 }
//! }
//!
//! let ctx = Context::new(Options::two_threads());
//! let mut cached = ctx.get1("double", double, 21u32);
//! let value = cached.active_wait(&ctx);
//! assert_eq!(*value.get().unwrap(), 42);
//! ctx.shutdown();
//! ```

mod all_of;
mod context;
mod entry;
mod error;
mod future;
mod globals;
mod handle;
mod key;
mod options;
mod scheduler;
mod store;
mod task;
mod value_ref;

pub mod funnel;

pub use all_of::all_of;
pub use context::Context;
pub use error::{Failed, TaskError};
pub use funnel::Funnel;
pub use future::Cached;
pub use options::Options;
pub use task::Yield;
pub use value_ref::ValueRef;

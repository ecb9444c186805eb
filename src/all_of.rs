// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! (EXPANSION) Join-all: wait for every [`Cached`] in a slice to complete,
//! regardless of completion order, and return their results in submission
//! order.
//!
//! Grounded on `arc::all` (`original_source/include/arc/arc/all.hpp`). The
//! original hand-rolls a doneCount/awaiter pair because C++ coroutines have
//! no `join_all`; `Cached<T>` already implements [`std::future::Future`], so
//! the Rust translation is `futures::future::join_all` — the same crate the
//! producer path already depends on for `catch_unwind` (§8 scenario S5).

use std::any::Any;

use crate::future::Cached;
use crate::value_ref::ValueRef;

/// Awaits every entry in `futures` and returns their results in the same
/// order, once all have completed.
pub async fn all_of<T>(futures: Vec<Cached<T>>) -> Vec<ValueRef<T>>
where
    T: Any + Send + Sync + 'static,
{
    futures::future::join_all(futures).await
}

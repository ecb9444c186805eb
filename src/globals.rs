// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The `set_caching_policy_global` anchor stack.
//!
//! Grounded on `arc::detail::globals` (`src/arc.cpp`): a LIFO stack of
//! [`Handle`]s, drained newest-first on [`crate::Context`] shutdown so a
//! global's teardown can still observe globals registered earlier.

use parking_lot::Mutex;

use crate::handle::Handle;

pub(crate) struct Globals {
    stack: Mutex<Vec<Handle>>,
}

impl Globals {
    pub(crate) fn new() -> Self {
        Globals {
            stack: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, handle: Handle) {
        self.stack.lock().push(handle);
    }

    /// Pops and drops every pinned handle, last-registered first.
    pub(crate) fn drain(&self) {
        loop {
            let handle = self.stack.lock().pop();
            let Some(handle) = handle else {
                break;
            };
            drop(handle);
        }
    }
}

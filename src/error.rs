// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Producer-side error payload.
//!
//! A task's failure (an unwinding panic inside the user-supplied producer)
//! is captured here rather than propagated as a Rust panic across threads.
//! Every observer of the same entry sees the identical [`TaskError`]
//! instance (an [`Arc`] clone), satisfying the "error determinism" property.

use std::any::Any;
use std::sync::Arc;

/// The error payload stored in an entry's control block when its producer
/// fails. Shared by `Arc` across every waiter so that identity comparisons
/// (`Arc::ptr_eq`) hold.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The producer panicked. The message is recovered on a best-effort
    /// basis from the panic payload (`&str` / `String`); anything else is
    /// rendered opaquely.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Arc<Self> {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Arc::new(TaskError::Panicked(message))
    }
}

/// Raised by [`crate::ValueRef::get`] when a producer
/// failed; carries the same [`TaskError`] all other observers of the entry
/// see.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Failed(pub Arc<TaskError>);

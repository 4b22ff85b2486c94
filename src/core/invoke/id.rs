// src/core/invoke/id.rs

//! Invocation id generation.

use crate::core::InvokeId;
use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out invocation ids for requests issued through one invoker.
///
/// Ids start at 1 and wrap on overflow. Uniqueness only matters among the calls
/// in flight on a single connection, which the wrap-around period comfortably
/// exceeds.
#[derive(Debug)]
pub struct InvokeIdGenerator {
    next_id: AtomicU32,
}

impl InvokeIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: InvokeId) -> Self {
        Self {
            next_id: AtomicU32::new(first),
        }
    }

    #[must_use]
    pub fn next(&self) -> InvokeId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the id the next call to `next` will hand out.
    pub fn current(&self) -> InvokeId {
        self.next_id.load(Ordering::Relaxed)
    }
}

impl Default for InvokeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

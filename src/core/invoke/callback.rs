// src/core/invoke/callback.rs

//! Callbacks attached to asynchronous invocations.

use super::InvokeResult;
use crate::core::{Command, RemotingError};

/// Receives the outcome of an invocation issued with a callback.
///
/// Exactly one of the two methods is called, exactly once, on a blocking-pool
/// thread rather than on the connection's read loop.
pub trait InvokeCallback: Send + Sync {
    fn on_response(&self, response: Command);

    fn on_exception(&self, error: RemotingError);
}

/// Adapts a closure over the whole result into an `InvokeCallback`.
pub struct FnCallback<F> {
    f: F,
}

impl<F> FnCallback<F>
where
    F: Fn(InvokeResult) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> InvokeCallback for FnCallback<F>
where
    F: Fn(InvokeResult) + Send + Sync,
{
    fn on_response(&self, response: Command) {
        (self.f)(Ok(response))
    }

    fn on_exception(&self, error: RemotingError) {
        (self.f)(Err(error))
    }
}

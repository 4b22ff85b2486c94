// src/core/invoke/mod.rs

//! Request/response correlation: invoke futures, their callbacks, id
//! generation and the invoker that ties them to a connection.

mod callback;
mod future;
mod id;
mod invoker;

pub use callback::{FnCallback, InvokeCallback};
pub use future::{InvokeFuture, InvokeResult};
pub use id::InvokeIdGenerator;
pub use invoker::RemotingInvoker;

// src/client/mod.rs

//! Outbound connections: addressing and the factory that dials them.

mod factory;
mod url;

pub use factory::ConnectionFactory;
pub use url::ConnectionUrl;

//! The socket listener, the per-connection worker, the TLS wrapper, and the
//! scheduling models that tie them together (spec §4.1, §4.2, §4.7, §5).

pub mod listener;
pub(crate) mod connection;
pub(crate) mod server_impl;
pub(crate) mod tls;

pub use listener::bind;
pub use server_impl::{Scheduling, Server, ServerBuilder};

//! MCP gateway: routes Model Context Protocol clients to local processes,
//! cluster sidecars and remote HTTP servers, pinning each client session to
//! one backend for its lifetime.

pub mod adapter;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod launch;
pub mod mcp;
pub mod proxy;
pub mod server;
pub mod session;
pub mod sidecar;
pub mod testing;

pub use error::{ErrorKind, GatewayError, Result};

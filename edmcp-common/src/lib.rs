//! EDMCP Common Library
//!
//! Configuration, error types, the JSON-RPC envelope, transports and tracing
//! shared by the Easy Diffusion MCP server.

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod server;
pub mod tracing;
pub mod transport;

#[cfg(test)]
mod config_test;
#[cfg(test)]
mod error_test;

pub use config::Config;
pub use error::{ConfigError, Error, Result};
pub use jsonrpc::{JsonRpcRequest, JsonRpcResponse, RequestId};
pub use server::{McpServerBuilder, RpcHandler, ServerError, handle_message, shutdown_channel};
pub use transport::{Transport, TransportArgs, TransportMode};

//! mcp-connect
//!
//! Pluggable MCP client runtime. WebSocket, SSE and Streamable HTTP transports sit
//! behind one plugin registry and one connection lifecycle.

pub mod client;
pub mod config;
pub mod events;
pub mod logging;
pub mod mcp;
pub mod plugins;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{ClientState, Compat, ConnectionRequest, McpClient};
pub use config::ClientConfig;
pub use events::{EventKind, McpEvent, McpEventEmitter};
pub use mcp::{McpError, McpResult};
pub use plugins::{Plugin, PluginRegistry};
pub use transport::TransportType;

//! MCP Client
//!
//! Lifecycle state machine over the plugin registry, its health monitor and the
//! legacy free-function façade.

pub mod compat;
pub mod health;
pub mod mcp_client;
pub mod state;

pub use compat::{detect_transport_type, normalize_tools_from_primitives, Compat, NormalizedTool};
pub use health::{ConnectionHealth, HealthStatus};
pub use mcp_client::{ConnectionRequest, McpClient};
pub use state::ClientState;

//! MCP (Model Context Protocol) Module
//!
//! Protocol layer shared by every transport:
//! - JSON-RPC and MCP wire types
//! - Error taxonomy
//! - Protocol session (handshake, listing, tool calls)

pub mod error;
pub mod session;
pub mod types;

pub use error::{McpError, McpResult};
pub use session::McpSession;
pub use types::*;

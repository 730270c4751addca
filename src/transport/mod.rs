//! MCP Transport Abstraction
//!
//! Provides a unified interface for the wire protocols a plugin can create:
//! - WebSocket (persistent duplex socket)
//! - SSE (server-push stream + POST back-channel)
//! - Streamable HTTP (request/response with optional streamed replies)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use crate::mcp::error::{McpError, McpResult};

pub mod sse;
pub mod sse_codec;
pub mod streamable_http;
pub mod websocket;

pub use sse::SseTransport;
pub use streamable_http::StreamableHttpTransport;
pub use websocket::{ReadyState, WebSocketTransport};

/// Wire protocol discriminant used to select a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportType {
    #[serde(rename = "sse")]
    Sse,
    #[serde(rename = "websocket")]
    WebSocket,
    #[serde(rename = "streamable-http")]
    StreamableHttp,
}

impl TransportType {
    pub const ALL: [TransportType; 3] = [
        TransportType::Sse,
        TransportType::WebSocket,
        TransportType::StreamableHttp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::WebSocket => "websocket",
            Self::StreamableHttp => "streamable-http",
        }
    }

    /// Human readable name used in diagnostics
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sse => "SSE",
            Self::WebSocket => "WebSocket",
            Self::StreamableHttp => "Streamable HTTP",
        }
    }

    /// URI schemes this transport can dial
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Self::WebSocket => &["ws", "wss"],
            Self::Sse | Self::StreamableHttp => &["http", "https"],
        }
    }
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportType {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sse" => Ok(Self::Sse),
            "websocket" | "ws" => Ok(Self::WebSocket),
            "streamable-http" | "streamable_http" | "http" => Ok(Self::StreamableHttp),
            other => Err(McpError::InvalidConfig(format!(
                "Unknown transport type: {}",
                other
            ))),
        }
    }
}

/// Parse `uri` and check its scheme against the transport's accepted schemes
pub fn parse_uri(uri: &str, transport_type: TransportType) -> McpResult<Url> {
    let url = Url::parse(uri).map_err(|e| McpError::invalid_uri(uri, e.to_string()))?;
    if !transport_type.schemes().contains(&url.scheme()) {
        return Err(McpError::invalid_uri(
            uri,
            format!(
                "scheme '{}' is not supported by the {} transport (expected {})",
                url.scheme(),
                transport_type.display_name(),
                transport_type.schemes().join(" or ")
            ),
        ));
    }
    Ok(url)
}

/// Whether `uri` parses and has a scheme the transport accepts
pub fn supports_uri(uri: &str, transport_type: TransportType) -> bool {
    parse_uri(uri, transport_type).is_ok()
}

/// A protocol-specific duplex carrier of JSON-RPC messages.
///
/// Inbound messages are delivered through a channel that can be taken once;
/// the protocol session owns it for the lifetime of the transport.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    fn transport_type(&self) -> TransportType;

    /// Endpoint this transport was created for
    fn uri(&self) -> &str;

    /// Open the underlying stream. No-op if already open.
    async fn start(&self) -> McpResult<()>;

    /// Send one JSON message
    async fn send(&self, message: serde_json::Value) -> McpResult<()>;

    /// Close the underlying stream. Safe to call repeatedly.
    async fn close(&self) -> McpResult<()>;

    /// Local view of the connection; no network probe
    fn is_open(&self) -> bool;

    /// Take the inbound message receiver (first caller only)
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<serde_json::Value>>;
}

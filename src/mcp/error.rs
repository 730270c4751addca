//! MCP Error Types
//!
//! Error taxonomy shared by transports, plugins, the registry and the client.

use thiserror::Error;

use crate::transport::TransportType;

/// MCP-specific errors
#[derive(Error, Debug, Clone)]
pub enum McpError {
    // Addressing errors
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    // Registry errors
    #[error("No plugin registered for transport type: {0}")]
    PluginNotFound(TransportType),

    #[error("Plugin for {0} has not been initialized")]
    PluginNotInitialized(TransportType),

    #[error("Plugin registry error: {0}")]
    Registry(String),

    // Transport errors
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    #[error("A connection attempt is already in progress for {0}")]
    ConnectionInProgress(TransportType),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    TransportError(String),

    // Protocol errors
    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error {code}: {message}")]
    JsonRpcError { code: i32, message: String },

    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    RequestTimeout { method: String, timeout_ms: u64 },

    #[error("Listing {category} failed: {message}")]
    PartialListFailure { category: String, message: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        McpError::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error happened while establishing a connection
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            McpError::ConnectionFailed(_)
                | McpError::ConnectionTimeout(_)
                | McpError::TransportError(_)
                | McpError::RequestTimeout { .. }
        )
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            McpError::TransportError(format!("request timeout: {}", err))
        } else if err.is_connect() {
            McpError::ConnectionFailed(format!("Failed to fetch: {}", err))
        } else {
            McpError::TransportError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::ParseError(err.to_string())
    }
}

impl From<url::ParseError> for McpError {
    fn from(err: url::ParseError) -> Self {
        McpError::InvalidConfig(format!("Invalid URL: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for McpError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => McpError::NotConnected,
            WsError::Io(e) => McpError::ConnectionFailed(e.to_string()),
            WsError::Protocol(e) => McpError::ConnectionFailed(format!("protocol error: {}", e)),
            WsError::Http(response) => {
                McpError::ConnectionFailed(format!("HTTP {} during handshake", response.status()))
            }
            other => McpError::TransportError(other.to_string()),
        }
    }
}

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

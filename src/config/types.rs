//! Configuration Types
//!
//! One sub-config per transport plus global client settings. Every field has a
//! default so partial files deserialize cleanly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::mcp::error::{McpError, McpResult};
use crate::transport::TransportType;

pub const DEFAULT_WEBSOCKET_URI: &str = "ws://localhost:3006/message";
pub const DEFAULT_SSE_URI: &str = "http://localhost:3006/sse";
pub const DEFAULT_STREAMABLE_HTTP_URI: &str = "http://localhost:3006";

/// Settings that apply regardless of the active transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Per-request timeout (handshake included)
    pub timeout_ms: u64,
    /// Reconnect attempts made by `McpClient::reconnect`
    pub max_retries: u32,
    /// Background health check period; 0 disables the monitor
    pub health_check_interval_ms: u64,
    /// Pause between reconnect attempts
    pub reconnect_delay_ms: u64,
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            health_check_interval_ms: 60_000,
            reconnect_delay_ms: 2_000,
            log_level: "info".to_string(),
        }
    }
}

impl GlobalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_ms > 0).then(|| Duration::from_millis(self.health_check_interval_ms))
    }
}

/// How binary frames are surfaced; both decode as UTF-8 JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BinaryType {
    #[default]
    ArrayBuffer,
    Blob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub uri: String,
    /// Sub-protocols offered in the handshake
    pub protocols: Vec<String>,
    /// Reserved: liveness is left to the protocol layer
    pub ping_interval_ms: u64,
    /// Reserved: liveness is left to the protocol layer
    pub pong_timeout_ms: u64,
    pub binary_type: BinaryType,
    /// Reserved: automatic reconnection is not driven by the transport
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_WEBSOCKET_URI.to_string(),
            protocols: vec!["mcp-v1".to_string()],
            ping_interval_ms: 30_000,
            pong_timeout_ms: 5_000,
            binary_type: BinaryType::ArrayBuffer,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 10_000,
        }
    }
}

impl WebSocketConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SseConfig {
    pub uri: String,
    pub keep_alive: bool,
    /// TCP connect timeout, also bounds the wait for the `endpoint` event
    pub connection_timeout_ms: u64,
    /// Timeout of each outbound POST
    pub read_timeout_ms: u64,
    pub headers: HashMap<String, String>,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_SSE_URI.to_string(),
            keep_alive: true,
            connection_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamableHttpConfig {
    pub uri: String,
    pub keep_alive: bool,
    pub connection_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Retry the connection over SSE when Streamable HTTP fails
    pub fallback_to_sse: bool,
    /// Retries of a single POST that failed to connect
    pub max_retries: u32,
    pub headers: HashMap<String, String>,
}

impl Default for StreamableHttpConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_STREAMABLE_HTTP_URI.to_string(),
            keep_alive: true,
            connection_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            fallback_to_sse: true,
            max_retries: 2,
            headers: HashMap::new(),
        }
    }
}

/// Configuration handed to a plugin on initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PluginConfig {
    Sse(SseConfig),
    #[serde(rename = "websocket")]
    WebSocket(WebSocketConfig),
    StreamableHttp(StreamableHttpConfig),
}

impl PluginConfig {
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::Sse(_) => TransportType::Sse,
            Self::WebSocket(_) => TransportType::WebSocket,
            Self::StreamableHttp(_) => TransportType::StreamableHttp,
        }
    }

    pub fn default_for(transport_type: TransportType) -> Self {
        match transport_type {
            TransportType::Sse => Self::Sse(SseConfig::default()),
            TransportType::WebSocket => Self::WebSocket(WebSocketConfig::default()),
            TransportType::StreamableHttp => Self::StreamableHttp(StreamableHttpConfig::default()),
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub global: GlobalConfig,
    pub sse: SseConfig,
    pub websocket: WebSocketConfig,
    pub streamable_http: StreamableHttpConfig,
}

impl ClientConfig {
    /// Sub-config for one transport
    pub fn plugin_config(&self, transport_type: TransportType) -> PluginConfig {
        match transport_type {
            TransportType::Sse => PluginConfig::Sse(self.sse.clone()),
            TransportType::WebSocket => PluginConfig::WebSocket(self.websocket.clone()),
            TransportType::StreamableHttp => PluginConfig::StreamableHttp(self.streamable_http.clone()),
        }
    }

    /// Configured endpoint for one transport
    pub fn default_uri(&self, transport_type: TransportType) -> &str {
        match transport_type {
            TransportType::Sse => &self.sse.uri,
            TransportType::WebSocket => &self.websocket.uri,
            TransportType::StreamableHttp => &self.streamable_http.uri,
        }
    }

    pub fn validate(&self) -> McpResult<()> {
        if self.global.timeout_ms == 0 {
            return Err(McpError::InvalidConfig("global.timeout_ms must be greater than 0".to_string()));
        }
        if self.websocket.protocols.is_empty() {
            return Err(McpError::InvalidConfig("websocket.protocols must not be empty".to_string()));
        }
        if self.websocket.connect_timeout_ms == 0 {
            return Err(McpError::InvalidConfig(
                "websocket.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.global.timeout_ms, 30_000);
        assert_eq!(config.global.max_retries, 3);
        assert_eq!(config.global.health_check_interval_ms, 60_000);
        assert_eq!(config.global.reconnect_delay_ms, 2_000);
        assert_eq!(config.websocket.protocols, vec!["mcp-v1".to_string()]);
        assert_eq!(config.websocket.binary_type, BinaryType::ArrayBuffer);
        assert_eq!(config.websocket.uri, "ws://localhost:3006/message");
        assert_eq!(config.sse.uri, "http://localhost:3006/sse");
        assert_eq!(config.streamable_http.uri, "http://localhost:3006");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_plugin_config_tagging() {
        let config = PluginConfig::default_for(TransportType::StreamableHttp);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "streamable-http");
        assert_eq!(config.transport_type(), TransportType::StreamableHttp);

        let ws: PluginConfig =
            serde_json::from_value(serde_json::json!({"type": "websocket", "binary_type": "blob"})).unwrap();
        match ws {
            PluginConfig::WebSocket(c) => {
                assert_eq!(c.binary_type, BinaryType::Blob);
                assert_eq!(c.protocols, vec!["mcp-v1".to_string()]);
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_empty_protocols() {
        let mut config = ClientConfig::default();
        config.websocket.protocols.clear();
        assert!(matches!(config.validate(), Err(McpError::InvalidConfig(_))));
    }

    #[test]
    fn test_health_interval_zero_disables_monitor() {
        let global = GlobalConfig {
            health_check_interval_ms: 0,
            ..Default::default()
        };
        assert!(global.health_check_interval().is_none());
    }
}

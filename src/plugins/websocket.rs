//! WebSocket plugin
//!
//! The socket is opened during `connect`, so handshake failures surface there.

use async_trait::async_trait;
use std::sync::Arc;

use super::{PluginCore, PluginMetadata, TransportPlugin};
use crate::config::{PluginConfig, WebSocketConfig};
use crate::events::McpEventEmitter;
use crate::mcp::{McpError, McpResult};
use crate::transport::{self, Transport, TransportType, WebSocketTransport};

#[derive(Debug)]
pub struct WebSocketPlugin {
    core: PluginCore,
}

impl WebSocketPlugin {
    pub fn new(events: Arc<McpEventEmitter>) -> Self {
        let metadata = PluginMetadata::new("websocket", TransportType::WebSocket)
            .with_description("MCP over a persistent WebSocket connection");
        Self {
            core: PluginCore::new(metadata, events),
        }
    }

    fn config(&self) -> McpResult<WebSocketConfig> {
        match self.core.config()? {
            PluginConfig::WebSocket(config) => Ok(config),
            other => Err(McpError::InvalidConfig(format!(
                "websocket plugin holds a {} configuration",
                other.transport_type()
            ))),
        }
    }
}

#[async_trait]
impl TransportPlugin for WebSocketPlugin {
    fn core(&self) -> &PluginCore {
        &self.core
    }

    async fn connect(&self, uri: &str) -> McpResult<Arc<dyn Transport>> {
        transport::parse_uri(uri, TransportType::WebSocket)?;
        let config = self.config()?;
        let events = self.core.events();

        self.core
            .connect_with(uri, async move {
                let socket = Arc::new(WebSocketTransport::new(uri, config, events));
                socket.connect().await?;
                Ok(socket as Arc<dyn Transport>)
            })
            .await
    }

    /// Healthy only while the socket reports `Open`
    async fn is_healthy(&self) -> bool {
        self.core.transport().map_or(false, |t| t.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_ws_mcp_server, unused_addr, ws_config, MockServer};
    use crate::transport::ReadyState;

    fn plugin() -> WebSocketPlugin {
        let plugin = WebSocketPlugin::new(Arc::new(McpEventEmitter::new()));
        plugin.initialize(PluginConfig::WebSocket(ws_config())).unwrap();
        plugin
    }

    #[tokio::test]
    async fn test_connect_opens_socket() {
        let uri = spawn_ws_mcp_server(MockServer::default()).await;
        let plugin = plugin();

        let transport = plugin.connect(&uri).await.unwrap();
        assert!(plugin.is_connected());
        assert!(plugin.is_healthy().await);
        assert_eq!(transport.uri(), uri);

        plugin.disconnect().await;
        assert!(!plugin.is_connected());
        assert!(!plugin.is_healthy().await);
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_refused_connection_is_enriched() {
        let addr = unused_addr().await;
        let plugin = plugin();
        let err = plugin
            .connect(&format!("ws://{}/message", addr))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ConnectionFailed(_)));
        assert!(err.to_string().contains("Cannot reach the WebSocket server"));
        assert!(!plugin.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_socket() {
        let uri = spawn_ws_mcp_server(MockServer::default()).await;
        let plugin = plugin();

        let first = plugin.connect(&uri).await.unwrap();
        let second = plugin.connect(&uri).await.unwrap();
        assert!(!first.is_open());
        assert!(second.is_open());
        plugin.disconnect().await;
    }

    #[test]
    fn test_ready_state_default_is_closed() {
        let socket = WebSocketTransport::new(
            "ws://localhost:3006/message",
            WebSocketConfig::default(),
            Arc::new(McpEventEmitter::new()),
        );
        assert_eq!(socket.ready_state(), ReadyState::Closed);
    }
}

//! Legacy free-function API
//!
//! Adapters over [`McpClient`] for callers written against the old one-call-per-
//! operation surface. Every call connects on demand, runs the operation and
//! converts the grouped primitives back into the flat `{type, value}` list.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use url::Url;

use super::mcp_client::{ConnectionRequest, McpClient};
use crate::config::ClientConfig;
use crate::mcp::{McpResult, Primitive, ToolArguments, ToolCallResult};
use crate::transport::TransportType;

/// Tool flattened for model-facing tool lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// `input_schema` as compact JSON text
    pub schema: String,
}

/// `ws:`/`wss:` select WebSocket, everything else (including unparsable input) SSE
pub fn detect_transport_type(uri: &str) -> TransportType {
    match Url::parse(uri) {
        Ok(url) if matches!(url.scheme(), "ws" | "wss") => TransportType::WebSocket,
        Ok(_) => TransportType::Sse,
        Err(e) => {
            debug!("Cannot parse {:?} ({}); assuming SSE", uri, e);
            TransportType::Sse
        }
    }
}

/// Extract the tools from a flat primitive list
pub fn normalize_tools_from_primitives(primitives: &[Primitive]) -> Vec<NormalizedTool> {
    primitives
        .iter()
        .filter_map(|primitive| match primitive {
            Primitive::Tool(tool) => Some(NormalizedTool {
                name: tool.name.clone(),
                description: tool.description.clone().unwrap_or_default(),
                schema: tool.input_schema.to_string(),
                input_schema: tool.input_schema.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Lazily constructed client behind the legacy API
pub struct Compat {
    config: ClientConfig,
    client: OnceLock<Arc<McpClient>>,
}

impl Compat {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    /// Use an existing client instead of building one
    pub fn with_client(client: Arc<McpClient>) -> Self {
        let config = client.config().clone();
        let cell = OnceLock::new();
        let _ = cell.set(client);
        Self { config, client: cell }
    }

    pub fn client(&self) -> &Arc<McpClient> {
        self.client
            .get_or_init(|| Arc::new(McpClient::from_config(self.config.clone())))
    }

    async fn ensure_connected(
        &self,
        uri: &str,
        transport_type: Option<TransportType>,
    ) -> McpResult<&Arc<McpClient>> {
        let transport_type = transport_type.unwrap_or_else(|| detect_transport_type(uri));
        let client = self.client();
        client
            .connect(ConnectionRequest::new(uri, transport_type))
            .await?;
        Ok(client)
    }

    pub async fn call_tool_with_backwards_compatibility(
        &self,
        uri: &str,
        name: &str,
        arguments: ToolArguments,
        transport_type: Option<TransportType>,
    ) -> McpResult<ToolCallResult> {
        self.ensure_connected(uri, transport_type)
            .await?
            .call_tool(name, arguments)
            .await
    }

    pub async fn call_tool_with_sse(
        &self,
        uri: &str,
        name: &str,
        arguments: ToolArguments,
    ) -> McpResult<ToolCallResult> {
        self.call_tool_with_backwards_compatibility(uri, name, arguments, Some(TransportType::Sse))
            .await
    }

    pub async fn call_tool_with_websocket(
        &self,
        uri: &str,
        name: &str,
        arguments: ToolArguments,
    ) -> McpResult<ToolCallResult> {
        self.call_tool_with_backwards_compatibility(
            uri,
            name,
            arguments,
            Some(TransportType::WebSocket),
        )
        .await
    }

    pub async fn call_tool_with_streamable_http(
        &self,
        uri: &str,
        name: &str,
        arguments: ToolArguments,
    ) -> McpResult<ToolCallResult> {
        self.call_tool_with_backwards_compatibility(
            uri,
            name,
            arguments,
            Some(TransportType::StreamableHttp),
        )
        .await
    }

    /// Flat primitive list; empty when the server cannot be reached
    pub async fn get_primitives_with_backwards_compatibility(
        &self,
        uri: &str,
        transport_type: Option<TransportType>,
    ) -> Vec<Primitive> {
        let primitives = match self.ensure_connected(uri, transport_type).await {
            Ok(client) => client.get_primitives().await,
            Err(e) => Err(e),
        };
        match primitives {
            Ok(primitives) => primitives.into_flat(),
            Err(e) => {
                warn!("Failed to list primitives from {}: {}", uri, e);
                Vec::new()
            }
        }
    }

    pub async fn get_primitives_with_sse(&self, uri: &str) -> Vec<Primitive> {
        self.get_primitives_with_backwards_compatibility(uri, Some(TransportType::Sse))
            .await
    }

    pub async fn get_primitives_with_websocket(&self, uri: &str) -> Vec<Primitive> {
        self.get_primitives_with_backwards_compatibility(uri, Some(TransportType::WebSocket))
            .await
    }

    pub async fn get_primitives_with_streamable_http(&self, uri: &str) -> Vec<Primitive> {
        self.get_primitives_with_backwards_compatibility(uri, Some(TransportType::StreamableHttp))
            .await
    }

    /// Drop the current connection and connect again
    pub async fn force_reconnect_to_mcp_server(
        &self,
        uri: &str,
        transport_type: Option<TransportType>,
    ) -> McpResult<()> {
        self.client().disconnect().await;
        self.ensure_connected(uri, transport_type).await.map(|_| ())
    }

    /// With a uri, connect to it first. False on any failure.
    pub async fn check_mcp_server_connection(&self, uri: Option<&str>) -> bool {
        if let Some(uri) = uri {
            if let Err(e) = self.ensure_connected(uri, None).await {
                warn!("Connection check for {} failed: {}", uri, e);
                return false;
            }
        }
        self.client().is_healthy().await
    }

    pub fn is_mcp_server_connected(&self) -> bool {
        self.client.get().map_or(false, |client| client.is_connected())
    }

    pub async fn reset_mcp_connection_state(&self) {
        if let Some(client) = self.client.get() {
            client.disconnect().await;
        }
    }

    pub fn abort_mcp_connection(&self) {
        if let Some(client) = self.client.get() {
            client.abort_connect();
        }
    }
}

impl std::fmt::Debug for Compat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compat")
            .field("client", &self.client.get())
            .finish()
    }
}

/// Process-wide instance with default configuration
pub fn global() -> &'static Compat {
    static GLOBAL: OnceLock<Compat> = OnceLock::new();
    GLOBAL.get_or_init(|| Compat::new(ClientConfig::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::Tool;
    use crate::test_support::{spawn_sse_server, spawn_ws_mcp_server, unused_addr, ws_config, MockServer};
    use serde_json::json;

    fn compat() -> Compat {
        let mut config = ClientConfig::default();
        config.global.timeout_ms = 5_000;
        config.global.reconnect_delay_ms = 10;
        config.websocket = ws_config();
        Compat::new(config)
    }

    fn text_args(text: &str) -> ToolArguments {
        let mut args = ToolArguments::new();
        args.insert("text".to_string(), json!(text));
        args
    }

    #[test]
    fn test_detect_transport_type() {
        assert_eq!(detect_transport_type("wss://h/p"), TransportType::WebSocket);
        assert_eq!(detect_transport_type("ws://localhost:3006/message"), TransportType::WebSocket);
        assert_eq!(detect_transport_type("https://h/sse"), TransportType::Sse);
        assert_eq!(detect_transport_type("not a uri"), TransportType::Sse);
        assert_eq!(detect_transport_type(""), TransportType::Sse);
    }

    #[test]
    fn test_normalize_tools() {
        let primitives = vec![
            Primitive::Tool(Tool::new("x", json!({"a": 1}))),
            Primitive::Prompt(crate::mcp::Prompt {
                name: "p".to_string(),
                description: None,
                arguments: None,
            }),
        ];

        let tools = normalize_tools_from_primitives(&primitives);
        assert_eq!(
            tools,
            vec![NormalizedTool {
                name: "x".to_string(),
                description: String::new(),
                input_schema: json!({"a": 1}),
                schema: r#"{"a":1}"#.to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_idle_facade_reports_disconnected() {
        let compat = compat();
        assert!(!compat.is_mcp_server_connected());
        assert!(!compat.check_mcp_server_connection(None).await);
        compat.reset_mcp_connection_state().await;
        compat.abort_mcp_connection();
    }

    #[tokio::test]
    async fn test_websocket_detected_from_scheme() {
        let uri = spawn_ws_mcp_server(MockServer::default()).await;
        let compat = compat();

        let result = compat
            .call_tool_with_backwards_compatibility(&uri, "echo", text_args("legacy"), None)
            .await
            .unwrap();
        assert_eq!(result.text(), "legacy");
        assert_eq!(
            compat.client().active_transport_type(),
            Some(TransportType::WebSocket)
        );

        let flat = compat.get_primitives_with_websocket(&uri).await;
        assert_eq!(flat.len(), 4);
        assert_eq!(normalize_tools_from_primitives(&flat).len(), 2);
        assert!(compat.is_mcp_server_connected());
    }

    #[tokio::test]
    async fn test_sse_calls_and_reset() {
        let uri = spawn_sse_server(MockServer::default()).await;
        let compat = compat();

        let result = compat
            .call_tool_with_sse(&uri, "echo", text_args("via sse"))
            .await
            .unwrap();
        assert_eq!(result.text(), "via sse");
        assert!(compat.check_mcp_server_connection(Some(&uri)).await);

        compat.force_reconnect_to_mcp_server(&uri, None).await.unwrap();
        assert!(compat.is_mcp_server_connected());

        compat.reset_mcp_connection_state().await;
        assert!(!compat.is_mcp_server_connected());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_best_effort() {
        let addr = unused_addr().await;
        let uri = format!("http://{}/sse", addr);
        let compat = compat();

        assert!(compat.get_primitives_with_sse(&uri).await.is_empty());
        assert!(!compat.check_mcp_server_connection(Some(&uri)).await);
        assert!(compat
            .call_tool_with_sse(&uri, "echo", ToolArguments::new())
            .await
            .is_err());
    }

    #[test]
    fn test_with_client_reuses_instance() {
        let client = Arc::new(McpClient::with_defaults());
        let compat = Compat::with_client(client.clone());
        assert!(Arc::ptr_eq(compat.client(), &client));
        assert!(std::ptr::eq(global(), global()));
    }
}

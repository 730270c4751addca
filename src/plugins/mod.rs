//! Transport Plugins
//!
//! One plugin per wire protocol. A plugin owns at most one live transport, turns
//! connection failures into actionable errors and runs the data-plane calls over
//! a protocol session.

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::PluginConfig;
use crate::events::{McpEvent, McpEventEmitter};
use crate::mcp::{McpError, McpResult, McpSession, Primitive, ToolArguments, ToolCallResult};
use crate::transport::{self, Transport, TransportType};

pub mod diagnostics;
pub mod primitives;
pub mod registry;
pub mod sse;
pub mod streamable_http;
pub mod websocket;

pub use registry::{PluginInfo, PluginRegistry, RegistryStats};
pub use sse::SsePlugin;
pub use streamable_http::StreamableHttpPlugin;
pub use websocket::WebSocketPlugin;

/// Static description of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub transport_type: TransportType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, transport_type: TransportType) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            transport_type,
            description: None,
            author: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Resets the in-flight flag when a connect attempt ends
struct ConnectGuard<'a>(&'a AtomicBool);

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// State every plugin carries: configuration, the single live transport and
/// the in-flight connect flag
pub struct PluginCore {
    metadata: PluginMetadata,
    config: RwLock<Option<PluginConfig>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    connecting: AtomicBool,
    events: Arc<McpEventEmitter>,
}

impl PluginCore {
    pub fn new(metadata: PluginMetadata, events: Arc<McpEventEmitter>) -> Self {
        Self {
            metadata,
            config: RwLock::new(None),
            transport: Mutex::new(None),
            connecting: AtomicBool::new(false),
            events,
        }
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn events(&self) -> Arc<McpEventEmitter> {
        self.events.clone()
    }

    fn transport_type(&self) -> TransportType {
        self.metadata.transport_type
    }

    /// Store the configuration; re-initializing replaces it
    pub fn initialize(&self, config: PluginConfig) -> McpResult<()> {
        if config.transport_type() != self.transport_type() {
            return Err(McpError::InvalidConfig(format!(
                "{} plugin cannot use a {} configuration",
                self.transport_type(),
                config.transport_type()
            )));
        }
        debug!("Initializing {} plugin", self.metadata.name);
        *self.config.write() = Some(config);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.config.read().is_some()
    }

    pub fn config(&self) -> McpResult<PluginConfig> {
        self.config
            .read()
            .clone()
            .ok_or(McpError::PluginNotInitialized(self.transport_type()))
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.lock().is_some()
    }

    pub fn is_healthy(&self) -> bool {
        self.transport().map_or(false, |t| t.is_open())
    }

    /// Run `open` as the plugin's single connect attempt. A previous transport is
    /// closed first; failures are enriched with transport-specific hints.
    pub async fn connect_with<F>(&self, uri: &str, open: F) -> McpResult<Arc<dyn Transport>>
    where
        F: Future<Output = McpResult<Arc<dyn Transport>>> + Send,
    {
        if self.connecting.swap(true, Ordering::SeqCst) {
            return Err(McpError::ConnectionInProgress(self.transport_type()));
        }
        let _guard = ConnectGuard(&self.connecting);

        self.release().await;

        info!("{} plugin connecting to {}", self.metadata.name, uri);
        match open.await {
            Ok(transport) => {
                *self.transport.lock() = Some(transport.clone());
                self.events.emit(&McpEvent::PluginConnected {
                    transport_type: self.transport_type(),
                    uri: uri.to_string(),
                });
                Ok(transport)
            }
            Err(e) => {
                let err = diagnostics::enrich_error(self.transport_type(), uri, e);
                warn!("{} plugin failed to connect to {}: {}", self.metadata.name, uri, err);
                self.events.emit(&McpEvent::PluginError {
                    transport_type: self.transport_type(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Close and forget the live transport. Close errors are logged, never returned.
    pub async fn release(&self) {
        let transport = self.transport.lock().take();
        let Some(transport) = transport else {
            return;
        };
        if let Err(e) = transport.close().await {
            warn!("Error closing {} transport: {}", self.transport_type(), e);
        }
        info!("{} plugin disconnected", self.metadata.name);
        self.events.emit(&McpEvent::PluginDisconnected {
            transport_type: self.transport_type(),
        });
    }
}

impl std::fmt::Debug for PluginCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCore")
            .field("metadata", &self.metadata)
            .field("initialized", &self.is_initialized())
            .field("connected", &self.is_connected())
            .field("connecting", &self.connecting)
            .finish()
    }
}

/// Contract every transport plugin fulfils
#[async_trait]
pub trait TransportPlugin: Send + Sync {
    fn core(&self) -> &PluginCore;

    /// Create the transport for `uri` and, where the protocol needs it, open it
    async fn connect(&self, uri: &str) -> McpResult<Arc<dyn Transport>>;

    fn metadata(&self) -> &PluginMetadata {
        self.core().metadata()
    }

    /// Idempotent; no network I/O
    fn initialize(&self, config: PluginConfig) -> McpResult<()> {
        self.core().initialize(config)
    }

    fn is_initialized(&self) -> bool {
        self.core().is_initialized()
    }

    fn default_config(&self) -> PluginConfig {
        PluginConfig::default_for(self.metadata().transport_type)
    }

    /// Pure scheme check
    fn is_supported(&self, uri: &str) -> bool {
        transport::supports_uri(uri, self.metadata().transport_type)
    }

    async fn disconnect(&self) {
        self.core().release().await
    }

    fn is_connected(&self) -> bool {
        self.core().is_connected()
    }

    async fn is_healthy(&self) -> bool {
        self.core().is_healthy()
    }

    async fn call_tool(
        &self,
        session: &McpSession,
        name: &str,
        arguments: ToolArguments,
    ) -> McpResult<ToolCallResult> {
        primitives::call_tool(session, name, arguments).await
    }

    async fn get_primitives(&self, session: &McpSession) -> McpResult<Vec<Primitive>> {
        primitives::aggregate_primitives(session).await
    }

    fn enrich_error(&self, uri: &str, error: McpError) -> McpError {
        diagnostics::enrich_error(self.metadata().transport_type, uri, error)
    }
}

/// The closed set of built-in plugins
#[derive(Debug)]
pub enum Plugin {
    Sse(SsePlugin),
    WebSocket(WebSocketPlugin),
    StreamableHttp(StreamableHttpPlugin),
}

macro_rules! dispatch {
    ($plugin:expr, $p:ident => $body:expr) => {
        match $plugin {
            Plugin::Sse($p) => $body,
            Plugin::WebSocket($p) => $body,
            Plugin::StreamableHttp($p) => $body,
        }
    };
}

impl Plugin {
    /// Built-in plugin for `transport_type`
    pub fn builtin(transport_type: TransportType, events: Arc<McpEventEmitter>) -> Self {
        match transport_type {
            TransportType::Sse => Plugin::Sse(SsePlugin::new(events)),
            TransportType::WebSocket => Plugin::WebSocket(WebSocketPlugin::new(events)),
            TransportType::StreamableHttp => Plugin::StreamableHttp(StreamableHttpPlugin::new(events)),
        }
    }

    /// Transport the variant implements, independent of its metadata
    pub fn variant_type(&self) -> TransportType {
        match self {
            Plugin::Sse(_) => TransportType::Sse,
            Plugin::WebSocket(_) => TransportType::WebSocket,
            Plugin::StreamableHttp(_) => TransportType::StreamableHttp,
        }
    }

    pub fn metadata(&self) -> &PluginMetadata {
        dispatch!(self, p => p.metadata())
    }

    pub fn transport_type(&self) -> TransportType {
        self.metadata().transport_type
    }

    pub fn initialize(&self, config: PluginConfig) -> McpResult<()> {
        dispatch!(self, p => p.initialize(config))
    }

    pub fn is_initialized(&self) -> bool {
        dispatch!(self, p => p.is_initialized())
    }

    pub fn default_config(&self) -> PluginConfig {
        dispatch!(self, p => p.default_config())
    }

    pub fn is_supported(&self, uri: &str) -> bool {
        dispatch!(self, p => p.is_supported(uri))
    }

    pub async fn connect(&self, uri: &str) -> McpResult<Arc<dyn Transport>> {
        dispatch!(self, p => p.connect(uri).await)
    }

    pub async fn disconnect(&self) {
        dispatch!(self, p => p.disconnect().await)
    }

    pub fn is_connected(&self) -> bool {
        dispatch!(self, p => p.is_connected())
    }

    pub async fn is_healthy(&self) -> bool {
        dispatch!(self, p => p.is_healthy().await)
    }

    pub async fn call_tool(
        &self,
        session: &McpSession,
        name: &str,
        arguments: ToolArguments,
    ) -> McpResult<ToolCallResult> {
        dispatch!(self, p => p.call_tool(session, name, arguments).await)
    }

    pub async fn get_primitives(&self, session: &McpSession) -> McpResult<Vec<Primitive>> {
        dispatch!(self, p => p.get_primitives(session).await)
    }

    pub fn enrich_error(&self, uri: &str, error: McpError) -> McpError {
        dispatch!(self, p => p.enrich_error(uri, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SseConfig, WebSocketConfig};

    fn events() -> Arc<McpEventEmitter> {
        Arc::new(McpEventEmitter::new())
    }

    #[test]
    fn test_builtin_variants_match_metadata() {
        for t in TransportType::ALL {
            let plugin = Plugin::builtin(t, events());
            assert_eq!(plugin.variant_type(), t);
            assert_eq!(plugin.transport_type(), t);
            assert_eq!(plugin.default_config().transport_type(), t);
            assert!(!plugin.is_initialized());
            assert!(!plugin.is_connected());
        }
    }

    #[test]
    fn test_initialize_rejects_foreign_config() {
        let plugin = Plugin::builtin(TransportType::WebSocket, events());
        let err = plugin.initialize(PluginConfig::Sse(SseConfig::default())).unwrap_err();
        assert!(matches!(err, McpError::InvalidConfig(_)));
        assert!(!plugin.is_initialized());

        plugin
            .initialize(PluginConfig::WebSocket(WebSocketConfig::default()))
            .unwrap();
        plugin
            .initialize(PluginConfig::WebSocket(WebSocketConfig::default()))
            .unwrap();
        assert!(plugin.is_initialized());
    }

    #[test]
    fn test_is_supported_is_a_scheme_check() {
        let ws = Plugin::builtin(TransportType::WebSocket, events());
        assert!(ws.is_supported("ws://localhost:3006/message"));
        assert!(ws.is_supported("wss://example.com/mcp"));
        assert!(!ws.is_supported("http://localhost:3006"));

        let sse = Plugin::builtin(TransportType::Sse, events());
        assert!(sse.is_supported("https://example.com/sse"));
        assert!(!sse.is_supported("ws://localhost:3006/message"));
        assert!(!sse.is_supported("::not a uri::"));
    }

    #[tokio::test]
    async fn test_connect_requires_initialization_and_valid_uri() {
        let plugin = Plugin::builtin(TransportType::StreamableHttp, events());
        let err = plugin.connect("http://localhost:3006").await.unwrap_err();
        assert!(matches!(err, McpError::PluginNotInitialized(TransportType::StreamableHttp)));

        plugin.initialize(plugin.default_config()).unwrap();
        let err = plugin.connect("ws://localhost:3006").await.unwrap_err();
        assert!(matches!(err, McpError::InvalidUri { .. }));
        assert!(!plugin.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let plugin = Plugin::builtin(TransportType::Sse, events());
        plugin.initialize(plugin.default_config()).unwrap();
        plugin.connect("http://localhost:3006/sse").await.unwrap();
        assert!(plugin.is_connected());
        assert!(!plugin.is_healthy().await);

        plugin.disconnect().await;
        plugin.disconnect().await;
        assert!(!plugin.is_connected());
    }

    #[tokio::test]
    async fn test_concurrent_connect_is_rejected() {
        let events = events();
        let core = PluginCore::new(PluginMetadata::new("test", TransportType::Sse), events);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = core.connect_with("http://h/sse", async move {
            let _ = release_rx.await;
            Err(McpError::ConnectionFailed("gave up".to_string()))
        });
        let fast = async {
            tokio::task::yield_now().await;
            let err = core
                .connect_with("http://h/sse", async { Err(McpError::NotConnected) })
                .await
                .unwrap_err();
            let _ = release_tx.send(());
            err
        };

        let (slow, fast) = tokio::join!(slow, fast);
        assert!(matches!(fast, McpError::ConnectionInProgress(TransportType::Sse)));
        assert!(slow.is_err());
        assert!(!core.connecting.load(Ordering::SeqCst));
    }
}

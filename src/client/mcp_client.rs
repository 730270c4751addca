//! MCP Client
//!
//! Orchestrates the plugin registry: owns the single active connection, drives
//! the lifecycle state machine and republishes transitions on the event bus.

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::health::{self, ConnectionHealth, HealthStatus};
use super::state::ClientState;
use crate::config::{ClientConfig, PluginConfig};
use crate::events::{McpEvent, McpEventEmitter};
use crate::mcp::{
    McpError, McpResult, McpSession, Primitives, ServerInfo, ToolArguments, ToolCallResult,
};
use crate::plugins::{Plugin, PluginRegistry};
use crate::transport::TransportType;

/// What to connect to
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRequest {
    pub uri: String,
    pub transport_type: TransportType,
    /// Transport-specific override of the client's sub-config
    pub config: Option<PluginConfig>,
}

impl ConnectionRequest {
    pub fn new(uri: impl Into<String>, transport_type: TransportType) -> Self {
        Self {
            uri: uri.into(),
            transport_type,
            config: None,
        }
    }

    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// The live connection
struct ActiveConnection {
    /// Request as submitted; after a fallback its type differs from `transport_type`
    request: ConnectionRequest,
    transport_type: TransportType,
    plugin: Arc<Plugin>,
    session: Arc<McpSession>,
}

/// MCP client
pub struct McpClient {
    config: ClientConfig,
    registry: Arc<PluginRegistry>,
    events: Arc<McpEventEmitter>,
    state: RwLock<ClientState>,
    active: RwLock<Option<Arc<ActiveConnection>>>,
    last_request: RwLock<Option<ConnectionRequest>>,
    /// Serializes connect and disconnect
    connect_lock: tokio::sync::Mutex<()>,
    abort: Notify,
    health: RwLock<ConnectionHealth>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Create a client over `registry`; events are published on the registry's emitter
    pub fn new(config: ClientConfig, registry: Arc<PluginRegistry>) -> Self {
        let events = registry.events().clone();
        Self {
            config,
            registry,
            events,
            state: RwLock::new(ClientState::Uninitialized),
            active: RwLock::new(None),
            last_request: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            abort: Notify::new(),
            health: RwLock::new(ConnectionHealth::default()),
            monitor: Mutex::new(None),
        }
    }

    /// Client with its own emitter and registry
    pub fn from_config(config: ClientConfig) -> Self {
        let events = Arc::new(McpEventEmitter::new());
        Self::new(config, Arc::new(PluginRegistry::new(events)))
    }

    pub fn with_defaults() -> Self {
        Self::from_config(ClientConfig::default())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<McpEventEmitter> {
        &self.events
    }

    pub fn state(&self) -> ClientState {
        *self.state.read()
    }

    fn set_state(&self, new_state: ClientState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            debug!("Client state {} -> {}", old_state, new_state);
            self.events.emit(&McpEvent::StateChanged {
                old_state,
                new_state,
            });
        }
    }

    fn active(&self) -> Option<Arc<ActiveConnection>> {
        self.active.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.active().is_some()
    }

    /// Transport actually in use (SSE after a fallback)
    pub fn active_transport_type(&self) -> Option<TransportType> {
        self.active().map(|a| a.transport_type)
    }

    pub fn active_uri(&self) -> Option<String> {
        self.active().map(|a| a.request.uri.clone())
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.active().and_then(|a| a.session.server_info())
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health.read().clone()
    }

    /// Load the built-in plugins unless the registry already has some
    pub fn initialize(&self) -> McpResult<()> {
        if self.state() != ClientState::Uninitialized {
            return Ok(());
        }
        if self.registry.list_available().is_empty() {
            self.registry.load_default_plugins()?;
        }
        self.set_state(ClientState::Initialized);
        info!("MCP client initialized");
        Ok(())
    }

    /// Connect, replacing any connection to a different uri or transport.
    /// Already connected to the same target is a no-op.
    pub async fn connect(&self, request: ConnectionRequest) -> McpResult<()> {
        // Registered before waiting on the lock so a disconnect issued meanwhile aborts us
        let aborted = self.abort.notified();
        tokio::pin!(aborted);
        aborted.as_mut().enable();

        let _guard = self.connect_lock.lock().await;
        self.initialize()?;

        if let Some(active) = self.active() {
            if active.request.uri == request.uri
                && active.request.transport_type == request.transport_type
                && active.session.is_open()
            {
                debug!("Already connected to {} over {}", request.uri, active.transport_type);
                return Ok(());
            }
            self.disconnect_locked(Some("switching connection".to_string())).await;
        }

        *self.last_request.write() = Some(request.clone());

        tokio::select! {
            result = self.connect_with_fallback(&request) => result,
            _ = &mut aborted => {
                warn!("Connection attempt to {} aborted", request.uri);
                let mut attempted = vec![request.transport_type];
                if request.transport_type == TransportType::StreamableHttp {
                    attempted.push(TransportType::Sse);
                }
                for transport_type in attempted {
                    if let Some(plugin) = self.registry.get_plugin(transport_type) {
                        plugin.disconnect().await;
                    }
                }
                self.set_state(ClientState::Disconnected);
                self.events.emit(&McpEvent::Disconnected {
                    reason: Some("connection attempt aborted".to_string()),
                });
                Err(McpError::ConnectionFailed("connection attempt aborted".to_string()))
            }
        }
    }

    fn fallback_enabled(&self, request: &ConnectionRequest) -> bool {
        match &request.config {
            Some(PluginConfig::StreamableHttp(config)) => config.fallback_to_sse,
            _ => self.config.streamable_http.fallback_to_sse,
        }
    }

    async fn connect_with_fallback(&self, request: &ConnectionRequest) -> McpResult<()> {
        let err = match self.open(request, request.transport_type).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let can_fall_back = request.transport_type == TransportType::StreamableHttp
            && self.fallback_enabled(request)
            && err.is_connection_error();
        if !can_fall_back {
            return Err(self.fail(request.transport_type, err));
        }

        info!("Streamable HTTP failed for {}, falling back to SSE", request.uri);
        self.events.emit(&McpEvent::Fallback {
            uri: request.uri.clone(),
            from: TransportType::StreamableHttp,
            to: TransportType::Sse,
        });
        match self.open(request, TransportType::Sse).await {
            Ok(()) => Ok(()),
            Err(fallback_err) => {
                warn!("SSE fallback for {} failed: {}", request.uri, fallback_err);
                Err(self.fail(request.transport_type, err))
            }
        }
    }

    async fn plugin_for(
        &self,
        request: &ConnectionRequest,
        transport_type: TransportType,
    ) -> McpResult<Arc<Plugin>> {
        match &request.config {
            Some(config) if config.transport_type() == transport_type => {
                self.registry
                    .reconfigure_plugin(transport_type, config.clone())
                    .await
            }
            _ => {
                self.registry
                    .get_initialized_plugin(transport_type, Some(self.config.plugin_config(transport_type)))
                    .await
            }
        }
    }

    /// One connect attempt over `transport_type`. Errors are returned as-is; the
    /// caller decides whether they end the connect.
    async fn open(&self, request: &ConnectionRequest, transport_type: TransportType) -> McpResult<()> {
        self.set_state(ClientState::Connecting);
        self.events.emit(&McpEvent::Connecting {
            uri: request.uri.clone(),
            transport_type,
        });

        let plugin = self.plugin_for(request, transport_type).await?;

        let session = match plugin.connect(&request.uri).await {
            Ok(transport) => McpSession::connect(transport, self.config.global.timeout())
                .await
                .map_err(|e| plugin.enrich_error(&request.uri, e)),
            Err(e) => Err(e),
        };
        let session = match session {
            Ok(session) => Arc::new(session),
            Err(e) => {
                debug!("Connect over {} failed: {}", transport_type, e);
                plugin.disconnect().await;
                return Err(e);
            }
        };

        let server = session.server_info();
        *self.active.write() = Some(Arc::new(ActiveConnection {
            request: request.clone(),
            transport_type,
            plugin,
            session,
        }));
        *self.health.write() = ConnectionHealth::default();

        self.set_state(ClientState::Connected);
        info!("Connected to {} over {}", request.uri, transport_type);
        self.events.emit(&McpEvent::Connected {
            uri: request.uri.clone(),
            transport_type,
            server,
        });
        Ok(())
    }

    fn fail(&self, transport_type: TransportType, err: McpError) -> McpError {
        error!("Connect over {} failed: {}", transport_type, err);
        self.set_state(ClientState::Error);
        self.events.emit(&McpEvent::ClientError {
            message: err.to_string(),
            context: format!("connect ({})", transport_type),
        });
        err
    }

    /// Release the active connection, aborting a connect that is in flight.
    /// No-op when nothing is connected; never fails.
    pub async fn disconnect(&self) {
        self.abort.notify_waiters();
        let _guard = self.connect_lock.lock().await;
        self.disconnect_locked(None).await;
    }

    async fn disconnect_locked(&self, reason: Option<String>) {
        let active = self.active.write().take();
        let Some(active) = active else {
            return;
        };

        self.set_state(ClientState::Disconnecting);
        active.session.close().await;
        active.plugin.disconnect().await;
        self.set_state(ClientState::Disconnected);

        info!("Disconnected from {}", active.request.uri);
        self.events.emit(&McpEvent::Disconnected { reason });
    }

    /// Cancel a connect attempt that is in flight
    pub fn abort_connect(&self) {
        self.abort.notify_waiters();
    }

    /// Disconnect and connect again to the last requested target, retrying up to
    /// `max_retries` times
    pub async fn reconnect(&self) -> McpResult<()> {
        let request = self.last_request.read().clone().ok_or(McpError::NotConnected)?;
        let attempts = self.config.global.max_retries.max(1);
        let mut last_err = McpError::NotConnected;

        for attempt in 1..=attempts {
            self.disconnect().await;
            match self.connect(request.clone()).await {
                Ok(()) => {
                    info!("Reconnected to {} on attempt {}", request.uri, attempt);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Reconnect attempt {}/{} failed: {}", attempt, attempts, e);
                    last_err = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.global.reconnect_delay()).await;
            }
        }
        Err(last_err)
    }

    pub async fn call_tool(&self, name: &str, arguments: ToolArguments) -> McpResult<ToolCallResult> {
        let active = self.active().ok_or(McpError::NotConnected)?;
        active.plugin.call_tool(&active.session, name, arguments).await
    }

    /// Call a tool and decode its structured output (or its text as JSON)
    pub async fn call_tool_as<T: DeserializeOwned>(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> McpResult<T> {
        let result = self.call_tool(name, arguments).await?;
        if result.is_error() {
            return Err(McpError::InvalidResponse(format!(
                "tool {} failed: {}",
                name,
                result.text()
            )));
        }
        match result.structured_content {
            Some(structured) => serde_json::from_value(structured).map_err(McpError::from),
            None => serde_json::from_str(&result.text()).map_err(McpError::from),
        }
    }

    pub async fn get_primitives(&self) -> McpResult<Primitives> {
        let active = self.active().ok_or(McpError::NotConnected)?;
        let flat = active.plugin.get_primitives(&active.session).await?;
        Ok(Primitives::from(flat))
    }

    /// False when nothing is connected
    pub async fn is_healthy(&self) -> bool {
        match self.active() {
            Some(active) => active.session.is_open() && active.plugin.is_healthy().await,
            None => false,
        }
    }

    /// Probe the active connection with `ping` and update the health record
    pub async fn check_health(&self) -> ConnectionHealth {
        let Some(active) = self.active() else {
            return self.health();
        };

        let start = Instant::now();
        let outcome = if active.plugin.is_healthy().await {
            active.session.ping().await
        } else {
            Err(McpError::NotConnected)
        };

        let (was_healthy, health) = {
            let mut health = self.health.write();
            let was_healthy = health.status.is_healthy();
            match &outcome {
                Ok(()) => health.record_success(start.elapsed().as_millis() as u64),
                Err(e) => health.record_failure(e.to_string()),
            }
            (was_healthy, health.clone())
        };

        let first_check = health.consecutive_successes + health.consecutive_failures == 1;
        if first_check || was_healthy != health.status.is_healthy() {
            self.events.emit(&McpEvent::HealthChanged {
                healthy: health.status.is_healthy(),
                consecutive_failures: health.consecutive_failures,
            });
        }
        health
    }

    /// Start the periodic health monitor. Returns false when the interval is 0.
    pub fn start_health_monitoring(self: &Arc<Self>) -> bool {
        let Some(interval) = self.config.global.health_check_interval() else {
            debug!("Health monitoring disabled");
            return false;
        };

        let handle = health::spawn_monitor(Arc::downgrade(self), interval);
        if let Some(previous) = self.monitor.lock().replace(handle) {
            previous.abort();
        }
        info!("Health monitoring every {:?}", interval);
        true
    }

    pub fn stop_health_monitoring(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
            info!("Health monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Last health verdict, `Unknown` before the first check
    pub fn health_status(&self) -> HealthStatus {
        self.health.read().status
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("state", &self.state())
            .field("transport", &self.active_transport_type())
            .field("uri", &self.active_uri())
            .finish()
    }
}

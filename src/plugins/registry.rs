//! Plugin Registry
//!
//! Central registry holding one plugin per transport type and gating their
//! initialization.

use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Plugin, PluginMetadata};
use crate::config::PluginConfig;
use crate::events::{McpEvent, McpEventEmitter};
use crate::mcp::{McpError, McpResult};
use crate::transport::TransportType;

/// Snapshot of one registered plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub metadata: PluginMetadata,
    pub initialized: bool,
    pub connected: bool,
}

/// Registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub registered: usize,
    pub initialized: usize,
    /// Total initializations performed since creation
    pub initializations: u64,
}

/// Registry for transport plugins
pub struct PluginRegistry {
    plugins: RwLock<HashMap<TransportType, Arc<Plugin>>>,
    initialized: RwLock<HashSet<TransportType>>,
    /// Per-type gate so concurrent first uses initialize once
    init_gates: DashMap<TransportType, Arc<tokio::sync::Mutex<()>>>,
    initializations: AtomicU64,
    events: Arc<McpEventEmitter>,
}

impl PluginRegistry {
    pub fn new(events: Arc<McpEventEmitter>) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            initialized: RwLock::new(HashSet::new()),
            init_gates: DashMap::new(),
            initializations: AtomicU64::new(0),
            events,
        }
    }

    pub fn events(&self) -> &Arc<McpEventEmitter> {
        &self.events
    }

    fn validate(plugin: &Plugin) -> McpResult<()> {
        let metadata = plugin.metadata();
        if metadata.name.trim().is_empty() {
            return Err(McpError::Registry("plugin name must not be empty".to_string()));
        }
        if metadata.version.trim().is_empty() {
            return Err(McpError::Registry(format!(
                "plugin {} has an empty version",
                metadata.name
            )));
        }
        if metadata.transport_type != plugin.variant_type() {
            return Err(McpError::Registry(format!(
                "plugin {} declares transport {} but implements {}",
                metadata.name,
                metadata.transport_type,
                plugin.variant_type()
            )));
        }
        Ok(())
    }

    /// Register a plugin, replacing any plugin of the same transport type
    pub fn register(&self, plugin: Plugin) -> McpResult<()> {
        Self::validate(&plugin)?;
        let metadata = plugin.metadata().clone();
        let transport_type = metadata.transport_type;

        let previous = self.plugins.write().insert(transport_type, Arc::new(plugin));
        if let Some(previous) = previous {
            warn!("Replacing registered plugin for {}", transport_type);
            self.initialized.write().remove(&transport_type);
            Self::retire(previous);
        }

        info!("Registered plugin {} v{} ({})", metadata.name, metadata.version, transport_type);
        self.events.emit(&McpEvent::PluginRegistered {
            transport_type,
            metadata,
        });
        Ok(())
    }

    /// Remove a plugin; false if none was registered. A live connection
    /// held by the removed plugin is closed in the background.
    pub fn unregister(&self, transport_type: TransportType) -> bool {
        let Some(removed) = self.plugins.write().remove(&transport_type) else {
            return false;
        };
        self.initialized.write().remove(&transport_type);
        Self::retire(removed);
        info!("Unregistered plugin for {}", transport_type);
        self.events.emit(&McpEvent::PluginUnregistered { transport_type });
        true
    }

    /// Disconnect a plugin that just left the registry
    fn retire(plugin: Arc<Plugin>) {
        if !plugin.is_connected() {
            return;
        }
        let transport_type = plugin.transport_type();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Disconnecting dropped {} plugin", transport_type);
                handle.spawn(async move { plugin.disconnect().await });
            }
            Err(_) => warn!(
                "Dropped {} plugin while connected and outside a runtime; connection left to drop",
                transport_type
            ),
        }
    }

    /// Registered plugin, initialized or not
    pub fn get_plugin(&self, transport_type: TransportType) -> Option<Arc<Plugin>> {
        self.plugins.read().get(&transport_type).cloned()
    }

    fn is_marked_initialized(&self, transport_type: TransportType) -> bool {
        self.initialized.read().contains(&transport_type)
    }

    /// Plugin for `transport_type`, initializing it on first use with `config`
    /// (or the plugin's defaults). Later calls return the same instance and
    /// ignore `config`.
    pub async fn get_initialized_plugin(
        &self,
        transport_type: TransportType,
        config: Option<PluginConfig>,
    ) -> McpResult<Arc<Plugin>> {
        let plugin = self
            .get_plugin(transport_type)
            .ok_or(McpError::PluginNotFound(transport_type))?;
        if self.is_marked_initialized(transport_type) {
            return Ok(plugin);
        }

        let gate = self.init_gates.entry(transport_type).or_default().clone();
        let _in_flight = gate.lock().await;

        // The plugin may have been replaced or initialized while we waited
        let plugin = self
            .get_plugin(transport_type)
            .ok_or(McpError::PluginNotFound(transport_type))?;
        if self.is_marked_initialized(transport_type) {
            return Ok(plugin);
        }

        let config = config.unwrap_or_else(|| plugin.default_config());
        plugin.initialize(config)?;
        self.initialized.write().insert(transport_type);
        self.initializations.fetch_add(1, Ordering::SeqCst);

        debug!("Initialized plugin for {}", transport_type);
        self.events.emit(&McpEvent::PluginInitialized { transport_type });
        Ok(plugin)
    }

    /// Replace the configuration of an already initialized plugin
    pub async fn reconfigure_plugin(
        &self,
        transport_type: TransportType,
        config: PluginConfig,
    ) -> McpResult<Arc<Plugin>> {
        if !self.is_marked_initialized(transport_type) {
            return self.get_initialized_plugin(transport_type, Some(config)).await;
        }

        let gate = self.init_gates.entry(transport_type).or_default().clone();
        let _in_flight = gate.lock().await;
        let plugin = self
            .get_plugin(transport_type)
            .ok_or(McpError::PluginNotFound(transport_type))?;
        plugin.initialize(config)?;
        debug!("Reconfigured plugin for {}", transport_type);
        Ok(plugin)
    }

    /// Register the SSE, WebSocket and Streamable HTTP plugins. All three are
    /// validated before any is inserted.
    pub fn load_default_plugins(&self) -> McpResult<()> {
        let plugins: Vec<Plugin> = TransportType::ALL
            .iter()
            .map(|t| Plugin::builtin(*t, self.events.clone()))
            .collect();

        for plugin in &plugins {
            Self::validate(plugin)?;
        }
        for plugin in plugins {
            self.register(plugin)?;
        }

        info!("Loaded {} default plugins", TransportType::ALL.len());
        Ok(())
    }

    pub fn list_available(&self) -> Vec<TransportType> {
        let mut types: Vec<_> = self.plugins.read().keys().copied().collect();
        types.sort();
        types
    }

    pub fn list_initialized(&self) -> Vec<TransportType> {
        let mut types: Vec<_> = self.initialized.read().iter().copied().collect();
        types.sort();
        types
    }

    pub fn get_plugin_info(&self, transport_type: TransportType) -> Option<PluginInfo> {
        let plugin = self.get_plugin(transport_type)?;
        Some(PluginInfo {
            metadata: plugin.metadata().clone(),
            initialized: self.is_marked_initialized(transport_type),
            connected: plugin.is_connected(),
        })
    }

    pub fn get_stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.plugins.read().len(),
            initialized: self.initialized.read().len(),
            initializations: self.initializations.load(Ordering::SeqCst),
        }
    }

    /// Disconnect every plugin and empty the registry
    pub async fn cleanup(&self) {
        let plugins: Vec<(TransportType, Arc<Plugin>)> = self
            .plugins
            .read()
            .iter()
            .map(|(t, p)| (*t, p.clone()))
            .collect();

        for (_, plugin) in &plugins {
            plugin.disconnect().await;
        }
        for (transport_type, _) in plugins {
            self.unregister(transport_type);
        }
        self.init_gates.clear();
        info!("Plugin registry cleaned up");
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("available", &self.list_available())
            .field("initialized", &self.list_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::plugins::{SsePlugin, WebSocketPlugin};
    use parking_lot::Mutex;

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Arc::new(McpEventEmitter::new()))
    }

    #[test]
    fn test_load_default_plugins() {
        let registry = registry();
        registry.load_default_plugins().unwrap();
        assert_eq!(
            registry.list_available(),
            vec![
                TransportType::Sse,
                TransportType::WebSocket,
                TransportType::StreamableHttp
            ]
        );
        assert!(registry.list_initialized().is_empty());
        assert_eq!(registry.get_stats().registered, 3);
    }

    #[test]
    fn test_register_then_unregister_restores_available() {
        let registry = registry();
        registry
            .register(Plugin::WebSocket(WebSocketPlugin::new(registry.events().clone())))
            .unwrap();
        let before = registry.list_available();

        registry
            .register(Plugin::Sse(SsePlugin::new(registry.events().clone())))
            .unwrap();
        assert!(registry.unregister(TransportType::Sse));
        assert_eq!(registry.list_available(), before);

        assert!(!registry.unregister(TransportType::Sse));
    }

    #[test]
    fn test_register_emits_and_overwrites() {
        let registry = registry();
        let registered = Arc::new(Mutex::new(Vec::new()));
        let seen = registered.clone();
        registry.events().on(EventKind::PluginRegistered, move |e| {
            if let McpEvent::PluginRegistered { transport_type, .. } = e {
                seen.lock().push(*transport_type);
            }
        });

        registry
            .register(Plugin::builtin(TransportType::Sse, registry.events().clone()))
            .unwrap();
        registry
            .register(Plugin::builtin(TransportType::Sse, registry.events().clone()))
            .unwrap();

        assert_eq!(*registered.lock(), vec![TransportType::Sse, TransportType::Sse]);
        assert_eq!(registry.get_stats().registered, 1);
    }

    #[tokio::test]
    async fn test_unknown_type_is_not_found() {
        let registry = registry();
        let err = registry
            .get_initialized_plugin(TransportType::WebSocket, None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::PluginNotFound(TransportType::WebSocket)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_initializes_once() {
        let registry = Arc::new(registry());
        registry.load_default_plugins().unwrap();

        let initialized_events = Arc::new(Mutex::new(0));
        let counter = initialized_events.clone();
        registry
            .events()
            .on(EventKind::PluginInitialized, move |_| *counter.lock() += 1);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .get_initialized_plugin(TransportType::WebSocket, None)
                        .await
                })
            })
            .collect();

        let mut plugins = Vec::new();
        for handle in handles {
            plugins.push(handle.await.unwrap().unwrap());
        }

        assert!(plugins.iter().all(|p| Arc::ptr_eq(p, &plugins[0])));
        assert!(plugins[0].is_initialized());
        assert_eq!(registry.get_stats().initializations, 1);
        assert_eq!(*initialized_events.lock(), 1);
        assert_eq!(registry.list_initialized(), vec![TransportType::WebSocket]);
    }

    #[tokio::test]
    async fn test_reconfigure_does_not_count_as_initialization() {
        let registry = registry();
        registry.load_default_plugins().unwrap();
        registry
            .get_initialized_plugin(TransportType::Sse, None)
            .await
            .unwrap();

        let mut config = crate::config::SseConfig::default();
        config.read_timeout_ms = 1_000;
        registry
            .reconfigure_plugin(TransportType::Sse, PluginConfig::Sse(config))
            .await
            .unwrap();
        assert_eq!(registry.get_stats().initializations, 1);

        let err = registry
            .reconfigure_plugin(
                TransportType::Sse,
                PluginConfig::default_for(TransportType::WebSocket),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidConfig(_)));
    }

    async fn wait_disconnected(plugin: &Plugin) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while plugin.is_connected() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_plugin_is_disconnected() {
        let registry = registry();
        registry.load_default_plugins().unwrap();
        let removed = registry
            .get_initialized_plugin(TransportType::StreamableHttp, None)
            .await
            .unwrap();
        removed.connect("http://localhost:3006").await.unwrap();
        assert!(registry.unregister(TransportType::StreamableHttp));
        wait_disconnected(&removed).await;

        let replaced = registry
            .get_initialized_plugin(TransportType::Sse, None)
            .await
            .unwrap();
        let uri = crate::test_support::spawn_sse_server(crate::test_support::MockServer::default()).await;
        replaced.connect(&uri).await.unwrap();
        registry
            .register(Plugin::builtin(TransportType::Sse, registry.events().clone()))
            .unwrap();
        wait_disconnected(&replaced).await;
        assert!(!registry.get_plugin(TransportType::Sse).unwrap().is_initialized());
    }

    #[tokio::test]
    async fn test_cleanup_empties_registry() {
        let registry = registry();
        registry.load_default_plugins().unwrap();
        let plugin = registry
            .get_initialized_plugin(TransportType::StreamableHttp, None)
            .await
            .unwrap();
        plugin.connect("http://localhost:3006").await.unwrap();

        registry.cleanup().await;
        assert!(!plugin.is_connected());
        assert!(registry.list_available().is_empty());
        assert!(registry.get_plugin_info(TransportType::StreamableHttp).is_none());
    }
}

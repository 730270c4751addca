//! Event vocabulary shared by the registry, plugins, transports and client.

use serde::Serialize;

use super::emitter::{Event, EventEmitter};
use crate::client::state::ClientState;
use crate::mcp::types::ServerInfo;
use crate::plugins::PluginMetadata;
use crate::transport::TransportType;

/// Emitter carrying every lifecycle event of this crate
pub type McpEventEmitter = EventEmitter<McpEvent>;

/// Events that can be emitted during the lifetime of a client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum McpEvent {
    /// A plugin was added to the registry
    PluginRegistered {
        transport_type: TransportType,
        metadata: PluginMetadata,
    },

    /// A plugin was removed from the registry
    PluginUnregistered { transport_type: TransportType },

    /// A plugin received its configuration
    PluginInitialized { transport_type: TransportType },

    /// A plugin created its transport
    PluginConnected {
        transport_type: TransportType,
        uri: String,
    },

    /// A plugin dropped its transport
    PluginDisconnected { transport_type: TransportType },

    /// A plugin-level failure that no caller is waiting on
    PluginError {
        transport_type: TransportType,
        message: String,
    },

    /// Client state machine transition
    StateChanged {
        old_state: ClientState,
        new_state: ClientState,
    },

    /// Client started connecting
    Connecting {
        uri: String,
        transport_type: TransportType,
    },

    /// Client finished the handshake
    Connected {
        uri: String,
        transport_type: TransportType,
        #[serde(skip_serializing_if = "Option::is_none")]
        server: Option<ServerInfo>,
    },

    /// Client released its connection
    Disconnected {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Client-level failure
    ClientError { message: String, context: String },

    /// Streamable HTTP failed and the client retried over another transport
    Fallback {
        uri: String,
        from: TransportType,
        to: TransportType,
    },

    /// Result of a background health check that changed the health verdict
    HealthChanged {
        healthy: bool,
        consecutive_failures: u32,
    },

    /// Underlying transport opened
    TransportOpen {
        transport_type: TransportType,
        uri: String,
    },

    /// Underlying transport closed
    TransportClose {
        transport_type: TransportType,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
        reason: String,
    },

    /// Transport-internal error (parse failure, broken stream)
    TransportError {
        transport_type: TransportType,
        message: String,
    },

    /// Decoded inbound message
    TransportMessage {
        transport_type: TransportType,
        message: serde_json::Value,
    },
}

/// Event name discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    PluginRegistered,
    PluginUnregistered,
    PluginInitialized,
    PluginConnected,
    PluginDisconnected,
    PluginError,
    StateChanged,
    Connecting,
    Connected,
    Disconnected,
    ClientError,
    Fallback,
    HealthChanged,
    TransportOpen,
    TransportClose,
    TransportError,
    TransportMessage,
}

impl EventKind {
    /// Namespaced event name, e.g. `client:connected`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PluginRegistered => "registry:plugin-registered",
            Self::PluginUnregistered => "registry:plugin-unregistered",
            Self::PluginInitialized => "plugin:initialized",
            Self::PluginConnected => "plugin:connected",
            Self::PluginDisconnected => "plugin:disconnected",
            Self::PluginError => "plugin:error",
            Self::StateChanged => "client:state-changed",
            Self::Connecting => "client:connecting",
            Self::Connected => "client:connected",
            Self::Disconnected => "client:disconnected",
            Self::ClientError => "client:error",
            Self::Fallback => "client:fallback",
            Self::HealthChanged => "client:health-changed",
            Self::TransportOpen => "transport:open",
            Self::TransportClose => "transport:close",
            Self::TransportError => "transport:error",
            Self::TransportMessage => "transport:message",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event for McpEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            Self::PluginRegistered { .. } => EventKind::PluginRegistered,
            Self::PluginUnregistered { .. } => EventKind::PluginUnregistered,
            Self::PluginInitialized { .. } => EventKind::PluginInitialized,
            Self::PluginConnected { .. } => EventKind::PluginConnected,
            Self::PluginDisconnected { .. } => EventKind::PluginDisconnected,
            Self::PluginError { .. } => EventKind::PluginError,
            Self::StateChanged { .. } => EventKind::StateChanged,
            Self::Connecting { .. } => EventKind::Connecting,
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::ClientError { .. } => EventKind::ClientError,
            Self::Fallback { .. } => EventKind::Fallback,
            Self::HealthChanged { .. } => EventKind::HealthChanged,
            Self::TransportOpen { .. } => EventKind::TransportOpen,
            Self::TransportClose { .. } => EventKind::TransportClose,
            Self::TransportError { .. } => EventKind::TransportError,
            Self::TransportMessage { .. } => EventKind::TransportMessage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = McpEvent::Connecting {
            uri: "ws://localhost:3006/message".to_string(),
            transport_type: TransportType::WebSocket,
        };

        assert_eq!(event.kind(), EventKind::Connecting);
        assert_eq!(event.kind().as_str(), "client:connecting");
        assert_eq!(
            EventKind::PluginRegistered.to_string(),
            "registry:plugin-registered"
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = McpEvent::TransportClose {
            transport_type: TransportType::Sse,
            code: None,
            reason: "stream ended".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transportClose");
        assert_eq!(json["transport_type"], "sse");
        assert!(json.get("code").is_none());
    }
}

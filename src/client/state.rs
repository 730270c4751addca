//! Client State
//!
//! Lifecycle of an [`McpClient`](super::McpClient).

use serde::{Deserialize, Serialize};

/// State of the client's single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    /// Plugins not loaded yet
    Uninitialized,
    /// Plugins loaded, never connected
    Initialized,
    /// A connect attempt is running
    Connecting,
    /// Handshake finished; data-plane calls are allowed
    Connected,
    /// Tearing down the active connection
    Disconnecting,
    /// Connection released
    Disconnected,
    /// Last connect attempt failed
    Error,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

impl ClientState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde() {
        for state in [
            ClientState::Uninitialized,
            ClientState::Connecting,
            ClientState::Disconnected,
            ClientState::Error,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
        assert_eq!(ClientState::default(), ClientState::Uninitialized);
    }
}

//! SSE plugin
//!
//! `connect` only builds the transport; the stream is opened by the protocol session.

use async_trait::async_trait;
use std::sync::Arc;

use super::{PluginCore, PluginMetadata, TransportPlugin};
use crate::config::{PluginConfig, SseConfig};
use crate::events::McpEventEmitter;
use crate::mcp::{McpError, McpResult};
use crate::transport::{self, SseTransport, Transport, TransportType};

#[derive(Debug)]
pub struct SsePlugin {
    core: PluginCore,
}

impl SsePlugin {
    pub fn new(events: Arc<McpEventEmitter>) -> Self {
        let metadata = PluginMetadata::new("sse", TransportType::Sse)
            .with_description("MCP over an SSE stream with a POST back-channel");
        Self {
            core: PluginCore::new(metadata, events),
        }
    }

    fn config(&self) -> McpResult<SseConfig> {
        match self.core.config()? {
            PluginConfig::Sse(config) => Ok(config),
            other => Err(McpError::InvalidConfig(format!(
                "sse plugin holds a {} configuration",
                other.transport_type()
            ))),
        }
    }
}

#[async_trait]
impl TransportPlugin for SsePlugin {
    fn core(&self) -> &PluginCore {
        &self.core
    }

    async fn connect(&self, uri: &str) -> McpResult<Arc<dyn Transport>> {
        transport::parse_uri(uri, TransportType::Sse)?;
        let config = self.config()?;
        let events = self.core.events();

        self.core
            .connect_with(uri, async move {
                let transport = SseTransport::new(uri, config, events)?;
                Ok(Arc::new(transport) as Arc<dyn Transport>)
            })
            .await
    }
}

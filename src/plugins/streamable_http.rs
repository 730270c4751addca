//! Streamable HTTP plugin
//!
//! Like SSE, no request is made until the protocol session sends `initialize`.

use async_trait::async_trait;
use std::sync::Arc;

use super::{PluginCore, PluginMetadata, TransportPlugin};
use crate::config::{PluginConfig, StreamableHttpConfig};
use crate::events::McpEventEmitter;
use crate::mcp::{McpError, McpResult};
use crate::transport::{self, StreamableHttpTransport, Transport, TransportType};

#[derive(Debug)]
pub struct StreamableHttpPlugin {
    core: PluginCore,
}

impl StreamableHttpPlugin {
    pub fn new(events: Arc<McpEventEmitter>) -> Self {
        let metadata = PluginMetadata::new("streamable-http", TransportType::StreamableHttp)
            .with_description("MCP over single-endpoint HTTP with optional streamed replies");
        Self {
            core: PluginCore::new(metadata, events),
        }
    }

    pub fn config(&self) -> McpResult<StreamableHttpConfig> {
        match self.core.config()? {
            PluginConfig::StreamableHttp(config) => Ok(config),
            other => Err(McpError::InvalidConfig(format!(
                "streamable-http plugin holds a {} configuration",
                other.transport_type()
            ))),
        }
    }
}

#[async_trait]
impl TransportPlugin for StreamableHttpPlugin {
    fn core(&self) -> &PluginCore {
        &self.core
    }

    async fn connect(&self, uri: &str) -> McpResult<Arc<dyn Transport>> {
        transport::parse_uri(uri, TransportType::StreamableHttp)?;
        let config = self.config()?;
        let events = self.core.events();

        self.core
            .connect_with(uri, async move {
                let transport = StreamableHttpTransport::new(uri, config, events)?;
                Ok(Arc::new(transport) as Arc<dyn Transport>)
            })
            .await
    }
}

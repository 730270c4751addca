//! Client Configuration
//!
//! Typed configuration for the client and each transport, loadable from disk.

pub mod loader;
pub mod types;

pub use loader::{
    default_config_path, load_config_file, load_or_default, parse_config, LoaderError, LOG_LEVEL_ENV,
};
pub use types::{
    BinaryType, ClientConfig, GlobalConfig, PluginConfig, SseConfig, StreamableHttpConfig,
    WebSocketConfig, DEFAULT_SSE_URI, DEFAULT_STREAMABLE_HTTP_URI, DEFAULT_WEBSOCKET_URI,
};

//! SSE Transport
//!
//! Legacy MCP HTTP+SSE transport: a long-lived GET stream carries server messages,
//! the first `endpoint` event names the URL that client messages are POSTed to.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use super::sse_codec::SseDecoder;
use super::{Transport, TransportType};
use crate::config::SseConfig;
use crate::events::{McpEvent, McpEventEmitter};
use crate::mcp::error::{McpError, McpResult};

/// Build a header map from configured string pairs
pub(crate) fn header_map(headers: &HashMap<String, String>) -> McpResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| McpError::InvalidConfig(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| McpError::InvalidConfig(format!("Invalid value for header '{}': {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Build an HTTP client with the shared transport tuning
pub(crate) fn build_http_client(
    keep_alive: bool,
    connection_timeout_ms: u64,
    headers: &HashMap<String, String>,
) -> McpResult<Client> {
    let keep_alive = keep_alive.then(|| Duration::from_secs(60));
    Client::builder()
        .connect_timeout(Duration::from_millis(connection_timeout_ms))
        .tcp_keepalive(keep_alive)
        .pool_max_idle_per_host(5)
        .default_headers(header_map(headers)?)
        .build()
        .map_err(|e| McpError::TransportError(e.to_string()))
}

struct StreamState {
    uri: String,
    base: Url,
    open: AtomicBool,
    endpoint: RwLock<Option<Url>>,
    events: Arc<McpEventEmitter>,
    inbound_tx: mpsc::UnboundedSender<serde_json::Value>,
}

impl StreamState {
    fn mark_closed(&self, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            info!("SSE stream {} closed: {}", self.uri, reason);
            self.events.emit(&McpEvent::TransportClose {
                transport_type: TransportType::Sse,
                code: None,
                reason: reason.to_string(),
            });
        }
    }

    fn emit_error(&self, message: String) {
        self.events.emit(&McpEvent::TransportError {
            transport_type: TransportType::Sse,
            message,
        });
    }
}

/// SSE transport implementation
pub struct SseTransport {
    state: Arc<StreamState>,
    config: SseConfig,
    client: Client,
    reader: Mutex<Option<JoinHandle<()>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<serde_json::Value>>>,
    start_lock: tokio::sync::Mutex<()>,
}

impl SseTransport {
    /// Create the transport. No request is made until `start`.
    pub fn new(uri: impl Into<String>, config: SseConfig, events: Arc<McpEventEmitter>) -> McpResult<Self> {
        let uri = uri.into();
        let base = super::parse_uri(&uri, TransportType::Sse)?;
        let client = build_http_client(config.keep_alive, config.connection_timeout_ms, &config.headers)?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Ok(Self {
            state: Arc::new(StreamState {
                uri,
                base,
                open: AtomicBool::new(false),
                endpoint: RwLock::new(None),
                events,
                inbound_tx,
            }),
            config,
            client,
            reader: Mutex::new(None),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            start_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// URL announced by the server for client messages
    pub fn endpoint(&self) -> Option<Url> {
        self.state.endpoint.read().clone()
    }

    async fn open_stream(&self) -> McpResult<()> {
        let timeout = Duration::from_millis(self.config.connection_timeout_ms);
        info!("Opening SSE stream {}", self.state.uri);

        let request = self
            .client
            .get(self.state.base.clone())
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| McpError::ConnectionTimeout(self.config.connection_timeout_ms))?
            .map_err(McpError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::ConnectionFailed(format!(
                "SSE stream returned HTTP {}",
                status
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        self.state.open.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(read_stream(response, self.state.clone(), endpoint_tx));
        if let Some(previous) = self.reader.lock().replace(handle) {
            previous.abort();
        }

        match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => {
                info!("SSE endpoint for {}: {}", self.state.uri, endpoint);
                self.state.events.emit(&McpEvent::TransportOpen {
                    transport_type: TransportType::Sse,
                    uri: self.state.uri.clone(),
                });
                Ok(())
            }
            Ok(Err(_)) => {
                self.shutdown_reader();
                Err(McpError::ConnectionFailed(
                    "SSE stream ended before the server announced its endpoint".to_string(),
                ))
            }
            Err(_) => {
                self.shutdown_reader();
                Err(McpError::ConnectionTimeout(self.config.connection_timeout_ms))
            }
        }
    }

    fn shutdown_reader(&self) {
        self.state.open.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

async fn read_stream(
    response: reqwest::Response,
    state: Arc<StreamState>,
    endpoint_tx: oneshot::Sender<Url>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("SSE stream {} failed: {}", state.uri, e);
                state.emit_error(e.to_string());
                break;
            }
        };

        for event in decoder.push(&chunk) {
            match event.name() {
                "endpoint" => match state.base.join(event.data.trim()) {
                    Ok(url) => {
                        *state.endpoint.write() = Some(url.clone());
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(url);
                        }
                    }
                    Err(e) => {
                        warn!("Invalid SSE endpoint '{}': {}", event.data, e);
                        state.emit_error(format!("invalid endpoint event: {}", e));
                    }
                },
                "message" => match serde_json::from_str::<serde_json::Value>(&event.data) {
                    Ok(message) => {
                        let _ = state.inbound_tx.send(message.clone());
                        state.events.emit(&McpEvent::TransportMessage {
                            transport_type: TransportType::Sse,
                            message,
                        });
                    }
                    Err(e) => {
                        warn!("Dropping malformed SSE message: {}", e);
                        state.emit_error(McpError::ParseError(e.to_string()).to_string());
                    }
                },
                other => debug!("Ignoring SSE event '{}'", other),
            }
        }
    }

    state.mark_closed("stream ended");
}

#[async_trait]
impl Transport for SseTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Sse
    }

    fn uri(&self) -> &str {
        &self.state.uri
    }

    async fn start(&self) -> McpResult<()> {
        let _guard = self.start_lock.lock().await;
        if self.is_open() {
            return Ok(());
        }
        self.open_stream().await
    }

    async fn send(&self, message: serde_json::Value) -> McpResult<()> {
        if !self.is_open() {
            return Err(McpError::NotConnected);
        }
        let endpoint = self.endpoint().ok_or(McpError::NotConnected)?;

        let response = self
            .client
            .post(endpoint)
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .json(&message)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(()),
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(McpError::TransportError(format!(
                    "SSE message POST failed with HTTP {}: {}",
                    status, error_text
                )))
            }
        }
    }

    async fn close(&self) -> McpResult<()> {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.state.mark_closed("closed by client");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<serde_json::Value>> {
        self.inbound_rx.lock().take()
    }
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("uri", &self.state.uri)
            .field("open", &self.is_open())
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

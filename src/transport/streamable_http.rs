//! MCP Streamable HTTP Transport
//!
//! Single endpoint transport: every client message is a POST, replies come back
//! either as a JSON body or as an SSE stream on the same response.
//!
//! Key features:
//! - Session management via Mcp-Session-Id header
//! - Streamed replies decoded with the shared SSE decoder
//! - Bounded retries on connect failures

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, Response, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use super::sse::build_http_client;
use super::sse_codec::SseDecoder;
use super::{Transport, TransportType};
use crate::config::StreamableHttpConfig;
use crate::events::{McpEvent, McpEventEmitter};
use crate::mcp::error::{McpError, McpResult};

pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Receiving half shared with the tasks that drain streamed replies
struct Inbound {
    events: Arc<McpEventEmitter>,
    tx: mpsc::UnboundedSender<serde_json::Value>,
}

impl Inbound {
    /// Deliver one JSON body, unpacking batches
    fn dispatch(&self, message: serde_json::Value) {
        match message {
            serde_json::Value::Array(batch) => batch.into_iter().for_each(|m| self.dispatch(m)),
            message => {
                let _ = self.tx.send(message.clone());
                self.events.emit(&McpEvent::TransportMessage {
                    transport_type: TransportType::StreamableHttp,
                    message,
                });
            }
        }
    }

    fn dispatch_text(&self, text: &str) {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(message) => self.dispatch(message),
            Err(e) => {
                warn!("Dropping malformed Streamable HTTP message: {}", e);
                self.events.emit(&McpEvent::TransportError {
                    transport_type: TransportType::StreamableHttp,
                    message: McpError::ParseError(e.to_string()).to_string(),
                });
            }
        }
    }
}

/// Streamable HTTP Transport implementation
pub struct StreamableHttpTransport {
    uri: String,
    endpoint: Url,
    client: Client,
    config: StreamableHttpConfig,
    /// Current session ID from server
    session_id: Arc<RwLock<Option<String>>>,
    open: AtomicBool,
    inbound: Arc<Inbound>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<serde_json::Value>>>,
    /// Tasks draining streamed (SSE) replies
    streams: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamableHttpTransport {
    /// Create a new Streamable HTTP transport
    pub fn new(
        uri: impl Into<String>,
        config: StreamableHttpConfig,
        events: Arc<McpEventEmitter>,
    ) -> McpResult<Self> {
        let uri = uri.into();
        let endpoint = super::parse_uri(&uri, TransportType::StreamableHttp)?;
        let client = build_http_client(config.keep_alive, config.connection_timeout_ms, &config.headers)?;
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            uri,
            endpoint,
            client,
            config,
            session_id: Arc::new(RwLock::new(None)),
            open: AtomicBool::new(false),
            inbound: Arc::new(Inbound { events, tx }),
            inbound_rx: Mutex::new(Some(rx)),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Build a request with proper headers
    fn build_request(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream");

        if let Some(ref session_id) = *self.session_id.read() {
            request = request.header(SESSION_ID_HEADER, session_id.as_str());
        }

        request.json(body)
    }

    /// POST with bounded retries on connect failures
    async fn post(&self, body: &serde_json::Value) -> McpResult<Response> {
        let mut attempt = 0;
        loop {
            match self.build_request(body).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "POST to {} failed ({}), retry {}/{}",
                        self.endpoint, e, attempt, self.config.max_retries
                    );
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn capture_session_id(&self, response: &Response) {
        if let Some(sid) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current_sid = self.session_id.write();
            if current_sid.as_deref() != Some(sid) {
                info!("MCP session ID: {}", sid);
                *current_sid = Some(sid.to_string());
            }
        }
    }

    /// Handle the HTTP response
    async fn handle_response(&self, response: Response) -> McpResult<()> {
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        debug!("MCP response status: {}, content-type: {}", status, content_type);

        match status {
            StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::OK => {
                if content_type.contains("text/event-stream") {
                    self.spawn_stream(response);
                    Ok(())
                } else {
                    let body = response.text().await?;
                    if !body.trim().is_empty() {
                        self.inbound.dispatch_text(&body);
                    }
                    Ok(())
                }
            }
            StatusCode::NOT_FOUND if self.session_id.read().is_some() => {
                *self.session_id.write() = None;
                Err(McpError::TransportError(
                    "session expired (HTTP 404); reconnect to start a new session".to_string(),
                ))
            }
            StatusCode::NOT_FOUND => Err(McpError::ConnectionFailed(format!(
                "HTTP 404 Not Found at {}",
                self.endpoint
            ))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(McpError::ConnectionFailed(format!("HTTP {}", status)))
            }
            StatusCode::BAD_REQUEST => {
                let error_text = response.text().await.unwrap_or_default();
                Err(McpError::InvalidResponse(format!("Bad request: {}", error_text)))
            }
            _ => {
                let error_text = response.text().await.unwrap_or_default();
                Err(McpError::TransportError(format!(
                    "HTTP {}: {}",
                    status, error_text
                )))
            }
        }
    }

    /// Drain an SSE reply in the background so `send` returns once headers arrive
    fn spawn_stream(&self, response: Response) {
        let inbound = self.inbound.clone();
        let handle = tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        for event in decoder.push(&chunk) {
                            if event.name() == "message" {
                                inbound.dispatch_text(&event.data);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Streamed reply interrupted: {}", e);
                        break;
                    }
                }
            }
        });

        let mut streams = self.streams.lock();
        streams.retain(|h| !h.is_finished());
        streams.push(handle);
    }

    /// Ask the server to drop the session
    async fn terminate_session(&self) {
        let Some(session_id) = self.session_id.write().take() else {
            return;
        };
        let result = self
            .client
            .delete(self.endpoint.clone())
            .timeout(Duration::from_millis(self.config.connection_timeout_ms))
            .header(SESSION_ID_HEADER, session_id.as_str())
            .send()
            .await;
        match result {
            Ok(response) => debug!("Session {} terminated: HTTP {}", session_id, response.status()),
            Err(e) => debug!("Session {} termination failed: {}", session_id, e),
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    async fn start(&self) -> McpResult<()> {
        if !self.open.swap(true, Ordering::SeqCst) {
            info!("Streamable HTTP transport ready for {}", self.endpoint);
            self.inbound.events.emit(&McpEvent::TransportOpen {
                transport_type: TransportType::StreamableHttp,
                uri: self.uri.clone(),
            });
        }
        Ok(())
    }

    async fn send(&self, message: serde_json::Value) -> McpResult<()> {
        if !self.is_open() {
            return Err(McpError::NotConnected);
        }
        debug!(
            "Sending MCP message: {}",
            message.get("method").and_then(|m| m.as_str()).unwrap_or("<response>")
        );

        let response = self.post(&message).await?;
        self.capture_session_id(&response);
        self.handle_response(response).await
    }

    async fn close(&self) -> McpResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Closing Streamable HTTP transport for {}", self.endpoint);
        for handle in self.streams.lock().drain(..) {
            handle.abort();
        }
        self.terminate_session().await;
        self.inbound.events.emit(&McpEvent::TransportClose {
            transport_type: TransportType::StreamableHttp,
            code: None,
            reason: "closed by client".to_string(),
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<serde_json::Value>> {
        self.inbound_rx.lock().take()
    }
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .field("session_id", &self.session_id)
            .field("read_timeout_ms", &self.config.read_timeout_ms)
            .finish()
    }
}

impl Drop for StreamableHttpTransport {
    fn drop(&mut self) {
        for handle in self.streams.lock().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_http_server, MockServer};
    use serde_json::json;

    fn transport(uri: &str) -> StreamableHttpTransport {
        StreamableHttpTransport::new(
            uri,
            StreamableHttpConfig::default(),
            Arc::new(McpEventEmitter::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_create_transport() {
        let events = Arc::new(McpEventEmitter::new());
        assert!(StreamableHttpTransport::new(
            "https://mcp.example.com",
            StreamableHttpConfig::default(),
            events.clone()
        )
        .is_ok());
        assert!(StreamableHttpTransport::new(
            "ws://mcp.example.com",
            StreamableHttpConfig::default(),
            events
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_json_reply_and_session_capture() {
        let uri = spawn_http_server(MockServer::default()).await;
        let transport = transport(&uri);
        let mut inbound = transport.take_inbound().unwrap();
        transport.start().await.unwrap();

        transport
            .send(json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}))
            .await
            .unwrap();
        let reply = inbound.recv().await.unwrap();
        assert_eq!(reply["id"], 7);
        assert!(transport.session_id().is_some());

        transport
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
            .unwrap();
        assert!(inbound.try_recv().is_err());

        transport.close().await.unwrap();
        assert!(transport.session_id().is_none());
        assert!(matches!(
            transport.send(json!({})).await,
            Err(McpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_streamed_reply() {
        let server = MockServer {
            stream_replies: true,
            ..MockServer::default()
        };
        let uri = spawn_http_server(server).await;
        let transport = transport(&uri);
        let mut inbound = transport.take_inbound().unwrap();
        transport.start().await.unwrap();

        transport
            .send(json!({"jsonrpc": "2.0", "id": "abc", "method": "ping"}))
            .await
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply["id"], "abc");
    }

    #[tokio::test]
    async fn test_not_found_is_connection_failure() {
        let uri = spawn_http_server(MockServer::default()).await;
        let transport = transport(&format!("{}missing", uri));
        transport.start().await.unwrap();

        let err = transport
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ConnectionFailed(_)));
        assert!(err.to_string().contains("404"));
    }
}

//! WebSocket Transport
//!
//! Wraps a single socket:
//! - sub-protocol list offered in the handshake, bounded by a connect timeout
//! - outbound messages queued while the socket is not open, flushed FIFO on connect
//! - text and binary frames decoded as UTF-8 JSON
//! - explicit `1000 Normal closure` on close
//!
//! There is no ping/pong timer here. Liveness is the protocol layer's job: custom
//! pings were found to conflict with servers that forward frames to another hop.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Transport, TransportType};
use crate::config::{BinaryType, WebSocketConfig};
use crate::events::{McpEvent, McpEventEmitter};
use crate::mcp::error::{McpError, McpResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const NORMAL_CLOSURE_REASON: &str = "Normal closure";

/// Socket ready state, mirroring the browser WebSocket API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// State shared with the reader task
struct Shared {
    uri: String,
    ready_state: AtomicU8,
    events: Arc<McpEventEmitter>,
    inbound_tx: mpsc::UnboundedSender<serde_json::Value>,
}

impl Shared {
    fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ReadyState) -> ReadyState {
        ReadyState::from_u8(self.ready_state.swap(state as u8, Ordering::SeqCst))
    }

    fn emit_error(&self, message: String) {
        self.events.emit(&McpEvent::TransportError {
            transport_type: TransportType::WebSocket,
            message,
        });
    }

    fn emit_close(&self, code: Option<u16>, reason: String) {
        self.events.emit(&McpEvent::TransportClose {
            transport_type: TransportType::WebSocket,
            code,
            reason,
        });
    }

    /// Decode one frame payload and hand it to the session
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(message) => {
                let _ = self.inbound_tx.send(message.clone());
                self.events.emit(&McpEvent::TransportMessage {
                    transport_type: TransportType::WebSocket,
                    message,
                });
            }
            Err(e) => {
                warn!("Dropping malformed WebSocket message from {}: {}", self.uri, e);
                self.emit_error(McpError::ParseError(e.to_string()).to_string());
            }
        }
    }
}

/// WebSocket transport implementation
pub struct WebSocketTransport {
    shared: Arc<Shared>,
    config: WebSocketConfig,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    queue: Mutex<VecDeque<String>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<serde_json::Value>>>,
    negotiated_protocol: Mutex<Option<String>>,
    /// Bumped by `close` so an in-flight connect can tell it lost the race
    close_generation: AtomicU64,
    connect_lock: tokio::sync::Mutex<()>,
}

impl WebSocketTransport {
    /// Create a transport; nothing is dialed until [`connect`](Self::connect)
    pub fn new(uri: impl Into<String>, config: WebSocketConfig, events: Arc<McpEventEmitter>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                uri: uri.into(),
                ready_state: AtomicU8::new(ReadyState::Closed as u8),
                events,
                inbound_tx,
            }),
            config,
            sink: tokio::sync::Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            reader: Mutex::new(None),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            negotiated_protocol: Mutex::new(None),
            close_generation: AtomicU64::new(0),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    /// True only while the socket is open; false as soon as `close` is called
    pub fn is_connection_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Sub-protocol the server accepted, if any
    pub fn negotiated_protocol(&self) -> Option<String> {
        self.negotiated_protocol.lock().clone()
    }

    /// Number of outbound messages waiting for a connection
    pub fn queued_messages(&self) -> usize {
        self.queue.lock().len()
    }

    fn build_request(&self) -> McpResult<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = self
            .shared
            .uri
            .as_str()
            .into_client_request()
            .map_err(|e| McpError::invalid_uri(self.shared.uri.as_str(), e.to_string()))?;

        if !self.config.protocols.is_empty() {
            let protocols = HeaderValue::from_str(&self.config.protocols.join(", "))
                .map_err(|e| McpError::InvalidConfig(format!("Invalid WebSocket protocol list: {}", e)))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", protocols);
        }

        Ok(request)
    }

    /// Open the socket, racing the handshake against the connect timeout.
    /// Queued messages are flushed once the socket is open.
    pub async fn connect(&self) -> McpResult<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connection_open() {
            return Ok(());
        }

        let request = self.build_request()?;
        let generation = self.close_generation.load(Ordering::SeqCst);
        let timeout = self.config.connect_timeout();

        self.shared.set_state(ReadyState::Connecting);
        info!(
            "Connecting to WebSocket {} (protocols: {:?}, binary type: {:?})",
            self.shared.uri, self.config.protocols, self.config.binary_type
        );

        // Dropping the handshake future on timeout drops (and closes) the socket
        let (stream, response) = match tokio::time::timeout(timeout, connect_async(request)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.shared.set_state(ReadyState::Closed);
                warn!("WebSocket connection to {} failed: {}", self.shared.uri, e);
                let err = McpError::from(e);
                self.shared.emit_error(err.to_string());
                return Err(err);
            }
            Err(_) => {
                self.shared.set_state(ReadyState::Closed);
                let timeout_ms = timeout.as_millis() as u64;
                warn!("WebSocket handshake with {} timed out after {}ms", self.shared.uri, timeout_ms);
                let err = McpError::ConnectionTimeout(timeout_ms);
                self.shared.emit_error(err.to_string());
                return Err(err);
            }
        };

        if self.close_generation.load(Ordering::SeqCst) != generation {
            debug!("WebSocket to {} closed while the handshake was in flight", self.shared.uri);
            self.shared.set_state(ReadyState::Closed);
            drop(stream);
            return Err(McpError::ConnectionFailed(
                "WebSocket was closed before the handshake completed".to_string(),
            ));
        }

        // The handshake fails unless the server picked one of the offered protocols
        *self.negotiated_protocol.lock() = response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (sink, stream) = stream.split();
        *self.sink.lock().await = Some(sink);
        self.shared.set_state(ReadyState::Open);

        let shared = self.shared.clone();
        let binary_type = self.config.binary_type;
        if let Some(previous) = self
            .reader
            .lock()
            .replace(tokio::spawn(read_loop(stream, shared, binary_type)))
        {
            previous.abort();
        }

        info!("WebSocket connected to {}", self.shared.uri);
        self.shared.events.emit(&McpEvent::TransportOpen {
            transport_type: TransportType::WebSocket,
            uri: self.shared.uri.clone(),
        });

        if let Err(e) = self.flush_queue().await {
            warn!("Failed to flush queued WebSocket messages: {}", e);
        }
        Ok(())
    }

    /// Send a message, queueing it while the socket is not open
    pub async fn send_message(&self, message: &serde_json::Value) -> McpResult<()> {
        let text = serde_json::to_string(message)?;
        self.queue.lock().push_back(text);

        if !self.is_connection_open() {
            debug!(
                "WebSocket not open, queued message ({} pending)",
                self.queued_messages()
            );
            return Ok(());
        }

        self.flush_queue().await
    }

    /// Drain the queue in FIFO order. A failed send puts the message back at the front.
    async fn flush_queue(&self) -> McpResult<()> {
        let mut sink_guard = self.sink.lock().await;
        let Some(sink) = sink_guard.as_mut() else {
            return Ok(());
        };

        let mut sent = 0usize;
        loop {
            let Some(text) = self.queue.lock().pop_front() else {
                break;
            };
            if let Err(e) = sink.send(Message::Text(text.clone().into())).await {
                self.queue.lock().push_front(text);
                let remaining = self.queued_messages();
                warn!(
                    "WebSocket send failed after {} message(s), {} kept queued: {}",
                    sent, remaining, e
                );
                self.shared.set_state(ReadyState::Closed);
                self.shared.emit_error(format!("send failed: {}", e));
                return Err(McpError::TransportError(format!("WebSocket send failed: {}", e)));
            }
            sent += 1;
        }

        if sent > 0 {
            debug!("Flushed {} WebSocket message(s)", sent);
        }
        Ok(())
    }

    /// Close with `1000 Normal closure`. The ready state flips before any I/O.
    pub async fn close(&self) -> McpResult<()> {
        self.close_generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.shared.set_state(ReadyState::Closed);

        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: NORMAL_CLOSURE_REASON.to_string().into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                debug!("Close frame to {} not delivered: {}", self.shared.uri, e);
            }
            let _ = sink.close().await;
        }

        if previous != ReadyState::Closed {
            info!("WebSocket to {} closed", self.shared.uri);
            self.shared.emit_close(Some(1000), NORMAL_CLOSURE_REASON.to_string());
        }
        Ok(())
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, shared: Arc<Shared>, binary_type: BinaryType) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.dispatch(text.as_str()),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => shared.dispatch(text),
                Err(e) => {
                    warn!("Binary frame ({:?}) is not valid UTF-8: {}", binary_type, e);
                    shared.emit_error(McpError::ParseError(e.to_string()).to_string());
                }
            },
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(f) => (Some(u16::from(f.code)), f.reason.as_str().to_string()),
                    None => (None, String::new()),
                };
                info!("WebSocket {} closed by server ({:?} {})", shared.uri, code, reason);
                if shared.set_state(ReadyState::Closed) != ReadyState::Closed {
                    shared.emit_close(code, reason);
                }
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket {} read error: {}", shared.uri, e);
                shared.emit_error(e.to_string());
                break;
            }
        }
    }

    if shared.set_state(ReadyState::Closed) != ReadyState::Closed {
        shared.emit_close(None, "connection lost".to_string());
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    fn uri(&self) -> &str {
        &self.shared.uri
    }

    async fn start(&self) -> McpResult<()> {
        self.connect().await
    }

    async fn send(&self, message: serde_json::Value) -> McpResult<()> {
        self.send_message(&message).await
    }

    async fn close(&self) -> McpResult<()> {
        WebSocketTransport::close(self).await
    }

    fn is_open(&self) -> bool {
        self.is_connection_open()
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<serde_json::Value>> {
        self.inbound_rx.lock().take()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("uri", &self.shared.uri)
            .field("ready_state", &self.ready_state())
            .field("queued", &self.queued_messages())
            .finish()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

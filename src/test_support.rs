//! In-process mock MCP servers for tests.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response as WsResponse};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::config::WebSocketConfig;

pub const MOCK_SESSION_ID: &str = "mock-session-1";

/// Behaviour switches for the mock server
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    /// Answer Streamable HTTP requests with an SSE body
    pub stream_replies: bool,
    /// Split `tools/list` over two pages
    pub paginate_tools: bool,
    /// Leave `resources` out of the advertised capabilities
    pub no_resources: bool,
    /// Fail `prompts/list` with a JSON-RPC error
    pub fail_prompts: bool,
    /// Report `echo` twice in `tools/list`
    pub duplicate_tools: bool,
}

impl MockServer {
    /// Reply to one client message; `None` for notifications and responses
    pub fn handle(&self, message: &Value) -> Option<Value> {
        let method = message.get("method")?.as_str()?;
        let id = message.get("id")?.clone();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let result = match method {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_page(&params)),
            "resources/list" => Ok(json!({
                "resources": [{"uri": "file:///readme.md", "name": "readme", "mimeType": "text/markdown"}]
            })),
            "prompts/list" if self.fail_prompts => Err((-32603, "prompts unavailable".to_string())),
            "prompts/list" => Ok(json!({
                "prompts": [{"name": "greet", "arguments": [{"name": "who", "required": true}]}]
            })),
            "tools/call" => call_tool(&params),
            other => Err((-32601, format!("Method not found: {}", other))),
        };

        Some(match result {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
            }
        })
    }

    fn initialize_result(&self) -> Value {
        let mut capabilities = json!({"tools": {}, "prompts": {}});
        if !self.no_resources {
            capabilities["resources"] = json!({});
        }
        json!({
            "protocolVersion": "2025-03-26",
            "capabilities": capabilities,
            "serverInfo": {"name": "mock-server", "version": "1.0.0"}
        })
    }

    fn tools_page(&self, params: &Value) -> Value {
        let echo = json!({
            "name": "echo",
            "description": "Echo the input",
            "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
        });
        let add = json!({
            "name": "add",
            "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}}
        });

        if self.paginate_tools {
            return match params.get("cursor").and_then(Value::as_str) {
                None => json!({"tools": [echo], "nextCursor": "page-2"}),
                Some(_) => json!({"tools": [add]}),
            };
        }
        if self.duplicate_tools {
            return json!({"tools": [echo.clone(), add, echo]});
        }
        json!({"tools": [echo, add]})
    }
}

fn call_tool(params: &Value) -> Result<Value, (i32, String)> {
    let args = &params["arguments"];
    match params["name"].as_str() {
        Some("echo") => Ok(json!({
            "content": [{"type": "text", "text": args["text"].as_str().unwrap_or_default()}]
        })),
        Some("add") => {
            let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
            Ok(json!({
                "content": [{"type": "text", "text": sum.to_string()}],
                "structuredContent": {"sum": sum}
            }))
        }
        other => Err((-32602, format!("Unknown tool: {}", other.unwrap_or("<none>")))),
    }
}

async fn bind() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

// Streamable HTTP

async fn http_post(State(server): State<Arc<MockServer>>, Json(body): Json<Value>) -> Response {
    let session = [("mcp-session-id", MOCK_SESSION_ID)];
    match server.handle(&body) {
        None => (StatusCode::ACCEPTED, session).into_response(),
        Some(reply) if server.stream_replies => (
            [("content-type", "text/event-stream"), ("mcp-session-id", MOCK_SESSION_ID)],
            format!("event: message\ndata: {}\n\n", reply),
        )
            .into_response(),
        Some(reply) => (session, Json(reply)).into_response(),
    }
}

async fn http_delete() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Streamable HTTP server on `/`; returns its URL
pub async fn spawn_http_server(server: MockServer) -> String {
    let app = Router::new()
        .route("/", post(http_post).delete(http_delete))
        .with_state(Arc::new(server));
    let listener = bind().await;
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}/", addr)
}

// Legacy SSE

#[derive(Default)]
struct SseState {
    server: MockServer,
    next_session: AtomicUsize,
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
}

async fn sse_stream(
    State(state): State<Arc<SseState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = state.next_session.fetch_add(1, Ordering::SeqCst).to_string();
    let (tx, rx) = mpsc::unbounded_channel::<Value>();
    state.sessions.lock().insert(session.clone(), tx);

    let endpoint = stream::once(async move {
        Ok(Event::default()
            .event("endpoint")
            .data(format!("/messages?sessionId={}", session)))
    });
    let messages = UnboundedReceiverStream::new(rx)
        .map(|message| Ok(Event::default().event("message").data(message.to_string())));
    Sse::new(endpoint.chain(messages))
}

async fn sse_post(
    State(state): State<Arc<SseState>>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    let Some(session) = query.get("sessionId") else {
        return StatusCode::BAD_REQUEST;
    };
    let Some(tx) = state.sessions.lock().get(session).cloned() else {
        return StatusCode::NOT_FOUND;
    };
    if let Some(reply) = state.server.handle(&body) {
        let _ = tx.send(reply);
    }
    StatusCode::ACCEPTED
}

/// Legacy SSE server (`GET /sse`, `POST /messages`); returns the stream URL
pub async fn spawn_sse_server(server: MockServer) -> String {
    let state = Arc::new(SseState {
        server,
        ..SseState::default()
    });
    let app = Router::new()
        .route("/sse", get(sse_stream))
        .route("/messages", post(sse_post))
        .with_state(state);
    let listener = bind().await;
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}/sse", addr)
}

// WebSocket

/// WebSocket server that selects `mcp-v1` when offered and hands each socket to `handler`
pub async fn spawn_ws_server<F, Fut>(handler: F) -> String
where
    F: Fn(WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = bind().await;
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let callback = |request: &Request, mut response: WsResponse| -> Result<WsResponse, ErrorResponse> {
                    let offered = request
                        .headers()
                        .get("Sec-WebSocket-Protocol")
                        .and_then(|v| v.to_str().ok())
                        .map_or(false, |v| v.split(',').any(|p| p.trim() == "mcp-v1"));
                    if offered {
                        response
                            .headers_mut()
                            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mcp-v1"));
                    }
                    Ok(response)
                };
                if let Ok(ws) = accept_hdr_async(stream, callback).await {
                    handler(ws).await;
                }
            });
        }
    });

    format!("ws://{}/message", addr)
}

/// WebSocket server speaking the mock MCP dialect
pub async fn spawn_ws_mcp_server(server: MockServer) -> String {
    let server = Arc::new(server);
    spawn_ws_server(move |mut ws| {
        let server = server.clone();
        async move {
            while let Some(Ok(frame)) = ws.next().await {
                let Message::Text(text) = frame else {
                    continue;
                };
                let Ok(message) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if let Some(reply) = server.handle(&message) {
                    if futures::SinkExt::send(&mut ws, Message::Text(reply.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    })
    .await
}

/// WebSocket config with a short handshake timeout
pub fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        connect_timeout_ms: 5_000,
        ..WebSocketConfig::default()
    }
}

/// An address nothing listens on
pub async fn unused_addr() -> std::net::SocketAddr {
    let listener = bind().await;
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

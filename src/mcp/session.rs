//! MCP protocol session
//!
//! JSON-RPC correlation over any [`Transport`]: the initialize handshake, listing
//! calls with cursor pagination, tool invocation and ping.

use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::{McpError, McpResult};
use super::types::*;
use crate::transport::{Transport, TransportType};

/// Upper bound on pages fetched by a single list call
pub const MAX_LIST_PAGES: usize = 100;

type PendingMap = DashMap<u64, oneshot::Sender<JsonRpcResponse>>;

/// A live protocol session over one transport
pub struct McpSession {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
    initialize_result: RwLock<Option<InitializeResult>>,
    closed: AtomicBool,
}

impl McpSession {
    /// Start the transport, spawn the inbound reader and run the initialize handshake
    pub async fn connect(transport: Arc<dyn Transport>, request_timeout: Duration) -> McpResult<Self> {
        let inbound = transport.take_inbound().ok_or_else(|| {
            McpError::Internal("transport inbound channel already taken".to_string())
        })?;

        transport.start().await?;

        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let reader = tokio::spawn(read_inbound(inbound, transport.clone(), pending.clone()));

        let session = Self {
            transport,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader: Mutex::new(Some(reader)),
            initialize_result: RwLock::new(None),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = session.initialize().await {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn initialize(&self) -> McpResult<()> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let result: InitializeResult = self.request("initialize", Some(params)).await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            warn!(
                "Protocol version mismatch: offered {}, server chose {}",
                MCP_PROTOCOL_VERSION, result.protocol_version
            );
        }
        info!(
            "Connected to MCP server: {} (protocol: {})",
            result.server_info.name, result.protocol_version
        );

        *self.initialize_result.write() = Some(result);
        self.notify("notifications/initialized", None).await
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport.transport_type()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.initialize_result.read().as_ref().map(|r| r.server_info.clone())
    }

    pub fn server_capabilities(&self) -> ServerCapabilities {
        self.initialize_result
            .read()
            .as_ref()
            .map(|r| r.capabilities.clone())
            .unwrap_or_default()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.initialize_result.read().as_ref().map(|r| r.protocol_version.clone())
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.is_open()
    }

    /// Send a request and decode its result
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> McpResult<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = JsonRpcRequest::new(method, params, id);
        debug!("Sending MCP request: {} (id: {})", method, id);
        if let Err(e) = self.transport.send(serde_json::to_value(&request)?).await {
            self.pending.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(McpError::NotConnected),
            Err(_) => {
                self.pending.remove(&id);
                return Err(McpError::RequestTimeout {
                    method: method.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                });
            }
        };

        if let Some(error) = response.error {
            return Err(McpError::JsonRpcError {
                code: error.code,
                message: error.message,
            });
        }
        let result = response
            .result
            .ok_or_else(|| McpError::InvalidResponse(format!("Missing result for {}", method)))?;
        serde_json::from_value(result).map_err(McpError::from)
    }

    /// Send a notification; no reply is expected
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> McpResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected);
        }
        let notification = JsonRpcNotification::new(method, params);
        self.transport.send(serde_json::to_value(&notification)?).await
    }

    /// Fetch every page of a list method
    async fn list_all<P, T>(
        &self,
        method: &str,
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> McpResult<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let (page, next) = split(self.request::<P>(method, params).await?);
            items.extend(page);
            match next {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        warn!("{} returned more than {} pages; truncating", method, MAX_LIST_PAGES);
        Ok(items)
    }

    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        self.list_all("tools/list", |p: ToolsListResult| (p.tools, p.next_cursor))
            .await
    }

    pub async fn list_resources(&self) -> McpResult<Vec<Resource>> {
        self.list_all("resources/list", |p: ResourcesListResult| {
            (p.resources, p.next_cursor)
        })
        .await
    }

    pub async fn list_prompts(&self) -> McpResult<Vec<Prompt>> {
        self.list_all("prompts/list", |p: PromptsListResult| (p.prompts, p.next_cursor))
            .await
    }

    pub async fn call_tool(&self, name: &str, arguments: ToolArguments) -> McpResult<ToolCallResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        self.request("tools/call", Some(serde_json::to_value(&params)?))
            .await
    }

    pub async fn ping(&self) -> McpResult<()> {
        self.request::<serde_json::Value>("ping", None).await?;
        Ok(())
    }

    /// Stop the reader and fail every pending request with `NotConnected`.
    /// The transport itself is left to its owner.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.pending.clear();
        debug!("MCP session over {} closed", self.transport.transport_type());
    }
}

async fn read_inbound(
    mut inbound: mpsc::UnboundedReceiver<serde_json::Value>,
    transport: Arc<dyn Transport>,
    pending: Arc<PendingMap>,
) {
    while let Some(message) = inbound.recv().await {
        match InboundMessage::classify(message) {
            Some(InboundMessage::Response(response)) => {
                let waiter = response.id.as_u64().and_then(|id| pending.remove(&id));
                match waiter {
                    Some((_, tx)) => {
                        let _ = tx.send(response);
                    }
                    None => debug!("Dropping response with unknown id {}", response.id),
                }
            }
            Some(InboundMessage::Request(request)) => {
                let reply = if request.method == "ping" {
                    serde_json::json!({"jsonrpc": "2.0", "id": request.id, "result": {}})
                } else {
                    debug!("Rejecting server request {}", request.method);
                    match serde_json::to_value(JsonRpcResponse::method_not_found(
                        request.id,
                        &request.method,
                    )) {
                        Ok(reply) => reply,
                        Err(_) => continue,
                    }
                };
                if let Err(e) = transport.send(reply).await {
                    warn!("Failed to answer server request: {}", e);
                }
            }
            Some(InboundMessage::Notification(notification)) => {
                debug!("Server notification: {}", notification.method);
            }
            None => warn!("Ignoring message that is not JSON-RPC"),
        }
    }
    debug!("Inbound channel closed");
}

impl Drop for McpSession {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("transport", &self.transport.transport_type())
            .field("uri", &self.transport.uri())
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamableHttpConfig;
    use crate::events::McpEventEmitter;
    use crate::test_support::{spawn_http_server, MockServer};
    use crate::transport::StreamableHttpTransport;
    use serde_json::json;

    async fn session(server: MockServer) -> McpSession {
        let uri = spawn_http_server(server).await;
        let transport = StreamableHttpTransport::new(
            uri,
            StreamableHttpConfig::default(),
            Arc::new(McpEventEmitter::new()),
        )
        .unwrap();
        McpSession::connect(Arc::new(transport), Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_handshake_captures_server_info() {
        let session = session(MockServer::default()).await;
        assert_eq!(session.server_info().unwrap().name, "mock-server");
        assert_eq!(session.protocol_version().as_deref(), Some(MCP_PROTOCOL_VERSION));
        assert!(session.server_capabilities().tools.is_some());
        session.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let server = MockServer {
            paginate_tools: true,
            ..MockServer::default()
        };
        let session = session(server).await;
        let tools = session.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "add"]);
    }

    #[tokio::test]
    async fn test_call_tool_and_json_rpc_error() {
        let session = session(MockServer::default()).await;

        let mut args = ToolArguments::new();
        args.insert("text".to_string(), json!("hi"));
        let result = session.call_tool("echo", args).await.unwrap();
        assert_eq!(result.text(), "hi");

        let err = session.call_tool("missing", ToolArguments::new()).await.unwrap_err();
        assert!(matches!(err, McpError::JsonRpcError { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_requests() {
        let session = session(MockServer::default()).await;
        session.close().await;
        session.close().await;
        assert!(matches!(session.ping().await, Err(McpError::NotConnected)));
        assert!(!session.is_open());
    }
}

//! MCP Server builder utilities.
//!
//! This module runs any [`RpcHandler`] over the configured transport with
//! graceful shutdown.
//!
//! # Example
//!
//! ```ignore
//! use edmcp_common::server::McpServerBuilder;
//! use edmcp_common::transport::Transport;
//!
//! let handler = MyHandler::new();
//! McpServerBuilder::new(handler)
//!     .with_transport(Transport::Stdio)
//!     .run()
//!     .await?;
//! ```

use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse, parse_request};
use crate::transport::Transport;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Request, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Errors that can occur when running an MCP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified port
    #[error("Failed to bind to port {port}: {message}")]
    BindFailed { port: u16, message: String },

    /// Transport error during communication
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A JSON-RPC method dispatcher that can be served over any transport.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Handle one parsed request. Must always produce a response carrying
    /// the request's id.
    async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse;

    /// Name reported by the HTTP info endpoint.
    fn server_name(&self) -> &str;

    /// Version reported by the HTTP info endpoint.
    fn server_version(&self) -> &str;
}

/// Parse a raw message and dispatch it.
pub async fn handle_message<H>(handler: &H, body: &str) -> JsonRpcResponse
where
    H: RpcHandler + ?Sized,
{
    match parse_request(body) {
        Ok(request) => handler.handle(request).await,
        Err(response) => {
            warn!(code = ?response.error_code(), "Rejected malformed JSON-RPC message");
            response
        }
    }
}

/// Builder for configuring and running MCP servers.
pub struct McpServerBuilder<H> {
    handler: Arc<H>,
    transport: Transport,
    shutdown_rx: Option<oneshot::Receiver<()>>,
}

impl<H> McpServerBuilder<H>
where
    H: RpcHandler,
{
    /// Create a new server builder with the given handler.
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            transport: Transport::default(),
            shutdown_rx: None,
        }
    }

    /// Set the transport mode for the server.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Set a shutdown signal receiver for graceful shutdown.
    ///
    /// When the sender is dropped or a message is sent, the server
    /// will initiate graceful shutdown.
    pub fn with_shutdown(mut self, shutdown_rx: oneshot::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Run the MCP server with the configured transport.
    ///
    /// This method blocks until the server is shut down (via signal, shutdown
    /// channel, or end of stdin for the stdio transport).
    pub async fn run(self) -> Result<(), ServerError> {
        info!(transport = %self.transport, "Starting MCP server");

        match self.transport {
            Transport::Stdio => self.run_stdio().await,
            Transport::Http { port } => self.run_http(port).await,
        }
    }

    /// Run the server with stdio transport.
    ///
    /// Each line is dispatched on its own task and responses are written in
    /// completion order. Notifications get no response.
    async fn run_stdio(self) -> Result<(), ServerError> {
        let Self {
            handler,
            shutdown_rx,
            ..
        } = self;

        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(response) = rx.recv().await {
                let mut payload = match serde_json::to_vec(&response) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                        continue;
                    }
                };
                payload.push(b'\n');
                if let Err(e) = stdout.write_all(&payload).await {
                    error!(error = %e, "Failed to write to stdout");
                    break;
                }
                let _ = stdout.flush().await;
            }
        });

        let reader = async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let handler = Arc::clone(&handler);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = match parse_request(&line) {
                        Ok(request) if request.is_notification() => {
                            debug!(method = %request.method, "Received notification");
                            handler.handle(request).await;
                            return;
                        }
                        Ok(request) => handler.handle(request).await,
                        Err(response) => response,
                    };
                    let _ = tx.send(response);
                });
            }
            drop(tx);
            Ok::<(), ServerError>(())
        };

        let shutdown_future = async {
            if let Some(rx) = shutdown_rx {
                let _ = rx.await;
            } else {
                wait_for_shutdown_signal().await;
            }
        };

        tokio::select! {
            result = reader => {
                result?;
                info!("stdin closed, draining in-flight requests");
                let _ = writer.await;
                Ok(())
            }
            _ = shutdown_future => {
                info!("Received shutdown signal, stopping server");
                Ok(())
            }
        }
    }

    /// Run the server with the HTTP transport.
    async fn run_http(self, port: u16) -> Result<(), ServerError> {
        let router = router(Arc::clone(&self.handler));

        let bind_addr = format!("0.0.0.0:{}", port);
        let tcp_listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                port,
                message: e.to_string(),
            })?;

        info!(port, "HTTP server listening");

        // Set up graceful shutdown
        let shutdown_future = async {
            if let Some(rx) = self.shutdown_rx {
                let _ = rx.await;
            } else {
                wait_for_shutdown_signal().await;
            }
        };

        axum::serve(tcp_listener, router)
            .with_graceful_shutdown(shutdown_future)
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the HTTP router for a handler.
///
/// - `POST /mcp`: JSON-RPC request/response
/// - `GET /mcp`: server name, version and protocols
/// - `GET /mcp/ws`: WebSocket, one JSON-RPC request per text frame
/// - `GET /health`: liveness
pub fn router<H: RpcHandler>(handler: Arc<H>) -> Router {
    Router::new()
        .route("/mcp", post(http_rpc::<H>).get(http_info::<H>))
        .route("/mcp/ws", get(ws_upgrade::<H>))
        .route("/health", get(health))
        .layer(middleware::from_fn(log_request))
        .with_state(handler)
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let content_type = request
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let response = next.run(request).await;
    info!(
        %method,
        path = %path,
        content_type = %content_type,
        status = response.status().as_u16(),
        "HTTP request"
    );
    response
}

async fn http_rpc<H: RpcHandler>(State(handler): State<Arc<H>>, body: String) -> Response {
    debug!(body_len = body.len(), "Received JSON-RPC body");

    match parse_request(&body) {
        Ok(request) => {
            let response = handler.handle(request).await;
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(response) => {
            warn!(code = ?response.error_code(), "Rejected malformed JSON-RPC body");
            (StatusCode::BAD_REQUEST, Json(response)).into_response()
        }
    }
}

async fn http_info<H: RpcHandler>(State(handler): State<Arc<H>>) -> Response {
    Json(serde_json::json!({
        "name": handler.server_name(),
        "version": handler.server_version(),
        "protocols": ["json-rpc"],
    }))
    .into_response()
}

async fn health() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn ws_upgrade<H: RpcHandler>(
    State(handler): State<Arc<H>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| ws_session(socket, handler))
}

/// Serve one WebSocket connection. Requests are answered in the order they
/// arrive.
async fn ws_session<H: RpcHandler>(mut socket: WebSocket, handler: Arc<H>) {
    debug!("WebSocket session opened");

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "WebSocket receive failed");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let response = handle_message(handler.as_ref(), text.as_str()).await;
                let payload = match serde_json::to_string(&response) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                        continue;
                    }
                };
                if let Err(e) = socket.send(Message::Text(payload.into())).await {
                    warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!("WebSocket session closed");
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM");
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT");
                    }
                }
            }
            _ => {
                warn!("Failed to register signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
    }
}

/// Convenience function to set up graceful shutdown handling.
///
/// Returns a sender that can be used to trigger shutdown programmatically,
/// and a receiver to pass to the server builder.
pub fn shutdown_channel() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
    oneshot::channel()
}

//! HTTP event-callback transport.
//!
//! Feishu POSTs events to a public URL; this listener answers the
//! `url_verification` handshake, checks the verification token and hands
//! message events to the dispatcher on a background task so the HTTP
//! response is never held up by agent work.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relay_channels::{ChannelError, InboundSink, InboundTransport, TransportStatus};
use relay_core::config::FeishuConfig;

use crate::parse::parse_message_event;
use crate::types::{CallbackEnvelope, MessageEvent, MESSAGE_RECEIVE_EVENT};

struct WebhookState {
    verification_token: Option<String>,
    bot_open_id: Option<String>,
    sink: Arc<dyn InboundSink>,
}

pub struct WebhookTransport {
    listen: String,
    path: String,
    state: Arc<WebhookState>,
    status: TransportStatus,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl WebhookTransport {
    pub fn new(cfg: &FeishuConfig, sink: Arc<dyn InboundSink>) -> Self {
        Self {
            listen: cfg.listen.clone(),
            path: cfg.event_path.clone(),
            state: Arc::new(WebhookState {
                verification_token: cfg.verification_token.clone().filter(|t| !t.is_empty()),
                bot_open_id: cfg.bot_open_id.clone().filter(|t| !t.is_empty()),
                sink,
            }),
            status: TransportStatus::Disconnected,
            local_addr: None,
            shutdown: None,
            server: None,
        }
    }

    /// Address actually bound, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn router(&self) -> Router {
        Router::new()
            .route(&self.path, post(handle_callback))
            .with_state(Arc::clone(&self.state))
    }
}

#[async_trait]
impl InboundTransport for WebhookTransport {
    fn name(&self) -> &str {
        "feishu-webhook"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.status = TransportStatus::Connecting;
        let listener = match tokio::net::TcpListener::bind(&self.listen).await {
            Ok(l) => l,
            Err(e) => {
                let msg = format!("bind {}: {e}", self.listen);
                self.status = TransportStatus::Error(msg.clone());
                return Err(ChannelError::ConnectionFailed(msg));
            }
        };
        let addr = listener
            .local_addr()
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let (tx, rx) = oneshot::channel::<()>();
        let app = self.router();
        self.server = Some(tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "webhook server stopped with error");
            }
        }));

        info!(addr = %addr, path = %self.path, "Feishu event callback listening");
        self.shutdown = Some(tx);
        self.local_addr = Some(addr);
        self.status = TransportStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
        self.status = TransportStatus::Disconnected;
        info!("Feishu event callback stopped");
        Ok(())
    }

    fn status(&self) -> TransportStatus {
        self.status.clone()
    }
}

type Reject = (StatusCode, Json<Value>);

fn reject(status: StatusCode, error: &str) -> Reject {
    (status, Json(json!({ "error": error })))
}

async fn handle_callback(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> Result<Json<Value>, Reject> {
    let envelope: CallbackEnvelope = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "invalid JSON in event callback");
        reject(StatusCode::BAD_REQUEST, "invalid JSON body")
    })?;

    if envelope.encrypt.is_some() {
        warn!("encrypted event received; clear the app's encrypt key to use this listener");
        return Err(reject(StatusCode::BAD_REQUEST, "encrypted events are not supported"));
    }

    if let Some(expected) = state.verification_token.as_deref() {
        if envelope.verification_token() != Some(expected) {
            warn!("event callback with wrong verification token");
            return Err(reject(StatusCode::UNAUTHORIZED, "invalid verification token"));
        }
    }

    if envelope.is_url_verification() {
        info!("answering url_verification challenge");
        return Ok(Json(json!({ "challenge": envelope.challenge.unwrap_or_default() })));
    }

    let event_type = envelope.event_type().unwrap_or_default().to_string();
    if event_type != MESSAGE_RECEIVE_EVENT {
        debug!(event_type = %event_type, "ignoring event");
        return Ok(Json(json!({ "ok": true })));
    }

    let event: MessageEvent = envelope
        .event
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "missing event body"))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| {
                warn!(error = %e, "malformed message event");
                reject(StatusCode::BAD_REQUEST, "malformed message event")
            })
        })?;

    let inbound = parse_message_event(&event, state.bot_open_id.as_deref());
    debug!(chat_id = %inbound.chat_id, message_id = %inbound.message_id, "message event received");

    let sink = Arc::clone(&state.sink);
    tokio::spawn(async move { sink.dispatch(inbound).await });

    Ok(Json(json!({ "ok": true })))
}

//! # Delivery Server
//!
//! HTTP listener for overlay clients:
//! - `GET /ws?channel=<c>&token=<t>` upgrades to the overlay WebSocket
//! - `GET /health` answers `ok`
//!
//! Each socket gets a write task fed by an unbounded channel; the
//! [`DeliveryHub`] only ever talks to that channel.

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::application::delivery::{ClientHandle, ClientMessage, DeliveryHub};
use crate::domain::protocol::{CLOSE_POLICY_VIOLATION, ClientFrame, ServerFrame};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    channel: Option<String>,
    token: Option<String>,
}

impl ConnectQuery {
    /// Both parameters, when present and non-empty.
    fn credentials(self) -> Option<(String, String)> {
        let channel = self.channel.filter(|c| !c.trim().is_empty())?;
        let token = self.token.filter(|t| !t.is_empty())?;
        Some((channel, token))
    }
}

pub fn router(hub: DeliveryHub) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .route("/health", get(health_handler))
        .with_state(hub)
}

pub async fn serve(bind: &str, hub: DeliveryHub) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind delivery server to {bind}"))?;
    info!("Delivery server listening on {}", bind);
    axum::serve(listener, router(hub))
        .await
        .context("Delivery server stopped")
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(hub): State<DeliveryHub>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, hub, query))
}

/// Translate a hub instruction into a socket frame. The flag marks the last
/// frame the write task will send.
fn to_ws_message(msg: ClientMessage) -> (Message, bool) {
    match msg {
        ClientMessage::Frame(text) => (Message::Text(text.into()), false),
        ClientMessage::Ping => (Message::Ping(Bytes::new()), false),
        ClientMessage::Close { code, reason } => (
            Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
            true,
        ),
    }
}

async fn handle_connection(socket: WebSocket, hub: DeliveryHub, query: ConnectQuery) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let handle = ClientHandle::new(client_tx);
    let conn_id = handle.conn_id().to_string();

    let write_conn_id = conn_id.clone();
    let mut write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            let (frame, last) = to_ws_message(msg);
            if ws_tx.send(frame).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
            if last {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let Some((channel, token)) = query.credentials() else {
        info!(conn_id = %conn_id, "ws: missing channel or token");
        handle.close(CLOSE_POLICY_VIOLATION, "missing channel or token");
        drop(handle);
        let _ = write_handle.await;
        return;
    };

    if hub.register(&channel, handle.clone(), &token).await.is_err() {
        // The hub already queued the close frame.
        drop(handle);
        let _ = write_handle.await;
        return;
    }

    let connections = hub.connection_count(&channel).await;
    debug!(channel = %channel, connections, "ws: registered");

    let read_loop = async {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(ClientFrame::Ping) => {
                        hub.mark_alive(&channel, &conn_id).await;
                        handle.send_frame(&ServerFrame::Pong {
                            ts: chrono::Utc::now().timestamp_millis(),
                        });
                    }
                    Err(e) => debug!(conn_id = %conn_id, "ws: ignoring unknown frame: {}", e),
                },
                Ok(Message::Pong(_)) => hub.mark_alive(&channel, &conn_id).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(conn_id = %conn_id, error = %e, "ws: read error");
                    break;
                }
            }
        }
    };

    // Whichever side ends first (client hang-up or a server-side close) ends the connection.
    tokio::select! {
        _ = read_loop => {},
        _ = &mut write_handle => {},
    }

    hub.unregister(&channel, &conn_id).await;
    write_handle.abort();
    info!(channel = %channel, conn_id = %conn_id, "ws: connection closed");
}

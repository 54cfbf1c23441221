//! HTTP surface: the `/ws` signaling endpoint and `/health`.
//!
//! Each WebSocket connection runs one receive loop that routes parsed
//! messages into the controller, plus one writer task that serializes
//! queued messages back onto the socket. The dispatcher holds no state of
//! its own; only the first `join` on a connection establishes a peer.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::peer::Peer;
use crate::sfu::SfuController;
use crate::signal::SignalMessage;
use crate::types::{PeerId, RoomId};
use crate::ServerConfig;

pub fn router(controller: Arc<SfuController>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(controller)
}

/// Bind and serve until the listener fails.
pub async fn serve(config: &ServerConfig, controller: Arc<SfuController>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.listen_address()).await?;
    info!(address = %config.listen_address(), "signaling server listening");
    axum::serve(listener, router(controller)).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_handler(
    State(controller): State<Arc<SfuController>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, controller))
}

async fn handle_socket(socket: WebSocket, controller: Arc<SfuController>) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<SignalMessage>();

    // Writer task: one JSON object per text frame, writes serialized here.
    tokio::spawn(async move {
        while let Some(msg) = signal_rx.recv().await {
            match msg.to_json() {
                Ok(json) => {
                    if ws_sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize signal message"),
            }
        }
    });

    let mut peer: Option<Arc<Peer>> = None;

    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let msg = match SignalMessage::parse(&text) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, "ignoring malformed signal message");
                continue;
            }
        };

        match msg {
            SignalMessage::Join { room, client_id } => {
                if peer.is_some() {
                    warn!(client_id, "duplicate join on one connection, ignoring");
                    continue;
                }
                match controller
                    .handle_join(RoomId::from(room), PeerId::from(client_id), signal_tx.clone())
                    .await
                {
                    Ok(joined) => peer = Some(joined),
                    Err(err) => {
                        warn!(error = %err, "join failed, closing connection");
                        break;
                    }
                }
            }
            SignalMessage::Offer { sdp } => {
                if let Some(peer) = &peer {
                    controller.handle_offer(peer, sdp).await;
                }
            }
            SignalMessage::Answer { sdp } => {
                if let Some(peer) = &peer {
                    controller.handle_answer(peer, sdp).await;
                }
            }
            SignalMessage::Candidate { candidate } => {
                if let Some(peer) = &peer {
                    controller.handle_candidate(peer, candidate).await;
                }
            }
            SignalMessage::Screenshot {
                target_id, data, ..
            } => {
                if let (Some(peer), Some(target_id)) = (&peer, target_id) {
                    controller
                        .handle_screenshot(peer, &PeerId::from(target_id), data)
                        .await;
                }
            }
            SignalMessage::PeerJoined { .. }
            | SignalMessage::PeerLeft { .. }
            | SignalMessage::Unknown => {
                debug!("ignoring unexpected signal message");
            }
        }
    }

    if let Some(peer) = peer {
        controller.disconnect(&peer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health_returns_ok_json() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn router_builds_with_both_routes() {
        let controller = SfuController::new(ServerConfig::default());
        let _router = router(controller);
    }
}

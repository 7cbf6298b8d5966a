use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::signal::{ClientEvent, RelayKind, RoomRegistry, ServerEvent};

pub async fn handle_signal_websocket(websocket: WebSocket, registry: Arc<RoomRegistry>) {
    let conn_id = generate_conn_id();
    tracing::info!(conn_id = %conn_id, "New signaling connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Spawn task to push registry events out to the client
    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::text(text)).await {
                        tracing::error!(error = %e, "Failed to send WebSocket message");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode server event");
                }
            }
        }
    });

    // The client learns its transport-assigned id before anything else
    let _ = tx.send(ServerEvent::Welcome {
        id: conn_id.clone(),
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                if let Ok(text) = message.to_str() {
                    handle_client_event(&registry, &conn_id, &tx, text).await;
                }
            }
            Err(e) => {
                tracing::error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    if let Some((room_id, was_host)) = registry.leave(&conn_id).await {
        tracing::info!(
            conn_id = %conn_id,
            room_id = %room_id,
            was_host = was_host,
            "Member disconnected"
        );
    }
    sender_task.abort();
    tracing::info!(conn_id = %conn_id, "Signaling connection closed");
}

async fn handle_client_event(
    registry: &Arc<RoomRegistry>,
    conn_id: &str,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    text: &str,
) {
    tracing::debug!(conn_id = %conn_id, "Received signaling event: {}", text);

    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::JoinRoom { room_id, user_id }) => {
            if let Err(e) = registry.join(&room_id, conn_id, &user_id, tx.clone()).await {
                tracing::warn!(
                    conn_id = %conn_id,
                    room_id = %room_id,
                    error = %e,
                    "Join rejected"
                );
            }
        }
        Ok(ClientEvent::Offer { to, sdp }) => {
            registry.relay(RelayKind::Offer, conn_id, &to, sdp).await;
        }
        Ok(ClientEvent::Answer { to, sdp }) => {
            registry.relay(RelayKind::Answer, conn_id, &to, sdp).await;
        }
        Ok(ClientEvent::IceCandidate { to, candidate }) => {
            registry
                .relay(RelayKind::IceCandidate, conn_id, &to, candidate)
                .await;
        }
        Ok(ClientEvent::LeaveRoom) => {
            registry.leave(conn_id).await;
        }
        Err(e) => {
            tracing::error!(
                conn_id = %conn_id,
                error = %e,
                raw_message = %text,
                "Failed to parse client event"
            );
        }
    }
}

pub(crate) fn generate_conn_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_ids_are_unique_and_url_safe() {
        let a = generate_conn_id();
        let b = generate_conn_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

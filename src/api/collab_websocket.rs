use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::collab::{CollabClientEvent, CollabHub, CollabServerEvent, SessionKey};

/// Session scoping carried as query parameters at connect time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollabQuery {
    pub assessment_id: String,
    pub question_id: String,
    pub candidate_id: String,
}

pub async fn handle_collab_websocket(
    websocket: WebSocket,
    hub: Arc<CollabHub>,
    query: CollabQuery,
) {
    let conn_id = super::signal_websocket::generate_conn_id();
    let key = SessionKey::new(&query.assessment_id, &query.question_id);
    tracing::info!(
        conn_id = %conn_id,
        session = %key,
        candidate_id = %query.candidate_id,
        "New collab connection established"
    );

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<CollabServerEvent>();

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
                    tracing::error!(error = %e, "Failed to encode collab event");
                }
            }
        }
    });

    // The query parameters are authoritative; the subscriber gets its
    // initial state without waiting for an explicit join-room event.
    if let Err(e) = hub
        .join(key.clone(), &conn_id, &query.candidate_id, tx.clone())
        .await
    {
        tracing::error!(conn_id = %conn_id, session = %key, error = %e, "Collab join failed");
    }

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                if let Ok(text) = message.to_str() {
                    handle_collab_event(&hub, &conn_id, &tx, text).await;
                }
            }
            Err(e) => {
                tracing::error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    hub.leave(&conn_id).await;
    sender_task.abort();
    tracing::info!(conn_id = %conn_id, session = %key, "Collab connection closed");
}

async fn handle_collab_event(
    hub: &Arc<CollabHub>,
    conn_id: &str,
    tx: &mpsc::UnboundedSender<CollabServerEvent>,
    text: &str,
) {
    match serde_json::from_str::<CollabClientEvent>(text) {
        Ok(CollabClientEvent::JoinRoom {
            assessment_id,
            question_id,
            candidate_id,
        }) => {
            // Idempotent for an already-subscribed connection
            let key = SessionKey::new(&assessment_id, &question_id);
            if let Err(e) = hub.join(key, conn_id, &candidate_id, tx.clone()).await {
                tracing::warn!(conn_id = %conn_id, error = %e, "Collab join rejected");
            }
        }
        Ok(CollabClientEvent::CodeChange { code }) => {
            if let Err(e) = hub.submit_code(conn_id, code).await {
                tracing::warn!(conn_id = %conn_id, error = %e, "Code change rejected");
            }
        }
        Ok(CollabClientEvent::WhiteboardChange { whiteboard }) => {
            if let Err(e) = hub.submit_whiteboard(conn_id, whiteboard).await {
                tracing::warn!(conn_id = %conn_id, error = %e, "Whiteboard change rejected");
            }
        }
        Err(e) => {
            tracing::error!(
                conn_id = %conn_id,
                error = %e,
                raw_message = %text,
                "Failed to parse collab event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_requires_all_three_parameters() {
        let full: CollabQuery = serde_urlencoded::from_str(
            "assessmentId=a-1&questionId=q-7&candidateId=u-42",
        )
        .unwrap();
        assert_eq!(full.assessment_id, "a-1");
        assert_eq!(full.question_id, "q-7");
        assert_eq!(full.candidate_id, "u-42");

        let partial =
            serde_urlencoded::from_str::<CollabQuery>("assessmentId=a-1&questionId=q-7");
        assert!(partial.is_err());
    }
}

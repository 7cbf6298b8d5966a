use std::collections::HashMap;
use std::sync::Arc;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::error::{Result, RtcError};
use super::messages::{RelayKind, ServerEvent};

/// A connected call participant.
#[derive(Debug, Clone)]
pub struct Member {
    /// Transport-assigned connection identifier. Opaque, changes across
    /// reconnects.
    pub conn_id: String,
    /// Application-level user identifier, stable across reconnects.
    pub user_id: String,
    pub room_id: String,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

/// A named call context grouping participants.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    /// Connection ids in join order.
    pub members: Vec<String>,
    /// The hub of the star topology. None until assigned, and cleared when
    /// the host leaves. The registry does not auto-promote a replacement.
    pub host: Option<String>,
}

/// Room membership, host election, and verbatim relay of signaling payloads.
///
/// Holds no durable state: a process restart drops every room and clients
/// must rejoin from scratch.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
    members: RwLock<HashMap<String, Member>>,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            members: RwLock::new(HashMap::new()),
        })
    }

    /// Register a member in a room, creating the room on first join.
    ///
    /// The first member of a host-less room is elected host and receives
    /// `host-assigned`. Everyone else receives `host-info` plus the current
    /// member list, while existing members learn about the newcomer via
    /// `user-connected`.
    pub async fn join(
        &self,
        room_id: &str,
        conn_id: &str,
        user_id: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let mut members = self.members.write().await;

        if members.contains_key(conn_id) {
            tracing::warn!(conn_id = %conn_id, "Member already joined, ignoring duplicate join");
            return Err(RtcError::MemberAlreadyJoined(conn_id.to_string()));
        }

        let room = rooms.entry(room_id.to_string()).or_insert_with(|| Room {
            id: room_id.to_string(),
            members: Vec::new(),
            host: None,
        });

        let existing: Vec<String> = room.members.clone();

        if room.host.is_none() {
            room.host = Some(conn_id.to_string());
            Self::deliver(&sender, ServerEvent::HostAssigned { is_host: true });

            // Members left waiting after a host departure learn the new host.
            for id in &existing {
                if let Some(member) = members.get(id) {
                    Self::deliver(
                        &member.sender,
                        ServerEvent::HostInfo {
                            host_id: conn_id.to_string(),
                        },
                    );
                }
            }

            tracing::info!(room_id = %room_id, conn_id = %conn_id, "Member elected host");
        } else {
            let host_id = room.host.clone().unwrap_or_default();
            Self::deliver(&sender, ServerEvent::HostInfo { host_id });
            Self::deliver(
                &sender,
                ServerEvent::ExistingUsers {
                    users: existing.clone(),
                },
            );
        }

        for id in &existing {
            if let Some(member) = members.get(id) {
                Self::deliver(
                    &member.sender,
                    ServerEvent::UserConnected {
                        id: conn_id.to_string(),
                    },
                );
            }
        }

        room.members.push(conn_id.to_string());
        members.insert(
            conn_id.to_string(),
            Member {
                conn_id: conn_id.to_string(),
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                sender,
            },
        );

        tracing::info!(
            conn_id = %conn_id,
            user_id = %user_id,
            room_id = %room_id,
            "Member joined room"
        );
        Ok(())
    }

    /// Forward a signaling payload verbatim to the addressed member.
    ///
    /// If the target is no longer connected the message is silently dropped;
    /// retry is the responsibility of higher-level reconnection logic.
    pub async fn relay(&self, kind: RelayKind, from: &str, to: &str, payload: Value) {
        if from == to {
            tracing::warn!(conn_id = %from, kind = kind.as_str(), "Dropping self-addressed relay");
            return;
        }

        let members = self.members.read().await;

        if !members.contains_key(from) {
            tracing::debug!(from = %from, kind = kind.as_str(), "Relay from unknown member dropped");
            return;
        }

        match members.get(to) {
            Some(target) => {
                Self::deliver(&target.sender, kind.into_server_event(from.to_string(), payload));
                tracing::debug!(from = %from, to = %to, kind = kind.as_str(), "Relayed signaling payload");
            }
            None => {
                tracing::debug!(from = %from, to = %to, kind = kind.as_str(), "Relay target gone, dropped");
            }
        }
    }

    /// Remove a member from its room, notifying the rest.
    ///
    /// A departing host clears the host slot, and remaining members wait for a
    /// fresh election on the next join. The room is destroyed when its last
    /// member leaves. Returns the room id and whether the member was host.
    pub async fn leave(&self, conn_id: &str) -> Option<(String, bool)> {
        let mut rooms = self.rooms.write().await;
        let mut members = self.members.write().await;

        let member = members.remove(conn_id)?;

        let mut was_host = false;
        if let Some(room) = rooms.get_mut(&member.room_id) {
            room.members.retain(|id| id != conn_id);

            if room.host.as_deref() == Some(conn_id) {
                was_host = true;
                room.host = None;
                tracing::info!(
                    room_id = %member.room_id,
                    conn_id = %conn_id,
                    "Host left, room is host-less until the next join"
                );
            }

            for id in &room.members {
                if let Some(other) = members.get(id) {
                    Self::deliver(
                        &other.sender,
                        ServerEvent::UserDisconnected {
                            id: conn_id.to_string(),
                        },
                    );
                }
            }

            if room.members.is_empty() {
                rooms.remove(&member.room_id);
                tracing::info!(room_id = %member.room_id, "Last member left, room destroyed");
            }
        }

        tracing::info!(conn_id = %conn_id, room_id = %member.room_id, "Member left room");
        Some((member.room_id, was_host))
    }

    pub async fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn current_host(&self, room_id: &str) -> Option<String> {
        self.rooms.read().await.get(room_id).and_then(|r| r.host.clone())
    }

    pub async fn room_members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|r| r.members.clone())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|r| r.members.len())
            .unwrap_or(0)
    }

    fn deliver(sender: &mpsc::UnboundedSender<ServerEvent>, event: ServerEvent) {
        // A send failure means the receiving socket is mid-teardown; the
        // disconnect path will clean the member up.
        if sender.send(event).is_err() {
            tracing::debug!("Dropped event for disconnecting member");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel() -> (
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn test_first_member_becomes_host() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = channel();

        registry.join("R1", "conn-a", "user-a", tx).await.unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events[0], ServerEvent::HostAssigned { is_host: true }));
        assert_eq!(registry.current_host("R1").await.as_deref(), Some("conn-a"));
    }

    #[tokio::test]
    async fn test_second_member_gets_host_info_not_hostship() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();

        registry.join("R1", "conn-a", "user-a", tx_a).await.unwrap();
        drain(&mut rx_a);
        registry.join("R1", "conn-b", "user-b", tx_b).await.unwrap();

        let b_events = drain(&mut rx_b);
        match &b_events[0] {
            ServerEvent::HostInfo { host_id } => assert_eq!(host_id, "conn-a"),
            other => panic!("expected host-info, got {:?}", other),
        }
        match &b_events[1] {
            ServerEvent::ExistingUsers { users } => assert_eq!(users, &vec!["conn-a".to_string()]),
            other => panic!("expected existing-users, got {:?}", other),
        }

        // First member learns about the newcomer
        let a_events = drain(&mut rx_a);
        assert!(a_events
            .iter()
            .any(|ev| matches!(ev, ServerEvent::UserConnected { id } if id == "conn-b")));

        // Exactly one host, members listed in join order
        assert_eq!(registry.current_host("R1").await.as_deref(), Some("conn-a"));
        assert_eq!(
            registry.room_members("R1").await,
            vec!["conn-a".to_string(), "conn-b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = channel();
        let (tx2, _rx2) = channel();

        registry.join("R1", "conn-a", "user-a", tx).await.unwrap();
        let err = registry.join("R1", "conn-a", "user-a", tx2).await;
        assert!(matches!(err, Err(RtcError::MemberAlreadyJoined(_))));
        assert_eq!(registry.member_count("R1").await, 1);
    }

    #[tokio::test]
    async fn test_relay_forwards_payload_verbatim() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();

        registry.join("R1", "conn-a", "user-a", tx_a).await.unwrap();
        registry.join("R1", "conn-b", "user-b", tx_b).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let payload = json!({"type": "offer", "sdp": "v=0 fake"});
        registry
            .relay(RelayKind::Offer, "conn-a", "conn-b", payload.clone())
            .await;

        let events = drain(&mut rx_b);
        match &events[0] {
            ServerEvent::Offer { from, sdp } => {
                assert_eq!(from, "conn-a");
                assert_eq!(sdp, &payload);
            }
            other => panic!("expected offer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_to_absent_member_is_dropped() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = channel();

        registry.join("R1", "conn-a", "user-a", tx_a).await.unwrap();
        drain(&mut rx_a);

        // Should not panic or error, just drop
        registry
            .relay(RelayKind::Answer, "conn-a", "conn-gone", json!({"sdp": "x"}))
            .await;
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_self_addressed_relay_is_dropped() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = channel();

        registry.join("R1", "conn-a", "user-a", tx_a).await.unwrap();
        drain(&mut rx_a);

        registry
            .relay(RelayKind::IceCandidate, "conn-a", "conn-a", json!({"candidate": "x"}))
            .await;
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_host_leave_clears_host_without_promotion() {
        let registry = RoomRegistry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, mut rx_b) = channel();

        registry.join("R1", "conn-a", "user-a", tx_a).await.unwrap();
        registry.join("R1", "conn-b", "user-b", tx_b).await.unwrap();
        drain(&mut rx_b);

        let left = registry.leave("conn-a").await;
        assert_eq!(left, Some(("R1".to_string(), true)));

        // No auto-promotion: the room is host-less until the next join
        assert_eq!(registry.current_host("R1").await, None);
        assert!(registry.room_exists("R1").await);

        let events = drain(&mut rx_b);
        assert!(events
            .iter()
            .any(|ev| matches!(ev, ServerEvent::UserDisconnected { id } if id == "conn-a")));
    }

    #[tokio::test]
    async fn test_next_join_after_host_loss_becomes_host_and_notifies_waiters() {
        let registry = RoomRegistry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let (tx_c, mut rx_c) = channel();

        registry.join("R1", "conn-a", "user-a", tx_a).await.unwrap();
        registry.join("R1", "conn-b", "user-b", tx_b).await.unwrap();
        registry.leave("conn-a").await;
        drain(&mut rx_b);

        registry.join("R1", "conn-c", "user-c", tx_c).await.unwrap();

        let c_events = drain(&mut rx_c);
        assert!(matches!(c_events[0], ServerEvent::HostAssigned { is_host: true }));
        assert_eq!(registry.current_host("R1").await.as_deref(), Some("conn-c"));

        // The waiting guest learns the new host
        let b_events = drain(&mut rx_b);
        assert!(b_events
            .iter()
            .any(|ev| matches!(ev, ServerEvent::HostInfo { host_id } if host_id == "conn-c")));
    }

    #[tokio::test]
    async fn test_last_leave_destroys_room() {
        let registry = RoomRegistry::new();
        let (tx_a, _rx_a) = channel();

        registry.join("R1", "conn-a", "user-a", tx_a).await.unwrap();
        registry.leave("conn-a").await;

        assert!(!registry.room_exists("R1").await);
    }

    #[tokio::test]
    async fn test_leave_unknown_member_is_noop() {
        let registry = RoomRegistry::new();
        assert_eq!(registry.leave("conn-missing").await, None);
    }
}

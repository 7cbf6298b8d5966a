use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent by a call participant to the registry.
///
/// SDP and candidate payloads are opaque to the registry; they are relayed
/// verbatim to the addressed member and never interpreted server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String, user_id: String },

    Offer { to: String, sdp: Value },

    Answer { to: String, sdp: Value },

    IceCandidate { to: String, candidate: Value },

    LeaveRoom,
}

/// Events sent by the registry to a call participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// First message on every connection: the transport-assigned
    /// connection identifier for this socket.
    Welcome { id: String },

    #[serde(rename_all = "camelCase")]
    HostAssigned { is_host: bool },

    #[serde(rename_all = "camelCase")]
    HostInfo { host_id: String },

    ExistingUsers { users: Vec<String> },

    UserConnected { id: String },

    UserDisconnected { id: String },

    Offer { from: String, sdp: Value },

    Answer { from: String, sdp: Value },

    IceCandidate { from: String, candidate: Value },
}

/// Kinds of signaling payload the registry relays between members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
}

impl RelayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::IceCandidate => "ice-candidate",
        }
    }

    /// Wrap a relayed payload into the event delivered to the target member.
    pub fn into_server_event(self, from: String, payload: Value) -> ServerEvent {
        match self {
            RelayKind::Offer => ServerEvent::Offer { from, sdp: payload },
            RelayKind::Answer => ServerEvent::Answer { from, sdp: payload },
            RelayKind::IceCandidate => ServerEvent::IceCandidate {
                from,
                candidate: payload,
            },
        }
    }
}

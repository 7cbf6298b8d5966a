use thiserror::Error;

/// Custom error types for the interview RTC coordination server
#[derive(Debug, Error)]
pub enum RtcError {
    /// Protocol violations are rejected and logged, never fatal to the room
    #[error("Self-connection rejected for peer {0}")]
    SelfConnection(String),

    #[error("Offer from unauthorized sender {0}")]
    UnauthorizedSender(String),

    #[error("Cannot apply {event} to link {peer} in state {state}")]
    InvalidLinkState {
        peer: String,
        event: &'static str,
        state: String,
    },

    /// Negotiation errors
    #[error("Failed to create offer: {0}")]
    CreateOfferFailed(String),

    #[error("Failed to create answer: {0}")]
    CreateAnswerFailed(String),

    #[error("Failed to set remote description: {0}")]
    SetRemoteDescriptionFailed(String),

    #[error("Failed to add ICE candidate: {0}")]
    AddIceCandidateFailed(String),

    #[error("Invalid SDP payload: {0}")]
    InvalidSdp(String),

    #[error("Negotiation already in progress for peer {0}")]
    NegotiationInProgress(String),

    /// Room and member management errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Member {0} not found")]
    MemberNotFound(String),

    #[error("Member {0} already joined")]
    MemberAlreadyJoined(String),

    /// Media errors
    #[error("Media permission denied: {0}")]
    MediaPermissionDenied(String),

    #[error("Failed to create media session: {0}")]
    MediaSessionCreation(String),

    /// Collaboration session errors
    #[error("Collab session {0} not found")]
    SessionNotFound(String),

    #[error("Storage request failed: {0}")]
    StorageFailed(String),

    /// External judge service errors
    #[error("Judge request failed: {0}")]
    JudgeFailed(String),

    /// Signaling errors
    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Convenience type alias for Results using RtcError
pub type Result<T> = std::result::Result<T, RtcError>;

impl RtcError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        RtcError::Internal(msg.into())
    }

    /// Helper to create storage errors
    pub fn storage(msg: impl Into<String>) -> Self {
        RtcError::StorageFailed(msg.into())
    }
}

/// Convert webrtc::Error to RtcError
impl From<webrtc::Error> for RtcError {
    fn from(err: webrtc::Error) -> Self {
        RtcError::MediaSessionCreation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RtcError::RoomNotFound("room-42".to_string());
        assert_eq!(err.to_string(), "Room room-42 not found");

        let err = RtcError::SelfConnection("abc123".to_string());
        assert_eq!(err.to_string(), "Self-connection rejected for peer abc123");
    }

    #[test]
    fn test_invalid_link_state_display() {
        let err = RtcError::InvalidLinkState {
            peer: "guest-1".to_string(),
            event: "answer",
            state: "New".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot apply answer to link guest-1 in state New"
        );
    }

    #[test]
    fn test_error_helpers() {
        let err = RtcError::internal("something went wrong");
        assert!(matches!(err, RtcError::Internal(_)));

        let err = RtcError::storage("connection refused");
        assert!(matches!(err, RtcError::StorageFailed(_)));
    }
}

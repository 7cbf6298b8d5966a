use serde_json::Value;

use super::session::MediaSession;

/// Number of leading SDP characters used as a duplicate-detection
/// fingerprint for retransmitted offers/answers.
pub const FINGERPRINT_LEN: usize = 100;

/// Short derived value from a negotiation message, compared against the
/// last one seen to drop retransmitted duplicates.
pub fn sdp_fingerprint(sdp: &str) -> String {
    sdp.chars().take(FINGERPRINT_LEN).collect()
}

/// Negotiation state of a single peer link.
///
/// Initiator path: New -> Offering -> Connected.
/// Responder path: New -> Answering -> Connected.
/// Any state may fall to Failed on connection failure; Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Offering,
    Answering,
    Connected,
    Failed,
    Closed,
}

impl LinkState {
    /// A usable link is reused by `create_link` instead of being replaced.
    pub fn is_usable(self) -> bool {
        !matches!(self, LinkState::Failed | LinkState::Closed)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::New => "new",
            LinkState::Offering => "offering",
            LinkState::Answering => "answering",
            LinkState::Connected => "connected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Connection state reported by the underlying media layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// One direct media channel to a remote room member.
pub struct PeerLink {
    pub remote_id: String,
    /// Whether the local side legitimately initiates (re)negotiation on
    /// this link: host for host->guest links, guest for the guest->host
    /// link.
    pub initiator: bool,
    pub state: LinkState,
    pub last_offer_fingerprint: Option<String>,
    pub last_answer_fingerprint: Option<String>,
    /// Candidates that arrived before the remote description was set,
    /// flushed in arrival order once it is.
    pub pending_candidates: Vec<Value>,
    pub remote_description_set: bool,
    pub session: Box<dyn MediaSession>,
}

impl PeerLink {
    pub fn new(remote_id: String, initiator: bool, session: Box<dyn MediaSession>) -> Self {
        Self {
            remote_id,
            initiator,
            state: LinkState::New,
            last_offer_fingerprint: None,
            last_answer_fingerprint: None,
            pending_candidates: Vec::new(),
            remote_description_set: false,
            session,
        }
    }

    pub fn is_duplicate_offer(&self, fingerprint: &str) -> bool {
        self.last_offer_fingerprint.as_deref() == Some(fingerprint)
    }

    pub fn is_duplicate_answer(&self, fingerprint: &str) -> bool {
        self.last_answer_fingerprint.as_deref() == Some(fingerprint)
    }

    pub fn transition(&mut self, to: LinkState) {
        if self.state != to {
            tracing::debug!(
                remote_id = %self.remote_id,
                from = %self.state,
                to = %to,
                "Link state transition"
            );
            self.state = to;
        }
    }

    /// Map a media-layer connection state onto the link state machine.
    pub fn apply_transport_state(&mut self, transport: TransportState) {
        let next = match transport {
            TransportState::Connected => LinkState::Connected,
            TransportState::Disconnected | TransportState::Failed => LinkState::Failed,
            TransportState::Closed => LinkState::Closed,
        };
        self.transition(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::session::testing::MockSession;

    #[test]
    fn test_fingerprint_truncates_long_sdp() {
        let sdp = "v=0\r\n".repeat(100);
        let fp = sdp_fingerprint(&sdp);
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(sdp.starts_with(&fp));
    }

    #[test]
    fn test_fingerprint_of_short_sdp_is_whole_sdp() {
        let fp = sdp_fingerprint("v=0 short");
        assert_eq!(fp, "v=0 short");
    }

    #[test]
    fn test_usable_states() {
        assert!(LinkState::New.is_usable());
        assert!(LinkState::Offering.is_usable());
        assert!(LinkState::Answering.is_usable());
        assert!(LinkState::Connected.is_usable());
        assert!(!LinkState::Failed.is_usable());
        assert!(!LinkState::Closed.is_usable());
    }

    #[test]
    fn test_transport_state_mapping() {
        let (session, _) = MockSession::new();
        let mut link = PeerLink::new("remote-1".to_string(), true, Box::new(session));
        assert_eq!(link.state, LinkState::New);

        link.apply_transport_state(TransportState::Connected);
        assert_eq!(link.state, LinkState::Connected);

        link.apply_transport_state(TransportState::Disconnected);
        assert_eq!(link.state, LinkState::Failed);

        link.apply_transport_state(TransportState::Closed);
        assert_eq!(link.state, LinkState::Closed);
    }

    #[test]
    fn test_duplicate_fingerprint_detection() {
        let (session, _) = MockSession::new();
        let mut link = PeerLink::new("remote-1".to_string(), false, Box::new(session));
        assert!(!link.is_duplicate_offer("abc"));

        link.last_offer_fingerprint = Some("abc".to_string());
        assert!(link.is_duplicate_offer("abc"));
        assert!(!link.is_duplicate_offer("abd"));
    }
}

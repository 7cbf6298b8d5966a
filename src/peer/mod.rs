pub mod link;
pub mod manager;
pub mod media;
pub mod session;

pub use link::{sdp_fingerprint, LinkState, PeerLink, TransportState, FINGERPRINT_LEN};
pub use manager::{PeerManager, PeerManagerConfig, PeerUpdate};
pub use media::{LocalMedia, MediaSnapshot};
pub use session::{
    create_webrtc_api, MediaSession, MediaSessionFactory, PeerEvent, RtcMediaSession,
    RtcSessionFactory, DEFAULT_STUN_URL,
};

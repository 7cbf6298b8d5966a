use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

use crate::error::{Result, RtcError};
use super::link::TransportState;
use super::media::LocalMedia;

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Events emitted by the media layer, pumped back into the `PeerManager`.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally gathered ICE candidate to relay to the remote side.
    LocalCandidate { remote_id: String, candidate: Value },
    /// An inbound media track arrived, keyed for the presentation layer.
    RemoteTrack {
        remote_id: String,
        track_id: String,
        kind: String,
    },
    /// Underlying connection state changed.
    ConnectionState {
        remote_id: String,
        state: TransportState,
    },
}

/// The asynchronous negotiation surface of one media channel.
///
/// `PeerManager` drives negotiation exclusively through this trait so the
/// whole state machine is testable without a live transport.
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Synthesize a local offer and install it as the local description.
    async fn create_offer(&self) -> Result<String>;

    /// Apply a remote offer as the remote description.
    async fn apply_remote_offer(&self, sdp: &str) -> Result<()>;

    /// Synthesize an answer to the previously applied remote offer and
    /// install it as the local description.
    async fn create_answer(&self) -> Result<String>;

    /// Apply a remote answer to an outstanding local offer.
    async fn apply_remote_answer(&self, sdp: &str) -> Result<()>;

    async fn add_remote_candidate(&self, candidate: &Value) -> Result<()>;

    async fn close(&self);
}

#[async_trait]
pub trait MediaSessionFactory: Send + Sync {
    async fn create(&self, remote_id: &str, media: &LocalMedia) -> Result<Box<dyn MediaSession>>;
}

/// Build the shared WebRTC API with VP8 + opus registered.
pub fn create_webrtc_api() -> Arc<API> {
    let mut media_engine = MediaEngine::default();

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .expect("Failed to register VP8");

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .expect("Failed to register Opus");

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .expect("Failed to register interceptors");

    Arc::new(
        APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build(),
    )
}

/// Production `MediaSession` backed by the webrtc crate.
pub struct RtcMediaSession {
    remote_id: String,
    peer_connection: Arc<RTCPeerConnection>,
}

/// Creates `RtcMediaSession`s wired to a shared event channel.
pub struct RtcSessionFactory {
    api: Arc<API>,
    events: mpsc::UnboundedSender<PeerEvent>,
    stun_urls: Vec<String>,
}

impl RtcSessionFactory {
    pub fn new(api: Arc<API>, events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        let stun_urls = std::env::var("STUN_SERVER_URL")
            .map(|url| vec![url])
            .unwrap_or_else(|_| vec![DEFAULT_STUN_URL.to_string()]);

        Self {
            api,
            events,
            stun_urls,
        }
    }
}

#[async_trait]
impl MediaSessionFactory for RtcSessionFactory {
    async fn create(&self, remote_id: &str, media: &LocalMedia) -> Result<Box<dyn MediaSession>> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.stun_urls.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);

        // Transceivers for both kinds: receiving always works, sending
        // follows the in-place enabled flags of the shared local tracks.
        peer_connection
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await?;
        peer_connection
            .add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await?;

        let snapshot = media.snapshot();
        tracing::debug!(
            remote_id = %remote_id,
            audio = snapshot.audio,
            video = snapshot.video,
            publishing = snapshot.publishing,
            "Seeded media session with local track state"
        );

        {
            let events = self.events.clone();
            let remote = remote_id.to_string();
            peer_connection.on_ice_candidate(Box::new(move |candidate| {
                let events = events.clone();
                let remote = remote.clone();
                Box::pin(async move {
                    if let Some(candidate) = candidate {
                        match candidate.to_json() {
                            Ok(init) => {
                                let payload = serde_json::json!({
                                    "candidate": init.candidate,
                                    "sdpMid": init.sdp_mid,
                                    "sdpMLineIndex": init.sdp_mline_index,
                                });
                                let _ = events.send(PeerEvent::LocalCandidate {
                                    remote_id: remote,
                                    candidate: payload,
                                });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to serialize local candidate");
                            }
                        }
                    }
                })
            }));
        }

        {
            let events = self.events.clone();
            let remote = remote_id.to_string();
            peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
                let _ = events.send(PeerEvent::RemoteTrack {
                    remote_id: remote.clone(),
                    track_id: track.id(),
                    kind: track.kind().to_string(),
                });
                Box::pin(async move {})
            }));
        }

        {
            let events = self.events.clone();
            let remote = remote_id.to_string();
            peer_connection.on_peer_connection_state_change(Box::new(move |state| {
                let mapped = match state {
                    RTCPeerConnectionState::Connected => Some(TransportState::Connected),
                    RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
                    RTCPeerConnectionState::Failed => Some(TransportState::Failed),
                    RTCPeerConnectionState::Closed => Some(TransportState::Closed),
                    _ => None,
                };
                if let Some(mapped) = mapped {
                    let _ = events.send(PeerEvent::ConnectionState {
                        remote_id: remote.clone(),
                        state: mapped,
                    });
                }
                Box::pin(async move {})
            }));
        }

        Ok(Box::new(RtcMediaSession {
            remote_id: remote_id.to_string(),
            peer_connection,
        }))
    }
}

#[async_trait]
impl MediaSession for RtcMediaSession {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| RtcError::CreateOfferFailed(e.to_string()))?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| RtcError::CreateOfferFailed(e.to_string()))?;
        Ok(offer.sdp)
    }

    async fn apply_remote_offer(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| RtcError::InvalidSdp(e.to_string()))?;
        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| RtcError::SetRemoteDescriptionFailed(e.to_string()))?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| RtcError::CreateAnswerFailed(e.to_string()))?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| RtcError::CreateAnswerFailed(e.to_string()))?;
        Ok(answer.sdp)
    }

    async fn apply_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| RtcError::InvalidSdp(e.to_string()))?;
        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| RtcError::SetRemoteDescriptionFailed(e.to_string()))?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &Value) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate
                .get("candidate")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    RtcError::AddIceCandidateFailed("missing candidate field".to_string())
                })?
                .to_string(),
            sdp_mid: candidate
                .get("sdpMid")
                .and_then(Value::as_str)
                .map(str::to_string),
            sdp_mline_index: candidate
                .get("sdpMLineIndex")
                .and_then(Value::as_u64)
                .map(|i| i as u16),
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| RtcError::AddIceCandidateFailed(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        tracing::debug!(remote_id = %self.remote_id, "Closing media session");
        let _ = self.peer_connection.close().await;
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::sleep;

use crate::error::{Result, RtcError};
use crate::signal::{ClientEvent, ServerEvent};
use super::link::{sdp_fingerprint, LinkState, PeerLink, TransportState};
use super::media::LocalMedia;
use super::session::{MediaSessionFactory, PeerEvent};

const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_NEGOTIATION_GRACE_MS: u64 = 500;

/// Tunables for link recovery and renegotiation pacing.
#[derive(Debug, Clone)]
pub struct PeerManagerConfig {
    /// Delay before a guest retries its link to the host.
    pub reconnect_delay: Duration,
    /// Upper bound on consecutive reconnect attempts per host.
    pub reconnect_max_attempts: u32,
    /// How long the negotiation lock lingers after completion to absorb
    /// rapid successive change events.
    pub negotiation_grace: Duration,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            negotiation_grace: Duration::from_millis(DEFAULT_NEGOTIATION_GRACE_MS),
        }
    }
}

impl PeerManagerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reconnect_delay: std::env::var("RECONNECT_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            reconnect_max_attempts: std::env::var("RECONNECT_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.reconnect_max_attempts),
            negotiation_grace: std::env::var("NEGOTIATION_GRACE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.negotiation_grace),
        }
    }
}

/// Notifications surfaced to the presentation layer.
#[derive(Debug, Clone)]
pub enum PeerUpdate {
    LinkStateChanged {
        remote_id: String,
        state: LinkState,
    },
    RemoteTrackAdded {
        remote_id: String,
        track_id: String,
        kind: String,
    },
    HostChanged {
        host_id: Option<String>,
    },
}

/// Per-participant coordinator of direct media channels.
///
/// Maintains one `PeerLink` per remote member in a star topology: every
/// guest links only to the host, the host links to every guest. Inbound
/// signaling events are applied through explicit state transitions; all
/// negotiation I/O goes through the injected `MediaSessionFactory`.
pub struct PeerManager {
    local_id: String,
    is_host: AtomicBool,
    host_id: RwLock<Option<String>>,
    links: Mutex<HashMap<String, PeerLink>>,
    /// Generation-tagged so a lingering grace task can only release the
    /// negotiation it belongs to, never a successor on the same remote.
    negotiation_locks: std::sync::Mutex<HashMap<String, u64>>,
    lock_generation: AtomicU64,
    /// Candidates that arrived before any link existed for their sender.
    early_candidates: std::sync::Mutex<HashMap<String, Vec<Value>>>,
    reconnect_attempts: std::sync::Mutex<HashMap<String, u32>>,
    transport_up: AtomicBool,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    updates: mpsc::UnboundedSender<PeerUpdate>,
    factory: Arc<dyn MediaSessionFactory>,
    media: Arc<LocalMedia>,
    config: PeerManagerConfig,
}

impl PeerManager {
    pub fn new(
        local_id: String,
        outbound: mpsc::UnboundedSender<ClientEvent>,
        updates: mpsc::UnboundedSender<PeerUpdate>,
        factory: Arc<dyn MediaSessionFactory>,
        media: Arc<LocalMedia>,
        config: PeerManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            is_host: AtomicBool::new(false),
            host_id: RwLock::new(None),
            links: Mutex::new(HashMap::new()),
            negotiation_locks: std::sync::Mutex::new(HashMap::new()),
            lock_generation: AtomicU64::new(0),
            early_candidates: std::sync::Mutex::new(HashMap::new()),
            reconnect_attempts: std::sync::Mutex::new(HashMap::new()),
            transport_up: AtomicBool::new(true),
            outbound,
            updates,
            factory,
            media,
            config,
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn is_host(&self) -> bool {
        self.is_host.load(Ordering::SeqCst)
    }

    pub async fn current_host(&self) -> Option<String> {
        self.host_id.read().await.clone()
    }

    pub async fn link_state(&self, remote_id: &str) -> Option<LinkState> {
        self.links.lock().await.get(remote_id).map(|l| l.state)
    }

    pub async fn link_count(&self) -> usize {
        self.links.lock().await.len()
    }

    pub fn media(&self) -> &LocalMedia {
        &self.media
    }

    /// Pump media-layer events back into the manager and out to the relay.
    pub fn spawn_event_pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PeerEvent::LocalCandidate {
                        remote_id,
                        candidate,
                    } => {
                        self.send(ClientEvent::IceCandidate {
                            to: remote_id,
                            candidate,
                        });
                    }
                    PeerEvent::RemoteTrack {
                        remote_id,
                        track_id,
                        kind,
                    } => {
                        tracing::info!(
                            remote_id = %remote_id,
                            track_id = %track_id,
                            kind = %kind,
                            "Remote track arrived"
                        );
                        self.notify(PeerUpdate::RemoteTrackAdded {
                            remote_id,
                            track_id,
                            kind,
                        });
                    }
                    PeerEvent::ConnectionState { remote_id, state } => {
                        self.on_connection_state(&remote_id, state).await;
                    }
                }
            }
        });
    }

    /// React to a registry event.
    pub async fn handle_server_event(self: &Arc<Self>, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::Welcome { id } => {
                if id != self.local_id {
                    tracing::warn!(
                        assigned = %id,
                        local = %self.local_id,
                        "Welcome id differs from local id"
                    );
                }
                Ok(())
            }
            ServerEvent::HostAssigned { is_host } => {
                self.is_host.store(is_host, Ordering::SeqCst);
                if is_host {
                    *self.host_id.write().await = Some(self.local_id.clone());
                    self.notify(PeerUpdate::HostChanged {
                        host_id: Some(self.local_id.clone()),
                    });
                    tracing::info!("Assigned as room host");
                }
                Ok(())
            }
            ServerEvent::HostInfo { host_id } => {
                let is_self = host_id == self.local_id;
                self.is_host.store(is_self, Ordering::SeqCst);
                *self.host_id.write().await = Some(host_id.clone());
                self.notify(PeerUpdate::HostChanged {
                    host_id: Some(host_id.clone()),
                });
                tracing::info!(host_id = %host_id, "Received host info");

                if !is_self {
                    // The guest side initiates the single guest->host link
                    self.create_link(&host_id, true).await?;
                }
                Ok(())
            }
            ServerEvent::ExistingUsers { users } => {
                if self.is_host() {
                    return Ok(());
                }
                let known_host = self.host_id.read().await.clone();
                let target = known_host
                    .or_else(|| users.iter().find(|id| **id != self.local_id).cloned());
                if let Some(target) = target {
                    if target != self.local_id {
                        self.create_link(&target, true).await?;
                    }
                }
                Ok(())
            }
            ServerEvent::UserConnected { id } => {
                if id == self.local_id {
                    tracing::warn!("Ignoring self user-connected event");
                    return Ok(());
                }
                // Star topology: only the host initiates toward new guests
                if self.is_host() {
                    self.create_link(&id, true).await?;
                }
                Ok(())
            }
            ServerEvent::UserDisconnected { id } => {
                self.cleanup_link(&id).await;
                let cleared = {
                    let mut host = self.host_id.write().await;
                    if host.as_deref() == Some(id.as_str()) && !self.is_host() {
                        *host = None;
                        true
                    } else {
                        false
                    }
                };
                if cleared {
                    self.notify(PeerUpdate::HostChanged { host_id: None });
                    tracing::info!(host_id = %id, "Host disconnected, waiting for new host");
                }
                Ok(())
            }
            ServerEvent::Offer { from, sdp } => self.handle_offer(&from, &sdp).await,
            ServerEvent::Answer { from, sdp } => self.handle_answer(&from, &sdp).await,
            ServerEvent::IceCandidate { from, candidate } => {
                self.handle_remote_candidate(&from, candidate).await
            }
        }
    }

    /// Create a link to a remote member, sending the initial offer when the
    /// local side is the initiator.
    ///
    /// Idempotent: a usable existing link is kept as-is. Self-links are
    /// always refused.
    pub async fn create_link(self: &Arc<Self>, remote_id: &str, initiator: bool) -> Result<()> {
        if remote_id == self.local_id {
            tracing::warn!(remote_id = %remote_id, "Refusing to create self-link");
            return Ok(());
        }

        let mut links = self.links.lock().await;
        if let Some(existing) = links.get(remote_id) {
            if existing.state.is_usable() {
                tracing::debug!(
                    remote_id = %remote_id,
                    state = %existing.state,
                    "Reusing existing link"
                );
                return Ok(());
            }
            if let Some(stale) = links.remove(remote_id) {
                stale.session.close().await;
            }
        }

        tracing::info!(
            remote_id = %remote_id,
            initiator = initiator,
            "Creating peer link"
        );
        let mut link = self.new_link(remote_id, initiator).await?;

        if initiator {
            let generation = match self.try_lock_negotiation(remote_id) {
                Some(generation) => generation,
                None => {
                    // Mid-flight negotiation; the next change event will retry.
                    tracing::warn!(remote_id = %remote_id, "Negotiation busy, deferring initial offer");
                    links.insert(remote_id.to_string(), link);
                    return Ok(());
                }
            };

            match link.session.create_offer().await {
                Ok(offer) => {
                    link.last_offer_fingerprint = Some(sdp_fingerprint(&offer));
                    link.transition(LinkState::Offering);
                    self.send(ClientEvent::Offer {
                        to: remote_id.to_string(),
                        sdp: serde_json::json!({ "type": "offer", "sdp": offer }),
                    });
                    self.release_lock_after_grace(remote_id.to_string(), generation);
                }
                Err(e) => {
                    link.session.close().await;
                    self.unlock_negotiation(remote_id);
                    return Err(e);
                }
            }
        }

        self.notify(PeerUpdate::LinkStateChanged {
            remote_id: remote_id.to_string(),
            state: link.state,
        });
        links.insert(remote_id.to_string(), link);
        Ok(())
    }

    /// Process an inbound offer: dedup by fingerprint, authorize the sender
    /// for the local role, apply the description, flush queued candidates,
    /// and answer. Any failure discards the link for a clean retry.
    pub async fn handle_offer(self: &Arc<Self>, from: &str, payload: &Value) -> Result<()> {
        if from == self.local_id {
            tracing::warn!("Ignoring offer from self");
            return Ok(());
        }
        let sdp = match sdp_text(payload) {
            Some(sdp) => sdp,
            None => {
                tracing::warn!(from = %from, "Offer without SDP text dropped");
                return Err(RtcError::InvalidSdp("offer missing sdp text".to_string()));
            }
        };
        let fingerprint = sdp_fingerprint(sdp);

        let mut links = self.links.lock().await;

        if let Some(link) = links.get(from) {
            if link.is_duplicate_offer(&fingerprint) {
                tracing::debug!(from = %from, "Ignoring retransmitted offer");
                return Ok(());
            }
        }

        // Host must only receive offers from guests; a guest only from the
        // current host. Anything else is a stale or rogue peer.
        let authorized = if self.is_host() {
            true
        } else {
            self.host_id.read().await.as_deref() == Some(from)
        };
        if !authorized {
            tracing::warn!(from = %from, "Dropping offer from unauthorized sender");
            return Ok(());
        }

        let generation = match self.try_lock_negotiation(from) {
            Some(generation) => generation,
            None => {
                tracing::warn!(from = %from, "Offer ignored, negotiation in progress");
                return Ok(());
            }
        };

        let usable = links.get(from).map(|l| l.state.is_usable()).unwrap_or(false);
        if !usable {
            if let Some(stale) = links.remove(from) {
                stale.session.close().await;
            }
            match self.new_link(from, false).await {
                Ok(link) => {
                    links.insert(from.to_string(), link);
                }
                Err(e) => {
                    self.unlock_negotiation(from);
                    return Err(e);
                }
            }
        }
        let link = match links.get_mut(from) {
            Some(link) => link,
            None => {
                self.unlock_negotiation(from);
                return Ok(());
            }
        };

        link.last_offer_fingerprint = Some(fingerprint);
        link.transition(LinkState::Answering);

        let outcome: Result<String> = async {
            link.session.apply_remote_offer(sdp).await?;
            link.remote_description_set = true;

            let queued: Vec<Value> = std::mem::take(&mut link.pending_candidates);
            if !queued.is_empty() {
                tracing::debug!(from = %from, count = queued.len(), "Flushing queued candidates");
            }
            for candidate in &queued {
                if let Err(e) = link.session.add_remote_candidate(candidate).await {
                    tracing::warn!(from = %from, error = %e, "Failed to add queued candidate");
                }
            }

            link.session.create_answer().await
        }
        .await;

        match outcome {
            Ok(answer) => {
                link.last_answer_fingerprint = Some(sdp_fingerprint(&answer));
                self.send(ClientEvent::Answer {
                    to: from.to_string(),
                    sdp: serde_json::json!({ "type": "answer", "sdp": answer }),
                });
                tracing::debug!(from = %from, "Sent answer");
                self.release_lock_after_grace(from.to_string(), generation);
                Ok(())
            }
            Err(e) => {
                tracing::error!(from = %from, error = %e, "Negotiation failed, discarding link");
                if let Some(broken) = links.remove(from) {
                    broken.session.close().await;
                }
                self.unlock_negotiation(from);
                Err(e)
            }
        }
    }

    /// Process an inbound answer. Valid only while a local offer is
    /// outstanding; a stable link treats it as a stale retransmit, and any
    /// other state tears the link down and starts a fresh attempt.
    pub async fn handle_answer(self: &Arc<Self>, from: &str, payload: &Value) -> Result<()> {
        if from == self.local_id {
            tracing::warn!("Ignoring answer from self");
            return Ok(());
        }
        let sdp = match sdp_text(payload) {
            Some(sdp) => sdp,
            None => {
                tracing::warn!(from = %from, "Answer without SDP text dropped");
                return Err(RtcError::InvalidSdp("answer missing sdp text".to_string()));
            }
        };
        let fingerprint = sdp_fingerprint(sdp);

        let mut links = self.links.lock().await;
        let link = match links.get_mut(from) {
            Some(link) => link,
            None => {
                tracing::warn!(from = %from, "Answer for unknown link ignored");
                return Ok(());
            }
        };

        if link.is_duplicate_answer(&fingerprint) {
            tracing::debug!(from = %from, "Ignoring retransmitted answer");
            return Ok(());
        }

        match link.state {
            LinkState::Offering => {
                link.last_answer_fingerprint = Some(fingerprint);
                match link.session.apply_remote_answer(sdp).await {
                    Ok(()) => {
                        link.remote_description_set = true;
                        let queued: Vec<Value> = std::mem::take(&mut link.pending_candidates);
                        for candidate in &queued {
                            if let Err(e) = link.session.add_remote_candidate(candidate).await {
                                tracing::warn!(
                                    from = %from,
                                    error = %e,
                                    "Failed to add queued candidate"
                                );
                            }
                        }
                        tracing::debug!(from = %from, "Applied remote answer");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(
                            from = %from,
                            error = %e,
                            "Failed to apply answer, recreating link"
                        );
                        let initiator = self.is_host() || link.initiator;
                        if let Some(broken) = links.remove(from) {
                            broken.session.close().await;
                        }
                        drop(links);
                        self.unlock_negotiation(from);
                        self.create_link(from, initiator).await
                    }
                }
            }
            LinkState::Connected => {
                tracing::debug!(from = %from, "Link already stable, ignoring stale answer");
                Ok(())
            }
            state => {
                tracing::warn!(
                    from = %from,
                    state = %state,
                    "Answer in inconsistent state, tearing down"
                );
                let initiator = self.is_host() || link.initiator;
                if let Some(broken) = links.remove(from) {
                    broken.session.close().await;
                }
                drop(links);
                self.unlock_negotiation(from);
                self.create_link(from, initiator).await
            }
        }
    }

    /// Queue or apply a remote candidate. Candidates are never dropped:
    /// anything arriving before the remote description is held and flushed
    /// in arrival order once a description is set.
    pub async fn handle_remote_candidate(&self, from: &str, candidate: Value) -> Result<()> {
        if from == self.local_id {
            tracing::warn!("Ignoring candidate from self");
            return Ok(());
        }

        let mut links = self.links.lock().await;
        match links.get_mut(from) {
            Some(link) if link.remote_description_set => {
                if let Err(e) = link.session.add_remote_candidate(&candidate).await {
                    tracing::warn!(from = %from, error = %e, "Failed to add candidate");
                }
            }
            Some(link) => {
                link.pending_candidates.push(candidate);
                tracing::debug!(
                    from = %from,
                    queued = link.pending_candidates.len(),
                    "Queued candidate until remote description is set"
                );
            }
            None => {
                // Candidate raced ahead of the offer; adopted when the link
                // is built.
                let mut early = self.early_candidates.lock().unwrap();
                let queue = early.entry(from.to_string()).or_default();
                queue.push(candidate);
                tracing::debug!(from = %from, queued = queue.len(), "Held candidate for future link");
            }
        }
        Ok(())
    }

    /// Media-layer connection state change for one link.
    ///
    /// A failed or disconnected guest->host link schedules the bounded
    /// delayed reconnect; hosts rely on the guest-side retry instead.
    pub async fn on_connection_state(
        self: &Arc<Self>,
        remote_id: &str,
        transport: TransportState,
    ) {
        {
            let mut links = self.links.lock().await;
            let link = match links.get_mut(remote_id) {
                Some(link) => link,
                None => return,
            };
            link.apply_transport_state(transport);
            let state = link.state;
            drop(links);
            self.notify(PeerUpdate::LinkStateChanged {
                remote_id: remote_id.to_string(),
                state,
            });
        }

        match transport {
            TransportState::Connected => {
                self.reconnect_attempts.lock().unwrap().remove(remote_id);
            }
            TransportState::Failed | TransportState::Disconnected => {
                // A dead link cannot still be negotiating; free the lock so
                // the replacement link can offer without waiting out the
                // grace period.
                self.unlock_negotiation(remote_id);
                let host = self.host_id.read().await.clone();
                if !self.is_host() && host.as_deref() == Some(remote_id) {
                    self.schedule_reconnect(remote_id.to_string());
                }
            }
            TransportState::Closed => {
                self.unlock_negotiation(remote_id);
            }
        }
    }

    /// Tear down and forget a link.
    pub async fn cleanup_link(&self, remote_id: &str) {
        let removed = self.links.lock().await.remove(remote_id);
        if let Some(link) = removed {
            link.session.close().await;
            tracing::debug!(remote_id = %remote_id, "Cleaned up link");
        }
        self.unlock_negotiation(remote_id);
        self.early_candidates.lock().unwrap().remove(remote_id);
    }

    /// Signaling transport lost: every link is torn down. A rejoin after
    /// transport recovery starts from scratch.
    pub async fn handle_transport_down(&self) {
        self.transport_up.store(false, Ordering::SeqCst);
        let drained: Vec<PeerLink> = {
            let mut links = self.links.lock().await;
            links.drain().map(|(_, link)| link).collect()
        };
        for link in &drained {
            link.session.close().await;
        }
        self.negotiation_locks.lock().unwrap().clear();
        self.early_candidates.lock().unwrap().clear();
        tracing::info!(count = drained.len(), "Transport lost, all links torn down");
    }

    pub fn set_transport_up(&self) {
        self.transport_up.store(true, Ordering::SeqCst);
    }

    fn schedule_reconnect(self: &Arc<Self>, host_id: String) {
        let attempt = {
            let mut attempts = self.reconnect_attempts.lock().unwrap();
            let n = attempts.entry(host_id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if attempt > self.config.reconnect_max_attempts {
            tracing::warn!(
                host_id = %host_id,
                attempts = attempt - 1,
                "Reconnect attempts exhausted, giving up"
            );
            return;
        }

        tracing::info!(
            host_id = %host_id,
            attempt = attempt,
            delay_ms = self.config.reconnect_delay.as_millis() as u64,
            "Scheduling reconnect to host"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            sleep(manager.config.reconnect_delay).await;

            if !manager.transport_up.load(Ordering::SeqCst) {
                tracing::debug!(host_id = %host_id, "Transport down, skipping reconnect");
                return;
            }
            // A host change in the interim means this retry is stale
            if manager.host_id.read().await.as_deref() != Some(host_id.as_str()) {
                tracing::debug!(host_id = %host_id, "Host changed, skipping stale reconnect");
                return;
            }

            manager.cleanup_link(&host_id).await;
            if let Err(e) = manager.create_link(&host_id, true).await {
                tracing::warn!(host_id = %host_id, error = %e, "Reconnect attempt failed");
            }
        });
    }

    async fn new_link(&self, remote_id: &str, initiator: bool) -> Result<PeerLink> {
        let session = self.factory.create(remote_id, &self.media).await?;
        let mut link = PeerLink::new(remote_id.to_string(), initiator, session);

        let early = self.early_candidates.lock().unwrap().remove(remote_id);
        if let Some(candidates) = early {
            tracing::debug!(
                remote_id = %remote_id,
                count = candidates.len(),
                "Adopting early-arrived candidates"
            );
            link.pending_candidates = candidates;
        }
        Ok(link)
    }

    fn try_lock_negotiation(&self, remote_id: &str) -> Option<u64> {
        let mut locks = self.negotiation_locks.lock().unwrap();
        if locks.contains_key(remote_id) {
            return None;
        }
        let generation = self.lock_generation.fetch_add(1, Ordering::SeqCst) + 1;
        locks.insert(remote_id.to_string(), generation);
        Some(generation)
    }

    fn unlock_negotiation(&self, remote_id: &str) {
        self.negotiation_locks.lock().unwrap().remove(remote_id);
    }

    /// Release only the lock taken by the matching negotiation; a newer
    /// lock on the same remote stays held.
    fn release_lock_if_current(&self, remote_id: &str, generation: u64) {
        let mut locks = self.negotiation_locks.lock().unwrap();
        if locks.get(remote_id) == Some(&generation) {
            locks.remove(remote_id);
        }
    }

    fn release_lock_after_grace(self: &Arc<Self>, remote_id: String, generation: u64) {
        let manager = self.clone();
        tokio::spawn(async move {
            sleep(manager.config.negotiation_grace).await;
            manager.release_lock_if_current(&remote_id, generation);
        });
    }

    fn send(&self, event: ClientEvent) {
        if self.outbound.send(event).is_err() {
            tracing::debug!("Outbound signaling channel closed");
        }
    }

    fn notify(&self, update: PeerUpdate) {
        let _ = self.updates.send(update);
    }
}

/// Extract the SDP text from a relayed description payload, accepting both
/// `{"type": ..., "sdp": "..."}` objects and bare strings.
fn sdp_text(payload: &Value) -> Option<&str> {
    payload
        .get("sdp")
        .and_then(Value::as_str)
        .or_else(|| payload.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::session::testing::MockFactory;
    use serde_json::json;
    use std::sync::atomic::Ordering as AtomicOrdering;

    struct Harness {
        manager: Arc<PeerManager>,
        factory: Arc<MockFactory>,
        outbound: mpsc::UnboundedReceiver<ClientEvent>,
        #[allow(dead_code)]
        updates: mpsc::UnboundedReceiver<PeerUpdate>,
    }

    fn harness(local_id: &str) -> Harness {
        let factory = MockFactory::new();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (up_tx, up_rx) = mpsc::unbounded_channel();
        let manager = PeerManager::new(
            local_id.to_string(),
            out_tx,
            up_tx,
            factory.clone(),
            Arc::new(LocalMedia::new(true, true)),
            PeerManagerConfig::default(),
        );
        Harness {
            manager,
            factory,
            outbound: out_rx,
            updates: up_rx,
        }
    }

    fn drain_outbound(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn answers_sent(events: &[ClientEvent]) -> usize {
        events
            .iter()
            .filter(|ev| matches!(ev, ClientEvent::Answer { .. }))
            .count()
    }

    fn offers_sent(events: &[ClientEvent]) -> usize {
        events
            .iter()
            .filter(|ev| matches!(ev, ClientEvent::Offer { .. }))
            .count()
    }

    fn offer_payload(sdp: &str) -> Value {
        json!({ "type": "offer", "sdp": sdp })
    }

    fn answer_payload(sdp: &str) -> Value {
        json!({ "type": "answer", "sdp": sdp })
    }

    async fn become_host(h: &Harness) {
        h.manager
            .handle_server_event(ServerEvent::HostAssigned { is_host: true })
            .await
            .unwrap();
    }

    async fn become_guest_of(h: &Harness, host_id: &str) {
        h.manager
            .handle_server_event(ServerEvent::HostInfo {
                host_id: host_id.to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_self_link_is_never_created() {
        let h = harness("me");
        h.manager.create_link("me", true).await.unwrap();

        assert_eq!(h.factory.session_count(), 0);
        assert_eq!(h.manager.link_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_link_is_idempotent() {
        let mut h = harness("host");
        become_host(&h).await;

        h.manager.create_link("guest-1", true).await.unwrap();
        h.manager.create_link("guest-1", true).await.unwrap();

        assert_eq!(h.factory.session_count(), 1);
        assert_eq!(h.manager.link_count().await, 1);
        let events = drain_outbound(&mut h.outbound);
        assert_eq!(offers_sent(&events), 1);
    }

    #[tokio::test]
    async fn test_duplicate_offer_yields_single_answer() {
        let mut h = harness("host");
        become_host(&h).await;

        let payload = offer_payload("v=0 remote-offer-alpha");
        h.manager.handle_offer("guest-1", &payload).await.unwrap();
        h.manager.handle_offer("guest-1", &payload).await.unwrap();

        let events = drain_outbound(&mut h.outbound);
        assert_eq!(answers_sent(&events), 1);

        let state = h.factory.state_for("guest-1").unwrap();
        assert_eq!(state.answers_created.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(state.offers_applied.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_offer_from_unauthorized_sender_is_dropped() {
        let mut h = harness("guest");
        become_guest_of(&h, "the-host").await;
        drain_outbound(&mut h.outbound);

        // Offer from someone who is not the current host
        h.manager
            .handle_offer("rogue", &offer_payload("v=0 rogue-offer"))
            .await
            .unwrap();

        assert!(h.factory.state_for("rogue").is_none());
        let events = drain_outbound(&mut h.outbound);
        assert_eq!(answers_sent(&events), 0);
    }

    #[tokio::test]
    async fn test_early_candidates_flushed_in_arrival_order() {
        let h = harness("host");
        become_host(&h).await;

        // Candidates arrive before any link exists for the sender
        h.manager
            .handle_remote_candidate("guest-1", json!({"candidate": "cand-1"}))
            .await
            .unwrap();
        h.manager
            .handle_remote_candidate("guest-1", json!({"candidate": "cand-2"}))
            .await
            .unwrap();

        h.manager
            .handle_offer("guest-1", &offer_payload("v=0 remote-offer"))
            .await
            .unwrap();

        let state = h.factory.state_for("guest-1").unwrap();
        let candidates = state.candidates.lock().unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0]["candidate"], "cand-1");
        assert_eq!(candidates[1]["candidate"], "cand-2");
    }

    #[tokio::test]
    async fn test_candidate_after_description_applies_immediately() {
        let h = harness("host");
        become_host(&h).await;

        h.manager
            .handle_offer("guest-1", &offer_payload("v=0 remote-offer"))
            .await
            .unwrap();
        h.manager
            .handle_remote_candidate("guest-1", json!({"candidate": "late"}))
            .await
            .unwrap();

        let state = h.factory.state_for("guest-1").unwrap();
        assert_eq!(state.candidates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_answer_applied_while_offering() {
        let h = harness("host");
        become_host(&h).await;
        h.manager.create_link("guest-1", true).await.unwrap();
        assert_eq!(
            h.manager.link_state("guest-1").await,
            Some(LinkState::Offering)
        );

        h.manager
            .handle_answer("guest-1", &answer_payload("v=0 remote-answer"))
            .await
            .unwrap();

        let state = h.factory.state_for("guest-1").unwrap();
        assert_eq!(state.answers_applied.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_answer_is_ignored() {
        let h = harness("host");
        become_host(&h).await;
        h.manager.create_link("guest-1", true).await.unwrap();

        let payload = answer_payload("v=0 remote-answer");
        h.manager.handle_answer("guest-1", &payload).await.unwrap();
        h.manager.handle_answer("guest-1", &payload).await.unwrap();

        let state = h.factory.state_for("guest-1").unwrap();
        assert_eq!(state.answers_applied.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_answer_ignored_when_connected() {
        let h = harness("host");
        become_host(&h).await;
        h.manager.create_link("guest-1", true).await.unwrap();
        h.manager
            .on_connection_state("guest-1", TransportState::Connected)
            .await;

        h.manager
            .handle_answer("guest-1", &answer_payload("v=0 stale-answer"))
            .await
            .unwrap();

        let state = h.factory.state_for("guest-1").unwrap();
        assert_eq!(state.answers_applied.load(AtomicOrdering::SeqCst), 0);
        // The link is untouched
        assert_eq!(h.factory.session_count(), 1);
        assert_eq!(
            h.manager.link_state("guest-1").await,
            Some(LinkState::Connected)
        );
    }

    #[tokio::test]
    async fn test_answer_in_inconsistent_state_recreates_link() {
        let mut h = harness("host");
        become_host(&h).await;

        // Build a responder link (state Answering, not Offering)
        h.manager
            .handle_offer("guest-1", &offer_payload("v=0 remote-offer"))
            .await
            .unwrap();
        drain_outbound(&mut h.outbound);

        h.manager
            .handle_answer("guest-1", &answer_payload("v=0 unexpected-answer"))
            .await
            .unwrap();

        // Old link torn down, fresh initiator link created
        assert_eq!(h.factory.session_count(), 2);
        let events = drain_outbound(&mut h.outbound);
        assert_eq!(offers_sent(&events), 1);
    }

    #[tokio::test]
    async fn test_answer_for_unknown_link_is_ignored() {
        let h = harness("host");
        become_host(&h).await;

        h.manager
            .handle_answer("stranger", &answer_payload("v=0 answer"))
            .await
            .unwrap();
        assert_eq!(h.factory.session_count(), 0);
    }

    #[tokio::test]
    async fn test_guest_connects_to_host_exactly_once() {
        let mut h = harness("guest");
        become_guest_of(&h, "the-host").await;
        // existing-users arriving afterwards must not duplicate the link
        h.manager
            .handle_server_event(ServerEvent::ExistingUsers {
                users: vec!["the-host".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(h.factory.session_count(), 1);
        let events = drain_outbound(&mut h.outbound);
        assert_eq!(offers_sent(&events), 1);
    }

    #[tokio::test]
    async fn test_guest_does_not_initiate_to_other_guests() {
        let h = harness("guest");
        become_guest_of(&h, "the-host").await;

        h.manager
            .handle_server_event(ServerEvent::UserConnected {
                id: "other-guest".to_string(),
            })
            .await
            .unwrap();

        assert!(h.factory.state_for("other-guest").is_none());
    }

    #[tokio::test]
    async fn test_host_initiates_to_new_guests() {
        let mut h = harness("host");
        become_host(&h).await;

        h.manager
            .handle_server_event(ServerEvent::UserConnected {
                id: "guest-1".to_string(),
            })
            .await
            .unwrap();
        h.manager
            .handle_server_event(ServerEvent::UserConnected {
                id: "guest-2".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(h.factory.session_count(), 2);
        let events = drain_outbound(&mut h.outbound);
        assert_eq!(offers_sent(&events), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_reconnects_to_host_after_delay() {
        let h = harness("guest");
        become_guest_of(&h, "the-host").await;
        assert_eq!(h.factory.session_count(), 1);

        h.manager
            .on_connection_state("the-host", TransportState::Failed)
            .await;

        // Before the delay elapses nothing happens
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.factory.session_count(), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.factory.session_count(), 2);
        assert_eq!(
            h.manager.link_state("the-host").await,
            Some(LinkState::Offering)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stale_reconnect_when_host_changed() {
        let h = harness("guest");
        become_guest_of(&h, "the-host").await;

        h.manager
            .on_connection_state("the-host", TransportState::Disconnected)
            .await;
        // Host leaves before the retry fires
        h.manager
            .handle_server_event(ServerEvent::UserDisconnected {
                id: "the-host".to_string(),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.factory.session_count(), 1);
        assert_eq!(h.manager.link_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_does_not_self_initiate_reconnection() {
        let h = harness("host");
        become_host(&h).await;
        h.manager.create_link("guest-1", true).await.unwrap();

        h.manager
            .on_connection_state("guest-1", TransportState::Failed)
            .await;
        tokio::time::sleep(Duration::from_millis(2500)).await;

        // The host relies on the guest-side retry
        assert_eq!(h.factory.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_attempts_are_bounded() {
        let h = harness("guest");
        become_guest_of(&h, "the-host").await;

        for _ in 0..10 {
            h.manager
                .on_connection_state("the-host", TransportState::Failed)
                .await;
            tokio::time::sleep(Duration::from_millis(2500)).await;
        }

        // Initial link + at most reconnect_max_attempts retries
        let max = PeerManagerConfig::default().reconnect_max_attempts as usize;
        assert!(h.factory.session_count() <= 1 + max);
    }

    #[tokio::test]
    async fn test_transport_down_tears_down_all_links() {
        let h = harness("host");
        become_host(&h).await;
        h.manager.create_link("guest-1", true).await.unwrap();
        h.manager.create_link("guest-2", true).await.unwrap();

        h.manager.handle_transport_down().await;
        assert_eq!(h.manager.link_count().await, 0);

        let state = h.factory.state_for("guest-1").unwrap();
        assert!(state.closed.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_link_is_replaced_not_reused() {
        let h = harness("host");
        become_host(&h).await;
        h.manager.create_link("guest-1", true).await.unwrap();
        h.manager
            .on_connection_state("guest-1", TransportState::Failed)
            .await;

        h.manager.create_link("guest-1", true).await.unwrap();
        assert_eq!(h.factory.session_count(), 2);
        assert_eq!(
            h.manager.link_state("guest-1").await,
            Some(LinkState::Offering)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_inside_grace_window_frees_negotiation() {
        let mut h = harness("host");
        become_host(&h).await;
        h.manager.create_link("guest-1", true).await.unwrap();

        // Fail before the offer's grace period has elapsed
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.manager
            .on_connection_state("guest-1", TransportState::Failed)
            .await;

        h.manager.create_link("guest-1", true).await.unwrap();
        assert_eq!(
            h.manager.link_state("guest-1").await,
            Some(LinkState::Offering)
        );

        // The first negotiation's leftover grace release must not undo the
        // replacement's lock mid-flight
        tokio::time::sleep(Duration::from_millis(600)).await;
        let events = drain_outbound(&mut h.outbound);
        assert_eq!(offers_sent(&events), 2);
    }

    #[test]
    fn test_stale_grace_release_keeps_newer_lock() {
        let h = harness("host");
        let first = h.manager.try_lock_negotiation("guest-1").unwrap();
        assert!(h.manager.try_lock_negotiation("guest-1").is_none());
        h.manager.unlock_negotiation("guest-1");

        let second = h.manager.try_lock_negotiation("guest-1").unwrap();
        assert_ne!(first, second);

        // A release from the finished negotiation leaves the new lock held
        h.manager.release_lock_if_current("guest-1", first);
        assert!(h.manager.try_lock_negotiation("guest-1").is_none());

        h.manager.release_lock_if_current("guest-1", second);
        assert!(h.manager.try_lock_negotiation("guest-1").is_some());
    }

    #[test]
    fn test_sdp_text_accepts_object_and_bare_string() {
        let object = json!({"type": "offer", "sdp": "v=0 abc"});
        assert_eq!(sdp_text(&object), Some("v=0 abc"));

        let bare = json!("v=0 bare");
        assert_eq!(sdp_text(&bare), Some("v=0 bare"));

        let missing = json!({"type": "offer"});
        assert_eq!(sdp_text(&missing), None);
    }
}

//! Peer session orchestrator
//!
//! Client-side owner of every media transport a process holds. As a broadcaster it
//! answers each viewer's offer with an independent responder link (fan-out); as a
//! viewer it holds at most one initiator link. All negotiation traffic goes through a
//! [`SignalingSink`] and arrives through [`PeerOrchestrator::handle_server_message`].
//!
//! Transport callbacks are funnelled through one channel and processed by a pump task,
//! tagged with the link id they belong to so events of a replaced link are ignored.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use super::audio_track::ComposedAudioTrack;
use super::candidates::CandidateQueue;
use super::link::{LinkState, LinkTransition, PeerLink};
use super::signaling::{from_payload, to_payload, IceCandidate, SdpAnswer, SdpOffer};
use super::transport::{
    LocalTrack, MediaTransport, PeerRole, TransportEvent, TransportEventSink, TransportFactory,
    TransportNotice,
};
use crate::audio::{AudioComposer, OpusConfig};
use crate::error::{AppError, Result};
use crate::relay::{
    ClientMessage, InboundSignal, MetadataPatch, NegotiationKind, ServerMessage, SessionMetadata,
    SessionSummary,
};

/// Event channel capacity
const EVENT_CAPACITY: usize = 64;

/// Outbound half of the relay connection
pub trait SignalingSink: Send + Sync {
    fn send(&self, msg: ClientMessage) -> Result<()>;
}

impl SignalingSink for mpsc::UnboundedSender<ClientMessage> {
    fn send(&self, msg: ClientMessage) -> Result<()> {
        mpsc::UnboundedSender::send(self, msg).map_err(|_| AppError::SignalingClosed)
    }
}

/// Why a session ended locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Explicit local stop
    Stopped,
    /// The viewed session left the directory
    RemoteGone,
    /// Transport reported failed/closed
    TransportFailed,
    /// The relay connection was lost
    RelayDisconnected,
    /// A new view replaced this one
    Replaced,
    /// No connection within the negotiation timeout
    Timeout,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Stopped => write!(f, "stopped"),
            EndReason::RemoteGone => write!(f, "remote gone"),
            EndReason::TransportFailed => write!(f, "transport failed"),
            EndReason::RelayDisconnected => write!(f, "relay disconnected"),
            EndReason::Replaced => write!(f, "replaced"),
            EndReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Local notifications for the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    PeerConnected { remote_id: String, role: PeerRole },
    PeerClosed { remote_id: String, role: PeerRole },
    /// The viewer session (`remote_id` set) or the broadcast (`None`) ended
    SessionEnded {
        remote_id: Option<String>,
        reason: EndReason,
    },
    /// A view attempt failed; the only failure meant to interrupt the user
    ViewFailed { remote_id: String, reason: String },
}

/// Media the broadcaster attaches to every responder link
#[derive(Default)]
pub struct LocalMedia {
    tracks: Vec<LocalTrack>,
    composer: Option<AudioComposer>,
    audio: Option<ComposedAudioTrack>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            tracks,
            ..Default::default()
        }
    }

    /// Encode the composer's mix into an Opus track shared by every responder link
    pub fn with_composer(self, composer: AudioComposer) -> Result<Self> {
        self.with_composer_config(composer, OpusConfig::default())
    }

    pub fn with_composer_config(
        mut self,
        composer: AudioComposer,
        config: OpusConfig,
    ) -> Result<Self> {
        let audio = ComposedAudioTrack::start(&composer, config)?;
        self.tracks.push(audio.track());
        self.audio = Some(audio);
        self.composer = Some(composer);
        Ok(self)
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn composer(&self) -> Option<&AudioComposer> {
        self.composer.as_ref()
    }

    pub fn audio_track(&self) -> Option<&ComposedAudioTrack> {
        self.audio.as_ref()
    }

    fn release(self) {
        if let Some(audio) = self.audio {
            audio.stop();
        }
        if let Some(composer) = self.composer {
            composer.stop();
        }
        debug!("Released {} local tracks", self.tracks.len());
    }
}

#[derive(Default)]
struct Inner {
    responders: HashMap<String, PeerLink>,
    viewer: Option<PeerLink>,
    candidates: CandidateQueue,
    media: Option<LocalMedia>,
    /// Session ids in the latest directory list
    listed: HashSet<String>,
}

impl Inner {
    fn link_mut(&mut self, remote_id: &str) -> Option<&mut PeerLink> {
        match self.viewer.as_mut() {
            Some(viewer) if viewer.remote_id() == remote_id => Some(viewer),
            _ => self.responders.get_mut(remote_id),
        }
    }

    fn link_by_id(&mut self, link_id: u64) -> Option<&mut PeerLink> {
        match self.viewer.as_mut() {
            Some(viewer) if viewer.id() == link_id => Some(viewer),
            _ => self.responders.values_mut().find(|link| link.id() == link_id),
        }
    }
}

/// Negotiation state machine for one client process
pub struct PeerOrchestrator {
    factory: Arc<dyn TransportFactory>,
    signaling: Arc<dyn SignalingSink>,
    negotiation_timeout: Duration,
    inner: Mutex<Inner>,
    events: broadcast::Sender<OrchestratorEvent>,
    notice_tx: mpsc::UnboundedSender<TransportNotice>,
    next_link_id: AtomicU64,
}

impl PeerOrchestrator {
    /// Create an orchestrator and start its transport event pump
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        signaling: Arc<dyn SignalingSink>,
        negotiation_timeout: Duration,
    ) -> Arc<Self> {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let orchestrator = Arc::new(Self {
            factory,
            signaling,
            negotiation_timeout,
            inner: Mutex::new(Inner::default()),
            events,
            notice_tx,
            next_link_id: AtomicU64::new(1),
        });

        tokio::spawn(notice_pump(Arc::downgrade(&orchestrator), notice_rx));
        orchestrator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Broadcaster role
    // ========================================================================

    /// Announce a session and start answering viewer offers with `media`
    pub async fn start_broadcast(&self, metadata: SessionMetadata, media: LocalMedia) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.media.is_some() {
            info!("Restarting broadcast, closing existing viewers");
            self.teardown_broadcast(&mut inner, EndReason::Replaced).await;
        }

        self.signaling.send(ClientMessage::StartSession(metadata))?;
        inner.media = Some(media);
        info!("Broadcast started");
        Ok(())
    }

    pub async fn update_broadcast(&self, patch: MetadataPatch) -> Result<()> {
        if !self.is_broadcasting().await {
            debug!("Ignoring metadata update, not broadcasting");
            return Ok(());
        }
        self.signaling.send(ClientMessage::UpdateMetadata(patch))
    }

    /// Close every responder link, release local media and withdraw the session
    pub async fn stop_broadcast(&self) {
        let mut inner = self.inner.lock().await;
        if inner.media.is_none() && inner.responders.is_empty() {
            return;
        }

        self.teardown_broadcast(&mut inner, EndReason::Stopped).await;
        if let Err(e) = self.signaling.send(ClientMessage::StopSession) {
            debug!("Could not withdraw session: {}", e);
        }
    }

    // ========================================================================
    // Viewer role
    // ========================================================================

    /// Start viewing `remote_id`, replacing any current view
    pub async fn view(self: &Arc<Self>, remote_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.viewer.is_some() {
            self.teardown_viewer(&mut inner, EndReason::Replaced).await;
        }

        let link_id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let sink = TransportEventSink::new(link_id, remote_id, self.notice_tx.clone());

        let transport = match self.factory.create(remote_id, PeerRole::Initiator, sink).await {
            Ok(transport) => transport,
            Err(e) => {
                self.view_failed(remote_id, &e);
                return Err(e);
            }
        };

        if let Err(e) = self.send_offer(transport.as_ref(), remote_id).await {
            if let Err(close_err) = transport.close().await {
                debug!("Failed to close abandoned transport: {}", close_err);
            }
            self.view_failed(remote_id, &e);
            return Err(e);
        }

        let mut link = PeerLink::new(link_id, remote_id, PeerRole::Initiator, transport);
        link.begin_negotiation();
        if inner.listed.contains(remote_id) {
            link.mark_listed();
        }
        inner.viewer = Some(link);
        info!("Viewing {}, offer sent", remote_id);

        self.spawn_watchdog(link_id, remote_id, PeerRole::Initiator);
        Ok(())
    }

    pub async fn stop_viewing(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown_viewer(&mut inner, EndReason::Stopped).await;
    }

    // ========================================================================
    // Inbound relay traffic
    // ========================================================================

    /// Feed one relay message into the state machine. Messages for links that no
    /// longer exist are ignored.
    pub async fn handle_server_message(self: &Arc<Self>, msg: ServerMessage) {
        match msg {
            ServerMessage::Offer(signal) => self.on_offer(signal).await,
            ServerMessage::Answer(signal) => self.on_answer(signal).await,
            ServerMessage::Candidate(signal) => self.on_candidate(signal).await,
            ServerMessage::SessionList(list) | ServerMessage::SessionListChanged(list) => {
                self.on_directory(&list).await
            }
            _ => {}
        }
    }

    /// The relay connection is gone: tear down everything as if stopped
    pub async fn handle_relay_disconnected(&self) {
        let mut inner = self.inner.lock().await;
        warn!("Relay connection lost, tearing down all peer links");

        self.teardown_viewer(&mut inner, EndReason::RelayDisconnected)
            .await;
        if inner.media.is_some() || !inner.responders.is_empty() {
            self.teardown_broadcast(&mut inner, EndReason::RelayDisconnected)
                .await;
        }
        inner.candidates.purge_all();
        inner.listed.clear();
    }

    async fn on_offer(self: &Arc<Self>, signal: InboundSignal) {
        let remote_id = signal.from;
        let offer: SdpOffer = match from_payload(signal.payload) {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Ignoring offer from {}: {}", remote_id, e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        let Some(media) = inner.media.as_ref() else {
            debug!("Not broadcasting, ignoring offer from {}", remote_id);
            return;
        };
        let tracks = media.tracks.clone();

        // A viewer retrying replaces its previous link
        if inner.responders.contains_key(&remote_id) {
            self.close_responder(&mut inner, &remote_id, EndReason::Replaced)
                .await;
        }

        let link_id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let sink = TransportEventSink::new(link_id, &remote_id, self.notice_tx.clone());

        let transport = match self
            .factory
            .create(&remote_id, PeerRole::Responder, sink)
            .await
        {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Failed to create transport for viewer {}: {}", remote_id, e);
                return;
            }
        };

        let answered = self
            .send_answer(transport.as_ref(), tracks, offer, &remote_id)
            .await;
        if let Err(e) = answered {
            warn!("Failed to answer viewer {}: {}", remote_id, e);
            if let Err(close_err) = transport.close().await {
                debug!("Failed to close abandoned transport: {}", close_err);
            }
            return;
        }

        let mut link = PeerLink::new(link_id, &remote_id, PeerRole::Responder, transport);
        link.begin_negotiation();
        link.mark_remote_description();
        info!("Answered viewer {}", remote_id);

        inner.candidates.drain_if_ready(&remote_id, &link).await;
        inner.responders.insert(remote_id.clone(), link);
        drop(inner);

        self.spawn_watchdog(link_id, &remote_id, PeerRole::Responder);
    }

    async fn send_offer(&self, transport: &dyn MediaTransport, remote_id: &str) -> Result<()> {
        let offer = transport.create_offer().await?;
        self.signaling.send(ClientMessage::negotiation(
            NegotiationKind::Offer,
            remote_id,
            to_payload(&offer)?,
        ))
    }

    /// Attach local tracks, answer the viewer's offer and send the answer back
    async fn send_answer(
        &self,
        transport: &dyn MediaTransport,
        tracks: Vec<LocalTrack>,
        offer: SdpOffer,
        remote_id: &str,
    ) -> Result<()> {
        for track in tracks {
            transport.add_track(track).await?;
        }
        let answer = transport.accept_offer(offer).await?;
        self.signaling.send(ClientMessage::negotiation(
            NegotiationKind::Answer,
            remote_id,
            to_payload(&answer)?,
        ))
    }

    async fn on_answer(&self, signal: InboundSignal) {
        let remote_id = signal.from;
        let mut inner = self.inner.lock().await;

        let expecting = matches!(
            inner.viewer.as_ref(),
            Some(link) if link.remote_id() == remote_id
                && link.state() == LinkState::Negotiating
                && !link.has_remote_description()
        );
        if !expecting {
            debug!("Ignoring answer from {}, no matching negotiation", remote_id);
            return;
        }

        let answer: SdpAnswer = match from_payload(signal.payload) {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Ignoring answer from {}: {}", remote_id, e);
                return;
            }
        };

        let Some(transport) = inner.viewer.as_ref().map(|link| link.transport().clone()) else {
            return;
        };

        if let Err(e) = transport.accept_answer(answer).await {
            let err = AppError::Negotiation {
                remote_id: remote_id.clone(),
                reason: e.to_string(),
            };
            self.view_failed(&remote_id, &err);
            self.teardown_viewer(&mut inner, EndReason::TransportFailed)
                .await;
            return;
        }

        let Inner {
            viewer, candidates, ..
        } = &mut *inner;
        let Some(viewer) = viewer.as_mut() else {
            return;
        };

        if viewer.mark_remote_description() == LinkTransition::Connected {
            self.on_connected(&remote_id, PeerRole::Initiator);
        }
        candidates.drain_if_ready(&remote_id, viewer).await;
    }

    async fn on_candidate(&self, signal: InboundSignal) {
        let remote_id = signal.from;
        let candidate: IceCandidate = match from_payload(signal.payload) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Ignoring candidate from {}: {}", remote_id, e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        // A viewer's offer always precedes its hints, so a hint without a link
        // belongs to one that was already torn down
        match inner.link_mut(&remote_id) {
            Some(link) if link.has_remote_description() => {
                if let Err(e) = link.transport().add_ice_candidate(candidate).await {
                    warn!("Dropping rejected candidate from {}: {}", remote_id, e);
                }
            }
            Some(_) => {
                inner.candidates.enqueue(&remote_id, candidate);
            }
            None => debug!("Ignoring candidate from {}, no peer link", remote_id),
        }
    }

    /// A view ends with the directory only once its session has been listed and
    /// then removed; a session the directory has not caught up with yet is left
    /// to negotiate until the watchdog fires.
    async fn on_directory(&self, sessions: &[SessionSummary]) {
        let mut inner = self.inner.lock().await;
        inner.listed = sessions.iter().map(|s| s.id.clone()).collect();

        let listed = match inner.viewer.as_ref() {
            Some(viewer) => inner.listed.contains(viewer.remote_id()),
            None => return,
        };
        let Some(viewer) = inner.viewer.as_mut() else {
            return;
        };

        if listed {
            viewer.mark_listed();
            return;
        }
        if !viewer.was_listed() {
            return;
        }

        let remote_id = viewer.remote_id().to_string();
        info!("Viewed session {} left the directory", remote_id);
        if viewer.state() != LinkState::Connected {
            let err = AppError::Negotiation {
                remote_id: remote_id.clone(),
                reason: "session ended before connecting".to_string(),
            };
            self.view_failed(&remote_id, &err);
        }
        self.teardown_viewer(&mut inner, EndReason::RemoteGone)
            .await;
    }

    // ========================================================================
    // Transport notifications
    // ========================================================================

    async fn on_transport_notice(&self, notice: TransportNotice) {
        let mut inner = self.inner.lock().await;
        let Some(link) = inner.link_by_id(notice.link_id) else {
            debug!(
                "Ignoring event for stale link {} ({})",
                notice.link_id, notice.remote_id
            );
            return;
        };
        let role = link.role();
        let remote_id = link.remote_id().to_string();

        match notice.event {
            TransportEvent::LocalCandidate(candidate) => {
                let sent = to_payload(&candidate).and_then(|payload| {
                    self.signaling.send(ClientMessage::negotiation(
                        NegotiationKind::Candidate,
                        &remote_id,
                        payload,
                    ))
                });
                if let Err(e) = sent {
                    debug!("Failed to send candidate to {}: {}", remote_id, e);
                }
            }
            TransportEvent::StateChanged(state) => match link.on_transport_state(state) {
                LinkTransition::Connected => self.on_connected(&remote_id, role),
                LinkTransition::Closed => {
                    info!("Transport to {} ended ({})", remote_id, state);
                    match role {
                        PeerRole::Initiator => {
                            self.teardown_viewer(&mut inner, EndReason::TransportFailed)
                                .await
                        }
                        PeerRole::Responder => {
                            self.close_responder(&mut inner, &remote_id, EndReason::TransportFailed)
                                .await
                        }
                    }
                }
                LinkTransition::Unchanged => {}
            },
        }
    }

    fn spawn_watchdog(self: &Arc<Self>, link_id: u64, remote_id: &str, role: PeerRole) {
        let orchestrator = Arc::downgrade(self);
        let remote_id = remote_id.to_string();
        let timeout = self.negotiation_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(orchestrator) = orchestrator.upgrade() {
                orchestrator
                    .on_negotiation_timeout(link_id, &remote_id, role)
                    .await;
            }
        });
    }

    async fn on_negotiation_timeout(&self, link_id: u64, remote_id: &str, role: PeerRole) {
        let mut inner = self.inner.lock().await;
        let pending = matches!(
            inner.link_by_id(link_id),
            Some(link) if link.state() != LinkState::Connected
        );
        if !pending {
            return;
        }

        match role {
            PeerRole::Initiator => {
                let err = AppError::NegotiationTimeout {
                    remote_id: remote_id.to_string(),
                    secs: self.negotiation_timeout.as_secs(),
                };
                self.view_failed(remote_id, &err);
                self.teardown_viewer(&mut inner, EndReason::Timeout).await;
            }
            PeerRole::Responder => {
                warn!("Viewer {} never connected, closing its link", remote_id);
                self.close_responder(&mut inner, remote_id, EndReason::Timeout)
                    .await;
            }
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    async fn teardown_viewer(&self, inner: &mut Inner, reason: EndReason) {
        let Some(link) = inner.viewer.take() else {
            return;
        };
        let remote_id = link.remote_id().to_string();

        inner.candidates.purge(&remote_id);
        close_link(link).await;
        info!("Stopped viewing {} ({})", remote_id, reason);

        self.emit(OrchestratorEvent::PeerClosed {
            remote_id: remote_id.clone(),
            role: PeerRole::Initiator,
        });
        self.emit(OrchestratorEvent::SessionEnded {
            remote_id: Some(remote_id),
            reason,
        });
    }

    async fn close_responder(&self, inner: &mut Inner, remote_id: &str, reason: EndReason) {
        let Some(link) = inner.responders.remove(remote_id) else {
            return;
        };

        inner.candidates.purge(remote_id);
        close_link(link).await;
        info!("Closed viewer link {} ({})", remote_id, reason);

        self.emit(OrchestratorEvent::PeerClosed {
            remote_id: remote_id.to_string(),
            role: PeerRole::Responder,
        });
    }

    async fn teardown_broadcast(&self, inner: &mut Inner, reason: EndReason) {
        let remotes: Vec<String> = inner.responders.keys().cloned().collect();
        for remote_id in remotes {
            self.close_responder(inner, &remote_id, reason).await;
        }

        if let Some(media) = inner.media.take() {
            media.release();
        }
        info!("Broadcast ended ({})", reason);
        self.emit(OrchestratorEvent::SessionEnded {
            remote_id: None,
            reason,
        });
    }

    fn on_connected(&self, remote_id: &str, role: PeerRole) {
        info!("Peer {} connected as {}", remote_id, role);
        self.emit(OrchestratorEvent::PeerConnected {
            remote_id: remote_id.to_string(),
            role,
        });
    }

    fn view_failed(&self, remote_id: &str, err: &AppError) {
        warn!("Viewing {} failed: {}", remote_id, err);
        self.emit(OrchestratorEvent::ViewFailed {
            remote_id: remote_id.to_string(),
            reason: err.to_string(),
        });
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub async fn link_state(&self, remote_id: &str) -> Option<LinkState> {
        let mut inner = self.inner.lock().await;
        inner.link_mut(remote_id).map(|link| link.state())
    }

    pub async fn responder_count(&self) -> usize {
        self.inner.lock().await.responders.len()
    }

    /// Remote id of the session being viewed
    pub async fn viewing(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.viewer.as_ref().map(|link| link.remote_id().to_string())
    }

    pub async fn is_broadcasting(&self) -> bool {
        self.inner.lock().await.media.is_some()
    }

    pub async fn queued_candidates(&self, remote_id: &str) -> usize {
        self.inner.lock().await.candidates.len(remote_id)
    }
}

async fn close_link(mut link: PeerLink) {
    link.close();
    if let Err(e) = link.transport().close().await {
        debug!("Error closing transport to {}: {}", link.remote_id(), e);
    }
}

async fn notice_pump(
    orchestrator: Weak<PeerOrchestrator>,
    mut rx: mpsc::UnboundedReceiver<TransportNotice>,
) {
    while let Some(notice) = rx.recv().await {
        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        orchestrator.on_transport_notice(notice).await;
    }
    debug!("Transport event pump exited");
}

//! Media transport abstraction
//!
//! The orchestrator drives negotiation through [`MediaTransport`] and never touches
//! codec or ICE mechanics directly. [`super::peer::RtcTransport`] is the production
//! implementation; tests script their own.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;

use super::signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
use crate::error::Result;

/// Local media track shared by every responder link
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Direction of a peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Viewer side: sends the offer, only receives media
    Initiator,
    /// Broadcaster side: answers, only sends media (one per viewer)
    Responder,
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerRole::Initiator => write!(f, "initiator"),
            PeerRole::Responder => write!(f, "responder"),
        }
    }
}

/// Asynchronous notification raised by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local connectivity hint to trickle to the remote
    LocalCandidate(IceCandidate),
    StateChanged(ConnectionState),
}

/// Transport notification tagged with the link it belongs to
#[derive(Debug, Clone)]
pub struct TransportNotice {
    pub link_id: u64,
    pub remote_id: String,
    pub event: TransportEvent,
}

/// Handle a transport uses to report events for one link
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    link_id: u64,
    remote_id: String,
    tx: mpsc::UnboundedSender<TransportNotice>,
}

impl TransportEventSink {
    pub fn new(link_id: u64, remote_id: &str, tx: mpsc::UnboundedSender<TransportNotice>) -> Self {
        Self {
            link_id,
            remote_id: remote_id.to_string(),
            tx,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Events raised after the orchestrator is gone are discarded
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(TransportNotice {
            link_id: self.link_id,
            remote_id: self.remote_id.clone(),
            event,
        });
    }
}

/// One negotiated media transport between two connections
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn add_track(&self, track: LocalTrack) -> Result<()>;

    /// Create an offer and set it as the local description
    async fn create_offer(&self) -> Result<SdpOffer>;

    /// Set a remote offer, then create and set the local answer
    async fn accept_offer(&self, offer: SdpOffer) -> Result<SdpAnswer>;

    /// Set the remote answer
    async fn accept_answer(&self, answer: SdpAnswer) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates transports for new peer links
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        remote_id: &str,
        role: PeerRole,
        events: TransportEventSink,
    ) -> Result<Arc<dyn MediaTransport>>;
}

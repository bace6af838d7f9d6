//! Peer link state machine
//!
//! ```text
//! IDLE --local offer/answer sent--> NEGOTIATING
//! NEGOTIATING --remote description set + transport connected--> CONNECTED
//! NEGOTIATING | CONNECTED --stop, or transport failed/closed--> CLOSED
//! ```
//!
//! CLOSED is terminal: every further input is a no-op, which is how late messages for a
//! torn-down link are absorbed. A retry with the same remote needs a new link.

use std::sync::Arc;
use std::time::Instant;

use super::signaling::ConnectionState;
use super::transport::{MediaTransport, PeerRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Idle => write!(f, "idle"),
            LinkState::Negotiating => write!(f, "negotiating"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Closed => write!(f, "closed"),
        }
    }
}

/// Outcome of feeding a transport state into a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    Unchanged,
    Connected,
    Closed,
}

/// One media transport to one remote connection
pub struct PeerLink {
    id: u64,
    remote_id: String,
    role: PeerRole,
    state: LinkState,
    remote_description_set: bool,
    transport_connected: bool,
    /// The remote's session has appeared in the directory during this link
    listed: bool,
    transport: Arc<dyn MediaTransport>,
    created_at: Instant,
}

impl PeerLink {
    pub fn new(
        id: u64,
        remote_id: impl Into<String>,
        role: PeerRole,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        Self {
            id,
            remote_id: remote_id.into(),
            role,
            state: LinkState::Idle,
            remote_description_set: false,
            transport_connected: false,
            listed: false,
            transport,
            created_at: Instant::now(),
        }
    }

    /// Unique per orchestrator; distinguishes a retried link from its predecessor
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn transport(&self) -> &Arc<dyn MediaTransport> {
        &self.transport
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn mark_listed(&mut self) {
        self.listed = true;
    }

    pub fn was_listed(&self) -> bool {
        self.listed
    }

    pub fn is_closed(&self) -> bool {
        self.state == LinkState::Closed
    }

    /// IDLE -> NEGOTIATING once the local offer or answer has been sent
    pub fn begin_negotiation(&mut self) -> bool {
        if self.state != LinkState::Idle {
            return false;
        }
        self.state = LinkState::Negotiating;
        true
    }

    /// Record that the remote description is set
    pub fn mark_remote_description(&mut self) -> LinkTransition {
        if self.is_closed() {
            return LinkTransition::Unchanged;
        }
        self.remote_description_set = true;
        self.try_connect()
    }

    pub fn on_transport_state(&mut self, state: ConnectionState) -> LinkTransition {
        if self.is_closed() {
            return LinkTransition::Unchanged;
        }

        match state {
            ConnectionState::Connected => {
                self.transport_connected = true;
                self.try_connect()
            }
            ConnectionState::Failed | ConnectionState::Closed => {
                self.close();
                LinkTransition::Closed
            }
            ConnectionState::Disconnected => {
                // ICE may still recover; only failed/closed ends the link
                self.transport_connected = false;
                LinkTransition::Unchanged
            }
            ConnectionState::New | ConnectionState::Connecting => LinkTransition::Unchanged,
        }
    }

    /// Move to CLOSED. Returns `false` if the link was already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = LinkState::Closed;
        true
    }

    fn try_connect(&mut self) -> LinkTransition {
        if self.state == LinkState::Negotiating
            && self.remote_description_set
            && self.transport_connected
        {
            self.state = LinkState::Connected;
            LinkTransition::Connected
        } else {
            LinkTransition::Unchanged
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("id", &self.id)
            .field("remote_id", &self.remote_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("remote_description_set", &self.remote_description_set)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::webrtc::signaling::{IceCandidate, SdpAnswer, SdpOffer};
    use crate::webrtc::transport::LocalTrack;
    use async_trait::async_trait;

    struct NoopTransport;

    #[async_trait]
    impl MediaTransport for NoopTransport {
        async fn add_track(&self, _track: LocalTrack) -> Result<()> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<SdpOffer> {
            Ok(SdpOffer::new("v=0"))
        }
        async fn accept_offer(&self, _offer: SdpOffer) -> Result<SdpAnswer> {
            Ok(SdpAnswer::new("v=0"))
        }
        async fn accept_answer(&self, _answer: SdpAnswer) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn link() -> PeerLink {
        PeerLink::new(1, "bcast1", PeerRole::Initiator, Arc::new(NoopTransport))
    }

    #[test]
    fn test_happy_path() {
        let mut link = link();
        assert_eq!(link.state(), LinkState::Idle);
        assert!(link.begin_negotiation());
        assert!(!link.begin_negotiation());

        assert_eq!(link.mark_remote_description(), LinkTransition::Unchanged);
        assert_eq!(
            link.on_transport_state(ConnectionState::Connected),
            LinkTransition::Connected
        );
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn test_connected_transport_waits_for_remote_description() {
        let mut link = link();
        link.begin_negotiation();

        assert_eq!(
            link.on_transport_state(ConnectionState::Connected),
            LinkTransition::Unchanged
        );
        assert_eq!(link.state(), LinkState::Negotiating);
        assert_eq!(link.mark_remote_description(), LinkTransition::Connected);
    }

    #[test]
    fn test_failure_closes_and_closed_is_terminal() {
        let mut link = link();
        link.begin_negotiation();

        assert_eq!(
            link.on_transport_state(ConnectionState::Failed),
            LinkTransition::Closed
        );
        assert!(link.is_closed());

        assert_eq!(
            link.on_transport_state(ConnectionState::Connected),
            LinkTransition::Unchanged
        );
        assert_eq!(link.mark_remote_description(), LinkTransition::Unchanged);
        assert!(!link.begin_negotiation());
        assert!(!link.close());
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn test_disconnected_is_not_terminal() {
        let mut link = link();
        link.begin_negotiation();
        link.mark_remote_description();
        link.on_transport_state(ConnectionState::Connected);

        assert_eq!(
            link.on_transport_state(ConnectionState::Disconnected),
            LinkTransition::Unchanged
        );
        assert_eq!(link.state(), LinkState::Connected);
    }
}

//! Peer session orchestration over WebRTC
//!
//! Client side of live broadcasting:
//! - [`PeerOrchestrator`]: negotiation state machine and the set of active links
//! - [`PeerLink`]: one transport to one remote connection
//! - [`CandidateQueue`]: connectivity hints parked until a link can take them
//! - [`RtcTransport`]: `webrtc` peer connection behind [`MediaTransport`]
//! - [`ComposedAudioTrack`]: the broadcaster's mixed audio, Opus encoded
//!
//! ```text
//! viewer                         relay                        broadcaster
//!   | view(X): create offer        |                               |
//!   |------------ offer{to X} ---->|------- offer{from V} -------->| new responder link
//!   |                              |<------ answer{to V} ----------| attach tracks, answer
//!   |<---------- answer{from X} ---|                               |
//!   | set remote, drain queue      |                               |
//!   |<========== candidate =======>|<========= candidate =========>|
//! ```

pub mod audio_track;
pub mod candidates;
pub mod config;
pub mod link;
pub mod orchestrator;
pub mod peer;
pub mod signaling;
pub mod transport;

pub use audio_track::{ComposedAudioTrack, AUDIO_STREAM_ID, AUDIO_TRACK_ID};
pub use candidates::{CandidateQueue, MAX_QUEUED_CANDIDATES};
pub use config::{TurnServer, WebRtcConfig};
pub use link::{LinkState, LinkTransition, PeerLink};
pub use orchestrator::{
    EndReason, LocalMedia, OrchestratorEvent, PeerOrchestrator, SignalingSink,
};
pub use peer::{RtcTransport, RtcTransportFactory};
pub use signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
pub use transport::{
    LocalTrack, MediaTransport, PeerRole, TransportEvent, TransportEventSink, TransportFactory,
    TransportNotice,
};

//! WebRTC-backed media transport

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use super::config::WebRtcConfig;
use super::signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
use super::transport::{
    LocalTrack, MediaTransport, PeerRole, TransportEvent, TransportEventSink, TransportFactory,
};
use crate::error::{AppError, Result};

/// Peer connection wrapper reporting state and candidates through a [`TransportEventSink`]
pub struct RtcTransport {
    remote_id: String,
    pc: Arc<RTCPeerConnection>,
}

impl RtcTransport {
    pub async fn new(
        config: &WebRtcConfig,
        role: PeerRole,
        events: TransportEventSink,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = api
            .new_peer_connection(rtc_configuration(config))
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?;
        let pc = Arc::new(pc);

        // Viewers only receive; the broadcaster adds its own send tracks later
        if role == PeerRole::Initiator {
            for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                pc.add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| {
                    AppError::WebRtcError(format!("Failed to add {:?} transceiver: {}", kind, e))
                })?;
            }
        }

        let transport = Self {
            remote_id: events.remote_id().to_string(),
            pc,
        };
        transport.setup_event_handlers(events);

        Ok(transport)
    }

    fn setup_event_handlers(&self, events: TransportEventSink) {
        let state_events = events.clone();
        let remote_id = self.remote_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let events = state_events.clone();
                let remote_id = remote_id.clone();

                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Peer {} connection state: {}", remote_id, state);
                    events.emit(TransportEvent::StateChanged(state));
                })
            }));

        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();

                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(c) = candidate else { return };
                    match c.to_json() {
                        Ok(init) => {
                            debug!("Local ICE candidate: {}", init.candidate);
                            events.emit(TransportEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => debug!("Failed to serialize ICE candidate: {}", e),
                    }
                })
            }));

        let remote_id = self.remote_id.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                info!("Remote {:?} track from {}", track.kind(), remote_id);
                Box::pin(async {})
            },
        ));
    }
}

#[async_trait]
impl MediaTransport for RtcTransport {
    async fn add_track(&self, track: LocalTrack) -> Result<()> {
        self.pc
            .add_track(track)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add track: {}", e)))?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SdpOffer> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!("Failed to set local description: {}", e))
            })?;

        Ok(SdpOffer::new(offer.sdp))
    }

    async fn accept_offer(&self, offer: SdpOffer) -> Result<SdpAnswer> {
        let sdp = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| AppError::WebRtcError(format!("Invalid SDP offer: {}", e)))?;

        self.pc.set_remote_description(sdp).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!("Failed to set local description: {}", e))
            })?;

        Ok(SdpAnswer::new(answer.sdp))
    }

    async fn accept_answer(&self, answer: SdpAnswer) -> Result<()> {
        let sdp = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| AppError::WebRtcError(format!("Invalid SDP answer: {}", e)))?;

        self.pc.set_remote_description(sdp).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to close peer connection: {}", e))
        })
    }
}

/// Factory producing [`RtcTransport`]s from a shared configuration
pub struct RtcTransportFactory {
    config: WebRtcConfig,
}

impl RtcTransportFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        remote_id: &str,
        role: PeerRole,
        events: TransportEventSink,
    ) -> Result<Arc<dyn MediaTransport>> {
        debug!("Creating {} transport for {}", role, remote_id);
        let transport = RtcTransport::new(&self.config, role, events).await?;
        Ok(Arc::new(transport))
    }
}

fn rtc_configuration(config: &WebRtcConfig) -> RTCConfiguration {
    let mut ice_servers = vec![];

    for stun_url in &config.stun_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![stun_url.clone()],
            ..Default::default()
        });
    }

    for turn in &config.turn_servers {
        ice_servers.push(RTCIceServer {
            urls: turn.urls.clone(),
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::config::TurnServer;

    #[test]
    fn test_ice_servers_from_config() {
        let config = WebRtcConfig {
            stun_servers: vec!["stun:stun.example.com:3478".to_string()],
            turn_servers: vec![TurnServer {
                urls: vec!["turn:turn.example.com:3478?transport=udp".to_string()],
                username: "guild".to_string(),
                credential: "secret".to_string(),
            }],
            ..Default::default()
        };

        let rtc = rtc_configuration(&config);
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_servers[1].username, "guild");
    }
}

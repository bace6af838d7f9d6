//! Opus track carrying the broadcaster's composed audio
//!
//! One track is shared by every responder link; `webrtc` fans each written sample out
//! to all bound peer connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::transport::LocalTrack;
use crate::audio::{fit_frame, AudioComposer, OpusConfig, OpusEncoder, PcmFrame};
use crate::error::Result;

pub const AUDIO_TRACK_ID: &str = "composed-audio";
pub const AUDIO_STREAM_ID: &str = "raidcast";

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// Encodes the composer's output into a sample track until stopped or dropped
pub struct ComposedAudioTrack {
    track: Arc<TrackLocalStaticSample>,
    packets_sent: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl ComposedAudioTrack {
    pub fn start(composer: &AudioComposer, config: OpusConfig) -> Result<Self> {
        let encoder = OpusEncoder::new(config)?;
        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            AUDIO_TRACK_ID.to_string(),
            AUDIO_STREAM_ID.to_string(),
        ));
        let packets_sent = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        tokio::spawn(encode_loop(
            composer.subscribe(),
            encoder,
            track.clone(),
            packets_sent.clone(),
            cancel.clone(),
        ));
        info!("Composed audio track started");

        Ok(Self {
            track,
            packets_sent,
            cancel,
        })
    }

    /// Track to attach to each responder link
    pub fn track(&self) -> LocalTrack {
        self.track.clone()
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ComposedAudioTrack {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn encode_loop(
    mut frames: broadcast::Receiver<Arc<PcmFrame>>,
    mut encoder: OpusEncoder,
    track: Arc<TrackLocalStaticSample>,
    packets_sent: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Audio track lagged, skipped {} frames", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let packet = match encoder.encode(&fit_frame(&frame)) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping audio frame: {}", e);
                continue;
            }
        };

        let sample = Sample {
            duration: packet.duration(),
            data: packet.data,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            debug!("Opus write_sample failed: {}", e);
            continue;
        }
        packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    debug!("Composed audio track loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSource, FRAME_SAMPLES};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use webrtc::track::track_local::TrackLocal;

    struct FeedSource(parking_lot::Mutex<Option<mpsc::Receiver<PcmFrame>>>);

    #[async_trait]
    impl AudioSource for FeedSource {
        fn name(&self) -> &str {
            "mic"
        }

        async fn acquire(&self) -> Result<mpsc::Receiver<PcmFrame>> {
            Ok(self.0.lock().take().unwrap())
        }
    }

    #[tokio::test]
    async fn test_mixed_frames_are_written_to_track() {
        let (tx, rx) = mpsc::channel(8);
        let source = FeedSource(parking_lot::Mutex::new(Some(rx)));
        let composer = AudioComposer::start(vec![Box::new(source)]).await;
        let audio = ComposedAudioTrack::start(&composer, OpusConfig::default()).unwrap();
        assert_eq!(audio.track().id(), AUDIO_TRACK_ID);

        for _ in 0..3 {
            tx.send(vec![1000; FRAME_SAMPLES]).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while audio.packets_sent() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        audio.stop();
        assert!(audio.is_stopped());
    }
}

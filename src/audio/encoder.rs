//! Opus encoder for the composed broadcast audio

use audiopus::coder::GenericCtl;
use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use std::time::Duration;
use tracing::{info, trace};

use super::composer::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::{AppError, Result};

/// Largest packet libopus can produce
const MAX_PACKET_SIZE: usize = 4000;

/// Opus application mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusApplication {
    /// Speech-optimized (voice chat only)
    Voip,
    /// General audio (game sound plus voice)
    Audio,
    LowDelay,
}

/// Opus encoder configuration
#[derive(Debug, Clone)]
pub struct OpusConfig {
    /// Target bitrate in bps
    pub bitrate: u32,
    pub application: OpusApplication,
    /// Enable in-band forward error correction
    pub fec: bool,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            bitrate: 64000,
            application: OpusApplication::Audio,
            fec: true,
        }
    }
}

impl OpusConfig {
    fn to_audiopus_application(&self) -> Application {
        match self.application {
            OpusApplication::Voip => Application::Voip,
            OpusApplication::Audio => Application::Audio,
            OpusApplication::LowDelay => Application::LowDelay,
        }
    }
}

/// One encoded 20 ms frame
#[derive(Debug, Clone)]
pub struct OpusPacket {
    pub data: Bytes,
    /// Samples per channel
    pub samples: u32,
}

impl OpusPacket {
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.samples as u64 * 1_000_000 / SAMPLE_RATE as u64)
    }
}

/// Encodes 48 kHz stereo frames as produced by the composer
pub struct OpusEncoder {
    encoder: Encoder,
    output: Vec<u8>,
    packets: u64,
}

impl OpusEncoder {
    pub fn new(config: OpusConfig) -> Result<Self> {
        let mut encoder = Encoder::new(
            SampleRate::Hz48000,
            Channels::Stereo,
            config.to_audiopus_application(),
        )
        .map_err(|e| AppError::AudioError(format!("Failed to create Opus encoder: {:?}", e)))?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(config.bitrate as i32))
            .map_err(|e| AppError::AudioError(format!("Failed to set bitrate: {:?}", e)))?;

        if config.fec {
            encoder
                .set_inband_fec(true)
                .map_err(|e| AppError::AudioError(format!("Failed to enable FEC: {:?}", e)))?;
        }

        info!(
            "Opus encoder created: {}Hz {}ch {}bps",
            SAMPLE_RATE, CHANNELS, config.bitrate
        );

        Ok(Self {
            encoder,
            output: vec![0u8; MAX_PACKET_SIZE],
            packets: 0,
        })
    }

    /// Encode one interleaved frame of exactly [`FRAME_SAMPLES`] samples
    pub fn encode(&mut self, pcm: &[i16]) -> Result<OpusPacket> {
        if pcm.len() != FRAME_SAMPLES {
            return Err(AppError::AudioError(format!(
                "Expected {} samples per frame, got {}",
                FRAME_SAMPLES,
                pcm.len()
            )));
        }

        let len = self
            .encoder
            .encode(pcm, &mut self.output)
            .map_err(|e| AppError::AudioError(format!("Opus encode failed: {:?}", e)))?;
        self.packets += 1;

        trace!("Encoded {} samples to {} bytes Opus", pcm.len(), len);

        Ok(OpusPacket {
            data: Bytes::copy_from_slice(&self.output[..len]),
            samples: (pcm.len() / CHANNELS as usize) as u32,
        })
    }

    pub fn packets_encoded(&self) -> u64 {
        self.packets
    }
}

/// Pad with silence or truncate so a mixed frame fits the encoder's frame size
pub fn fit_frame(pcm: &[i16]) -> Vec<i16> {
    let mut frame = pcm.to_vec();
    frame.resize(FRAME_SAMPLES, 0);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_full_frame() {
        let mut encoder = OpusEncoder::new(OpusConfig::default()).unwrap();
        let tone: Vec<i16> = (0..FRAME_SAMPLES)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();

        let packet = encoder.encode(&tone).unwrap();
        assert!(!packet.data.is_empty());
        assert_eq!(packet.samples, 960);
        assert_eq!(packet.duration(), Duration::from_millis(20));
        assert_eq!(encoder.packets_encoded(), 1);
    }

    #[test]
    fn test_short_frame_is_rejected() {
        let mut encoder = OpusEncoder::new(OpusConfig::default()).unwrap();
        assert!(matches!(
            encoder.encode(&[0i16; 100]),
            Err(AppError::AudioError(_))
        ));
        assert_eq!(encoder.packets_encoded(), 0);
    }

    #[test]
    fn test_fit_frame() {
        let short = fit_frame(&[7, 7]);
        assert_eq!(short.len(), FRAME_SAMPLES);
        assert_eq!(&short[..3], &[7, 7, 0]);

        let long = vec![1i16; FRAME_SAMPLES + 10];
        assert_eq!(fit_frame(&long).len(), FRAME_SAMPLES);
    }
}

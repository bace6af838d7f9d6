//! Broadcaster audio composition and encoding

pub mod composer;
pub mod encoder;

pub use composer::{
    mix_frames, AudioComposer, AudioSource, PcmFrame, SourceControl, FRAME_DURATION,
    FRAME_SAMPLES, SAMPLE_RATE,
};
pub use encoder::{fit_frame, OpusApplication, OpusConfig, OpusEncoder, OpusPacket};

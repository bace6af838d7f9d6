//! Broadcast audio composition
//!
//! Mixes several independently acquired PCM inputs (microphone, game capture, voice
//! chat) into one output stream that feeds the broadcaster's audio track. Each source
//! is optional: a source that fails to acquire is logged and skipped, and the others
//! carry on.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Sample rate of every input and of the mixed output
pub const SAMPLE_RATE: u32 = 48000;

/// Interleaved stereo
pub const CHANNELS: u32 = 2;

/// Mixing period
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Interleaved samples per 20 ms frame
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize / 50) * CHANNELS as usize;

/// Mixed output frames buffered per subscriber
const OUTPUT_CAPACITY: usize = 50;

/// Interleaved 16-bit PCM frame
pub type PcmFrame = Vec<i16>;

/// An audio input that can be opened on demand
#[async_trait]
pub trait AudioSource: Send + Sync {
    fn name(&self) -> &str;

    /// Start capturing; frames arrive on the returned channel until it closes
    async fn acquire(&self) -> Result<mpsc::Receiver<PcmFrame>>;
}

/// Per-source mixing controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceControl {
    pub gain: f32,
    pub muted: bool,
}

impl Default for SourceControl {
    fn default() -> Self {
        Self {
            gain: 1.0,
            muted: false,
        }
    }
}

struct MixerInput {
    name: String,
    control: Arc<Mutex<SourceControl>>,
    rx: mpsc::Receiver<PcmFrame>,
}

/// Mixes acquired sources into one output stream until stopped or dropped
pub struct AudioComposer {
    controls: HashMap<String, Arc<Mutex<SourceControl>>>,
    failed: Vec<String>,
    output: broadcast::Sender<Arc<PcmFrame>>,
    cancel: CancellationToken,
}

impl AudioComposer {
    /// Acquire every source and start the mixing loop
    pub async fn start(sources: Vec<Box<dyn AudioSource>>) -> Self {
        let mut inputs = Vec::new();
        let mut controls = HashMap::new();
        let mut failed = Vec::new();

        for source in sources {
            let name = source.name().to_string();
            match source.acquire().await {
                Ok(rx) => {
                    info!("Audio source acquired: {}", name);
                    let control = Arc::new(Mutex::new(SourceControl::default()));
                    controls.insert(name.clone(), control.clone());
                    inputs.push(MixerInput { name, control, rx });
                }
                Err(e) => {
                    warn!("Audio source {} unavailable, skipping: {}", name, e);
                    failed.push(name);
                }
            }
        }

        let (output, _) = broadcast::channel(OUTPUT_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(mix_loop(inputs, output.clone(), cancel.clone()));

        Self {
            controls,
            failed,
            output,
            cancel,
        }
    }

    /// Subscribe to mixed frames
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PcmFrame>> {
        self.output.subscribe()
    }

    /// Returns `false` if no such source is active
    pub fn set_gain(&self, source: &str, gain: f32) -> bool {
        match self.controls.get(source) {
            Some(control) => {
                control.lock().gain = gain.max(0.0);
                true
            }
            None => false,
        }
    }

    /// Returns `false` if no such source is active
    pub fn set_muted(&self, source: &str, muted: bool) -> bool {
        match self.controls.get(source) {
            Some(control) => {
                control.lock().muted = muted;
                true
            }
            None => false,
        }
    }

    pub fn control(&self, source: &str) -> Option<SourceControl> {
        self.controls.get(source).map(|control| *control.lock())
    }

    pub fn active_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controls.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn failed_sources(&self) -> &[String] {
        &self.failed
    }

    /// Stop mixing and release every input
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Stopping audio composer");
            self.cancel.cancel();
        }
    }
}

impl Drop for AudioComposer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn mix_loop(
    mut inputs: Vec<MixerInput>,
    output: broadcast::Sender<Arc<PcmFrame>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(FRAME_DURATION);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let mut frames = Vec::with_capacity(inputs.len());
        inputs.retain_mut(|input| match input.rx.try_recv() {
            Ok(frame) => {
                let control = *input.control.lock();
                if !control.muted {
                    frames.push((frame, control.gain));
                }
                true
            }
            Err(mpsc::error::TryRecvError::Empty) => true,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                info!("Audio source ended: {}", input.name);
                false
            }
        });

        if frames.is_empty() {
            continue;
        }

        let refs: Vec<(&[i16], f32)> = frames
            .iter()
            .map(|(frame, gain)| (frame.as_slice(), *gain))
            .collect();
        let _ = output.send(Arc::new(mix_frames(&refs)));
    }

    debug!("Audio mix loop exited");
}

/// Sum inputs with per-input gain, saturating at the i16 range.
/// Shorter inputs are treated as silence past their end.
pub fn mix_frames(inputs: &[(&[i16], f32)]) -> PcmFrame {
    let len = inputs.iter().map(|(frame, _)| frame.len()).max().unwrap_or(0);
    let mut acc = vec![0f32; len];

    for (frame, gain) in inputs {
        for (sum, sample) in acc.iter_mut().zip(frame.iter()) {
            *sum += *sample as f32 * gain;
        }
    }

    acc.into_iter()
        .map(|s| s.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

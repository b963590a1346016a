//! Decode-backed player
//!
//! The whole clip is decoded once into memory. Starts are bounded natively:
//! the sink voice gets an exact frame budget and ends by itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sc_core::{ClipRef, Decibels};
use symphonia::core::io::MediaSource;

use super::media::MediaStream;
use super::{Player, PlayerKind};
use crate::error::{LoadError, PlaybackError};
use crate::output::{AudioOutput, OutputSink, SinkCommand, SinkGain};

/// A clip decoded into memory (stereo interleaved, source sample rate)
#[derive(Debug)]
pub struct DecodedClip {
    pub clip: ClipRef,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub frames: usize,
}

impl DecodedClip {
    pub fn new(clip: ClipRef, samples: Vec<f32>, sample_rate: u32) -> Self {
        let frames = samples.len() / 2;
        Self {
            clip,
            samples,
            sample_rate,
            frames,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    /// Stereo frame at `index` (caller checks bounds)
    #[inline]
    pub(crate) fn frame(&self, index: usize) -> (f32, f32) {
        (self.samples[index * 2], self.samples[index * 2 + 1])
    }
}

/// Decode a whole clip. Checks `cancel` between packets.
pub fn decode_clip(
    source: Box<dyn MediaSource>,
    clip: &ClipRef,
    cancel: &AtomicBool,
) -> Result<DecodedClip, LoadError> {
    let extension = clip.extension();
    let mut stream = MediaStream::open(source, extension.as_deref())?;
    let sample_rate = stream.sample_rate();

    let estimated = stream
        .duration()
        .map(|d| (d * sample_rate as f64) as usize * 2)
        .unwrap_or(0);
    let mut samples = Vec::with_capacity(estimated);

    while stream.read_packet(&mut samples)? {
        if cancel.load(Ordering::Relaxed) {
            return Err(LoadError::Decode(format!("decode of {} cancelled", clip)));
        }
    }

    if samples.is_empty() {
        return Err(LoadError::Decode(format!("{} contains no audio", clip)));
    }

    let decoded = DecodedClip::new(clip.clone(), samples, sample_rate);
    log::debug!(
        "Decoded {}: {} frames @ {} Hz ({:.2}s)",
        clip,
        decoded.frames,
        sample_rate,
        decoded.duration_secs()
    );
    Ok(decoded)
}

pub struct DecodePlayer {
    clip: Arc<DecodedClip>,
    output: Arc<AudioOutput>,
    voice: Option<u64>,
    gain: Decibels,
    disposed: bool,
}

impl DecodePlayer {
    pub fn new(clip: Arc<DecodedClip>, output: Arc<AudioOutput>) -> Self {
        Self {
            clip,
            output,
            voice: None,
            gain: Decibels::ZERO,
            disposed: false,
        }
    }

    pub fn clip(&self) -> &Arc<DecodedClip> {
        &self.clip
    }
}

impl Player for DecodePlayer {
    fn kind(&self) -> PlayerKind {
        PlayerKind::Decode
    }

    fn is_loaded(&self) -> bool {
        !self.disposed
    }

    fn duration(&self) -> f64 {
        self.clip.duration_secs()
    }

    fn start(&mut self, offset: f64, duration: f64) -> Result<(), PlaybackError> {
        if self.disposed {
            return Err(PlaybackError::Disposed);
        }
        if !self.output.is_ready() {
            return Err(PlaybackError::OutputNotReady);
        }

        self.stop();

        let start_frame = (offset.max(0.0) * self.clip.sample_rate as f64).round() as usize;
        let frames = (duration.max(0.0) * self.output.sample_rate() as f64).round() as usize;
        if start_frame >= self.clip.frames || frames == 0 {
            return Ok(());
        }

        let voice_id = self.output.next_voice_id();
        self.output.submit(SinkCommand::PlayBuffer {
            voice_id,
            clip: Arc::clone(&self.clip),
            start_frame,
            frames,
            gain: SinkGain::Decibels(self.gain),
        })?;
        self.voice = Some(voice_id);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(voice_id) = self.voice.take() {
            self.output.send(SinkCommand::Stop { voice_id });
        }
    }

    fn set_gain(&mut self, gain: f64) {
        self.gain = Decibels::from_gain(gain);
        if let Some(voice_id) = self.voice {
            self.output.send(SinkCommand::SetGain {
                voice_id,
                gain: SinkGain::Decibels(self.gain),
            });
        }
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.stop();
            self.disposed = true;
        }
    }
}

impl Drop for DecodePlayer {
    fn drop(&mut self) {
        self.dispose();
    }
}

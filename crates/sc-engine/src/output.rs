//! Output sink - the single process-wide mixer feeding the audio device
//!
//! Players never touch the device. They push commands into a lock-free ring
//! and the audio callback mixes every active sink voice:
//! - Buffer voices read a decoded clip with a native frame budget
//! - Stream voices drain a ring filled by a background reader
//! - Commands are applied at the top of each callback (no locks, no allocations)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use sc_core::Decibels;

use crate::config::OutputConfig;
use crate::error::{OutputError, PlaybackError};
use crate::player::DecodedClip;

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Maximum concurrent sink voices (pre-allocated)
const MAX_VOICES: usize = 64;

/// Command ring buffer size
const COMMAND_BUFFER_SIZE: usize = 256;

/// Sample rate assumed before a device has been opened
pub const FALLBACK_SAMPLE_RATE: u32 = 48000;

// ═══════════════════════════════════════════════════════════════════════════
// SINK CONTRACT
// ═══════════════════════════════════════════════════════════════════════════

/// The output device as the engine sees it
pub trait OutputSink: Send + Sync {
    /// Open the device. Playback starts are rejected until this succeeds.
    fn initialize(&self) -> Result<(), OutputError>;
    fn is_ready(&self) -> bool;
    fn sample_rate(&self) -> u32;
    fn shutdown(&self);

    /// Voices the mixer dropped because its pool was full, since creation
    fn dropped_voices(&self) -> u64 {
        0
    }
}

/// Gain as sent by a player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkGain {
    /// Logarithmic control value (decode-backed players)
    Decibels(Decibels),
    /// Linear gain (streaming players)
    Linear(f32),
}

impl SinkGain {
    #[inline]
    fn linear(self) -> f32 {
        match self {
            Self::Decibels(db) => db.to_gain() as f32,
            Self::Linear(gain) => gain.clamp(0.0, 1.0),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// COMMANDS (Lock-free engine -> audio communication)
// ═══════════════════════════════════════════════════════════════════════════

pub(crate) enum SinkCommand {
    /// Play `frames` output frames of a decoded clip from `start_frame`
    PlayBuffer {
        voice_id: u64,
        clip: Arc<DecodedClip>,
        start_frame: usize,
        frames: usize,
        gain: SinkGain,
    },
    /// Play stereo-interleaved samples until the reader hangs up
    PlayStream {
        voice_id: u64,
        samples: Consumer<f32>,
        gain: SinkGain,
    },
    SetGain {
        voice_id: u64,
        gain: SinkGain,
    },
    Stop {
        voice_id: u64,
    },
    StopAll,
}

// ═══════════════════════════════════════════════════════════════════════════
// SINK VOICE
// ═══════════════════════════════════════════════════════════════════════════

enum VoiceSource {
    Idle,
    Buffer {
        clip: Arc<DecodedClip>,
        /// Read position in clip frames
        position: f64,
        /// Clip frames per output frame
        step: f64,
    },
    Stream {
        samples: Consumer<f32>,
    },
}

struct SinkVoice {
    id: u64,
    source: VoiceSource,
    gain: f32,
    /// Output frames left for bounded voices
    remaining: Option<usize>,
    fade_in_remaining: usize,
    fade_out_remaining: Option<usize>,
}

impl SinkVoice {
    fn idle() -> Self {
        Self {
            id: 0,
            source: VoiceSource::Idle,
            gain: 0.0,
            remaining: None,
            fade_in_remaining: 0,
            fade_out_remaining: None,
        }
    }

    #[inline]
    fn is_active(&self) -> bool {
        !matches!(self.source, VoiceSource::Idle)
    }

    fn activate(
        &mut self,
        id: u64,
        source: VoiceSource,
        gain: f32,
        remaining: Option<usize>,
        fade_frames: usize,
    ) {
        self.id = id;
        self.source = source;
        self.gain = gain;
        self.remaining = remaining;
        self.fade_in_remaining = fade_frames;
        self.fade_out_remaining = None;
    }

    fn deactivate(&mut self) {
        self.source = VoiceSource::Idle;
        self.remaining = None;
        self.fade_in_remaining = 0;
        self.fade_out_remaining = None;
    }

    fn start_fade_out(&mut self, fade_frames: usize) {
        if fade_frames == 0 {
            self.deactivate();
        } else if self.fade_out_remaining.is_none() {
            self.fade_out_remaining = Some(fade_frames);
        }
    }

    /// Next stereo frame, or `None` once the source is exhausted
    #[inline]
    fn next_frame(&mut self) -> Option<(f32, f32)> {
        match &mut self.source {
            VoiceSource::Idle => None,
            VoiceSource::Buffer {
                clip,
                position,
                step,
            } => {
                let index = *position as usize;
                if index >= clip.frames {
                    return None;
                }
                let frac = (*position - index as f64) as f32;
                let (l0, r0) = clip.frame(index);
                let (l1, r1) = if index + 1 < clip.frames {
                    clip.frame(index + 1)
                } else {
                    (l0, r0)
                };
                *position += *step;
                Some((l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac))
            }
            VoiceSource::Stream { samples } => {
                if samples.slots() >= 2 {
                    let left = samples.pop().unwrap_or(0.0);
                    let right = samples.pop().unwrap_or(0.0);
                    Some((left, right))
                } else if samples.is_abandoned() {
                    None
                } else {
                    // Reader is behind: underrun, play silence
                    Some((0.0, 0.0))
                }
            }
        }
    }

    /// Mix this voice into `output`, returns true if still playing
    #[inline]
    fn mix_into(&mut self, output: &mut [f32], channels: usize, fade_frames: usize) -> bool {
        let frames = output.len() / channels;

        for frame in 0..frames {
            if let Some(remaining) = self.remaining {
                if remaining == 0 {
                    return false;
                }
            }

            let Some((left, right)) = self.next_frame() else {
                return false;
            };

            let mut envelope: f32 = 1.0;

            if self.fade_in_remaining > 0 && fade_frames > 0 {
                envelope = 1.0 - self.fade_in_remaining as f32 / fade_frames as f32;
                self.fade_in_remaining -= 1;
            }

            // Bounded voices ramp down over the tail of their budget
            if let Some(remaining) = self.remaining {
                if remaining < fade_frames {
                    envelope *= remaining as f32 / fade_frames as f32;
                }
                self.remaining = Some(remaining - 1);
            }

            if let Some(fade_out) = self.fade_out_remaining {
                if fade_out == 0 {
                    return false;
                }
                envelope *= fade_out as f32 / fade_frames.max(1) as f32;
                self.fade_out_remaining = Some(fade_out - 1);
            }

            let left = left * self.gain * envelope;
            let right = right * self.gain * envelope;

            match channels {
                1 => output[frame] += (left + right) * 0.5,
                _ => {
                    // Multichannel: audio in the first two channels
                    output[frame * channels] += left;
                    output[frame * channels + 1] += right;
                }
            }
        }

        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SINK MIXER (audio-thread state)
// ═══════════════════════════════════════════════════════════════════════════

/// Real-time mixer owned by the audio callback (or by a test, offline)
pub struct SinkMixer {
    voices: Vec<SinkVoice>,
    command_rx: Consumer<SinkCommand>,
    sample_rate: u32,
    fade_frames: usize,
    dropped_voices: Arc<AtomicU64>,
}

impl SinkMixer {
    fn new(
        command_rx: Consumer<SinkCommand>,
        sample_rate: u32,
        fade_frames: usize,
        dropped_voices: Arc<AtomicU64>,
    ) -> Self {
        Self {
            voices: (0..MAX_VOICES).map(|_| SinkVoice::idle()).collect(),
            command_rx,
            sample_rate,
            fade_frames,
            dropped_voices,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Process pending commands (lock-free)
    #[inline]
    fn process_commands(&mut self) {
        while let Ok(cmd) = self.command_rx.pop() {
            match cmd {
                SinkCommand::PlayBuffer {
                    voice_id,
                    clip,
                    start_frame,
                    frames,
                    gain,
                } => {
                    let step = clip.sample_rate as f64 / self.sample_rate as f64;
                    let source = VoiceSource::Buffer {
                        clip,
                        position: start_frame as f64,
                        step,
                    };
                    self.activate(voice_id, source, gain.linear(), Some(frames));
                }
                SinkCommand::PlayStream {
                    voice_id,
                    samples,
                    gain,
                } => {
                    self.activate(voice_id, VoiceSource::Stream { samples }, gain.linear(), None);
                }
                SinkCommand::SetGain { voice_id, gain } => {
                    if let Some(voice) = self
                        .voices
                        .iter_mut()
                        .find(|v| v.id == voice_id && v.is_active())
                    {
                        voice.gain = gain.linear();
                    }
                }
                SinkCommand::Stop { voice_id } => {
                    let fade_frames = self.fade_frames;
                    if let Some(voice) = self
                        .voices
                        .iter_mut()
                        .find(|v| v.id == voice_id && v.is_active())
                    {
                        voice.start_fade_out(fade_frames);
                    }
                }
                SinkCommand::StopAll => {
                    let fade_frames = self.fade_frames;
                    for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
                        voice.start_fade_out(fade_frames);
                    }
                }
            }
        }
    }

    fn activate(&mut self, voice_id: u64, source: VoiceSource, gain: f32, frames: Option<usize>) {
        let fade_frames = self.fade_frames;
        if let Some(voice) = self.voices.iter_mut().find(|v| !v.is_active()) {
            voice.activate(voice_id, source, gain, frames, fade_frames);
        } else {
            // No slot available: voice is dropped, the engine side reports it
            self.dropped_voices.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Audio callback body
    #[inline]
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        self.process_commands();

        for sample in output.iter_mut() {
            *sample = 0.0;
        }
        if channels == 0 {
            return;
        }

        let fade_frames = self.fade_frames;
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            if !voice.mix_into(output, channels, fade_frames) {
                voice.deactivate();
            }
        }
    }

    /// Render `frames` frames offline
    pub fn render(&mut self, frames: usize, channels: usize) -> Vec<f32> {
        let mut output = vec![0.0; frames * channels];
        self.process(&mut output, channels);
        output
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// AUDIO OUTPUT (engine-side interface)
// ═══════════════════════════════════════════════════════════════════════════

/// Device-backed output sink
pub struct AudioOutput {
    config: OutputConfig,
    /// Command producer (lock-free send to audio thread)
    command_tx: Mutex<Option<Producer<SinkCommand>>>,
    next_voice_id: AtomicU64,
    sample_rate: AtomicU32,
    running: AtomicBool,
    stream_handle: Mutex<Option<thread::JoinHandle<()>>>,
    stop_signal: Arc<AtomicBool>,
    /// Bumped by the mixer when the voice pool is exhausted
    dropped_voices: Arc<AtomicU64>,
}

impl AudioOutput {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            config,
            command_tx: Mutex::new(None),
            next_voice_id: AtomicU64::new(1),
            sample_rate: AtomicU32::new(FALLBACK_SAMPLE_RATE),
            running: AtomicBool::new(false),
            stream_handle: Mutex::new(None),
            stop_signal: Arc::new(AtomicBool::new(false)),
            dropped_voices: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Ready-to-use output without a device; the caller drives the mixer
    pub fn offline(sample_rate: u32, config: OutputConfig) -> (Arc<Self>, SinkMixer) {
        let (producer, consumer) = RingBuffer::new(COMMAND_BUFFER_SIZE);
        let fade_frames = config.fade_frames(sample_rate);

        let output = Self::new(config);
        output.sample_rate.store(sample_rate, Ordering::Relaxed);
        *output.command_tx.lock() = Some(producer);
        output.running.store(true, Ordering::Release);

        let mixer = SinkMixer::new(
            consumer,
            sample_rate,
            fade_frames,
            Arc::clone(&output.dropped_voices),
        );
        (Arc::new(output), mixer)
    }

    pub(crate) fn next_voice_id(&self) -> u64 {
        self.next_voice_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a command that must reach the mixer
    pub(crate) fn submit(&self, cmd: SinkCommand) -> Result<(), PlaybackError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(PlaybackError::OutputNotReady);
        }
        match self.command_tx.lock().as_mut() {
            Some(tx) => tx
                .push(cmd)
                .map_err(|_| PlaybackError::StartRejected("output command queue full".into())),
            None => Err(PlaybackError::OutputNotReady),
        }
    }

    /// Queue a best-effort command (stop, gain); dropped if the sink is down
    pub(crate) fn send(&self, cmd: SinkCommand) {
        if let Some(tx) = self.command_tx.lock().as_mut() {
            if tx.push(cmd).is_err() {
                log::warn!("[Output] Command queue full, dropping command");
            }
        }
    }

    /// Silence every voice
    pub fn stop_all(&self) {
        self.send(SinkCommand::StopAll);
    }
}

impl OutputSink for AudioOutput {
    fn initialize(&self) -> Result<(), OutputError> {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }

        let (producer, consumer) = RingBuffer::new(COMMAND_BUFFER_SIZE);
        let (ready_tx, ready_rx) = bounded::<Result<u32, OutputError>>(1);

        let stop_signal = Arc::clone(&self.stop_signal);
        self.stop_signal.store(false, Ordering::Release);
        let dropped_voices = Arc::clone(&self.dropped_voices);
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("sc-output".into())
            .spawn(move || {
                run_output_stream(consumer, stop_signal, dropped_voices, ready_tx, config)
            })
            .map_err(|e| OutputError::Stream(e.to_string()))?;

        let timeout = Duration::from_millis(self.config.start_timeout_ms);
        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(sample_rate)) => {
                self.sample_rate.store(sample_rate, Ordering::Relaxed);
                *self.command_tx.lock() = Some(producer);
                *self.stream_handle.lock() = Some(handle);
                self.running.store(true, Ordering::Release);
                log::info!("[Output] Ready at {} Hz", sample_rate);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.stop_signal.store(true, Ordering::Release);
                Err(OutputError::StartTimeout(self.config.start_timeout_ms))
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    fn dropped_voices(&self) -> u64 {
        self.dropped_voices.load(Ordering::Relaxed)
    }

    fn shutdown(&self) {
        self.stop_signal.store(true, Ordering::Release);

        if let Some(handle) = self.stream_handle.lock().take() {
            let _ = handle.join();
        }

        *self.command_tx.lock() = None;
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// AUDIO STREAM THREAD
// ═══════════════════════════════════════════════════════════════════════════

fn run_output_stream(
    command_rx: Consumer<SinkCommand>,
    stop_signal: Arc<AtomicBool>,
    dropped_voices: Arc<AtomicU64>,
    ready_tx: Sender<Result<u32, OutputError>>,
    config: OutputConfig,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(OutputError::NoDevice));
        return;
    };

    let supported = match device.default_output_config() {
        Ok(supported) => supported,
        Err(e) => {
            let _ = ready_tx.send(Err(OutputError::Config(e.to_string())));
            return;
        }
    };

    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate();

    log::info!(
        "[Output] Starting stream: {} Hz, {} channels",
        sample_rate,
        channels
    );

    let mut mixer = SinkMixer::new(
        command_rx,
        sample_rate,
        config.fade_frames(sample_rate),
        dropped_voices,
    );

    let stream = match device.build_output_stream(
        &supported.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            mixer.process(data, channels);
        },
        |err| {
            log::error!("[Output] Stream error: {}", err);
        },
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(OutputError::StreamBuild(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(OutputError::Stream(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(sample_rate));

    while !stop_signal.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    log::info!("[Output] Stream stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_core::ClipRef;

    fn no_fade() -> OutputConfig {
        OutputConfig {
            fade_ms: 0.0,
            ..OutputConfig::default()
        }
    }

    fn ramp_clip(frames: usize, sample_rate: u32) -> Arc<DecodedClip> {
        let samples = (0..frames).flat_map(|i| [1.0, -(i as f32)]).collect();
        Arc::new(DecodedClip::new(ClipRef::from("ramp.wav"), samples, sample_rate))
    }

    #[test]
    fn test_offline_output_is_ready() {
        let (output, mixer) = AudioOutput::offline(8000, no_fade());
        assert!(output.is_ready());
        assert_eq!(output.sample_rate(), 8000);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_buffer_voice_plays_exact_budget() {
        let (output, mut mixer) = AudioOutput::offline(8000, no_fade());
        output
            .submit(SinkCommand::PlayBuffer {
                voice_id: 1,
                clip: ramp_clip(100, 8000),
                start_frame: 10,
                frames: 30,
                gain: SinkGain::Linear(1.0),
            })
            .unwrap();

        let rendered = mixer.render(64, 2);
        let audible = rendered.chunks(2).filter(|f| f[0] != 0.0).count();
        assert_eq!(audible, 30);
        // First frame read comes from clip frame 10
        assert_eq!(rendered[1], -10.0);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_decibel_gain_applied() {
        let (output, mut mixer) = AudioOutput::offline(8000, no_fade());
        output
            .submit(SinkCommand::PlayBuffer {
                voice_id: 1,
                clip: ramp_clip(10, 8000),
                start_frame: 0,
                frames: 10,
                gain: SinkGain::Decibels(Decibels::from_gain(0.5)),
            })
            .unwrap();
        let rendered = mixer.render(4, 2);
        assert!((rendered[0] - 0.5).abs() < 1e-6);

        output.send(SinkCommand::SetGain {
            voice_id: 1,
            gain: SinkGain::Decibels(Decibels::NEG_INF),
        });
        let rendered = mixer.render(4, 2);
        assert!(rendered.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_exhausted_pool_counts_dropped_voices() {
        let (output, mut mixer) = AudioOutput::offline(8000, no_fade());
        let clip = ramp_clip(1000, 8000);

        // Two batches so the command ring never overflows
        for batch in 0..2 {
            for i in 0..MAX_VOICES / 2 + 1 {
                output
                    .submit(SinkCommand::PlayBuffer {
                        voice_id: (batch * MAX_VOICES + i) as u64,
                        clip: Arc::clone(&clip),
                        start_frame: 0,
                        frames: 1000,
                        gain: SinkGain::Linear(0.1),
                    })
                    .unwrap();
            }
            mixer.render(16, 2);
        }

        assert_eq!(mixer.active_voices(), MAX_VOICES);
        assert_eq!(output.dropped_voices(), 2);
    }

    #[test]
    fn test_stop_silences_voice() {
        let (output, mut mixer) = AudioOutput::offline(8000, no_fade());
        output
            .submit(SinkCommand::PlayBuffer {
                voice_id: 7,
                clip: ramp_clip(1000, 8000),
                start_frame: 0,
                frames: 1000,
                gain: SinkGain::Linear(1.0),
            })
            .unwrap();
        mixer.render(16, 2);
        assert_eq!(mixer.active_voices(), 1);

        output.send(SinkCommand::Stop { voice_id: 7 });
        let rendered = mixer.render(16, 2);
        assert!(rendered.iter().all(|s| *s == 0.0));
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_stream_voice_underrun_then_hang_up() {
        let (output, mut mixer) = AudioOutput::offline(8000, no_fade());
        let (mut producer, consumer) = RingBuffer::new(64);
        output
            .submit(SinkCommand::PlayStream {
                voice_id: 3,
                samples: consumer,
                gain: SinkGain::Linear(1.0),
            })
            .unwrap();

        for _ in 0..4 {
            producer.push(0.25).unwrap();
        }
        let rendered = mixer.render(4, 2);
        assert_eq!(&rendered[..4], &[0.25, 0.25, 0.25, 0.25]);
        assert_eq!(&rendered[4..], &[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(mixer.active_voices(), 1);

        drop(producer);
        mixer.render(4, 2);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_buffer_voice_resamples_to_sink_rate() {
        let (output, mut mixer) = AudioOutput::offline(8000, no_fade());
        // 4 kHz clip on an 8 kHz sink: every clip frame spans two output frames
        output
            .submit(SinkCommand::PlayBuffer {
                voice_id: 1,
                clip: ramp_clip(10, 4000),
                start_frame: 0,
                frames: 6,
                gain: SinkGain::Linear(1.0),
            })
            .unwrap();
        let rendered = mixer.render(6, 2);
        let right: Vec<f32> = rendered.chunks(2).map(|f| f[1]).collect();
        assert_eq!(right, vec![0.0, -0.5, -1.0, -1.5, -2.0, -2.5]);
    }

    #[test]
    fn test_shutdown_rejects_submissions() {
        let (output, _mixer) = AudioOutput::offline(8000, no_fade());
        output.shutdown();
        let result = output.submit(SinkCommand::StopAll);
        assert_eq!(result.err(), Some(PlaybackError::OutputNotReady));
    }
}

//! Streaming player
//!
//! Used when a clip cannot be decoded up front. A reader thread decodes from
//! the requested offset, resamples to the sink rate and fills a ring buffer
//! that the sink voice drains. There is no native duration bound: the voice
//! plays until stopped or until the clip runs out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rtrb::{Producer, RingBuffer};
use sc_core::{ClipRef, gain_to_linear};
use symphonia::core::io::MediaSource;

use super::factory::ClipResolver;
use super::media::{LinearResampler, MediaStream};
use super::{Player, PlayerKind};
use crate::error::PlaybackError;
use crate::output::{AudioOutput, OutputSink, SinkCommand, SinkGain};

/// Smallest ring a streaming voice gets (samples)
const MIN_STREAM_BUFFER: usize = 4096;

/// Back-off while the ring is full
const FULL_BUFFER_SLEEP: Duration = Duration::from_millis(5);

struct StreamReader {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StreamReader {
    fn spawn(
        source: Box<dyn MediaSource>,
        clip: ClipRef,
        offset: f64,
        sink_rate: u32,
        producer: Producer<f32>,
    ) -> Result<Self, PlaybackError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("sc-stream".into())
            .spawn(move || run_reader(source, clip, offset, sink_rate, producer, stop_flag))
            .map_err(|e| PlaybackError::StartRejected(e.to_string()))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.signal_stop();
        // The reader wakes within one back-off period
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_reader(
    source: Box<dyn MediaSource>,
    clip: ClipRef,
    offset: f64,
    sink_rate: u32,
    mut producer: Producer<f32>,
    stop: Arc<AtomicBool>,
) {
    let extension = clip.extension();
    let mut stream = match MediaStream::open(source, extension.as_deref()) {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("[Stream] Failed to open {}: {}", clip, e);
            return;
        }
    };

    let mut skip_samples = match stream.seek(offset) {
        Ok(frames) => frames * 2,
        Err(e) => {
            log::warn!("[Stream] Seek to {:.3}s in {} failed: {}", offset, clip, e);
            return;
        }
    };

    let mut resampler = LinearResampler::new(stream.sample_rate(), sink_rate);
    let mut decoded = Vec::new();
    let mut converted = Vec::new();

    'read: loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        decoded.clear();
        match stream.read_packet(&mut decoded) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                log::warn!("[Stream] Decode error in {}: {}", clip, e);
                break;
            }
        }

        let skipped = skip_samples.min(decoded.len());
        skip_samples -= skipped;

        converted.clear();
        resampler.process(&decoded[skipped..], &mut converted);

        let mut written = 0;
        while written < converted.len() {
            if stop.load(Ordering::Acquire) || producer.is_abandoned() {
                break 'read;
            }

            let free = producer.slots();
            if free == 0 {
                thread::sleep(FULL_BUFFER_SLEEP);
                continue;
            }

            let n = free.min(converted.len() - written);
            for &sample in &converted[written..written + n] {
                if producer.push(sample).is_err() {
                    break;
                }
            }
            written += n;
        }
    }

    log::debug!("[Stream] Reader for {} finished", clip);
}

pub struct StreamingPlayer {
    clip: ClipRef,
    resolver: Arc<dyn ClipResolver>,
    output: Arc<AudioOutput>,
    duration: f64,
    buffer_secs: f64,
    gain: f32,
    voice: Option<u64>,
    reader: Option<StreamReader>,
    disposed: bool,
}

impl StreamingPlayer {
    pub fn new(
        clip: ClipRef,
        resolver: Arc<dyn ClipResolver>,
        output: Arc<AudioOutput>,
        duration: f64,
        buffer_secs: f64,
    ) -> Self {
        Self {
            clip,
            resolver,
            output,
            duration,
            buffer_secs,
            gain: 1.0,
            voice: None,
            reader: None,
            disposed: false,
        }
    }

    pub fn clip(&self) -> &ClipRef {
        &self.clip
    }
}

impl Player for StreamingPlayer {
    fn kind(&self) -> PlayerKind {
        PlayerKind::Streaming
    }

    fn is_loaded(&self) -> bool {
        !self.disposed
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    /// `duration` is not enforced here; the caller arms a forced stop
    fn start(&mut self, offset: f64, _duration: f64) -> Result<(), PlaybackError> {
        if self.disposed {
            return Err(PlaybackError::Disposed);
        }
        if !self.output.is_ready() {
            return Err(PlaybackError::OutputNotReady);
        }

        self.stop();

        let source = self
            .resolver
            .open(&self.clip)
            .map_err(|e| PlaybackError::StartRejected(e.to_string()))?;

        let sink_rate = self.output.sample_rate();
        let capacity =
            ((self.buffer_secs.max(0.0) * sink_rate as f64) as usize * 2).max(MIN_STREAM_BUFFER);
        let (producer, consumer) = RingBuffer::new(capacity);

        let reader = StreamReader::spawn(
            source,
            self.clip.clone(),
            offset.max(0.0),
            sink_rate,
            producer,
        )?;

        let voice_id = self.output.next_voice_id();
        // On failure the reader is dropped, which stops and joins it
        self.output.submit(SinkCommand::PlayStream {
            voice_id,
            samples: consumer,
            gain: SinkGain::Linear(self.gain),
        })?;

        self.voice = Some(voice_id);
        self.reader = Some(reader);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(voice_id) = self.voice.take() {
            self.output.send(SinkCommand::Stop { voice_id });
        }
        if let Some(reader) = self.reader.take() {
            reader.signal_stop();
        }
    }

    fn set_gain(&mut self, gain: f64) {
        self.gain = gain_to_linear(gain);
        if let Some(voice_id) = self.voice {
            self.output.send(SinkCommand::SetGain {
                voice_id,
                gain: SinkGain::Linear(self.gain),
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

impl Drop for StreamingPlayer {
    fn drop(&mut self) {
        self.dispose();
    }
}

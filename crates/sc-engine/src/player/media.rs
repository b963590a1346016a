//! Symphonia-backed media reading shared by both player backends

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::LoadError;

/// An opened clip, decoded packet by packet to stereo f32
pub(crate) struct MediaStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: u32,
    duration: Option<f64>,
}

impl MediaStream {
    pub(crate) fn open(
        source: Box<dyn MediaSource>,
        extension: Option<&str>,
    ) -> Result<Self, LoadError> {
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(map_symphonia_error)?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LoadError::UnsupportedFormat("no audio track found".into()))?;

        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| LoadError::Decode("unknown sample rate".into()))?;
        let duration = params
            .n_frames
            .map(|frames| frames as f64 / sample_rate as f64);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(map_symphonia_error)?;

        Ok(Self {
            format,
            decoder,
            track_id,
            time_base: params.time_base,
            sample_rate,
            duration,
        })
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration from the container header, if it has one
    pub(crate) fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Decode the next packet and append its frames to `out` as stereo
    /// interleaved samples. Returns `Ok(false)` at end of stream.
    pub(crate) fn read_packet(&mut self, out: &mut Vec<f32>) -> Result<bool, LoadError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let channels = spec.channels.count();
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    push_stereo(buffer.samples(), channels, out);
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            }
        }
    }

    /// Seek to `seconds`. Returns how many decoded frames must be dropped
    /// before the exact position is reached.
    pub(crate) fn seek(&mut self, seconds: f64) -> Result<usize, LoadError> {
        if seconds.is_nan() || seconds <= 0.0 {
            return Ok(0);
        }

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(seconds.trunc() as u64, seconds.fract()),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        self.decoder.reset();

        let overshoot = seeked.required_ts.saturating_sub(seeked.actual_ts);
        let skip = match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(overshoot);
                ((time.seconds as f64 + time.frac) * self.sample_rate as f64).round() as usize
            }
            None => 0,
        };
        Ok(skip)
    }
}

/// Fold any channel layout into stereo: mono is duplicated, extra channels
/// beyond the first two are dropped.
fn push_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            for &s in samples {
                out.push(s);
                out.push(s);
            }
        }
        _ => {
            for frame in samples.chunks_exact(channels) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}

fn map_symphonia_error(e: SymphoniaError) -> LoadError {
    match e {
        SymphoniaError::IoError(io) => io.into(),
        SymphoniaError::Unsupported(what) => LoadError::UnsupportedFormat(what.to_string()),
        other => LoadError::Decode(other.to_string()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RESAMPLER
// ═══════════════════════════════════════════════════════════════════════════

/// Streaming linear-interpolation resampler for stereo interleaved audio.
/// Keeps its phase across calls, so chunks can be fed one packet at a time.
pub struct LinearResampler {
    /// Input frames per output frame
    step: f64,
    /// Read position relative to the current chunk; -1 is the last frame
    /// of the previous chunk
    position: f64,
    last: Option<(f32, f32)>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate.max(1) as f64 / to_rate.max(1) as f64,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }

        let frames = input.len() / 2;
        if frames == 0 {
            return;
        }

        let frame_at = |index: isize, last: Option<(f32, f32)>| -> (f32, f32) {
            if index < 0 {
                last.unwrap_or((input[0], input[1]))
            } else {
                let i = index as usize * 2;
                (input[i], input[i + 1])
            }
        };

        let last_index = (frames - 1) as f64;
        while self.position.floor() + 1.0 <= last_index {
            let base = self.position.floor();
            let t = (self.position - base) as f32;
            let (l0, r0) = frame_at(base as isize, self.last);
            let (l1, r1) = frame_at(base as isize + 1, self.last);
            out.push(l0 + (l1 - l0) * t);
            out.push(r0 + (r1 - r0) * t);
            self.position += self.step;
        }

        self.position -= frames as f64;
        self.last = Some(frame_at(frames as isize - 1, self.last));
    }
}

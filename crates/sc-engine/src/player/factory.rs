//! Player factory
//!
//! Turns a clip reference into a player. Full decode is tried first, within
//! a time budget. If it fails or runs out of time the clip falls back to
//! streaming; if that cannot open the clip either, it is unplayable.

use std::collections::HashMap;
use std::fs::File;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};
use parking_lot::{Mutex, RwLock};
use sc_core::ClipRef;
use symphonia::core::io::MediaSource;

use super::decode::{DecodePlayer, DecodedClip, decode_clip};
use super::media::MediaStream;
use super::streaming::StreamingPlayer;
use super::Player;
use crate::config::LoadingConfig;
use crate::error::LoadError;
use crate::output::AudioOutput;

/// Creates players for clips
pub trait PlayerFactory: Send + Sync {
    fn create_player(&self, clip: &ClipRef) -> Result<Box<dyn Player>, LoadError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// CLIP RESOLVERS
// ═══════════════════════════════════════════════════════════════════════════

/// Opens the bytes behind a clip reference
pub trait ClipResolver: Send + Sync {
    fn open(&self, clip: &ClipRef) -> Result<Box<dyn MediaSource>, LoadError>;
}

/// Resolves clip references as file paths, optionally under a root folder
#[derive(Debug, Clone, Default)]
pub struct FileResolver {
    root: Option<PathBuf>,
}

impl FileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Resolve references as-is
    pub fn absolute() -> Self {
        Self { root: None }
    }

    pub fn path_for(&self, clip: &ClipRef) -> PathBuf {
        match &self.root {
            Some(root) => root.join(clip.as_str()),
            None => PathBuf::from(clip.as_str()),
        }
    }
}

impl ClipResolver for FileResolver {
    fn open(&self, clip: &ClipRef) -> Result<Box<dyn MediaSource>, LoadError> {
        let path = self.path_for(clip);
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound(path.display().to_string()),
            _ => LoadError::Access(format!("{}: {}", path.display(), e)),
        })?;
        Ok(Box::new(file))
    }
}

/// In-memory clips, for embedding and tests
#[derive(Default)]
pub struct MemoryResolver {
    clips: RwLock<HashMap<ClipRef, Arc<[u8]>>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, clip: impl Into<ClipRef>, bytes: Vec<u8>) {
        self.clips.write().insert(clip.into(), Arc::from(bytes));
    }

    pub fn remove(&self, clip: &ClipRef) -> bool {
        self.clips.write().remove(clip).is_some()
    }
}

impl ClipResolver for MemoryResolver {
    fn open(&self, clip: &ClipRef) -> Result<Box<dyn MediaSource>, LoadError> {
        let bytes = self
            .clips
            .read()
            .get(clip)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(clip.to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SINK PLAYER FACTORY
// ═══════════════════════════════════════════════════════════════════════════

/// Factory producing players that play through an [`AudioOutput`]
pub struct SinkPlayerFactory {
    output: Arc<AudioOutput>,
    resolver: Arc<dyn ClipResolver>,
    config: LoadingConfig,
    /// Decoded clips, shared by every player of the same clip
    cache: Mutex<HashMap<ClipRef, Arc<DecodedClip>>>,
}

impl SinkPlayerFactory {
    pub fn new(
        output: Arc<AudioOutput>,
        resolver: Arc<dyn ClipResolver>,
        config: LoadingConfig,
    ) -> Self {
        Self {
            output,
            resolver,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn output(&self) -> &Arc<AudioOutput> {
        &self.output
    }

    pub fn cached_clips(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Decode on a worker thread, giving up after the decode budget
    fn decode_with_timeout(&self, clip: &ClipRef) -> Result<Arc<DecodedClip>, LoadError> {
        let timeout = self.config.decode_timeout();
        let cancel = Arc::new(AtomicBool::new(false));

        let rx = {
            let (tx, rx) = bounded(1);
            let resolver = Arc::clone(&self.resolver);
            let clip = clip.clone();
            let cancel = Arc::clone(&cancel);
            thread::Builder::new()
                .name("sc-decode".into())
                .spawn(move || {
                    let result = resolver
                        .open(&clip)
                        .and_then(|source| decode_clip(source, &clip, &cancel));
                    let _ = tx.send(result);
                })
                .map_err(|e| LoadError::Access(e.to_string()))?;
            rx
        };

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map(Arc::new),
            Err(RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::Relaxed);
                Err(timeout_error(clip, timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(LoadError::Decode(format!("decode worker for {} exited", clip)))
            }
        }
    }

    /// Open the clip for streaming and read its duration
    fn probe_with_timeout(&self, clip: &ClipRef) -> Result<f64, LoadError> {
        let timeout = self.config.stream_ready_timeout();

        let rx = {
            let (tx, rx) = bounded(1);
            let resolver = Arc::clone(&self.resolver);
            let clip = clip.clone();
            thread::Builder::new()
                .name("sc-probe".into())
                .spawn(move || {
                    let extension = clip.extension();
                    let result = resolver.open(&clip).and_then(|source| {
                        MediaStream::open(source, extension.as_deref())
                            .map(|stream| stream.duration().unwrap_or(0.0))
                    });
                    let _ = tx.send(result);
                })
                .map_err(|e| LoadError::Access(e.to_string()))?;
            rx
        };

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(timeout_error(clip, timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(LoadError::Decode(format!("probe worker for {} exited", clip)))
            }
        }
    }
}

fn timeout_error(clip: &ClipRef, timeout: Duration) -> LoadError {
    LoadError::Timeout {
        clip: clip.clone(),
        timeout_ms: timeout.as_millis() as u64,
    }
}

impl PlayerFactory for SinkPlayerFactory {
    fn create_player(&self, clip: &ClipRef) -> Result<Box<dyn Player>, LoadError> {
        let cached = self.cache.lock().get(clip).cloned();
        if let Some(decoded) = cached {
            log::debug!("[Factory] Cache hit for {}", clip);
            return Ok(Box::new(DecodePlayer::new(decoded, Arc::clone(&self.output))));
        }

        let decode_error = match self.decode_with_timeout(clip) {
            Ok(decoded) => {
                self.cache.lock().insert(clip.clone(), Arc::clone(&decoded));
                return Ok(Box::new(DecodePlayer::new(decoded, Arc::clone(&self.output))));
            }
            Err(e) => e,
        };

        log::warn!(
            "[Factory] Decode of {} failed ({}), falling back to streaming",
            clip,
            decode_error
        );

        match self.probe_with_timeout(clip) {
            Ok(duration) => Ok(Box::new(StreamingPlayer::new(
                clip.clone(),
                Arc::clone(&self.resolver),
                Arc::clone(&self.output),
                duration,
                self.config.stream_buffer_secs,
            ))),
            Err(stream_error) => {
                log::error!("[Factory] {} is unplayable: {}", clip, stream_error);
                Err(LoadError::Unplayable {
                    clip: clip.clone(),
                    decode: decode_error.to_string(),
                    streaming: stream_error.to_string(),
                })
            }
        }
    }
}

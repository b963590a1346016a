//! Scorecraft command-line player
//!
//! Usage:
//!   scorecraft play session.json          - Play a saved timeline to the end
//!   scorecraft preview clips/kick.wav     - Audition one clip
//!   scorecraft config engine.json         - Write the default engine config

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use sc_core::{ClipRef, Session};
use sc_engine::{
    EngineConfig, EngineEvent, FileResolver, LoopEngine, TickDriver, TransportEvent, shared,
};

#[derive(Parser)]
#[command(name = "scorecraft", about = "Scorecraft loop engine player")]
struct Cli {
    /// Engine config file (JSON); defaults are used if it does not exist
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a session file through the default output device
    Play {
        /// Session JSON (loops, tracks, total duration)
        session: PathBuf,
        /// Directory clip references are resolved against
        /// (defaults to the session's directory)
        #[arg(long)]
        clips: Option<PathBuf>,
        /// Start position in seconds
        #[arg(long, default_value_t = 0.0)]
        seek: f64,
        /// Master volume (0-1)
        #[arg(long)]
        volume: Option<f64>,
    },
    /// Play a single clip once
    Preview {
        clip: PathBuf,
    },
    /// Write the default engine config
    Config {
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Play {
            session,
            clips,
            seek,
            volume,
        } => play(config, &session, clips, seek, volume),
        Commands::Preview { clip } => preview(config, &clip),
        Commands::Config { path } => {
            config
                .save_to(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn play(
    config: EngineConfig,
    session_path: &Path,
    clips: Option<PathBuf>,
    seek: f64,
    volume: Option<f64>,
) -> Result<()> {
    let session = Session::load_from(session_path)
        .with_context(|| format!("failed to load session {}", session_path.display()))?;

    let clip_root = clips
        .or_else(|| session_path.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let tick_interval = config.driver.tick_interval();

    let mut engine = LoopEngine::with_audio_output(config, Arc::new(FileResolver::new(clip_root)));
    engine.initialize().context("failed to open audio output")?;

    let events = engine.events();
    let total = session.effective_duration();
    if total <= 0.0 {
        bail!("session has nothing to play");
    }

    let rejected = engine.schedule_loops(session.loops, total, &session.tracks);
    for error in &rejected {
        eprintln!("skipping {}", error);
    }

    if let Some(volume) = volume {
        engine.set_master_volume(volume);
    }
    if seek > 0.0 {
        engine.seek(seek);
    }
    engine.play();

    println!("Playing {} ({:.1}s)", session_path.display(), total);

    let engine = shared(engine);
    let mut driver = TickDriver::spawn(Arc::clone(&engine), tick_interval)?;

    loop {
        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(EngineEvent::Transport(TransportEvent::Ended)) => {
                println!("Finished");
                break;
            }
            Ok(event) => report(&event),
            Err(RecvTimeoutError::Timeout) => {
                if !engine.lock().is_playing() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    driver.stop();
    engine.lock().shutdown();
    Ok(())
}

fn preview(config: EngineConfig, clip_path: &Path) -> Result<()> {
    let mut engine = LoopEngine::with_audio_output(config, Arc::new(FileResolver::absolute()));
    engine.initialize().context("failed to open audio output")?;

    let clip = ClipRef::new(clip_path.to_string_lossy());
    let player = engine
        .create_loop_player(&clip)
        .with_context(|| format!("cannot play {}", clip))?;
    let duration = player.duration();
    drop(player);

    engine.preview_loop(&clip)?;
    println!("Previewing {} ({:.1}s)", clip, duration);

    let started = Instant::now();
    let limit = Duration::from_secs_f64(duration.max(0.0)) + Duration::from_millis(250);
    while engine.is_previewing() && started.elapsed() < limit {
        engine.tick();
        std::thread::sleep(Duration::from_millis(20));
    }

    for event in engine.events().try_iter() {
        report(&event);
    }
    engine.shutdown();
    Ok(())
}

fn report(event: &EngineEvent) {
    match event {
        EngineEvent::Transport(transport) => log::info!("{:?}", transport),
        EngineEvent::LoopRejected { loop_id, error } => {
            eprintln!("loop {} rejected: {}", loop_id, error)
        }
        EngineEvent::LoadFailed { clip, error, .. } => {
            eprintln!("cannot load {}: {}", clip, error)
        }
        EngineEvent::StreamingFallback { clip } => println!("streaming {}", clip),
        EngineEvent::StartRejected { loop_id, error } => match loop_id {
            Some(id) => eprintln!("loop {} did not start: {}", id, error),
            None => eprintln!("preview did not start: {}", error),
        },
        EngineEvent::VoicesDropped { count } => {
            eprintln!("output overloaded: {} voice(s) dropped", count)
        }
    }
}

//! Background tick driver
//!
//! The engine itself is single-threaded. Hosts that drive it from several
//! threads share it behind one mutex; the driver is just another caller
//! that ticks it at a fixed interval.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};
use parking_lot::Mutex;

use crate::engine::LoopEngine;
use crate::error::EngineResult;

/// Engine shared between host threads
pub type SharedEngine = Arc<Mutex<LoopEngine>>;

pub fn shared(engine: LoopEngine) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}

pub struct TickDriver {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TickDriver {
    pub fn spawn(engine: SharedEngine, interval: Duration) -> EngineResult<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("sc-tick".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            engine.lock().tick();
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                log::debug!("Tick driver stopped");
            })?;

        log::debug!("Tick driver started ({:?})", interval);
        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Engine notifications
//!
//! Soft failures never abort a reconciliation. They are reported here, next
//! to transport transitions, for the host UI to pick up at its own pace.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use sc_core::{ClipRef, LoopError, LoopId};

use crate::error::{LoadError, PlaybackError};
use crate::transport::TransportEvent;

/// Event queue capacity; events beyond it are dropped with a warning
const EVENT_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Transport(TransportEvent),

    /// Loop excluded from the schedule
    LoopRejected { loop_id: LoopId, error: LoopError },

    /// Neither backend could load the clip. `loop_id` is `None` for previews.
    LoadFailed {
        loop_id: Option<LoopId>,
        clip: ClipRef,
        error: LoadError,
    },

    /// Clip is playing through the streaming backend
    StreamingFallback { clip: ClipRef },

    /// A player refused to start; retried on the next reconciliation
    StartRejected {
        loop_id: Option<LoopId>,
        error: PlaybackError,
    },

    /// The output mixer had no free voice for `count` accepted starts
    VoicesDropped { count: u64 },
}

/// Sending half of the event queue
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: Sender<EngineEvent>,
}

impl EventEmitter {
    pub fn emit(&self, event: EngineEvent) {
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            log::warn!("Event queue full, dropping {:?}", event);
        }
    }
}

pub fn event_channel() -> (EventEmitter, Receiver<EngineEvent>) {
    let (tx, rx) = bounded(EVENT_QUEUE_SIZE);
    (EventEmitter { tx }, rx)
}

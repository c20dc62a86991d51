//! Notifications emitted by the layout worker.
//!
//! Events go through a bounded channel. When nobody drains it the worker
//! drops new events instead of blocking.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::ComponentId;

/// Capacity of the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something observable happened on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayoutEvent {
    /// A component's progress estimate changed.
    Progress { component: ComponentId, percentage: u8 },
    /// A component finished converging (or ran out of bounded iterations).
    Complete { component: ComponentId },
    /// The worker parked: paused by a client or every layout converged.
    Parked,
    /// The worker left the parked state.
    Resumed,
    /// The worker thread exited.
    Stopped,
}

/// Sending half owned by the scheduler.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: Sender<LayoutEvent>,
}

impl EventSink {
    pub(crate) fn new() -> (Self, Receiver<LayoutEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Send without blocking; a full channel drops the event.
    pub(crate) fn emit(&self, event: LayoutEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!(?event, "layout_event_dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

//! Hands decoded messages over to the host's event queue.

use crate::codec;
use crate::event::InstanceEvent;
use log::{debug, info, warn};
use std::sync::mpsc;

/// Decodes inbound messages and posts the resulting [`InstanceEvent`]s.
///
/// Posting never blocks and never waits for the host to consume the event.
#[derive(Debug, Clone)]
pub struct EventBridge {
    sink: mpsc::Sender<InstanceEvent>,
}

impl EventBridge {
    pub fn new(sink: mpsc::Sender<InstanceEvent>) -> Self {
        Self { sink }
    }

    /// Decode `message` and notify the host.
    ///
    /// A [`LoadPaths`](InstanceEvent::LoadPaths) event is posted only when at
    /// least one path survived decoding.  [`BringToFront`](InstanceEvent::BringToFront)
    /// is posted for every message.
    pub fn deliver(&self, message: &str) {
        let paths = codec::decode(message);
        if paths.is_empty() {
            debug!("no loadable paths in message");
        } else {
            info!("other instance asked to load {} path(s)", paths.len());
            self.post(InstanceEvent::LoadPaths(paths));
        }
        self.post(InstanceEvent::BringToFront);
    }

    fn post(&self, event: InstanceEvent) {
        if self.sink.send(event).is_err() {
            warn!("host event queue closed, dropping event");
        }
    }
}

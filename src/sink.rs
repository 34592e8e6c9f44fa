//! The boundary between the session controller and whatever presents its events.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::model::{ProgressEvent, TerminationResult};

/// Receives events for running sessions.
///
/// For one session all `on_progress` calls happen in output order, and
/// exactly one `on_terminal` call follows them.
pub trait EventSink: Send + Sync + 'static {
    fn on_progress(&self, event: ProgressEvent);
    fn on_terminal(&self, result: TerminationResult);
}

/// Event as delivered through a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Progress(ProgressEvent),
    Terminal(TerminationResult),
}

/// Forwards events into an unbounded channel, for a consumer that polls.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_progress(&self, event: ProgressEvent) {
        // Receiver gone means nobody is watching anymore.
        let _ = self.tx.send(SessionEvent::Progress(event));
    }

    fn on_terminal(&self, result: TerminationResult) {
        let _ = self.tx.send(SessionEvent::Terminal(result));
    }
}

//! Items of the session's serialized event queue.
//!
//! Everything that can touch session state arrives here: user commands,
//! relay traffic, transport and data-link callbacks, and the results of
//! negotiation steps. Events other than commands carry the [`Generation`]
//! they were produced under so the session can drop what a teardown made
//! stale.

use crate::error::SignalError;
use crate::peer::engine::{DataLinkEvent, TransportEvent};
use crate::peer::negotiation::StepOutcome;
use crate::signaling::SignalMessage;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartPairing,
    AbortPairing,
    Leave,
    ToggleCamera,
    SendChat(String),
}

#[derive(Debug)]
pub enum SignalingEvent {
    Opened,
    Message(SignalMessage),
    /// The wake probe found the relay asleep; connecting after this warmup.
    Waking(Duration),
    SendFailed(String),
    Closed,
    Failed(SignalError),
}

#[derive(Debug)]
pub enum SessionEvent {
    Command(Command),
    Relay(Generation, SignalingEvent),
    Transport(Generation, TransportEvent),
    DataLink(Generation, DataLinkEvent),
    Negotiated(Generation, StepOutcome),
}

impl SessionEvent {
    pub fn label(&self) -> &'static str {
        match self {
            SessionEvent::Command(_) => "command",
            SessionEvent::Relay(..) => "relay",
            SessionEvent::Transport(..) => "transport",
            SessionEvent::DataLink(..) => "data link",
            SessionEvent::Negotiated(..) => "negotiation",
        }
    }

    /// `None` for commands, which are never stale.
    pub fn generation(&self) -> Option<Generation> {
        match self {
            SessionEvent::Command(_) => None,
            SessionEvent::Relay(g, _)
            | SessionEvent::Transport(g, _)
            | SessionEvent::DataLink(g, _)
            | SessionEvent::Negotiated(g, _) => Some(*g),
        }
    }
}

/// Posts events onto a session's queue, stamped with the generation the sink was made for.
/// Posting after the session loop ended is silently dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
    generation: Generation,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>, generation: Generation) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn relay(&self, event: SignalingEvent) {
        self.post(SessionEvent::Relay(self.generation, event));
    }

    pub fn transport(&self, event: TransportEvent) {
        self.post(SessionEvent::Transport(self.generation, event));
    }

    pub fn data_link(&self, event: DataLinkEvent) {
        self.post(SessionEvent::DataLink(self.generation, event));
    }

    pub fn negotiated(&self, outcome: StepOutcome) {
        self.post(SessionEvent::Negotiated(self.generation, outcome));
    }

    fn post(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_stamps_its_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, Generation::default());
        let later = EventSink::new(sink.tx.clone(), Generation::default().next());

        sink.relay(SignalingEvent::Opened);
        later.data_link(DataLinkEvent::Open);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.generation(), Some(Generation::default()));
        assert_eq!(second.generation(), Some(Generation::default().next()));
        assert_eq!(second.label(), "data link");
    }

    #[test]
    fn posting_after_receiver_dropped_is_harmless() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        EventSink::new(tx, Generation::default()).relay(SignalingEvent::Closed);
    }
}

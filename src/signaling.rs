//! Relay signaling: the `{name, data}` envelope codec and the outbound queue
//! that holds messages until the relay socket is open.

use crate::error::SignalError;
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::session::EventSink;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const PARTNER_FOUND: &str = "PARTNER_FOUND";
pub const SDP_OFFER: &str = "SDP_OFFER";
pub const SDP_ANSWER: &str = "SDP_ANSWER";
pub const SDP_ICE_CANDIDATE: &str = "SDP_ICE_CANDIDATE";
pub const PARTNER_LEFT: &str = "PARTNER_LEFT";
pub const CHAT: &str = "CHAT";
pub const LEAVE: &str = "LEAVE";
pub const PAIRING_START: &str = "PAIRING_START";
pub const PAIRING_ABORT: &str = "PAIRING_ABORT";

/// Pairing instruction value that makes this side the initiator.
pub const GO_FIRST: &str = "GO_FIRST";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingInstruction {
    GoFirst,
    Wait,
}

impl PairingInstruction {
    pub fn from_data(data: Option<&str>) -> Self {
        if data == Some(GO_FIRST) {
            PairingInstruction::GoFirst
        } else {
            PairingInstruction::Wait
        }
    }
}

/// Messages the relay delivers to this side.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalMessage {
    PartnerFound(PairingInstruction),
    SdpOffer(SessionDescription),
    SdpAnswer(SessionDescription),
    IceCandidate(IceCandidate),
    PartnerLeft,
    Chat(String),
}

/// Messages this side sends to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundSignal {
    PairingStart { topics: Vec<String> },
    PairingAbort,
    SdpOffer(SessionDescription),
    SdpAnswer(SessionDescription),
    IceCandidate(IceCandidate),
    Leave,
    Chat(String),
}

impl OutboundSignal {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundSignal::PairingStart { .. } => PAIRING_START,
            OutboundSignal::PairingAbort => PAIRING_ABORT,
            OutboundSignal::SdpOffer(_) => SDP_OFFER,
            OutboundSignal::SdpAnswer(_) => SDP_ANSWER,
            OutboundSignal::IceCandidate(_) => SDP_ICE_CANDIDATE,
            OutboundSignal::Leave => LEAVE,
            OutboundSignal::Chat(_) => CHAT,
        }
    }

    pub fn encode(&self) -> Result<String, SignalError> {
        let name = self.name();

        let (data, topics) = match self {
            OutboundSignal::PairingStart { topics } => (None, topics.clone()),
            OutboundSignal::PairingAbort | OutboundSignal::Leave => (None, Vec::new()),
            OutboundSignal::SdpOffer(d) | OutboundSignal::SdpAnswer(d) => {
                (Some(inner_json(name, d)?), Vec::new())
            }
            OutboundSignal::IceCandidate(c) => (Some(inner_json(name, c)?), Vec::new()),
            OutboundSignal::Chat(text) => (Some(text.clone()), Vec::new()),
        };

        let envelope = Envelope {
            name: name.to_owned(),
            data,
            topics,
        };
        serde_json::to_string(&envelope).map_err(|source| SignalError::Encode { name, source })
    }
}

/// Payloads travel as a JSON string inside the envelope's `data` field.
fn inner_json<T: Serialize>(name: &'static str, value: &T) -> Result<String, SignalError> {
    serde_json::to_string(value).map_err(|source| SignalError::Encode { name, source })
}

fn payload<T: serde::de::DeserializeOwned>(
    name: &'static str,
    data: Option<String>,
) -> Result<T, SignalError> {
    let data = data.ok_or(SignalError::MissingData { name })?;
    serde_json::from_str(&data).map_err(|source| SignalError::Payload { name, source })
}

/// Decodes one relay frame. Unknown names decode to `Ok(None)`.
pub fn decode(text: &str) -> Result<Option<SignalMessage>, SignalError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(SignalError::Envelope)?;

    let message = match envelope.name.as_str() {
        PARTNER_FOUND => SignalMessage::PartnerFound(PairingInstruction::from_data(
            envelope.data.as_deref(),
        )),
        SDP_OFFER => SignalMessage::SdpOffer(payload(SDP_OFFER, envelope.data)?),
        SDP_ANSWER => SignalMessage::SdpAnswer(payload(SDP_ANSWER, envelope.data)?),
        SDP_ICE_CANDIDATE => {
            SignalMessage::IceCandidate(payload(SDP_ICE_CANDIDATE, envelope.data)?)
        }
        PARTNER_LEFT => SignalMessage::PartnerLeft,
        CHAT => SignalMessage::Chat(envelope.data.unwrap_or_default()),
        other => {
            debug!("Ignoring relay message '{other}'");
            return Ok(None);
        }
    };
    Ok(Some(message))
}

/// Instruction for the socket task behind a [`SignalingLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCommand {
    Text(String),
    Close,
}

/// Connects a session to the relay.
pub trait RelayConnector: Send + Sync {
    /// Starts connecting in the background and returns the link immediately.
    /// Open/close/inbound traffic arrive through `sink`.
    fn connect(&self, sink: EventSink) -> SignalingLink;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Open,
    Closed,
}

/// Session-side half of the relay connection.
#[derive(Debug)]
pub struct SignalingLink {
    state: LinkState,
    queue: VecDeque<String>,
    wire: mpsc::UnboundedSender<WireCommand>,
}

impl SignalingLink {
    pub fn new(wire: mpsc::UnboundedSender<WireCommand>) -> Self {
        Self {
            state: LinkState::Connecting,
            queue: VecDeque::new(),
            wire,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Sends now when open, otherwise queues. Never fails to the caller.
    pub fn send(&mut self, signal: &OutboundSignal) {
        let text = match signal.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Dropping outbound {}: {e}", signal.name());
                return;
            }
        };

        match self.state {
            LinkState::Open => self.transmit(text),
            LinkState::Connecting => {
                debug!("Signaling not open, queuing {}", signal.name());
                self.queue.push_back(text);
            }
            LinkState::Closed => debug!("Signaling closed, dropping {}", signal.name()),
        }
    }

    /// Sends only if the link is open; nothing is queued.
    pub fn send_if_open(&mut self, signal: &OutboundSignal) {
        if self.is_open() {
            self.send(signal);
        }
    }

    /// Flushes the queue in order. Returns how many messages went out.
    pub fn on_open(&mut self) -> usize {
        if self.state != LinkState::Connecting {
            return 0;
        }
        self.state = LinkState::Open;

        let flushed = self.queue.len();
        while let Some(text) = self.queue.pop_front() {
            self.transmit(text);
        }
        info!("Signaling connected, flushed {flushed} queued message(s)");
        flushed
    }

    pub fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::Closed;
        self.queue.clear();
        let _ = self.wire.send(WireCommand::Close);
    }

    fn transmit(&mut self, text: String) {
        if self.wire.send(WireCommand::Text(text)).is_err() {
            warn!("Relay socket task is gone, message dropped");
        }
    }
}

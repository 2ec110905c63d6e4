use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Local media could not be acquired. Fatal to the session.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media access denied: {0}")]
    Denied(String),
    #[error("no media device available: {0}")]
    Unavailable(String),
}

/// Failure reported by the transport engine.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer connection: {0}")]
    Rtc(#[from] webrtc::Error),
    #[error("transport already closed")]
    Closed,
    #[error("unsupported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("{name} carries no data")]
    MissingData { name: &'static str },
    #[error("malformed {name} payload: {source}")]
    Payload {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not encode {name}: {source}")]
    Encode {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("relay connection: {0}")]
    Socket(String),
    #[error("relay connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("relay transmission failed: {0}")]
    Send(String),
}

/// Which part of an offer/answer exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStage {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
}

impl fmt::Display for NegotiationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationStage::CreateOffer => "create offer",
            NegotiationStage::CreateAnswer => "create answer",
            NegotiationStage::SetLocalDescription => "set local description",
            NegotiationStage::SetRemoteDescription => "set remote description",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("local media was never acquired")]
    NoLocalMedia,
    #[error("no transport engine for this session")]
    NoTransport,
    #[error("{stage} failed: {source}")]
    Step {
        stage: NegotiationStage,
        #[source]
        source: TransportError,
    },
}

impl NegotiationError {
    pub fn at(stage: NegotiationStage) -> impl FnOnce(TransportError) -> Self {
        move |source| NegotiationError::Step { stage, source }
    }
}

#[derive(Debug, Error)]
pub enum DataLinkError {
    #[error("malformed data-link payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything the UI collaborator may be told about through `on_error`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session has ended")]
    Closed,
}

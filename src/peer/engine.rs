//! Contracts for the transport engine (ICE/DTLS/SRTP stack) and the direct
//! data link it carries.
//!
//! The engine never calls back into the session. Everything it observes is
//! posted as a typed event through the [`EventSink`] handed to the factory,
//! and lands on the session's serialized queue.

use crate::error::TransportError;
use crate::peer::media::LocalMedia;
use crate::peer::types::{IceCandidate, RemoteMedia, SessionDescription};
use crate::session::EventSink;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Opens the data link this side offers to the peer.
    async fn create_data_link(&self, label: &str) -> Result<Arc<dyn DataLink>, TransportError>;

    /// Drops every sender that still carries a track, then attaches the tracks of `media`.
    /// Running it twice leaves one sender per track.
    async fn replace_tracks(&self, media: &LocalMedia) -> Result<(), TransportError>;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Returns the description as the engine now holds it.
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, sink: EventSink) -> Result<Arc<dyn TransportEngine>, TransportError>;
}

#[async_trait]
pub trait DataLink: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Connectivity as reported by either the ICE agent or the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl Connectivity {
    pub fn is_lost(self) -> bool {
        matches!(
            self,
            Connectivity::Disconnected | Connectivity::Failed | Connectivity::Closed
        )
    }
}

pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    Connectivity(Connectivity),
    RemoteTrack(RemoteMedia),
    /// The peer opened a data link towards us.
    InboundDataLink(Arc<dyn DataLink>),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            TransportEvent::GatheringComplete => f.write_str("GatheringComplete"),
            TransportEvent::Connectivity(s) => f.debug_tuple("Connectivity").field(s).finish(),
            TransportEvent::RemoteTrack(m) => f.debug_tuple("RemoteTrack").field(m).finish(),
            TransportEvent::InboundDataLink(link) => {
                f.debug_tuple("InboundDataLink").field(&link.label()).finish()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLinkEvent {
    Open,
    Message(String),
    Closed,
}

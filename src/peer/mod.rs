pub mod connection;
pub mod data_channel;
pub mod engine;
pub mod ice;
pub mod media;
pub mod negotiation;
pub mod types;

pub use connection::{RtcTransport, RtcTransportFactory};
pub use data_channel::{DataLinkMessage, RtcDataLink};
pub use engine::{Connectivity, DataLink, DataLinkEvent, TransportEngine, TransportEvent, TransportFactory};
pub use ice::CandidateBuffer;
pub use media::{LocalMedia, LocalTrack, MediaSource, SampleTrackSource};
pub use negotiation::{NegotiationEngine, Step, StepKind, StepOutcome, StepOutput};
pub use types::{IceCandidate, RemoteMedia, SdpKind, ServerConfig, SessionDescription, TrackKind};

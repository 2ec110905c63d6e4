pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::SessionConfig;
pub use error::SessionError;
pub use relay::WebSocketRelay;
pub use session::{
    ChannelObserver, Collaborators, SessionDriver, SessionHandle, SessionObserver, SessionState,
    UiEvent,
};
pub use signaling::{RelayConnector, SignalingLink};

use crate::error::SessionError;
use crate::peer::media::LocalMedia;
use crate::peer::types::RemoteMedia;
use crate::session::state::SessionState;
use std::time::Duration;
use tokio::sync::mpsc;

/// The UI collaborator. Called from the session loop, so implementations must not block.
pub trait SessionObserver: Send + Sync {
    /// Exactly once per transition, in order.
    fn on_state_change(&self, state: SessionState);

    fn on_local_media(&self, _media: &LocalMedia) {}

    fn on_remote_media(&self, _media: &RemoteMedia) {}

    fn on_remote_camera(&self, _enabled: bool) {}

    fn on_chat_message(&self, _text: &str) {}

    fn on_relay_waking(&self, _warmup: Duration) {}

    fn on_error(&self, _error: &SessionError) {}
}

/// Notification forwarded by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    State(SessionState),
    LocalMedia { stream_id: String, tracks: usize },
    RemoteMedia { stream_id: String, track_id: String },
    RemoteCamera(bool),
    Chat(String),
    RelayWaking(Duration),
    Error(String),
}

/// Observer that forwards every notification onto a channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: UiEvent) {
        let _ = self.tx.send(event);
    }
}

impl SessionObserver for ChannelObserver {
    fn on_state_change(&self, state: SessionState) {
        self.forward(UiEvent::State(state));
    }

    fn on_local_media(&self, media: &LocalMedia) {
        self.forward(UiEvent::LocalMedia {
            stream_id: media.stream_id().to_owned(),
            tracks: media.tracks().len(),
        });
    }

    fn on_remote_media(&self, media: &RemoteMedia) {
        self.forward(UiEvent::RemoteMedia {
            stream_id: media.stream_id.clone(),
            track_id: media.track_id.clone(),
        });
    }

    fn on_remote_camera(&self, enabled: bool) {
        self.forward(UiEvent::RemoteCamera(enabled));
    }

    fn on_chat_message(&self, text: &str) {
        self.forward(UiEvent::Chat(text.to_owned()));
    }

    fn on_relay_waking(&self, warmup: Duration) {
        self.forward(UiEvent::RelayWaking(warmup));
    }

    fn on_error(&self, error: &SessionError) {
        self.forward(UiEvent::Error(error.to_string()));
    }
}

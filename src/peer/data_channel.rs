use crate::error::{DataLinkError, TransportError};
use crate::peer::engine::{DataLink, DataLinkEvent};
use crate::session::EventSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// Literal leave signal.
pub const BYE: &str = "BYE";

const CAM_STATE: &str = "CAM_STATE";

/// Application messages exchanged over the direct data link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLinkMessage {
    Bye,
    CameraState { enabled: bool },
    Chat(String),
}

#[derive(Serialize)]
#[serde(untagged)]
enum OutboundPayload<'a> {
    CameraState {
        #[serde(rename = "type")]
        kind: &'static str,
        enabled: bool,
    },
    Chat {
        chat: &'a str,
    },
}

#[derive(Deserialize)]
struct InboundPayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    enabled: Option<bool>,
    chat: Option<String>,
}

impl DataLinkMessage {
    pub fn encode(&self) -> Result<String, DataLinkError> {
        let payload = match self {
            DataLinkMessage::Bye => return Ok(BYE.to_owned()),
            DataLinkMessage::CameraState { enabled } => OutboundPayload::CameraState {
                kind: CAM_STATE,
                enabled: *enabled,
            },
            DataLinkMessage::Chat(text) => OutboundPayload::Chat { chat: text },
        };
        Ok(serde_json::to_string(&payload)?)
    }

    /// `Ok(None)` for well-formed JSON this side has no use for.
    pub fn decode(text: &str) -> Result<Option<Self>, DataLinkError> {
        if text == BYE {
            return Ok(Some(DataLinkMessage::Bye));
        }

        let payload: InboundPayload = serde_json::from_str(text)?;
        if payload.kind.as_deref() == Some(CAM_STATE) {
            return Ok(payload
                .enabled
                .map(|enabled| DataLinkMessage::CameraState { enabled }));
        }
        Ok(payload
            .chat
            .filter(|chat| !chat.is_empty())
            .map(DataLinkMessage::Chat))
    }
}

/// `RTCDataChannel` bound to a session's event queue.
pub struct RtcDataLink {
    channel: Arc<RTCDataChannel>,
}

impl RtcDataLink {
    /// Routes the channel's open/message/close callbacks into `sink`.
    pub fn attach(channel: Arc<RTCDataChannel>, sink: EventSink) -> Self {
        debug!("Attaching data channel '{}'", channel.label());

        channel.on_open(Box::new({
            let sink = sink.clone();
            let label = channel.label().to_owned();
            move || {
                debug!("Data channel '{label}' open");
                sink.data_link(DataLinkEvent::Open);
                Box::pin(async {})
            }
        }));

        channel.on_message(Box::new({
            let sink = sink.clone();
            move |msg: DataChannelMessage| {
                if msg.is_string {
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => sink.data_link(DataLinkEvent::Message(text)),
                        Err(e) => warn!("Dropping data-channel message that is not UTF-8: {e}"),
                    }
                } else {
                    warn!("Dropping binary data-channel message ({} bytes)", msg.data.len());
                }
                Box::pin(async {})
            }
        }));

        channel.on_close(Box::new({
            let sink = sink.clone();
            move || {
                sink.data_link(DataLinkEvent::Closed);
                Box::pin(async {})
            }
        }));

        channel.on_error(Box::new(move |err| {
            warn!("Data channel error: {err}");
            Box::pin(async {})
        }));

        Self { channel }
    }
}

#[async_trait]
impl DataLink for RtcDataLink {
    fn label(&self) -> &str {
        self.channel.label()
    }

    fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.channel.send_text(text.to_owned()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.channel.close().await?;
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description in the browser's JSON shape: `{"type": "offer", "sdp": "..."}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate for the direct link, serialized like `RTCIceCandidateInit`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

/// ICE server entry
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Inbound media announced by the transport engine.
#[derive(Clone)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub track_id: String,
    pub kind: TrackKind,
    /// RTP source to render from; absent when the engine does not expose one.
    pub track: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .field("kind", &self.kind)
            .field("track", &self.track.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_uses_browser_shape() {
        let json = serde_json::to_string(&SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"v=0"}"#);

        let parsed: SessionDescription =
            serde_json::from_str(r#"{"sdp":"v=0\r\n","type":"answer"}"#).unwrap();
        assert_eq!(parsed.kind, SdpKind::Answer);
    }

    #[test]
    fn candidate_fields_are_camel_case() {
        let parsed: IceCandidate = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}"#,
        )
        .unwrap();
        assert_eq!(parsed.sdp_mid.as_deref(), Some("0"));
        assert_eq!(parsed.sdp_mline_index, Some(0));
        assert_eq!(parsed.username_fragment.as_deref(), Some("abcd"));

        let value = serde_json::to_value(&parsed).unwrap();
        assert!(value.get("sdpMLineIndex").is_some());
    }

    #[test]
    fn candidate_optional_fields_may_be_missing() {
        let parsed: IceCandidate = serde_json::from_str(r#"{"candidate":"c"}"#).unwrap();
        assert_eq!(parsed.sdp_mid, None);
        assert_eq!(parsed.sdp_mline_index, None);
    }
}

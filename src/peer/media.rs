use crate::config::MediaConstraints;
use crate::error::{MediaError, TransportError};
use crate::peer::types::TrackKind;
use crate::utils::random_id;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// One outgoing track. The capture pipeline feeds it through [`LocalMedia::write_sample`].
#[derive(Clone)]
pub struct LocalTrack {
    kind: TrackKind,
    rtc: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, rtc: Arc<TrackLocalStaticSample>) -> Self {
        Self { kind, rtc }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        self.rtc.id()
    }

    pub fn rtc(&self) -> &Arc<TrackLocalStaticSample> {
        &self.rtc
    }
}

/// Local audio/video stream. Clones share the camera flag, so the UI and the
/// session see the same value; only the session decides when to let go of it.
#[derive(Clone)]
pub struct LocalMedia {
    stream_id: String,
    tracks: Vec<LocalTrack>,
    camera_enabled: Arc<AtomicBool>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks,
            camera_enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }

    /// Reported to the peer as `CAM_STATE`. A stream without video counts as enabled.
    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled.load(Ordering::SeqCst)
    }

    pub fn toggle_camera(&self) -> bool {
        !self.camera_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Writes one encoded sample. Video is dropped while the camera is off;
    /// returns whether the sample went out.
    pub async fn write_sample(
        &self,
        track: &LocalTrack,
        sample: &Sample,
    ) -> Result<bool, TransportError> {
        if track.kind == TrackKind::Video && !self.camera_enabled() {
            return Ok(false);
        }
        track.rtc.write_sample(sample).await?;
        Ok(true)
    }
}

/// Media acquisition collaborator.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError>;
}

/// Builds VP8 and Opus sample tracks for an application that encodes its own frames.
#[derive(Debug, Default, Clone)]
pub struct SampleTrackSource;

#[async_trait]
impl MediaSource for SampleTrackSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        let stream_id = format!("pairchat-{}", random_id());

        let mut tracks = vec![LocalTrack::new(
            TrackKind::Video,
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id.clone(),
            )),
        )];

        if constraints.audio {
            tracks.push(LocalTrack::new(
                TrackKind::Audio,
                Arc::new(TrackLocalStaticSample::new(
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_OPUS.to_owned(),
                        clock_rate: 48000,
                        channels: 2,
                        ..Default::default()
                    },
                    "audio".to_owned(),
                    stream_id.clone(),
                )),
            ));
        }

        info!(
            "Local media ready: {} track(s), {}x{} @ {}fps",
            tracks.len(),
            constraints.width,
            constraints.height,
            constraints.frame_rate
        );
        Ok(LocalMedia::new(stream_id, tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_source_builds_tracks_per_constraints() {
        let media = SampleTrackSource
            .acquire(&MediaConstraints::default())
            .await
            .unwrap();
        assert_eq!(media.tracks().len(), 2);
        assert!(media.has_video());
        assert!(media.tracks().iter().all(|t| t.rtc().stream_id() == media.stream_id()));

        let silent = SampleTrackSource
            .acquire(&MediaConstraints {
                audio: false,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(silent.tracks().len(), 1);
        assert_eq!(silent.tracks()[0].kind(), TrackKind::Video);
    }

    #[test]
    fn camera_flag_shared_between_clones() {
        let media = LocalMedia::new("s", Vec::new());
        let ui_copy = media.clone();
        assert!(media.camera_enabled());
        assert!(!ui_copy.toggle_camera());
        assert!(!media.camera_enabled());
        assert!(media.toggle_camera());
        assert!(ui_copy.camera_enabled());
    }

    #[tokio::test]
    async fn video_samples_stop_while_camera_is_off() {
        let media = SampleTrackSource
            .acquire(&MediaConstraints::default())
            .await
            .unwrap();
        let video = media.tracks()[0].clone();
        let audio = media.tracks()[1].clone();
        let sample = Sample {
            duration: std::time::Duration::from_millis(20),
            ..Default::default()
        };

        assert!(media.write_sample(&video, &sample).await.unwrap());
        media.toggle_camera();
        assert!(!media.write_sample(&video, &sample).await.unwrap());
        assert!(media.write_sample(&audio, &sample).await.unwrap());
    }
}

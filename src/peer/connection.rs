use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::logger::dump_selected_pair;
use crate::peer::data_channel::RtcDataLink;
use crate::peer::engine::{Connectivity, DataLink, TransportEngine, TransportEvent, TransportFactory};
use crate::peer::ice::CandidateTally;
use crate::peer::media::LocalMedia;
use crate::peer::types::{IceCandidate, RemoteMedia, SdpKind, ServerConfig, SessionDescription, TrackKind};
use crate::session::EventSink;
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Creates one `RTCPeerConnection` per session.
#[derive(Debug, Clone)]
pub struct RtcTransportFactory {
    ice_servers: Vec<ServerConfig>,
    ice_candidate_pool_size: u8,
}

impl RtcTransportFactory {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            ice_candidate_pool_size: config.ice_candidate_pool_size,
        }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(&self, sink: EventSink) -> Result<Arc<dyn TransportEngine>, TransportError> {
        let transport = RtcTransport::new(&self.ice_servers, self.ice_candidate_pool_size, sink).await?;
        Ok(Arc::new(transport))
    }
}

/// Transport engine over the `webrtc` crate.
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    sink: EventSink,
}

impl RtcTransport {
    pub async fn new(
        servers: &[ServerConfig],
        ice_candidate_pool_size: u8,
        sink: EventSink,
    ) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(servers, ice_candidate_pool_size))
                .await?,
        );
        info!("Peer connection created with {} ICE server(s)", servers.len());

        install_handlers(&pc, &sink);
        Ok(Self { pc, sink })
    }
}

fn install_handlers(pc: &Arc<RTCPeerConnection>, sink: &EventSink) {
    let tally = Arc::new(CandidateTally::default());

    pc.on_ice_candidate(Box::new({
        let sink = sink.clone();
        move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        tally.record(&init.candidate);
                        sink.transport(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {e}"),
                },
                None => {
                    debug!("ICE candidate gathering completed");
                    tally.report();
                    sink.transport(TransportEvent::GatheringComplete);
                }
            }
            Box::pin(async {})
        }
    }));

    pc.on_ice_connection_state_change(Box::new({
        let sink = sink.clone();
        move |state: RTCIceConnectionState| {
            debug!("ICE state: {state:?}");
            if let Some(connectivity) = from_ice_state(state) {
                sink.transport(TransportEvent::Connectivity(connectivity));
            }
            Box::pin(async {})
        }
    }));

    let weak: Weak<RTCPeerConnection> = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new({
        let sink = sink.clone();
        move |state: RTCPeerConnectionState| {
            debug!("PC state: {state:?}");
            if matches!(
                state,
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
            ) {
                if let Some(pc) = weak.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }
            if let Some(connectivity) = from_peer_state(state) {
                sink.transport(TransportEvent::Connectivity(connectivity));
            }
            Box::pin(async {})
        }
    }));

    pc.on_track(Box::new({
        let sink = sink.clone();
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                _ => None,
            };
            match kind {
                Some(kind) => {
                    info!("Remote {kind} track {} arrived", track.id());
                    sink.transport(TransportEvent::RemoteTrack(RemoteMedia {
                        stream_id: track.stream_id(),
                        track_id: track.id(),
                        kind,
                        track: Some(track),
                    }));
                }
                None => warn!("Ignoring remote track {} of unknown kind", track.id()),
            }
            Box::pin(async {})
        }
    }));

    pc.on_data_channel(Box::new({
        let sink = sink.clone();
        move |dc: Arc<RTCDataChannel>| {
            info!("Inbound data channel '{}'", dc.label());
            let link = RtcDataLink::attach(dc, sink.clone());
            sink.transport(TransportEvent::InboundDataLink(Arc::new(link)));
            Box::pin(async {})
        }
    }));
}

fn from_ice_state(state: RTCIceConnectionState) -> Option<Connectivity> {
    match state {
        RTCIceConnectionState::New => Some(Connectivity::New),
        RTCIceConnectionState::Checking => Some(Connectivity::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(Connectivity::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(Connectivity::Disconnected),
        RTCIceConnectionState::Failed => Some(Connectivity::Failed),
        RTCIceConnectionState::Closed => Some(Connectivity::Closed),
        _ => None,
    }
}

fn from_peer_state(state: RTCPeerConnectionState) -> Option<Connectivity> {
    match state {
        RTCPeerConnectionState::New => Some(Connectivity::New),
        RTCPeerConnectionState::Connecting => Some(Connectivity::Checking),
        RTCPeerConnectionState::Connected => Some(Connectivity::Connected),
        RTCPeerConnectionState::Disconnected => Some(Connectivity::Disconnected),
        RTCPeerConnectionState::Failed => Some(Connectivity::Failed),
        RTCPeerConnectionState::Closed => Some(Connectivity::Closed),
        _ => None,
    }
}

fn rtc_config(servers: &[ServerConfig], ice_candidate_pool_size: u8) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let rtc = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp)?,
        SdpKind::Rollback => {
            return Err(TransportError::Unsupported("rollback descriptions".into()))
        }
    };
    Ok(rtc)
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        other => {
            return Err(TransportError::Unsupported(format!(
                "description type {other:?}"
            )))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

#[async_trait]
impl TransportEngine for RtcTransport {
    async fn create_data_link(&self, label: &str) -> Result<Arc<dyn DataLink>, TransportError> {
        let dc = self
            .pc
            .create_data_channel(label, Some(RTCDataChannelInit::default()))
            .await?;
        Ok(Arc::new(RtcDataLink::attach(dc, self.sink.clone())))
    }

    async fn replace_tracks(&self, media: &LocalMedia) -> Result<(), TransportError> {
        for sender in self.pc.get_senders().await {
            if sender.track().await.is_some() {
                self.pc.remove_track(&sender).await?;
            }
        }
        for track in media.tracks() {
            let rtc: Arc<dyn TrackLocal + Send + Sync> = track.rtc().clone();
            self.pc.add_track(rtc).await?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        self.pc.set_local_description(to_rtc(description.clone())?).await?;
        match self.pc.local_description().await {
            Some(local) => from_rtc(local),
            None => Ok(description),
        }
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc.set_remote_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await?;
        Ok(())
    }
}

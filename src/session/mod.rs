//! The session aggregate: one pairing from media acquisition to teardown.
//!
//! [`Session`] owns every handle of the pairing (local media, signaling link,
//! transport engine, data link) and all of its bookkeeping. It is driven one
//! event at a time by [`SessionDriver`]; handlers never await. Work that has
//! to suspend is spawned and reports back through the [`EventSink`].

mod driver;
mod event;
mod observer;
mod state;

pub use driver::{Collaborators, SessionDriver, SessionHandle};
pub use event::{Command, EventSink, Generation, SessionEvent, SignalingEvent};
pub use observer::{ChannelObserver, SessionObserver, UiEvent};
pub use state::{DisconnectCause, Role, SessionState};

use crate::config::SessionConfig;
use crate::error::{NegotiationError, SessionError, SignalError};
use crate::logger::dump_candidate;
use crate::peer::data_channel::{DataLinkMessage, BYE};
use crate::peer::engine::{
    Connectivity, DataLink, DataLinkEvent, TransportEngine, TransportEvent, TransportFactory,
};
use crate::peer::ice::{CandidateBuffer, OutboundCandidates};
use crate::peer::media::{LocalMedia, MediaSource};
use crate::peer::negotiation::{NegotiationEngine, Step, StepOutcome, StepOutput, StepQueue};
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use crate::signaling::{OutboundSignal, PairingInstruction, RelayConnector, SignalMessage, SignalingLink};
use crate::utils::random_id;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum LinkOp {
    Send(String),
    Close,
}

/// The direct data link plus the task that writes to it in order.
struct LinkSlot {
    link: Arc<dyn DataLink>,
    created_locally: bool,
    outbox: mpsc::UnboundedSender<LinkOp>,
    writer: JoinHandle<()>,
}

impl LinkSlot {
    fn new(link: Arc<dyn DataLink>, created_locally: bool) -> Self {
        let (outbox, mut rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn({
            let link = Arc::clone(&link);
            async move {
                while let Some(op) = rx.recv().await {
                    match op {
                        LinkOp::Send(text) => {
                            if let Err(e) = link.send_text(&text).await {
                                warn!("Data link send failed: {e}");
                            }
                        }
                        LinkOp::Close => {
                            if let Err(e) = link.close().await {
                                debug!("Data link close: {e}");
                            }
                            break;
                        }
                    }
                }
            }
        });

        Self {
            link,
            created_locally,
            outbox,
            writer,
        }
    }

    fn send(&self, message: &DataLinkMessage) {
        match message.encode() {
            Ok(text) => {
                let _ = self.outbox.send(LinkOp::Send(text));
            }
            Err(e) => warn!("Dropping data-link message: {e}"),
        }
    }
}

pub struct Session {
    id: String,
    config: SessionConfig,
    state: SessionState,
    role: Role,
    generation: Generation,
    media: Option<LocalMedia>,
    signaling: Option<SignalingLink>,
    negotiation: Option<NegotiationEngine>,
    data_link: Option<LinkSlot>,
    candidates: CandidateBuffer,
    outbound: OutboundCandidates,
    steps: StepQueue,
    closing: Option<DisconnectCause>,
    /// Replaced links whose own close is still to arrive.
    retired_links: usize,
    observer: Arc<dyn SessionObserver>,
    sink: EventSink,
}

impl Session {
    /// Starts in `Initializing` and tells the observer so.
    pub fn new(
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
        tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let generation = Generation::default();
        let session = Self {
            id: random_id(),
            config,
            state: SessionState::Initializing,
            role: Role::Unassigned,
            generation,
            media: None,
            signaling: None,
            negotiation: None,
            data_link: None,
            candidates: CandidateBuffer::new(),
            outbound: OutboundCandidates::default(),
            steps: StepQueue::default(),
            closing: None,
            retired_links: 0,
            observer,
            sink: EventSink::new(tx, generation),
        };
        info!("Session {} initializing", session.id);
        session.observer.on_state_change(SessionState::Initializing);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn pending_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_released(&self) -> bool {
        self.media.is_none()
            && self.signaling.is_none()
            && self.negotiation.is_none()
            && self.data_link.is_none()
    }

    /// Acquires media, then creates the transport engine and the signaling link.
    pub async fn initialize(
        &mut self,
        media: &dyn MediaSource,
        transports: &dyn TransportFactory,
        relay: &dyn RelayConnector,
    ) {
        let media = match media.acquire(&self.config.media).await {
            Ok(media) => media,
            Err(e) => {
                error!("Local media unavailable: {e}");
                self.transition(SessionState::CameraFailed);
                self.observer.on_error(&e.into());
                return;
            }
        };
        debug!("Session {} holds stream {}", self.id, media.stream_id());
        self.observer.on_local_media(&media);
        self.media = Some(media);

        match transports.create(self.sink.clone()).await {
            Ok(transport) => {
                self.negotiation = Some(NegotiationEngine::new(
                    transport,
                    self.config.data_link_label.clone(),
                ));
            }
            Err(e) => {
                error!("Could not create transport engine: {e}");
                self.observer.on_error(&e.into());
                self.disconnect(DisconnectCause::Remote);
                return;
            }
        }

        self.signaling = Some(relay.connect(self.sink.clone()));
        self.transition(SessionState::NotConnected);
    }

    pub fn handle(&mut self, event: SessionEvent) {
        // The close token belongs to the teardown that bumped the generation,
        // so it is read before the staleness check.
        if let SessionEvent::DataLink(generation, DataLinkEvent::Closed) = event {
            self.on_data_link_closed(generation);
            return;
        }

        if let Some(generation) = event.generation() {
            if generation != self.generation {
                debug!("Dropping stale {} event", event.label());
                return;
            }
        }

        match event {
            SessionEvent::Command(command) => self.on_command(command),
            SessionEvent::Relay(_, event) => self.on_relay(event),
            SessionEvent::Transport(_, event) => self.on_transport(event),
            SessionEvent::DataLink(_, event) => self.on_data_link(event),
            SessionEvent::Negotiated(_, outcome) => self.on_negotiated(outcome),
        }
    }

    fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            if self.state != next {
                warn!("Session {}: ignoring {} -> {next}", self.id, self.state);
            }
            return false;
        }
        info!("Session {}: {} -> {next}", self.id, self.state);
        self.state = next;
        self.observer.on_state_change(next);
        true
    }

    fn report(&self, error: impl Into<SessionError>) {
        self.observer.on_error(&error.into());
    }

    fn signal(&mut self, message: OutboundSignal) {
        match self.signaling.as_mut() {
            Some(link) => link.send(&message),
            None => debug!("No signaling link, dropping {}", message.name()),
        }
    }

    fn open_data_link(&self) -> Option<&LinkSlot> {
        self.data_link.as_ref().filter(|slot| slot.link.is_open())
    }

    // ----- commands -----

    fn on_command(&mut self, command: Command) {
        if self.state.is_terminal() {
            debug!("Session ended, ignoring {command:?}");
            return;
        }

        match command {
            Command::StartPairing => {
                if self.state != SessionState::NotConnected {
                    warn!("Cannot start pairing while {}", self.state);
                    return;
                }
                info!("Looking for a partner");
                self.signal(OutboundSignal::PairingStart {
                    topics: self.config.topics.clone(),
                });
                self.transition(SessionState::Connecting);
            }
            Command::AbortPairing => {
                info!("Pairing aborted");
                if let Some(link) = self.signaling.as_mut() {
                    link.send_if_open(&OutboundSignal::PairingAbort);
                }
                self.disconnect(DisconnectCause::Local);
            }
            Command::Leave => self.disconnect(DisconnectCause::Local),
            Command::ToggleCamera => self.toggle_camera(),
            Command::SendChat(text) => self.send_chat(text),
        }
    }

    fn toggle_camera(&mut self) {
        let Some(media) = &self.media else {
            warn!("No local media to toggle");
            return;
        };
        let enabled = media.toggle_camera();
        info!("Camera {}", if enabled { "enabled" } else { "disabled" });
        if let Some(slot) = self.open_data_link() {
            slot.send(&DataLinkMessage::CameraState { enabled });
        }
    }

    fn send_chat(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        match self.open_data_link() {
            Some(slot) => slot.send(&DataLinkMessage::Chat(text)),
            None => self.signal(OutboundSignal::Chat(text)),
        }
    }

    // ----- relay -----

    fn on_relay(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Opened => {
                if let Some(link) = self.signaling.as_mut() {
                    link.on_open();
                }
            }
            SignalingEvent::Message(message) => self.on_signal(message),
            SignalingEvent::Waking(warmup) => {
                info!("Relay is waking up, waiting {warmup:?}");
                self.observer.on_relay_waking(warmup);
            }
            SignalingEvent::SendFailed(reason) => {
                warn!("Relay transmission failed: {reason}");
                self.report(SignalError::Send(reason));
            }
            SignalingEvent::Closed => {
                info!("Relay connection closed");
                self.disconnect(DisconnectCause::Remote);
            }
            SignalingEvent::Failed(e) => {
                error!("Relay connection failed: {e}");
                self.report(e);
                self.disconnect(DisconnectCause::Remote);
            }
        }
    }

    fn on_signal(&mut self, message: SignalMessage) {
        match message {
            SignalMessage::PartnerFound(instruction) => self.on_partner_found(instruction),
            SignalMessage::SdpOffer(offer) => self.on_offer(offer),
            SignalMessage::SdpAnswer(answer) => self.on_answer(answer),
            SignalMessage::IceCandidate(candidate) => self.on_remote_candidate(candidate),
            SignalMessage::PartnerLeft => {
                info!("Partner left");
                self.disconnect(DisconnectCause::Remote);
            }
            SignalMessage::Chat(text) => self.observer.on_chat_message(&text),
        }
    }

    /// Checks that negotiation can run at all, reporting why not.
    fn negotiation_ready(&self) -> bool {
        if self.media.is_none() {
            self.report(NegotiationError::NoLocalMedia);
            return false;
        }
        if self.negotiation.is_none() {
            self.report(NegotiationError::NoTransport);
            return false;
        }
        true
    }

    fn on_partner_found(&mut self, instruction: PairingInstruction) {
        if self.role != Role::Unassigned {
            warn!("Partner found again as {:?}, role stays {:?}", instruction, self.role);
            return;
        }
        if !self.negotiation_ready() {
            return;
        }

        match instruction {
            PairingInstruction::GoFirst => {
                info!("Partner found, this side makes the offer");
                self.role = Role::Initiator;
                self.steps.push_back(Step::Offer);
                self.pump_steps();
            }
            PairingInstruction::Wait => {
                info!("Partner found, waiting for their offer");
                self.role = Role::Responder;
            }
        }
    }

    fn on_offer(&mut self, offer: SessionDescription) {
        match self.role {
            Role::Initiator => {
                warn!("Ignoring offer: this side is the initiator");
                return;
            }
            Role::Unassigned => {
                debug!("Offer arrived before pairing instruction, answering");
                self.role = Role::Responder;
            }
            Role::Responder => {}
        }
        if !self.negotiation_ready() {
            return;
        }
        info!("Received SDP offer");
        self.steps.push_back(Step::ApplyRemote(offer));
        self.pump_steps();
    }

    fn on_answer(&mut self, answer: SessionDescription) {
        if self.role != Role::Initiator {
            warn!("Ignoring answer: this side did not offer");
            return;
        }
        info!("Received SDP answer");
        self.steps.push_back(Step::ApplyRemote(answer));
        self.pump_steps();
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        dump_candidate("remote", &candidate);
        if let Some(candidate) = self.candidates.admit(candidate) {
            self.steps.push_candidate(candidate);
            self.pump_steps();
        }
    }

    // ----- transport -----

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                dump_candidate("local", &candidate);
                match self.outbound.offer(candidate) {
                    Some(candidate) => self.signal(OutboundSignal::IceCandidate(candidate)),
                    None => debug!("Holding local candidate until our description is sent"),
                }
            }
            TransportEvent::GatheringComplete => debug!("Local candidate gathering complete"),
            TransportEvent::Connectivity(connectivity) => self.on_connectivity(connectivity),
            TransportEvent::RemoteTrack(media) => {
                info!("Remote {} track {} arrived", media.kind, media.track_id);
                self.observer.on_remote_media(&media);
            }
            TransportEvent::InboundDataLink(link) => {
                info!("Peer opened data link '{}'", link.label());
                self.attach_data_link(link, false);
            }
        }
    }

    fn on_connectivity(&mut self, connectivity: Connectivity) {
        match connectivity {
            Connectivity::Connected => {
                if self.state == SessionState::Connected {
                    debug!("Already connected");
                } else {
                    self.transition(SessionState::Connected);
                }
            }
            lost if lost.is_lost() => {
                warn!("Transport connectivity lost: {lost:?}");
                self.disconnect(DisconnectCause::Remote);
            }
            other => debug!("Transport connectivity: {other:?}"),
        }
    }

    fn attach_data_link(&mut self, link: Arc<dyn DataLink>, created_locally: bool) {
        if let Some(previous) = self.data_link.take() {
            warn!("Replacing data link '{}'", previous.link.label());
            if previous.outbox.send(LinkOp::Close).is_ok() {
                self.retired_links += 1;
            }
        }
        self.data_link = Some(LinkSlot::new(link, created_locally));
    }

    // ----- data link -----

    fn on_data_link(&mut self, event: DataLinkEvent) {
        match event {
            DataLinkEvent::Open => {
                let Some(slot) = &self.data_link else {
                    return;
                };
                info!("Data link '{}' open", slot.link.label());
                if slot.created_locally {
                    let enabled = self.media.as_ref().map_or(true, |m| m.camera_enabled());
                    slot.send(&DataLinkMessage::CameraState { enabled });
                }
            }
            DataLinkEvent::Message(text) => match DataLinkMessage::decode(&text) {
                Ok(Some(DataLinkMessage::Bye)) => {
                    info!("Peer said goodbye");
                    self.disconnect(DisconnectCause::Remote);
                }
                Ok(Some(DataLinkMessage::CameraState { enabled })) => {
                    debug!("Remote camera enabled: {enabled}");
                    self.observer.on_remote_camera(enabled);
                }
                Ok(Some(DataLinkMessage::Chat(chat))) => self.observer.on_chat_message(&chat),
                Ok(None) => debug!("Ignoring data-link message: {text}"),
                Err(e) => warn!("Dropping malformed data-link message: {e}"),
            },
            DataLinkEvent::Closed => self.on_data_link_closed(self.generation),
        }
    }

    fn on_data_link_closed(&mut self, generation: Generation) {
        if let Some(cause) = self.closing.take() {
            debug!("Data link closed after {cause:?} teardown");
            return;
        }
        if self.retired_links > 0 {
            self.retired_links -= 1;
            debug!("Replaced data link closed");
            return;
        }
        if generation != self.generation || self.state.is_terminal() {
            debug!("Dropping stale data-link close");
            return;
        }
        info!("Data link closed by peer");
        self.disconnect(DisconnectCause::Remote);
    }

    // ----- negotiation -----

    fn pump_steps(&mut self) {
        let Some(negotiation) = &self.negotiation else {
            return;
        };
        let Some(step) = self.steps.start_next() else {
            return;
        };

        let kind = step.kind();
        debug!("Starting {kind} step");
        let work = negotiation.run(step, self.media.clone());
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let result = work.await;
            sink.negotiated(StepOutcome { step: kind, result });
        });
    }

    fn on_negotiated(&mut self, outcome: StepOutcome) {
        self.steps.finish(outcome.step);

        match outcome.result {
            Ok(StepOutput::Offered { link, offer }) => {
                if let Some(link) = link {
                    self.attach_data_link(link, true);
                }
                info!("Sending SDP offer");
                self.signal(OutboundSignal::SdpOffer(offer));
                self.release_local_candidates();
            }
            Ok(StepOutput::RemoteApplied(kind)) => {
                let drained = self.candidates.open();
                debug!("Remote description applied, {} buffered candidate(s)", drained.len());
                if kind == SdpKind::Offer {
                    self.steps.push_front(Step::Answer);
                }
                if !drained.is_empty() {
                    self.steps.push_front(Step::ApplyCandidates(drained));
                }
            }
            Ok(StepOutput::Answered(answer)) => {
                info!("Sending SDP answer");
                self.signal(OutboundSignal::SdpAnswer(answer));
                self.release_local_candidates();
            }
            Ok(StepOutput::CandidatesApplied { applied, failed }) => {
                debug!("Applied {applied} remote candidate(s), {failed} failed");
            }
            Err(e) => {
                error!("Negotiation {} step failed: {e}", outcome.step);
                self.report(e);
            }
        }

        self.pump_steps();
    }

    fn release_local_candidates(&mut self) {
        for candidate in self.outbound.release() {
            self.signal(OutboundSignal::IceCandidate(candidate));
        }
    }

    // ----- teardown -----

    /// Releases every handle and moves to the cause's terminal state.
    /// Calling it on a finished session does nothing.
    pub fn disconnect(&mut self, cause: DisconnectCause) {
        if self.state.is_terminal() {
            debug!("Session {} already ended", self.id);
            return;
        }
        info!("Session {}: disconnecting ({cause:?})", self.id);

        if cause == DisconnectCause::Local {
            if let Some(link) = self.signaling.as_mut() {
                link.send_if_open(&OutboundSignal::Leave);
            }
        }

        let mut writer = None;
        if let Some(slot) = self.data_link.take() {
            if cause == DisconnectCause::Local && slot.link.is_open() {
                let _ = slot.outbox.send(LinkOp::Send(BYE.to_owned()));
            }
            let _ = slot.outbox.send(LinkOp::Close);
            self.closing = Some(cause);
            writer = Some(slot.writer);
        }
        let transport = self
            .negotiation
            .take()
            .map(|negotiation| Arc::clone(negotiation.transport()));
        if writer.is_some() || transport.is_some() {
            tokio::spawn(release_transport(writer, transport));
        }

        if let Some(mut link) = self.signaling.take() {
            link.close();
        }
        if self.media.take().is_some() {
            debug!("Local media released");
        }

        self.candidates.reset();
        self.outbound.reset();
        self.steps.clear();
        self.generation = self.generation.next();

        self.transition(cause.terminal_state());
    }
}

async fn release_transport(
    writer: Option<JoinHandle<()>>,
    transport: Option<Arc<dyn TransportEngine>>,
) {
    if let Some(writer) = writer {
        let _ = writer.await;
    }
    if let Some(transport) = transport {
        match transport.close().await {
            Ok(()) => debug!("Transport closed"),
            Err(e) => warn!("Transport close failed: {e}"),
        }
    }
}

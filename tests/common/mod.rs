#![allow(dead_code)]

use async_trait::async_trait;
use pairchat::config::{MediaConstraints, SessionConfig};
use pairchat::error::{MediaError, TransportError};
use pairchat::peer::{
    DataLink, DataLinkEvent, LocalMedia, MediaSource, SampleTrackSource, SdpKind,
    SessionDescription, TransportEngine, TransportEvent, TransportFactory,
};
use pairchat::peer::IceCandidate;
use pairchat::session::{
    ChannelObserver, Collaborators, EventSink, SessionDriver, SessionState, SignalingEvent,
    UiEvent,
};
use pairchat::signaling::{Envelope, RelayConnector, SignalMessage, SignalingLink, WireCommand};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"))
}

// ----- media -----

pub struct DeniedMedia;

#[async_trait]
impl MediaSource for DeniedMedia {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        Err(MediaError::Denied("camera blocked".into()))
    }
}

// ----- transport -----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateDataLink(String),
    ReplaceTracks(usize),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    Close,
}

pub struct MockLink {
    label: String,
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
    sink: EventSink,
}

impl MockLink {
    pub fn new(label: &str, sink: EventSink) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_owned(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            sink,
        })
    }

    /// The engine reports the link open.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.sink.data_link(DataLinkEvent::Open);
    }

    /// A message from the peer.
    pub fn receive(&self, text: &str) {
        self.sink.data_link(DataLinkEvent::Message(text.to_owned()));
    }

    /// The peer closed the link.
    pub fn drop_from_remote(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.sink.data_link(DataLinkEvent::Closed);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataLink for MockLink {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.open.store(false, Ordering::SeqCst);
        self.sink.data_link(DataLinkEvent::Closed);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    links: Mutex<Vec<Arc<MockLink>>>,
    sink: Mutex<Option<EventSink>>,
    rejected: Mutex<HashSet<String>>,
    fail_remote: AtomicBool,
    offer_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn link(&self, index: usize) -> Arc<MockLink> {
        Arc::clone(&self.links.lock().unwrap()[index])
    }

    pub fn sink(&self) -> EventSink {
        self.sink.lock().unwrap().clone().expect("transport not created")
    }

    pub fn event(&self, event: TransportEvent) {
        self.sink().transport(event);
    }

    pub fn reject_candidate(&self, candidate: &IceCandidate) {
        self.rejected.lock().unwrap().insert(candidate.candidate.clone());
    }

    pub fn fail_remote_descriptions(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    /// `create_offer` waits on the returned gate.
    pub fn hold_offers(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.offer_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TransportEngine for MockTransport {
    async fn create_data_link(&self, label: &str) -> Result<Arc<dyn DataLink>, TransportError> {
        self.record(Call::CreateDataLink(label.to_owned()));
        let link = MockLink::new(label, self.sink());
        self.links.lock().unwrap().push(Arc::clone(&link));
        Ok(link)
    }

    async fn replace_tracks(&self, media: &LocalMedia) -> Result<(), TransportError> {
        self.record(Call::ReplaceTracks(media.tracks().len()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.record(Call::CreateOffer);
        let gate = self.offer_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(SessionDescription::offer("v=0 local-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer("v=0 local-answer"))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        self.record(Call::SetLocal(description.kind));
        Ok(description)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.record(Call::SetRemote(description.kind));
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(TransportError::Unsupported("remote description rejected".into()));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let rejected = self.rejected.lock().unwrap().contains(&candidate.candidate);
        self.record(Call::AddCandidate(candidate.candidate));
        if rejected {
            return Err(TransportError::Unsupported("candidate rejected".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.record(Call::Close);
        Ok(())
    }
}

pub struct MockFactory {
    transport: Arc<MockTransport>,
    fail: bool,
    created: AtomicUsize,
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(&self, sink: EventSink) -> Result<Arc<dyn TransportEngine>, TransportError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TransportError::Unsupported("no ICE agent".into()));
        }
        *self.transport.sink.lock().unwrap() = Some(sink);
        Ok(Arc::clone(&self.transport) as Arc<dyn TransportEngine>)
    }
}

// ----- relay -----

#[derive(Default)]
pub struct MockRelay {
    connects: AtomicUsize,
    sink: Mutex<Option<EventSink>>,
    wire: Mutex<Option<mpsc::UnboundedReceiver<WireCommand>>>,
    history: Mutex<Vec<WireCommand>>,
}

impl MockRelay {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> EventSink {
        self.sink.lock().unwrap().clone().expect("relay not connected")
    }

    pub fn open(&self) {
        self.sink().relay(SignalingEvent::Opened);
    }

    pub fn deliver(&self, message: SignalMessage) {
        self.sink().relay(SignalingEvent::Message(message));
    }

    /// Everything the session wrote to the socket so far.
    pub fn wire(&self) -> Vec<WireCommand> {
        let mut history = self.history.lock().unwrap();
        if let Some(rx) = self.wire.lock().unwrap().as_mut() {
            while let Ok(command) = rx.try_recv() {
                history.push(command);
            }
        }
        history.clone()
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.wire()
            .into_iter()
            .filter_map(|command| match command {
                WireCommand::Text(text) => Some(serde_json::from_str(&text).unwrap()),
                WireCommand::Close => None,
            })
            .collect()
    }

    pub fn sent_names(&self) -> Vec<String> {
        self.sent().into_iter().map(|e| e.name).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.wire().contains(&WireCommand::Close)
    }
}

impl RelayConnector for MockRelay {
    fn connect(&self, sink: EventSink) -> SignalingLink {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sink.lock().unwrap() = Some(sink);
        *self.wire.lock().unwrap() = Some(rx);
        SignalingLink::new(tx)
    }
}

// ----- harness -----

#[derive(Default)]
pub struct Options {
    pub deny_media: bool,
    pub fail_transport: bool,
    pub config: SessionConfig,
}

pub struct Harness {
    pub driver: SessionDriver,
    pub transport: Arc<MockTransport>,
    pub relay: Arc<MockRelay>,
    factory: Arc<MockFactory>,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    ui_log: Vec<UiEvent>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(Options::default()).await
    }

    pub async fn start_with(options: Options) -> Self {
        let transport = Arc::new(MockTransport::default());
        let relay = Arc::new(MockRelay::default());
        let factory = Arc::new(MockFactory {
            transport: Arc::clone(&transport),
            fail: options.fail_transport,
            created: AtomicUsize::new(0),
        });
        let (observer, ui_rx) = ChannelObserver::new();

        let media: Arc<dyn MediaSource> = if options.deny_media {
            Arc::new(DeniedMedia)
        } else {
            Arc::new(SampleTrackSource)
        };
        let collaborators = Collaborators {
            media,
            transport: Arc::clone(&factory) as Arc<dyn TransportFactory>,
            relay: Arc::clone(&relay) as Arc<dyn RelayConnector>,
            observer: Arc::new(observer),
        };

        let driver = SessionDriver::start(options.config, collaborators).await;
        Self {
            driver,
            transport,
            relay,
            factory,
            ui_rx,
            ui_log: Vec::new(),
        }
    }

    /// Starts a session whose relay is open and whose pairing request went out.
    pub async fn pairing() -> Self {
        let mut h = Self::start().await;
        h.relay.open();
        h.driver.handle().start_pairing().unwrap();
        h.settle().await;
        h
    }

    pub async fn settle(&mut self) {
        self.driver.run_until_idle().await;
    }

    pub fn transports_created(&self) -> usize {
        self.factory.created.load(Ordering::SeqCst)
    }

    pub fn ui(&mut self) -> Vec<UiEvent> {
        while let Ok(event) = self.ui_rx.try_recv() {
            self.ui_log.push(event);
        }
        self.ui_log.clone()
    }

    pub fn states(&mut self) -> Vec<SessionState> {
        self.ui()
            .into_iter()
            .filter_map(|event| match event {
                UiEvent::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&mut self) -> Vec<String> {
        self.ui()
            .into_iter()
            .filter_map(|event| match event {
                UiEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

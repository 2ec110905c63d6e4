use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::peer::engine::TransportFactory;
use crate::peer::media::MediaSource;
use crate::session::event::{Command, SessionEvent};
use crate::session::observer::SessionObserver;
use crate::session::state::SessionState;
use crate::session::Session;
use crate::signaling::RelayConnector;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Quiet rounds before [`SessionDriver::run_until_idle`] gives up waiting.
const IDLE_ROUNDS: usize = 8;

/// External capabilities a session consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub media: Arc<dyn MediaSource>,
    pub transport: Arc<dyn TransportFactory>,
    pub relay: Arc<dyn RelayConnector>,
    pub observer: Arc<dyn SessionObserver>,
}

/// Owns a [`Session`] and feeds it its event queue, one event at a time.
pub struct SessionDriver {
    session: Session,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionDriver {
    /// Creates the session and runs its initialization. A driver is returned even when
    /// media was denied; its session is then already in `CameraFailed`.
    pub async fn start(config: SessionConfig, collaborators: Collaborators) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = Session::new(config, Arc::clone(&collaborators.observer), tx.clone());
        session
            .initialize(
                collaborators.media.as_ref(),
                collaborators.transport.as_ref(),
                collaborators.relay.as_ref(),
            )
            .await;
        Self { session, tx, rx }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Processes events until the session reaches a terminal state.
    pub async fn run(mut self) -> SessionState {
        while !self.session.state().is_terminal() {
            match self.rx.recv().await {
                Some(event) => self.dispatch(event),
                None => break,
            }
        }
        info!("Session {} finished: {}", self.session.id(), self.session.state());
        self.session.state()
    }

    /// Handles whatever is queued right now without waiting.
    pub fn process_queued(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Lets spawned work run and handles its events until the queue stays empty.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut handled = 0;
        let mut quiet = 0;
        while quiet < IDLE_ROUNDS {
            tokio::task::yield_now().await;
            match self.process_queued() {
                0 => quiet += 1,
                n => {
                    handled += n;
                    quiet = 0;
                }
            }
        }
        handled
    }

    fn dispatch(&mut self, event: SessionEvent) {
        debug!("Handling {} event", event.label());
        self.session.handle(event);
    }
}

/// Cloneable entry point for user commands.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn start_pairing(&self) -> Result<(), SessionError> {
        self.command(Command::StartPairing)
    }

    pub fn abort_pairing(&self) -> Result<(), SessionError> {
        self.command(Command::AbortPairing)
    }

    pub fn leave(&self) -> Result<(), SessionError> {
        self.command(Command::Leave)
    }

    pub fn toggle_camera(&self) -> Result<(), SessionError> {
        self.command(Command::ToggleCamera)
    }

    pub fn send_chat(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::SendChat(text.into()))
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.tx
            .send(SessionEvent::Command(command))
            .map_err(|_| SessionError::Closed)
    }
}

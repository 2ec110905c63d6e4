use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Initializing,
    CameraFailed,
    NotConnected,
    Connecting,
    Connected,
    DisconnectedLocal,
    DisconnectedRemote,
}

impl SessionState {
    /// No transition leaves a terminal state. A new pairing needs a new session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::CameraFailed
                | SessionState::DisconnectedLocal
                | SessionState::DisconnectedRemote
        )
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() || self == next {
            return false;
        }
        match next {
            NotConnected | CameraFailed => self == Initializing,
            Connecting => self == NotConnected,
            Connected => matches!(self, NotConnected | Connecting),
            DisconnectedLocal | DisconnectedRemote => true,
            Initializing => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initializing => "initializing",
            SessionState::CameraFailed => "camera failed",
            SessionState::NotConnected => "not connected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::DisconnectedLocal => "disconnected (local)",
            SessionState::DisconnectedRemote => "disconnected (remote)",
        };
        f.write_str(name)
    }
}

/// Which side creates the offer. Assigned once per pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Unassigned,
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    Local,
    Remote,
}

impl DisconnectCause {
    pub fn terminal_state(self) -> SessionState {
        match self {
            DisconnectCause::Local => SessionState::DisconnectedLocal,
            DisconnectCause::Remote => SessionState::DisconnectedRemote,
        }
    }
}

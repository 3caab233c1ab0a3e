//! The session record.
//!
//! One mutable record of connection phase and negotiated host identity,
//! exclusively owned by the connection layer and read-only everywhere else.

use simsync_types::SimulatorInfo;

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session.
    #[default]
    Disconnected,
    /// Transport opened, waiting for session-open confirmation.
    Connecting,
    /// Session open, worker running, variables registered.
    Connected,
    /// Teardown in progress.
    Disconnecting,
}

/// State of the one active session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// Host identity and version, negotiated at session open.
    pub sim_info: Option<SimulatorInfo>,
    /// Whether the secondary extension channel came up.
    pub secondary_live: bool,
    /// Set when the host quit or the transport faulted; suppresses
    /// further outbound calls during the asynchronous teardown.
    pub force_quit: bool,
}

impl Session {
    /// Fresh disconnected session state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session is fully open.
    pub fn is_connected(&self) -> bool {
        self.phase == SessionPhase::Connected
    }

    /// Whether a connect attempt is in progress or complete.
    pub fn is_active(&self) -> bool {
        matches!(self.phase, SessionPhase::Connecting | SessionPhase::Connected)
    }

    /// Whether outbound calls may be issued right now.
    pub fn can_transmit(&self) -> bool {
        self.is_connected() && !self.force_quit
    }

    /// Record session open: negotiated host info, phase Connected.
    pub fn open(&mut self, info: SimulatorInfo) {
        self.sim_info = Some(info);
        self.phase = SessionPhase::Connected;
    }

    /// The negotiated host version string, empty before session open.
    pub fn host_version(&self) -> &str {
        self.sim_info
            .as_ref()
            .map(|i| i.app_version.as_str())
            .unwrap_or("")
    }

    /// Reset everything back to the disconnected state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

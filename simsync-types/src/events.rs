//! Notifications raised toward the application layer.

use crate::Definition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity and version of the simulation host, negotiated at session open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SimulatorInfo {
    /// Host application name.
    pub app_name: String,
    /// Host application version string.
    pub app_version: String,
}

impl fmt::Display for SimulatorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.app_name, self.app_version)
    }
}

/// Reason attached to a per-variable error notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarErrorKind {
    /// The variable's source tag cannot be served by any live channel.
    UnsupportedType,
    /// The variable requires a newer host version than was negotiated.
    VersionMismatch,
    /// A registration call was rejected by the channel.
    Registration,
    /// A local script variable does not (yet) exist on the host.
    NotFound,
    /// The host reported an asynchronous error for a call referencing
    /// this variable.
    HostRejected,
}

/// Events emitted to the application layer.
///
/// Delivered over a channel; the worker thread sends, the application
/// receives. Nothing here blocks the worker.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Session opened and registration completed.
    Connected(SimulatorInfo),
    /// Session closed. Raised exactly once per connected lifetime.
    Disconnected,
    /// A variable received new data.
    DataUpdated {
        /// The variable that changed.
        def: Definition,
    },
    /// A session-scoped error not attributable to a single variable.
    SessionError {
        /// Human-readable description, including the resolved originating
        /// call when the correlation ledger found one.
        detail: String,
    },
    /// An error scoped to a single variable.
    VariableError {
        /// The affected variable.
        def: Definition,
        /// Classification of the failure.
        kind: VarErrorKind,
        /// Human-readable description.
        detail: String,
    },
    /// The secondary channel delivered a fresh list of known local
    /// variables.
    LocalVarsListUpdated(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulator_info_display() {
        let info = SimulatorInfo {
            app_name: "FlightSim".into(),
            app_version: "11.0.282174".into(),
        };
        assert_eq!(info.to_string(), "FlightSim v11.0.282174");
    }

    #[test]
    fn events_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<EngineEvent>();
    }
}

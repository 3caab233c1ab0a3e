//! Error types for SimSync.

use thiserror::Error;

/// Outcome of a failed connection attempt.
///
/// Transport faults never cross this boundary as panics; they are converted
/// to one of these variants by the connection layer.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The transport opened but no session-open confirmation arrived
    /// within the bound.
    #[error("timed out waiting for session open confirmation")]
    Timeout,

    /// The transport reported a native failure while opening.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Errors surfaced by engine operations on the caller thread.
///
/// Faults scoped to a single variable or call are reported asynchronously
/// via notifications instead and never appear here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation requires a connected session.
    #[error("not connected")]
    NotConnected,

    /// A variable with this name is already declared.
    #[error("duplicate variable name: {0}")]
    DuplicateName(String),

    /// No variable with this name or definition is declared.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// The outbound call was rejected by the transport.
    #[error("transmit failed: {0}")]
    Transmit(String),
}

//! # simsync-core
//!
//! Pure logic for SimSync (no I/O, instant tests).
//!
//! This crate implements the value model, request-correlation ledger,
//! provider routing policy, and session record without any network I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce
//! output without side effects. Time-dependent operations (staleness,
//! pending timeouts) take an explicit `Instant` so tests never sleep.
//! The actual I/O is performed by `simsync-client`, which drives these
//! types from its caller and worker threads.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ledger;
pub mod router;
pub mod session;
pub mod value;

pub use ledger::{CallLedger, CallRecord, LEDGER_CAPACITY};
pub use router::{choose_provider, Provider, RouteError};
pub use session::{Session, SessionPhase};
pub use value::{RegistrationStatus, SimVar, PENDING_TIMEOUT};

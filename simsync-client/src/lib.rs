//! # simsync-client
//!
//! Connection, registration and orchestration layer for SimSync.
//!
//! This is the crate applications use to mirror simulation-host telemetry.
//!
//! ## Features
//!
//! - **Two delivery channels**: the host's native interface plus an
//!   optional in-simulator extension for variable types the host interface
//!   cannot address, chosen per variable by a live routing policy
//! - **Bounded lifecycle**: connect and disconnect always return within
//!   configurable time bounds, and faults tear the session down without
//!   ever panicking out of the worker thread
//! - **Correlated failures**: asynchronous host errors are traced back to
//!   the outbound call that caused them
//! - **Pure core**: value/ledger/routing logic lives in simsync-core and
//!   tests instantly
//!
//! ## Example
//!
//! ```ignore
//! use simsync_client::{SyncEngine, MockTransport, MockExtension};
//! use simsync_types::{EngineEvent, VarDeclaration};
//!
//! let engine = SyncEngine::new(transport, extension);
//! engine.add_variable(&VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet"))?;
//! engine.connect()?;
//!
//! for event in engine.events().iter() {
//!     if let EngineEvent::DataUpdated { def } = event {
//!         println!("{:?} changed", def);
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod transport;
pub mod vars;

pub use connection::{Connection, ConnectionConfig};
pub use engine::SyncEngine;
pub use transport::{
    ExtensionClient, ExtensionMessage, HostMessage, LookupKind, MockExtension, MockTransport,
    SimTransport, SubscribeRequest, TransportError,
};
pub use vars::SimVarCollection;

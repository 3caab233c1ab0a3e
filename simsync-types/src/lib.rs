//! # simsync-types
//!
//! Vocabulary types for the SimSync simulation telemetry engine.
//!
//! This crate provides the foundational types used across all SimSync crates:
//! - [`Definition`], [`SequenceId`], [`EventId`] - Identity types
//! - [`SimValue`], [`ValueKind`], [`Cadence`], [`VarSource`] - The value vocabulary
//! - [`VarDeclaration`] - Plain-data variable declaration from the external loader
//! - [`EngineEvent`] - Notifications raised toward the application layer
//! - [`EngineError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod decl;
mod error;
mod events;
mod ids;
mod value;

pub use decl::VarDeclaration;
pub use error::{ConnectError, EngineError};
pub use events::{EngineEvent, SimulatorInfo, VarErrorKind};
pub use ids::{Definition, EventId, IdAllocator, SequenceId, DYNAMIC_EVENT_BASE};
pub use value::{Cadence, SimValue, ValueKind, VarSource, WireDataType};

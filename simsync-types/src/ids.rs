//! Identity types for SimSync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dynamic command-event ids are allocated at or above this value, keeping
/// them clear of the fixed system-notification ids below it.
pub const DYNAMIC_EVENT_BASE: u32 = 0x1000;

/// Stable per-session identity of a declared variable.
///
/// Assigned monotonically by the orchestrator's [`IdAllocator`] and never
/// reused while the session lives. Survives reconnects: registration is
/// redone on every connect, but the Definition stays with the variable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Definition(u32);

impl Definition {
    /// The reserved "no definition" value.
    pub const NONE: Definition = Definition(0);

    /// Create a Definition with the given raw value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the numeric value of this Definition.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Whether this is the reserved "no definition" value.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Definition({})", self.0)
    }
}

/// Send-sequence identity assigned by the primary transport to each
/// outbound call, used to correlate later asynchronous failure notices.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SequenceId(u32);

impl SequenceId {
    /// Create a SequenceId with the given value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the numeric value of this SequenceId.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceId({})", self.0)
    }
}

/// Identity of a command or system event on the primary channel.
///
/// Fixed system-notification events use small ids; dynamically mapped
/// named events are allocated from [`DYNAMIC_EVENT_BASE`] upward.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u32);

impl EventId {
    /// Create an EventId with the given value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the numeric value of this EventId.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Whether this id was dynamically allocated for a named event.
    pub fn is_dynamic(&self) -> bool {
        self.0 >= DYNAMIC_EVENT_BASE
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

/// Monotonic id counter, owned explicitly by the orchestrator rather than
/// living in process-wide static state. Sequential engines in one process
/// (and sequential tests) each get an isolated counter.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    /// Create an allocator that hands out ids starting at `first`.
    pub fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    /// Allocate the next id.
    pub fn allocate(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.saturating_add(1);
        id
    }
}

impl Default for IdAllocator {
    /// Definitions start at 1; zero is reserved for [`Definition::NONE`].
    fn default() -> Self {
        Self::starting_at(1)
    }
}

//! Request-correlation ledger.
//!
//! The primary channel reports call failures asynchronously, identified
//! only by the send-sequence id of the offending call. The ledger keeps a
//! rolling record of recent outbound calls so a failure notice can be
//! traced back to the call (and argument) that caused it.

use simsync_types::{Definition, SequenceId};
use std::fmt;

/// Number of call records retained. Large enough to absorb the flood of
/// registration calls at initial connection.
pub const LEDGER_CAPACITY: usize = 500;

/// Failure lookups start this many slots behind the write cursor: a
/// failure almost always concerns a recent call, not an old one.
const LOOKUP_REWIND: usize = 10;

/// One outbound call, as recorded at the choke point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Send-sequence id the transport assigned to this call.
    pub send_id: SequenceId,
    /// Name of the invoked call, if known.
    pub call: Option<&'static str>,
    /// The Definition the call's first argument referred to, when it was
    /// one. Lets a resolved failure be scoped to a variable.
    pub def: Option<Definition>,
    /// Rendered argument values, in call order.
    pub args: Vec<String>,
    /// Failure code from the host's async notice, once resolved.
    pub error: Option<u32>,
    /// One-based index of the argument the host blamed (0 if unknown).
    pub error_arg: u32,
}

impl CallRecord {
    fn new(
        send_id: SequenceId,
        call: &'static str,
        def: Option<Definition>,
        args: Vec<String>,
    ) -> Self {
        Self {
            send_id,
            call: Some(call),
            def,
            args,
            error: None,
            error_arg: 0,
        }
    }

    /// A record for a failure whose originating call was not found;
    /// carries only the id and code so the notice is never dropped.
    pub fn not_found(send_id: SequenceId, error: u32, error_arg: u32) -> Self {
        Self {
            send_id,
            call: None,
            def: None,
            args: Vec::new(),
            error: Some(error),
            error_arg,
        }
    }

    /// Whether the originating call was found in the ledger.
    pub fn is_resolved(&self) -> bool {
        self.call.is_some()
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(call) = self.call else {
            if let Some(code) = self.error {
                write!(f, "error {:#x} but: ", code)?;
            }
            return write!(f, "call record not found for send id {}", self.send_id);
        };
        if let Some(code) = self.error {
            write!(f, "error {:#x} for request {}: ", code, self.send_id)?;
        }
        write!(f, "{}(", call)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if i as u32 + 1 == self.error_arg {
                write!(f, "[@] ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")?;
        if self.error_arg > 0 {
            write!(f, " ([@] = error source arg. {})", self.error_arg)?;
        }
        Ok(())
    }
}

/// Fixed-capacity ring of recent outbound calls.
///
/// The write cursor advances monotonically and wraps; the oldest record is
/// silently overwritten. Lookup scans the ring exactly once and never
/// fails: a miss produces a synthetic [`CallRecord::not_found`].
#[derive(Debug)]
pub struct CallLedger {
    slots: Vec<Option<CallRecord>>,
    cursor: usize,
}

impl CallLedger {
    /// Create an empty ledger with [`LEDGER_CAPACITY`] slots.
    pub fn new() -> Self {
        Self::with_capacity(LEDGER_CAPACITY)
    }

    /// Create a ledger with an explicit slot count (tests use small rings).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            cursor: 0,
        }
    }

    /// Record an outbound call at the current cursor, overwriting the
    /// oldest entry once the ring has wrapped. `def` names the variable
    /// the call's first argument referred to, when it did.
    pub fn record(
        &mut self,
        send_id: SequenceId,
        call: &'static str,
        def: Option<Definition>,
        args: Vec<String>,
    ) {
        self.slots[self.cursor] = Some(CallRecord::new(send_id, call, def, args));
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Resolve an async failure notice to its originating call.
    ///
    /// Starts [`LOOKUP_REWIND`] slots behind the cursor and walks the ring
    /// once. On a match the stored record is annotated with the failure and
    /// a copy returned; otherwise a synthetic not-found record is returned.
    pub fn resolve(&mut self, send_id: SequenceId, error: u32, error_arg: u32) -> CallRecord {
        let len = self.slots.len();
        let start = (len + self.cursor - LOOKUP_REWIND.min(len)) % len;
        for offset in 0..len {
            let i = (start + offset) % len;
            if let Some(record) = self.slots[i].as_mut() {
                if record.send_id == send_id {
                    record.error = Some(error);
                    record.error_arg = error_arg;
                    return record.clone();
                }
            }
        }
        CallRecord::not_found(send_id, error, error_arg)
    }

    /// Clear all records; used when a session is torn down.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.cursor = 0;
    }
}

impl Default for CallLedger {
    fn default() -> Self {
        Self::new()
    }
}

//! Channel abstractions for SimSync.
//!
//! Two independent delivery channels feed the engine:
//!
//! - [`SimTransport`] — the simulation host's native telemetry/event
//!   interface (the primary channel). Synchronous, message-pumped: the
//!   worker thread polls one pending message at a time.
//! - [`ExtensionClient`] — the optional in-simulator extension module (the
//!   secondary channel), which can address variable types the primary
//!   channel cannot.
//!
//! Both traits ship mock implementations for testing.

mod mock;

pub use mock::{MockExtension, MockTransport, RecordedCall, RecordedSet};

use simsync_types::{
    Cadence, Definition, EventId, SequenceId, SimValue, SimulatorInfo, ValueKind, VarSource,
    WireDataType,
};
use std::time::Duration;
use thiserror::Error;

/// Channel-level errors.
///
/// These never cross the engine boundary: the connection and registration
/// layers catch them, log them, and convert them to statuses or per-variable
/// notifications.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the channel failed.
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// The channel is not open.
    #[error("not connected")]
    NotConnected,

    /// The channel closed underneath us.
    #[error("connection closed")]
    Closed,

    /// An outbound call was rejected.
    #[error("call failed: {0}")]
    CallFailed(String),
}

/// One inbound message from the primary channel.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    /// The host confirmed the session and identified itself.
    SessionOpen(SimulatorInfo),
    /// The host is shutting down.
    Quit,
    /// Telemetry data for a registered definition.
    Data {
        /// The definition the data belongs to.
        def: Definition,
        /// The delivered value.
        value: SimValue,
    },
    /// Asynchronous failure notice for an earlier outbound call.
    Exception {
        /// Send-sequence id of the offending call.
        send_id: SequenceId,
        /// Host failure code.
        error: u32,
        /// One-based index of the blamed argument (0 if unknown).
        index: u32,
    },
    /// A subscribed system notification fired.
    SystemEvent {
        /// The subscribed event.
        event: EventId,
        /// Event payload word.
        data: u32,
    },
    /// A system notification that carries a file name (flight or aircraft
    /// load).
    FilenameEvent {
        /// The subscribed event.
        event: EventId,
        /// The loaded file.
        filename: String,
    },
}

/// One inbound message from the secondary channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionMessage {
    /// A subscribed variable produced a new value.
    Data {
        /// The definition the data belongs to.
        def: Definition,
        /// The delivered value.
        value: SimValue,
    },
    /// The extension enumerated the host's known local variables.
    LocalVarsList(Vec<String>),
    /// A log line forwarded from the extension module.
    Log {
        /// The forwarded text.
        message: String,
    },
}

/// Name spaces the extension can look up ids in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    /// Local script variables.
    LocalVariable,
    /// Named command key events.
    KeyEvent,
}

/// Subscription descriptor submitted to the secondary channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    /// Definition the subscription reports under.
    pub def: Definition,
    /// Source tag of the variable.
    pub source: VarSource,
    /// Variable name without tag prefix or index suffix.
    pub name: String,
    /// Optional index extracted from a trailing `:NN` name suffix.
    pub index: Option<u8>,
    /// Unit name.
    pub unit: String,
    /// Value kind the subscriber expects back.
    pub kind: ValueKind,
    /// Poll interval in milliseconds (0 = per-frame).
    pub interval_ms: u32,
    /// Minimum change that should be reported.
    pub delta_epsilon: f32,
}

/// The primary channel: the host's native telemetry/event interface.
///
/// All methods are synchronous; the worker thread owns [`poll_message`]
/// while outbound calls may come from any thread. Implementations must be
/// internally synchronized.
///
/// [`poll_message`]: SimTransport::poll_message
pub trait SimTransport: Send + Sync {
    /// Open the session. Confirmation arrives later as
    /// [`HostMessage::SessionOpen`].
    fn open(&self) -> Result<(), TransportError>;

    /// Close the session.
    fn close(&self) -> Result<(), TransportError>;

    /// Whether the session is currently open.
    fn is_open(&self) -> bool;

    /// Register a typed data definition. `unit` is omitted for string data.
    fn add_definition(
        &self,
        def: Definition,
        name: &str,
        unit: Option<&str>,
        data_type: WireDataType,
        epsilon: f32,
    ) -> Result<(), TransportError>;

    /// Drop a previously added data definition.
    fn clear_definition(&self, def: Definition) -> Result<(), TransportError>;

    /// Subscribe data delivery for a definition at the given cadence.
    /// `Cadence::Never` silences a previous subscription.
    fn subscribe_data(
        &self,
        def: Definition,
        cadence: Cadence,
        interval: u32,
    ) -> Result<(), TransportError>;

    /// Request a single immediate delivery for a definition.
    fn request_data_once(&self, def: Definition) -> Result<(), TransportError>;

    /// Map a named command event to an id for later transmission.
    fn map_client_event(&self, event: EventId, name: &str) -> Result<(), TransportError>;

    /// Fire a mapped command event with up to five payload words.
    fn transmit_client_event(&self, event: EventId, data: [u32; 5]) -> Result<(), TransportError>;

    /// Subscribe a named system notification under the given id.
    fn subscribe_system_event(&self, event: EventId, name: &str) -> Result<(), TransportError>;

    /// Write a value to a registered definition.
    fn set_data(&self, def: Definition, value: &SimValue) -> Result<(), TransportError>;

    /// Block up to `timeout` for one pending inbound message.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing pending; an error
    /// means the channel faulted and the session is over.
    fn poll_message(&self, timeout: Duration) -> Result<Option<HostMessage>, TransportError>;

    /// The send-sequence id the host assigned to the most recent outbound
    /// call. Only meaningful while the caller holds the outbound lock.
    fn last_sent_sequence_id(&self) -> SequenceId;
}

/// The secondary channel: the in-simulator extension module.
///
/// Everything here is best-effort; a dead extension only disables the
/// variable types that need it.
pub trait ExtensionClient: Send + Sync {
    /// Connect to the extension module. `host_version` is the negotiated
    /// session version, which the module may use to pick a protocol level.
    fn connect(&self, host_version: &str) -> Result<(), TransportError>;

    /// Tear the extension connection down. Infallible by design; a channel
    /// that is already gone is fine.
    fn disconnect(&self);

    /// Submit a subscription descriptor.
    fn subscribe(&self, request: &SubscribeRequest) -> Result<(), TransportError>;

    /// Cancel the subscription for a definition.
    fn unsubscribe(&self, def: Definition) -> Result<(), TransportError>;

    /// Look a name up in one of the extension's id spaces. `Ok(None)`
    /// means the name is unknown to the host.
    fn lookup(&self, kind: LookupKind, name: &str) -> Result<Option<u32>, TransportError>;

    /// Write a variable by name. With `create` set, a missing local
    /// variable is created on the host first.
    fn set_variable(
        &self,
        name: &str,
        unit: &str,
        value: f64,
        create: bool,
    ) -> Result<(), TransportError>;

    /// Run a calculator-code expression host-side.
    fn execute_calculator_code(&self, code: &str) -> Result<(), TransportError>;

    /// Ask for a fresh enumeration of known local variables; the result
    /// arrives later as [`ExtensionMessage::LocalVarsList`].
    fn request_local_vars_list(&self) -> Result<(), TransportError>;

    /// Request one immediate value delivery for a subscribed definition.
    fn request_update(&self, def: Definition) -> Result<(), TransportError>;

    /// Fire a key event by numeric id with up to five payload words.
    fn send_key_event(&self, event_id: u32, values: [u32; 5]) -> Result<(), TransportError>;

    /// Take all inbound messages queued since the last drain.
    fn drain(&self) -> Vec<ExtensionMessage>;
}

//! Mock channels for testing.
//!
//! Allow queueing inbound messages and capturing outbound calls for
//! verification, with forced-failure hooks for the error paths.

use super::{
    ExtensionClient, ExtensionMessage, HostMessage, LookupKind, SimTransport, SubscribeRequest,
    TransportError,
};
use parking_lot::{Condvar, Mutex};
use simsync_types::{
    Cadence, Definition, EventId, SequenceId, SimValue, SimulatorInfo, WireDataType,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One captured outbound call on the mock primary channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    /// `add_definition` was invoked.
    AddDefinition {
        /// The definition registered.
        def: Definition,
        /// Registered (tag-prefixed) name.
        name: String,
        /// Unit, if not string data.
        unit: Option<String>,
        /// Wire data type.
        data_type: WireDataType,
        /// Change threshold.
        epsilon: f32,
    },
    /// `clear_definition` was invoked.
    ClearDefinition(Definition),
    /// `subscribe_data` was invoked.
    SubscribeData {
        /// The definition subscribed.
        def: Definition,
        /// Requested cadence.
        cadence: Cadence,
        /// Requested interval count.
        interval: u32,
    },
    /// `request_data_once` was invoked.
    RequestDataOnce(Definition),
    /// `map_client_event` was invoked.
    MapClientEvent {
        /// Assigned event id.
        event: EventId,
        /// Named event mapped.
        name: String,
    },
    /// `transmit_client_event` was invoked.
    TransmitClientEvent {
        /// The fired event.
        event: EventId,
        /// Payload words.
        data: [u32; 5],
    },
    /// `subscribe_system_event` was invoked.
    SubscribeSystemEvent {
        /// Assigned event id.
        event: EventId,
        /// System notification name.
        name: String,
    },
    /// `set_data` was invoked.
    SetData {
        /// The definition written.
        def: Definition,
        /// The written value.
        value: SimValue,
    },
}

#[derive(Debug, Default)]
struct TransportInner {
    open: bool,
    auto_session: Option<SimulatorInfo>,
    queue: VecDeque<HostMessage>,
    calls: Vec<RecordedCall>,
    last_seq: u32,
    fail_next_open: Option<String>,
    fail_next_call: Option<String>,
    fail_poll: bool,
}

/// Mock primary channel.
///
/// Captures outbound calls, serves queued inbound messages from
/// `poll_message`, and assigns monotonically increasing send-sequence ids
/// the way a real host interface does.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<TransportInner>>,
    wake: Arc<Condvar>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for `open()` to immediately queue a session-open
    /// confirmation with the given host identity.
    pub fn auto_open(&self, info: SimulatorInfo) {
        self.inner.lock().auto_session = Some(info);
    }

    /// Queue an inbound message for the worker to pick up.
    pub fn queue_message(&self, message: HostMessage) {
        self.inner.lock().queue.push_back(message);
        self.wake.notify_all();
    }

    /// All outbound calls captured so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().calls.clone()
    }

    /// Drop the captured calls (keeps the channel open).
    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Cause the next `open()` to fail with the given error.
    pub fn fail_next_open(&self, error: &str) {
        self.inner.lock().fail_next_open = Some(error.to_string());
    }

    /// Cause the next outbound call to fail with the given error.
    pub fn fail_next_call(&self, error: &str) {
        self.inner.lock().fail_next_call = Some(error.to_string());
    }

    /// Cause the next `poll_message()` to report a channel fault.
    pub fn fail_poll(&self) {
        self.inner.lock().fail_poll = true;
        self.wake.notify_all();
    }

    fn record(&self, call: RecordedCall) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_call.take() {
            // A rejected call still consumes a sequence id.
            inner.last_seq += 1;
            return Err(TransportError::CallFailed(error));
        }
        inner.last_seq += 1;
        inner.calls.push(call);
        Ok(())
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            wake: Arc::clone(&self.wake),
        }
    }
}

impl SimTransport for MockTransport {
    fn open(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_open.take() {
            return Err(TransportError::OpenFailed(error));
        }
        inner.open = true;
        if let Some(info) = inner.auto_session.clone() {
            inner.queue.push_back(HostMessage::SessionOpen(info));
        }
        drop(inner);
        self.wake.notify_all();
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.open = false;
        inner.queue.clear();
        drop(inner);
        self.wake.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn add_definition(
        &self,
        def: Definition,
        name: &str,
        unit: Option<&str>,
        data_type: WireDataType,
        epsilon: f32,
    ) -> Result<(), TransportError> {
        self.record(RecordedCall::AddDefinition {
            def,
            name: name.to_string(),
            unit: unit.map(str::to_string),
            data_type,
            epsilon,
        })
    }

    fn clear_definition(&self, def: Definition) -> Result<(), TransportError> {
        self.record(RecordedCall::ClearDefinition(def))
    }

    fn subscribe_data(
        &self,
        def: Definition,
        cadence: Cadence,
        interval: u32,
    ) -> Result<(), TransportError> {
        self.record(RecordedCall::SubscribeData {
            def,
            cadence,
            interval,
        })
    }

    fn request_data_once(&self, def: Definition) -> Result<(), TransportError> {
        self.record(RecordedCall::RequestDataOnce(def))
    }

    fn map_client_event(&self, event: EventId, name: &str) -> Result<(), TransportError> {
        self.record(RecordedCall::MapClientEvent {
            event,
            name: name.to_string(),
        })
    }

    fn transmit_client_event(&self, event: EventId, data: [u32; 5]) -> Result<(), TransportError> {
        self.record(RecordedCall::TransmitClientEvent { event, data })
    }

    fn subscribe_system_event(&self, event: EventId, name: &str) -> Result<(), TransportError> {
        self.record(RecordedCall::SubscribeSystemEvent {
            event,
            name: name.to_string(),
        })
    }

    fn set_data(&self, def: Definition, value: &SimValue) -> Result<(), TransportError> {
        self.record(RecordedCall::SetData {
            def,
            value: value.clone(),
        })
    }

    fn poll_message(&self, timeout: Duration) -> Result<Option<HostMessage>, TransportError> {
        let mut inner = self.inner.lock();
        loop {
            if inner.fail_poll {
                inner.fail_poll = false;
                return Err(TransportError::Closed);
            }
            if let Some(message) = inner.queue.pop_front() {
                return Ok(Some(message));
            }
            if !inner.open {
                return Err(TransportError::NotConnected);
            }
            if self.wake.wait_for(&mut inner, timeout).timed_out() {
                return Ok(None);
            }
        }
    }

    fn last_sent_sequence_id(&self) -> SequenceId {
        SequenceId::new(self.inner.lock().last_seq)
    }
}

/// One captured `set_variable` call on the mock extension.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSet {
    /// Written variable name.
    pub name: String,
    /// Unit name.
    pub unit: String,
    /// Written value.
    pub value: f64,
    /// Whether create-if-missing was requested.
    pub create: bool,
}

#[derive(Debug, Default)]
struct ExtensionInner {
    live: bool,
    fail_next_connect: Option<String>,
    known_locals: Vec<String>,
    known_key_events: Vec<(String, u32)>,
    subscriptions: Vec<SubscribeRequest>,
    unsubscribed: Vec<Definition>,
    sets: Vec<RecordedSet>,
    executed: Vec<String>,
    key_events: Vec<(u32, [u32; 5])>,
    list_requests: u32,
    update_requests: Vec<Definition>,
    queue: VecDeque<ExtensionMessage>,
}

/// Mock secondary channel.
#[derive(Debug, Default)]
pub struct MockExtension {
    inner: Arc<Mutex<ExtensionInner>>,
}

impl MockExtension {
    /// Create a new mock extension.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the set of local variables the host claims to know.
    pub fn set_known_locals(&self, names: &[&str]) {
        self.inner.lock().known_locals = names.iter().map(|n| n.to_string()).collect();
    }

    /// Seed a named key event with its numeric id.
    pub fn add_key_event(&self, name: &str, id: u32) {
        self.inner.lock().known_key_events.push((name.to_string(), id));
    }

    /// Queue an inbound message for the next drain.
    pub fn queue_message(&self, message: ExtensionMessage) {
        self.inner.lock().queue.push_back(message);
    }

    /// Cause the next `connect()` to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.lock().fail_next_connect = Some(error.to_string());
    }

    /// Whether the extension connection is currently up.
    pub fn live(&self) -> bool {
        self.inner.lock().live
    }

    /// Subscription descriptors captured so far.
    pub fn subscriptions(&self) -> Vec<SubscribeRequest> {
        self.inner.lock().subscriptions.clone()
    }

    /// Definitions unsubscribed so far.
    pub fn unsubscribed(&self) -> Vec<Definition> {
        self.inner.lock().unsubscribed.clone()
    }

    /// Variable writes captured so far.
    pub fn sets(&self) -> Vec<RecordedSet> {
        self.inner.lock().sets.clone()
    }

    /// Calculator-code expressions captured so far.
    pub fn executed(&self) -> Vec<String> {
        self.inner.lock().executed.clone()
    }

    /// Key events fired so far.
    pub fn key_events(&self) -> Vec<(u32, [u32; 5])> {
        self.inner.lock().key_events.clone()
    }

    /// How many local-variable list enumerations were requested.
    pub fn list_requests(&self) -> u32 {
        self.inner.lock().list_requests
    }

    /// Definitions for which an immediate update was requested.
    pub fn update_requests(&self) -> Vec<Definition> {
        self.inner.lock().update_requests.clone()
    }
}

impl Clone for MockExtension {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ExtensionClient for MockExtension {
    fn connect(&self, _host_version: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::OpenFailed(error));
        }
        inner.live = true;
        Ok(())
    }

    fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.live = false;
        inner.queue.clear();
    }

    fn subscribe(&self, request: &SubscribeRequest) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.live {
            return Err(TransportError::NotConnected);
        }
        inner.subscriptions.push(request.clone());
        Ok(())
    }

    fn unsubscribe(&self, def: Definition) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.live {
            return Err(TransportError::NotConnected);
        }
        inner.unsubscribed.push(def);
        Ok(())
    }

    fn lookup(&self, kind: LookupKind, name: &str) -> Result<Option<u32>, TransportError> {
        let inner = self.inner.lock();
        if !inner.live {
            return Err(TransportError::NotConnected);
        }
        let found = match kind {
            LookupKind::LocalVariable => inner
                .known_locals
                .iter()
                .position(|n| n == name)
                .map(|i| i as u32),
            LookupKind::KeyEvent => inner
                .known_key_events
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id),
        };
        Ok(found)
    }

    fn set_variable(
        &self,
        name: &str,
        unit: &str,
        value: f64,
        create: bool,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.live {
            return Err(TransportError::NotConnected);
        }
        inner.sets.push(RecordedSet {
            name: name.to_string(),
            unit: unit.to_string(),
            value,
            create,
        });
        Ok(())
    }

    fn execute_calculator_code(&self, code: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.live {
            return Err(TransportError::NotConnected);
        }
        inner.executed.push(code.to_string());
        Ok(())
    }

    fn request_local_vars_list(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.live {
            return Err(TransportError::NotConnected);
        }
        inner.list_requests += 1;
        Ok(())
    }

    fn request_update(&self, def: Definition) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.live {
            return Err(TransportError::NotConnected);
        }
        inner.update_requests.push(def);
        Ok(())
    }

    fn send_key_event(&self, event_id: u32, values: [u32; 5]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.live {
            return Err(TransportError::NotConnected);
        }
        inner.key_events.push((event_id, values));
        Ok(())
    }

    fn drain(&self) -> Vec<ExtensionMessage> {
        self.inner.lock().queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_records_calls_and_sequence_ids() {
        let transport = MockTransport::new();
        transport.open().unwrap();

        assert_eq!(transport.last_sent_sequence_id(), SequenceId::new(0));
        transport
            .add_definition(Definition::new(1), "ALT", Some("feet"), WireDataType::Float64, 0.01)
            .unwrap();
        assert_eq!(transport.last_sent_sequence_id(), SequenceId::new(1));
        transport
            .subscribe_data(Definition::new(1), Cadence::Second, 1)
            .unwrap();
        assert_eq!(transport.last_sent_sequence_id(), SequenceId::new(2));

        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn calls_require_open_channel() {
        let transport = MockTransport::new();
        let result = transport.request_data_once(Definition::new(1));
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[test]
    fn failed_call_still_consumes_a_sequence_id() {
        let transport = MockTransport::new();
        transport.open().unwrap();
        transport.fail_next_call("rejected");

        let result = transport.request_data_once(Definition::new(1));
        assert!(matches!(result, Err(TransportError::CallFailed(_))));
        assert_eq!(transport.last_sent_sequence_id(), SequenceId::new(1));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn poll_returns_queued_messages_then_times_out() {
        let transport = MockTransport::new();
        transport.open().unwrap();
        transport.queue_message(HostMessage::Quit);

        let first = transport.poll_message(Duration::from_millis(10)).unwrap();
        assert_eq!(first, Some(HostMessage::Quit));

        let second = transport.poll_message(Duration::from_millis(10)).unwrap();
        assert_eq!(second, None);
    }

    #[test]
    fn poll_faults_on_demand() {
        let transport = MockTransport::new();
        transport.open().unwrap();
        transport.fail_poll();

        let result = transport.poll_message(Duration::from_millis(10));
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn auto_open_queues_session_confirmation() {
        let transport = MockTransport::new();
        transport.auto_open(SimulatorInfo {
            app_name: "FlightSim".into(),
            app_version: "11.0".into(),
        });
        transport.open().unwrap();

        let message = transport.poll_message(Duration::from_millis(10)).unwrap();
        assert!(matches!(message, Some(HostMessage::SessionOpen(_))));
    }

    #[test]
    fn clone_shares_state() {
        let a = MockTransport::new();
        let b = a.clone();
        a.open().unwrap();
        assert!(b.is_open());
    }

    #[test]
    fn extension_lookup_uses_seeded_names() {
        let ext = MockExtension::new();
        ext.connect("11.0").unwrap();
        ext.set_known_locals(&["A32NX_PARK_BRAKE", "A32NX_SPOILERS"]);
        ext.add_key_event("TOGGLE_NAV_LIGHTS", 66379);

        assert_eq!(
            ext.lookup(LookupKind::LocalVariable, "A32NX_SPOILERS").unwrap(),
            Some(1)
        );
        assert_eq!(ext.lookup(LookupKind::LocalVariable, "MISSING").unwrap(), None);
        assert_eq!(
            ext.lookup(LookupKind::KeyEvent, "TOGGLE_NAV_LIGHTS").unwrap(),
            Some(66379)
        );
    }

    #[test]
    fn extension_calls_require_live_connection() {
        let ext = MockExtension::new();
        assert!(matches!(
            ext.execute_calculator_code("1 2 +"),
            Err(TransportError::NotConnected)
        ));

        ext.connect("11.0").unwrap();
        ext.execute_calculator_code("1 2 +").unwrap();
        assert_eq!(ext.executed(), vec!["1 2 +".to_string()]);
    }

    #[test]
    fn extension_drain_empties_queue() {
        let ext = MockExtension::new();
        ext.connect("11.0").unwrap();
        ext.queue_message(ExtensionMessage::Log {
            message: "hello".into(),
        });

        assert_eq!(ext.drain().len(), 1);
        assert!(ext.drain().is_empty());
    }
}

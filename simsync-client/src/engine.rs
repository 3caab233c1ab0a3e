//! SyncEngine - the main interface for SimSync.
//!
//! The orchestrator owns the variable collection, the Definition and
//! event-id allocators, and the connection. Applications declare variables,
//! fire command events and write values through it, and consume
//! [`EngineEvent`] notifications from its channel.

use crate::connection::{split_index_suffix, Connection, ConnectionConfig};
use crate::transport::{ExtensionClient, LookupKind, SimTransport};
use crate::vars::SimVarCollection;
use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use simsync_core::{choose_provider, Provider};
use simsync_types::{
    ConnectError, Definition, EngineError, EngineEvent, EventId, IdAllocator, SimValue,
    SimulatorInfo, VarDeclaration, VarSource, DYNAMIC_EVENT_BASE,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

struct EventMap {
    alloc: IdAllocator,
    by_name: HashMap<String, EventId>,
}

/// The engine: one live mapping between host-side variables/events and the
/// local application, over one session at a time.
pub struct SyncEngine<T, X> {
    vars: Arc<SimVarCollection>,
    connection: Connection<T, X>,
    defs: Mutex<IdAllocator>,
    events_map: Mutex<EventMap>,
    events_rx: Receiver<EngineEvent>,
}

impl<T: SimTransport + 'static, X: ExtensionClient + 'static> SyncEngine<T, X> {
    /// Build an engine over the given channels with default timing bounds.
    pub fn new(transport: T, extension: X) -> Self {
        Self::with_config(transport, extension, ConnectionConfig::default())
    }

    /// Build an engine with explicit timing bounds.
    pub fn with_config(transport: T, extension: X, config: ConnectionConfig) -> Self {
        let vars = Arc::new(SimVarCollection::new());
        let (tx, rx) = unbounded();
        let connection = Connection::new(transport, extension, Arc::clone(&vars), tx, config);
        Self {
            vars,
            connection,
            defs: Mutex::new(IdAllocator::default()),
            events_map: Mutex::new(EventMap {
                alloc: IdAllocator::starting_at(DYNAMIC_EVENT_BASE),
                by_name: HashMap::new(),
            }),
            events_rx: rx,
        }
    }

    /// The notification channel. The worker thread sends; receive from any
    /// thread.
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events_rx
    }

    /// Open the session. See [`Connection::connect`].
    pub fn connect(&self) -> Result<(), ConnectError> {
        self.connection.connect()
    }

    /// Tear the session down. See [`Connection::disconnect`].
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Whether a session is fully open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Host identity negotiated at session open, if connected.
    pub fn sim_info(&self) -> Option<SimulatorInfo> {
        self.connection.sim_info()
    }

    /// Declare a variable.
    ///
    /// Assigns a fresh Definition that stays with the variable across
    /// reconnects. Registers immediately when connected, lazily at the next
    /// session open otherwise.
    pub fn add_variable(&self, decl: &VarDeclaration) -> Result<Definition, EngineError> {
        let def = Definition::new(self.defs.lock().allocate());
        let var = simsync_core::SimVar::from_declaration(def, decl);
        self.vars.insert(var)?;
        debug!(name = %decl.name, %def, "variable declared");
        if self.connection.is_connected() {
            self.connection.register_var(def);
        }
        Ok(def)
    }

    /// Remove a declared variable, deregistering it first when connected.
    pub fn remove_variable(&self, name: &str) -> Result<(), EngineError> {
        let def = self
            .vars
            .def_of(name)
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))?;
        if self.connection.is_connected() {
            self.connection.deregister_var(def);
        }
        self.vars.remove(name);
        Ok(())
    }

    /// Replace a variable's declaration, keeping its Definition.
    pub fn update_variable(&self, decl: &VarDeclaration) -> Result<Definition, EngineError> {
        let def = self
            .vars
            .def_of(&decl.name)
            .ok_or_else(|| EngineError::UnknownVariable(decl.name.clone()))?;
        if self.connection.is_connected() {
            self.connection.deregister_var(def);
        }
        self.vars.remove(&decl.name);
        self.vars
            .insert(simsync_core::SimVar::from_declaration(def, decl))?;
        if self.connection.is_connected() {
            self.connection.register_var(def);
        }
        Ok(def)
    }

    /// The Definition bound to a declared variable name.
    pub fn definition_of(&self, name: &str) -> Option<Definition> {
        self.vars.def_of(name)
    }

    /// A variable's current value, if one has arrived this session.
    pub fn value(&self, name: &str) -> Option<SimValue> {
        let def = self.vars.def_of(name)?;
        self.vars.with_var(def, |v| v.value().cloned()).flatten()
    }

    /// A variable's display rendering (the declared default string until a
    /// value arrives).
    pub fn formatted_value(&self, name: &str) -> Option<String> {
        let def = self.vars.def_of(name)?;
        self.vars.with_var(def, |v| v.formatted())
    }

    /// Write a value to the host, routed by the provider policy.
    ///
    /// Local script variables are created on the host when missing.
    pub fn set_value(&self, name: &str, value: SimValue) -> Result<(), EngineError> {
        let def = self
            .vars
            .def_of(name)
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))?;
        if !self.connection.can_transmit() {
            return Err(EngineError::NotConnected);
        }
        let var = self
            .vars
            .snapshot(def)
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))?;
        if !var.settable {
            return Err(EngineError::Transmit(format!(
                "variable '{name}' is not settable"
            )));
        }

        let provider = choose_provider(var.source, var.cadence, self.connection.secondary_live())
            .map_err(|e| EngineError::Transmit(e.to_string()))?;
        match provider {
            Provider::Primary => self
                .connection
                .primary_call(
                    "set_data",
                    Some(def),
                    vec![def.to_string(), value.to_string()],
                    |t| t.set_data(def, &value),
                )
                .map_err(|e| EngineError::Transmit(e.to_string())),
            Provider::Secondary => {
                let numeric = match value {
                    SimValue::Real(v) => v,
                    SimValue::Integer(v) => v as f64,
                    SimValue::Bool(v) => f64::from(u8::from(v)),
                    SimValue::Text(_) => {
                        return Err(EngineError::Transmit(
                            "the extension channel only writes numeric values".to_string(),
                        ))
                    }
                };
                let create = var.source == VarSource::Local;
                // Address the write by the same base name the subscription
                // used; any `:NN` index suffix stays out of it.
                let (base_name, _) = split_index_suffix(&var.sim_name);
                self.connection
                    .extension()
                    .set_variable(&base_name, var.unit(), numeric, create)
                    .map_err(|e| EngineError::Transmit(e.to_string()))
            }
        }
    }

    /// Fire a named command event with up to five payload words.
    ///
    /// When the extension channel is live, the name is resolved to a key
    /// event id and fired through it directly; otherwise the name is mapped
    /// once to a dynamic event id on the primary channel and transmitted
    /// there. Mappings are reused across calls.
    pub fn transmit_event(&self, name: &str, values: [u32; 5]) -> Result<(), EngineError> {
        if !self.connection.can_transmit() {
            return Err(EngineError::NotConnected);
        }

        if self.connection.secondary_live() {
            match self.connection.extension().lookup(LookupKind::KeyEvent, name) {
                Ok(Some(id)) => {
                    return self
                        .connection
                        .extension()
                        .send_key_event(id, values)
                        .map_err(|e| EngineError::Transmit(e.to_string()));
                }
                Ok(None) => {} // unknown to the extension; fall through
                Err(e) => debug!("key event lookup failed: {e}"),
            }
        }

        let (event, newly_mapped) = {
            let mut map = self.events_map.lock();
            match map.by_name.get(name) {
                Some(&event) => (event, false),
                None => {
                    let event = EventId::new(map.alloc.allocate());
                    map.by_name.insert(name.to_string(), event);
                    (event, true)
                }
            }
        };
        if newly_mapped {
            self.connection
                .primary_call(
                    "map_client_event",
                    None,
                    vec![event.to_string(), name.to_string()],
                    |t| t.map_client_event(event, name),
                )
                .map_err(|e| EngineError::Transmit(e.to_string()))?;
        }
        self.connection
            .primary_call(
                "transmit_client_event",
                None,
                vec![event.to_string()],
                |t| t.transmit_client_event(event, values),
            )
            .map_err(|e| EngineError::Transmit(e.to_string()))
    }

    /// Fire a command event by raw numeric id.
    pub fn transmit_event_id(&self, event_id: u32, values: [u32; 5]) -> Result<(), EngineError> {
        if !self.connection.can_transmit() {
            return Err(EngineError::NotConnected);
        }
        if self.connection.secondary_live() {
            return self
                .connection
                .extension()
                .send_key_event(event_id, values)
                .map_err(|e| EngineError::Transmit(e.to_string()));
        }
        let event = EventId::new(event_id);
        self.connection
            .primary_call(
                "transmit_client_event",
                None,
                vec![event.to_string()],
                |t| t.transmit_client_event(event, values),
            )
            .map_err(|e| EngineError::Transmit(e.to_string()))
    }

    /// Ask the host for one immediate value delivery.
    ///
    /// A no-op while an earlier request for the same variable is still
    /// pending (bounded by the fixed pending timeout).
    pub fn request_value_update(&self, name: &str) -> Result<(), EngineError> {
        let def = self
            .vars
            .def_of(name)
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))?;
        if !self.connection.can_transmit() {
            return Err(EngineError::NotConnected);
        }
        let now = Instant::now();
        let proceed = self
            .vars
            .with_var(def, |var| {
                if var.is_pending(now) {
                    false
                } else {
                    var.mark_pending(now);
                    true
                }
            })
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))?;
        if !proceed {
            debug!(name, "value request already pending");
            return Ok(());
        }

        let var = self
            .vars
            .snapshot(def)
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))?;
        let result = match choose_provider(var.source, var.cadence, self.connection.secondary_live())
        {
            Ok(Provider::Primary) => self
                .connection
                .primary_call(
                    "request_data_once",
                    Some(def),
                    vec![def.to_string()],
                    |t| t.request_data_once(def),
                )
                .map_err(|e| EngineError::Transmit(e.to_string())),
            Ok(Provider::Secondary) => self
                .connection
                .extension()
                .request_update(def)
                .map_err(|e| EngineError::Transmit(e.to_string())),
            Err(e) => Err(EngineError::Transmit(e.to_string())),
        };
        if result.is_err() {
            // A request that never went out must not hold the pending window.
            self.vars.with_var(def, |var| var.clear_pending());
        }
        result
    }

    /// Run a calculator-code expression host-side. Requires the extension
    /// channel.
    pub fn execute_calculator_code(&self, code: &str) -> Result<(), EngineError> {
        if !self.connection.can_transmit() {
            return Err(EngineError::NotConnected);
        }
        if !self.connection.secondary_live() {
            return Err(EngineError::Transmit(
                "calculator code requires the extension channel".to_string(),
            ));
        }
        self.connection
            .extension()
            .execute_calculator_code(code)
            .map_err(|e| EngineError::Transmit(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockExtension, MockTransport, RecordedCall};
    use simsync_types::{Cadence, SimulatorInfo};
    use std::time::Duration;

    fn quick_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(250),
            stop_timeout: Duration::from_secs(1),
        }
    }

    fn engine() -> (SyncEngine<MockTransport, MockExtension>, MockTransport, MockExtension) {
        let transport = MockTransport::new();
        transport.auto_open(SimulatorInfo {
            app_name: "FlightSim".into(),
            app_version: "11.0".into(),
        });
        let extension = MockExtension::new();
        let engine = SyncEngine::with_config(transport.clone(), extension.clone(), quick_config());
        (engine, transport, extension)
    }

    fn connect(engine: &SyncEngine<MockTransport, MockExtension>) {
        engine.connect().unwrap();
        // Session setup runs on the worker; Connected marks its end.
        loop {
            match engine.events().recv_timeout(Duration::from_secs(2)).unwrap() {
                EngineEvent::Connected(_) => break,
                _ => continue,
            }
        }
    }

    fn settable_decl(name: &str, sim_name: &str) -> VarDeclaration {
        let mut decl = VarDeclaration::new(name, sim_name, "feet");
        decl.settable = true;
        decl
    }

    #[test]
    fn definitions_are_sequential_and_names_unique() {
        let (engine, _, _) = engine();
        let a = engine
            .add_variable(&VarDeclaration::new("A", "VAR A", "feet"))
            .unwrap();
        let b = engine
            .add_variable(&VarDeclaration::new("B", "VAR B", "feet"))
            .unwrap();
        assert_eq!((a, b), (Definition::new(1), Definition::new(2)));

        let err = engine
            .add_variable(&VarDeclaration::new("A", "OTHER", "feet"))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName(_)));
    }

    #[test]
    fn definitions_survive_reconnect() {
        let (engine, transport, _) = engine();
        let def = engine
            .add_variable(&VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet"))
            .unwrap();

        connect(&engine);
        engine.disconnect();
        transport.clear_calls();
        connect(&engine);

        assert_eq!(engine.definition_of("Altitude"), Some(def));
        // Re-registered under the same Definition.
        assert!(transport.calls().iter().any(|c| matches!(
            c,
            RecordedCall::AddDefinition { def: d, .. } if *d == def
        )));
        engine.disconnect();
    }

    #[test]
    fn add_while_connected_registers_immediately() {
        let (engine, transport, _) = engine();
        connect(&engine);
        transport.clear_calls();

        let def = engine
            .add_variable(&VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet"))
            .unwrap();

        assert!(transport.calls().iter().any(|c| matches!(
            c,
            RecordedCall::AddDefinition { def: d, .. } if *d == def
        )));
        engine.disconnect();
    }

    #[test]
    fn set_value_routes_to_primary() {
        let (engine, transport, _) = engine();
        let def = engine
            .add_variable(&settable_decl("Altitude", "PLANE ALTITUDE"))
            .unwrap();
        connect(&engine);

        engine
            .set_value("Altitude", SimValue::Real(15_000.0))
            .unwrap();

        assert!(transport.calls().iter().any(|c| matches!(
            c,
            RecordedCall::SetData { def: d, value } if *d == def && *value == SimValue::Real(15_000.0)
        )));
        engine.disconnect();
    }

    #[test]
    fn set_value_creates_local_vars_through_extension() {
        let (engine, _, extension) = engine();
        extension.set_known_locals(&["A32NX_PARK_BRAKE"]);
        let mut decl = VarDeclaration::new("ParkBrake", "A32NX_PARK_BRAKE", "number")
            .with_source(VarSource::Local)
            .with_cadence(Cadence::Millisecond, 100);
        decl.settable = true;
        engine.add_variable(&decl).unwrap();
        connect(&engine);

        engine.set_value("ParkBrake", SimValue::Real(1.0)).unwrap();

        let sets = extension.sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].name, "A32NX_PARK_BRAKE");
        assert!(sets[0].create);
        engine.disconnect();
    }

    #[test]
    fn set_value_strips_index_suffix_for_the_extension() {
        let (engine, _, extension) = engine();
        extension.set_known_locals(&["A32NX_FLAPS"]);
        let mut decl = VarDeclaration::new("Flaps", "A32NX_FLAPS:2", "number")
            .with_source(VarSource::Local)
            .with_cadence(Cadence::Millisecond, 100);
        decl.settable = true;
        engine.add_variable(&decl).unwrap();
        connect(&engine);

        engine.set_value("Flaps", SimValue::Real(0.5)).unwrap();

        let sets = extension.sets();
        assert_eq!(sets.len(), 1);
        // Written under the same base name the subscription used.
        assert_eq!(sets[0].name, "A32NX_FLAPS");
        engine.disconnect();
    }

    #[test]
    fn set_value_rejects_non_settable() {
        let (engine, _, _) = engine();
        engine
            .add_variable(&VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet"))
            .unwrap();
        connect(&engine);

        let err = engine
            .set_value("Altitude", SimValue::Real(1.0))
            .unwrap_err();
        assert!(matches!(err, EngineError::Transmit(_)));
        engine.disconnect();
    }

    #[test]
    fn operations_require_a_session() {
        let (engine, _, _) = engine();
        engine
            .add_variable(&settable_decl("Altitude", "PLANE ALTITUDE"))
            .unwrap();

        assert!(matches!(
            engine.set_value("Altitude", SimValue::Real(1.0)),
            Err(EngineError::NotConnected)
        ));
        assert!(matches!(
            engine.transmit_event("TOGGLE_NAV_LIGHTS", [0; 5]),
            Err(EngineError::NotConnected)
        ));
        assert!(matches!(
            engine.request_value_update("Altitude"),
            Err(EngineError::NotConnected)
        ));
    }

    #[test]
    fn named_event_maps_once_and_reuses_the_id() {
        let (engine, transport, extension) = engine();
        extension.fail_next_connect("module absent");
        connect(&engine);
        transport.clear_calls();

        engine.transmit_event("TOGGLE_NAV_LIGHTS", [0; 5]).unwrap();
        engine.transmit_event("TOGGLE_NAV_LIGHTS", [1, 0, 0, 0, 0]).unwrap();

        let calls = transport.calls();
        let mapped: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                RecordedCall::MapClientEvent { event, name } => Some((*event, name.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].1, "TOGGLE_NAV_LIGHTS");
        assert!(mapped[0].0.is_dynamic());

        let transmitted = calls
            .iter()
            .filter(|c| matches!(c, RecordedCall::TransmitClientEvent { .. }))
            .count();
        assert_eq!(transmitted, 2);
        engine.disconnect();
    }

    #[test]
    fn named_event_prefers_extension_key_lookup() {
        let (engine, transport, extension) = engine();
        extension.add_key_event("TOGGLE_NAV_LIGHTS", 66379);
        connect(&engine);
        transport.clear_calls();

        engine.transmit_event("TOGGLE_NAV_LIGHTS", [0; 5]).unwrap();

        assert_eq!(extension.key_events(), vec![(66379, [0; 5])]);
        assert!(transport.calls().is_empty());
        engine.disconnect();
    }

    #[test]
    fn request_value_update_suppresses_duplicates() {
        let (engine, transport, extension) = engine();
        extension.fail_next_connect("module absent");
        engine
            .add_variable(&VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet"))
            .unwrap();
        connect(&engine);
        transport.clear_calls();

        engine.request_value_update("Altitude").unwrap();
        engine.request_value_update("Altitude").unwrap();

        let requests = transport
            .calls()
            .iter()
            .filter(|c| matches!(c, RecordedCall::RequestDataOnce(_)))
            .count();
        assert_eq!(requests, 1);
        engine.disconnect();
    }

    #[test]
    fn failed_value_request_frees_the_pending_window() {
        let (engine, transport, extension) = engine();
        extension.fail_next_connect("module absent");
        engine
            .add_variable(&VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet"))
            .unwrap();
        connect(&engine);
        transport.clear_calls();

        transport.fail_next_call("busy");
        assert!(matches!(
            engine.request_value_update("Altitude"),
            Err(EngineError::Transmit(_))
        ));

        // The retry is not suppressed by a request that never went out.
        engine.request_value_update("Altitude").unwrap();
        let requests = transport
            .calls()
            .iter()
            .filter(|c| matches!(c, RecordedCall::RequestDataOnce(_)))
            .count();
        assert_eq!(requests, 1);
        engine.disconnect();
    }

    #[test]
    fn calculator_code_requires_the_extension() {
        let (engine, _, extension) = engine();
        extension.fail_next_connect("module absent");
        connect(&engine);

        let err = engine.execute_calculator_code("1 2 +").unwrap_err();
        assert!(matches!(err, EngineError::Transmit(_)));
        engine.disconnect();

        let (engine, _, extension) = self::engine();
        connect(&engine);
        engine.execute_calculator_code("1 2 +").unwrap();
        assert_eq!(extension.executed(), vec!["1 2 +".to_string()]);
        engine.disconnect();
    }

    #[test]
    fn update_variable_keeps_the_definition() {
        let (engine, _, _) = engine();
        let def = engine
            .add_variable(&VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet"))
            .unwrap();

        let updated = engine
            .update_variable(
                &VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet")
                    .with_cadence(Cadence::Second, 5),
            )
            .unwrap();

        assert_eq!(updated, def);
        assert_eq!(engine.definition_of("Altitude"), Some(def));
    }

    #[test]
    fn remove_variable_forgets_the_name() {
        let (engine, _, _) = engine();
        engine
            .add_variable(&VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet"))
            .unwrap();

        engine.remove_variable("Altitude").unwrap();
        assert_eq!(engine.definition_of("Altitude"), None);
        assert!(matches!(
            engine.remove_variable("Altitude"),
            Err(EngineError::UnknownVariable(_))
        ));
    }

    #[test]
    fn formatted_value_uses_default_until_data_arrives() {
        let (engine, _, _) = engine();
        engine
            .add_variable(
                &VarDeclaration::new("Altitude", "PLANE ALTITUDE", "feet").with_default("N/A"),
            )
            .unwrap();

        assert_eq!(engine.formatted_value("Altitude"), Some("N/A".to_string()));
        assert_eq!(engine.value("Altitude"), None);
    }
}

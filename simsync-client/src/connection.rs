//! The connection state machine.
//!
//! Owns the session lifecycle (Disconnected → Connecting → Connected →
//! Disconnecting), the dedicated message-receiving worker thread, and the
//! per-variable registration driver. All outbound primary-channel calls
//! funnel through one choke point that records them in the correlation
//! ledger atomically with the host-assigned sequence id.

use crate::dispatch::{Dispatcher, FollowUp};
use crate::transport::{
    ExtensionClient, HostMessage, LookupKind, SimTransport, SubscribeRequest, TransportError,
};
use crate::vars::SimVarCollection;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use simsync_core::{
    choose_provider, CallLedger, Provider, RegistrationStatus, Session, SessionPhase, SimVar,
};
use simsync_types::{
    Cadence, ConnectError, Definition, EngineEvent, EventId, SimulatorInfo, ValueKind,
    VarErrorKind, VarSource,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// System notifications subscribed on every session open. Fixed small ids,
/// well below the dynamic event-id base.
const SYSTEM_EVENTS: &[(u32, &str)] = &[
    (1, "SimStart"),
    (2, "SimStop"),
    (3, "Pause"),
    (4, "FlightLoaded"),
    (5, "AircraftLoaded"),
];

/// The worker re-checks the quit flag between poll slices, bounding
/// disconnect latency without a waitable transport handle.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Timing bounds for the connection lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long `connect` waits for session-open confirmation.
    pub connect_timeout: Duration,
    /// How long `disconnect` waits for the worker thread to exit.
    pub stop_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

struct Shared<T, X> {
    transport: T,
    extension: X,
    vars: Arc<SimVarCollection>,
    ledger: Arc<Mutex<CallLedger>>,
    session: Mutex<Session>,
    dispatcher: Dispatcher,
    events: Sender<EngineEvent>,
    config: ConnectionConfig,
    quit: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Serializes teardown so repeated or concurrent disconnects run the
    /// shutdown sequence exactly once.
    teardown: Mutex<()>,
    /// The outbound choke point: call and sequence-id fetch are atomic
    /// against other outbound calls.
    outbound: Mutex<()>,
}

/// Cloneable handle to one connection. Clones share all state; the worker
/// thread holds one.
pub struct Connection<T, X> {
    inner: Arc<Shared<T, X>>,
}

impl<T, X> Clone for Connection<T, X> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SimTransport + 'static, X: ExtensionClient + 'static> Connection<T, X> {
    /// Wire a connection to its channels, the shared variable collection,
    /// and the application event channel.
    pub fn new(
        transport: T,
        extension: X,
        vars: Arc<SimVarCollection>,
        events: Sender<EngineEvent>,
        config: ConnectionConfig,
    ) -> Self {
        let ledger = Arc::new(Mutex::new(CallLedger::new()));
        let dispatcher = Dispatcher::new(Arc::clone(&vars), Arc::clone(&ledger), events.clone());
        Self {
            inner: Arc::new(Shared {
                transport,
                extension,
                vars,
                ledger,
                session: Mutex::new(Session::new()),
                dispatcher,
                events,
                config,
                quit: AtomicBool::new(false),
                worker: Mutex::new(None),
                teardown: Mutex::new(()),
                outbound: Mutex::new(()),
            }),
        }
    }

    /// Whether a session is fully open.
    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().is_connected()
    }

    /// Whether outbound calls may be issued right now.
    pub(crate) fn can_transmit(&self) -> bool {
        self.inner.session.lock().can_transmit()
    }

    /// Whether the secondary extension channel is up.
    pub(crate) fn secondary_live(&self) -> bool {
        self.inner.session.lock().secondary_live
    }

    /// Host identity negotiated at session open, if connected.
    pub fn sim_info(&self) -> Option<SimulatorInfo> {
        self.inner.session.lock().sim_info.clone()
    }

    pub(crate) fn extension(&self) -> &X {
        &self.inner.extension
    }

    /// Open the session and wait for the host's confirmation.
    ///
    /// A no-op returning `Ok` while a connect attempt is in progress or a
    /// session is already open; no duplicate transport is created. On
    /// timeout the partial state is torn down and a distinct timeout error
    /// returned.
    pub fn connect(&self) -> Result<(), ConnectError> {
        {
            // Claiming the session under the teardown lock makes a connect
            // racing an in-flight disconnect wait for the teardown to finish
            // instead of opening a transport it then closes underneath us.
            let _teardown = self.inner.teardown.lock();
            let mut session = self.inner.session.lock();
            if session.is_active() {
                debug!(phase = ?session.phase, "connect ignored; session already active");
                return Ok(());
            }
            session.phase = SessionPhase::Connecting;
        }
        self.inner.quit.store(false, Ordering::SeqCst);

        if let Err(e) = self.inner.transport.open() {
            self.inner.session.lock().reset();
            return Err(ConnectError::Transport(e.to_string()));
        }

        let worker = self.clone();
        *self.inner.worker.lock() = Some(thread::spawn(move || worker.worker_loop()));

        // Connect is infrequent, user-initiated and short; a bounded
        // spin-wait keeps the caller code path synchronous.
        let deadline = Instant::now() + self.inner.config.connect_timeout;
        while Instant::now() < deadline {
            if self.inner.session.lock().is_connected() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(1));
        }

        warn!(
            timeout = ?self.inner.config.connect_timeout,
            "no session confirmation from host"
        );
        self.disconnect();
        Err(ConnectError::Timeout)
    }

    /// Tear the session down.
    ///
    /// Ordered, exactly-once sequence: stop worker → tear down secondary
    /// channel → deregister primary registrations → release transport →
    /// reset session. Emits one `Disconnected` notification per
    /// Connected→Disconnected transition, no matter how many callers race
    /// into this method.
    pub fn disconnect(&self) {
        let _teardown = self.inner.teardown.lock();
        let was_connected = {
            let mut session = self.inner.session.lock();
            if session.phase == SessionPhase::Disconnected {
                return;
            }
            let was = session.phase == SessionPhase::Connected;
            session.phase = SessionPhase::Disconnecting;
            was
        };

        self.stop_worker();

        {
            let mut session = self.inner.session.lock();
            if session.secondary_live {
                self.inner.extension.disconnect();
                session.secondary_live = false;
            }
        }

        if !self.inner.session.lock().force_quit && self.inner.transport.is_open() {
            self.deregister_all(true);
        }

        if let Err(e) = self.inner.transport.close() {
            warn!("transport close failed: {e}");
        }

        self.inner.session.lock().reset();
        self.inner.ledger.lock().clear();

        if was_connected {
            info!("disconnected");
            let _ = self.inner.events.send(EngineEvent::Disconnected);
        }
    }

    /// Invoke a primary-channel call through the choke point, recording it
    /// in the correlation ledger together with the sequence id the host
    /// assigned to it.
    pub(crate) fn primary_call(
        &self,
        call: &'static str,
        def: Option<Definition>,
        args: Vec<String>,
        f: impl FnOnce(&T) -> Result<(), TransportError>,
    ) -> Result<(), TransportError> {
        let _outbound = self.inner.outbound.lock();
        let result = f(&self.inner.transport);
        if result.is_ok() {
            let send_id = self.inner.transport.last_sent_sequence_id();
            self.inner.ledger.lock().record(send_id, call, def, args);
        }
        result
    }

    fn stop_worker(&self) {
        self.inner.quit.store(true, Ordering::SeqCst);
        let Some(handle) = self.inner.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Faults dispatch disconnect from a fresh thread, so this is
            // unreachable in practice; joining would deadlock.
            return;
        }
        let deadline = Instant::now() + self.inner.config.stop_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!(
                timeout = ?self.inner.config.stop_timeout,
                "worker did not stop in time; abandoning it"
            );
        }
    }

    fn worker_loop(&self) {
        debug!("worker started");
        while !self.inner.quit.load(Ordering::SeqCst) {
            match self.inner.transport.poll_message(POLL_SLICE) {
                Ok(Some(message)) => self.handle_message(message),
                Ok(None) => {}
                Err(e) => {
                    if self.inner.quit.load(Ordering::SeqCst) {
                        break;
                    }
                    error!("transport fault: {e}");
                    self.fault_disconnect();
                    break;
                }
            }
            for message in self.inner.extension.drain() {
                let follow_up = self
                    .inner
                    .dispatcher
                    .handle_extension(message, Instant::now());
                if let Some(follow_up) = follow_up {
                    self.run_follow_up(follow_up);
                }
            }
        }
        debug!("worker exited");
    }

    fn handle_message(&self, message: HostMessage) {
        match message {
            HostMessage::SessionOpen(info) => self.on_session_open(info),
            HostMessage::Quit => {
                info!("host is shutting down");
                self.fault_disconnect();
            }
            other => {
                if let Some(follow_up) = self.inner.dispatcher.handle_host(other, Instant::now()) {
                    self.run_follow_up(follow_up);
                }
            }
        }
    }

    /// Tear the session down from the worker's context: never synchronously
    /// (the worker must not join itself), always via a fresh thread.
    fn fault_disconnect(&self) {
        self.inner.session.lock().force_quit = true;
        let conn = self.clone();
        thread::spawn(move || conn.disconnect());
    }

    fn run_follow_up(&self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::RetryLocalVars => self.register_all(true),
            FollowUp::RefreshLocalVars => {
                if self.inner.session.lock().secondary_live {
                    if let Err(e) = self.inner.extension.request_local_vars_list() {
                        warn!("local variable enumeration request failed: {e}");
                    }
                }
            }
        }
    }

    fn on_session_open(&self, info: SimulatorInfo) {
        info!(host = %info, "session open");
        let version = info.app_version.clone();
        self.inner.session.lock().open(info.clone());

        // Best effort: a dead extension only disables the variable types
        // that need it.
        match self.inner.extension.connect(&version) {
            Ok(()) => {
                self.inner.session.lock().secondary_live = true;
                if let Err(e) = self.inner.extension.request_local_vars_list() {
                    warn!("local variable enumeration request failed: {e}");
                }
            }
            Err(e) => warn!("extension channel unavailable: {e}"),
        }

        self.register_all(false);
        self.subscribe_system_events();
        let _ = self.inner.events.send(EngineEvent::Connected(info));
    }

    fn subscribe_system_events(&self) {
        for &(id, name) in SYSTEM_EVENTS {
            let event = EventId::new(id);
            let result = self.primary_call(
                "subscribe_system_event",
                None,
                vec![event.to_string(), name.to_string()],
                |t| t.subscribe_system_event(event, name),
            );
            if let Err(e) = result {
                warn!(name, "system event subscription failed: {e}");
            }
        }
    }

    /// Register one variable on whichever channel the router chooses.
    ///
    /// Runs under the collection's write lock, which also serializes it
    /// against a concurrent deregister of the same variable. Failures are
    /// local: logged, reported per variable, never fatal to the session.
    pub fn register_var(&self, def: Definition) {
        let (can_transmit, secondary_live, host_version) = {
            let session = self.inner.session.lock();
            (
                session.can_transmit(),
                session.secondary_live,
                session.host_version().to_string(),
            )
        };
        if !can_transmit {
            return;
        }
        self.inner.vars.with_var(def, |var| {
            self.register_var_locked(var, secondary_live, &host_version);
        });
    }

    fn register_var_locked(&self, var: &mut SimVar, secondary_live: bool, host_version: &str) {
        if var.registration() == RegistrationStatus::Registered {
            return;
        }
        if let Some(min) = var.min_sim_version.clone() {
            if !host_version.starts_with(min.as_str()) {
                warn!(name = %var.name, %min, host_version, "host version too old");
                var.set_registration(RegistrationStatus::Error);
                self.emit_var_error(
                    var.def(),
                    VarErrorKind::VersionMismatch,
                    format!("requires host version {min}, negotiated {host_version}"),
                );
                return;
            }
        }
        let provider = match choose_provider(var.source, var.cadence, secondary_live) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(name = %var.name, "{e}");
                var.set_registration(RegistrationStatus::Error);
                self.emit_var_error(var.def(), VarErrorKind::UnsupportedType, e.to_string());
                return;
            }
        };
        let status = match provider {
            Provider::Primary => self.register_primary(var),
            Provider::Secondary => self.register_secondary(var),
        };
        var.set_registration(status);
    }

    fn register_primary(&self, var: &SimVar) -> RegistrationStatus {
        let def = var.def();
        let name = var.registered_name();
        let unit = match var.kind() {
            ValueKind::Text => None,
            _ => Some(var.unit().to_string()),
        };
        let data_type = var.kind().wire_type();
        let epsilon = var.delta_epsilon;

        let added = self.primary_call(
            "add_definition",
            Some(def),
            vec![
                def.to_string(),
                name.clone(),
                unit.clone().unwrap_or_default(),
            ],
            |t| t.add_definition(def, &name, unit.as_deref(), data_type, epsilon),
        );
        if let Err(e) = added {
            warn!(name = %var.name, "definition rejected: {e}");
            self.emit_var_error(def, VarErrorKind::Registration, e.to_string());
            return RegistrationStatus::Error;
        }

        // Never and every-message delivery need no scheduled subscription.
        if !matches!(var.cadence, Cadence::Never | Cadence::EveryMessage) {
            let cadence = var.cadence;
            let interval = var.interval;
            let subscribed = self.primary_call(
                "subscribe_data",
                Some(def),
                vec![def.to_string(), format!("{cadence:?}"), interval.to_string()],
                |t| t.subscribe_data(def, cadence, interval),
            );
            if let Err(e) = subscribed {
                warn!(name = %var.name, "subscription rejected: {e}");
                self.emit_var_error(def, VarErrorKind::Registration, e.to_string());
                return RegistrationStatus::Error;
            }
        }
        RegistrationStatus::Registered
    }

    fn register_secondary(&self, var: &SimVar) -> RegistrationStatus {
        let def = var.def();
        let (base_name, index) = split_index_suffix(&var.sim_name);

        if var.source == VarSource::Local {
            match self
                .inner
                .extension
                .lookup(LookupKind::LocalVariable, &base_name)
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(name = %var.name, sim_name = %base_name, "local variable not found");
                    self.emit_var_error(
                        def,
                        VarErrorKind::NotFound,
                        format!("local variable '{base_name}' does not exist (yet)"),
                    );
                    return RegistrationStatus::Error;
                }
                Err(e) => {
                    warn!(name = %var.name, "local variable lookup failed: {e}");
                    self.emit_var_error(def, VarErrorKind::Registration, e.to_string());
                    return RegistrationStatus::Error;
                }
            }
        }

        let request = SubscribeRequest {
            def,
            source: var.source,
            name: base_name,
            index,
            unit: var.unit().to_string(),
            kind: var.kind(),
            interval_ms: var.cadence.interval_ms(var.interval),
            delta_epsilon: var.delta_epsilon,
        };
        match self.inner.extension.subscribe(&request) {
            Ok(()) => RegistrationStatus::Registered,
            Err(e) => {
                warn!(name = %var.name, "extension subscription rejected: {e}");
                self.emit_var_error(def, VarErrorKind::Registration, e.to_string());
                RegistrationStatus::Error
            }
        }
    }

    /// Deregister one variable. Always leaves it Unregistered; repeated
    /// calls are no-ops.
    pub fn deregister_var(&self, def: Definition) {
        let (force_quit, secondary_live) = {
            let session = self.inner.session.lock();
            (session.force_quit, session.secondary_live)
        };
        self.inner.vars.with_var(def, |var| {
            if var.registration() == RegistrationStatus::Unregistered {
                return;
            }
            if !force_quit {
                match choose_provider(var.source, var.cadence, secondary_live) {
                    Ok(Provider::Primary) => self.deregister_primary(var),
                    Ok(Provider::Secondary) => {
                        if let Err(e) = self.inner.extension.unsubscribe(def) {
                            debug!(name = %var.name, "unsubscribe failed: {e}");
                        }
                    }
                    Err(_) => {}
                }
            }
            var.set_registration(RegistrationStatus::Unregistered);
        });
    }

    fn deregister_primary(&self, var: &SimVar) {
        let def = var.def();
        // Silence live updates before dropping the definition. The Never
        // cadence goes only to the host; the variable's own cadence field
        // is left untouched.
        if var.cadence != Cadence::Never {
            let silenced = self.primary_call(
                "subscribe_data",
                Some(def),
                vec![def.to_string(), "Never".to_string()],
                |t| t.subscribe_data(def, Cadence::Never, 0),
            );
            if let Err(e) = silenced {
                debug!(name = %var.name, "silencing subscription failed: {e}");
            }
        }
        let cleared = self.primary_call(
            "clear_definition",
            Some(def),
            vec![def.to_string()],
            |t| t.clear_definition(def),
        );
        if let Err(e) = cleared {
            debug!(name = %var.name, "clearing definition failed: {e}");
        }
    }

    /// Register every declared variable that is not already Registered,
    /// optionally restricted to local script variables (the retry pass
    /// after the known-local-variable set changes).
    pub fn register_all(&self, local_only: bool) {
        let defs = if local_only {
            self.inner.vars.local_defs()
        } else {
            self.inner.vars.defs()
        };
        for def in defs {
            self.register_var(def);
        }
    }

    /// Deregister every declared variable. With `primary_only`, variables
    /// served by the secondary channel are only marked Unregistered: the
    /// secondary teardown already dropped their subscriptions wholesale.
    pub fn deregister_all(&self, primary_only: bool) {
        let secondary_live = self.inner.session.lock().secondary_live;
        for def in self.inner.vars.defs() {
            if primary_only {
                let on_secondary = self
                    .inner
                    .vars
                    .with_var(def, |var| {
                        !matches!(
                            choose_provider(var.source, var.cadence, secondary_live),
                            Ok(Provider::Primary)
                        )
                    })
                    .unwrap_or(false);
                if on_secondary {
                    self.inner
                        .vars
                        .with_var(def, |v| v.set_registration(RegistrationStatus::Unregistered));
                    continue;
                }
            }
            self.deregister_var(def);
        }
    }

    fn emit_var_error(&self, def: Definition, kind: VarErrorKind, detail: String) {
        let _ = self
            .inner
            .events
            .send(EngineEvent::VariableError { def, kind, detail });
    }
}

/// Split an optional trailing `:NN` index suffix off a variable name.
pub(crate) fn split_index_suffix(name: &str) -> (String, Option<u8>) {
    if let Some((base, suffix)) = name.rsplit_once(':') {
        if let Ok(index) = suffix.parse::<u8>() {
            return (base.to_string(), Some(index));
        }
    }
    (name.to_string(), None)
}

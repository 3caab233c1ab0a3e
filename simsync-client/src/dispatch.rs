//! Inbound message demultiplexer.
//!
//! Runs on the worker thread only. Routes host data to the right variable,
//! resolves asynchronous failure notices through the correlation ledger, and
//! emits notifications to the application. Handlers never block.

use crate::transport::{ExtensionMessage, HostMessage};
use crate::vars::SimVarCollection;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use simsync_core::{CallLedger, RegistrationStatus};
use simsync_types::{Definition, EngineEvent, SimValue, VarErrorKind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Work the connection should do after a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// The known-local-variable set changed; retry registration of
    /// local-tagged variables that previously failed.
    RetryLocalVars,
    /// A new flight or aircraft loaded; ask the extension for a fresh
    /// local-variable enumeration.
    RefreshLocalVars,
}

/// Routes inbound messages from both channels.
pub struct Dispatcher {
    vars: Arc<SimVarCollection>,
    ledger: Arc<Mutex<CallLedger>>,
    events: Sender<EngineEvent>,
}

impl Dispatcher {
    /// Wire a dispatcher to the shared collection, ledger and event channel.
    pub fn new(
        vars: Arc<SimVarCollection>,
        ledger: Arc<Mutex<CallLedger>>,
        events: Sender<EngineEvent>,
    ) -> Self {
        Self {
            vars,
            ledger,
            events,
        }
    }

    /// Handle one primary-channel message.
    ///
    /// Session-open and quit are lifecycle messages the connection consumes
    /// before dispatch; they are ignored here.
    pub fn handle_host(&self, message: HostMessage, now: Instant) -> Option<FollowUp> {
        match message {
            HostMessage::Data { def, value } => {
                self.apply_data(def, value, now);
                None
            }
            HostMessage::Exception {
                send_id,
                error,
                index,
            } => {
                let record = self.ledger.lock().resolve(send_id, error, index);
                warn!(%send_id, error, "host exception: {}", record);
                let scoped = record.def.filter(|&def| {
                    self.vars
                        .with_var(def, |v| v.set_registration(RegistrationStatus::Error))
                        .is_some()
                });
                match scoped {
                    Some(def) => self.emit(EngineEvent::VariableError {
                        def,
                        kind: VarErrorKind::HostRejected,
                        detail: record.to_string(),
                    }),
                    None => self.emit(EngineEvent::SessionError {
                        detail: record.to_string(),
                    }),
                }
                None
            }
            HostMessage::SystemEvent { event, data } => {
                debug!(%event, data, "system event");
                None
            }
            HostMessage::FilenameEvent { event, filename } => {
                info!(%event, filename, "load event");
                Some(FollowUp::RefreshLocalVars)
            }
            HostMessage::SessionOpen(_) | HostMessage::Quit => None,
        }
    }

    /// Handle one secondary-channel message.
    pub fn handle_extension(&self, message: ExtensionMessage, now: Instant) -> Option<FollowUp> {
        match message {
            ExtensionMessage::Data { def, value } => {
                self.apply_data(def, value, now);
                None
            }
            ExtensionMessage::LocalVarsList(names) => {
                debug!(count = names.len(), "local variable list updated");
                self.emit(EngineEvent::LocalVarsListUpdated(names));
                Some(FollowUp::RetryLocalVars)
            }
            ExtensionMessage::Log { message } => {
                debug!(target: "simsync::extension", "{}", message);
                None
            }
        }
    }

    /// Store a delivered value, notifying the application when it actually
    /// changed by more than the variable's threshold.
    fn apply_data(&self, def: Definition, value: SimValue, now: Instant) {
        let changed = self.vars.with_var(def, |var| {
            // Every accepted delivery refreshes the update stamp, the
            // expiry deadline and the pending flag; the change threshold
            // only gates the notification.
            let changed = !var.equals(&value);
            var.set_value(value, now) && changed
        });
        match changed {
            Some(true) => self.emit(EngineEvent::DataUpdated { def }),
            Some(false) => {}
            None => debug!(%def, "data for unknown definition"),
        }
    }

    fn emit(&self, event: EngineEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use simsync_core::SimVar;
    use simsync_types::{Cadence, SequenceId, VarDeclaration};
    use std::time::Duration;

    fn dispatcher() -> (Dispatcher, Arc<SimVarCollection>, Arc<Mutex<CallLedger>>, Receiver<EngineEvent>) {
        let vars = Arc::new(SimVarCollection::new());
        let ledger = Arc::new(Mutex::new(CallLedger::new()));
        let (tx, rx) = unbounded();
        let dispatcher = Dispatcher::new(Arc::clone(&vars), Arc::clone(&ledger), tx);
        (dispatcher, vars, ledger, rx)
    }

    fn declare(vars: &SimVarCollection, def: u32, name: &str, epsilon: f32) {
        let decl = VarDeclaration::new(name, "SIM NAME", "knots").with_epsilon(epsilon);
        vars.insert(SimVar::from_declaration(Definition::new(def), &decl))
            .unwrap();
    }

    #[test]
    fn data_updates_variable_and_notifies() {
        let (dispatcher, vars, _, rx) = dispatcher();
        declare(&vars, 1, "Speed", 0.01);

        dispatcher.handle_host(
            HostMessage::Data {
                def: Definition::new(1),
                value: SimValue::Real(120.0),
            },
            Instant::now(),
        );

        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::DataUpdated { def }) if def == Definition::new(1)
        ));
        let value = vars.with_var(Definition::new(1), |v| v.value().cloned()).unwrap();
        assert_eq!(value, Some(SimValue::Real(120.0)));
    }

    #[test]
    fn sub_threshold_change_is_silent() {
        let (dispatcher, vars, _, rx) = dispatcher();
        declare(&vars, 1, "Speed", 0.01);
        let now = Instant::now();

        dispatcher.handle_host(
            HostMessage::Data {
                def: Definition::new(1),
                value: SimValue::Real(120.0),
            },
            now,
        );
        rx.try_recv().unwrap();

        dispatcher.handle_host(
            HostMessage::Data {
                def: Definition::new(1),
                value: SimValue::Real(120.005),
            },
            now,
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unchanged_delivery_still_refreshes_bookkeeping() {
        let (dispatcher, vars, _, rx) = dispatcher();
        let decl = VarDeclaration::new("Speed", "AIRSPEED INDICATED", "knots")
            .with_cadence(Cadence::Millisecond, 100)
            .with_epsilon(0.01);
        vars.insert(SimVar::from_declaration(Definition::new(1), &decl))
            .unwrap();

        let start = Instant::now();
        dispatcher.handle_host(
            HostMessage::Data {
                def: Definition::new(1),
                value: SimValue::Real(120.0),
            },
            start,
        );
        rx.try_recv().unwrap();

        vars.with_var(Definition::new(1), |v| v.mark_pending(start))
            .unwrap();
        let later = start + Duration::from_millis(50);
        dispatcher.handle_host(
            HostMessage::Data {
                def: Definition::new(1),
                value: SimValue::Real(120.0),
            },
            later,
        );

        // No notification for an unchanged value, but the delivery still
        // clears the pending flag and pushes the expiry deadline out.
        assert!(rx.try_recv().is_err());
        let pending = vars
            .with_var(Definition::new(1), |v| v.is_pending(later))
            .unwrap();
        assert!(!pending);
        let stale = vars
            .with_var(Definition::new(1), |v| {
                v.is_stale(start + Duration::from_millis(120))
            })
            .unwrap();
        assert!(!stale);
    }

    #[test]
    fn data_for_unknown_definition_is_ignored() {
        let (dispatcher, _, _, rx) = dispatcher();
        dispatcher.handle_host(
            HostMessage::Data {
                def: Definition::new(9),
                value: SimValue::Real(1.0),
            },
            Instant::now(),
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn exception_with_known_definition_becomes_variable_error() {
        let (dispatcher, vars, ledger, rx) = dispatcher();
        declare(&vars, 4, "Flaps", 0.01);
        ledger.lock().record(
            SequenceId::new(10),
            "add_definition",
            Some(Definition::new(4)),
            vec!["4".into(), "FLAPS POSITION".into()],
        );

        dispatcher.handle_host(
            HostMessage::Exception {
                send_id: SequenceId::new(10),
                error: 7,
                index: 2,
            },
            Instant::now(),
        );

        match rx.try_recv().unwrap() {
            EngineEvent::VariableError { def, kind, detail } => {
                assert_eq!(def, Definition::new(4));
                assert_eq!(kind, VarErrorKind::HostRejected);
                assert!(detail.contains("add_definition"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        let status = vars
            .with_var(Definition::new(4), |v| v.registration())
            .unwrap();
        assert_eq!(status, RegistrationStatus::Error);
    }

    #[test]
    fn unresolved_exception_becomes_session_error() {
        let (dispatcher, _, _, rx) = dispatcher();
        dispatcher.handle_host(
            HostMessage::Exception {
                send_id: SequenceId::new(77),
                error: 3,
                index: 0,
            },
            Instant::now(),
        );

        match rx.try_recv().unwrap() {
            EngineEvent::SessionError { detail } => assert!(detail.contains("not found")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn local_vars_list_triggers_retry_pass() {
        let (dispatcher, _, _, rx) = dispatcher();
        let follow_up = dispatcher.handle_extension(
            ExtensionMessage::LocalVarsList(vec!["A32NX_PARK_BRAKE".into()]),
            Instant::now(),
        );

        assert_eq!(follow_up, Some(FollowUp::RetryLocalVars));
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::LocalVarsListUpdated(names)) if names.len() == 1
        ));
    }

    #[test]
    fn load_event_requests_fresh_list() {
        let (dispatcher, _, _, _rx) = dispatcher();
        let follow_up = dispatcher.handle_host(
            HostMessage::FilenameEvent {
                event: simsync_types::EventId::new(4),
                filename: "A320.flt".into(),
            },
            Instant::now(),
        );
        assert_eq!(follow_up, Some(FollowUp::RefreshLocalVars));
    }
}

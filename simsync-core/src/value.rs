//! The per-variable live state container.
//!
//! A [`SimVar`] carries the current value, its type classification (derived
//! from the unit name), the update cadence, the change threshold, and the
//! pending/staleness bookkeeping. Time-dependent operations take an explicit
//! `now` so tests never sleep.

use simsync_types::{Cadence, Definition, SimValue, ValueKind, VarDeclaration, VarSource};
use std::time::{Duration, Instant};

/// How long a value request stays "pending" before it stops suppressing
/// re-requests, even if no response ever arrives.
pub const PENDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel registration state of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationStatus {
    /// Not registered with any channel.
    #[default]
    Unregistered,
    /// Live on a channel.
    Registered,
    /// Last registration attempt failed; may be retried.
    Error,
}

/// Live state container for one declared variable.
#[derive(Debug, Clone)]
pub struct SimVar {
    def: Definition,
    /// Unique descriptive name within the engine.
    pub name: String,
    /// Variable name as the simulation host knows it.
    pub sim_name: String,
    /// Source tag; drives the provider routing decision.
    pub source: VarSource,
    /// Update push policy.
    pub cadence: Cadence,
    /// Interval count for scheduled cadences.
    pub interval: u32,
    /// Minimum change that counts as a change, for numeric kinds.
    pub delta_epsilon: f32,
    /// Display string returned before any value arrives.
    pub default_value: String,
    /// Decimal places for formatted real values.
    pub precision: Option<usize>,
    /// Minimum host version prefix this variable requires.
    pub min_sim_version: Option<String>,
    /// Whether the application may write this variable to the host.
    pub settable: bool,

    unit: String,
    kind: ValueKind,
    value: SimValue,
    registration: RegistrationStatus,
    last_update: Option<Instant>,
    expires_at: Option<Instant>,
    pending_until: Option<Instant>,
}

impl SimVar {
    /// Build a variable from its declaration, binding it to a Definition.
    pub fn from_declaration(def: Definition, decl: &VarDeclaration) -> Self {
        let kind = ValueKind::from_unit(&decl.unit);
        Self {
            def,
            name: decl.name.clone(),
            sim_name: decl.sim_name.clone(),
            source: decl.source,
            cadence: decl.cadence,
            interval: decl.interval,
            delta_epsilon: decl.delta_epsilon,
            default_value: decl.default_value.clone(),
            precision: decl.precision,
            min_sim_version: decl.min_sim_version.clone(),
            settable: decl.settable,
            unit: decl.unit.clone(),
            kind,
            value: kind.zero_value(),
            registration: RegistrationStatus::Unregistered,
            last_update: None,
            expires_at: None,
            pending_until: None,
        }
    }

    /// The stable per-session identity of this variable.
    pub fn def(&self) -> Definition {
        self.def
    }

    /// Current unit name.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Value kind, fixed per unit assignment.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// The current value, if one has ever been set.
    pub fn value(&self) -> Option<&SimValue> {
        if self.last_update.is_some() {
            Some(&self.value)
        } else {
            None
        }
    }

    /// Current registration state.
    pub fn registration(&self) -> RegistrationStatus {
        self.registration
    }

    /// Update the registration state.
    pub fn set_registration(&mut self, status: RegistrationStatus) {
        self.registration = status;
    }

    /// The name used when registering on the primary channel: prefixed
    /// with the source tag for anything that is not a plain property.
    pub fn registered_name(&self) -> String {
        match self.source {
            VarSource::SimProperty => self.sim_name.clone(),
            other => format!("{}:{}", other.tag(), self.sim_name),
        }
    }

    /// Assign a new unit. No-op if unchanged; otherwise the value kind is
    /// reclassified from the unit name and the current value resets to the
    /// new kind's zero state, clearing staleness and pending state.
    pub fn set_unit(&mut self, unit: &str) {
        if self.unit == unit {
            return;
        }
        self.unit = unit.to_string();
        self.kind = ValueKind::from_unit(unit);
        self.value = self.kind.zero_value();
        self.last_update = None;
        self.expires_at = None;
        self.pending_until = None;
    }

    /// Accept a new value from the host.
    ///
    /// Input whose kind does not match this variable's kind is rejected and
    /// nothing changes. Accepted real input first goes through unit
    /// conversion. Every accepted set stamps the update time and clears the
    /// pending flag; an expiry deadline is computed only under
    /// continuous-polling cadence.
    pub fn set_value(&mut self, raw: SimValue, now: Instant) -> bool {
        let accepted = match (self.kind, raw) {
            (ValueKind::Text, SimValue::Text(v)) => {
                self.value = SimValue::Text(v);
                true
            }
            (ValueKind::Bool, SimValue::Bool(v)) => {
                self.value = SimValue::Bool(v);
                true
            }
            (ValueKind::Integer, SimValue::Integer(v)) => {
                self.value = SimValue::Integer(v);
                true
            }
            (ValueKind::Real, SimValue::Real(v)) => {
                self.value = SimValue::Real(self.convert(v));
                true
            }
            _ => false,
        };
        if accepted {
            self.last_update = Some(now);
            self.pending_until = None;
            self.expires_at = if self.cadence.needs_scheduled_poll() {
                Some(now + Duration::from_millis(u64::from(self.interval)))
            } else {
                None
            };
        }
        accepted
    }

    /// Compare against a candidate value, honoring the change threshold for
    /// numeric kinds. An unset value never equals anything; a candidate of
    /// the wrong kind never matches.
    pub fn equals(&self, candidate: &SimValue) -> bool {
        if self.last_update.is_none() {
            return false;
        }
        match (&self.value, candidate) {
            (SimValue::Text(a), SimValue::Text(b)) => a == b,
            (SimValue::Real(a), SimValue::Real(b)) => {
                (a - self.convert(*b)).abs() <= f64::from(self.delta_epsilon)
            }
            (SimValue::Integer(a), SimValue::Integer(b)) => {
                (a - b).abs() <= self.delta_epsilon as i64
            }
            (SimValue::Bool(a), SimValue::Bool(b)) => {
                i64::from(*a != *b) <= self.delta_epsilon as i64
            }
            _ => false,
        }
    }

    /// Render the current value for display, or the declared default string
    /// if no value has ever been set.
    pub fn formatted(&self) -> String {
        if self.last_update.is_none() {
            return self.default_value.clone();
        }
        match &self.value {
            SimValue::Real(v) => match self.precision {
                Some(p) => format!("{:.*}", p, v),
                None => v.to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Record that a value request is outstanding, suppressing redundant
    /// re-requests for the next [`PENDING_TIMEOUT`].
    pub fn mark_pending(&mut self, now: Instant) {
        self.pending_until = Some(now + PENDING_TIMEOUT);
    }

    /// Drop the pending flag without accepting a value, for a request that
    /// never reached the host.
    pub fn clear_pending(&mut self) {
        self.pending_until = None;
    }

    /// Whether a request is still pending. The flag expires by deadline
    /// comparison alone, so a request that never got a response stops
    /// suppressing re-requests after the timeout.
    pub fn is_pending(&self, now: Instant) -> bool {
        self.pending_until.is_some_and(|t| now <= t)
    }

    /// Whether the value has expired under its polling schedule. Always
    /// false unless an expiry deadline is enabled, and suppressed while a
    /// request is pending.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expiry) => !self.is_pending(now) && now > expiry,
            None => false,
        }
    }

    // Unit conversions applied to accepted real input.
    fn convert(&self, value: f64) -> f64 {
        match self.unit.to_ascii_lowercase().as_str() {
            "radians" => value.to_degrees(),
            // "percent over 100" ranges 0..1; report actual percentage
            "percent over 100" => value * 100.0,
            _ => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real_var(unit: &str) -> SimVar {
        let decl = VarDeclaration::new("Test", "TEST VAR", unit).with_default("N/A");
        SimVar::from_declaration(Definition::new(1), &decl)
    }

    #[test]
    fn formatted_returns_default_before_first_value() {
        let mut var = real_var("knots");
        var.set_unit("feet");
        assert_eq!(var.formatted(), "N/A");
    }

    #[test]
    fn formatted_after_value_set() {
        let mut var = real_var("knots");
        var.precision = Some(1);
        assert!(var.set_value(SimValue::Real(123.456), Instant::now()));
        assert_eq!(var.formatted(), "123.5");
    }

    #[test]
    fn set_unit_resets_value_and_kind() {
        let mut var = real_var("knots");
        var.set_value(SimValue::Real(5.0), Instant::now());
        assert!(var.value().is_some());

        var.set_unit("string");
        assert_eq!(var.kind(), ValueKind::Text);
        assert!(var.value().is_none());
        assert_eq!(var.formatted(), "N/A");
    }

    #[test]
    fn set_unit_same_unit_is_noop() {
        let mut var = real_var("knots");
        var.set_value(SimValue::Real(5.0), Instant::now());
        var.set_unit("knots");
        assert!(var.value().is_some());
    }

    #[test]
    fn mismatched_input_rejected_unchanged() {
        let mut var = real_var("knots");
        var.set_value(SimValue::Real(10.0), Instant::now());
        assert!(!var.set_value(SimValue::Text("ten".into()), Instant::now()));
        assert_eq!(var.value(), Some(&SimValue::Real(10.0)));
    }

    #[test]
    fn equals_within_threshold() {
        let mut var = real_var("knots");
        var.delta_epsilon = 0.01;
        var.set_value(SimValue::Real(10.00), Instant::now());

        assert!(var.equals(&SimValue::Real(10.009)));
        assert!(!var.equals(&SimValue::Real(10.02)));
    }

    #[test]
    fn unset_value_never_equals() {
        let var = real_var("knots");
        assert!(!var.equals(&SimValue::Real(0.0)));
    }

    #[test]
    fn equals_rejects_kind_mismatch() {
        let mut var = real_var("knots");
        var.set_value(SimValue::Real(1.0), Instant::now());
        assert!(!var.equals(&SimValue::Integer(1)));
    }

    #[test]
    fn integer_threshold_truncates_to_whole_units() {
        let decl = VarDeclaration::new("Count", "COUNT", "enum").with_epsilon(1.9);
        let mut var = SimVar::from_declaration(Definition::new(2), &decl);
        var.set_value(SimValue::Integer(10), Instant::now());

        assert!(var.equals(&SimValue::Integer(11)));
        assert!(!var.equals(&SimValue::Integer(12)));
    }

    #[test]
    fn bool_equality_is_exact_with_default_epsilon() {
        let decl = VarDeclaration::new("Gear", "GEAR HANDLE POSITION", "bool");
        let mut var = SimVar::from_declaration(Definition::new(3), &decl);
        var.set_value(SimValue::Bool(true), Instant::now());

        assert!(var.equals(&SimValue::Bool(true)));
        assert!(!var.equals(&SimValue::Bool(false)));
    }

    #[test]
    fn radians_converted_to_degrees_on_set() {
        let mut var = real_var("radians");
        var.set_value(SimValue::Real(std::f64::consts::PI), Instant::now());
        match var.value() {
            Some(SimValue::Real(v)) => assert!((v - 180.0).abs() < 1e-9),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn percent_over_100_scaled_on_set() {
        let mut var = real_var("percent over 100");
        var.set_value(SimValue::Real(0.25), Instant::now());
        assert_eq!(var.value(), Some(&SimValue::Real(25.0)));
    }

    #[test]
    fn expiry_only_under_millisecond_cadence() {
        let now = Instant::now();

        let mut polled = real_var("knots");
        polled.cadence = Cadence::Millisecond;
        polled.interval = 100;
        polled.set_value(SimValue::Real(1.0), now);
        assert!(!polled.is_stale(now));
        assert!(polled.is_stale(now + Duration::from_millis(101)));

        let mut pushed = real_var("knots");
        pushed.cadence = Cadence::EveryMessage;
        pushed.set_value(SimValue::Real(1.0), now);
        assert!(!pushed.is_stale(now + Duration::from_secs(3600)));
    }

    #[test]
    fn pending_suppresses_staleness_until_timeout() {
        let now = Instant::now();
        let mut var = real_var("knots");
        var.cadence = Cadence::Millisecond;
        var.interval = 100;
        var.set_value(SimValue::Real(1.0), now);
        var.mark_pending(now);

        // Stale by schedule, but a request is outstanding.
        let later = now + Duration::from_secs(1);
        assert!(var.is_pending(later));
        assert!(!var.is_stale(later));

        // Past the 30s pending timeout the flag stops blocking.
        let past_timeout = now + PENDING_TIMEOUT + Duration::from_secs(1);
        assert!(!var.is_pending(past_timeout));
        assert!(var.is_stale(past_timeout));
    }

    #[test]
    fn clear_pending_drops_the_flag() {
        let now = Instant::now();
        let mut var = real_var("knots");
        var.mark_pending(now);
        var.clear_pending();
        assert!(!var.is_pending(now));
    }

    #[test]
    fn set_value_clears_pending() {
        let now = Instant::now();
        let mut var = real_var("knots");
        var.mark_pending(now);
        assert!(var.is_pending(now));

        var.set_value(SimValue::Real(2.0), now);
        assert!(!var.is_pending(now));
    }

    #[test]
    fn registered_name_prefixes_non_property_sources() {
        let decl = VarDeclaration::new("LocalThing", "MY_LOCAL", "number")
            .with_source(VarSource::Local);
        let var = SimVar::from_declaration(Definition::new(4), &decl);
        assert_eq!(var.registered_name(), "L:MY_LOCAL");

        let prop = real_var("knots");
        assert_eq!(prop.registered_name(), "TEST VAR");
    }
}

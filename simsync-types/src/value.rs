//! The value vocabulary: typed values, unit classification, cadence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage classification of a variable's value, fixed per unit assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Free-form text value.
    Text,
    /// Boolean value (on/off units).
    Bool,
    /// Whole-number value (enums, masks, counts, positions).
    Integer,
    /// Floating-point value. The catch-all for physical units.
    Real,
}

impl ValueKind {
    /// Classify a unit name into a value kind.
    ///
    /// Anything not recognized as a text, boolean, or integral unit is a
    /// real-valued physical unit.
    pub fn from_unit(unit: &str) -> Self {
        let u = unit.trim().to_ascii_lowercase();
        if TEXT_UNITS.contains(&u.as_str()) {
            ValueKind::Text
        } else if BOOL_UNITS.contains(&u.as_str()) {
            ValueKind::Bool
        } else if INTEGRAL_UNITS.contains(&u.as_str()) {
            ValueKind::Integer
        } else {
            ValueKind::Real
        }
    }

    /// The wire data type used to register this kind on the primary channel.
    pub fn wire_type(&self) -> WireDataType {
        match self {
            ValueKind::Text => WireDataType::String256,
            ValueKind::Bool => WireDataType::Int32,
            ValueKind::Integer => WireDataType::Int64,
            ValueKind::Real => WireDataType::Float64,
        }
    }

    /// The zero/empty value of this kind.
    pub fn zero_value(&self) -> SimValue {
        match self {
            ValueKind::Text => SimValue::Text(String::new()),
            ValueKind::Bool => SimValue::Bool(false),
            ValueKind::Integer => SimValue::Integer(0),
            ValueKind::Real => SimValue::Real(0.0),
        }
    }
}

const TEXT_UNITS: &[&str] = &["string"];
const BOOL_UNITS: &[&str] = &["bool", "boolean"];
const INTEGRAL_UNITS: &[&str] = &[
    "enum", "mask", "flags", "integer", "position", "bco16", "frequency bcd16", "frequency bcd32",
];

/// Data type used when registering a definition with the primary transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireDataType {
    /// Fixed 256-byte string slot.
    String256,
    /// 32-bit integer (booleans travel as 0/1).
    Int32,
    /// 64-bit integer.
    Int64,
    /// 64-bit float.
    Float64,
}

/// A self-describing variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimValue {
    /// Text value.
    Text(String),
    /// Boolean value.
    Bool(bool),
    /// Whole-number value.
    Integer(i64),
    /// Floating-point value.
    Real(f64),
}

impl SimValue {
    /// The kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            SimValue::Text(_) => ValueKind::Text,
            SimValue::Bool(_) => ValueKind::Bool,
            SimValue::Integer(_) => ValueKind::Integer,
            SimValue::Real(_) => ValueKind::Real,
        }
    }
}

impl fmt::Display for SimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimValue::Text(v) => write!(f, "{}", v),
            SimValue::Bool(v) => write!(f, "{}", *v as u8),
            SimValue::Integer(v) => write!(f, "{}", v),
            SimValue::Real(v) => write!(f, "{}", v),
        }
    }
}

/// Source tag of a variable, taken from its declaration. Drives the
/// provider routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarSource {
    /// A named property of a simulation object ('A').
    SimProperty,
    /// A local script variable on the host ('L').
    Local,
    /// A computed expression evaluated host-side ('Q').
    Calculated,
    /// Any other source tag; only the secondary channel can address these.
    Other(char),
}

impl VarSource {
    /// Parse a source tag character.
    pub fn from_tag(tag: char) -> Self {
        match tag.to_ascii_uppercase() {
            'A' => VarSource::SimProperty,
            'L' => VarSource::Local,
            'Q' => VarSource::Calculated,
            other => VarSource::Other(other),
        }
    }

    /// The tag character for this source.
    pub fn tag(&self) -> char {
        match self {
            VarSource::SimProperty => 'A',
            VarSource::Local => 'L',
            VarSource::Calculated => 'Q',
            VarSource::Other(c) => *c,
        }
    }
}

impl Default for VarSource {
    fn default() -> Self {
        VarSource::SimProperty
    }
}

/// Update push policy for a registered variable.
///
/// [`Cadence::Second`] and [`Cadence::Millisecond`] carry a separate
/// interval count on the variable itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Cadence {
    /// No automatic updates; data arrives only on explicit request.
    Never,
    /// A single update after registration.
    Once,
    /// An update with every message the host emits (when changed).
    #[default]
    EveryMessage,
    /// Scheduled updates every `interval` seconds.
    Second,
    /// Scheduled updates every `interval` milliseconds. Variables with this
    /// cadence need continuous sub-frame polling, which the primary channel
    /// cannot cheaply provide.
    Millisecond,
}

impl Cadence {
    /// Whether this cadence requires a scheduled poll rather than
    /// change-driven pushes.
    pub fn needs_scheduled_poll(&self) -> bool {
        matches!(self, Cadence::Millisecond)
    }

    /// Normalize the interval to milliseconds for channels that only speak
    /// millisecond periods.
    pub fn interval_ms(&self, interval: u32) -> u32 {
        match self {
            Cadence::Second => interval.saturating_mul(1000),
            _ => interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_classification() {
        assert_eq!(ValueKind::from_unit("string"), ValueKind::Text);
        assert_eq!(ValueKind::from_unit("Bool"), ValueKind::Bool);
        assert_eq!(ValueKind::from_unit("boolean"), ValueKind::Bool);
        assert_eq!(ValueKind::from_unit("Enum"), ValueKind::Integer);
        assert_eq!(ValueKind::from_unit("mask"), ValueKind::Integer);
        assert_eq!(ValueKind::from_unit("degrees"), ValueKind::Real);
        assert_eq!(ValueKind::from_unit("knots"), ValueKind::Real);
    }

    #[test]
    fn wire_type_per_kind() {
        assert_eq!(ValueKind::Text.wire_type(), WireDataType::String256);
        assert_eq!(ValueKind::Bool.wire_type(), WireDataType::Int32);
        assert_eq!(ValueKind::Integer.wire_type(), WireDataType::Int64);
        assert_eq!(ValueKind::Real.wire_type(), WireDataType::Float64);
    }

    #[test]
    fn zero_values_match_kind() {
        assert_eq!(ValueKind::Real.zero_value(), SimValue::Real(0.0));
        assert_eq!(ValueKind::Text.zero_value(), SimValue::Text(String::new()));
    }

    #[test]
    fn source_tag_roundtrip() {
        assert_eq!(VarSource::from_tag('a'), VarSource::SimProperty);
        assert_eq!(VarSource::from_tag('L'), VarSource::Local);
        assert_eq!(VarSource::from_tag('Q'), VarSource::Calculated);
        assert_eq!(VarSource::from_tag('E'), VarSource::Other('E'));
        assert_eq!(VarSource::Local.tag(), 'L');
    }

    #[test]
    fn cadence_interval_conversion() {
        assert_eq!(Cadence::Second.interval_ms(30), 30_000);
        assert_eq!(Cadence::Millisecond.interval_ms(250), 250);
        assert_eq!(Cadence::EveryMessage.interval_ms(7), 7);
    }

    #[test]
    fn scheduled_poll_only_for_millisecond() {
        assert!(Cadence::Millisecond.needs_scheduled_poll());
        assert!(!Cadence::Second.needs_scheduled_poll());
        assert!(!Cadence::Never.needs_scheduled_poll());
    }
}

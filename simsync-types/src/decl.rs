//! Variable declarations consumed from the external declaration loader.

use crate::{Cadence, VarSource};
use serde::{Deserialize, Serialize};

/// Plain-data declaration of one variable.
///
/// The engine only consumes these; how they are produced (static list,
/// config file, user action) is the declaring application's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDeclaration {
    /// Unique descriptive name within the engine.
    pub name: String,
    /// Variable name as the simulation host knows it.
    pub sim_name: String,
    /// Source tag ('A' property, 'L' local script var, 'Q' expression).
    #[serde(default)]
    pub source: VarSource,
    /// Unit name. Determines the value kind.
    pub unit: String,
    /// Update push policy.
    #[serde(default)]
    pub cadence: Cadence,
    /// Interval count for scheduled cadences (seconds or milliseconds).
    #[serde(default)]
    pub interval: u32,
    /// Minimum change that counts as a change, for numeric kinds.
    #[serde(default = "default_epsilon")]
    pub delta_epsilon: f32,
    /// Display string returned before any value arrives.
    #[serde(default)]
    pub default_value: String,
    /// Decimal places for formatted output of real values.
    #[serde(default)]
    pub precision: Option<usize>,
    /// Minimum host version prefix this variable requires, if any.
    #[serde(default)]
    pub min_sim_version: Option<String>,
    /// Whether the application may write this variable back to the host.
    #[serde(default)]
    pub settable: bool,
}

/// Two decimal places of sensitivity suits most physical units.
fn default_epsilon() -> f32 {
    0.0099999
}

impl VarDeclaration {
    /// Minimal declaration with defaults for everything but the names
    /// and unit.
    pub fn new(name: &str, sim_name: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            sim_name: sim_name.to_string(),
            source: VarSource::default(),
            unit: unit.to_string(),
            cadence: Cadence::default(),
            interval: 0,
            delta_epsilon: default_epsilon(),
            default_value: String::new(),
            precision: None,
            min_sim_version: None,
            settable: false,
        }
    }

    /// Set the source tag.
    pub fn with_source(mut self, source: VarSource) -> Self {
        self.source = source;
        self
    }

    /// Set the cadence and interval.
    pub fn with_cadence(mut self, cadence: Cadence, interval: u32) -> Self {
        self.cadence = cadence;
        self.interval = interval;
        self
    }

    /// Set the change threshold.
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.delta_epsilon = epsilon;
        self
    }

    /// Set the default display string.
    pub fn with_default(mut self, default_value: &str) -> Self {
        self.default_value = default_value.to_string();
        self
    }
}

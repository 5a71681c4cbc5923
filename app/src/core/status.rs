use serde::{Deserialize, Serialize};

use crate::core::time::DateTime;
use crate::core::unit::Degrees;

/// One of the three configurable named temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureName {
    T0,
    Tmin,
    Tmax,
}

impl std::fmt::Display for TemperatureName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemperatureName::T0 => write!(f, "t0"),
            TemperatureName::Tmin => write!(f, "tmin"),
            TemperatureName::Tmax => write!(f, "tmax"),
        }
    }
}

/// High-level user intent: follow the weekly program, force on/off, or pin
/// the target to one of the named temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Auto,
    On,
    Off,
    Tmax,
    Tmin,
    T0,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Auto => "auto",
            Mode::On => "on",
            Mode::Off => "off",
            Mode::Tmax => "tmax",
            Mode::Tmin => "tmin",
            Mode::T0 => "t0",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    Heating,
    Cooling,
}

impl std::fmt::Display for HvacMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HvacMode::Heating => write!(f, "heating"),
            HvacMode::Cooling => write!(f, "cooling"),
        }
    }
}

/// Hysteresis strategy, named after the thermal inertia of the controlled
/// system: the higher the inertia, the earlier the actuator is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Inertia {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl TryFrom<u8> for Inertia {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Inertia::Low),
            2 => Ok(Inertia::Medium),
            3 => Ok(Inertia::High),
            other => Err(format!("inertia must be 1, 2 or 3, `{other}` provided")),
        }
    }
}

impl From<Inertia> for u8 {
    fn from(value: Inertia) -> Self {
        value as u8
    }
}

/// Immutable snapshot of the whole thermostat state, published to monitors
/// on every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Seconds since the epoch.
    pub timestamp: i64,
    pub mode: Mode,
    pub hvac_mode: HvacMode,
    /// Actuator status: 1 = on, 0 = off.
    pub status: u8,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub error: Option<String>,
    pub explain: Option<String>,
}

impl StatusSnapshot {
    pub fn new(mode: Mode, hvac_mode: HvacMode, on: bool, current: Option<Degrees>, target: Option<Degrees>) -> Self {
        Self {
            timestamp: DateTime::now().timestamp(),
            mode,
            hvac_mode,
            status: on as u8,
            current_temperature: current.map(f64::from).filter(|t| t.is_finite()),
            target_temperature: target.map(f64::from).filter(|t| t.is_finite()),
            error: None,
            explain: None,
        }
    }

    pub fn with_error(mut self, error: String, explain: Option<String>) -> Self {
        self.error = Some(error);
        self.explain = explain;
        self
    }
}

/// Outcome of a hysteresis decision: the boolean the actuator should be
/// driven to, plus the full status it was derived from.
#[derive(Debug, Clone)]
pub struct ShouldBeOn {
    pub on: bool,
    pub status: StatusSnapshot,
}

impl From<ShouldBeOn> for bool {
    fn from(value: ShouldBeOn) -> Self {
        value.on
    }
}

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use crate::telemetry::TelemetrySnapshot;

/// Upper per-bank voltage ratios are expressed against a 24 V reference bank.
const REFERENCE_BANK_VOLTAGE: f64 = 24.0;
const LITHIUM_MAX_RATIO: f64 = 28.8;
const AGM_MAX_RATIO: f64 = 25.6;
const EMPTY_RATIO: f64 = 21.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BatteryChemistry {
    Lithium,
    Agm,
    #[default]
    Unknown,
}

impl BatteryChemistry {
    /// Case-insensitive; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lithium" | "lifepo4" => Self::Lithium,
            "agm" => Self::Agm,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lithium => "Lithium",
            Self::Agm => "AGM",
            Self::Unknown => "Unknown",
        }
    }

    /// `(min, max)` voltage of a full bank at the given nominal voltage.
    pub fn voltage_bounds(&self, nominal_bank_voltage: f64) -> Option<(f64, f64)> {
        let scale = nominal_bank_voltage / REFERENCE_BANK_VOLTAGE;
        match self {
            Self::Lithium => Some((scale * EMPTY_RATIO, scale * LITHIUM_MAX_RATIO)),
            Self::Agm => Some((scale * EMPTY_RATIO, scale * AGM_MAX_RATIO)),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for BatteryChemistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BatteryChemistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BatteryChemistry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Estimated state of charge in percent, clamped to `[0, 100]`.
///
/// Unknown chemistry, a non-finite voltage, or collapsed bounds (`max == min`)
/// all yield 0.
pub fn state_of_charge_percent(
    voltage: f64,
    nominal_bank_voltage: f64,
    chemistry: BatteryChemistry,
) -> f64 {
    let Some((min, max)) = chemistry.voltage_bounds(nominal_bank_voltage) else {
        debug!(%chemistry, "no voltage bounds for chemistry, reporting 0% charge");
        return 0.0;
    };

    if !voltage.is_finite() {
        return 0.0;
    }

    let span = max - min;
    if !span.is_finite() || span <= 0.0 {
        warn!(nominal_bank_voltage, %chemistry, "battery voltage bounds collapsed, reporting 0% charge");
        return 0.0;
    }

    ((voltage - min) / span * 100.0).clamp(0.0, 100.0)
}

/// The user's battery bank, as entered in settings. Telemetry never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryProfile {
    #[serde(default = "default_nominal_voltage")]
    pub nominal_voltage: f64,
    #[serde(default)]
    pub chemistry: BatteryChemistry,
    #[serde(default = "default_capacity_ah")]
    pub capacity_ah: f64,
    #[serde(default = "default_shutoff_temperature")]
    pub shutoff_temperature: f64,
}

fn default_nominal_voltage() -> f64 {
    12.0
}

fn default_capacity_ah() -> f64 {
    100.0
}

fn default_shutoff_temperature() -> f64 {
    45.0
}

impl Default for BatteryProfile {
    fn default() -> Self {
        Self {
            nominal_voltage: default_nominal_voltage(),
            chemistry: BatteryChemistry::default(),
            capacity_ah: default_capacity_ah(),
            shutoff_temperature: default_shutoff_temperature(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub state_of_charge_percent: f64,
    pub remaining_capacity_ah: f64,
    pub over_shutoff_temperature: bool,
}

impl BatteryProfile {
    pub fn state_of_charge(&self, voltage: f64) -> f64 {
        state_of_charge_percent(voltage, self.nominal_voltage, self.chemistry)
    }

    /// Recomputed on every read; nothing here is cached in the store.
    pub fn derive(&self, snapshot: &TelemetrySnapshot) -> DerivedMetrics {
        let soc = snapshot
            .battery_voltage
            .map(|v| self.state_of_charge(v))
            .unwrap_or(0.0);

        DerivedMetrics {
            state_of_charge_percent: soc,
            remaining_capacity_ah: self.capacity_ah * soc / 100.0,
            over_shutoff_temperature: snapshot
                .controller_battery_temperature
                .is_some_and(|t| t >= self.shutoff_temperature),
        }
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Charge limit ceiling in the controller's tenths-of-a-volt units (30.0 V).
pub const CHARGE_LIMIT_CEILING_TENTHS: f64 = 300.0;

pub const CHARGER_VARIABLE: &str = "battery_charge_status";
pub const INVERTER_VARIABLE: &str = "inverter_switch";
pub const CHARGE_LIMIT_VARIABLE: &str = "charge_limit_voltage";

/// Last settings the controller confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSettings {
    pub charger_enabled: bool,
    pub inverter_enabled: bool,
    pub charge_limit_voltage: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            charger_enabled: true,
            inverter_enabled: true,
            charge_limit_voltage: 14.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    SetChargerEnabled(bool),
    SetInverterEnabled(bool),
    /// Volts; sent as tenths of a volt.
    SetChargeLimitVoltage(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("charge limit {volts} V exceeds the {max} V ceiling")]
    ChargeLimitTooHigh { volts: f64, max: f64 },
    #[error("invalid value for {variable}: {value}")]
    InvalidValue { variable: &'static str, value: f64 },
}

/// A validated command, ready to post to `/solar-set-var/<variable>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlRequest {
    pub variable: &'static str,
    pub value: f64,
}

impl ControlCommand {
    /// Checks the command before anything is sent or stored.
    pub fn validate(&self) -> Result<ControlRequest, ControlError> {
        match *self {
            Self::SetChargerEnabled(on) => Ok(ControlRequest {
                variable: CHARGER_VARIABLE,
                value: flag(on),
            }),
            Self::SetInverterEnabled(on) => Ok(ControlRequest {
                variable: INVERTER_VARIABLE,
                value: flag(on),
            }),
            Self::SetChargeLimitVoltage(volts) => {
                if !volts.is_finite() || volts <= 0.0 {
                    return Err(ControlError::InvalidValue {
                        variable: CHARGE_LIMIT_VARIABLE,
                        value: volts,
                    });
                }
                if volts * 10.0 > CHARGE_LIMIT_CEILING_TENTHS {
                    return Err(ControlError::ChargeLimitTooHigh {
                        volts,
                        max: CHARGE_LIMIT_CEILING_TENTHS / 10.0,
                    });
                }
                Ok(ControlRequest {
                    variable: CHARGE_LIMIT_VARIABLE,
                    value: (volts * 10.0).round(),
                })
            }
        }
    }

    /// Settings after the controller accepted this command. The charge limit
    /// is recorded at the tenth-of-a-volt resolution that was sent.
    pub fn apply_to(&self, settings: &ControllerSettings) -> ControllerSettings {
        let mut next = settings.clone();
        match *self {
            Self::SetChargerEnabled(on) => next.charger_enabled = on,
            Self::SetInverterEnabled(on) => next.inverter_enabled = on,
            Self::SetChargeLimitVoltage(volts) => {
                next.charge_limit_voltage = (volts * 10.0).round() / 10.0
            }
        }
        next
    }
}

fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

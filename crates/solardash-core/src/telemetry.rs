use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// One point-in-time reading from the charge controller.
///
/// Battery and panel 1 figures are reported by every firmware revision; the
/// remaining readings only exist on newer controllers. Every numeric field is
/// still optional so that normalizing an arbitrary payload can never fail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub battery_voltage: Option<f64>,
    pub battery_current: Option<f64>,
    pub solar_panel_1_voltage: Option<f64>,
    pub solar_panel_1_current: Option<f64>,
    pub solar_panel_1_power: Option<f64>,
    pub total_power_of_solar_panels: Option<f64>,
    pub total_charging_power: Option<f64>,
    pub solar_panel_2_voltage: Option<f64>,
    pub solar_panel_2_current: Option<f64>,
    pub solar_panel_2_power: Option<f64>,

    pub controller_battery_temperature: Option<f64>,
    pub charging_upper_limit_temperature: Option<f64>,
    pub charging_lower_limit_temperature: Option<f64>,
    pub heat_sink_a_temperature: Option<f64>,
    pub heat_sink_b_temperature: Option<f64>,
    pub heat_sink_c_temperature: Option<f64>,
    pub ambient_temperature: Option<f64>,

    pub over_discharge_voltage: Option<f64>,
    pub discharge_limiting_voltage: Option<f64>,
    pub stop_charging_current: Option<f64>,
    pub stop_charging_capacity_soc: Option<f64>,
    pub immediate_equalization_charge_command: Option<f64>,

    pub load_voltage: Option<f64>,
    pub load_current: Option<f64>,
    pub load_power: Option<f64>,
    pub battery_soc: Option<f64>,

    pub grid_a_phase_voltage: Option<f64>,
    pub grid_a_phase_current: Option<f64>,
    pub grid_frequency: Option<f64>,
    pub inverter_phase_a_voltage: Option<f64>,
    pub inverter_phase_a_current: Option<f64>,
    pub inverter_frequency: Option<f64>,
    pub pv_charging_current: Option<f64>,

    pub charge_limit_voltage: Option<f64>,
    pub charger_enabled: Option<bool>,
    pub inverter_enabled: Option<bool>,

    /// Device-reported error codes, in whatever order the device sent them.
    pub errors: Vec<String>,
}

impl TelemetrySnapshot {
    /// Normalizes any JSON value. Non-object payloads yield the all-unknown snapshot.
    pub fn from_json(raw: &Value) -> Self {
        match raw.as_object() {
            Some(map) => normalize(map),
            None => {
                warn!(kind = json_kind(raw), "telemetry payload is not an object");
                Self::default()
            }
        }
    }
}

/// Maps a raw `/solar-data` object onto [`TelemetrySnapshot`].
///
/// Unknown keys are ignored. A key holding a value of the wrong type is logged
/// and treated as absent.
pub fn normalize(raw: &Map<String, Value>) -> TelemetrySnapshot {
    let num = |key: &str| number_field(raw, key);

    TelemetrySnapshot {
        battery_voltage: num("battery_voltage"),
        battery_current: num("battery_current"),
        solar_panel_1_voltage: num("solar_panel_1_voltage"),
        solar_panel_1_current: num("solar_panel_1_current"),
        solar_panel_1_power: num("solar_panel_1_power"),
        total_power_of_solar_panels: num("total_power_of_solar_panels"),
        total_charging_power: num("total_charging_power"),
        solar_panel_2_voltage: num("solar_panel_2_voltage"),
        solar_panel_2_current: num("solar_panel_2_current"),
        solar_panel_2_power: num("solar_panel_2_power"),
        controller_battery_temperature: num("controller_battery_temperature"),
        charging_upper_limit_temperature: num("charging_upper_limit_temperature"),
        charging_lower_limit_temperature: num("charging_lower_limit_temperature"),
        heat_sink_a_temperature: num("heat_sink_a_temperature"),
        heat_sink_b_temperature: num("heat_sink_b_temperature"),
        heat_sink_c_temperature: num("heat_sink_c_temperature"),
        ambient_temperature: num("ambient_temperature"),
        over_discharge_voltage: num("over_discharge_voltage"),
        discharge_limiting_voltage: num("discharge_limiting_voltage"),
        stop_charging_current: num("stop_charging_current"),
        stop_charging_capacity_soc: num("stop_charging_capacity"),
        immediate_equalization_charge_command: num("immediate_equalization_charge_command"),
        load_voltage: num("load_voltage"),
        load_current: num("load_current"),
        load_power: num("load_power"),
        battery_soc: num("battery_soc"),
        grid_a_phase_voltage: num("grid_a_phase_voltage"),
        grid_a_phase_current: num("grid_a_phase_current"),
        grid_frequency: num("grid_frequency"),
        inverter_phase_a_voltage: num("inverter_phase_a_voltage"),
        inverter_phase_a_current: num("inverter_phase_a_current"),
        inverter_frequency: num("inverter_frequency"),
        pv_charging_current: num("pv_charging_current"),
        charge_limit_voltage: num("charge_limit_voltage"),
        charger_enabled: switch_field(raw, "battery_charge_status"),
        inverter_enabled: switch_field(raw, "inverter_switch"),
        errors: error_list(raw),
    }
}

fn number_field(raw: &Map<String, Value>, key: &str) -> Option<f64> {
    match raw.get(key)? {
        Value::Null => None,
        Value::Number(n) => match n.as_f64() {
            Some(v) if v.is_finite() => Some(v),
            _ => {
                warn!(key, "dropping non-finite telemetry value");
                None
            }
        },
        other => {
            warn!(key, kind = json_kind(other), "expected a number, treating as unknown");
            None
        }
    }
}

// Switches come back either as JSON booleans or as the 1/0 the control endpoint accepts.
fn switch_field(raw: &Map<String, Value>, key: &str) -> Option<bool> {
    match raw.get(key)? {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 0.0 => Some(false),
            Some(v) if v == 1.0 => Some(true),
            _ => {
                warn!(key, value = %n, "switch value is neither 0 nor 1");
                None
            }
        },
        other => {
            warn!(key, kind = json_kind(other), "expected a switch state, treating as unknown");
            None
        }
    }
}

fn error_list(raw: &Map<String, Value>) -> Vec<String> {
    match raw.get("errors") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                other => {
                    warn!(kind = json_kind(other), "skipping malformed error code");
                    None
                }
            })
            .collect(),
        Some(other) => {
            warn!(kind = json_kind(other), "errors field is not a list");
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn empty_object_normalizes_to_unknowns() {
        let snapshot = normalize(&Map::new());
        assert_eq!(snapshot, TelemetrySnapshot::default());
        assert!(snapshot.errors.is_empty());
    }

    #[test]
    fn battery_only_payload_keeps_other_fields_unknown() {
        let snapshot = normalize(&object(json!({
            "battery_voltage": 13.2,
            "battery_current": 2.1
        })));

        assert_eq!(snapshot.battery_voltage, Some(13.2));
        assert_eq!(snapshot.battery_current, Some(2.1));
        assert_eq!(snapshot.solar_panel_2_voltage, None);
        assert_eq!(snapshot.inverter_frequency, None);
        assert_eq!(snapshot.charger_enabled, None);
        assert_eq!(snapshot.errors, Vec::<String>::new());
    }

    #[test]
    fn stop_charging_capacity_maps_to_soc_field() {
        let snapshot = normalize(&object(json!({ "stop_charging_capacity": 95 })));
        assert_eq!(snapshot.stop_charging_capacity_soc, Some(95.0));
    }

    #[test]
    fn wrong_types_become_unknown_instead_of_passing_through() {
        let snapshot = normalize(&object(json!({
            "battery_voltage": "13.2",
            "load_power": [1, 2],
            "grid_frequency": null,
            "battery_charge_status": "on"
        })));

        assert_eq!(snapshot.battery_voltage, None);
        assert_eq!(snapshot.load_power, None);
        assert_eq!(snapshot.grid_frequency, None);
        assert_eq!(snapshot.charger_enabled, None);
    }

    #[test]
    fn switches_accept_bools_and_numeric_flags() {
        let snapshot = normalize(&object(json!({
            "battery_charge_status": 1,
            "inverter_switch": false
        })));
        assert_eq!(snapshot.charger_enabled, Some(true));
        assert_eq!(snapshot.inverter_enabled, Some(false));

        let snapshot = normalize(&object(json!({ "inverter_switch": 2 })));
        assert_eq!(snapshot.inverter_enabled, None);
    }

    #[test]
    fn error_codes_keep_strings_and_numbers() {
        let snapshot = normalize(&object(json!({
            "errors": ["E01", 7, {"code": 3}, null]
        })));
        assert_eq!(snapshot.errors, vec!["E01".to_string(), "7".to_string()]);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let snapshot = normalize(&object(json!({
            "battery_voltage": 25.6,
            "firmware_build": "2024.1"
        })));
        assert_eq!(snapshot.battery_voltage, Some(25.6));
    }

    #[test]
    fn non_object_payload_is_still_total() {
        assert_eq!(TelemetrySnapshot::from_json(&json!([1, 2, 3])), TelemetrySnapshot::default());
        assert_eq!(TelemetrySnapshot::from_json(&Value::Null), TelemetrySnapshot::default());
    }
}

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Historical series exposed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    BatteryVoltage,
    ChargingPower,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 2] = [SeriesKind::BatteryVoltage, SeriesKind::ChargingPower];

    /// Key holding the sample value in the raw history records.
    pub fn value_field(&self) -> &'static str {
        match self {
            Self::BatteryVoltage => "battery_voltage",
            Self::ChargingPower => "total_charging_power",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::BatteryVoltage => "/solar-data-week",
            Self::ChargingPower => "/solar-data-week/total_charging_power",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::BatteryVoltage => "V",
            Self::ChargingPower => "W",
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value_field())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucketing {
    #[default]
    Hour,
    Day,
}

impl Bucketing {
    fn width_secs(&self) -> i64 {
        match self {
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.width_secs();
        let secs = ts.timestamp();
        DateTime::from_timestamp(secs - secs.rem_euclid(width), 0).unwrap_or(ts)
    }
}

/// Parses raw history records, drops invalid ones, then buckets and averages
/// whatever falls inside the window ending at `now`.
pub fn reduce_series(
    raw: &[Value],
    kind: SeriesKind,
    window_hours: u32,
    bucketing: Bucketing,
    now: DateTime<Utc>,
) -> Vec<SeriesPoint> {
    let points: Vec<SeriesPoint> = raw.iter().filter_map(|r| parse_sample(r, kind)).collect();
    let dropped = raw.len() - points.len();
    if dropped > 0 {
        debug!(%kind, dropped, kept = points.len(), "filtered invalid history samples");
    }
    reduce_points(points, window_hours, bucketing, now)
}

/// Windowing, bucketing, averaging and ordering over already-valid points.
///
/// Applying it to its own output with a window covering every point returns
/// the same sequence.
pub fn reduce_points(
    points: impl IntoIterator<Item = SeriesPoint>,
    window_hours: u32,
    bucketing: Bucketing,
    now: DateTime<Utc>,
) -> Vec<SeriesPoint> {
    let cutoff = window_start(now, window_hours);
    let mut buckets: BTreeMap<DateTime<Utc>, (f64, u32)> = BTreeMap::new();

    for point in points {
        if !point.value.is_finite() || point.timestamp < cutoff {
            continue;
        }
        let slot = buckets.entry(bucketing.truncate(point.timestamp)).or_insert((0.0, 0));
        slot.0 += point.value;
        slot.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(timestamp, (sum, count))| SeriesPoint {
            timestamp,
            value: round2(sum / f64::from(count)),
        })
        .collect()
}

/// Oldest instant still inside the window. A window reaching past the
/// representable range keeps everything.
fn window_start(now: DateTime<Utc>, window_hours: u32) -> DateTime<Utc> {
    TimeDelta::try_hours(i64::from(window_hours))
        .and_then(|width| now.checked_sub_signed(width))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A record survives only with a finite numeric value and a parseable timestamp.
pub fn parse_sample(raw: &Value, kind: SeriesKind) -> Option<SeriesPoint> {
    let value = raw.get(kind.value_field())?.as_f64().filter(|v| v.is_finite())?;
    let timestamp = parse_timestamp(raw.get("timestamp")?.as_str()?)?;
    Some(SeriesPoint { timestamp, value })
}

/// RFC 3339, or a naive ISO date-time taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).single().expect("valid time")
    }

    #[test]
    fn averages_within_hour_and_drops_nan_sample() {
        // Arrange
        let raw = vec![
            json!({"battery_voltage": 12.0, "timestamp": "2024-01-01T00:10:00Z"}),
            json!({"battery_voltage": 12.4, "timestamp": "2024-01-01T00:50:00Z"}),
            json!({"battery_voltage": "NaN", "timestamp": "2024-01-01T01:00:00Z"}),
        ];

        // Act
        let out = reduce_series(&raw, SeriesKind::BatteryVoltage, 24, Bucketing::Hour, at(2, 0));

        // Assert
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, at(0, 0));
        assert!((out[0].value - 12.2).abs() < 1e-9);
    }

    #[test]
    fn output_is_sorted_by_bucket() {
        let raw = vec![
            json!({"total_charging_power": 300.0, "timestamp": "2024-01-01T03:05:00Z"}),
            json!({"total_charging_power": 100.0, "timestamp": "2024-01-01T01:30:00Z"}),
            json!({"total_charging_power": 200.0, "timestamp": "2024-01-01T02:59:59Z"}),
        ];

        let out = reduce_series(&raw, SeriesKind::ChargingPower, 24, Bucketing::Hour, at(4, 0));

        let stamps: Vec<_> = out.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![at(1, 0), at(2, 0), at(3, 0)]);
        assert_eq!(out.iter().map(|p| p.value).collect::<Vec<_>>(), vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn drops_samples_outside_window() {
        let raw = vec![
            json!({"battery_voltage": 11.0, "timestamp": "2024-01-01T00:30:00Z"}),
            json!({"battery_voltage": 13.0, "timestamp": "2024-01-01T05:30:00Z"}),
        ];

        let out = reduce_series(&raw, SeriesKind::BatteryVoltage, 2, Bucketing::Hour, at(6, 0));

        assert_eq!(out, vec![SeriesPoint { timestamp: at(5, 0), value: 13.0 }]);
    }

    #[test]
    fn sample_on_window_boundary_is_kept() {
        let raw = vec![json!({"battery_voltage": 12.5, "timestamp": "2024-01-01T04:00:00Z"})];
        let out = reduce_series(&raw, SeriesKind::BatteryVoltage, 2, Bucketing::Hour, at(6, 0));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn invalid_records_never_reach_output() {
        // Arrange: 2 valid, 5 invalid
        let raw = vec![
            json!({"battery_voltage": 12.1, "timestamp": "2024-01-01T01:00:00Z"}),
            json!({"battery_voltage": 12.3, "timestamp": "2024-01-01T03:00:00Z"}),
            json!({"battery_voltage": null, "timestamp": "2024-01-01T02:00:00Z"}),
            json!({"battery_voltage": 99.0, "timestamp": "not a date"}),
            json!({"battery_voltage": 99.0}),
            json!({"timestamp": "2024-01-01T02:00:00Z"}),
            json!("garbage"),
        ];

        // Act
        let out = reduce_series(&raw, SeriesKind::BatteryVoltage, 24, Bucketing::Hour, at(4, 0));

        // Assert
        assert!(out.len() <= 2);
        assert!(out.iter().all(|p| p.value != 99.0));
        assert!(out.iter().all(|p| p.timestamp != at(2, 0)));
    }

    #[test]
    fn reducing_twice_is_idempotent() {
        let points: Vec<SeriesPoint> = (0..50)
            .map(|i| SeriesPoint {
                timestamp: at(0, 0) + TimeDelta::minutes(i * 17),
                value: 12.0 + (i as f64) * 0.037,
            })
            .collect();
        let now = at(23, 59);

        let once = reduce_points(points, 48, Bucketing::Hour, now);
        let twice = reduce_points(once.clone(), 48, Bucketing::Hour, now);

        assert_eq!(once, twice);
    }

    #[test]
    fn widest_window_keeps_every_sample() {
        // Arrange
        let raw = vec![
            json!({"battery_voltage": 12.6, "timestamp": "1999-06-01T10:20:00Z"}),
            json!({"battery_voltage": 13.1, "timestamp": "2024-01-01T00:15:00Z"}),
        ];

        // Act
        let out = reduce_series(&raw, SeriesKind::BatteryVoltage, u32::MAX, Bucketing::Hour, Utc::now());

        // Assert
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], SeriesPoint { timestamp: at(0, 0), value: 13.1 });
    }

    #[test]
    fn window_start_saturates_at_earliest_instant() {
        assert_eq!(window_start(at(0, 0), u32::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window_start(at(6, 0), 2), at(4, 0));
    }

    #[test]
    fn empty_input_emits_no_buckets() {
        assert!(reduce_series(&[], SeriesKind::ChargingPower, 24, Bucketing::Hour, at(1, 0)).is_empty());
    }

    #[test]
    fn day_bucketing_groups_whole_days() {
        let points = vec![
            SeriesPoint { timestamp: at(1, 0), value: 10.0 },
            SeriesPoint { timestamp: at(23, 0), value: 20.0 },
        ];
        let out = reduce_points(points, 72, Bucketing::Day, at(23, 30));
        assert_eq!(out, vec![SeriesPoint { timestamp: at(0, 0), value: 15.0 }]);
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        assert_eq!(parse_timestamp("2024-01-01 03:20:00"), Some(at(3, 20)));
        assert_eq!(parse_timestamp("2024-01-01T03:20:00.000"), Some(at(3, 20)));
        assert_eq!(parse_timestamp("2024-01-01T04:20:00+01:00"), Some(at(3, 20)));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}

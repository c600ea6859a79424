pub mod client;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod metrics;
pub mod push;
pub mod series;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod store_tests;

pub use client::{ClientError, HttpTelemetryClient, TelemetrySource};
pub use config::{ConfigError, DashboardConfig, LogLevel};
pub use control::{ControlCommand, ControlError, ControllerSettings};
pub use coordinator::{CommandError, HistorySettings, SyncCoordinator};
pub use metrics::{state_of_charge_percent, BatteryChemistry, BatteryProfile, DerivedMetrics};
pub use push::{
    DisconnectReason, PushConnection, PushError, PushMessage, PushTransport, ReconnectPolicy,
    ServerEvent, SsePushTransport,
};
pub use series::{reduce_series, Bucketing, SeriesKind, SeriesPoint};
pub use store::{
    DataSource, PushState, Received, SensorStore, SharedStore, SyncState, UpdateOrigin,
};
pub use telemetry::TelemetrySnapshot;

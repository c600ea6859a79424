use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::control::ControllerSettings;
use crate::series::{SeriesKind, SeriesPoint};
use crate::telemetry::TelemetrySnapshot;

/// Which pull endpoint a fetch result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Latest,
    History(SeriesKind),
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::History(kind) => write!(f, "history:{kind}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Loading,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PushState {
    #[default]
    Disconnected,
    Connected,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchPayload {
    Snapshot(TelemetrySnapshot),
    Series(Vec<SeriesPoint>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrigin {
    Pull,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Received {
    pub at: DateTime<Utc>,
    pub origin: UpdateOrigin,
}

/// The single owner of the latest snapshot, the historical series and their
/// sync status. All writes go through the `apply_*` / `set_*` operations.
///
/// Updates carry no ordering token: whichever write lands last wins, even if
/// it describes an older reading.
#[derive(Debug, Default)]
pub struct SensorStore {
    latest: Option<TelemetrySnapshot>,
    received: Option<Received>,
    series: BTreeMap<SeriesKind, Vec<SeriesPoint>>,
    sync: BTreeMap<DataSource, SyncState>,
    push: PushState,
    settings: ControllerSettings,
}

impl SensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&TelemetrySnapshot> {
        self.latest.as_ref()
    }

    pub fn received(&self) -> Option<Received> {
        self.received
    }

    pub fn series(&self, kind: SeriesKind) -> &[SeriesPoint] {
        self.series.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sync_state(&self, source: DataSource) -> SyncState {
        self.sync.get(&source).cloned().unwrap_or_default()
    }

    pub fn push_state(&self) -> PushState {
        self.push
    }

    pub fn controller_settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// `Idle`/`Failed`/`Succeeded` -> `Loading`.
    pub fn begin_fetch(&mut self, source: DataSource) {
        debug!(%source, "fetch started");
        self.sync.insert(source, SyncState::Loading);
    }

    pub fn apply_fetch_result(&mut self, source: DataSource, result: Result<FetchPayload, String>) {
        let state = match (source, result) {
            (DataSource::Latest, Ok(FetchPayload::Snapshot(snapshot))) => {
                self.replace_latest(snapshot, UpdateOrigin::Pull);
                SyncState::Succeeded
            }
            (DataSource::History(kind), Ok(FetchPayload::Series(points))) => {
                debug!(%kind, points = points.len(), "series replaced");
                self.series.insert(kind, points);
                SyncState::Succeeded
            }
            (source, Ok(_)) => {
                warn!(%source, "fetch payload does not match its source");
                SyncState::Failed(format!("unexpected payload for {source}"))
            }
            (source, Err(message)) => {
                warn!(%source, %message, "fetch failed");
                SyncState::Failed(message)
            }
        };
        self.sync.insert(source, state);
    }

    /// Overwrites the latest snapshot. Fetch sync states are left alone.
    pub fn apply_push_update(&mut self, snapshot: TelemetrySnapshot) {
        self.replace_latest(snapshot, UpdateOrigin::Push);
    }

    pub fn set_push_state(&mut self, state: PushState) {
        if self.push != state {
            debug!(from = ?self.push, to = ?state, "push state changed");
        }
        self.push = state;
    }

    pub fn set_controller_settings(&mut self, settings: ControllerSettings) {
        self.settings = settings;
    }

    fn replace_latest(&mut self, snapshot: TelemetrySnapshot, origin: UpdateOrigin) {
        self.latest = Some(snapshot);
        self.received = Some(Received {
            at: Utc::now(),
            origin,
        });
    }
}

/// One store per application, shared between the coordinator and readers.
#[derive(Debug, Clone, Default)]
pub struct SharedStore(Arc<RwLock<SensorStore>>);

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&SensorStore) -> R) -> R {
        f(&self.0.read())
    }

    /// Runs `f` under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut SensorStore) -> R) -> R {
        f(&mut self.0.write())
    }

    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.read(|s| s.latest().cloned())
    }

    pub fn series(&self, kind: SeriesKind) -> Vec<SeriesPoint> {
        self.read(|s| s.series(kind).to_vec())
    }

    pub fn sync_state(&self, source: DataSource) -> SyncState {
        self.read(|s| s.sync_state(source))
    }

    pub fn push_state(&self) -> PushState {
        self.read(SensorStore::push_state)
    }
}

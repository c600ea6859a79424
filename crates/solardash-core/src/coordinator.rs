use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::{ClientError, TelemetrySource};
use crate::control::{ControlCommand, ControlError};
use crate::push::{DisconnectReason, PushMessage, PushTransport, ReconnectPolicy};
use crate::series::{reduce_series, Bucketing, SeriesKind};
use crate::store::{DataSource, FetchPayload, PushState, SharedStore};
use crate::telemetry::{normalize, TelemetrySnapshot};

pub const DEFAULT_PUSH_EVENT: &str = "solar-data";

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Rejected(#[from] ControlError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub window_hours: u32,
    pub bucketing: Bucketing,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            window_hours: 168,
            bucketing: Bucketing::Hour,
        }
    }
}

/// Feeds the store from the pull endpoints and the push feed.
///
/// The coordinator holds no telemetry of its own: every result is written
/// straight into the shared store. Pulls are never retried automatically.
pub struct SyncCoordinator<S: TelemetrySource> {
    source: S,
    store: SharedStore,
    history: HistorySettings,
    push_event: String,
    clock: Clock,
}

impl<S: TelemetrySource> SyncCoordinator<S> {
    pub fn new(source: S, store: SharedStore) -> Self {
        Self {
            source,
            store,
            history: HistorySettings::default(),
            push_event: DEFAULT_PUSH_EVENT.to_string(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_history(mut self, history: HistorySettings) -> Self {
        self.history = history;
        self
    }

    pub fn with_push_event(mut self, event: impl Into<String>) -> Self {
        self.push_event = event.into();
        self
    }

    /// Overrides "now" for history windowing.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// One pull of `/solar-data`. Results are applied in completion order.
    pub async fn fetch_latest(&self) {
        self.store.update(|s| s.begin_fetch(DataSource::Latest));

        let result = self
            .source
            .fetch_latest()
            .await
            .map(|raw| FetchPayload::Snapshot(TelemetrySnapshot::from_json(&raw)))
            .map_err(|e| e.to_string());

        self.store.update(|s| s.apply_fetch_result(DataSource::Latest, result));
    }

    pub async fn fetch_history(&self, kind: SeriesKind) {
        let source = DataSource::History(kind);
        self.store.update(|s| s.begin_fetch(source));

        let result = self
            .source
            .fetch_history(kind)
            .await
            .map(|raw| {
                let now = (self.clock)();
                FetchPayload::Series(reduce_series(
                    &raw,
                    kind,
                    self.history.window_hours,
                    self.history.bucketing,
                    now,
                ))
            })
            .map_err(|e| e.to_string());

        self.store.update(|s| s.apply_fetch_result(source, result));
    }

    /// Latest snapshot plus every history series, one after another.
    pub async fn refresh_all(&self) {
        self.fetch_latest().await;
        for kind in SeriesKind::ALL {
            self.fetch_history(kind).await;
        }
    }

    /// Validates, sends, and only then records the new controller settings.
    pub async fn send_control(&self, command: ControlCommand) -> Result<(), CommandError> {
        let request = command.validate()?;
        self.source.set_variable(request.variable, request.value).await?;

        self.store.update(|s| {
            let next = command.apply_to(s.controller_settings());
            s.set_controller_settings(next);
        });
        info!(?command, "controller accepted command");
        Ok(())
    }

    /// Keeps the push feed open until it is shut down or the policy gives up.
    ///
    /// The attempt counter resets once a connection delivers an event; a feed
    /// that accepts and drops connections without data still runs out of
    /// attempts. Dropping the shutdown sender counts as a shutdown. Returns
    /// why the feed finally stopped.
    pub async fn run_push<T: PushTransport + ?Sized>(
        &self,
        transport: &T,
        policy: &ReconnectPolicy,
        mut shutdown: watch::Receiver<bool>,
    ) -> DisconnectReason {
        let mut attempt = 0u32;

        loop {
            if *shutdown.borrow() {
                return self.push_closed();
            }

            let reason = match transport.connect().await {
                Ok(mut connection) => {
                    self.store.update(|s| s.set_push_state(PushState::Connected));

                    loop {
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    return self.push_closed();
                                }
                            }
                            message = connection.next_event() => match message {
                                PushMessage::Event(event) => {
                                    attempt = 0;
                                    self.handle_push_event(&event.event, &event.data);
                                }
                                PushMessage::Closed(reason) => break reason,
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "push connect failed");
                    DisconnectReason::TransportError(e.to_string())
                }
            };

            attempt += 1;
            let Some(delay) = policy.next_delay(&reason, attempt) else {
                info!(%reason, attempts = attempt - 1, "push feed stopped");
                self.store.update(|s| s.set_push_state(PushState::Disconnected));
                return reason;
            };

            info!(%reason, attempt, delay_ms = delay.as_millis() as u64, "reconnecting push feed");
            self.store.update(|s| s.set_push_state(PushState::Reconnecting { attempt }));

            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            let wake = sleep(delay);
            tokio::pin!(wake);
            loop {
                tokio::select! {
                    _ = &mut wake => break,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return self.push_closed();
                        }
                    }
                }
            }
        }
    }

    fn push_closed(&self) -> DisconnectReason {
        self.store.update(|s| s.set_push_state(PushState::Disconnected));
        DisconnectReason::ClientClosed
    }

    /// Applies one push event. Bad payloads are logged and dropped; they never
    /// end the feed or touch fetch state.
    pub fn handle_push_event(&self, event: &str, data: &str) {
        if event != self.push_event {
            debug!(event, "ignoring push event");
            return;
        }

        match serde_json::from_str::<Value>(data) {
            Ok(Value::Object(map)) => {
                let snapshot = normalize(&map);
                self.store.update(|s| s.apply_push_update(snapshot));
            }
            Ok(other) => warn!(payload = %other, "push payload is not an object, dropped"),
            Err(e) => warn!(error = %e, "malformed push payload, dropped"),
        }
    }
}

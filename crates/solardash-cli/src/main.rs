use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use solardash_core::{
    BatteryProfile, ControlCommand, DashboardConfig, DataSource, DisconnectReason,
    HistorySettings, HttpTelemetryClient, PushState, SeriesKind, SeriesPoint, SharedStore,
    SsePushTransport, SyncCoordinator, SyncState, TelemetrySnapshot,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod viewer;

type Coordinator = SyncCoordinator<HttpTelemetryClient>;

#[derive(Debug, Parser)]
#[command(name = "solardash")]
#[command(about = "Solar charge controller dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `device.base_url`.
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    Once {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    History {
        #[arg(long, value_enum, default_value = "battery-voltage")]
        kind: SeriesArg,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        window_hours: Option<u32>,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Watch {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    View,
    Set {
        #[command(subcommand)]
        target: SetTarget,
    },
}

#[derive(Debug, Subcommand)]
enum SetTarget {
    Charger {
        #[arg(value_enum)]
        state: Switch,
    },
    Inverter {
        #[arg(value_enum)]
        state: Switch,
    },
    ChargeLimit {
        volts: f64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SeriesArg {
    BatteryVoltage,
    ChargingPower,
}

impl From<SeriesArg> for SeriesKind {
    fn from(arg: SeriesArg) -> Self {
        match arg {
            SeriesArg::BatteryVoltage => SeriesKind::BatteryVoltage,
            SeriesArg::ChargingPower => SeriesKind::ChargingPower,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Log lines would be drawn over the dashboard.
    let default_filter = match cli.command {
        Command::View => "off",
        _ => config.log_level.as_str(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    info!(base_url = %config.device.base_url, "starting");

    match cli.command {
        Command::Once { format } => {
            let coordinator = build_coordinator(&config)?;
            coordinator.fetch_latest().await;
            if let SyncState::Failed(message) = coordinator.store().sync_state(DataSource::Latest) {
                bail!("fetching latest telemetry failed: {message}");
            }
            if let Some(snapshot) = coordinator.store().latest() {
                print_snapshot(&snapshot, &config.battery, format)?;
            }
        }
        Command::History {
            kind,
            window_hours,
            format,
        } => {
            let kind = SeriesKind::from(kind);
            let mut history = HistorySettings::from(&config.history);
            if let Some(hours) = window_hours {
                history.window_hours = hours;
            }
            let coordinator = build_coordinator(&config)?.with_history(history);
            coordinator.fetch_history(kind).await;
            let source = DataSource::History(kind);
            if let SyncState::Failed(message) = coordinator.store().sync_state(source) {
                bail!("fetching {kind} history failed: {message}");
            }
            print_series(kind, &coordinator.store().series(kind), format)?;
        }
        Command::Watch { format } => {
            let coordinator = Arc::new(build_coordinator(&config)?);
            let feed = PushFeed::start(coordinator.clone(), &config)?;
            let result = watch_loop(&coordinator, &config, format).await;
            let reason = feed.stop().await?;
            info!(%reason, "push feed closed");
            result?;
        }
        Command::View => {
            let coordinator = Arc::new(build_coordinator(&config)?);
            let feed = PushFeed::start(coordinator.clone(), &config)?;
            let result = viewer::run_viewer(&coordinator, &config).await;
            feed.stop().await?;
            result?;
        }
        Command::Set { target } => {
            let command = match target {
                SetTarget::Charger { state } => ControlCommand::SetChargerEnabled(state.is_on()),
                SetTarget::Inverter { state } => ControlCommand::SetInverterEnabled(state.is_on()),
                SetTarget::ChargeLimit { volts } => ControlCommand::SetChargeLimitVoltage(volts),
            };
            let coordinator = build_coordinator(&config)?;
            coordinator.send_control(command).await?;
            println!("controller accepted: {}", describe(&command));
        }
    }

    Ok(())
}

impl Switch {
    fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

fn load_config(cli: &Cli) -> Result<DashboardConfig> {
    let mut config = match &cli.config {
        Some(path) => DashboardConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DashboardConfig::default(),
    };

    if let Some(base_url) = &cli.base_url {
        config.device.base_url = base_url.clone();
        config.validate().context("--base-url")?;
    }

    Ok(config)
}

fn build_coordinator(config: &DashboardConfig) -> Result<Coordinator> {
    let client = HttpTelemetryClient::new(&config.device.base_url, config.device.request_timeout)?;
    Ok(SyncCoordinator::new(client, SharedStore::new())
        .with_history(HistorySettings::from(&config.history))
        .with_push_event(config.device.push_event.clone()))
}

/// Background push feed bound to a shutdown switch.
struct PushFeed {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<DisconnectReason>,
}

impl PushFeed {
    fn start(coordinator: Arc<Coordinator>, config: &DashboardConfig) -> Result<Self> {
        let transport = SsePushTransport::with_connect_timeout(
            &config.device.base_url,
            &config.device.push_path,
            config.device.request_timeout,
        )?;
        let policy = config.reconnect.clone();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            coordinator
                .run_push(&transport, &policy, shutdown_rx)
                .await
        });

        Ok(Self { shutdown, task })
    }

    async fn stop(self) -> Result<DisconnectReason> {
        let _ = self.shutdown.send(true);
        Ok(self.task.await?)
    }
}

async fn watch_loop(
    coordinator: &Coordinator,
    config: &DashboardConfig,
    format: OutputFormat,
) -> Result<()> {
    let mut poll = interval_at(Instant::now(), config.device.poll_interval);
    let mut refresh = interval(Duration::from_millis(250));
    let mut last_seen: Option<DateTime<Utc>> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            _ = poll.tick() => {
                coordinator.fetch_latest().await;
            }
            _ = refresh.tick() => {}
        }

        let store = coordinator.store();
        let Some(received) = store.read(|s| s.received()) else {
            continue;
        };
        if last_seen == Some(received.at) {
            continue;
        }
        last_seen = Some(received.at);

        if let Some(snapshot) = store.latest() {
            print_snapshot(&snapshot, &config.battery, format)?;
        }
        info!(origin = ?received.origin, push = %push_label(store.push_state()), "update");
    }

    Ok(())
}

fn describe(command: &ControlCommand) -> String {
    match command {
        ControlCommand::SetChargerEnabled(on) => format!("charger {}", on_off(*on)),
        ControlCommand::SetInverterEnabled(on) => format!("inverter {}", on_off(*on)),
        ControlCommand::SetChargeLimitVoltage(volts) => format!("charge limit {volts:.1} V"),
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

pub(crate) fn push_label(state: PushState) -> String {
    match state {
        PushState::Disconnected => "disconnected".to_string(),
        PushState::Connected => "connected".to_string(),
        PushState::Reconnecting { attempt } => format!("reconnecting #{attempt}"),
    }
}

pub(crate) fn sync_label(state: &SyncState) -> String {
    match state {
        SyncState::Idle => "idle".to_string(),
        SyncState::Loading => "loading".to_string(),
        SyncState::Succeeded => "ok".to_string(),
        SyncState::Failed(message) => format!("failed: {message}"),
    }
}

pub(crate) fn reading(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v:.2} {unit}"),
        None => "n/a".to_string(),
    }
}

fn switch_label(value: Option<bool>) -> &'static str {
    match value {
        Some(on) => on_off(on),
        None => "n/a",
    }
}

fn print_snapshot(
    snapshot: &TelemetrySnapshot,
    battery: &BatteryProfile,
    format: OutputFormat,
) -> Result<()> {
    let derived = battery.derive(snapshot);

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({ "snapshot": snapshot, "derived": derived });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Ndjson => {
            let out = serde_json::json!({ "snapshot": snapshot, "derived": derived });
            println!("{}", serde_json::to_string(&out)?);
        }
        OutputFormat::Human => {
            println!("=== Solar Snapshot ===");
            println!("Time:       {}", Utc::now().to_rfc3339());
            println!(
                "Battery:    {}  {}  reported soc={}",
                reading(snapshot.battery_voltage, "V"),
                reading(snapshot.battery_current, "A"),
                reading(snapshot.battery_soc, "%"),
            );
            println!(
                "Estimate:   soc={:.1}%  remaining={:.1} Ah  ({} {} V bank)",
                derived.state_of_charge_percent,
                derived.remaining_capacity_ah,
                battery.chemistry,
                battery.nominal_voltage,
            );
            println!(
                "Panel 1:    {}  {}  {}",
                reading(snapshot.solar_panel_1_voltage, "V"),
                reading(snapshot.solar_panel_1_current, "A"),
                reading(snapshot.solar_panel_1_power, "W"),
            );
            println!(
                "Panel 2:    {}  {}  {}",
                reading(snapshot.solar_panel_2_voltage, "V"),
                reading(snapshot.solar_panel_2_current, "A"),
                reading(snapshot.solar_panel_2_power, "W"),
            );
            println!(
                "Solar:      total={}  charging={}  pv_current={}",
                reading(snapshot.total_power_of_solar_panels, "W"),
                reading(snapshot.total_charging_power, "W"),
                reading(snapshot.pv_charging_current, "A"),
            );
            println!(
                "Load:       {}  {}  {}",
                reading(snapshot.load_voltage, "V"),
                reading(snapshot.load_current, "A"),
                reading(snapshot.load_power, "W"),
            );
            println!(
                "Grid:       {}  {}  {}",
                reading(snapshot.grid_a_phase_voltage, "V"),
                reading(snapshot.grid_a_phase_current, "A"),
                reading(snapshot.grid_frequency, "Hz"),
            );
            println!(
                "Inverter:   {}  {}  {}",
                reading(snapshot.inverter_phase_a_voltage, "V"),
                reading(snapshot.inverter_phase_a_current, "A"),
                reading(snapshot.inverter_frequency, "Hz"),
            );
            println!(
                "Temps:      controller={}  ambient={}  sinks={} / {} / {}",
                reading(snapshot.controller_battery_temperature, "C"),
                reading(snapshot.ambient_temperature, "C"),
                reading(snapshot.heat_sink_a_temperature, "C"),
                reading(snapshot.heat_sink_b_temperature, "C"),
                reading(snapshot.heat_sink_c_temperature, "C"),
            );
            println!(
                "Switches:   charger={} inverter={} charge_limit={}",
                switch_label(snapshot.charger_enabled),
                switch_label(snapshot.inverter_enabled),
                reading(snapshot.charge_limit_voltage, "V"),
            );

            if derived.over_shutoff_temperature {
                println!(
                    "WARNING:    battery temperature above {:.0} C shutoff",
                    battery.shutoff_temperature
                );
            }
            if !snapshot.errors.is_empty() {
                println!("Errors:     {}", snapshot.errors.join(", "));
            }
        }
    }

    Ok(())
}

fn print_series(kind: SeriesKind, points: &[SeriesPoint], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({ "kind": kind, "unit": kind.unit(), "points": points });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Ndjson => {
            for point in points {
                let line = serde_json::json!({
                    "kind": kind,
                    "timestamp": point.timestamp,
                    "value": point.value,
                });
                println!("{}", serde_json::to_string(&line)?);
            }
        }
        OutputFormat::Human => {
            println!("=== {kind} ({}) ===", kind.unit());
            if points.is_empty() {
                println!("no samples in window");
            }
            for point in points {
                println!(
                    "{}  {:>8.2} {}",
                    point.timestamp.format("%Y-%m-%d %H:%M"),
                    point.value,
                    kind.unit()
                );
            }
        }
    }

    Ok(())
}

use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::event::{self, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph};
use ratatui::Terminal;
use solardash_core::{
    BatteryProfile, DashboardConfig, DataSource, PushState, Received, SeriesKind, SeriesPoint,
    SyncState, TelemetrySnapshot,
};

use crate::{push_label, reading, sync_label, Coordinator};

/// History changes slowly; refetch it far less often than the latest snapshot.
const HISTORY_REFRESH: Duration = Duration::from_secs(300);

const CHARTS: [(SeriesKind, &str, Color); 2] = [
    (SeriesKind::BatteryVoltage, "Battery voltage (V)", Color::Green),
    (SeriesKind::ChargingPower, "Charging power (W)", Color::Yellow),
];

struct SeriesView {
    kind: SeriesKind,
    sync: SyncState,
    points: Vec<SeriesPoint>,
}

/// Everything one frame needs, copied out under a single read lock.
struct ViewModel {
    latest: Option<TelemetrySnapshot>,
    received: Option<Received>,
    push: PushState,
    latest_sync: SyncState,
    series: Vec<SeriesView>,
}

impl ViewModel {
    fn capture(coordinator: &Coordinator) -> Self {
        coordinator.store().read(|s| Self {
            latest: s.latest().cloned(),
            received: s.received(),
            push: s.push_state(),
            latest_sync: s.sync_state(DataSource::Latest),
            series: CHARTS
                .iter()
                .map(|(kind, _, _)| SeriesView {
                    kind: *kind,
                    sync: s.sync_state(DataSource::History(*kind)),
                    points: s.series(*kind).to_vec(),
                })
                .collect(),
        })
    }
}

pub async fn run_viewer(coordinator: &Coordinator, config: &DashboardConfig) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let poll_interval = config.device.poll_interval;
    let window_hours = f64::from(config.history.window_hours);
    let mut next_poll = Instant::now();
    let mut next_history = Instant::now();

    let run_result = async {
        loop {
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Char('r') => {
                            next_poll = Instant::now();
                            next_history = Instant::now();
                        }
                        _ => {}
                    }
                }
            }

            if Instant::now() >= next_poll {
                coordinator.fetch_latest().await;
                next_poll = Instant::now() + poll_interval;
            }

            if Instant::now() >= next_history {
                for kind in SeriesKind::ALL {
                    coordinator.fetch_history(kind).await;
                }
                next_history = Instant::now() + HISTORY_REFRESH;
            }

            let model = ViewModel::capture(coordinator);
            let now = Utc::now();
            terminal.draw(|frame| {
                draw_ui(frame.size(), frame, &model, &config.battery, now, window_hours)
            })?;
        }

        Ok::<(), anyhow::Error>(())
    }
    .await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    run_result
}

fn draw_ui(
    area: Rect,
    frame: &mut ratatui::Frame<'_>,
    model: &ViewModel,
    battery: &BatteryProfile,
    now: DateTime<Utc>,
    window_hours: f64,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(0)])
        .split(area);

    frame.render_widget(render_header(model, battery), rows[0]);

    let chart_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[1]);

    for ((series, (_, title, color)), row_area) in
        model.series.iter().zip(CHARTS.iter()).zip(chart_rows.iter().copied())
    {
        render_series_chart(frame, row_area, series, title, *color, now, window_hours);
    }
}

fn render_header(model: &ViewModel, battery: &BatteryProfile) -> Paragraph<'static> {
    let mut lines = Vec::new();

    match &model.latest {
        Some(snapshot) => {
            let derived = battery.derive(snapshot);
            let readings = format!(
                "battery={} soc~{:.0}% charging={} load={} pv={}",
                reading(snapshot.battery_voltage, "V"),
                derived.state_of_charge_percent,
                reading(snapshot.total_charging_power, "W"),
                reading(snapshot.load_power, "W"),
                reading(snapshot.total_power_of_solar_panels, "W"),
            );
            lines.push(Line::from(vec![
                Span::styled(
                    "Solar Dashboard  ",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ),
                Span::raw(readings),
            ]));
            if derived.over_shutoff_temperature {
                lines.push(Line::from(Span::styled(
                    format!("battery temperature above {:.0} C shutoff", battery.shutoff_temperature),
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                )));
            }
        }
        None => lines.push(Line::from("Waiting first snapshot...")),
    }

    let updated = match model.received {
        Some(received) => format!(
            "updated {} via {:?}",
            received.at.format("%H:%M:%S"),
            received.origin
        ),
        None => "never updated".to_string(),
    };
    lines.push(Line::from(format!(
        "push={}  latest={}  {updated}  (q quit, r refresh)",
        push_label(model.push),
        sync_label(&model.latest_sync),
    )));

    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"))
}

fn render_series_chart(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    series: &SeriesView,
    title: &str,
    color: Color,
    now: DateTime<Utc>,
    window_hours: f64,
) {
    let points: Vec<(f64, f64)> = series
        .points
        .iter()
        .map(|p| ((p.timestamp - now).num_seconds() as f64 / 3600.0, p.value))
        .collect();

    let x_min = -window_hours;
    let x_max = 0.0;
    let y_bounds = value_bounds(&points);

    let dataset = Dataset::default()
        .name(series.kind.to_string())
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);

    let chart = Chart::new(vec![dataset])
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{title}  [{}]", sync_label(&series.sync))),
        )
        .x_axis(
            Axis::default()
                .title("hours")
                .style(Style::default().fg(Color::Gray))
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::raw(format!("{x_min:.0}h")),
                    Span::raw(format!("{:.0}h", x_min / 2.0)),
                    Span::raw("now"),
                ]),
        )
        .y_axis(
            Axis::default()
                .title(series.kind.unit())
                .style(Style::default().fg(Color::Gray))
                .bounds(y_bounds)
                .labels(vec![
                    Span::raw(format!("{:.1}", y_bounds[0])),
                    Span::raw(format!("{:.1}", (y_bounds[0] + y_bounds[1]) / 2.0)),
                    Span::raw(format!("{:.1}", y_bounds[1])),
                ]),
        );

    frame.render_widget(chart, area);
}

fn value_bounds(points: &[(f64, f64)]) -> [f64; 2] {
    if points.is_empty() {
        return [0.0, 1.0];
    }
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for (_, y) in points {
        min = min.min(*y);
        max = max.max(*y);
    }
    if (max - min).abs() < f64::EPSILON {
        [min - 1.0, max + 1.0]
    } else {
        let pad = (max - min) * 0.12;
        [min - pad, max + pad]
    }
}

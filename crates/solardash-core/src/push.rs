//! Push feed plumbing.
//!
//! The controller streams full snapshots as `text/event-stream`. This module
//! owns the stream parsing, the transport seam the coordinator talks to, and
//! the policy that decides whether a dropped feed is reopened.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// `message` when the server sent no `event:` line.
    pub event: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The server ended the stream.
    ServerClosed,
    /// Network or protocol failure underneath the stream.
    TransportError(String),
    /// We shut the feed down ourselves.
    ClientClosed,
}

impl DisconnectReason {
    fn rule_key(&self) -> DisconnectKind {
        match self {
            Self::ServerClosed => DisconnectKind::ServerClosed,
            Self::TransportError(_) => DisconnectKind::TransportError,
            Self::ClientClosed => DisconnectKind::ClientClosed,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerClosed => f.write_str("server closed the feed"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::ClientClosed => f.write_str("closed by client"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    Event(ServerEvent),
    Closed(DisconnectReason),
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to open push feed at {url}: {reason}")]
    ConnectFailed { url: String, reason: String },
    #[error("push client setup failed: {0}")]
    Setup(String),
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, PushError>;
}

#[async_trait]
pub trait PushConnection: Send {
    /// Next event, or the reason the feed ended. Once `Closed` is returned the
    /// connection is spent.
    async fn next_event(&mut self) -> PushMessage;
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a full line is available, so a UTF-8 sequence
/// split across chunks decodes intact.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(ServerEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Server-sent events over a long-lived GET.
#[derive(Debug, Clone)]
pub struct SsePushTransport {
    url: String,
    client: Client,
}

impl SsePushTransport {
    /// `client` should not carry a request timeout; the stream is meant to stay open.
    pub fn new(base_url: &str, path: &str, client: Client) -> Self {
        Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
            client,
        }
    }

    /// Builds its own client that only bounds connection setup.
    pub fn with_connect_timeout(
        base_url: &str,
        path: &str,
        connect_timeout: Duration,
    ) -> Result<Self, PushError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| PushError::Setup(e.to_string()))?;
        Ok(Self::new(base_url, path, client))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushTransport for SsePushTransport {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, PushError> {
        let connect_failed = |reason: String| PushError::ConnectFailed {
            url: self.url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| connect_failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(connect_failed(format!("status {}", response.status())));
        }

        info!(url = %self.url, "push feed opened");
        Ok(Box::new(SseConnection {
            response: Some(response),
            parser: EventStreamParser::new(),
            pending: VecDeque::new(),
        }))
    }
}

struct SseConnection {
    response: Option<Response>,
    parser: EventStreamParser,
    pending: VecDeque<ServerEvent>,
}

#[async_trait]
impl PushConnection for SseConnection {
    async fn next_event(&mut self) -> PushMessage {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return PushMessage::Event(event);
            }

            let Some(response) = self.response.as_mut() else {
                return PushMessage::Closed(DisconnectReason::ServerClosed);
            };

            match response.chunk().await {
                Ok(Some(bytes)) => {
                    self.pending.extend(self.parser.push(&bytes));
                }
                Ok(None) => {
                    debug!("push feed reached end of stream");
                    self.response = None;
                    // A trailing event without its blank line still counts.
                    self.pending.extend(self.parser.push(b"\n\n"));
                    if let Some(event) = self.pending.pop_front() {
                        return PushMessage::Event(event);
                    }
                    return PushMessage::Closed(DisconnectReason::ServerClosed);
                }
                Err(e) => {
                    self.response = None;
                    return PushMessage::Closed(DisconnectReason::TransportError(e.to_string()));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectRule {
    Never,
    Immediate,
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisconnectKind {
    ServerClosed,
    TransportError,
    ClientClosed,
}

/// What to do after the feed drops, keyed by why it dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_server_close_rule")]
    pub on_server_close: ReconnectRule,
    #[serde(default = "default_transport_error_rule")]
    pub on_transport_error: ReconnectRule,
    #[serde(default = "default_client_close_rule")]
    pub on_client_close: ReconnectRule,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

fn default_server_close_rule() -> ReconnectRule {
    ReconnectRule::Immediate
}

fn default_transport_error_rule() -> ReconnectRule {
    ReconnectRule::Backoff
}

fn default_client_close_rule() -> ReconnectRule {
    ReconnectRule::Never
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            on_server_close: default_server_close_rule(),
            on_transport_error: default_transport_error_rule(),
            on_client_close: default_client_close_rule(),
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl ReconnectPolicy {
    /// One immediate reconnect when the server hangs up, nothing otherwise.
    pub fn legacy() -> Self {
        Self {
            on_server_close: ReconnectRule::Immediate,
            on_transport_error: ReconnectRule::Never,
            on_client_close: ReconnectRule::Never,
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn rule(&self, reason: &DisconnectReason) -> ReconnectRule {
        match reason.rule_key() {
            DisconnectKind::ServerClosed => self.on_server_close,
            DisconnectKind::TransportError => self.on_transport_error,
            DisconnectKind::ClientClosed => self.on_client_close,
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based), or `None`
    /// when the feed should stay down.
    pub fn next_delay(&self, reason: &DisconnectReason, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        match self.rule(reason) {
            ReconnectRule::Never => None,
            ReconnectRule::Immediate => Some(Duration::ZERO),
            ReconnectRule::Backoff => {
                let factor = 2u32.saturating_pow(attempt - 1);
                Some(self.initial_backoff.saturating_mul(factor).min(self.max_backoff))
            }
        }
    }
}

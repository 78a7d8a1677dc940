//! Guard outcomes, settings and the status payload.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3939";
pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 10_000;

const STATUS_PATH: &str = "/status";
const STREAM_PATH: &str = "/ws";

/// Why a guard is (in)active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardReason {
    None,
    InvalidUrl,
    ServerError,
    Offline,
    Idle,
    Waiting,
}

impl GuardReason {
    /// Copy shown in the unlock UI. Raw transport errors never reach users.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::None => "An agent is working. This site stays unlocked while it does.",
            Self::InvalidUrl => "The status server address is not a valid http(s) URL.",
            Self::ServerError => "The status server responded with an error.",
            Self::Offline => "The status server is offline or unreachable.",
            Self::Idle => "No agent is working right now.",
            Self::Waiting => "An agent is waiting for your input.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardState {
    pub active: bool,
    pub reason: GuardReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GuardState {
    pub fn active() -> Self {
        Self {
            active: true,
            reason: GuardReason::None,
            message: None,
        }
    }

    pub fn inactive(reason: GuardReason) -> Self {
        Self {
            active: false,
            reason,
            message: None,
        }
    }

    pub fn offline() -> Self {
        Self::inactive(GuardReason::Offline)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Interpret a status report.
    pub fn from_status(status: &StatusPayload, unlock_on_waiting: bool) -> Self {
        if status.active.unwrap_or(false) {
            return Self::active();
        }
        if status.waiting_for_input.unwrap_or(0) > 0 {
            if unlock_on_waiting {
                return Self::active();
            }
            return Self::inactive(GuardReason::Waiting);
        }
        Self::inactive(GuardReason::Idle)
    }
}

/// Body of the status endpoint and of every stream message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub waiting_for_input: Option<u32>,
}

impl StatusPayload {
    /// A payload carrying neither field says nothing about activity.
    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.waiting_for_input.is_none()
    }
}

/// Parse a stream message. Unparseable and empty payloads yield `None`.
pub fn parse_stream_message(text: &str, unlock_on_waiting: bool) -> Option<GuardState> {
    let payload: StatusPayload = serde_json::from_str(text).ok()?;
    if payload.is_empty() {
        return None;
    }
    Some(GuardState::from_status(&payload, unlock_on_waiting))
}

/// Settings of an agent-activity unlock method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardSettings {
    pub server_url: String,
    /// Treat "agent waiting for input" as unlocked.
    pub unlock_on_waiting: bool,
    pub timeout_ms: u64,
    /// Method-specific poll interval; 5s when unset.
    pub poll_interval_ms: Option<u64>,
    pub heartbeat_interval_ms: u64,
    pub ping_interval_ms: u64,
    /// Use the streaming endpoint alongside polling.
    pub streaming: bool,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            unlock_on_waiting: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: None,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            streaming: true,
        }
    }
}

impl GuardSettings {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS).max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    /// The configured server as an http(s) URL with a host.
    pub fn server(&self) -> Option<Url> {
        let trimmed = self.server_url.trim();
        if trimmed.is_empty() {
            return None;
        }
        let url = Url::parse(trimmed).ok()?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
            return None;
        }
        Some(url)
    }

    pub fn status_url(&self) -> Option<Url> {
        self.server().map(|url| with_path(url, STATUS_PATH))
    }

    /// Same host and port as the server, `ws`/`wss` scheme, stream path.
    pub fn stream_url(&self) -> Option<Url> {
        let url = self.server()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        let mut url = with_path(url, STREAM_PATH);
        url.set_scheme(scheme).ok()?;
        Some(url)
    }
}

fn with_path(mut url: Url, suffix: &str) -> Url {
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}{}", base, suffix));
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_work_wins_over_waiting() {
        let status = StatusPayload {
            active: Some(true),
            waiting_for_input: Some(2),
        };
        assert_eq!(GuardState::from_status(&status, false), GuardState::active());
    }

    #[test]
    fn waiting_depends_on_opt_in() {
        let status = StatusPayload {
            active: Some(false),
            waiting_for_input: Some(1),
        };
        assert_eq!(
            GuardState::from_status(&status, false),
            GuardState::inactive(GuardReason::Waiting)
        );
        assert_eq!(GuardState::from_status(&status, true), GuardState::active());
    }

    #[test]
    fn nothing_running_is_idle() {
        let status = StatusPayload {
            active: Some(false),
            waiting_for_input: Some(0),
        };
        assert_eq!(
            GuardState::from_status(&status, true),
            GuardState::inactive(GuardReason::Idle)
        );
    }

    #[test]
    fn stream_messages_ignore_noise() {
        assert_eq!(parse_stream_message("not json", false), None);
        assert_eq!(parse_stream_message(r#"{"type":"pong"}"#, false), None);
        assert_eq!(parse_stream_message("[]", false), None);
        assert_eq!(
            parse_stream_message(r#"{"active":true,"waitingForInput":0,"sessions":3}"#, false),
            Some(GuardState::active())
        );
        assert_eq!(
            parse_stream_message(r#"{"waitingForInput":1}"#, false),
            Some(GuardState::inactive(GuardReason::Waiting))
        );
    }

    #[test]
    fn reason_serializes_snake_case() {
        let state = GuardState::inactive(GuardReason::ServerError).with_message("HTTP 503");
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"active":false,"reason":"server_error","message":"HTTP 503"}"#);
        let idle = serde_json::to_string(&GuardState::inactive(GuardReason::Idle)).unwrap();
        assert_eq!(idle, r#"{"active":false,"reason":"idle"}"#);
    }

    #[test]
    fn derives_status_and_stream_urls() {
        let settings = GuardSettings::new("http://localhost:4321/");
        assert_eq!(settings.status_url().unwrap().as_str(), "http://localhost:4321/status");
        assert_eq!(settings.stream_url().unwrap().as_str(), "ws://localhost:4321/ws");

        let settings = GuardSettings::new("https://agents.example.com/api?x=1");
        assert_eq!(
            settings.status_url().unwrap().as_str(),
            "https://agents.example.com/api/status"
        );
        assert_eq!(settings.stream_url().unwrap().as_str(), "wss://agents.example.com/api/ws");
    }

    #[test]
    fn rejects_malformed_server_urls() {
        for bad in ["", "   ", "localhost:4321", "ftp://host/", "not a url", "http://"] {
            assert_eq!(GuardSettings::new(bad).status_url(), None, "{:?}", bad);
        }
    }

    #[test]
    fn settings_defaults_fill_missing_fields() {
        let settings: GuardSettings =
            serde_json::from_str(r#"{"serverUrl":"http://127.0.0.1:1"}"#).unwrap();
        assert_eq!(settings.poll_interval(), Duration::from_secs(5));
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(settings.ping_interval(), Duration::from_secs(10));
        assert!(settings.streaming);
        assert!(!settings.unlock_on_waiting);
    }
}

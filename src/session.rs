//! Session and event data model.
//!
//! Sessions are handed to the analyzers fully materialized; this module also
//! provides the JSON / JSON-lines loaders used by the CLI.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::enrichment::Enrichment;

/// Event type carrying interactive command text.
pub const COMMAND_INPUT_EVENT: &str = "cowrie.command.input";

/// Aggregated view of one honeypot interaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(alias = "id")]
    pub session_id: String,
    #[serde(default, alias = "first_event_ts", alias = "start_time")]
    pub first_event_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "last_event_ts", alias = "end_time")]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub command_count: u64,
    #[serde(default, alias = "login_attempts")]
    pub login_attempt_count: u64,
    #[serde(default, alias = "file_downloads")]
    pub file_download_count: u64,
    #[serde(default, alias = "src_ip")]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub passwords: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub enrichment: Enrichment,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Session duration in seconds; 0 when either timestamp is missing or
    /// the bounds are inverted.
    pub fn duration_seconds(&self) -> f64 {
        match (self.first_event_at, self.last_event_at) {
            (Some(first), Some(last)) if last >= first => {
                last.signed_duration_since(first).num_milliseconds() as f64 / 1000.0
            }
            _ => 0.0,
        }
    }

    /// Raw source address text: the session field first, then providers.
    pub fn source_ip_text(&self) -> Option<&str> {
        self.source_ip
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.enrichment.source_ip())
    }

    /// Parsed source address, if one is recoverable and syntactically valid.
    pub fn source_addr(&self) -> Option<IpAddr> {
        self.source_ip_text().and_then(|s| s.trim().parse().ok())
    }

    /// Reference timestamp for timing analysis.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.first_event_at.or(self.last_event_at)
    }
}

/// One raw log record belonging to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub session_id: String,
    #[serde(alias = "eventid")]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Builds a command-input event.
    pub fn command(
        session_id: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
        input: impl Into<String>,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("input".to_string(), Value::String(input.into()));
        Self {
            session_id: session_id.into(),
            event_type: COMMAND_INPUT_EVENT.to_string(),
            timestamp,
            payload,
        }
    }

    /// Trimmed command text for command-input events.
    pub fn command_input(&self) -> Option<&str> {
        if self.event_type != COMMAND_INPUT_EVENT {
            return None;
        }
        self.payload
            .get("input")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Loads sessions from a JSON array or JSON-lines file.
pub fn load_sessions(path: &Path) -> Result<Vec<Session>> {
    load_records(path)
}

/// Loads events from a JSON array or JSON-lines file.
pub fn load_events(path: &Path) -> Result<Vec<Event>> {
    load_records(path)
}

fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    parse_records(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parses a JSON array, or one JSON object per non-blank line.
pub fn parse_records<T: DeserializeOwned>(content: &str) -> Result<Vec<T>> {
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content).context("Invalid JSON array");
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid JSON on line {}", i + 1))
        })
        .collect()
}

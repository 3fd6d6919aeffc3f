//! Best-effort link health snapshot
//!
//! A single JSON file, overwritten on every significant event, for offline
//! inspection by humans. The link never reads it back and a write failure
//! never affects link behavior.

use crate::state::LinkState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// The snapshot written to disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkDiagnostics {
    pub state: String,
    pub station_id: Option<String>,
    pub last_hello_at: Option<DateTime<Utc>>,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub last_pong_at: Option<DateTime<Utc>>,
    pub last_reconnect_at: Option<DateTime<Utc>>,
    pub reconnect_failures: u64,
    pub consecutive_misses: u32,
}

/// Writes [`LinkDiagnostics`] snapshots; `None` path disables recording
pub struct DiagnosticsRecorder {
    path: Option<PathBuf>,
    snapshot: LinkDiagnostics,
}

impl DiagnosticsRecorder {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            snapshot: LinkDiagnostics::default(),
        }
    }

    pub fn snapshot(&self) -> &LinkDiagnostics {
        &self.snapshot
    }

    pub fn mark_hello(&mut self) {
        self.snapshot.last_hello_at = Some(Utc::now());
        self.write();
    }

    pub fn mark_ping(&mut self) {
        self.snapshot.last_ping_at = Some(Utc::now());
        self.write();
    }

    pub fn mark_pong(&mut self, consecutive_misses: u32) {
        self.snapshot.last_pong_at = Some(Utc::now());
        self.snapshot.consecutive_misses = consecutive_misses;
        self.write();
    }

    pub fn mark_reconnect(&mut self, failures: u64) {
        self.snapshot.last_reconnect_at = Some(Utc::now());
        self.snapshot.reconnect_failures = failures;
        self.write();
    }

    pub fn set_state(&mut self, state: LinkState, station_id: Option<&str>) {
        self.snapshot.state = state.as_str().to_string();
        self.snapshot.station_id = station_id.map(str::to_string);
        self.write();
    }

    pub fn set_misses(&mut self, consecutive_misses: u32) {
        self.snapshot.consecutive_misses = consecutive_misses;
        self.write();
    }

    fn write(&self) {
        let Some(path) = &self.path else {
            return;
        };
        match serde_json::to_string_pretty(&self.snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(path = %path.display(), error = %e, "diagnostics write failed");
                }
            }
            Err(e) => warn!(error = %e, "diagnostics serialization failed"),
        }
    }
}

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::atomic_io::write_text_atomic;
use crate::lock_unpoisoned;
use crate::time_utils::current_unix_timestamp_ms;

const TELEMETRY_SNAPSHOT_SCHEMA_VERSION: u32 = 1;
const TELEMETRY_RECENT_ERRORS_CAP: usize = 32;

fn telemetry_snapshot_schema_version() -> u32 {
    TELEMETRY_SNAPSHOT_SCHEMA_VERSION
}

/// Reported liveness of one platform connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStatus {
    Starting,
    Connected,
    Idle,
    Degraded,
    Fatal,
    Stopped,
}

impl PlatformStatus {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Idle => "idle",
            Self::Degraded => "degraded",
            Self::Fatal => "fatal",
            Self::Stopped => "stopped",
        }
    }
}

/// One executed action, as reported to the telemetry sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResultRecord {
    pub tenant_id: String,
    pub platform: String,
    pub action_kind: String,
    pub trigger_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Fire-and-forget sink consumed by every runtime component.
///
/// Implementations must never fail or panic; recording telemetry is always
/// best-effort.
pub trait TelemetrySink: Send + Sync {
    /// Records one ingested, normalized event.
    fn record_event(&self, tenant_id: &str, platform: &str);
    /// Records an internal error surfaced at a component boundary.
    fn record_error(&self, component: &str, detail: &str);
    /// Records a platform connection status change.
    fn record_platform_status(&self, tenant_id: &str, platform: &str, status: PlatformStatus);
    /// Records the outcome of one executed action descriptor.
    fn record_action_result(&self, record: ActionResultRecord);
    /// Records a clip-job state change keyed by job id.
    fn record_job_state(&self, job_id: &str, state: &str);
}

/// Sink that drops everything; used where telemetry is not wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_event(&self, _tenant_id: &str, _platform: &str) {}
    fn record_error(&self, _component: &str, _detail: &str) {}
    fn record_platform_status(&self, _tenant_id: &str, _platform: &str, _status: PlatformStatus) {}
    fn record_action_result(&self, _record: ActionResultRecord) {}
    fn record_job_state(&self, _job_id: &str, _state: &str) {}
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
/// Per-platform slice of the published snapshot.
pub struct TelemetryPlatformEntry {
    pub platform: String,
    pub tenant_id: String,
    pub status: String,
    #[serde(default)]
    pub events_ingested: u64,
    #[serde(default)]
    pub updated_unix_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
/// Per-tenant slice of the published snapshot.
pub struct TelemetryCreatorEntry {
    pub tenant_id: String,
    #[serde(default)]
    pub events_ingested: u64,
    #[serde(default)]
    pub actions_succeeded: u64,
    #[serde(default)]
    pub actions_failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
/// Per-job slice of the published snapshot.
pub struct TelemetryJobEntry {
    pub job_id: String,
    pub state: String,
    #[serde(default)]
    pub updated_unix_ms: u64,
}

/// Externally published JSON snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    #[serde(default = "telemetry_snapshot_schema_version")]
    pub schema_version: u32,
    pub generated_at: u64,
    #[serde(default)]
    pub platforms: Vec<TelemetryPlatformEntry>,
    #[serde(default)]
    pub creators: Vec<TelemetryCreatorEntry>,
    #[serde(default)]
    pub jobs: Vec<TelemetryJobEntry>,
    #[serde(default)]
    pub restart_intent: bool,
    #[serde(default)]
    pub recent_errors: Vec<String>,
}

#[derive(Debug, Default)]
struct TelemetryState {
    platforms: BTreeMap<(String, String), TelemetryPlatformEntry>,
    creators: BTreeMap<String, TelemetryCreatorEntry>,
    jobs: BTreeMap<String, TelemetryJobEntry>,
    recent_errors: Vec<String>,
    restart_intent: bool,
}

/// In-memory recorder backing the published snapshot document.
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    state: Mutex<TelemetryState>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags that the process intends to restart; surfaced in the snapshot.
    pub fn set_restart_intent(&self, intent: bool) {
        lock_unpoisoned(&self.state).restart_intent = intent;
    }

    /// Builds the externally published snapshot from current counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = lock_unpoisoned(&self.state);
        TelemetrySnapshot {
            schema_version: TELEMETRY_SNAPSHOT_SCHEMA_VERSION,
            generated_at: current_unix_timestamp_ms(),
            platforms: state.platforms.values().cloned().collect(),
            creators: state.creators.values().cloned().collect(),
            jobs: state.jobs.values().cloned().collect(),
            restart_intent: state.restart_intent,
            recent_errors: state.recent_errors.clone(),
        }
    }

    /// Writes the snapshot atomically to `path` as pretty JSON.
    pub fn publish_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let mut payload = serde_json::to_string_pretty(&snapshot)
            .context("failed to encode telemetry snapshot")?;
        payload.push('\n');
        write_text_atomic(path, payload.as_str())
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl TelemetrySink for InMemoryTelemetry {
    fn record_event(&self, tenant_id: &str, platform: &str) {
        let mut state = lock_unpoisoned(&self.state);
        let key = (tenant_id.to_string(), platform.to_string());
        let entry = state.platforms.entry(key).or_insert_with(|| {
            TelemetryPlatformEntry {
                platform: platform.to_string(),
                tenant_id: tenant_id.to_string(),
                status: PlatformStatus::Starting.as_str().to_string(),
                ..TelemetryPlatformEntry::default()
            }
        });
        entry.events_ingested = entry.events_ingested.saturating_add(1);
        entry.updated_unix_ms = current_unix_timestamp_ms();
        let creator = state
            .creators
            .entry(tenant_id.to_string())
            .or_insert_with(|| TelemetryCreatorEntry {
                tenant_id: tenant_id.to_string(),
                ..TelemetryCreatorEntry::default()
            });
        creator.events_ingested = creator.events_ingested.saturating_add(1);
    }

    fn record_error(&self, component: &str, detail: &str) {
        let mut state = lock_unpoisoned(&self.state);
        state.recent_errors.push(format!("{component}: {detail}"));
        while state.recent_errors.len() > TELEMETRY_RECENT_ERRORS_CAP {
            state.recent_errors.remove(0);
        }
    }

    fn record_platform_status(&self, tenant_id: &str, platform: &str, status: PlatformStatus) {
        let mut state = lock_unpoisoned(&self.state);
        let key = (tenant_id.to_string(), platform.to_string());
        let entry = state.platforms.entry(key).or_insert_with(|| {
            TelemetryPlatformEntry {
                platform: platform.to_string(),
                tenant_id: tenant_id.to_string(),
                ..TelemetryPlatformEntry::default()
            }
        });
        entry.status = status.as_str().to_string();
        entry.updated_unix_ms = current_unix_timestamp_ms();
    }

    fn record_action_result(&self, record: ActionResultRecord) {
        let mut state = lock_unpoisoned(&self.state);
        let creator = state
            .creators
            .entry(record.tenant_id.clone())
            .or_insert_with(|| TelemetryCreatorEntry {
                tenant_id: record.tenant_id.clone(),
                ..TelemetryCreatorEntry::default()
            });
        if record.success {
            creator.actions_succeeded = creator.actions_succeeded.saturating_add(1);
        } else {
            creator.actions_failed = creator.actions_failed.saturating_add(1);
            if let Some(error) = record.error.as_deref() {
                state.recent_errors.push(format!(
                    "action_executor: platform={} kind={} trigger={} error={error}",
                    record.platform, record.action_kind, record.trigger_id
                ));
                while state.recent_errors.len() > TELEMETRY_RECENT_ERRORS_CAP {
                    state.recent_errors.remove(0);
                }
            }
        }
    }

    fn record_job_state(&self, job_id: &str, state_label: &str) {
        let mut state = lock_unpoisoned(&self.state);
        let entry = state
            .jobs
            .entry(job_id.to_string())
            .or_insert_with(|| TelemetryJobEntry {
                job_id: job_id.to_string(),
                ..TelemetryJobEntry::default()
            });
        entry.state = state_label.to_string();
        entry.updated_unix_ms = current_unix_timestamp_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_snapshot_reflects_recorded_events_and_statuses() {
        let telemetry = InMemoryTelemetry::new();
        telemetry.record_event("creator-1", "twitch");
        telemetry.record_event("creator-1", "twitch");
        telemetry.record_platform_status("creator-1", "twitch", PlatformStatus::Connected);
        telemetry.record_job_state("clip-ab12cd34", "queued");

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.schema_version, 1);
        assert_eq!(snapshot.platforms.len(), 1);
        assert_eq!(snapshot.platforms[0].events_ingested, 2);
        assert_eq!(snapshot.platforms[0].status, "connected");
        assert_eq!(snapshot.creators[0].events_ingested, 2);
        assert_eq!(snapshot.jobs[0].state, "queued");
        assert!(!snapshot.restart_intent);
    }

    #[test]
    fn unit_recent_errors_are_capped() {
        let telemetry = InMemoryTelemetry::new();
        for index in 0..100 {
            telemetry.record_error("test", &format!("error {index}"));
        }
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.recent_errors.len(), TELEMETRY_RECENT_ERRORS_CAP);
        assert!(snapshot.recent_errors.last().expect("last").contains("99"));
    }

    #[test]
    fn functional_publish_snapshot_round_trips_through_disk() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("snapshots/telemetry.json");
        let telemetry = InMemoryTelemetry::new();
        telemetry.record_event("creator-1", "youtube");
        telemetry.set_restart_intent(true);
        telemetry.publish_snapshot(&path).expect("publish");

        let raw = std::fs::read_to_string(&path).expect("read");
        let parsed: TelemetrySnapshot = serde_json::from_str(&raw).expect("parse");
        assert!(parsed.restart_intent);
        assert_eq!(parsed.creators.len(), 1);
    }
}

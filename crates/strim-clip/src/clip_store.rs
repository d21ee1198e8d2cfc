use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use strim_core::{
    append_jsonl_record, current_unix_timestamp_ms, generate_short_token, lock_unpoisoned,
    write_text_atomic,
};
use strim_events::Platform;

use crate::clip_title::build_clip_title;

const CLIP_ID_LENGTH: usize = 8;
const CLIP_ID_COLLISION_ATTEMPTS: usize = 16;
const MANIFEST_DIR: &str = "manifests";
const EVENTS_FILE: &str = "clip_events.jsonl";
const RESTART_RECOVERY_REASON: &str = "requeued_after_restart";

/// Lifecycle of a clip record.
///
/// The forward path is strict: `queued → encoding → encoded → uploading →
/// published`. `failed` is reachable from every non-terminal state and is a
/// terminal sink; a failed clip is only recoverable through a fresh enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipState {
    Queued,
    Encoding,
    Encoded,
    Uploading,
    Published,
    Failed,
}

impl ClipState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Encoding => "encoding",
            Self::Encoded => "encoded",
            Self::Uploading => "uploading",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Failed)
    }

    fn next_forward(&self) -> Option<ClipState> {
        match self {
            Self::Queued => Some(Self::Encoding),
            Self::Encoding => Some(Self::Encoded),
            Self::Encoded => Some(Self::Uploading),
            Self::Uploading => Some(Self::Published),
            Self::Published | Self::Failed => None,
        }
    }

    pub fn can_transition_to(&self, next: ClipState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        self.next_forward() == Some(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipSource {
    /// Path of the recorded stream segment to cut from.
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub start_offset_seconds: u64,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRequester {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipDestination {
    pub platform: Platform,
    pub channel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipHistoryEntry {
    pub state: ClipState,
    pub reason: String,
    pub unix_ms: u64,
}

/// One clip job. Mutated exclusively through [`ClipStore`]; never deleted,
/// only superseded by newer records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub clip_id: String,
    pub tenant_id: String,
    pub title: String,
    pub source: ClipSource,
    pub requester: ClipRequester,
    pub destination: ClipDestination,
    pub state: ClipState,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub published_url: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub requested_unix_ms: u64,
    pub updated_unix_ms: u64,
    #[serde(default)]
    pub history: Vec<ClipHistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct ClipEnqueueRequest {
    pub tenant_id: String,
    pub source: ClipSource,
    pub requester: ClipRequester,
    pub title_max_length: usize,
}

/// Mutation accompanying a state transition.
#[derive(Debug, Clone, Default)]
pub struct ClipStateUpdate {
    pub reason: String,
    pub output_path: Option<String>,
    pub published_url: Option<String>,
    pub error: Option<String>,
}

impl ClipStateUpdate {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_published_url(mut self, url: impl Into<String>) -> Self {
        self.published_url = Some(url.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct ClipTransitionEvent<'a> {
    clip_id: &'a str,
    tenant_id: &'a str,
    from: &'a str,
    to: &'a str,
    reason: &'a str,
    unix_ms: u64,
}

/// Durable clip store: in-memory index over one pretty-JSON manifest per clip
/// plus an append-only JSONL transition log. All mutation happens under one
/// mutex, which makes `claim_queued` an atomic ownership transfer.
pub struct ClipStore {
    root: PathBuf,
    records: Mutex<BTreeMap<String, ClipRecord>>,
}

impl ClipStore {
    /// Opens (or creates) the store rooted at `root`, loading any manifests
    /// persisted by an earlier run.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let manifest_dir = root.join(MANIFEST_DIR);
        std::fs::create_dir_all(&manifest_dir)
            .with_context(|| format!("failed to create clip store at {}", root.display()))?;
        let mut records = BTreeMap::new();
        let mut interrupted = Vec::new();
        for entry in std::fs::read_dir(&manifest_dir)
            .with_context(|| format!("failed to read {}", manifest_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read clip manifest {}", path.display()))?;
            let record: ClipRecord = serde_json::from_str(&text)
                .with_context(|| format!("invalid clip manifest {}", path.display()))?;
            if record.state != ClipState::Queued && !record.state.is_terminal() {
                interrupted.push(record.clip_id.clone());
            }
            records.insert(record.clip_id.clone(), record);
        }
        let store = Self {
            root,
            records: Mutex::new(records),
        };
        store.requeue_interrupted(&interrupted)?;
        Ok(store)
    }

    /// Returns records that a previous process left mid-pipeline to `queued`
    /// so a restarted worker claims them again instead of losing the work.
    fn requeue_interrupted(&self, clip_ids: &[String]) -> Result<()> {
        let mut records = lock_unpoisoned(&self.records);
        for clip_id in clip_ids {
            let Some(record) = records.get_mut(clip_id) else {
                continue;
            };
            let from = record.state;
            let now_ms = current_unix_timestamp_ms();
            record.state = ClipState::Queued;
            record.updated_unix_ms = now_ms;
            record.history.push(ClipHistoryEntry {
                state: ClipState::Queued,
                reason: RESTART_RECOVERY_REASON.to_string(),
                unix_ms: now_ms,
            });
            info!(
                clip_id = clip_id.as_str(),
                from = from.as_str(),
                "requeued clip interrupted by restart"
            );
            let snapshot = record.clone();
            self.persist(&snapshot)?;
            self.append_event(&snapshot, from, RESTART_RECOVERY_REASON)?;
        }
        Ok(())
    }

    fn manifest_path(&self, clip_id: &str) -> PathBuf {
        self.root.join(MANIFEST_DIR).join(format!("{clip_id}.json"))
    }

    fn events_path(&self) -> PathBuf {
        self.root.join(EVENTS_FILE)
    }

    fn persist(&self, record: &ClipRecord) -> Result<()> {
        let body = serde_json::to_string_pretty(record)
            .context("failed to serialize clip manifest")?;
        write_text_atomic(&self.manifest_path(&record.clip_id), &body)
    }

    fn append_event(&self, record: &ClipRecord, from: ClipState, reason: &str) -> Result<()> {
        let event = ClipTransitionEvent {
            clip_id: &record.clip_id,
            tenant_id: &record.tenant_id,
            from: from.as_str(),
            to: record.state.as_str(),
            reason,
            unix_ms: record.updated_unix_ms,
        };
        append_jsonl_record(&self.events_path(), &event)
    }

    /// Creates a new record in `queued` with a collision-retried id and a
    /// length-bounded title.
    pub fn enqueue(
        &self,
        request: ClipEnqueueRequest,
        destination: ClipDestination,
    ) -> Result<ClipRecord> {
        let now_ms = current_unix_timestamp_ms();
        let mut records = lock_unpoisoned(&self.records);
        let mut clip_id = None;
        for _ in 0..CLIP_ID_COLLISION_ATTEMPTS {
            let candidate = generate_short_token(CLIP_ID_LENGTH);
            if !records.contains_key(&candidate) && !self.manifest_path(&candidate).exists() {
                clip_id = Some(candidate);
                break;
            }
        }
        let Some(clip_id) = clip_id else {
            bail!("failed to generate a unique clip id after {CLIP_ID_COLLISION_ATTEMPTS} attempts");
        };
        let date = chrono::Utc::now().format("%Y%m%d").to_string();
        let title = build_clip_title(
            &request.source.title,
            &request.requester.name,
            &date,
            &clip_id,
            request.title_max_length,
        );
        let record = ClipRecord {
            clip_id: clip_id.clone(),
            tenant_id: request.tenant_id,
            title,
            source: request.source,
            requester: request.requester,
            destination,
            state: ClipState::Queued,
            output_path: None,
            published_url: None,
            last_error: None,
            requested_unix_ms: now_ms,
            updated_unix_ms: now_ms,
            history: vec![ClipHistoryEntry {
                state: ClipState::Queued,
                reason: "enqueued".to_string(),
                unix_ms: now_ms,
            }],
        };
        self.persist(&record)?;
        append_jsonl_record(
            &self.events_path(),
            &ClipTransitionEvent {
                clip_id: &record.clip_id,
                tenant_id: &record.tenant_id,
                from: ClipState::Queued.as_str(),
                to: ClipState::Queued.as_str(),
                reason: "enqueued",
                unix_ms: now_ms,
            },
        )?;
        info!(
            clip_id = clip_id.as_str(),
            tenant_id = record.tenant_id.as_str(),
            "clip enqueued"
        );
        records.insert(clip_id, record.clone());
        Ok(record)
    }

    /// Atomically transitions up to `limit` queued records to `encoding` and
    /// returns them. A returned record belongs to the caller; no concurrent
    /// call can observe it as queued again.
    pub fn claim_queued(&self, limit: usize) -> Result<Vec<ClipRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut records = lock_unpoisoned(&self.records);
        let mut candidates: Vec<String> = records
            .values()
            .filter(|record| record.state == ClipState::Queued)
            .map(|record| record.clip_id.clone())
            .collect();
        candidates.sort_by_key(|clip_id| {
            records
                .get(clip_id)
                .map(|record| (record.requested_unix_ms, record.clip_id.clone()))
        });
        candidates.truncate(limit);
        let mut claimed = Vec::with_capacity(candidates.len());
        for clip_id in candidates {
            let Some(record) = records.get_mut(&clip_id) else {
                continue;
            };
            let now_ms = current_unix_timestamp_ms();
            record.state = ClipState::Encoding;
            record.updated_unix_ms = now_ms;
            record.history.push(ClipHistoryEntry {
                state: ClipState::Encoding,
                reason: "claimed".to_string(),
                unix_ms: now_ms,
            });
            let snapshot = record.clone();
            self.persist(&snapshot)?;
            self.append_event(&snapshot, ClipState::Queued, "claimed")?;
            claimed.push(snapshot);
        }
        Ok(claimed)
    }

    /// Validated state transition: appends history, persists the manifest
    /// atomically, and records the transition in the JSONL log.
    pub fn update_state(
        &self,
        clip_id: &str,
        next: ClipState,
        update: ClipStateUpdate,
    ) -> Result<ClipRecord> {
        let mut records = lock_unpoisoned(&self.records);
        let Some(record) = records.get_mut(clip_id) else {
            bail!("unknown clip id: {clip_id}");
        };
        let from = record.state;
        if !from.can_transition_to(next) {
            bail!(
                "invalid clip transition for {clip_id}: {} -> {}",
                from.as_str(),
                next.as_str()
            );
        }
        let now_ms = current_unix_timestamp_ms();
        record.state = next;
        record.updated_unix_ms = now_ms;
        if let Some(path) = update.output_path {
            record.output_path = Some(path);
        }
        if let Some(url) = update.published_url {
            record.published_url = Some(url);
        }
        if let Some(error) = update.error {
            record.last_error = Some(error);
        }
        record.history.push(ClipHistoryEntry {
            state: next,
            reason: update.reason.clone(),
            unix_ms: now_ms,
        });
        let snapshot = record.clone();
        self.persist(&snapshot)?;
        self.append_event(&snapshot, from, &update.reason)?;
        Ok(snapshot)
    }

    pub fn get(&self, clip_id: &str) -> Option<ClipRecord> {
        lock_unpoisoned(&self.records).get(clip_id).cloned()
    }

    /// All records, for telemetry snapshots.
    pub fn list(&self) -> Vec<ClipRecord> {
        lock_unpoisoned(&self.records).values().cloned().collect()
    }

    pub fn count_in_state(&self, state: ClipState) -> usize {
        lock_unpoisoned(&self.records)
            .values()
            .filter(|record| record.state == state)
            .count()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

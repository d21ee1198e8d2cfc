use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use strim_clip::{
    ClipEncoder, ClipRecord, ClipState, ClipStore, ClipUploader, ClipWorkerConfig,
    ClipWorkerSupervisor, PublishedClip,
};
use strim_core::{current_unix_timestamp_ms, InMemoryTelemetry, TelemetrySink};
use strim_events::{
    ActionDescriptor, ActionExecutor, ActionKind, ActionStatus, ClipCommandTrigger, EventAuthor,
    NormalizedEvent, Platform, TriggerRegistry, CLIP_JOB_TYPE,
};
use strim_ingest::{IngestAdapter, TwitchStreamAdapter, TwitchStreamConfig};
use strim_quota::CooldownLedger;
use strim_scheduler::{
    compile_limits, ClipJobDispatcher, JobAdmissionLedger, SubscriptionTier, TenantClipProfile,
    TenantLimits,
};

const TENANT: &str = "creator-1";

fn chat_event(text: &str) -> NormalizedEvent {
    NormalizedEvent::new(
        Platform::Twitch,
        TENANT,
        "#creator1",
        EventAuthor {
            id: "u-1".to_string(),
            name: "Viewer".to_string(),
            badges: Vec::new(),
            roles: Vec::new(),
        },
        text,
        current_unix_timestamp_ms(),
    )
}

fn profile(limits: TenantLimits) -> TenantClipProfile {
    TenantClipProfile {
        limits,
        recording_path: "/var/recordings/creator-1.ts".to_string(),
        channel_url: "https://twitch.tv/creator1".to_string(),
    }
}

struct RuntimeStack {
    store: Arc<ClipStore>,
    admission: Arc<JobAdmissionLedger>,
    executor: ActionExecutor,
    registry: TriggerRegistry,
    telemetry: Arc<InMemoryTelemetry>,
}

fn build_stack(data_dir: &Path, limits: TenantLimits) -> RuntimeStack {
    let store = Arc::new(ClipStore::open(data_dir.join("clips")).expect("open store"));
    let admission = Arc::new(JobAdmissionLedger::new());
    let dispatcher = Arc::new(ClipJobDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&admission),
        CooldownLedger::new(),
    ));
    dispatcher.register_tenant(TENANT, profile(limits.clone()));

    let telemetry = Arc::new(InMemoryTelemetry::new());
    let mut executor = ActionExecutor::new(telemetry.clone() as Arc<dyn TelemetrySink>);
    executor.register_dispatcher(dispatcher);

    let mut registry = TriggerRegistry::default();
    registry.register(Box::new(ClipCommandTrigger::new(
        limits.clip_max_duration_seconds,
    )));

    RuntimeStack {
        store,
        admission,
        executor,
        registry,
        telemetry,
    }
}

struct RecordingEncoder {
    durations: Mutex<Vec<u64>>,
}

#[async_trait]
impl ClipEncoder for RecordingEncoder {
    async fn encode(&self, record: &ClipRecord, output_dir: &Path) -> Result<PathBuf> {
        self.durations
            .lock()
            .expect("durations lock")
            .push(record.source.duration_seconds);
        tokio::fs::create_dir_all(output_dir).await?;
        let path = output_dir.join(format!("{}.mp4", record.clip_id));
        tokio::fs::write(&path, b"encoded").await?;
        Ok(path)
    }
}

struct StubUploader;

#[async_trait]
impl ClipUploader for StubUploader {
    async fn publish(&self, clip_id: &str, _path: &Path) -> Result<PublishedClip> {
        Ok(PublishedClip {
            url: format!("https://clips.local/{clip_id}.mp4"),
            detail: "stub upload".to_string(),
        })
    }
}

async fn wait_for_state(store: &ClipStore, clip_id: &str, state: ClipState) -> ClipRecord {
    for _ in 0..400 {
        if let Some(record) = store.get(clip_id) {
            if record.state == state {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("clip {clip_id} never reached {}", state.as_str());
}

/// Scenario A: an oversized duration request is capped at the tier limit and
/// never reaches the encoder uncapped.
#[tokio::test]
async fn scenario_oversized_clip_request_is_capped_before_encoding() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut limits = compile_limits(SubscriptionTier::Free);
    limits.clip_cooldown_seconds = 0;
    assert_eq!(limits.clip_max_duration_seconds, 30);
    let stack = build_stack(dir.path(), limits);

    let actions = stack.registry.process(&chat_event("!clip 500 wild moment"));
    assert_eq!(actions.len(), 1);
    let outcomes = stack.executor.execute(&actions, Platform::Twitch).await;
    assert!(outcomes[0].is_success(), "error: {:?}", outcomes[0].error);

    let records = stack.store.list();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source.duration_seconds, 30);

    let encoder = Arc::new(RecordingEncoder {
        durations: Mutex::new(Vec::new()),
    });
    let mut worker = ClipWorkerSupervisor::new(
        Arc::clone(&stack.store),
        Arc::clone(&encoder) as Arc<dyn ClipEncoder>,
        Arc::new(StubUploader),
        stack.telemetry.clone() as Arc<dyn TelemetrySink>,
        None,
        ClipWorkerConfig {
            poll_interval_ms: 5,
            concurrency: 1,
            output_dir: dir.path().join("encoded"),
        },
    );
    worker.start();
    wait_for_state(&stack.store, &records[0].clip_id, ClipState::Published).await;
    worker.stop().await;

    let durations = encoder.durations.lock().expect("durations lock").clone();
    assert_eq!(durations, vec![30], "500s request encodes at most 30s");
}

/// Scenario B: the cooldown rejects a second request inside the window and
/// accepts again after expiry.
#[tokio::test]
async fn scenario_cooldown_rejects_then_accepts_after_expiry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut limits = compile_limits(SubscriptionTier::Pro);
    limits.clip_cooldown_seconds = 1;
    let stack = build_stack(dir.path(), limits);

    let actions = stack.registry.process(&chat_event("!clip 10"));
    let outcomes = stack.executor.execute(&actions, Platform::Twitch).await;
    assert!(outcomes[0].is_success());

    let actions = stack.registry.process(&chat_event("!clip 10"));
    let outcomes = stack.executor.execute(&actions, Platform::Twitch).await;
    assert_eq!(outcomes[0].status, ActionStatus::Failed);
    assert!(outcomes[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("cooldown"));
    assert_eq!(stack.store.list().len(), 1, "rejected request stores nothing");

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let actions = stack.registry.process(&chat_event("!clip 10"));
    let outcomes = stack.executor.execute(&actions, Platform::Twitch).await;
    assert!(outcomes[0].is_success(), "accepted after the window elapsed");
    assert_eq!(stack.store.list().len(), 2);
}

/// Scenario C: three consecutive connection failures stop the adapter
/// permanently; no fourth connection is attempted.
#[tokio::test]
async fn scenario_repeated_connect_failures_stop_the_adapter() {
    let mut config = TwitchStreamConfig::new(TENANT, "#creator1");
    config.ws_url = "ws://127.0.0.1:1".to_string();
    config.backoff_base_ms = 1;
    config.backoff_cap_ms = 4;
    let mut adapter = TwitchStreamAdapter::new(config);

    let mut fatal_seen = false;
    for _ in 0..3 {
        if adapter.next_batch().await.expect_err("refused port").is_fatal() {
            fatal_seen = true;
            break;
        }
    }
    assert!(fatal_seen, "third failure escalates to fatal");
    assert_eq!(adapter.connect_attempts(), 3);

    let after = adapter.next_batch().await.expect_err("still fatal");
    assert!(after.is_fatal());
    assert_eq!(adapter.connect_attempts(), 3, "no fourth attempt");
}

/// Scenario D: a chat action for a platform with no registered sender yields
/// one failed outcome and nothing escapes the executor.
#[tokio::test]
async fn scenario_missing_sender_yields_failed_outcome() {
    let telemetry = Arc::new(InMemoryTelemetry::new());
    let executor = ActionExecutor::new(telemetry as Arc<dyn TelemetrySink>);
    let descriptor = ActionDescriptor {
        kind: ActionKind::SendChatMessage,
        platform: Some(Platform::Twitch),
        tenant_id: TENANT.to_string(),
        trigger_id: "greeting".to_string(),
        payload: json!({ "text": "hello chat", "channel": "#creator1" }),
        created_unix_ms: current_unix_timestamp_ms(),
    };

    let outcomes = executor.execute(&[descriptor], Platform::Twitch).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, ActionStatus::Failed);
    assert!(outcomes[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("sender"));
}

/// Full path: chat command through trigger, executor, dispatcher, store, and
/// worker to a published clip, with the admission slot released at the end.
#[tokio::test]
async fn scenario_chat_command_reaches_published_and_releases_admission() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut limits = compile_limits(SubscriptionTier::Pro);
    limits.clip_cooldown_seconds = 0;
    let stack = build_stack(dir.path(), limits);

    let actions = stack.registry.process(&chat_event("!clip 20 the big play"));
    let outcomes = stack.executor.execute(&actions, Platform::Twitch).await;
    assert!(outcomes[0].is_success());
    assert_eq!(stack.admission.active_count(TENANT, CLIP_JOB_TYPE), 1);

    let record = &stack.store.list()[0];
    assert!(record.title.contains("the big play"));

    let admission = Arc::clone(&stack.admission);
    let notifier: strim_clip::ClipNotifier = Arc::new(move |record: &ClipRecord| {
        if matches!(record.state, ClipState::Published | ClipState::Failed) {
            admission.job_finished(&record.tenant_id, CLIP_JOB_TYPE);
        }
        Ok(())
    });
    let mut worker = ClipWorkerSupervisor::new(
        Arc::clone(&stack.store),
        Arc::new(RecordingEncoder {
            durations: Mutex::new(Vec::new()),
        }),
        Arc::new(StubUploader),
        stack.telemetry.clone() as Arc<dyn TelemetrySink>,
        Some(notifier),
        ClipWorkerConfig {
            poll_interval_ms: 5,
            concurrency: 2,
            output_dir: dir.path().join("encoded"),
        },
    );
    worker.start();
    let published = wait_for_state(&stack.store, &record.clip_id, ClipState::Published).await;
    worker.stop().await;

    assert_eq!(
        published.published_url.as_deref(),
        Some(format!("https://clips.local/{}.mp4", record.clip_id).as_str())
    );
    assert_eq!(
        stack.admission.active_count(TENANT, CLIP_JOB_TYPE),
        0,
        "terminal transition releases the slot"
    );

    let snapshot = stack.telemetry.snapshot();
    assert!(snapshot
        .jobs
        .iter()
        .any(|job| job.job_id == record.clip_id && job.state == "published"));
}

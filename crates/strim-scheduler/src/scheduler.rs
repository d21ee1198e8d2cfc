use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use strim_clip::{
    ClipRecord, ClipState, ClipStore, ClipWorkerConfig, ClipWorkerSupervisor, FfmpegEncoder,
    LocalArchiveUploader,
};
use strim_core::{InMemoryTelemetry, PlatformStatus, TelemetrySink};
use strim_events::{
    ActionExecutor, ChatSender, ClipCommandTrigger, Platform, Trigger, TriggerRegistry,
    CLIP_JOB_TYPE,
};
use strim_ingest::{
    IngestAdapter, SessionService, SessionServiceConfig, TiktokSessionAdapter,
    TiktokSessionConfig, TwitchStreamAdapter, TwitchStreamConfig, YoutubePollAdapter,
    YoutubePollConfig,
};
use strim_quota::{CooldownLedger, QuotaLedger};

use crate::admission::JobAdmissionLedger;
use crate::config::{StrimConfig, TenantConfig};
use crate::dispatcher::{ClipJobDispatcher, TenantClipProfile};
use crate::tier::{compile_limits, SubscriptionTier, TenantLimits};

const SNAPSHOT_FILE: &str = "telemetry_snapshot.json";
const SCHEDULER_COMPONENT: &str = "scheduler";

struct TenantRuntime {
    limits: TenantLimits,
    handles: Vec<JoinHandle<()>>,
}

/// Owns every long-lived task in the process: per-tenant platform lifecycle
/// loops, per-tenant heartbeats, and the clip worker supervisor.
///
/// `start_tenant` is idempotent and `shutdown` is terminal: it signals every
/// stop channel, awaits every handle (cancellation is expected), stops the
/// shared browser session exactly once, and publishes a final telemetry
/// snapshot.
pub struct RuntimeScheduler {
    config: StrimConfig,
    telemetry: Arc<InMemoryTelemetry>,
    session: SessionService,
    quota: QuotaLedger,
    cooldown: CooldownLedger,
    admission: Arc<JobAdmissionLedger>,
    store: Arc<ClipStore>,
    dispatcher: Arc<ClipJobDispatcher>,
    senders: BTreeMap<Platform, Arc<dyn ChatSender>>,
    worker: ClipWorkerSupervisor,
    tenants: BTreeMap<String, TenantRuntime>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl RuntimeScheduler {
    pub fn new(config: StrimConfig) -> Result<Self> {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let session = SessionService::new(SessionServiceConfig {
            bridge_base_url: config
                .browser_bridge
                .base_url
                .clone()
                .unwrap_or_else(|| SessionServiceConfig::default().bridge_base_url),
            ..SessionServiceConfig::default()
        });
        let store = Arc::new(
            ClipStore::open(config.runtime.data_dir.join("clips")).context("opening clip store")?,
        );
        let admission = Arc::new(JobAdmissionLedger::new());
        let cooldown = CooldownLedger::new();
        let dispatcher = Arc::new(ClipJobDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&admission),
            cooldown.clone(),
        ));

        let archive_dir = config.runtime.data_dir.join("published");
        let notifier = Self::build_worker_notifier(Arc::clone(&admission));
        let worker = ClipWorkerSupervisor::new(
            Arc::clone(&store),
            Arc::new(FfmpegEncoder::new(config.encoder.binary_path.clone())),
            Arc::new(LocalArchiveUploader::new(archive_dir, "https://clips.strim.local")),
            telemetry.clone() as Arc<dyn TelemetrySink>,
            Some(notifier),
            ClipWorkerConfig {
                poll_interval_ms: config.encoder.poll_interval_ms,
                concurrency: config.encoder.concurrency,
                output_dir: config.runtime.data_dir.join("encoded"),
            },
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            config,
            telemetry,
            session,
            quota: QuotaLedger::new(),
            cooldown,
            admission,
            store,
            dispatcher,
            senders: BTreeMap::new(),
            worker,
            tenants: BTreeMap::new(),
            stop_tx,
            stop_rx,
        })
    }

    /// Worker notifier: releases the tenant's admission slot when a clip
    /// reaches a terminal state.
    fn build_worker_notifier(admission: Arc<JobAdmissionLedger>) -> strim_clip::ClipNotifier {
        Arc::new(move |record: &ClipRecord| {
            if matches!(record.state, ClipState::Published | ClipState::Failed) {
                admission.job_finished(&record.tenant_id, CLIP_JOB_TYPE);
            }
            Ok(())
        })
    }

    /// Registers an outbound chat transport for a platform. Must be called
    /// before the owning tenants start.
    pub fn register_chat_sender(&mut self, platform: Platform, sender: Arc<dyn ChatSender>) {
        self.senders.insert(platform, sender);
    }

    pub fn telemetry(&self) -> Arc<InMemoryTelemetry> {
        Arc::clone(&self.telemetry)
    }

    pub fn clip_store(&self) -> Arc<ClipStore> {
        Arc::clone(&self.store)
    }

    pub fn cooldown(&self) -> CooldownLedger {
        self.cooldown.clone()
    }

    fn snapshot_path(&self) -> PathBuf {
        self.config.runtime.data_dir.join(SNAPSHOT_FILE)
    }

    /// Starts every tenant in the configuration, then the clip worker.
    pub fn start(&mut self) -> Result<()> {
        let tenants = self.config.tenants.clone();
        for tenant in &tenants {
            self.start_tenant(tenant)?;
        }
        self.worker.start();
        Ok(())
    }

    /// Spawns one lifecycle task per enabled, unpaused platform plus the
    /// tenant heartbeat. A second call for a started tenant is a warning
    /// no-op.
    pub fn start_tenant(&mut self, tenant: &TenantConfig) -> Result<()> {
        if self.tenants.contains_key(&tenant.tenant_id) {
            warn!(
                tenant_id = tenant.tenant_id.as_str(),
                "tenant already started, ignoring"
            );
            return Ok(());
        }
        let tier = SubscriptionTier::parse(&tenant.tier)
            .with_context(|| format!("tenant {}", tenant.tenant_id))?;
        let limits = compile_limits(tier);
        self.dispatcher.register_tenant(
            tenant.tenant_id.clone(),
            TenantClipProfile {
                limits: limits.clone(),
                recording_path: tenant.recording_path.clone(),
                channel_url: tenant.channel_url.clone(),
            },
        );

        let mut handles = Vec::new();
        for platform in tenant.enabled_platforms() {
            let toggle = self.config.platform_toggle(platform);
            if !toggle.is_active() {
                info!(
                    tenant_id = tenant.tenant_id.as_str(),
                    platform = platform.as_str(),
                    reason = toggle.pause_reason.as_deref().unwrap_or("disabled"),
                    "platform inactive, skipping"
                );
                continue;
            }
            let adapter = self.build_adapter(tenant, platform, &limits)?;
            let executor = self.build_executor(platform);
            let registry = Self::build_registry(&limits);
            let telemetry = self.telemetry.clone() as Arc<dyn TelemetrySink>;
            let stop_rx = self.stop_rx.clone();
            let tenant_id = tenant.tenant_id.clone();
            handles.push(tokio::spawn(run_platform_lifecycle(
                tenant_id, platform, adapter, registry, executor, telemetry, stop_rx,
            )));
        }
        handles.push(self.spawn_heartbeat(&tenant.tenant_id));

        info!(
            tenant_id = tenant.tenant_id.as_str(),
            tier = tier.as_str(),
            tasks = handles.len(),
            "tenant started"
        );
        self.tenants
            .insert(tenant.tenant_id.clone(), TenantRuntime { limits, handles });
        Ok(())
    }

    fn build_adapter(
        &self,
        tenant: &TenantConfig,
        platform: Platform,
        limits: &TenantLimits,
    ) -> Result<Box<dyn IngestAdapter>> {
        match platform {
            Platform::Twitch => {
                let Some(twitch) = tenant.twitch.as_ref() else {
                    bail!("tenant {} has no twitch config", tenant.tenant_id);
                };
                let mut config = TwitchStreamConfig::new(&tenant.tenant_id, &twitch.channel);
                if let Some(nickname) = twitch.nickname.clone() {
                    config.nickname = nickname;
                }
                if let Some(ws_url) = twitch.ws_url.clone() {
                    config.ws_url = ws_url;
                }
                config.oauth_token = twitch.oauth_token.clone();
                Ok(Box::new(TwitchStreamAdapter::new(config)))
            }
            Platform::Youtube => {
                let Some(youtube) = tenant.youtube.as_ref() else {
                    bail!("tenant {} has no youtube config", tenant.tenant_id);
                };
                self.quota.register(
                    &tenant.tenant_id,
                    platform.as_str(),
                    limits.quota_max_daily_units,
                    limits.quota_buffer_units,
                )?;
                let mut config =
                    YoutubePollConfig::new(&tenant.tenant_id, &youtube.live_chat_id);
                config.api_key = youtube.api_key.clone();
                Ok(Box::new(YoutubePollAdapter::new(config, self.quota.clone())))
            }
            Platform::Tiktok => {
                let Some(tiktok) = tenant.tiktok.as_ref() else {
                    bail!("tenant {} has no tiktok config", tenant.tenant_id);
                };
                let config = TiktokSessionConfig::new(&tenant.tenant_id, &tiktok.room_id);
                Ok(Box::new(TiktokSessionAdapter::new(
                    config,
                    self.session.clone(),
                )))
            }
        }
    }

    fn build_executor(&self, platform: Platform) -> Arc<ActionExecutor> {
        let mut executor = ActionExecutor::new(self.telemetry.clone() as Arc<dyn TelemetrySink>);
        if let Some(sender) = self.senders.get(&platform) {
            executor.register_sender(platform, Arc::clone(sender));
        }
        executor.register_dispatcher(Arc::clone(&self.dispatcher) as Arc<dyn strim_events::JobDispatcher>);
        Arc::new(executor)
    }

    fn build_registry(limits: &TenantLimits) -> Arc<TriggerRegistry> {
        let mut registry = TriggerRegistry::default();
        registry.register(Box::new(ClipCommandTrigger::new(
            limits.clip_max_duration_seconds,
        )) as Box<dyn Trigger>);
        Arc::new(registry)
    }

    fn spawn_heartbeat(&self, tenant_id: &str) -> JoinHandle<()> {
        let telemetry = Arc::clone(&self.telemetry);
        let snapshot_path = self.snapshot_path();
        let interval = Duration::from_millis(self.config.runtime.snapshot_interval_ms.max(100));
        let mut stop_rx = self.stop_rx.clone();
        let tenant_id = tenant_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(error) = telemetry.publish_snapshot(&snapshot_path) {
                    warn!(
                        tenant_id = tenant_id.as_str(),
                        error = %error,
                        "heartbeat snapshot publish failed"
                    );
                }
            }
        })
    }

    /// Admission probe used by operational tooling.
    pub fn can_start_job(&self, tenant_id: &str, job_type: &str) -> bool {
        let Some(runtime) = self.tenants.get(tenant_id) else {
            return false;
        };
        self.admission
            .can_start_job(tenant_id, job_type, runtime.limits.max_concurrent_clip_jobs)
    }

    /// Stops everything: lifecycle tasks, heartbeats, the clip worker, and
    /// the shared browser session.
    pub async fn shutdown(&mut self) {
        info!("scheduler shutdown requested");
        let _ = self.stop_tx.send(true);
        for (tenant_id, runtime) in std::mem::take(&mut self.tenants) {
            for handle in runtime.handles {
                if let Err(error) = handle.await {
                    if !error.is_cancelled() {
                        warn!(
                            tenant_id = tenant_id.as_str(),
                            error = %error,
                            "tenant task join failed"
                        );
                    }
                }
            }
        }
        self.worker.stop().await;
        self.session.stop().await;
        if let Err(error) = self.telemetry.publish_snapshot(&self.snapshot_path()) {
            self.telemetry
                .record_error(SCHEDULER_COMPONENT, &format!("final snapshot failed: {error}"));
        }
        info!("scheduler shutdown complete");
    }
}

/// Drives one adapter for one tenant until stop or a fatal adapter error.
async fn run_platform_lifecycle(
    tenant_id: String,
    platform: Platform,
    mut adapter: Box<dyn IngestAdapter>,
    registry: Arc<TriggerRegistry>,
    executor: Arc<ActionExecutor>,
    telemetry: Arc<dyn TelemetrySink>,
    mut stop_rx: watch::Receiver<bool>,
) {
    telemetry.record_platform_status(&tenant_id, platform.as_str(), PlatformStatus::Starting);
    loop {
        if *stop_rx.borrow() {
            break;
        }
        let connected = tokio::select! {
            _ = stop_rx.changed() => break,
            result = adapter.connect() => result,
        };
        match connected {
            Ok(()) => {
                telemetry.record_platform_status(
                    &tenant_id,
                    platform.as_str(),
                    PlatformStatus::Connected,
                );
            }
            Err(error) if error.is_fatal() => {
                telemetry.record_error(platform.as_str(), &error.to_string());
                telemetry.record_platform_status(
                    &tenant_id,
                    platform.as_str(),
                    PlatformStatus::Fatal,
                );
                warn!(
                    tenant_id = tenant_id.as_str(),
                    platform = platform.as_str(),
                    error = %error,
                    "platform stopped permanently"
                );
                return;
            }
            Err(error) => {
                telemetry.record_platform_status(
                    &tenant_id,
                    platform.as_str(),
                    PlatformStatus::Degraded,
                );
                warn!(
                    tenant_id = tenant_id.as_str(),
                    platform = platform.as_str(),
                    error = %error,
                    "platform connect failed, retrying"
                );
                continue;
            }
        }
        loop {
            let batch = tokio::select! {
                _ = stop_rx.changed() => {
                    adapter.close().await;
                    telemetry.record_platform_status(
                        &tenant_id,
                        platform.as_str(),
                        PlatformStatus::Stopped,
                    );
                    return;
                }
                batch = adapter.next_batch() => batch,
            };
            match batch {
                Ok(events) if events.is_empty() => {
                    telemetry.record_platform_status(
                        &tenant_id,
                        platform.as_str(),
                        PlatformStatus::Idle,
                    );
                }
                Ok(events) => {
                    for event in &events {
                        telemetry.record_event(&tenant_id, platform.as_str());
                        let actions = registry.process(event);
                        if !actions.is_empty() {
                            executor.execute(&actions, platform).await;
                        }
                    }
                }
                Err(error) if error.is_fatal() => {
                    telemetry.record_error(platform.as_str(), &error.to_string());
                    telemetry.record_platform_status(
                        &tenant_id,
                        platform.as_str(),
                        PlatformStatus::Fatal,
                    );
                    adapter.close().await;
                    warn!(
                        tenant_id = tenant_id.as_str(),
                        platform = platform.as_str(),
                        error = %error,
                        "platform stopped permanently"
                    );
                    return;
                }
                Err(error) => {
                    telemetry.record_platform_status(
                        &tenant_id,
                        platform.as_str(),
                        PlatformStatus::Degraded,
                    );
                    warn!(
                        tenant_id = tenant_id.as_str(),
                        platform = platform.as_str(),
                        error = %error,
                        "platform read failed, reconnecting"
                    );
                    break;
                }
            }
        }
    }
    adapter.close().await;
    telemetry.record_platform_status(&tenant_id, platform.as_str(), PlatformStatus::Stopped);
}

#[cfg(test)]
mod tests {
    use crate::config::{RuntimeConfig, TwitchTenantConfig};

    use super::*;

    fn test_config(data_dir: PathBuf) -> StrimConfig {
        StrimConfig {
            runtime: RuntimeConfig {
                data_dir,
                snapshot_interval_ms: 200,
            },
            ..StrimConfig::default()
        }
    }

    fn tenant_config(tenant_id: &str) -> TenantConfig {
        TenantConfig {
            tenant_id: tenant_id.to_string(),
            tier: "free".to_string(),
            recording_path: "/var/recordings/stream.ts".to_string(),
            channel_url: "https://twitch.tv/creator1".to_string(),
            twitch: Some(TwitchTenantConfig {
                enabled: true,
                channel: "#creator1".to_string(),
                nickname: None,
                oauth_token: None,
                // Refused port keeps tests off the network.
                ws_url: Some("ws://127.0.0.1:1".to_string()),
            }),
            youtube: None,
            tiktok: None,
        }
    }

    #[tokio::test]
    async fn functional_start_tenant_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut scheduler =
            RuntimeScheduler::new(test_config(dir.path().to_path_buf())).expect("scheduler");
        let tenant = tenant_config("creator-1");
        scheduler.start_tenant(&tenant).expect("first start");
        let tasks_after_first = scheduler.tenants["creator-1"].handles.len();
        scheduler.start_tenant(&tenant).expect("second start is a no-op");
        assert_eq!(scheduler.tenants.len(), 1);
        assert_eq!(scheduler.tenants["creator-1"].handles.len(), tasks_after_first);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn functional_shutdown_awaits_tasks_and_publishes_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut scheduler =
            RuntimeScheduler::new(test_config(dir.path().to_path_buf())).expect("scheduler");
        scheduler.start_tenant(&tenant_config("creator-1")).expect("start");
        scheduler.shutdown().await;
        assert!(scheduler.tenants.is_empty());
        let snapshot = std::fs::read_to_string(dir.path().join(SNAPSHOT_FILE)).expect("snapshot");
        assert!(snapshot.contains("schema_version"));
    }

    #[tokio::test]
    async fn unit_paused_platform_spawns_no_lifecycle_task() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(dir.path().to_path_buf());
        config.platforms.insert(
            "twitch".to_string(),
            crate::config::PlatformToggle {
                enabled: true,
                paused: true,
                pause_reason: Some("maintenance".to_string()),
            },
        );
        let mut scheduler = RuntimeScheduler::new(config).expect("scheduler");
        scheduler.start_tenant(&tenant_config("creator-1")).expect("start");
        // Only the heartbeat task remains.
        assert_eq!(scheduler.tenants["creator-1"].handles.len(), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn unit_admission_probe_reflects_tenant_limits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut scheduler =
            RuntimeScheduler::new(test_config(dir.path().to_path_buf())).expect("scheduler");
        assert!(!scheduler.can_start_job("creator-1", CLIP_JOB_TYPE));
        scheduler.start_tenant(&tenant_config("creator-1")).expect("start");
        assert!(scheduler.can_start_job("creator-1", CLIP_JOB_TYPE));
        scheduler.admission.job_started("creator-1", CLIP_JOB_TYPE);
        // Free tier allows exactly one concurrent clip job.
        assert!(!scheduler.can_start_job("creator-1", CLIP_JOB_TYPE));
        scheduler.shutdown().await;
    }
}

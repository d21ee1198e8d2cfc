use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use strim_core::telemetry::{ActionResultRecord, TelemetrySink};

use crate::action::{ActionDescriptor, ActionKind, ActionOutcome, ActionStatus};
use crate::platform::Platform;

/// Job type token the executor uses for clip enqueues.
pub const CLIP_JOB_TYPE: &str = "clip";

/// Tenant identity handed to the job dispatcher alongside the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
    pub platform: Platform,
}

/// Outbound chat transport registered per platform by the owning adapter.
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Sends one chat message to the platform channel.
    async fn send_chat_message(&self, channel: &str, text: &str) -> Result<()>;
}

/// Background job intake consumed by the action executor.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Dispatches a job of `job_type` for the tenant; returns the job id.
    /// Unknown job types fail with a descriptive error.
    async fn dispatch(
        &self,
        job_type: &str,
        tenant: &TenantContext,
        payload: &Value,
    ) -> Result<String>;
}

/// Routes action descriptors to platform senders or the job dispatcher.
///
/// Execution never raises to the caller: every failure is caught, recorded in
/// telemetry, and reflected in the per-descriptor outcome list.
pub struct ActionExecutor {
    senders: BTreeMap<Platform, Arc<dyn ChatSender>>,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ActionExecutor {
    pub fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            senders: BTreeMap::new(),
            dispatcher: None,
            telemetry,
        }
    }

    /// Registers the outbound sender for one platform; adapters call this at
    /// startup. A later registration for the same platform replaces the
    /// earlier one.
    pub fn register_sender(&mut self, platform: Platform, sender: Arc<dyn ChatSender>) {
        self.senders.insert(platform, sender);
    }

    /// Registers the job dispatcher consulted for `enqueue_clip_job` actions.
    pub fn register_dispatcher(&mut self, dispatcher: Arc<dyn JobDispatcher>) {
        self.dispatcher = Some(dispatcher);
    }

    /// Executes every descriptor, resolving platforms against
    /// `default_platform`, and returns one outcome per descriptor in order.
    pub async fn execute(
        &self,
        descriptors: &[ActionDescriptor],
        default_platform: Platform,
    ) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let platform = descriptor.platform.unwrap_or(default_platform);
            let result = self.execute_one(descriptor, platform).await;
            let outcome = match result {
                Ok(()) => ActionOutcome {
                    trigger_id: descriptor.trigger_id.clone(),
                    kind: descriptor.kind,
                    platform,
                    status: ActionStatus::Success,
                    error: None,
                },
                Err(error) => {
                    warn!(
                        trigger_id = descriptor.trigger_id.as_str(),
                        kind = descriptor.kind.as_str(),
                        platform = platform.as_str(),
                        %error,
                        "action execution failed"
                    );
                    ActionOutcome {
                        trigger_id: descriptor.trigger_id.clone(),
                        kind: descriptor.kind,
                        platform,
                        status: ActionStatus::Failed,
                        error: Some(error.to_string()),
                    }
                }
            };
            self.telemetry.record_action_result(ActionResultRecord {
                tenant_id: descriptor.tenant_id.clone(),
                platform: platform.as_str().to_string(),
                action_kind: descriptor.kind.as_str().to_string(),
                trigger_id: descriptor.trigger_id.clone(),
                success: outcome.is_success(),
                error: outcome.error.clone(),
            });
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn execute_one(&self, descriptor: &ActionDescriptor, platform: Platform) -> Result<()> {
        match descriptor.kind {
            ActionKind::SendChatMessage => {
                let sender = self
                    .senders
                    .get(&platform)
                    .ok_or_else(|| anyhow!("no chat sender registered for {platform}"))?;
                let text = descriptor
                    .payload
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or("");
                if text.is_empty() {
                    return Err(anyhow!("send_chat_message payload text cannot be empty"));
                }
                let channel = descriptor
                    .payload
                    .get("channel")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                sender.send_chat_message(channel, text).await
            }
            ActionKind::EnqueueClipJob => {
                let dispatcher = self
                    .dispatcher
                    .as_ref()
                    .ok_or_else(|| anyhow!("no job dispatcher registered"))?;
                let job_payload = descriptor
                    .payload
                    .get("job")
                    .ok_or_else(|| anyhow!("enqueue_clip_job payload missing job object"))?;
                let tenant = TenantContext {
                    tenant_id: descriptor.tenant_id.clone(),
                    platform,
                };
                dispatcher
                    .dispatch(CLIP_JOB_TYPE, &tenant, job_payload)
                    .await
                    .map(|_job_id| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use strim_core::telemetry::{InMemoryTelemetry, NoopTelemetry};

    use super::*;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatSender for RecordingSender {
        async fn send_chat_message(&self, channel: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .expect("sender lock")
                .push((channel.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct RejectingDispatcher;

    #[async_trait]
    impl JobDispatcher for RejectingDispatcher {
        async fn dispatch(
            &self,
            job_type: &str,
            _tenant: &TenantContext,
            _payload: &Value,
        ) -> Result<String> {
            Err(anyhow!("job type {job_type} not accepted"))
        }
    }

    fn chat_descriptor(text: &str) -> ActionDescriptor {
        ActionDescriptor {
            kind: ActionKind::SendChatMessage,
            platform: None,
            tenant_id: "creator-1".to_string(),
            trigger_id: "greeting".to_string(),
            payload: json!({"text": text, "channel": "#creator1"}),
            created_unix_ms: 1_760_100_000_000,
        }
    }

    #[tokio::test]
    async fn functional_execute_routes_chat_message_to_registered_sender() {
        let sender = Arc::new(RecordingSender::default());
        let mut executor = ActionExecutor::new(Arc::new(NoopTelemetry));
        executor.register_sender(Platform::Twitch, sender.clone());

        let outcomes = executor
            .execute(&[chat_descriptor("hello chat")], Platform::Twitch)
            .await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        let sent = sender.sent.lock().expect("sender lock");
        assert_eq!(sent.as_slice(), &[("#creator1".to_string(), "hello chat".to_string())]);
    }

    #[tokio::test]
    async fn regression_missing_sender_yields_failed_outcome_without_panic() {
        let executor = ActionExecutor::new(Arc::new(NoopTelemetry));
        let outcomes = executor
            .execute(&[chat_descriptor("hello")], Platform::Tiktok)
            .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ActionStatus::Failed);
        let error = outcomes[0].error.as_deref().expect("error detail");
        assert!(error.contains("no chat sender registered"));
    }

    #[tokio::test]
    async fn regression_empty_text_payload_fails_the_descriptor_only() {
        let sender = Arc::new(RecordingSender::default());
        let mut executor = ActionExecutor::new(Arc::new(NoopTelemetry));
        executor.register_sender(Platform::Twitch, sender.clone());

        let outcomes = executor
            .execute(
                &[chat_descriptor("  "), chat_descriptor("still delivered")],
                Platform::Twitch,
            )
            .await;
        assert_eq!(outcomes[0].status, ActionStatus::Failed);
        assert!(outcomes[1].is_success());
        assert_eq!(sender.sent.lock().expect("sender lock").len(), 1);
    }

    #[tokio::test]
    async fn functional_dispatcher_failures_are_recorded_in_telemetry() {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let mut executor = ActionExecutor::new(telemetry.clone());
        executor.register_dispatcher(Arc::new(RejectingDispatcher));

        let descriptor = ActionDescriptor {
            kind: ActionKind::EnqueueClipJob,
            platform: Some(Platform::Twitch),
            tenant_id: "creator-1".to_string(),
            trigger_id: "clip-command".to_string(),
            payload: json!({"job": {"duration_seconds": 20}}),
            created_unix_ms: 1_760_100_000_000,
        };
        let outcomes = executor.execute(&[descriptor], Platform::Twitch).await;
        assert_eq!(outcomes[0].status, ActionStatus::Failed);

        let snapshot = telemetry.snapshot();
        let creator = snapshot
            .creators
            .iter()
            .find(|entry| entry.tenant_id == "creator-1")
            .expect("creator entry");
        assert_eq!(creator.actions_failed, 1);
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::Platform;

/// Enumerates supported action descriptor kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendChatMessage,
    EnqueueClipJob,
}

impl ActionKind {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendChatMessage => "send_chat_message",
            Self::EnqueueClipJob => "enqueue_clip_job",
        }
    }
}

/// Request to perform one outbound effect, produced by a trigger.
///
/// Transient: descriptors are never persisted, only counted in telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub kind: ActionKind,
    /// Explicit target platform; `None` resolves to the executor default.
    #[serde(default)]
    pub platform: Option<Platform>,
    pub tenant_id: String,
    pub trigger_id: String,
    pub payload: Value,
    pub created_unix_ms: u64,
}

/// Terminal status of one executed descriptor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
}

/// Per-descriptor execution result returned by the action executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionOutcome {
    pub trigger_id: String,
    pub kind: ActionKind,
    pub platform: Platform,
    pub status: ActionStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

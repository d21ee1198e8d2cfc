use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::Platform;

/// Identity of the chat participant that produced an event.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EventAuthor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl EventAuthor {
    /// Returns true when the author carries the named badge or role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|entry| entry == role) || self.badges.iter().any(|entry| entry == role)
    }
}

/// Canonical event shape every adapter normalizes into.
///
/// Immutable once produced; consumed exactly once by the trigger registry for
/// a given adapter instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub platform: Platform,
    pub tenant_id: String,
    pub channel: String,
    pub author: EventAuthor,
    pub text: String,
    pub timestamp_unix_ms: u64,
    /// Opaque platform-native payload kept for downstream consumers.
    #[serde(default)]
    pub raw: Value,
}

impl NormalizedEvent {
    /// Builds an event with an empty raw payload; adapters attach the native
    /// payload when they have one.
    pub fn new(
        platform: Platform,
        tenant_id: impl Into<String>,
        channel: impl Into<String>,
        author: EventAuthor,
        text: impl Into<String>,
        timestamp_unix_ms: u64,
    ) -> Self {
        Self {
            platform,
            tenant_id: tenant_id.into(),
            channel: channel.into(),
            author,
            text: text.into(),
            timestamp_unix_ms,
            raw: Value::Null,
        }
    }
}

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use strim_core::current_unix_timestamp_ms;
use strim_events::{EventAuthor, NormalizedEvent, Platform};
use strim_quota::{QuotaLedger, QuotaOutcome};

use crate::adapter_contract::{AdapterError, IngestAdapter};

const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const MIN_POLL_INTERVAL_MS: u64 = 1_000;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;
const DEFAULT_SEEN_CAP: usize = 2_048;
const DEFAULT_UNITS_PER_POLL: u64 = 5;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Configuration for the quota-metered YouTube live chat poller.
#[derive(Debug, Clone)]
pub struct YoutubePollConfig {
    pub api_base: String,
    pub api_key: String,
    pub tenant_id: String,
    pub live_chat_id: String,
    /// Quota units charged per poll request.
    pub units_per_poll: u64,
    /// Cap on the message-id dedup window.
    pub seen_cap: usize,
    /// Consecutive transient poll failures tolerated before going fatal.
    pub max_consecutive_failures: u32,
}

impl YoutubePollConfig {
    pub fn new(tenant_id: impl Into<String>, live_chat_id: impl Into<String>) -> Self {
        Self {
            api_base: "https://www.googleapis.com/youtube/v3".to_string(),
            api_key: String::new(),
            tenant_id: tenant_id.into(),
            live_chat_id: live_chat_id.into(),
            units_per_poll: DEFAULT_UNITS_PER_POLL,
            seen_cap: DEFAULT_SEEN_CAP,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// Polling ingestion adapter for YouTube live chat.
///
/// Each poll checks out quota units first; exhaustion halts the adapter
/// permanently while a buffer warning merely logs and continues. The next
/// poll delay follows the server's `pollingIntervalMillis` hint, clamped to a
/// sane band.
pub struct YoutubePollAdapter {
    config: YoutubePollConfig,
    client: reqwest::Client,
    quota: QuotaLedger,
    connected: bool,
    consecutive_failures: u32,
    next_poll_delay_ms: u64,
    seen_ids: HashSet<String>,
    seen_order: VecDeque<String>,
}

impl YoutubePollAdapter {
    pub fn new(config: YoutubePollConfig, quota: QuotaLedger) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            quota,
            connected: false,
            consecutive_failures: 0,
            next_poll_delay_ms: 0,
            seen_ids: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    /// Delay the adapter will wait before its next poll.
    pub fn next_poll_delay_ms(&self) -> u64 {
        self.next_poll_delay_ms
    }

    fn remember_seen(&mut self, message_id: String) -> bool {
        if self.seen_ids.contains(message_id.as_str()) {
            return false;
        }
        self.seen_ids.insert(message_id.clone());
        self.seen_order.push_back(message_id);
        while self.seen_order.len() > self.config.seen_cap.max(1) {
            if let Some(evicted) = self.seen_order.pop_front() {
                self.seen_ids.remove(evicted.as_str());
            }
        }
        true
    }

    fn normalize_item(&self, item: &Value) -> Option<NormalizedEvent> {
        let text = item
            .get("snippet")
            .and_then(|snippet| snippet.get("displayMessage"))
            .and_then(Value::as_str)?;
        let author = item.get("authorDetails");
        let author_id = author
            .and_then(|details| details.get("channelId"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let author_name = author
            .and_then(|details| details.get("displayName"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut roles = Vec::new();
        if author
            .and_then(|details| details.get("isChatOwner"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            roles.push("owner".to_string());
        }
        if author
            .and_then(|details| details.get("isChatModerator"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            roles.push("moderator".to_string());
        }
        let mut event = NormalizedEvent::new(
            Platform::Youtube,
            self.config.tenant_id.clone(),
            self.config.live_chat_id.clone(),
            EventAuthor {
                id: author_id.to_string(),
                name: author_name.to_string(),
                badges: Vec::new(),
                roles,
            },
            text,
            current_unix_timestamp_ms(),
        );
        event.raw = item.clone();
        Some(event)
    }

    async fn poll_once(&mut self) -> Result<Vec<NormalizedEvent>, AdapterError> {
        match self.quota.consume(
            self.config.tenant_id.as_str(),
            "youtube",
            self.config.units_per_poll,
        ) {
            QuotaOutcome::Exhausted => {
                return Err(AdapterError::fatal(format!(
                    "youtube quota exhausted for tenant {}",
                    self.config.tenant_id
                )));
            }
            QuotaOutcome::BufferWarning => {
                warn!(
                    tenant_id = self.config.tenant_id.as_str(),
                    "youtube quota inside warning buffer, polling continues"
                );
            }
            QuotaOutcome::Ok => {}
        }

        let url = format!("{}/liveChat/messages", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .get(url.as_str())
            .query(&[
                ("liveChatId", self.config.live_chat_id.as_str()),
                ("part", "snippet,authorDetails"),
                ("key", self.config.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|error| AdapterError::transient(format!("youtube poll failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::transient(format!(
                "youtube poll returned status {}",
                status.as_u16()
            )));
        }
        let payload = response.json::<Value>().await.map_err(|error| {
            AdapterError::transient(format!("youtube poll response unreadable: {error}"))
        })?;

        self.next_poll_delay_ms = payload
            .get("pollingIntervalMillis")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);

        let mut events = Vec::new();
        if let Some(items) = payload.get("items").and_then(Value::as_array) {
            for item in items {
                let message_id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if message_id.is_empty() || !self.remember_seen(message_id) {
                    continue;
                }
                if let Some(event) = self.normalize_item(item) {
                    events.push(event);
                }
            }
        }
        debug!(
            tenant_id = self.config.tenant_id.as_str(),
            fresh = events.len(),
            next_delay_ms = self.next_poll_delay_ms,
            "youtube poll cycle complete"
        );
        Ok(events)
    }
}

#[async_trait]
impl IngestAdapter for YoutubePollAdapter {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn tenant_id(&self) -> &str {
        self.config.tenant_id.as_str()
    }

    async fn connect(&mut self) -> Result<(), AdapterError> {
        if self.connected {
            return Ok(());
        }
        if self.config.live_chat_id.trim().is_empty() {
            return Err(AdapterError::fatal("youtube live_chat_id is not configured"));
        }
        self.connected = true;
        Ok(())
    }

    async fn next_batch(&mut self) -> Result<Vec<NormalizedEvent>, AdapterError> {
        if !self.connected {
            self.connect().await?;
        }
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            return Err(AdapterError::fatal(
                "youtube polling unavailable after repeated failures",
            ));
        }
        if self.next_poll_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.next_poll_delay_ms)).await;
        }
        match self.poll_once().await {
            Ok(events) => {
                self.consecutive_failures = 0;
                Ok(events)
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.config.max_consecutive_failures {
                    warn!(
                        tenant_id = self.config.tenant_id.as_str(),
                        failures = self.consecutive_failures,
                        "youtube polling unavailable, giving up"
                    );
                    Err(AdapterError::fatal(format!(
                        "youtube polling unavailable: {error}"
                    )))
                } else {
                    Err(error)
                }
            }
        }
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}

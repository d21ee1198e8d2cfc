use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use strim_core::current_unix_timestamp_ms;
use strim_events::{EventAuthor, NormalizedEvent, Platform};

use crate::adapter_contract::{AdapterError, IngestAdapter};
use crate::session_service::SessionService;

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Configuration for the session-mediated TikTok live chat adapter.
#[derive(Debug, Clone)]
pub struct TiktokSessionConfig {
    pub tenant_id: String,
    /// Live room identifier the bridge is watching.
    pub room_id: String,
    pub poll_interval_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub max_consecutive_failures: u32,
}

impl TiktokSessionConfig {
    pub fn new(tenant_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            room_id: room_id.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeEventEnvelope {
    #[serde(default)]
    events: Vec<BridgeEvent>,
}

#[derive(Debug, Deserialize)]
struct BridgeEvent {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    is_moderator: bool,
    #[serde(default)]
    is_owner: bool,
}

/// Session-mediated ingestion adapter for TikTok live chat.
///
/// All transport goes through the shared [`SessionService`]: the adapter never
/// holds credentials itself, it borrows the bridge's authenticated cookie for
/// each fetch. An empty fetch is a normal idle tick and resets nothing; only
/// genuine transport or bridge failures advance the failure counter toward a
/// fatal stop.
pub struct TiktokSessionAdapter {
    config: TiktokSessionConfig,
    session: SessionService,
    client: reqwest::Client,
    connected: bool,
    consecutive_failures: u32,
    backoff_ms: u64,
}

impl TiktokSessionAdapter {
    pub fn new(config: TiktokSessionConfig, session: SessionService) -> Self {
        let backoff_ms = config.backoff_base_ms.max(1);
        Self {
            config,
            session,
            client: reqwest::Client::new(),
            connected: false,
            consecutive_failures: 0,
            backoff_ms,
        }
    }

    fn record_failure(&mut self, detail: String) -> AdapterError {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.backoff_ms = self
            .backoff_ms
            .saturating_mul(2)
            .min(self.config.backoff_cap_ms.max(1));
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            warn!(
                tenant_id = self.config.tenant_id.as_str(),
                failures = self.consecutive_failures,
                "tiktok bridge unavailable, giving up"
            );
            AdapterError::fatal(format!("tiktok bridge unavailable: {detail}"))
        } else {
            AdapterError::transient(detail)
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.backoff_ms = self.config.backoff_base_ms.max(1);
    }

    fn normalize(&self, event: BridgeEvent) -> NormalizedEvent {
        let mut roles = Vec::new();
        if event.is_owner {
            roles.push("owner".to_string());
        }
        if event.is_moderator {
            roles.push("moderator".to_string());
        }
        NormalizedEvent::new(
            Platform::Tiktok,
            self.config.tenant_id.clone(),
            self.config.room_id.clone(),
            EventAuthor {
                id: event.user_id,
                name: event.nickname,
                badges: Vec::new(),
                roles,
            },
            event.comment,
            current_unix_timestamp_ms(),
        )
    }

    async fn fetch_events(&mut self) -> Result<Vec<NormalizedEvent>, AdapterError> {
        let cookie = match self.session.session_cookie().await {
            Ok(cookie) => cookie,
            Err(error) => {
                return Err(self.record_failure(format!("tiktok session cookie failed: {error}")));
            }
        };
        let url = format!(
            "{}/live/events?room_id={}",
            self.session.bridge_base_url(),
            self.config.room_id
        );
        let response = match self
            .client
            .get(&url)
            .header(reqwest::header::COOKIE, cookie)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                return Err(self.record_failure(format!("tiktok bridge request failed: {error}")));
            }
        };
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            debug!(tenant_id = self.config.tenant_id.as_str(), "tiktok idle tick");
            self.record_success();
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(self.record_failure(format!("tiktok bridge returned {status}")));
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                return Err(self.record_failure(format!("tiktok bridge body read failed: {error}")));
            }
        };
        if body.trim().is_empty() {
            self.record_success();
            return Ok(Vec::new());
        }
        let envelope: BridgeEventEnvelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(error) => {
                return Err(self.record_failure(format!("tiktok bridge payload invalid: {error}")));
            }
        };
        self.record_success();
        Ok(envelope
            .events
            .into_iter()
            .filter(|event| !event.comment.trim().is_empty())
            .map(|event| self.normalize(event))
            .collect())
    }
}

#[async_trait]
impl IngestAdapter for TiktokSessionAdapter {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    fn tenant_id(&self) -> &str {
        self.config.tenant_id.as_str()
    }

    async fn connect(&mut self) -> Result<(), AdapterError> {
        if self.connected {
            return Ok(());
        }
        if let Err(error) = self.session.ensure_started().await {
            return Err(self.record_failure(format!("tiktok session start failed: {error}")));
        }
        self.record_success();
        self.connected = true;
        Ok(())
    }

    async fn next_batch(&mut self) -> Result<Vec<NormalizedEvent>, AdapterError> {
        if !self.connected {
            self.connect().await?;
        }
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            return Err(AdapterError::fatal(
                "tiktok bridge unavailable after repeated failures",
            ));
        }
        let delay = if self.consecutive_failures > 0 {
            self.backoff_ms
        } else {
            self.config.poll_interval_ms
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.fetch_events().await
    }

    // The shared session is owned by the scheduler and released there; the
    // adapter only detaches from it.
    async fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use crate::session_service::SessionServiceConfig;

    use super::*;

    fn session_for(server: &MockServer) -> SessionService {
        SessionService::new(SessionServiceConfig {
            bridge_base_url: server.base_url(),
            cookie_ttl_ms: 60_000,
        })
    }

    fn mock_session_endpoints(server: &MockServer) {
        server.mock(|when, then| {
            when.method(POST).path("/session/start");
            then.status(200);
        });
        server.mock(|when, then| {
            when.method(GET).path("/session/cookie");
            then.status(200).body("sessionid=abc123");
        });
    }

    fn fast_config() -> TiktokSessionConfig {
        let mut config = TiktokSessionConfig::new("creator-1", "room-77");
        config.poll_interval_ms = 1;
        config.backoff_base_ms = 1;
        config.backoff_cap_ms = 4;
        config
    }

    #[tokio::test]
    async fn functional_bridge_events_are_normalized_with_roles() {
        let server = MockServer::start_async().await;
        mock_session_endpoints(&server);
        let events_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/live/events")
                .query_param("room_id", "room-77")
                .header("cookie", "sessionid=abc123");
            then.status(200).json_body(serde_json::json!({
                "events": [
                    {
                        "user_id": "u-9",
                        "nickname": "Fan",
                        "comment": "!clip 20",
                        "is_moderator": true,
                        "is_owner": false
                    },
                    { "user_id": "u-10", "nickname": "Quiet", "comment": "  " }
                ]
            }));
        });

        let mut adapter = TiktokSessionAdapter::new(fast_config(), session_for(&server));
        adapter.connect().await.expect("connect");
        let events = adapter.next_batch().await.expect("batch");
        events_mock.assert_async().await;
        assert_eq!(events.len(), 1, "blank comments are dropped");
        assert_eq!(events[0].platform, Platform::Tiktok);
        assert_eq!(events[0].author.name, "Fan");
        assert!(events[0].author.has_role("moderator"));
    }

    #[tokio::test]
    async fn functional_idle_bridge_response_is_not_a_failure() {
        let server = MockServer::start_async().await;
        mock_session_endpoints(&server);
        server.mock(|when, then| {
            when.method(GET).path("/live/events");
            then.status(204);
        });

        let mut adapter = TiktokSessionAdapter::new(fast_config(), session_for(&server));
        adapter.connect().await.expect("connect");
        for _ in 0..5 {
            let events = adapter.next_batch().await.expect("idle tick");
            assert!(events.is_empty());
        }
        assert_eq!(adapter.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn regression_repeated_bridge_failures_escalate_to_fatal() {
        let server = MockServer::start_async().await;
        mock_session_endpoints(&server);
        server.mock(|when, then| {
            when.method(GET).path("/live/events");
            then.status(502);
        });

        let mut adapter = TiktokSessionAdapter::new(fast_config(), session_for(&server));
        adapter.connect().await.expect("connect");
        let first = adapter.next_batch().await.expect_err("first");
        assert!(!first.is_fatal());
        let second = adapter.next_batch().await.expect_err("second");
        assert!(!second.is_fatal());
        let third = adapter.next_batch().await.expect_err("third");
        assert!(third.is_fatal());
        let fourth = adapter.next_batch().await.expect_err("fourth");
        assert!(fourth.is_fatal());
    }

    #[tokio::test]
    async fn functional_recovery_after_transient_failure_resets_backoff() {
        let server = MockServer::start_async().await;
        mock_session_endpoints(&server);
        let failing = server.mock(|when, then| {
            when.method(GET).path("/live/events");
            then.status(500);
        });

        let mut adapter = TiktokSessionAdapter::new(fast_config(), session_for(&server));
        adapter.connect().await.expect("connect");
        let error = adapter.next_batch().await.expect_err("transient");
        assert!(!error.is_fatal());
        failing.delete_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/live/events");
            then.status(200).json_body(serde_json::json!({ "events": [] }));
        });

        let events = adapter.next_batch().await.expect("recovered");
        assert!(events.is_empty());
        assert_eq!(adapter.consecutive_failures, 0);
        assert_eq!(adapter.backoff_ms, 1);
    }
}

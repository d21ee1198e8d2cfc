use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};

use strim_core::current_unix_timestamp_ms;

/// Configuration for the shared browser automation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionServiceConfig {
    /// Base URL of the local browser bridge that holds the authenticated
    /// session (cookie jar, login state).
    pub bridge_base_url: String,
    /// Cookie refresh interval; a cookie older than this is re-fetched before
    /// the next request that needs it.
    pub cookie_ttl_ms: u64,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            bridge_base_url: "http://127.0.0.1:9301".to_string(),
            cookie_ttl_ms: 15 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    started: bool,
    stopped: bool,
    cookie: Option<String>,
    cookie_fetched_unix_ms: u64,
}

/// Process-wide browser session shared by every session-mediated adapter.
///
/// Exactly one instance exists per process; the scheduler constructs it and
/// injects it into the adapters that need it. Start and stop are serialized
/// behind a mutex: repeated starts are no-ops, and the underlying session is
/// released exactly once no matter how many owners call `stop`.
#[derive(Clone)]
pub struct SessionService {
    config: SessionServiceConfig,
    client: reqwest::Client,
    state: Arc<Mutex<SessionState>>,
}

impl SessionService {
    pub fn new(config: SessionServiceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    /// Base URL of the backing browser bridge.
    pub fn bridge_base_url(&self) -> &str {
        self.config.bridge_base_url.as_str()
    }

    /// Starts the shared session if it is not already running.
    pub async fn ensure_started(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.stopped {
            bail!("session service already stopped");
        }
        if state.started {
            return Ok(());
        }
        let url = format!("{}/session/start", self.config.bridge_base_url);
        let response = self.client.post(url.as_str()).send().await;
        match response {
            Ok(response) if response.status().is_success() => {
                state.started = true;
                info!(bridge = self.config.bridge_base_url.as_str(), "browser session started");
                Ok(())
            }
            Ok(response) => bail!(
                "browser bridge start returned status {}",
                response.status().as_u16()
            ),
            Err(error) => bail!("browser bridge unreachable: {error}"),
        }
    }

    /// Returns a fresh-enough session cookie, refreshing from the bridge when
    /// the cached one has aged out.
    pub async fn session_cookie(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.stopped {
            bail!("session service already stopped");
        }
        if !state.started {
            bail!("session service not started");
        }
        let now = current_unix_timestamp_ms();
        let stale = state
            .cookie
            .is_none()
            || now.saturating_sub(state.cookie_fetched_unix_ms) >= self.config.cookie_ttl_ms;
        if stale {
            let url = format!("{}/session/cookie", self.config.bridge_base_url);
            let response = self
                .client
                .get(url.as_str())
                .send()
                .await
                .map_err(|error| anyhow::anyhow!("cookie refresh failed: {error}"))?;
            if !response.status().is_success() {
                bail!(
                    "cookie refresh returned status {}",
                    response.status().as_u16()
                );
            }
            let cookie = response
                .text()
                .await
                .map_err(|error| anyhow::anyhow!("cookie body unreadable: {error}"))?;
            let cookie = cookie.trim().to_string();
            if cookie.is_empty() {
                bail!("bridge returned an empty session cookie");
            }
            state.cookie = Some(cookie);
            state.cookie_fetched_unix_ms = now;
        }
        Ok(state.cookie.clone().unwrap_or_default())
    }

    /// Releases the underlying browser session exactly once. Later calls are
    /// no-ops.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.stopped {
            return;
        }
        state.stopped = true;
        if !state.started {
            return;
        }
        state.started = false;
        state.cookie = None;
        let url = format!("{}/session/stop", self.config.bridge_base_url);
        if let Err(error) = self.client.post(url.as_str()).send().await {
            warn!(%error, "browser session stop request failed");
        } else {
            info!("browser session stopped");
        }
    }
}

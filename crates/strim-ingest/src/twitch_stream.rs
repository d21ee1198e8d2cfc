use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use strim_core::current_unix_timestamp_ms;
use strim_events::{EventAuthor, NormalizedEvent, Platform};

use crate::adapter_contract::{AdapterError, IngestAdapter};

const DEFAULT_WS_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the persistent Twitch chat stream.
#[derive(Debug, Clone)]
pub struct TwitchStreamConfig {
    pub ws_url: String,
    pub tenant_id: String,
    /// IRC channel, including the leading `#`.
    pub channel: String,
    pub nickname: String,
    /// `oauth:`-prefixed token; anonymous read-only login when absent.
    pub oauth_token: Option<String>,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub max_consecutive_failures: u32,
}

impl TwitchStreamConfig {
    pub fn new(tenant_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            tenant_id: tenant_id.into(),
            channel: channel.into(),
            nickname: "justinfan73520".to_string(),
            oauth_token: None,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// One parsed PRIVMSG line from the Twitch IRC stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChatLine {
    pub channel: String,
    pub author_id: String,
    pub author_name: String,
    pub badges: Vec<String>,
    pub is_moderator: bool,
    pub is_broadcaster: bool,
    pub text: String,
}

/// Parses an IRCv3-tagged PRIVMSG line; returns `None` for any other verb.
pub fn parse_chat_line(line: &str) -> Option<ParsedChatLine> {
    let line = line.trim();
    let (tags, rest) = if let Some(stripped) = line.strip_prefix('@') {
        let mut split = stripped.splitn(2, ' ');
        (split.next().unwrap_or_default(), split.next()?.trim_start())
    } else {
        ("", line)
    };
    let rest = rest.strip_prefix(':')?;
    let mut parts = rest.splitn(2, ' ');
    let prefix = parts.next()?;
    let command_rest = parts.next()?;
    if !command_rest.starts_with("PRIVMSG ") {
        return None;
    }
    let command_rest = command_rest.strip_prefix("PRIVMSG ")?;
    let mut target_split = command_rest.splitn(2, " :");
    let channel = target_split.next()?.trim().to_string();
    let text = target_split.next().unwrap_or_default().to_string();

    let login = prefix.split('!').next().unwrap_or_default().to_string();
    let mut author_id = String::new();
    let mut author_name = login.clone();
    let mut badges = Vec::new();
    let mut is_moderator = false;
    let mut is_broadcaster = false;
    for tag in tags.split(';').filter(|tag| !tag.is_empty()) {
        let mut pair = tag.splitn(2, '=');
        let key = pair.next().unwrap_or_default();
        let value = pair.next().unwrap_or_default();
        match key {
            "user-id" => author_id = value.to_string(),
            "display-name" if !value.is_empty() => author_name = value.to_string(),
            "mod" => is_moderator = value == "1",
            "badges" => {
                for badge in value.split(',').filter(|badge| !badge.is_empty()) {
                    let name = badge.split('/').next().unwrap_or_default();
                    if name == "broadcaster" {
                        is_broadcaster = true;
                    }
                    badges.push(name.to_string());
                }
            }
            _ => {}
        }
    }
    if author_id.is_empty() {
        author_id = login;
    }
    Some(ParsedChatLine {
        channel,
        author_id,
        author_name,
        badges,
        is_moderator,
        is_broadcaster,
        text,
    })
}

/// Persistent-stream ingestion adapter for Twitch chat.
///
/// Maintains one WebSocket IRC connection, answers keep-alive PINGs, and
/// reconnects with capped doubling backoff. A bounded run of consecutive
/// connection failures escalates to a fatal unavailable condition that stops
/// retrying.
pub struct TwitchStreamAdapter {
    config: TwitchStreamConfig,
    stream: Option<WsStream>,
    consecutive_failures: u32,
    backoff_ms: u64,
    /// Pause before the next dial; zero while the stream is healthy.
    reconnect_delay_ms: u64,
    connect_attempts: u64,
}

impl TwitchStreamAdapter {
    pub fn new(config: TwitchStreamConfig) -> Self {
        let backoff_ms = config.backoff_base_ms.max(1);
        Self {
            config,
            stream: None,
            consecutive_failures: 0,
            backoff_ms,
            reconnect_delay_ms: 0,
            connect_attempts: 0,
        }
    }

    /// Total connection attempts made over the adapter's lifetime.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts
    }

    fn record_connect_failure(&mut self, detail: String) -> AdapterError {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.schedule_reconnect_delay();
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            warn!(
                tenant_id = self.config.tenant_id.as_str(),
                failures = self.consecutive_failures,
                "twitch stream unavailable, giving up"
            );
            AdapterError::fatal(format!("twitch stream unavailable: {detail}"))
        } else {
            AdapterError::transient(detail)
        }
    }

    /// Arms the pre-dial pause at the current backoff, then doubles the
    /// backoff up to the configured ceiling.
    fn schedule_reconnect_delay(&mut self) {
        self.reconnect_delay_ms = self.backoff_ms;
        self.backoff_ms = self
            .backoff_ms
            .saturating_mul(2)
            .min(self.config.backoff_cap_ms.max(1));
    }

    /// Drops the connection after a mid-stream failure and arms the
    /// reconnect pause, so a server that drops us right after the handshake
    /// is still redialed at the doubling cadence.
    fn record_disconnect(&mut self, detail: String) -> AdapterError {
        self.stream = None;
        self.schedule_reconnect_delay();
        warn!(
            tenant_id = self.config.tenant_id.as_str(),
            next_delay_ms = self.reconnect_delay_ms,
            "twitch stream dropped: {detail}"
        );
        AdapterError::transient(detail)
    }

    async fn ensure_connected(&mut self) -> Result<(), AdapterError> {
        if self.stream.is_some() {
            return Ok(());
        }
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            return Err(AdapterError::fatal(
                "twitch stream unavailable after repeated connection failures",
            ));
        }
        if self.reconnect_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.reconnect_delay_ms)).await;
        }
        self.connect_attempts = self.connect_attempts.saturating_add(1);
        let (mut stream, _) = match connect_async(self.config.ws_url.as_str()).await {
            Ok(connected) => connected,
            Err(error) => {
                return Err(self.record_connect_failure(format!(
                    "twitch connect failed: {error}"
                )));
            }
        };

        let login_lines = self.login_lines();
        for line in login_lines {
            if let Err(error) = stream.send(Message::text(line)).await {
                let _ = stream.close(None).await;
                return Err(
                    self.record_connect_failure(format!("twitch login write failed: {error}"))
                );
            }
        }

        info!(
            tenant_id = self.config.tenant_id.as_str(),
            channel = self.config.channel.as_str(),
            "twitch stream connected"
        );
        self.stream = Some(stream);
        // Backoff resets only once a read succeeds, not here: a server that
        // accepts the handshake and immediately drops us must not collapse
        // the delay back to the base between dials.
        self.consecutive_failures = 0;
        Ok(())
    }

    fn login_lines(&self) -> Vec<String> {
        let mut lines = vec!["CAP REQ :twitch.tv/tags twitch.tv/commands".to_string()];
        if let Some(token) = self.config.oauth_token.as_deref() {
            lines.push(format!("PASS {token}"));
        }
        lines.push(format!("NICK {}", self.config.nickname));
        lines.push(format!("JOIN {}", self.config.channel));
        lines
    }

    fn normalize(&self, parsed: ParsedChatLine) -> NormalizedEvent {
        let mut roles = Vec::new();
        if parsed.is_broadcaster {
            roles.push("owner".to_string());
        }
        if parsed.is_moderator {
            roles.push("moderator".to_string());
        }
        NormalizedEvent::new(
            Platform::Twitch,
            self.config.tenant_id.clone(),
            parsed.channel,
            EventAuthor {
                id: parsed.author_id,
                name: parsed.author_name,
                badges: parsed.badges,
                roles,
            },
            parsed.text,
            current_unix_timestamp_ms(),
        )
    }
}

#[async_trait]
impl IngestAdapter for TwitchStreamAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    fn tenant_id(&self) -> &str {
        self.config.tenant_id.as_str()
    }

    async fn connect(&mut self) -> Result<(), AdapterError> {
        self.ensure_connected().await
    }

    async fn next_batch(&mut self) -> Result<Vec<NormalizedEvent>, AdapterError> {
        self.ensure_connected().await?;
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Err(AdapterError::transient("twitch stream not connected"));
            };
            match stream.next().await {
                Some(Ok(message)) => {
                    // Healthy read; the next disconnect starts backoff from
                    // the base again.
                    self.backoff_ms = self.config.backoff_base_ms.max(1);
                    self.reconnect_delay_ms = 0;
                    let Ok(raw) = message.to_text() else {
                        continue;
                    };
                    let mut parsed_lines = Vec::new();
                    let mut pongs = Vec::new();
                    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
                        if let Some(payload) = line.strip_prefix("PING") {
                            pongs.push(format!("PONG{payload}"));
                            continue;
                        }
                        if let Some(parsed) = parse_chat_line(line) {
                            parsed_lines.push(parsed);
                        }
                    }
                    for pong in pongs {
                        debug!(tenant_id = self.config.tenant_id.as_str(), "twitch keep-alive");
                        if let Err(error) = stream.send(Message::text(pong)).await {
                            return Err(self
                                .record_disconnect(format!("twitch pong write failed: {error}")));
                        }
                    }
                    if !parsed_lines.is_empty() {
                        return Ok(parsed_lines
                            .into_iter()
                            .map(|parsed| self.normalize(parsed))
                            .collect());
                    }
                }
                Some(Err(error)) => {
                    return Err(
                        self.record_disconnect(format!("twitch stream read failed: {error}"))
                    );
                }
                None => {
                    return Err(self.record_disconnect("twitch stream closed by peer".to_string()));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

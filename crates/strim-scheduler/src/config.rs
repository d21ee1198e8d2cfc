use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use strim_events::Platform;

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_snapshot_interval_ms() -> u64 {
    5_000
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_worker_poll_interval_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Root directory for the clip store, encoder output, and snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncoderConfig {
    /// Explicit encoder binary; falls back to `ffmpeg` on `PATH` when unset
    /// or absent.
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_worker_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Global per-platform switch. A paused platform stays configured but no
/// tenant lifecycle task is started for it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformToggle {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub pause_reason: Option<String>,
}

impl Default for PlatformToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            paused: false,
            pause_reason: None,
        }
    }
}

impl PlatformToggle {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.paused
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserBridgeConfig {
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TwitchTenantConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// IRC channel including the leading `#`.
    pub channel: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub oauth_token: Option<String>,
    /// Overrides the chat endpoint, e.g. for an on-prem IRC relay.
    #[serde(default)]
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YoutubeTenantConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub api_key: String,
    pub live_chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TiktokTenantConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub tier: String,
    /// Recorded stream segment used as the clip source.
    pub recording_path: String,
    /// Destination URL published clips are attributed to.
    pub channel_url: String,
    #[serde(default)]
    pub twitch: Option<TwitchTenantConfig>,
    #[serde(default)]
    pub youtube: Option<YoutubeTenantConfig>,
    #[serde(default)]
    pub tiktok: Option<TiktokTenantConfig>,
}

impl TenantConfig {
    /// Platforms this tenant has enabled, before global toggles apply.
    pub fn enabled_platforms(&self) -> Vec<Platform> {
        let mut platforms = Vec::new();
        if self.twitch.as_ref().is_some_and(|config| config.enabled) {
            platforms.push(Platform::Twitch);
        }
        if self.youtube.as_ref().is_some_and(|config| config.enabled) {
            platforms.push(Platform::Youtube);
        }
        if self.tiktok.as_ref().is_some_and(|config| config.enabled) {
            platforms.push(Platform::Tiktok);
        }
        platforms
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrimConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub browser_bridge: BrowserBridgeConfig,
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformToggle>,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl StrimConfig {
    pub fn platform_toggle(&self, platform: Platform) -> PlatformToggle {
        self.platforms
            .get(platform.as_str())
            .cloned()
            .unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for tenant in &self.tenants {
            if tenant.tenant_id.trim().is_empty() {
                bail!("tenant_id must not be empty");
            }
            if !seen.insert(tenant.tenant_id.as_str()) {
                bail!("duplicate tenant_id: {}", tenant.tenant_id);
            }
            crate::tier::SubscriptionTier::parse(&tenant.tier)
                .with_context(|| format!("tenant {}", tenant.tenant_id))?;
        }
        for name in self.platforms.keys() {
            if Platform::parse(name).is_none() {
                bail!("unknown platform in [platforms]: {name}");
            }
        }
        Ok(())
    }
}

/// Loads and validates the runtime configuration document.
pub fn load_config(path: &Path) -> Result<StrimConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: StrimConfig = toml::from_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
[runtime]
data_dir = "/var/lib/strim"
snapshot_interval_ms = 2000

[encoder]
binary_path = "/usr/bin/ffmpeg"
concurrency = 3

[platforms.tiktok]
enabled = true
paused = true
pause_reason = "bridge maintenance"

[[tenants]]
tenant_id = "creator-1"
tier = "pro"
recording_path = "/var/recordings/creator-1.ts"
channel_url = "https://twitch.tv/creator1"

[tenants.twitch]
channel = "#creator1"
oauth_token = "oauth:abc"

[tenants.youtube]
api_key = "yt-key"
live_chat_id = "chat-1"

[tenants.tiktok]
room_id = "room-77"
"##;

    #[test]
    fn functional_sample_document_parses_and_validates() {
        let config: StrimConfig = toml::from_str(SAMPLE).expect("parse");
        config.validate().expect("validate");
        assert_eq!(config.runtime.data_dir, PathBuf::from("/var/lib/strim"));
        assert_eq!(config.encoder.concurrency, 3);
        assert_eq!(config.tenants.len(), 1);
        let tenant = &config.tenants[0];
        assert_eq!(
            tenant.enabled_platforms(),
            vec![Platform::Twitch, Platform::Youtube, Platform::Tiktok]
        );
        let tiktok = config.platform_toggle(Platform::Tiktok);
        assert!(!tiktok.is_active());
        assert_eq!(tiktok.pause_reason.as_deref(), Some("bridge maintenance"));
        // Unconfigured platforms default to active.
        assert!(config.platform_toggle(Platform::Twitch).is_active());
    }

    #[test]
    fn unit_duplicate_tenants_and_bad_tiers_are_rejected() {
        let mut config: StrimConfig = toml::from_str(SAMPLE).expect("parse");
        config.tenants.push(config.tenants[0].clone());
        assert!(config.validate().unwrap_err().to_string().contains("duplicate tenant_id"));

        let mut config: StrimConfig = toml::from_str(SAMPLE).expect("parse");
        config.tenants[0].tier = "platinum".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn functional_load_config_reads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("strim.toml");
        std::fs::write(&path, SAMPLE).expect("write");
        let config = load_config(&path).expect("load");
        assert_eq!(config.tenants[0].tenant_id, "creator-1");
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}

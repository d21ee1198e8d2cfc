use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Subscription tier a tenant is billed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Plus,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Plus => "plus",
            Self::Pro => "pro",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "plus" => Ok(Self::Plus),
            "pro" => Ok(Self::Pro),
            other => bail!("unknown subscription tier: {other}"),
        }
    }
}

/// Concrete runtime limits compiled once at tenant startup and immutable for
/// the tenant's process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantLimits {
    pub max_concurrent_clip_jobs: u64,
    pub clip_max_duration_seconds: u64,
    pub clip_cooldown_seconds: u64,
    pub quota_max_daily_units: u64,
    pub quota_buffer_units: u64,
    pub clip_title_max_length: usize,
}

/// Resolves a subscription tier into runtime limits.
pub fn compile_limits(tier: SubscriptionTier) -> TenantLimits {
    match tier {
        SubscriptionTier::Free => TenantLimits {
            max_concurrent_clip_jobs: 1,
            clip_max_duration_seconds: 30,
            clip_cooldown_seconds: 300,
            quota_max_daily_units: 10_000,
            quota_buffer_units: 1_000,
            clip_title_max_length: 80,
        },
        SubscriptionTier::Plus => TenantLimits {
            max_concurrent_clip_jobs: 2,
            clip_max_duration_seconds: 60,
            clip_cooldown_seconds: 120,
            quota_max_daily_units: 50_000,
            quota_buffer_units: 5_000,
            clip_title_max_length: 100,
        },
        SubscriptionTier::Pro => TenantLimits {
            max_concurrent_clip_jobs: 4,
            clip_max_duration_seconds: 120,
            clip_cooldown_seconds: 30,
            quota_max_daily_units: 200_000,
            quota_buffer_units: 20_000,
            clip_title_max_length: 120,
        },
    }
}

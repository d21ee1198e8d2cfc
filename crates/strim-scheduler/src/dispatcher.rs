use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use strim_clip::{ClipDestination, ClipEnqueueRequest, ClipRequester, ClipSource, ClipStore};
use strim_core::lock_unpoisoned;
use strim_events::{JobDispatcher, TenantContext, CLIP_JOB_TYPE};
use strim_quota::CooldownLedger;

use crate::admission::JobAdmissionLedger;
use crate::tier::TenantLimits;

const CLIP_COOLDOWN_KEY: &str = "clip";

/// Everything the dispatcher needs to turn a tenant's clip request into a
/// store record.
#[derive(Debug, Clone)]
pub struct TenantClipProfile {
    pub limits: TenantLimits,
    /// Recorded stream segment clips are cut from.
    pub recording_path: String,
    /// Canonical destination URL for the tenant's published clips.
    pub channel_url: String,
}

#[derive(Debug, Deserialize)]
struct ClipJobPayload {
    #[serde(default)]
    duration_seconds: Option<u64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    requester_id: String,
    #[serde(default)]
    requester_name: String,
}

/// The single admission gate in front of the clip store.
///
/// Every enqueue path goes through `dispatch`, which applies the tenant's
/// cooldown, caps the requested duration at the tier limit, and checks the
/// concurrent-job budget before creating the record. A rejection is an error
/// to the immediate caller (the action executor turns it into a failed
/// outcome) and the cooldown is only marked after acceptance, so rejected
/// attempts never extend the window.
pub struct ClipJobDispatcher {
    store: Arc<ClipStore>,
    admission: Arc<JobAdmissionLedger>,
    cooldown: CooldownLedger,
    profiles: Mutex<BTreeMap<String, TenantClipProfile>>,
}

impl ClipJobDispatcher {
    pub fn new(
        store: Arc<ClipStore>,
        admission: Arc<JobAdmissionLedger>,
        cooldown: CooldownLedger,
    ) -> Self {
        Self {
            store,
            admission,
            cooldown,
            profiles: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers (or replaces) a tenant's clip profile. Called by the
    /// scheduler at tenant startup.
    pub fn register_tenant(&self, tenant_id: impl Into<String>, profile: TenantClipProfile) {
        lock_unpoisoned(&self.profiles).insert(tenant_id.into(), profile);
    }

    fn profile_for(&self, tenant_id: &str) -> Option<TenantClipProfile> {
        lock_unpoisoned(&self.profiles).get(tenant_id).cloned()
    }
}

#[async_trait]
impl JobDispatcher for ClipJobDispatcher {
    async fn dispatch(
        &self,
        job_type: &str,
        tenant: &TenantContext,
        payload: &Value,
    ) -> Result<String> {
        if job_type != CLIP_JOB_TYPE {
            bail!("unknown job type: {job_type}");
        }
        let Some(profile) = self.profile_for(&tenant.tenant_id) else {
            bail!("no clip profile registered for tenant {}", tenant.tenant_id);
        };
        let job: ClipJobPayload = serde_json::from_value(payload.clone())
            .map_err(|error| anyhow::anyhow!("malformed clip job payload: {error}"))?;

        let limits = &profile.limits;
        if !self.cooldown.is_ready(
            &tenant.tenant_id,
            CLIP_COOLDOWN_KEY,
            limits.clip_cooldown_seconds,
        ) {
            warn!(
                tenant_id = tenant.tenant_id.as_str(),
                "clip request rejected, cooldown active"
            );
            bail!(
                "clip cooldown active for tenant {} ({}s window)",
                tenant.tenant_id,
                limits.clip_cooldown_seconds
            );
        }
        if !self.admission.can_start_job(
            &tenant.tenant_id,
            CLIP_JOB_TYPE,
            limits.max_concurrent_clip_jobs,
        ) {
            warn!(
                tenant_id = tenant.tenant_id.as_str(),
                max_concurrent = limits.max_concurrent_clip_jobs,
                "clip request rejected, concurrent job limit reached"
            );
            bail!(
                "clip job limit reached for tenant {} (max {})",
                tenant.tenant_id,
                limits.max_concurrent_clip_jobs
            );
        }

        let requested = job
            .duration_seconds
            .unwrap_or(limits.clip_max_duration_seconds);
        let duration_seconds = requested.min(limits.clip_max_duration_seconds).max(1);
        if duration_seconds < requested {
            info!(
                tenant_id = tenant.tenant_id.as_str(),
                requested, capped = duration_seconds, "clip duration capped at tier limit"
            );
        }

        let record = self.store.enqueue(
            ClipEnqueueRequest {
                tenant_id: tenant.tenant_id.clone(),
                source: ClipSource {
                    path: profile.recording_path.clone(),
                    title: job.title.unwrap_or_default(),
                    start_offset_seconds: 0,
                    duration_seconds,
                },
                requester: ClipRequester {
                    id: job.requester_id,
                    name: job.requester_name,
                },
                title_max_length: limits.clip_title_max_length,
            },
            ClipDestination {
                platform: tenant.platform,
                channel_url: profile.channel_url.clone(),
            },
        )?;
        self.admission.job_started(&tenant.tenant_id, CLIP_JOB_TYPE);
        self.cooldown.mark_fired(&tenant.tenant_id, CLIP_COOLDOWN_KEY);
        Ok(record.clip_id)
    }
}

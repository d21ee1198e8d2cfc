use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use strim_core::{current_unix_timestamp, is_cooldown_elapsed, lock_unpoisoned};

/// Single source of truth for per-(tenant, trigger-key) cooldowns.
///
/// Queried before any cooldown-gated action and marked only after the action
/// is accepted, so a rejected attempt never extends the window.
#[derive(Debug, Default, Clone)]
pub struct CooldownLedger {
    last_fires: Arc<Mutex<BTreeMap<(String, String), u64>>>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the (tenant, key) pair is outside `window_seconds`.
    pub fn is_ready(&self, tenant_id: &str, key: &str, window_seconds: u64) -> bool {
        self.is_ready_at(tenant_id, key, window_seconds, current_unix_timestamp())
    }

    /// Clock-injected variant of [`CooldownLedger::is_ready`].
    pub fn is_ready_at(
        &self,
        tenant_id: &str,
        key: &str,
        window_seconds: u64,
        now_unix: u64,
    ) -> bool {
        let last_fires = lock_unpoisoned(&self.last_fires);
        let last_fire = last_fires
            .get(&(tenant_id.to_string(), key.to_string()))
            .copied();
        is_cooldown_elapsed(last_fire, window_seconds, now_unix)
    }

    /// Records acceptance of a cooldown-gated action at the current time.
    pub fn mark_fired(&self, tenant_id: &str, key: &str) {
        self.mark_fired_at(tenant_id, key, current_unix_timestamp());
    }

    /// Clock-injected variant of [`CooldownLedger::mark_fired`].
    pub fn mark_fired_at(&self, tenant_id: &str, key: &str, now_unix: u64) {
        let mut last_fires = lock_unpoisoned(&self.last_fires);
        last_fires.insert((tenant_id.to_string(), key.to_string()), now_unix);
    }
}

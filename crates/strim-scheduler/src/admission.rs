use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use strim_core::lock_unpoisoned;

/// Per-tenant, per-job-type active job counts consulted by admission checks.
///
/// Counts are driven by begin/end hooks around job execution. A decrement on
/// an already-zero counter indicates drift between the hooks; the ledger
/// floors at zero and logs instead of letting the count go negative, so one
/// missed begin hook can never wedge admission open or shut.
#[derive(Debug, Default, Clone)]
pub struct JobAdmissionLedger {
    active: Arc<Mutex<BTreeMap<(String, String), u64>>>,
}

impl JobAdmissionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_started(&self, tenant_id: &str, job_type: &str) {
        let mut active = lock_unpoisoned(&self.active);
        let count = active
            .entry((tenant_id.to_string(), job_type.to_string()))
            .or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn job_finished(&self, tenant_id: &str, job_type: &str) {
        let mut active = lock_unpoisoned(&self.active);
        match active.get_mut(&(tenant_id.to_string(), job_type.to_string())) {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                warn!(
                    tenant_id,
                    job_type, "job_finished without matching job_started, count stays at zero"
                );
            }
        }
    }

    pub fn active_count(&self, tenant_id: &str, job_type: &str) -> u64 {
        lock_unpoisoned(&self.active)
            .get(&(tenant_id.to_string(), job_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Admission check: true when another job of this type fits under
    /// `max_concurrent`.
    pub fn can_start_job(&self, tenant_id: &str, job_type: &str, max_concurrent: u64) -> bool {
        self.active_count(tenant_id, job_type) < max_concurrent
    }
}

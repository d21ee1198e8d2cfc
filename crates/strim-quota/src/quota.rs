use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::warn;

use strim_core::{current_unix_timestamp, lock_unpoisoned};

const QUOTA_WINDOW_SECONDS: u64 = 24 * 60 * 60;

/// Result of consuming quota units, in increasing order of severity.
///
/// `BufferWarning` is raised exactly once per crossing into the warning
/// buffer; callers continue (possibly slower). `Exhausted` is fatal for the
/// consuming adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    Ok,
    BufferWarning,
    Exhausted,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Point-in-time view of one tenant+platform tracker.
pub struct QuotaTrackerSnapshot {
    pub tenant_id: String,
    pub platform: String,
    pub max_units: u64,
    pub buffer_units: u64,
    pub consumed_units: u64,
    pub window_started_unix: u64,
}

#[derive(Debug)]
struct QuotaTrackerState {
    max_units: u64,
    buffer_units: u64,
    consumed_units: u64,
    window_started_unix: u64,
    buffer_warned: bool,
}

impl QuotaTrackerState {
    fn roll_window_if_elapsed(&mut self, now_unix: u64) {
        if now_unix.saturating_sub(self.window_started_unix) >= QUOTA_WINDOW_SECONDS {
            self.consumed_units = 0;
            self.buffer_warned = false;
            self.window_started_unix = now_unix;
        }
    }

    fn consume(&mut self, units: u64, now_unix: u64) -> QuotaOutcome {
        self.roll_window_if_elapsed(now_unix);
        self.consumed_units = self.consumed_units.saturating_add(units);
        if self.consumed_units >= self.max_units {
            return QuotaOutcome::Exhausted;
        }
        let warning_threshold = self.max_units.saturating_sub(self.buffer_units);
        if self.consumed_units >= warning_threshold && !self.buffer_warned {
            self.buffer_warned = true;
            return QuotaOutcome::BufferWarning;
        }
        QuotaOutcome::Ok
    }
}

/// Authoritative per tenant+platform API unit budget ledger.
///
/// Trackers reset on a rolling day boundary anchored at the first consume
/// after the previous window elapsed.
#[derive(Debug, Default, Clone)]
pub struct QuotaLedger {
    trackers: Arc<Mutex<BTreeMap<(String, String), QuotaTrackerState>>>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tracker for `(tenant, platform)`. Re-registering replaces
    /// the limits but keeps the consumed counter of any live window.
    pub fn register(
        &self,
        tenant_id: &str,
        platform: &str,
        max_units: u64,
        buffer_units: u64,
    ) -> Result<()> {
        if max_units == 0 {
            bail!("quota max_units must be positive");
        }
        if buffer_units >= max_units {
            bail!(
                "quota buffer_units ({buffer_units}) must be below max_units ({max_units})"
            );
        }
        let mut trackers = lock_unpoisoned(&self.trackers);
        let key = (tenant_id.to_string(), platform.to_string());
        match trackers.get_mut(&key) {
            Some(state) => {
                state.max_units = max_units;
                state.buffer_units = buffer_units;
            }
            None => {
                trackers.insert(
                    key,
                    QuotaTrackerState {
                        max_units,
                        buffer_units,
                        consumed_units: 0,
                        window_started_unix: current_unix_timestamp(),
                        buffer_warned: false,
                    },
                );
            }
        }
        Ok(())
    }

    /// Charges `units` against the tracker and reports the resulting posture.
    /// An unregistered tracker is treated as exhausted so a misconfigured
    /// adapter can never poll unmetered.
    pub fn consume(&self, tenant_id: &str, platform: &str, units: u64) -> QuotaOutcome {
        self.consume_at(tenant_id, platform, units, current_unix_timestamp())
    }

    /// Clock-injected variant of [`QuotaLedger::consume`].
    pub fn consume_at(
        &self,
        tenant_id: &str,
        platform: &str,
        units: u64,
        now_unix: u64,
    ) -> QuotaOutcome {
        let mut trackers = lock_unpoisoned(&self.trackers);
        let key = (tenant_id.to_string(), platform.to_string());
        match trackers.get_mut(&key) {
            Some(state) => {
                let outcome = state.consume(units, now_unix);
                if outcome == QuotaOutcome::BufferWarning {
                    warn!(
                        tenant_id,
                        platform,
                        consumed = state.consumed_units,
                        max = state.max_units,
                        "quota entered warning buffer"
                    );
                }
                outcome
            }
            None => {
                warn!(tenant_id, platform, "quota consume without registration");
                QuotaOutcome::Exhausted
            }
        }
    }

    /// Returns a snapshot of one tracker, if registered.
    pub fn snapshot(&self, tenant_id: &str, platform: &str) -> Option<QuotaTrackerSnapshot> {
        let trackers = lock_unpoisoned(&self.trackers);
        let key = (tenant_id.to_string(), platform.to_string());
        trackers.get(&key).map(|state| QuotaTrackerSnapshot {
            tenant_id: tenant_id.to_string(),
            platform: platform.to_string(),
            max_units: state.max_units,
            buffer_units: state.buffer_units,
            consumed_units: state.consumed_units,
            window_started_unix: state.window_started_unix,
        })
    }
}

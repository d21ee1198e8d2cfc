//! Quota unit budgets and cooldown bookkeeping shared across adapters and
//! command handling.
//!
//! Both ledgers are lock-protected shared state. Quota consumption reports
//! expected, frequent conditions (buffer warning, exhaustion) as a status
//! enum rather than errors, so callers branch without exception-style flow.

pub mod cooldown;
pub mod quota;

pub use cooldown::CooldownLedger;
pub use quota::{QuotaLedger, QuotaOutcome, QuotaTrackerSnapshot};

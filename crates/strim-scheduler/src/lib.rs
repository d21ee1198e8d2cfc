//! Runtime scheduler: tenant lifecycle, admission, and configuration.
//!
//! The scheduler is the composition root. It compiles each tenant's
//! subscription tier into immutable limits, spawns one ingestion lifecycle
//! task per enabled platform, owns the job admission ledger, fronts the clip
//! store with the single dispatch gate, and tears everything down in one
//! awaited shutdown.

pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod scheduler;
pub mod tier;

pub use admission::JobAdmissionLedger;
pub use config::{load_config, StrimConfig, TenantConfig};
pub use dispatcher::{ClipJobDispatcher, TenantClipProfile};
pub use scheduler::RuntimeScheduler;
pub use tier::{compile_limits, SubscriptionTier, TenantLimits};

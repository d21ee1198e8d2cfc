//! Foundational low-level utilities shared across Strim crates.
//!
//! Provides time helpers, atomic file writes, JSONL appends, short token
//! generation, and the telemetry sink contract consumed by every runtime
//! component.

pub mod atomic_io;
pub mod jsonl;
pub mod telemetry;
pub mod time_utils;
pub mod token;

pub use atomic_io::write_text_atomic;
pub use jsonl::append_jsonl_record;
pub use telemetry::{
    ActionResultRecord, InMemoryTelemetry, NoopTelemetry, PlatformStatus, TelemetrySink,
    TelemetrySnapshot,
};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_cooldown_elapsed};
pub use token::generate_short_token;

/// Acquires a std mutex guard, recovering the inner value if poisoned.
pub fn lock_unpoisoned<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

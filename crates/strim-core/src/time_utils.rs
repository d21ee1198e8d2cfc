/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns true when `last_fire_unix` is absent or at least `window_seconds`
/// in the past relative to `now_unix`.
pub fn is_cooldown_elapsed(last_fire_unix: Option<u64>, window_seconds: u64, now_unix: u64) -> bool {
    match last_fire_unix {
        None => true,
        Some(last_fire) => now_unix.saturating_sub(last_fire) >= window_seconds,
    }
}

//! Time helpers.
//!
//! All persisted timestamps (prekey consumption, fingerprints, sent keys,
//! registration) are Unix milliseconds.

/// Milliseconds in one second
pub const MILLIS_PER_SECOND: i64 = 1_000;

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whether `timestamp` is at least `max_age_secs` older than `now`.
pub fn is_older_than(timestamp: i64, now: i64, max_age_secs: i64) -> bool {
    now.saturating_sub(timestamp) >= max_age_secs.saturating_mul(MILLIS_PER_SECOND)
}

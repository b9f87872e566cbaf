use std::time::SystemTime;

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01). Clocks set before the
/// epoch report zero.
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Signed difference in seconds between the local clock and the supplied remote timestamp.
#[inline]
pub fn skew_secs(remote: u64) -> i64 {
    timestamp_secs() as i64 - remote as i64
}

//! Wall-clock helpers.

use chrono::{DateTime, Duration, Utc};

/// Current UTC time.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Time `secs` seconds from now, saturating on overflow.
#[must_use]
pub fn after_secs(secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    let delta = Duration::try_seconds(secs).unwrap_or(Duration::MAX);
    now().checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

//! Throttling support for the Box API
//!
//! Box answers bursts with HTTP 429 and a `Retry-After` header. The client
//! sleeps for the advertised delay and resends, up to a bounded number of
//! attempts.

use std::time::Duration;

use tracing::warn;

/// Wait used when the server sends no usable `Retry-After` header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Number of resends after a 429 before giving up
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Longest delay honored from an HTTP-date `Retry-After`
const MAX_RETRY_AFTER_SECS: u64 = 3600;

/// Parses a `Retry-After` header value.
///
/// Accepts delay-seconds (`"120"`) or an HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates in the past, dates more than
/// an hour away, and garbage fall back to `default`.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let remaining = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Ok(secs) = u64::try_from(remaining.num_seconds()) {
            if secs > 0 && secs <= MAX_RETRY_AFTER_SECS {
                return Duration::from_secs(secs);
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}

use std::time::Duration;

use http::header::RETRY_AFTER;

pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF_BASE_MS: u64 = 100;
const RETRY_BACKOFF_MAX_MS: u64 = 1_000;
const RETRY_AFTER_MAX_SECS: u64 = 30;

#[inline]
pub(crate) fn should_retry_upstream_status(status: http::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 503 | 529)
}

/// Connection-level failures worth one more attempt before any byte of the
/// response was read.
pub(crate) fn should_retry_transport_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }
    let message = err.to_string().to_ascii_lowercase();
    [
        "connection reset",
        "connection aborted",
        "broken pipe",
        "unexpected eof",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

#[inline]
pub(crate) fn retry_backoff_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.min(10);
    Duration::from_millis(
        RETRY_BACKOFF_BASE_MS
            .saturating_mul(multiplier)
            .min(RETRY_BACKOFF_MAX_MS),
    )
}

/// Delay before the next attempt: `Retry-After` seconds when present, capped,
/// otherwise exponential backoff.
pub(crate) fn retry_delay(headers: &http::HeaderMap, attempt: u32) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs.min(RETRY_AFTER_MAX_SECS)))
        .unwrap_or_else(|| retry_backoff_delay(attempt))
}

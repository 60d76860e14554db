// ── Retry & backoff for the game API client ─────────────────────────────────
// Ported from the teacher's `engine::http` retry helper: exponential backoff
// with jitter, `Retry-After` awareness, and a shared retryable-status check.
// The core itself never calls this directly — routines see only the final
// success/failure from `GameClient` (§7) — but the client needs it to honor
// the "HTTP collaborator retries 429/5xx" contract from §6.

use std::time::Duration;

pub const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 15_000;

/// 429 (rate limit) and 5xx are transient; everything else is a final result.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Exponential backoff capped at `MAX_RETRY_DELAY_MS`, honoring a
/// server-provided `Retry-After` (seconds) when present, with jitter to
/// avoid thundering-herd retries across characters.
pub fn backoff_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS.saturating_mul(1u64 << attempt.min(8));
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay_ms = match retry_after_secs {
        Some(secs) => (secs.saturating_mul(1000)).max(capped_ms).min(60_000),
        None => capped_ms,
    };
    Duration::from_millis(apply_jitter(delay_ms))
}

fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = base_ms / 4;
    if jitter_range == 0 {
        return base_ms.max(50);
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let offset = nanos % (2 * jitter_range + 1);
    (base_ms - jitter_range + offset).max(50)
}

/// Parse an integer-seconds `Retry-After` header value. HTTP-date form is not
/// supported; callers fall back to computed backoff in that case.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(476));
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let d0 = backoff_delay(0, None);
        let d3 = backoff_delay(3, None);
        assert!(d3 >= d0);
        assert!(d3 <= Duration::from_millis(MAX_RETRY_DELAY_MS + MAX_RETRY_DELAY_MS / 4));
    }

    #[test]
    fn retry_after_header_respected() {
        let d = backoff_delay(0, Some(2));
        assert!(d.as_millis() >= 1500);
    }

    #[test]
    fn parses_numeric_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after("Wed, 21 Oct"), None);
    }
}

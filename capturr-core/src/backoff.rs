//! Retry delay policy for failed sends
//!
//! Soft failures grow exponentially (2, 4, 8 ... 64 seconds) plus up to one
//! second of jitter so that a queue full of items does not retry in lockstep.
//! Auth failures get a flat cooldown; they are latched and skipped by the
//! orchestrator anyway, so the value only matters if the latch is cleared
//! mid-cooldown.

use std::time::Duration;

use rand::Rng;

/// Cooldown returned for 401/403 responses
pub const AUTH_COOLDOWN: Duration = Duration::from_secs(60);

/// Exponent cap: 2^6 = 64 seconds
pub const MAX_EXPONENT: u32 = 6;

/// Whether an HTTP status latches the hard-error flag.
pub fn is_auth_status(status: Option<u16>) -> bool {
    matches!(status, Some(401) | Some(403))
}

/// Delay before the next automatic attempt.
///
/// `attempt` is the record's attempt count after the failed dispatch.
pub fn delay(attempt: u32, status: Option<u16>) -> Duration {
    delay_with_jitter(attempt, status, rand::thread_rng().gen_range(0.0..=1.0))
}

/// [`delay`] with the jitter fraction supplied by the caller (0.0..=1.0).
pub fn delay_with_jitter(attempt: u32, status: Option<u16>, jitter: f64) -> Duration {
    if is_auth_status(status) {
        return AUTH_COOLDOWN;
    }

    let capped = attempt.min(MAX_EXPONENT);
    let base = 2f64.powi(capped as i32);
    Duration::from_secs_f64(base + jitter.clamp(0.0, 1.0))
}

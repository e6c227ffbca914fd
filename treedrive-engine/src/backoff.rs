use std::time::Duration;

use rand::Rng;

// Past this many doublings the ceiling has long hit any sane cap.
const MAX_DOUBLINGS: u32 = 16;

/// Retry delay policy for the job poll loop: capped exponential growth with
/// a uniform draw between the base and the attempt's ceiling, so clients
/// that lost the server at the same moment spread their retries out.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Largest delay allowed for `attempt` (0 is the first retry): the base
    /// doubled per attempt, clamped to the configured maximum.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let doubled =
            whole_ms(self.base).saturating_mul(1u64 << attempt.min(MAX_DOUBLINGS));
        Duration::from_millis(doubled.min(whole_ms(self.max)))
    }

    /// Jittered delay in `[base, ceiling(attempt)]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let cap = whole_ms(self.ceiling(attempt));
        let floor = whole_ms(self.base).min(cap);
        Duration::from_millis(rand::thread_rng().gen_range(floor..=cap))
    }
}

fn whole_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

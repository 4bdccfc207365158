//! # Monotonic Time Base
//!
//! Every timestamp in the pipeline is an `i64` count of nanoseconds since a
//! process-wide epoch captured on first use. Hardware samples, the clock
//! model, and channel payloads all share this base, so deadlines can be
//! converted back into [`Instant`]s for condition-variable waits.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

#[inline]
fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds elapsed since the process epoch.
///
/// Never returns 0 once time has advanced past the epoch, so a zero
/// timestamp can keep meaning "no tick".
#[must_use]
pub fn monotonic_now_ns() -> i64 {
    let elapsed = epoch().elapsed();
    i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX).max(1)
}

/// Converts a timestamp back into an [`Instant`].
///
/// Negative timestamps clamp to the epoch.
#[must_use]
pub fn instant_at_ns(timestamp_ns: i64) -> Instant {
    let offset = Duration::from_nanos(timestamp_ns.max(0).unsigned_abs());
    epoch() + offset
}

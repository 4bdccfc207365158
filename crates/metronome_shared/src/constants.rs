//! Timing constants shared across the vsync pipeline.
//!
//! All durations are nanoseconds unless the name says otherwise.

/// Capacity of the sampler's hardware timestamp ring.
pub const MAX_SAMPLES: usize = 32;

/// Samples needed before the sampler publishes a refined model.
pub const MIN_SAMPLES_FOR_UPDATE: usize = 6;

/// Hardware samples tolerated between present fences before the error
/// estimate is discarded.
pub const MAX_SAMPLES_WITHOUT_PRESENT: usize = 4;

/// Slots in the present-fence ring.
pub const NUM_PRESENT: usize = 8;

/// Squared-error threshold of the sampler, (200 µs)².
pub const DEFAULT_ERROR_THRESHOLD_NS2: i64 = 40_000_000_000;

/// Upper clamp of the generator's wake-up latency estimate (1.5 ms).
pub const DEFAULT_MAX_WAKEUP_DELAY_NS: i64 = 1_500_000;

/// A listener due within this window of "now" fires on the current wake (500 µs).
pub const DEFAULT_FIRE_TOLERANCE_NS: i64 = 500_000;

/// Software tick interval used when requesters wait without hardware ticks.
pub const DEFAULT_SOFT_VSYNC_PERIOD_MS: u64 = 16;

/// Size of one tick on the wire.
pub const VSYNC_PAYLOAD_SIZE: usize = std::mem::size_of::<i64>();

/// Requested socket buffer size of each vsync channel end.
///
/// The kernel rounds this up to its own minimum, which still leaves room
/// for only a handful of queued ticks.
pub const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Nanoseconds per millisecond.
pub const NS_PER_MS: i64 = 1_000_000;

/// Nanoseconds per second.
pub const NS_PER_SEC: i64 = 1_000_000_000;

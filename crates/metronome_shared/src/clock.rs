//! # Clock Model & Vsync Events
//!
//! The estimated refresh timeline and the per-tick event that flows from
//! the generator into every distributor.
//!
//! ```text
//!   referenceTime
//!   |  phase
//!   |<--->|
//!   |-----|---------|---------|---------|----> time
//!         ^ tick    ^ tick    ^ tick
//!         |<------->|
//!           period
//! ```

use std::fmt;

/// Estimated refresh timeline.
///
/// All values are nanoseconds on the [`crate::time`] base.
/// `period == 0` means "no model yet"; the generator stays idle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockModel {
    /// Refresh period.
    pub period: i64,
    /// Offset of the first tick from `reference_time`, may be negative.
    pub phase: i64,
    /// Anchor timestamp (first hardware sample of the session).
    pub reference_time: i64,
}

impl ClockModel {
    /// Creates a model.
    #[inline]
    #[must_use]
    pub const fn new(period: i64, phase: i64, reference_time: i64) -> Self {
        Self {
            period,
            phase,
            reference_time,
        }
    }

    /// Returns true if the model can drive ticks.
    #[inline]
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.period > 0
    }

    /// Returns the refresh rate in Hz, or 0.0 without a model.
    #[must_use]
    pub fn refresh_rate_hz(&self) -> f64 {
        if self.period <= 0 {
            return 0.0;
        }
        1_000_000_000.0 / self.period as f64
    }
}

/// One tick handed from the controller to a distributor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VSyncEvent {
    /// Tick timestamp; 0 means "no pending tick".
    pub timestamp: i64,
    /// Monotonic tick counter of the distributor.
    pub vsync_count: i64,
}

/// Delivery regime of a connection.
///
/// The raw wire/diagnostic encoding is the historical tri-state:
///
/// | raw | regime |
/// |-----|--------|
/// | < 0 | [`VSyncRate::Idle`] |
/// | 0   | [`VSyncRate::ArmedOnce`] |
/// | > 0 | [`VSyncRate::Periodic`] every Nth tick |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VSyncRate {
    /// No pending interest.
    #[default]
    Idle,
    /// Deliver exactly one future tick, then go idle.
    ArmedOnce,
    /// Deliver every Nth tick (N > 0).
    Periodic(u32),
}

impl VSyncRate {
    /// Decodes the raw tri-state.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            r if r < 0 => Self::Idle,
            0 => Self::ArmedOnce,
            r => Self::Periodic(r.unsigned_abs()),
        }
    }

    /// Encodes as the raw tri-state.
    #[must_use]
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Idle => -1,
            Self::ArmedOnce => 0,
            Self::Periodic(n) => i32::try_from(n).unwrap_or(i32::MAX),
        }
    }

    /// Returns true unless idle.
    #[inline]
    #[must_use]
    pub const fn wants_ticks(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for VSyncRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ArmedOnce => write!(f, "once"),
            Self::Periodic(n) => write!(f, "every {n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_raw_encoding() {
        assert_eq!(VSyncRate::from_raw(-1), VSyncRate::Idle);
        assert_eq!(VSyncRate::from_raw(-7), VSyncRate::Idle);
        assert_eq!(VSyncRate::from_raw(0), VSyncRate::ArmedOnce);
        assert_eq!(VSyncRate::from_raw(3), VSyncRate::Periodic(3));

        assert_eq!(VSyncRate::Idle.as_raw(), -1);
        assert_eq!(VSyncRate::ArmedOnce.as_raw(), 0);
        assert_eq!(VSyncRate::Periodic(2).as_raw(), 2);
    }

    #[test]
    fn test_rate_wants_ticks() {
        assert!(!VSyncRate::Idle.wants_ticks());
        assert!(VSyncRate::ArmedOnce.wants_ticks());
        assert!(VSyncRate::Periodic(1).wants_ticks());
    }

    #[test]
    fn test_model_refresh_rate() {
        let model = ClockModel::new(16_666_667, 0, 0);
        assert!(model.is_running());
        assert!((model.refresh_rate_hz() - 60.0).abs() < 0.01);
        assert_eq!(ClockModel::default().refresh_rate_hz(), 0.0);
    }
}

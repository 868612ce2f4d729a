use chrono::{DateTime, Duration, Utc};

/// Wall-clock source for the session engine.
///
/// Services take their "now" from a `Clock` so study-time and heartbeat
/// logic can be driven deterministically in tests.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// Move a fixed clock forward. No effect on `Clock::System`.
    pub fn advance(&mut self, delta: Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }
}

/// Baseline instant that makes `elapsed_seconds(baseline, now)` equal
/// `study_time_seconds` at `now`.
#[must_use]
pub fn baseline_for(study_time_seconds: u64, now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = i64::try_from(study_time_seconds).unwrap_or(i64::MAX);
    now.checked_sub_signed(Duration::seconds(secs)).unwrap_or(now)
}

/// Whole seconds elapsed between `baseline` and `now`, floored at zero.
#[must_use]
pub fn elapsed_seconds(baseline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from(now.signed_duration_since(baseline).num_seconds()).unwrap_or(0)
}

/// Deterministic timestamp for tests (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

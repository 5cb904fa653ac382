//! Time types used for deadlines.
//! Durations are signed, so that arithmetic on deadlines never panics;
//! negative durations are treated as zero wherever we sleep.

/// A signed Duration.
pub type Duration = time::Duration;

/// Monotonic clock time.
pub type Instant = std::time::Instant;

/// Represents an optional deadline.
/// Isomorphic to `Option<Instant>`, but with a purposefully defined total order:
/// by the definition of derive(PartialOrd), Finite(...) < Infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Deadline {
    /// Finite deadline.
    Finite(Instant),
    /// Infinite deadline.
    Infinite,
}

impl From<Instant> for Deadline {
    fn from(t: Instant) -> Self {
        Self::Finite(t)
    }
}

impl Deadline {
    /// Deadline `d` after `t`. Overflowing deadlines are infinite.
    pub fn after(t: Instant, d: Duration) -> Self {
        t.checked_add(to_std(d)).map_or(Self::Infinite, Self::Finite)
    }
}

/// Current time according to the monotonic clock.
/// Reads the tokio clock, so that `tokio::time::pause()` works in tests.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Converts to `std::time::Duration`, clamping negative values to zero.
pub fn to_std(d: Duration) -> std::time::Duration {
    d.try_into().unwrap_or_default()
}

/// Sleeps until the deadline. Never returns for an infinite deadline.
pub(crate) async fn sleep_until(deadline: Deadline) {
    match deadline {
        Deadline::Finite(t) => tokio::time::sleep_until(t.into()).await,
        Deadline::Infinite => std::future::pending().await,
    }
}

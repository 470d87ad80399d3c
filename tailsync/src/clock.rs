use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;

/// Source of the current time.
///
/// Every time based decision of the engine reads the time through this trait so that the
/// staleness thresholds can be exercised without waiting for hours.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Converts the configured threshold `field` of `hours` hours into a [`TimeDelta`].
///
/// Fails with [`ErrorKind::ConfigError`] when the value cannot be represented.
pub fn threshold_hours(field: &'static str, hours: u64) -> SyncResult<TimeDelta> {
    i64::try_from(hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .ok_or_else(|| {
            sync_error!(
                ErrorKind::ConfigError,
                "Time threshold out of range",
                format!("`{field}` is {hours}h")
            )
        })
}

/// Returns `now` moved back by `threshold`.
///
/// Fails with [`ErrorKind::ConfigError`] when the result is before the earliest representable
/// time.
pub fn hours_before(
    now: DateTime<Utc>,
    field: &'static str,
    threshold: TimeDelta,
) -> SyncResult<DateTime<Utc>> {
    now.checked_sub_signed(threshold).ok_or_else(|| {
        sync_error!(
            ErrorKind::ConfigError,
            "Time threshold out of range",
            format!("`{field}` of {}h reaches before the earliest time", threshold.num_hours())
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_hours_converts_representable_values() {
        assert_eq!(threshold_hours("stream.danger_zone_hours", 20).unwrap(), TimeDelta::hours(20));
    }

    #[test]
    fn oversized_thresholds_are_config_errors() {
        let err = threshold_hours("stream.danger_zone_hours", u64::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        let err = threshold_hours("snapshot.restart_after_hours", i64::MAX as u64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn hours_before_rejects_underflow() {
        let now = DateTime::from_timestamp(1_750_000_000, 0).unwrap();
        let threshold = threshold_hours("stream.danger_zone_hours", 10_000_000_000).unwrap();

        let err = hours_before(now, "stream.danger_zone_hours", threshold).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        let start = hours_before(now, "stream.danger_zone_hours", TimeDelta::hours(2)).unwrap();
        assert_eq!(now - start, TimeDelta::hours(2));
    }
}

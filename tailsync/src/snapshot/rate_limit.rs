use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Token bucket pacing the snapshot reads of a table.
///
/// Permits are granted at a fixed rate without a burst allowance. A request never waits for its
/// own permits: it only waits until the permits of the previous request are paid for, and its
/// own cost delays the next request. This lets the cost of a scan page be recalibrated after the
/// page was read, once the capacity it consumed is known.
#[derive(Debug)]
pub struct RateLimiter {
    permit_interval: Duration,
    next_free: Instant,
}

impl RateLimiter {
    /// Creates a limiter granting `permits_per_second` permits.
    ///
    /// Returns [`None`] when the rate is not strictly positive, which disables rate limiting.
    pub fn new(permits_per_second: f64) -> Option<Self> {
        if !permits_per_second.is_finite() || permits_per_second <= 0.0 {
            return None;
        }

        Some(Self {
            permit_interval: Duration::from_secs_f64(1.0 / permits_per_second),
            next_free: Instant::now(),
        })
    }

    /// Creates the limiter of a table scan: the provisioned read capacity divided by `divisor`.
    pub fn for_read_capacity(read_capacity_units: Option<u64>, divisor: u64) -> Option<Self> {
        let read_capacity_units = read_capacity_units.filter(|units| *units > 0)?;

        Self::new(read_capacity_units as f64 / divisor.max(1) as f64)
    }

    /// Acquires `permits`, waiting for the debt of the previous acquisition if needed.
    ///
    /// Returns how long the call waited.
    pub async fn acquire(&mut self, permits: u64) -> Duration {
        let now = Instant::now();
        let waited = self.next_free.saturating_duration_since(now);
        if !waited.is_zero() {
            sleep_until(self.next_free).await;
        }

        let start = self.next_free.max(now);
        let cost = self
            .permit_interval
            .saturating_mul(u32::try_from(permits).unwrap_or(u32::MAX));
        self.next_free = start.checked_add(cost).unwrap_or(start);

        waited
    }
}

/// Returns the number of permits the next scan request costs, given the read capacity consumed
/// by the previous one.
pub fn recalibrate_permits(consumed_capacity: f64) -> u64 {
    let permits = (consumed_capacity - 1.0).trunc();

    // Also covers NaN.
    if permits >= 1.0 { permits as u64 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_demand_tables_are_not_rate_limited() {
        assert!(RateLimiter::for_read_capacity(None, 2).is_none());
        assert!(RateLimiter::for_read_capacity(Some(0), 2).is_none());
        assert!(RateLimiter::new(f64::NAN).is_none());
    }

    #[test]
    fn permits_follow_the_consumed_capacity() {
        assert_eq!(recalibrate_permits(0.0), 1);
        assert_eq!(recalibrate_permits(1.5), 1);
        assert_eq!(recalibrate_permits(2.0), 1);
        assert_eq!(recalibrate_permits(128.5), 127);
        assert_eq!(recalibrate_permits(f64::NAN), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_previous_debt() {
        // 10 read capacity units halved gives 5 permits per second.
        let mut limiter = RateLimiter::for_read_capacity(Some(10), 2).unwrap();

        let start = Instant::now();
        assert_eq!(limiter.acquire(10).await, Duration::ZERO);
        assert_eq!(start.elapsed(), Duration::ZERO);

        // The previous 10 permits take two seconds to pay off.
        limiter.acquire(1).await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        limiter.acquire(1).await;
        assert_eq!(start.elapsed(), Duration::from_millis(2_200));
    }
}

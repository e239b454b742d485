//! Monotonic wall time for scheduling, plus bounded random jitter on re-run
//! intervals so that many collector processes restarting together don't
//! all hammer their backends on the same tick.

use std::time::Duration;

use rand::Rng;

/// Returns a value in `[d, d + d/5]`, matching the jitter formula used
/// throughout job scheduling (scrape interval, recheck interval, quota
/// sync backoff, cron initial delay).
pub fn jitter(d: Duration) -> Duration {
    jitter_with_ratio(d, 5)
}

/// Same as [`jitter`] but with a configurable spread denominator (`d/ratio`
/// instead of a fixed `d/5`), used when the spread is operator-configurable.
pub fn jitter_with_ratio(d: Duration, ratio: u32) -> Duration {
    if ratio == 0 {
        return d;
    }
    let spread = d / ratio;
    if spread.is_zero() {
        return d;
    }
    let extra_nanos = rand::rng().random_range(0..=spread.as_nanos());
    d + Duration::from_nanos(extra_nanos.min(u64::MAX as u128) as u64)
}

/// A small random delay in `[0, max)`, used as a cron job's initial startup
/// delay so that many jobs of the same kind don't all tick in lockstep.
pub fn initial_delay(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::rng().random_range(0..max.as_nanos()).min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(300);
        for _ in 0..200 {
            let d = jitter(base);
            assert!(d >= base);
            assert!(d <= base + base / 5);
        }
    }

    #[test]
    fn jitter_of_zero_is_zero() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn initial_delay_is_bounded() {
        let max = Duration::from_secs(10);
        for _ in 0..200 {
            let d = initial_delay(max);
            assert!(d < max);
        }
    }
}

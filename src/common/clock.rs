//! Wall-clock timestamps in unix nanoseconds

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current unix time in nanoseconds
///
/// Saturates instead of wrapping for clocks outside the `i64` range.
pub fn unix_nanos() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Time elapsed since a unix-nanosecond timestamp
///
/// Timestamps from the future (clock skew between processes) yield zero.
pub fn elapsed_since(timestamp: i64) -> Duration {
    let diff = unix_nanos().saturating_sub(timestamp);
    Duration::from_nanos(u64::try_from(diff).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_nanos_is_monotonic_enough() {
        let a = unix_nanos();
        let b = unix_nanos();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn test_elapsed_since_future_is_zero() {
        assert_eq!(elapsed_since(unix_nanos() + 60_000_000_000), Duration::ZERO);
    }
}

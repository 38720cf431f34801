use crate::error::{CommonError, Result};
use chrono::{DateTime, Duration, Utc};

/// Milliseconds since the UNIX epoch, the unit admin payloads carry instants in.
pub fn current_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn datetime_from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(CommonError::InvalidTimestamp(millis))
}

/// Whole days from `now` until `until`, rounded up. Zero or negative once `until` has passed.
pub fn days_until(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let remaining = until - now;
    if remaining <= Duration::zero() {
        return 0;
    }
    let whole = remaining.num_days();
    if remaining > Duration::days(whole) {
        whole + 1
    } else {
        whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_epoch_millis() {
        let instant = datetime_from_millis(1_750_000_000_000).unwrap();
        assert_eq!(instant.timestamp_millis(), 1_750_000_000_000);
    }

    #[test]
    fn rejects_out_of_range_millis() {
        assert!(matches!(
            datetime_from_millis(i64::MAX),
            Err(CommonError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn partial_days_round_up() {
        let now = datetime_from_millis(0).unwrap();
        assert_eq!(days_until(now, now + Duration::hours(1)), 1);
        assert_eq!(days_until(now, now + Duration::days(3)), 3);
        assert_eq!(days_until(now, now + Duration::days(3) + Duration::seconds(1)), 4);
        assert_eq!(days_until(now, now - Duration::days(1)), 0);
    }
}

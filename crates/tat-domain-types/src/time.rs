// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Timestamp helpers
//!
//! Timestamps are persisted as signed epoch milliseconds. The "zero
//! timestamp" is the Unix epoch and marks events whose wire timestamp was
//! missing or unparseable.

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};

pub type Timestamp = DateTime<Utc>;

/// Timestamp used when an event carries no usable time.
pub fn zero_timestamp() -> Timestamp {
    DateTime::<Utc>::UNIX_EPOCH
}

pub fn is_zero_timestamp(ts: &Timestamp) -> bool {
    ts.timestamp_millis() == 0
}

pub fn to_epoch_ms(ts: &Timestamp) -> i64 {
    ts.timestamp_millis()
}

/// Out-of-range values collapse to the zero timestamp.
pub fn from_epoch_ms(ms: i64) -> Timestamp {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(zero_timestamp)
}

/// Milliseconds elapsed between two instants, clamped at zero.
pub fn elapsed_ms(from: &Timestamp, to: &Timestamp) -> i64 {
    (to.timestamp_millis() - from.timestamp_millis()).max(0)
}

/// Start (inclusive) and end (exclusive) of the local calendar day containing `ts`.
pub fn local_day_bounds(ts: &Timestamp) -> (Timestamp, Timestamp) {
    let date = ts.with_timezone(&Local).date_naive();
    let midnight = |d: chrono::NaiveDate| {
        Local
            .from_local_datetime(&d.and_time(NaiveTime::MIN))
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    };

    let start = midnight(date).unwrap_or(*ts);
    let end = date
        .succ_opt()
        .and_then(midnight)
        .unwrap_or_else(|| start + chrono::Duration::days(1));
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_ms_conversion() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(from_epoch_ms(to_epoch_ms(&ts)), ts);
    }

    #[test]
    fn test_zero_timestamp() {
        assert!(is_zero_timestamp(&zero_timestamp()));
        assert_eq!(to_epoch_ms(&zero_timestamp()), 0);
        assert_eq!(from_epoch_ms(i64::MAX), zero_timestamp());
    }

    #[test]
    fn test_local_day_bounds_contain_timestamp() {
        let now = Utc::now();
        let (start, end) = local_day_bounds(&now);
        assert!(start <= now && now < end);
        assert!(end - start >= chrono::Duration::hours(23));
        assert!(end - start <= chrono::Duration::hours(25));
        assert_eq!(local_day_bounds(&start).0, start);
    }

    #[test]
    fn test_elapsed_ms_clamps_negative() {
        let a = from_epoch_ms(5_000);
        let b = from_epoch_ms(3_000);
        assert_eq!(elapsed_ms(&b, &a), 2_000);
        assert_eq!(elapsed_ms(&a, &b), 0);
    }
}

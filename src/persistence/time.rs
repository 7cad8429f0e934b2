//! Tick conversions for persisted timestamps.
//!
//! Timestamps are stored as ticks: 100ns units since 0001-01-01T00:00:00 UTC.
//! Anything outside 0001-01-01 .. 9999-12-31T23:59:59.9999999 is clamped.

use chrono::{DateTime, TimeDelta, Utc};

pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks at 1970-01-01T00:00:00 UTC.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Ticks at 9999-12-31T23:59:59.9999999 UTC.
pub const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

const NANOS_PER_TICK: i64 = 100;

/// Earliest representable timestamp (tick 0).
pub fn min_time() -> DateTime<Utc> {
    from_ticks(0)
}

/// Latest representable timestamp.
pub fn max_time() -> DateTime<Utc> {
    from_ticks(MAX_TICKS)
}

pub fn to_ticks(value: DateTime<Utc>) -> i64 {
    let ticks = UNIX_EPOCH_TICKS as i128
        + value.timestamp() as i128 * TICKS_PER_SECOND as i128
        + (value.timestamp_subsec_nanos() as i64 / NANOS_PER_TICK) as i128;
    ticks.clamp(0, MAX_TICKS as i128) as i64
}

pub fn from_ticks(ticks: i64) -> DateTime<Utc> {
    let rel = ticks.clamp(0, MAX_TICKS) - UNIX_EPOCH_TICKS;
    let secs = rel.div_euclid(TICKS_PER_SECOND);
    let nanos = (rel.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn span_to_ticks(span: TimeDelta) -> i64 {
    let ticks = span.num_seconds() as i128 * TICKS_PER_SECOND as i128
        + (span.subsec_nanos() as i64 / NANOS_PER_TICK) as i128;
    ticks.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

pub fn span_from_ticks(ticks: i64) -> TimeDelta {
    let secs = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK) as u32;
    TimeDelta::new(secs, nanos).unwrap_or(if ticks < 0 { TimeDelta::MIN } else { TimeDelta::MAX })
}

/// Offset of `value` from `now`, in ticks.
pub fn encode_delta(value: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    to_ticks(value).saturating_sub(to_ticks(now))
}

/// Rebuilds a timestamp from a stored offset and the load-time clock.
///
/// The result drifts forward by however long the world was offline.
pub fn decode_delta(delta: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    from_ticks(to_ticks(now).saturating_add(delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_unix_epoch_ticks() {
        assert_eq!(to_ticks(at(0)), UNIX_EPOCH_TICKS);
        assert_eq!(from_ticks(UNIX_EPOCH_TICKS), at(0));
    }

    #[test]
    fn test_ticks_keep_sub_second_precision() {
        let t = DateTime::from_timestamp(1_700_000_000, 123_456_700).unwrap();
        assert_eq!(from_ticks(to_ticks(t)), t);
    }

    #[test]
    fn test_ticks_clamp_to_range() {
        assert_eq!(to_ticks(DateTime::<Utc>::MIN_UTC), 0);
        assert_eq!(to_ticks(DateTime::<Utc>::MAX_UTC), MAX_TICKS);
        assert_eq!(from_ticks(-5), min_time());
        assert_eq!(from_ticks(i64::MAX), max_time());
        assert_eq!(min_time().to_rfc3339(), "0001-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_span_ticks() {
        assert_eq!(span_to_ticks(TimeDelta::seconds(3)), 30_000_000);
        assert_eq!(span_to_ticks(TimeDelta::seconds(-3)), -30_000_000);
        assert_eq!(span_from_ticks(-15_000_000), TimeDelta::milliseconds(-1500));
        assert_eq!(span_from_ticks(span_to_ticks(TimeDelta::minutes(90))), TimeDelta::minutes(90));
    }

    #[test]
    fn test_delta_shifts_by_offline_time() {
        let saved_at = at(1_000_000);
        let last_damage = at(999_940);
        let delta = encode_delta(last_damage, saved_at);
        assert_eq!(delta, -60 * TICKS_PER_SECOND);

        // Same instant on both sides is exact.
        assert_eq!(decode_delta(delta, saved_at), last_damage);

        // An hour offline moves the timestamp an hour forward.
        let loaded_at = at(1_003_600);
        assert_eq!(decode_delta(delta, loaded_at), at(1_003_540));
    }

    #[test]
    fn test_delta_saturates() {
        assert_eq!(decode_delta(i64::MAX, at(0)), max_time());
        assert_eq!(decode_delta(i64::MIN, at(0)), min_time());
    }
}

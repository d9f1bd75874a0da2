//! Delivery policy: turn a logical due time into an effective dispatch time.
//!
//! All wall-clock reasoning happens in the recipient's local time, derived from
//! their fixed UTC offset, and is converted back to UTC at the end.

use caseflow_core::types::{ChannelPreference, Frequency, QuietHours};
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Utc};

fn to_local(at: DateTime<Utc>, offset_minutes: i32) -> NaiveDateTime {
    at.naive_utc() + Duration::minutes(offset_minutes as i64)
}

fn to_utc(local: NaiveDateTime, offset_minutes: i32) -> DateTime<Utc> {
    (local - Duration::minutes(offset_minutes as i64)).and_utc()
}

/// Push `at` out of the quiet window, to the window's end on the same or next day.
pub fn quiet_adjust(at: DateTime<Utc>, quiet: &QuietHours, offset_minutes: i32) -> DateTime<Utc> {
    let local = to_local(at, offset_minutes);
    let t = local.time();
    if !quiet.contains(t) {
        return at;
    }
    let wraps = quiet.start > quiet.end;
    let end_date = if wraps && t >= quiet.start {
        local.date() + Duration::days(1)
    } else {
        local.date()
    };
    to_utc(end_date.and_time(quiet.end), offset_minutes)
}

/// End of the batching window containing `at`, or `None` for real-time delivery.
///
/// Windows are `[h, h+1h)` for hourly, local calendar days for daily, and
/// Monday-to-Monday weeks for weekly.
pub fn batch_boundary(
    at: DateTime<Utc>,
    frequency: Frequency,
    offset_minutes: i32,
) -> Option<DateTime<Utc>> {
    let local = to_local(at, offset_minutes);
    let midnight = local.date().and_time(NaiveTime::MIN);
    let boundary = match frequency {
        Frequency::RealTime => return None,
        Frequency::Hourly => midnight + Duration::hours(local.hour() as i64 + 1),
        Frequency::Daily => midnight + Duration::days(1),
        Frequency::Weekly => {
            let days_left = 7 - local.weekday().num_days_from_monday() as i64;
            midnight + Duration::days(days_left)
        }
    };
    Some(to_utc(boundary, offset_minutes))
}

/// Effective dispatch time for a notification due at `scheduled_for`.
///
/// Batching moves it to its window boundary first; quiet hours then defer the
/// result if it lands inside the quiet window.
pub fn effective_dispatch_time(
    scheduled_for: DateTime<Utc>,
    pref: &ChannelPreference,
) -> DateTime<Utc> {
    let at = batch_boundary(scheduled_for, pref.frequency, pref.utc_offset_minutes)
        .unwrap_or(scheduled_for);
    quiet_adjust(at, &pref.quiet_hours, pref.utc_offset_minutes)
}

/// Whether this preference coalesces deliveries into windows.
pub fn is_batched(pref: &ChannelPreference) -> bool {
    pref.frequency != Frequency::RealTime
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap()
    }

    fn quiet(start: u32, end: u32) -> QuietHours {
        QuietHours::new(
            NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
        )
    }

    fn pref(frequency: Frequency, quiet_hours: QuietHours, offset: i32) -> ChannelPreference {
        let mut p = ChannelPreference::default_for("u1");
        p.frequency = frequency;
        p.quiet_hours = quiet_hours;
        p.utc_offset_minutes = offset;
        p
    }

    #[test]
    fn test_late_evening_moves_to_next_morning() {
        let p = pref(Frequency::RealTime, quiet(22, 8), 0);
        assert_eq!(effective_dispatch_time(utc(10, 23, 30), &p), utc(11, 8, 0));
    }

    #[test]
    fn test_early_morning_moves_to_same_morning() {
        let p = pref(Frequency::RealTime, quiet(22, 8), 0);
        assert_eq!(effective_dispatch_time(utc(11, 2, 0), &p), utc(11, 8, 0));
        assert_eq!(effective_dispatch_time(utc(11, 8, 0), &p), utc(11, 8, 0));
        assert_eq!(effective_dispatch_time(utc(11, 12, 0), &p), utc(11, 12, 0));
    }

    #[test]
    fn test_quiet_hours_in_local_time() {
        // UTC+2: 21:00 UTC is 23:00 local, quiet until 08:00 local = 06:00 UTC
        let p = pref(Frequency::RealTime, quiet(22, 8), 120);
        assert_eq!(effective_dispatch_time(utc(10, 21, 0), &p), utc(11, 6, 0));
    }

    #[test]
    fn test_disabled_quiet_hours_ignored() {
        let p = pref(Frequency::RealTime, QuietHours::default(), 0);
        assert_eq!(effective_dispatch_time(utc(10, 23, 30), &p), utc(10, 23, 30));
    }

    #[test]
    fn test_batch_boundaries() {
        // 2026-03-11 is a Wednesday
        assert_eq!(batch_boundary(utc(11, 10, 15), Frequency::Hourly, 0), Some(utc(11, 11, 0)));
        assert_eq!(batch_boundary(utc(11, 10, 15), Frequency::Daily, 0), Some(utc(12, 0, 0)));
        assert_eq!(batch_boundary(utc(11, 10, 15), Frequency::Weekly, 0), Some(utc(16, 0, 0)));
        assert_eq!(batch_boundary(utc(16, 0, 0), Frequency::Weekly, 0), Some(utc(23, 0, 0)));
        assert_eq!(batch_boundary(utc(11, 10, 15), Frequency::RealTime, 0), None);
    }

    #[test]
    fn test_daily_digest_deferred_by_quiet_hours() {
        let p = pref(Frequency::Daily, quiet(22, 8), 0);
        let a = effective_dispatch_time(utc(11, 9, 0), &p);
        let b = effective_dispatch_time(utc(11, 17, 45), &p);
        assert_eq!(a, utc(12, 8, 0));
        assert_eq!(a, b);
    }
}

//! Due-time adjustment against a [`BusinessHoursPolicy`] (§4.6).

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use voice_types::BusinessHoursPolicy;

fn parse_hhmm(raw: &str) -> NaiveTime {
    NaiveTime::parse_from_str(raw, "%H:%M").unwrap_or_else(|_| NaiveTime::from_hms_opt(0, 0, 0).expect("midnight is valid"))
}

fn is_within_policy(local: DateTime<chrono_tz::Tz>, start: NaiveTime, end: NaiveTime, policy: &BusinessHoursPolicy) -> bool {
    let weekday = local.weekday().num_days_from_sunday() as u8;
    policy.allowed_days.contains(&weekday) && local.time() >= start && local.time() < end
}

/// If `due_at` falls outside `policy`, shifts to the next allowed moment
/// (start of the next allowed business day). DST ambiguity at a shifted
/// local time resolves to the earliest of the two possible instants
/// (documented open question: "DST ambiguity"; see DESIGN.md).
pub fn adjust_for_business_hours(due_at: DateTime<Utc>, policy: &BusinessHoursPolicy) -> DateTime<Utc> {
    let start = parse_hhmm(&policy.start);
    let end = parse_hhmm(&policy.end);
    let local = due_at.with_timezone(&policy.timezone);

    if is_within_policy(local, start, end, policy) {
        return due_at;
    }

    let today_is_allowed_and_before_start = policy
        .allowed_days
        .contains(&(local.weekday().num_days_from_sunday() as u8))
        && local.time() < start;

    let mut date = local.date_naive();
    if !today_is_allowed_and_before_start {
        date += Duration::days(1);
    }

    for _ in 0..8 {
        let weekday = date.weekday().num_days_from_sunday() as u8;
        if policy.allowed_days.contains(&weekday) {
            let naive_start = date.and_time(start);
            let resolved = policy
                .timezone
                .from_local_datetime(&naive_start)
                .earliest()
                .unwrap_or_else(|| policy.timezone.from_utc_datetime(&naive_start));
            return resolved.with_timezone(&Utc);
        }
        date += Duration::days(1);
    }
    due_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn policy() -> BusinessHoursPolicy {
        BusinessHoursPolicy {
            start: "10:00".into(),
            end: "16:00".into(),
            timezone: chrono_tz::UTC,
            allowed_days: vec![1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn within_window_is_unchanged() {
        // 2024-01-02 is a Tuesday.
        let due = chrono_tz::UTC.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap().with_timezone(&Utc);
        assert_eq!(adjust_for_business_hours(due, &policy()), due);
    }

    #[test]
    fn before_window_shifts_to_same_day_start() {
        let due = chrono_tz::UTC.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap().with_timezone(&Utc);
        let adjusted = adjust_for_business_hours(due, &policy());
        assert_eq!(adjusted.hour(), 10);
        assert_eq!(adjusted.day(), 2);
    }

    #[test]
    fn after_window_shifts_to_next_day_start() {
        let due = chrono_tz::UTC.with_ymd_and_hms(2024, 1, 2, 20, 0, 0).unwrap().with_timezone(&Utc);
        let adjusted = adjust_for_business_hours(due, &policy());
        assert_eq!(adjusted.hour(), 10);
        assert_eq!(adjusted.day(), 3);
    }

    #[test]
    fn weekend_shifts_to_monday() {
        // 2024-01-06 is a Saturday.
        let due = chrono_tz::UTC.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap().with_timezone(&Utc);
        let adjusted = adjust_for_business_hours(due, &policy());
        assert_eq!(adjusted.weekday().num_days_from_sunday(), 1);
        assert_eq!(adjusted.hour(), 10);
    }
}

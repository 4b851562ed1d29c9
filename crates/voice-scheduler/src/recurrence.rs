//! Computing a recurring job's next run (§4.6).

use chrono::{DateTime, Months, Utc};
use voice_types::{Recurrence, RecurrenceFrequency};

/// `None` means the series has ended (end-at passed or max-occurrences
/// reached), in which case no successor job should be enqueued.
pub fn next_run(recurrence: &Recurrence, last_due_at: DateTime<Utc>, occurrence_count: u32) -> Option<DateTime<Utc>> {
    if let Some(max) = recurrence.max_occurrences {
        if occurrence_count >= max {
            return None;
        }
    }

    let next = match recurrence.frequency {
        RecurrenceFrequency::Daily => last_due_at + chrono::Duration::days(i64::from(recurrence.interval)),
        RecurrenceFrequency::Weekly => last_due_at + chrono::Duration::weeks(i64::from(recurrence.interval)),
        RecurrenceFrequency::Monthly => {
            last_due_at.checked_add_months(Months::new(recurrence.interval))?
        }
    };

    if let Some(end_at) = recurrence.end_at {
        if next > end_at {
            return None;
        }
    }

    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    #[test]
    fn daily_advances_by_interval() {
        let r = Recurrence {
            frequency: RecurrenceFrequency::Daily,
            interval: 2,
            end_at: None,
            max_occurrences: None,
        };
        assert_eq!(next_run(&r, at(2024, 1, 1), 0), Some(at(2024, 1, 3)));
    }

    #[test]
    fn stops_at_max_occurrences() {
        let r = Recurrence {
            frequency: RecurrenceFrequency::Weekly,
            interval: 1,
            end_at: None,
            max_occurrences: Some(3),
        };
        assert_eq!(next_run(&r, at(2024, 1, 1), 3), None);
        assert!(next_run(&r, at(2024, 1, 1), 2).is_some());
    }

    #[test]
    fn stops_past_end_at() {
        let r = Recurrence {
            frequency: RecurrenceFrequency::Monthly,
            interval: 1,
            end_at: Some(at(2024, 1, 15)),
            max_occurrences: None,
        };
        assert_eq!(next_run(&r, at(2024, 1, 1), 0), None);
    }
}

//! Fixed daily trigger times.

use chrono::{Days, NaiveDateTime, NaiveTime};
use tokio_util::sync::CancellationToken;

use reportd_core::{ReportError, sleep_or_cancel};

/// Local wall-clock times at which a submission round starts.
pub const TRIGGER_TIMES: [(u32, u32); 3] = [(7, 0), (12, 0), (19, 30)];

/// Earliest trigger strictly after `after`, rolling over to the next
/// day when today's times are exhausted.
pub fn next_trigger(after: NaiveDateTime, times: &[(u32, u32)]) -> NaiveDateTime {
    let mut candidates: Vec<NaiveTime> = times
        .iter()
        .filter_map(|(h, m)| NaiveTime::from_hms_opt(*h, *m, 0))
        .collect();
    candidates.sort();

    for time in &candidates {
        let candidate = after.date().and_time(*time);
        if candidate > after {
            return candidate;
        }
    }

    let first = candidates.first().copied().unwrap_or(NaiveTime::MIN);
    (after.date() + Days::new(1)).and_time(first)
}

/// Sleep until the next trigger time, observing cancellation.
pub async fn wait_for_next_trigger(cancel: &CancellationToken) -> Result<(), ReportError> {
    let now = chrono::Local::now().naive_local();
    let next = next_trigger(now, &TRIGGER_TIMES);
    let wait = (next - now).to_std().unwrap_or_default();
    tracing::info!(next = %next, "Waiting for next trigger");
    sleep_or_cancel(wait, cancel).await
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn early_morning_picks_the_first_trigger() {
        assert_eq!(next_trigger(at(5, 30, 0), &TRIGGER_TIMES), at(7, 0, 0));
    }

    #[test]
    fn midday_picks_the_next_remaining_trigger() {
        assert_eq!(next_trigger(at(9, 0, 0), &TRIGGER_TIMES), at(12, 0, 0));
        assert_eq!(next_trigger(at(12, 0, 1), &TRIGGER_TIMES), at(19, 30, 0));
    }

    #[test]
    fn a_trigger_instant_itself_is_not_reused() {
        assert_eq!(next_trigger(at(12, 0, 0), &TRIGGER_TIMES), at(19, 30, 0));
    }

    #[test]
    fn late_evening_rolls_over_to_tomorrow() {
        let next = next_trigger(at(22, 0, 0), &TRIGGER_TIMES);
        let tomorrow = NaiveDate::from_ymd_opt(2023, 3, 16).unwrap();
        assert_eq!(next, tomorrow.and_hms_opt(7, 0, 0).unwrap());
    }

    #[test]
    fn unsorted_times_are_handled() {
        let times = [(19, 30), (7, 0), (12, 0)];
        assert_eq!(next_trigger(at(5, 0, 0), &times), at(7, 0, 0));
    }
}

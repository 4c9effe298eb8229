use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};

const SESSION_OPEN_MINUTE: u32 = 9 * 60 + 30;
const SESSION_CLOSE_MINUTE: u32 = 16 * 60;

/// Whether the NYSE regular session is open at `at`.
///
/// Weekdays 09:30–16:00 US/Eastern. Holidays are not taken into account.
pub fn is_market_open(at: DateTime<Utc>) -> bool {
    let local = at + Duration::hours(eastern_offset_hours(at));

    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let minute_of_day = local.hour() * 60 + local.minute();
    (SESSION_OPEN_MINUTE..SESSION_CLOSE_MINUTE).contains(&minute_of_day)
}

/// UTC offset of US/Eastern at `at`: -4 under daylight saving, -5 otherwise.
fn eastern_offset_hours(at: DateTime<Utc>) -> i64 {
    match dst_bounds(at.year()) {
        Some((start, end)) if at >= start && at < end => -4,
        _ => -5,
    }
}

/// DST runs from the second Sunday of March 02:00 EST (07:00 UTC) to the
/// first Sunday of November 02:00 EDT (06:00 UTC).
fn dst_bounds(year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = NaiveDate::from_weekday_of_month_opt(year, 3, Weekday::Sun, 2)?
        .and_hms_opt(7, 0, 0)?
        .and_utc();
    let end = NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Sun, 1)?
        .and_hms_opt(6, 0, 0)?
        .and_utc();
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn open_on_weekday_afternoon_in_winter() {
        // Tuesday 14:00 EST
        assert!(is_market_open(utc(2024, 2, 6, 19, 0)));
    }

    #[test]
    fn closed_on_weekend() {
        // Saturday 14:00 EST
        assert!(!is_market_open(utc(2024, 2, 10, 19, 0)));
        // Sunday 12:00 EDT
        assert!(!is_market_open(utc(2024, 7, 14, 16, 0)));
    }

    #[test]
    fn opening_bell_is_inclusive() {
        // 09:30 EST
        assert!(is_market_open(utc(2024, 2, 6, 14, 30)));
        // 09:29 EST
        assert!(!is_market_open(utc(2024, 2, 6, 14, 29)));
    }

    #[test]
    fn closing_bell_is_exclusive() {
        // 15:59 EDT
        assert!(is_market_open(utc(2024, 7, 9, 19, 59)));
        // 16:00 EDT
        assert!(!is_market_open(utc(2024, 7, 9, 20, 0)));
    }

    #[test]
    fn daylight_saving_shifts_the_session() {
        // Monday after the March switch: 13:30 UTC is 09:30 EDT.
        assert!(is_market_open(utc(2024, 3, 11, 13, 30)));
        // Friday before it: 13:30 UTC is 08:30 EST.
        assert!(!is_market_open(utc(2024, 3, 8, 13, 30)));
        // Monday after the November switch: 14:00 UTC is 09:00 EST.
        assert!(!is_market_open(utc(2024, 11, 4, 14, 0)));
    }

    #[test]
    fn dst_bounds_for_2024() {
        let (start, end) = dst_bounds(2024).unwrap();
        assert_eq!(start, utc(2024, 3, 10, 7, 0));
        assert_eq!(end, utc(2024, 11, 3, 6, 0));
    }
}

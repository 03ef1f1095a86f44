use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};

/// Start instants of the calendar windows used for revenue and audit counts.
/// Each window is open-ended: a timestamp belongs to it iff `ts >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buckets {
    /// Local midnight today.
    pub today: DateTime<Utc>,
    /// Local midnight of the most recent Sunday (today when it is Sunday).
    pub week: DateTime<Utc>,
    /// Local midnight on the first of the current month.
    pub month: DateTime<Utc>,
}

impl Buckets {
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let tz = now.timezone();
        let date = now.date_naive();
        let week_date = date - Duration::days(date.weekday().num_days_from_sunday() as i64);
        let month_date = date.with_day(1).unwrap_or(date);
        Self {
            today: local_midnight(&tz, date),
            week: local_midnight(&tz, week_date),
            month: local_midnight(&tz, month_date),
        }
    }

    pub fn now_local() -> Self {
        Self::at(&Local::now())
    }
}

/// First instant of `date` in `tz`. Where a DST jump skips midnight, the day
/// starts at the first hour that exists.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    (0..3)
        .find_map(|hour| {
            let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
            tz.from_local_datetime(&date.and_time(time)).earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn tz() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    #[test]
    fn midweek_boundaries() {
        // Wednesday 2026-10-14 15:20 at UTC-5.
        let now = tz().with_ymd_and_hms(2026, 10, 14, 15, 20, 0).unwrap();
        let b = Buckets::at(&now);
        assert_eq!(b.today, tz().with_ymd_and_hms(2026, 10, 14, 0, 0, 0).unwrap());
        assert_eq!(b.week, tz().with_ymd_and_hms(2026, 10, 11, 0, 0, 0).unwrap());
        assert_eq!(b.month, tz().with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn sunday_week_starts_today() {
        let now = tz().with_ymd_and_hms(2026, 10, 18, 0, 0, 1).unwrap();
        let b = Buckets::at(&now);
        assert_eq!(b.week, b.today);
    }

    #[test]
    fn week_may_start_in_previous_month() {
        // Thursday 2026-10-01; previous Sunday is 2026-09-27.
        let now = tz().with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap();
        let b = Buckets::at(&now);
        assert_eq!(b.week, tz().with_ymd_and_hms(2026, 9, 27, 0, 0, 0).unwrap());
        assert!(b.week < b.month);
    }

    #[test]
    fn boundaries_are_instants_not_wall_clock_dates() {
        let now = tz().with_ymd_and_hms(2026, 10, 14, 23, 0, 0).unwrap();
        let b = Buckets::at(&now);
        assert_eq!(b.today, Utc.with_ymd_and_hms(2026, 10, 14, 5, 0, 0).unwrap());
    }
}

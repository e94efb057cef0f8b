//! Temporal types carried as microseconds/days/months relative to the
//! server epoch of 2000-01-01.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use super::OutOfRangeError;

/// Microseconds between the Unix epoch and 2000-01-01T00:00:00Z.
const EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;
/// Days between 1970-01-01 and 2000-01-01.
const EPOCH_OFFSET_DAYS: i32 = 10_957;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

/// A point in time (`std::datetime`), timezone-aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Datetime {
    pub(crate) micros: i64,
}

/// A date and time without timezone (`cal::local_datetime`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDatetime {
    pub(crate) micros: i64,
}

/// A date without timezone (`cal::local_date`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDate {
    pub(crate) days: i32,
}

/// A time of day (`cal::local_time`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalTime {
    pub(crate) micros: u64,
}

/// An absolute time span (`std::duration`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    pub(crate) micros: i64,
}

/// A calendar-aware time span (`cal::relative_duration`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelativeDuration {
    pub(crate) micros: i64,
    pub(crate) days: i32,
    pub(crate) months: i32,
}

/// A span of whole calendar days and months (`cal::date_duration`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateDuration {
    pub(crate) days: i32,
    pub(crate) months: i32,
}

impl Datetime {
    pub fn from_postgres_micros(micros: i64) -> Datetime {
        Datetime { micros }
    }
    pub fn postgres_micros(self) -> i64 {
        self.micros
    }
    pub fn from_unix_micros(micros: i64) -> Result<Datetime, OutOfRangeError> {
        let micros = micros.checked_sub(EPOCH_OFFSET_MICROS).ok_or(OutOfRangeError)?;
        Ok(Datetime { micros })
    }
    pub fn to_unix_micros(self) -> i64 {
        self.micros + EPOCH_OFFSET_MICROS
    }
}

impl From<Datetime> for DateTime<Utc> {
    fn from(value: Datetime) -> DateTime<Utc> {
        Utc.timestamp_micros(value.to_unix_micros())
            .single()
            .expect("datetime is in range")
    }
}

impl TryFrom<DateTime<Utc>> for Datetime {
    type Error = OutOfRangeError;
    fn try_from(value: DateTime<Utc>) -> Result<Datetime, OutOfRangeError> {
        Datetime::from_unix_micros(value.timestamp_micros())
    }
}

impl LocalDatetime {
    pub fn from_postgres_micros(micros: i64) -> LocalDatetime {
        LocalDatetime { micros }
    }
    pub fn postgres_micros(self) -> i64 {
        self.micros
    }
}

impl From<LocalDatetime> for NaiveDateTime {
    fn from(value: LocalDatetime) -> NaiveDateTime {
        DateTime::from_timestamp_micros(value.micros + EPOCH_OFFSET_MICROS)
            .expect("local datetime is in range")
            .naive_utc()
    }
}

impl TryFrom<NaiveDateTime> for LocalDatetime {
    type Error = OutOfRangeError;
    fn try_from(value: NaiveDateTime) -> Result<LocalDatetime, OutOfRangeError> {
        let micros = value
            .and_utc()
            .timestamp_micros()
            .checked_sub(EPOCH_OFFSET_MICROS)
            .ok_or(OutOfRangeError)?;
        Ok(LocalDatetime { micros })
    }
}

impl LocalDate {
    pub fn from_postgres_days(days: i32) -> LocalDate {
        LocalDate { days }
    }
    pub fn postgres_days(self) -> i32 {
        self.days
    }
}

impl From<LocalDate> for NaiveDate {
    fn from(value: LocalDate) -> NaiveDate {
        NaiveDate::from_num_days_from_ce_opt(value.days + EPOCH_OFFSET_DAYS + 719_163)
            .expect("local date is in range")
    }
}

impl TryFrom<NaiveDate> for LocalDate {
    type Error = OutOfRangeError;
    fn try_from(value: NaiveDate) -> Result<LocalDate, OutOfRangeError> {
        let unix_days = value.num_days_from_ce() - 719_163;
        unix_days
            .checked_sub(EPOCH_OFFSET_DAYS)
            .map(|days| LocalDate { days })
            .ok_or(OutOfRangeError)
    }
}

impl LocalTime {
    pub fn from_micros(micros: u64) -> Result<LocalTime, OutOfRangeError> {
        if micros >= 86_400 * MICROS_PER_SECOND as u64 {
            return Err(OutOfRangeError);
        }
        Ok(LocalTime { micros })
    }
    pub fn micros(self) -> u64 {
        self.micros
    }
}

impl From<LocalTime> for NaiveTime {
    fn from(value: LocalTime) -> NaiveTime {
        NaiveTime::from_num_seconds_from_midnight_opt(
            (value.micros / 1_000_000) as u32,
            (value.micros % 1_000_000) as u32 * 1000,
        )
        .expect("local time is in range")
    }
}

impl From<NaiveTime> for LocalTime {
    fn from(value: NaiveTime) -> LocalTime {
        use chrono::Timelike;
        let micros =
            value.num_seconds_from_midnight() as u64 * 1_000_000 + value.nanosecond() as u64 / 1000;
        LocalTime { micros }
    }
}

impl Duration {
    pub fn from_micros(micros: i64) -> Duration {
        Duration { micros }
    }
    pub fn micros(self) -> i64 {
        self.micros
    }
    pub fn is_negative(self) -> bool {
        self.micros < 0
    }
}

impl TryFrom<Duration> for std::time::Duration {
    type Error = OutOfRangeError;
    fn try_from(value: Duration) -> Result<std::time::Duration, OutOfRangeError> {
        u64::try_from(value.micros)
            .map(std::time::Duration::from_micros)
            .map_err(|_| OutOfRangeError)
    }
}

impl TryFrom<std::time::Duration> for Duration {
    type Error = OutOfRangeError;
    fn try_from(value: std::time::Duration) -> Result<Duration, OutOfRangeError> {
        i64::try_from(value.as_micros())
            .map(|micros| Duration { micros })
            .map_err(|_| OutOfRangeError)
    }
}

impl RelativeDuration {
    pub fn new(micros: i64, days: i32, months: i32) -> RelativeDuration {
        RelativeDuration {
            micros,
            days,
            months,
        }
    }
    pub fn micros(self) -> i64 {
        self.micros
    }
    pub fn days(self) -> i32 {
        self.days
    }
    pub fn months(self) -> i32 {
        self.months
    }
    pub fn is_zero(self) -> bool {
        self.micros == 0 && self.days == 0 && self.months == 0
    }
}

impl DateDuration {
    pub fn new(days: i32, months: i32) -> DateDuration {
        DateDuration { days, months }
    }
    pub fn days(self) -> i32 {
        self.days
    }
    pub fn months(self) -> i32 {
        self.months
    }
    pub fn to_iso(self) -> String {
        self.to_string()
    }
}

impl From<DateDuration> for RelativeDuration {
    fn from(value: DateDuration) -> RelativeDuration {
        RelativeDuration {
            micros: 0,
            days: value.days,
            months: value.months,
        }
    }
}

fn write_date_part(f: &mut fmt::Formatter, days: i32, months: i32) -> fmt::Result {
    let years = months / 12;
    let months = months % 12;
    if years != 0 {
        write!(f, "{years}Y")?;
    }
    if months != 0 {
        write!(f, "{months}M")?;
    }
    if days != 0 {
        write!(f, "{days}D")?;
    }
    Ok(())
}

fn write_time_part(f: &mut fmt::Formatter, micros: i64) -> fmt::Result {
    let hours = micros / MICROS_PER_HOUR;
    let minutes = micros % MICROS_PER_HOUR / MICROS_PER_MINUTE;
    let seconds = micros % MICROS_PER_MINUTE / MICROS_PER_SECOND;
    let fraction = micros % MICROS_PER_SECOND;
    if hours != 0 {
        write!(f, "{hours}H")?;
    }
    if minutes != 0 {
        write!(f, "{minutes}M")?;
    }
    if fraction != 0 {
        let text = format!("{:06}", fraction.abs());
        let text = text.trim_end_matches('0');
        let sign = if micros < 0 && seconds == 0 { "-" } else { "" };
        write!(f, "{sign}{seconds}.{text}S")?;
    } else if seconds != 0 || micros == 0 {
        write!(f, "{seconds}S")?;
    }
    Ok(())
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PT")?;
        write_time_part(f, self.micros)
    }
}

impl fmt::Display for RelativeDuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "PT0S");
        }
        write!(f, "P")?;
        write_date_part(f, self.days, self.months)?;
        if self.micros != 0 {
            write!(f, "T")?;
            write_time_part(f, self.micros)?;
        }
        Ok(())
    }
}

impl fmt::Display for DateDuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.days == 0 && self.months == 0 {
            return write!(f, "P0D");
        }
        write!(f, "P")?;
        write_date_part(f, self.days, self.months)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_epoch() {
        let dt = Datetime::from_postgres_micros(0);
        let chrono: DateTime<Utc> = dt.into();
        assert_eq!(chrono.to_rfc3339(), "2000-01-01T00:00:00+00:00");
        assert_eq!(Datetime::try_from(chrono), Ok(dt));
    }

    #[test]
    fn local_date_epoch() {
        let date = LocalDate::from_postgres_days(0);
        let chrono: NaiveDate = date.into();
        assert_eq!(chrono, NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
        assert_eq!(LocalDate::try_from(chrono), Ok(date));
    }

    #[test]
    fn local_date_round_trip() {
        for days in [-10_957, -365, -1, 0, 1, 366, 73_048] {
            let date = LocalDate::from_postgres_days(days);
            let chrono: NaiveDate = date.into();
            assert_eq!(LocalDate::try_from(chrono), Ok(date), "days {days}");
        }
    }

    #[test]
    fn local_time_bounds() {
        assert!(LocalTime::from_micros(86_400_000_000).is_err());
        let time = LocalTime::from_micros(12 * 3600 * 1_000_000 + 34 * 60 * 1_000_000).unwrap();
        let chrono: NaiveTime = time.into();
        assert_eq!(LocalTime::from(chrono), time);
    }

    #[test]
    fn date_duration_iso() {
        assert_eq!(DateDuration::new(2, 14).to_iso(), "P1Y2M2D");
        assert_eq!(DateDuration::new(0, 0).to_iso(), "P0D");
        assert_eq!(DateDuration::new(3, 0).to_iso(), "P3D");
        assert_eq!(DateDuration::new(0, 24).to_iso(), "P2Y");
    }

    #[test]
    fn relative_duration_display() {
        assert_eq!(
            RelativeDuration::new(3_600_000_000, 1, 13).to_string(),
            "P1Y1M1DT1H"
        );
        assert_eq!(RelativeDuration::new(0, 0, 0).to_string(), "PT0S");
        assert_eq!(RelativeDuration::new(1_500_000, 0, 0).to_string(), "PT1.5S");
    }

    #[test]
    fn duration_display() {
        assert_eq!(Duration::from_micros(0).to_string(), "PT0S");
        assert_eq!(
            Duration::from_micros(MICROS_PER_HOUR + 30 * MICROS_PER_MINUTE).to_string(),
            "PT1H30M"
        );
    }
}

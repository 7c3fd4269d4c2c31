//! Decoding CF time coordinates (`<unit> since <reference>`) in the calendars
//! used by regional climate models.
//!
//! Resampling works on offsets in seconds from the reference time, so it does
//! not need to know about the calendar: every supported calendar has 86400 s
//! days. The calendar only matters when offsets are turned back into dates,
//! e.g. for output file names. Date arithmetic is done by `cftime_rs`.
use std::fmt::Display;

use cftime_rs::{calendars::Calendar, datetime::CFDatetime, utils::get_datetime_and_unit_from_units};

use crate::error::TimeError;

/// Largest offset from the reference accepted, in seconds (about 3 million years).
const MAX_OFFSET_SECONDS: f64 = 1.0e14;

/// Map a CF `calendar` attribute to a calendar. A missing attribute means
/// `standard`, the mixed Julian/Gregorian calendar.
pub fn parse_calendar(name: Option<&str>) -> Result<Calendar, TimeError> {
    let Some(name) = name else {
        return Ok(Calendar::Standard);
    };
    match name.trim().to_ascii_lowercase().as_str() {
        "standard" | "gregorian" => Ok(Calendar::Standard),
        "proleptic_gregorian" => Ok(Calendar::ProlepticGregorian),
        "noleap" | "no_leap" | "365_day" => Ok(Calendar::NoLeap),
        "all_leap" | "366_day" => Ok(Calendar::AllLeap),
        "julian" => Ok(Calendar::Julian),
        "360_day" => Ok(Calendar::Day360),
        _ => Err(TimeError::UnknownCalendar(name.to_string())),
    }
}

/// A date and time in a model calendar. Not necessarily a valid
/// Gregorian date (e.g. 30 February in a 360-day calendar).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CalendarDateTime {
    pub year: i64,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl CalendarDateTime {
    fn from_cf(dt: &CFDatetime) -> Result<Self, TimeError> {
        let (year, month, day, hour, minute, second) = dt
            .ymd_hms()
            .map_err(|e| TimeError::Calendar(e.to_string()))?;
        Ok(Self {
            year: year as i64,
            month: month as u8,
            day: day as u8,
            hour: hour as u8,
            minute: minute as u8,
            second: second as u8,
        })
    }

    /// Compact `YYYYMMDD` form used in file names.
    pub fn compact_date(&self) -> String {
        format!("{:04}{:02}{:02}", self.year, self.month, self.day)
    }
}

impl Display for CalendarDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// A decoded time coordinate: raw values plus what they mean.
#[derive(Debug, Clone)]
pub struct TimeAxis {
    pub values: Vec<f64>,
    pub calendar: Calendar,
    /// Seconds per unit of the time coordinate.
    unit_seconds: i64,
    /// The reference time as seconds since 1970-01-01 in `calendar`.
    reference_timestamp: i64,
    reference: CalendarDateTime,
}

impl TimeAxis {
    pub fn new(values: Vec<f64>, units: &str, calendar: Option<&str>) -> Result<Self, TimeError> {
        let calendar = parse_calendar(calendar)?;
        let (reference, unit) = get_datetime_and_unit_from_units(units, calendar)
            .map_err(|e| TimeError::BadUnits(format!("{units} ({e})")))?;
        let duration = unit.to_duration(calendar);
        let one_unit = (&reference + (&duration * 1_i64))
            .map_err(|e| TimeError::BadUnits(format!("{units} ({e})")))?;
        let unit_seconds = one_unit.timestamp() - reference.timestamp();
        if unit_seconds <= 0 {
            return Err(TimeError::UnknownUnit(units.to_string()));
        }

        Ok(Self {
            values,
            calendar,
            unit_seconds,
            reference_timestamp: reference.timestamp(),
            reference: CalendarDateTime::from_cf(&reference)?,
        })
    }

    pub fn unit_seconds(&self) -> i64 {
        self.unit_seconds
    }

    pub fn reference(&self) -> &CalendarDateTime {
        &self.reference
    }

    /// Seconds of the reference time past midnight of its day.
    pub fn reference_second_of_day(&self) -> i64 {
        let r = &self.reference;
        r.hour as i64 * 3_600 + r.minute as i64 * 60 + r.second as i64
    }

    /// Offset of a raw time value from the reference in whole seconds
    /// (rounded, sub-second precision is not needed for 1 h and coarser data).
    pub fn value_to_seconds(&self, value: f64) -> Result<i64, TimeError> {
        if !value.is_finite() {
            return Err(TimeError::NonFiniteValue(value));
        }
        let seconds = (value * self.unit_seconds as f64).round();
        if seconds.abs() > MAX_OFFSET_SECONDS {
            return Err(TimeError::OutOfRange(value));
        }
        Ok(seconds as i64)
    }

    /// Convert an offset in seconds back to a raw value in this axis' units.
    pub fn seconds_to_value(&self, seconds: i64) -> f64 {
        seconds as f64 / self.unit_seconds as f64
    }

    /// Decode a raw value into a date in this axis' calendar.
    pub fn decode(&self, value: f64) -> Result<CalendarDateTime, TimeError> {
        let timestamp = self
            .reference_timestamp
            .checked_add(self.value_to_seconds(value)?)
            .ok_or(TimeError::OutOfRange(value))?;
        let dt = CFDatetime::from_timestamp(timestamp, 0, self.calendar)
            .map_err(|_| TimeError::OutOfRange(value))?;
        CalendarDateTime::from_cf(&dt)
    }

    /// First and last decoded times, `None` for an empty axis.
    pub fn first_last(&self) -> Result<Option<(CalendarDateTime, CalendarDateTime)>, TimeError> {
        match (self.values.first(), self.values.last()) {
            (Some(&a), Some(&b)) => Ok(Some((self.decode(a)?, self.decode(b)?))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_parse_units() {
        let axis = TimeAxis::new(vec![], "hours since 1949-12-01 00:00:00", None).unwrap();
        assert_eq!(axis.unit_seconds(), 3600);
        assert_eq!(axis.reference().year, 1949);
        assert_eq!(axis.reference().month, 12);
        assert_eq!(axis.reference().day, 1);

        let axis = TimeAxis::new(vec![], "days since 1949-12-01", None).unwrap();
        assert_eq!(axis.unit_seconds(), 86400);
        assert_eq!(axis.reference_second_of_day(), 0);

        let axis = TimeAxis::new(vec![], "seconds since 2000-01-01 06:30:00", None).unwrap();
        assert_eq!(axis.unit_seconds(), 1);
        assert_eq!(axis.reference_second_of_day(), 6 * 3600 + 30 * 60);

        assert!(TimeAxis::new(vec![], "K", None).is_err());
    }

    #[rstest]
    #[case("standard")]
    #[case("gregorian")]
    #[case("Gregorian ")]
    fn test_parse_standard_calendar(#[case] name: &str) {
        assert!(matches!(parse_calendar(Some(name)), Ok(Calendar::Standard)));
    }

    #[test]
    fn test_parse_other_calendars() {
        assert!(matches!(parse_calendar(None), Ok(Calendar::Standard)));
        assert!(matches!(parse_calendar(Some("proleptic_gregorian")), Ok(Calendar::ProlepticGregorian)));
        assert!(matches!(parse_calendar(Some("365_day")), Ok(Calendar::NoLeap)));
        assert!(matches!(parse_calendar(Some("noleap")), Ok(Calendar::NoLeap)));
        assert!(matches!(parse_calendar(Some("366_day")), Ok(Calendar::AllLeap)));
        assert!(matches!(parse_calendar(Some("360_day")), Ok(Calendar::Day360)));
        assert!(matches!(
            parse_calendar(Some("lunar")),
            Err(TimeError::UnknownCalendar(_))
        ));
    }

    #[test]
    fn test_decode_standard() {
        let axis = TimeAxis::new(vec![0.0, 24.0, 455_856.5], "hours since 1949-12-01 00:00:00", Some("gregorian")).unwrap();
        let (first, last) = axis.first_last().unwrap().unwrap();
        assert_eq!(first.compact_date(), "19491201");
        // 455856 hours = 18994 days after 1949-12-01
        assert_eq!(last.compact_date(), "20011202");
        assert_eq!(last.minute, 30);
    }

    #[test]
    fn test_standard_is_mixed_julian_gregorian() {
        // The day after 1582-10-04 (Julian) is 1582-10-15 (Gregorian).
        let axis = TimeAxis::new(vec![1.0], "days since 1582-10-04", Some("standard")).unwrap();
        assert_eq!(axis.decode(1.0).unwrap().compact_date(), "15821015");

        let axis = TimeAxis::new(vec![1.0], "days since 1582-10-04", Some("proleptic_gregorian")).unwrap();
        assert_eq!(axis.decode(1.0).unwrap().compact_date(), "15821005");
    }

    #[test]
    fn test_decode_360_day() {
        // 360 days in a 360-day calendar is exactly one year
        let axis = TimeAxis::new(vec![360.0, 389.0], "days since 2000-01-01", Some("360_day")).unwrap();
        let (first, last) = axis.first_last().unwrap().unwrap();
        assert_eq!(first.compact_date(), "20010101");
        assert_eq!(last.compact_date(), "20010130");
    }

    #[test]
    fn test_decode_noleap() {
        let axis = TimeAxis::new(vec![59.0], "days since 2001-01-01", Some("noleap")).unwrap();
        assert_eq!(axis.decode(59.0).unwrap().compact_date(), "20010301");
        let axis = TimeAxis::new(vec![59.0], "days since 2004-01-01", Some("noleap")).unwrap();
        assert_eq!(axis.decode(59.0).unwrap().compact_date(), "20040301");
    }

    #[test]
    fn test_decode_with_reference_time_of_day() {
        let axis = TimeAxis::new(vec![18.0], "hours since 2000-01-01 12:00:00", None).unwrap();
        let t = axis.decode(18.0).unwrap();
        assert_eq!(t.compact_date(), "20000102");
        assert_eq!(t.hour, 6);
    }

    #[test]
    fn test_out_of_range_values() {
        let axis = TimeAxis::new(vec![], "hours since 2000-01-01", None).unwrap();
        assert!(matches!(axis.value_to_seconds(1.0e20), Err(TimeError::OutOfRange(_))));
        assert!(matches!(axis.value_to_seconds(f64::NAN), Err(TimeError::NonFiniteValue(_))));
        assert!(axis.decode(1.0e20).is_err());
    }

    #[test]
    fn test_empty_axis() {
        let axis = TimeAxis::new(vec![], "hours since 2000-01-01", None).unwrap();
        assert!(axis.first_last().unwrap().is_none());
    }
}

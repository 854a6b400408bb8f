// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Epoch-second timestamps: quantization, query text, and view names.
//!
//! All times are UTC.

use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::error::{PilosaError, Result};
use crate::schema::TimeUnit;

fn out_of_range(timestamp: i64, detail: impl std::fmt::Display) -> PilosaError {
    PilosaError::InvalidArgumentRange {
        call: "timestamp",
        detail: format!("{timestamp}: {detail}"),
    }
}

fn datetime(timestamp: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(timestamp).map_err(|e| out_of_range(timestamp, e))
}

/// Truncate `timestamp` to the start of its `unit`.
pub fn quantize(timestamp: i64, unit: TimeUnit) -> Result<i64> {
    let dt = datetime(timestamp)?;
    let date = dt.date();
    let (date, hour) = match unit {
        TimeUnit::Year => (Date::from_calendar_date(date.year(), Month::January, 1), 0),
        TimeUnit::Month => (Date::from_calendar_date(date.year(), date.month(), 1), 0),
        TimeUnit::Day => (Ok(date), 0),
        TimeUnit::Hour => (Ok(date), dt.hour()),
    };
    let date = date.map_err(|e| out_of_range(timestamp, e))?;
    let time = Time::from_hms(hour, 0, 0).map_err(|e| out_of_range(timestamp, e))?;
    Ok(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}

/// Query-language timestamp, `YYYY-MM-DDTHH:MM`.
pub fn format_query_time(timestamp: i64) -> Result<String> {
    datetime(timestamp)?
        .format(format_description!("[year]-[month]-[day]T[hour]:[minute]"))
        .map_err(|e| out_of_range(timestamp, e))
}

/// Parse query-language time text, `YYYY-MM-DDTHH:MM`, into epoch seconds.
pub fn parse_query_time(text: &str) -> Result<i64> {
    PrimitiveDateTime::parse(text.trim(), format_description!("[year]-[month]-[day]T[hour]:[minute]"))
        .map(|dt| dt.assume_utc().unix_timestamp())
        .map_err(|e| PilosaError::InvalidArgumentRange {
            call: "timestamp",
            detail: format!("{text:?}: {e}"),
        })
}

/// Name of the time view holding `timestamp` at `unit` granularity:
/// `2017`, `201704`, `20170424` or `2017042412`.
pub fn view_name(timestamp: i64, unit: TimeUnit) -> Result<String> {
    let dt = datetime(timestamp)?;
    let formatted = match unit {
        TimeUnit::Year => dt.format(format_description!("[year]")),
        TimeUnit::Month => dt.format(format_description!("[year][month]")),
        TimeUnit::Day => dt.format(format_description!("[year][month][day]")),
        TimeUnit::Hour => dt.format(format_description!("[year][month][day][hour]")),
    };
    formatted.map_err(|e| out_of_range(timestamp, e))
}

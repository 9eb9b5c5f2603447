//! ISO-8601 duration text for alert evaluation periods.
//!
//! Writes always emit the seconds form (`PT600S`, `PT1.5S`). Reads also accept
//! week/day/hour/minute designators so rows written as `P1D` or `PT10M` stay
//! readable. Calendar units (years, months) have no fixed length and are
//! rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

static PERIOD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^P(?:(?P<weeks>\d+)W)?(?:(?P<days>\d+)D)?(?:T(?:(?P<hours>\d+)H)?(?:(?P<minutes>\d+)M)?(?:(?P<seconds>\d+)(?:\.(?P<fraction>\d{1,9}))?S)?)?$",
    )
    .expect("period pattern is a valid regex")
});

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;
const SECONDS_PER_WEEK: u64 = 7 * SECONDS_PER_DAY;

/// Stored period text cannot be read back as a duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodError {
    value: String,
}

impl Display for PeriodError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid ISO-8601 period `{}`", self.value)
    }
}

impl Error for PeriodError {}

/// Formats a duration as ISO-8601 seconds.
pub fn format_period(period: Duration) -> String {
    let nanos = period.subsec_nanos();
    if nanos == 0 {
        return format!("PT{}S", period.as_secs());
    }

    let fraction = format!("{nanos:09}");
    format!("PT{}.{}S", period.as_secs(), fraction.trim_end_matches('0'))
}

/// Parses ISO-8601 duration text into a duration.
pub fn parse_period(value: &str) -> Result<Duration, PeriodError> {
    let error = || PeriodError {
        value: value.to_string(),
    };

    // "P" and "PT" match the pattern but carry no components.
    if value.len() < 3 || value.ends_with('T') {
        return Err(error());
    }

    let captures = PERIOD_PATTERN.captures(value).ok_or_else(error)?;
    let component = |name: &str, scale: u64| -> Result<u64, PeriodError> {
        match captures.name(name) {
            Some(text) => text
                .as_str()
                .parse::<u64>()
                .ok()
                .and_then(|amount| amount.checked_mul(scale))
                .ok_or_else(error),
            None => Ok(0),
        }
    };

    let seconds = [
        component("weeks", SECONDS_PER_WEEK)?,
        component("days", SECONDS_PER_DAY)?,
        component("hours", SECONDS_PER_HOUR)?,
        component("minutes", SECONDS_PER_MINUTE)?,
        component("seconds", 1)?,
    ]
    .into_iter()
    .try_fold(0_u64, |total, part| total.checked_add(part))
    .ok_or_else(error)?;

    let nanos = match captures.name("fraction") {
        Some(text) => {
            let digits = text.as_str();
            let padded = format!("{digits:0<9}");
            padded.parse::<u32>().map_err(|_| error())?
        }
        None => 0,
    };

    Ok(Duration::new(seconds, nanos))
}

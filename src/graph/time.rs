//! Time windows, zones and display formatting
//!
//! Backend instants are absolute (UTC). Converting an instant to a named zone
//! for display never changes the instant itself.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{CalbotError, Result};

/// Format used for window bounds sent to the backend
pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format used for displayed instants
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LOCAL_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// Parse an IANA zone name
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CalbotError::Time(format!("Unknown time zone: {}", name)))
}

/// Parse a wall-clock time. Offset-qualified input is converted into `zone`.
pub fn parse_local(value: &str, zone: Tz) -> Result<NaiveDateTime> {
    let value = value.trim();
    for format in LOCAL_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive);
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&zone).naive_local())
        .map_err(|_| CalbotError::Time(format!("Invalid date/time '{}', expected ISO 8601", value)))
}

/// Resolve a wall-clock time in `zone` to an absolute instant.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant.
pub fn resolve_in_zone(naive: NaiveDateTime, zone: Tz) -> Result<DateTime<Utc>> {
    zone.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| CalbotError::Time(format!("{} does not exist in {}", naive, zone)))
}

/// Parse a backend date/time reported in `zone_name` (usually "UTC")
pub fn parse_backend_instant(date_time: &str, zone_name: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_time) {
        return Ok(dt.with_timezone(&Utc));
    }
    let zone = if zone_name.is_empty() || zone_name.eq_ignore_ascii_case("utc") {
        Tz::UTC
    } else {
        parse_zone(zone_name)?
    };
    let naive = parse_local(date_time, zone)?;
    resolve_in_zone(naive, zone)
}

/// View an instant in a zone. Pure; the instant is unchanged.
pub fn to_zone(instant: DateTime<Utc>, zone: Tz) -> DateTime<Tz> {
    instant.with_timezone(&zone)
}

/// Display an instant as wall-clock time in `zone`
pub fn format_in_zone(instant: DateTime<Utc>, zone: Tz) -> String {
    to_zone(instant, zone).format(DISPLAY_FORMAT).to_string()
}

/// A start/end pair interpreted in a named zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub zone: Tz,
}

impl TimeWindow {
    /// Parse and validate a window. `end` must be after `start`.
    pub fn parse(start: &str, end: &str, zone: &str) -> Result<Self> {
        let zone = parse_zone(zone)?;
        let start = parse_local(start, zone)?;
        let end = parse_local(end, zone)?;
        if end <= start {
            return Err(CalbotError::Time(format!(
                "Window end {} is not after start {}",
                end.format(WIRE_FORMAT),
                start.format(WIRE_FORMAT)
            )));
        }
        Ok(Self { start, end, zone })
    }

    pub fn start_wire(&self) -> String {
        self.start.format(WIRE_FORMAT).to_string()
    }

    pub fn end_wire(&self) -> String {
        self.end.format(WIRE_FORMAT).to_string()
    }

    pub fn zone_name(&self) -> &'static str {
        self.zone.name()
    }
}

/// A period during which the entity is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    /// "<start> to <end>" in the given zone
    pub fn display(&self, zone: Tz) -> String {
        format!("{} to {}", format_in_zone(self.start, zone), format_in_zone(self.end, zone))
    }
}

/// Result of a schedule lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Nothing booked in the whole window
    Free,
    /// Busy intervals, in backend order
    Busy(Vec<BusyInterval>),
}

impl Availability {
    pub fn from_intervals(intervals: Vec<BusyInterval>) -> Self {
        if intervals.is_empty() {
            Self::Free
        } else {
            Self::Busy(intervals)
        }
    }
}

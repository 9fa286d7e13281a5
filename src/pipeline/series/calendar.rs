/*
Copyright 2025 The wbgt-metrics developers

This file is part of WBGT Climate Metrics (wbgt-metrics).

WBGT Climate Metrics (wbgt-metrics) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

WBGT Climate Metrics (wbgt-metrics) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with WBGT Climate Metrics (wbgt-metrics). If not, see https://www.gnu.org/licenses/.
*/

//! Sub-module decoding CF time coordinates into calendar years.
//!
//! Time in CF-compliant files is stored as offsets from a reference
//! date, described by `units` like `days since 1979-01-01`. Annual
//! statistics only need the calendar year of every time step.

use crate::{errors::DataAccessError, Float};
use chrono::{Duration, NaiveDate, NaiveDateTime};

const REFERENCE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const SUPPORTED_CALENDARS: [&str; 3] = ["standard", "gregorian", "proleptic_gregorian"];

/// Decoder of offsets in a single `<unit> since <reference>` convention.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TimeUnits {
    reference: NaiveDateTime,
    millis_per_unit: i64,
}

impl TimeUnits {
    /// Parses CF `units` and `calendar` attributes of the time coordinate.
    pub fn parse(units: &str, calendar: Option<&str>) -> Result<Self, DataAccessError> {
        if let Some(calendar) = calendar {
            let calendar = calendar.trim().to_lowercase();

            if !SUPPORTED_CALENDARS.contains(&calendar.as_str()) {
                return Err(DataAccessError::UnsupportedCalendar(calendar));
            }
        }

        let bad_units = || DataAccessError::TimeUnits(units.to_string());

        let (unit, reference) = units.trim().split_once(" since ").ok_or_else(bad_units)?;

        let millis_per_unit = match unit.trim().to_lowercase().as_str() {
            "days" | "day" | "d" => 86_400_000,
            "hours" | "hour" | "h" => 3_600_000,
            "minutes" | "minute" | "min" => 60_000,
            "seconds" | "second" | "s" => 1000,
            _ => return Err(bad_units()),
        };

        let reference = parse_reference(reference).ok_or_else(bad_units)?;

        Ok(TimeUnits {
            reference,
            millis_per_unit,
        })
    }

    /// Converts a raw offset into a datetime.
    pub fn decode(&self, offset: Float) -> Option<NaiveDateTime> {
        if !offset.is_finite() {
            return None;
        }

        let millis = (offset * self.millis_per_unit as Float).round() as i64;

        self.reference
            .checked_add_signed(Duration::milliseconds(millis))
    }
}

/// Reference dates come in many flavours, from `1900-01-01` to
/// `1970-01-01T00:00:00Z`, so a few formats are tried in turn.
fn parse_reference(reference: &str) -> Option<NaiveDateTime> {
    let reference = reference
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim();

    for format in REFERENCE_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(reference, format) {
            return Some(datetime);
        }
    }

    NaiveDate::parse_from_str(reference, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

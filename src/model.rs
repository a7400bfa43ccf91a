//! Row and record types for the monthly trips table.

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize};

/// A cell that may arrive as free text or as a number.
///
/// Upstream encodes bike, fleet, and station identifiers inconsistently:
/// some months ship them as plain strings, others as floats (`201.0`).
/// [`Dataset::clean`](crate::dataset::Dataset::clean) normalizes every
/// `Number` into its `Text` rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
}

impl FieldValue {
    /// Text rendering; integral numbers drop the trailing `.0`.
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            FieldValue::Number(n) => n.to_string(),
        }
    }

    /// Numeric reading, if the value is or parses as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Returns `true` for the `Text` variant.
    pub fn is_text(&self) -> bool {
        matches!(self, FieldValue::Text(_))
    }
}

/// Timestamp formats observed across published months.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parses a timestamp cell, trying each known format in turn.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn loose_field<'de, D>(deserializer: D) -> Result<Option<FieldValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        let s = s.trim();
        if s.is_empty() {
            None
        } else if let Ok(n) = s.parse::<f64>() {
            Some(FieldValue::Number(n))
        } else {
            Some(FieldValue::Text(s.to_string()))
        }
    }))
}

fn loose_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.trim().parse().ok()))
}

fn loose_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_datetime))
}

/// One bicycle rental event, as parsed from the monthly CSV.
///
/// The table is `;`-separated; only these fifteen columns are consumed and
/// any others are ignored. `unlock_date` is the primary time index.
#[derive(Debug, Clone, Deserialize)]
pub struct TripRecord {
    #[serde(rename = "idBike", deserialize_with = "loose_field", default)]
    pub id_bike: Option<FieldValue>,
    #[serde(deserialize_with = "loose_field", default)]
    pub fleet: Option<FieldValue>,
    #[serde(deserialize_with = "loose_number", default)]
    pub trip_minutes: Option<f64>,
    #[serde(default)]
    pub geolocation_unlock: Option<String>,
    #[serde(default)]
    pub address_unlock: Option<String>,
    #[serde(deserialize_with = "loose_datetime", default)]
    pub unlock_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub locktype: Option<String>,
    #[serde(default)]
    pub unlocktype: Option<String>,
    #[serde(default)]
    pub geolocation_lock: Option<String>,
    #[serde(default)]
    pub address_lock: Option<String>,
    #[serde(deserialize_with = "loose_datetime", default)]
    pub lock_date: Option<NaiveDateTime>,
    #[serde(deserialize_with = "loose_field", default)]
    pub station_unlock: Option<FieldValue>,
    #[serde(default)]
    pub unlock_station_name: Option<String>,
    #[serde(deserialize_with = "loose_field", default)]
    pub station_lock: Option<FieldValue>,
    #[serde(default)]
    pub lock_station_name: Option<String>,

    /// Spanish single-letter weekday, derived on demand by
    /// [`Dataset::weekday_usage_hours`](crate::dataset::Dataset::weekday_usage_hours).
    #[serde(skip)]
    pub weekday: Option<char>,
}

impl TripRecord {
    /// True when every consumed column is empty.
    pub fn is_empty(&self) -> bool {
        self.id_bike.is_none()
            && self.fleet.is_none()
            && self.trip_minutes.is_none()
            && self.geolocation_unlock.is_none()
            && self.address_unlock.is_none()
            && self.unlock_date.is_none()
            && self.locktype.is_none()
            && self.unlocktype.is_none()
            && self.geolocation_lock.is_none()
            && self.address_lock.is_none()
            && self.lock_date.is_none()
            && self.station_unlock.is_none()
            && self.unlock_station_name.is_none()
            && self.station_lock.is_none()
            && self.lock_station_name.is_none()
    }
}

/// Single-letter Spanish weekday labels, Monday through Sunday.
pub fn weekday_label(day: Weekday) -> char {
    match day {
        Weekday::Mon => 'L',
        Weekday::Tue => 'M',
        Weekday::Wed => 'X',
        Weekday::Thu => 'J',
        Weekday::Fri => 'V',
        Weekday::Sat => 'S',
        Weekday::Sun => 'D',
    }
}

/// Monthly overview record produced by
/// [`Dataset::summary`](crate::dataset::Dataset::summary).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub year: u32,
    pub month: u32,
    pub total_uses: u64,
    pub total_time_minutes: f64,
    pub most_popular_lock_station: String,
    pub uses_from_most_popular: u64,
}

/// Trip count for one (calendar day, unlock station) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayStationUsage {
    pub date: NaiveDate,
    pub station_unlock: String,
    pub trips: u64,
}

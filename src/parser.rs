//! Semicolon-delimited CSV parser for monthly trip tables.

use csv::ReaderBuilder;

use crate::error::{BicimadError, Result};
use crate::model::TripRecord;

/// The columns a trips table must carry to be usable.
const REQUIRED_COLUMNS: &[&str] = &[
    "idBike",
    "fleet",
    "trip_minutes",
    "geolocation_unlock",
    "address_unlock",
    "unlock_date",
    "locktype",
    "unlocktype",
    "geolocation_lock",
    "address_lock",
    "lock_date",
    "station_unlock",
    "unlock_station_name",
    "station_lock",
    "lock_station_name",
];

/// Decodes extracted CSV text into trip records.
///
/// The upstream table is `;`-separated with a header row; columns beyond the
/// fifteen consumed ones are ignored.
///
/// # Errors
///
/// Returns [`BicimadError::CsvParse`] when a required column is missing or a
/// row cannot be read.
pub fn parse_trips(text: &str) -> Result<Vec<TripRecord>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == *column) {
            return Err(BicimadError::CsvParse(format!(
                "missing column '{column}'"
            )));
        }
    }

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

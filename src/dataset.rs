//! Monthly trip dataset: construction, cleaning, and aggregate queries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{Datelike, NaiveDate};
use tracing::{error, warn};

use crate::error::Result;
use crate::fetch::HttpClient;
use crate::model::{DayStationUsage, FieldValue, MonthlySummary, TripRecord, weekday_label};
use crate::parser::parse_trips;
use crate::resolver::UrlResolver;

/// How a CSV parse failure during construction is handled.
///
/// The portal occasionally ships archives whose table cannot be read; the
/// historical behavior is to keep going with an empty dataset. This stands
/// in contrast to the resolver, which always surfaces its failures. `Fail`
/// makes the same parse failure a hard error instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParsePolicy {
    /// Log the parse error and yield an empty dataset (historical default).
    #[default]
    Empty,
    /// Propagate the parse error to the caller.
    Fail,
}

/// One month of trip records, indexed by unlock timestamp.
///
/// Owns its rows outright; instances are independent and carry no shared
/// state, so concurrent work needs one dataset (and resolver) per task.
#[derive(Debug)]
pub struct Dataset {
    month: u32,
    year: u32,
    rows: Vec<TripRecord>,
}

impl Dataset {
    /// Fetches the month through a freshly built default resolver.
    pub fn fetch(month: u32, year: u32) -> Result<Self> {
        Self::fetch_with_policy(&mut UrlResolver::new(), month, year, ParsePolicy::default())
    }

    /// Resolver path under an explicit parse policy: refresh the link set,
    /// resolve the period, download and extract, then parse.
    pub fn fetch_with_policy<C: HttpClient>(
        resolver: &mut UrlResolver<C>,
        month: u32,
        year: u32,
        policy: ParsePolicy,
    ) -> Result<Self> {
        resolver.refresh()?;
        let url = resolver.resolve(month, year)?;
        let text = resolver.fetch_payload(&url)?;
        Self::from_csv_text_with_policy(month, year, &text, policy)
    }

    /// Downloads and extracts a known archive URL, skipping index discovery.
    pub fn from_archive_url<C: HttpClient>(
        client: C,
        month: u32,
        year: u32,
        url: &str,
        policy: ParsePolicy,
    ) -> Result<Self> {
        let resolver = UrlResolver::with_client(client);
        let text = resolver.fetch_payload(url)?;
        Self::from_csv_text_with_policy(month, year, &text, policy)
    }

    /// Builds a dataset from already-extracted CSV text.
    pub fn from_csv_text(month: u32, year: u32, text: &str) -> Result<Self> {
        Self::from_csv_text_with_policy(month, year, text, ParsePolicy::default())
    }

    pub fn from_csv_text_with_policy(
        month: u32,
        year: u32,
        text: &str,
        policy: ParsePolicy,
    ) -> Result<Self> {
        let rows = match parse_trips(text) {
            Ok(rows) => rows,
            Err(e) if policy == ParsePolicy::Empty => {
                error!(month, year, error = %e, "trips table unreadable, keeping an empty dataset");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self { month, year, rows })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn year(&self) -> u32 {
        self.year
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[TripRecord] {
        &self.rows
    }

    /// Drops all-empty rows and normalizes the loosely typed identifier
    /// columns (fleet, bike id, both stations) to text. Absent values stay
    /// absent. Safe to call repeatedly.
    pub fn clean(&mut self) {
        self.rows.retain(|row| !row.is_empty());

        for row in &mut self.rows {
            for field in [
                &mut row.fleet,
                &mut row.id_bike,
                &mut row.station_lock,
                &mut row.station_unlock,
            ] {
                if let Some(value) = field {
                    if !value.is_text() {
                        *value = FieldValue::Text(value.as_text());
                    }
                }
            }
        }
    }

    /// Rows where a bike was unlocked at a station but never locked at one.
    /// Works on raw data; no prior [`clean`](Self::clean) needed.
    pub fn count_unlocked_without_lock(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.station_unlock.is_some() && row.station_lock.is_none())
            .count()
    }

    /// Rows belonging to the regular fleet (fleet code 1). Fleet values
    /// that do not read as a number are treated as absent.
    pub fn filter_regular_fleet(&self) -> Vec<&TripRecord> {
        self.rows
            .iter()
            .filter(|row| row.fleet.as_ref().and_then(FieldValue::as_number) == Some(1.0))
            .collect()
    }

    /// Total trip hours per calendar date, in date order.
    pub fn daily_usage_hours(&self) -> BTreeMap<NaiveDate, f64> {
        let mut minutes: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for row in &self.rows {
            let Some(date) = row.unlock_date.map(|stamp| stamp.date()) else {
                continue;
            };
            *minutes.entry(date).or_default() += row.trip_minutes.unwrap_or(0.0);
        }
        minutes.into_iter().map(|(d, m)| (d, m / 60.0)).collect()
    }

    /// Total trip hours per weekday label (`L` Monday through `D` Sunday).
    ///
    /// Stores the derived label on each row as a side effect, which is why
    /// this query takes `&mut self`.
    pub fn weekday_usage_hours(&mut self) -> BTreeMap<char, f64> {
        let mut minutes: BTreeMap<char, f64> = BTreeMap::new();
        for row in &mut self.rows {
            let Some(stamp) = row.unlock_date else {
                continue;
            };
            let label = weekday_label(stamp.weekday());
            row.weekday = Some(label);
            *minutes.entry(label).or_default() += row.trip_minutes.unwrap_or(0.0);
        }
        minutes.into_iter().map(|(d, m)| (d, m / 60.0)).collect()
    }

    /// Number of trips per calendar date, in date order.
    pub fn daily_trip_counts(&self) -> BTreeMap<NaiveDate, u64> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            if let Some(date) = row.unlock_date.map(|stamp| stamp.date()) {
                *counts.entry(date).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Trip counts per (calendar day, unlock station) pair. Rows lacking
    /// either key are skipped; only pairs with at least one trip appear.
    pub fn usage_by_date_and_station(&self) -> Vec<DayStationUsage> {
        let mut counts: BTreeMap<(NaiveDate, String), u64> = BTreeMap::new();
        for row in &self.rows {
            let (Some(stamp), Some(station)) = (row.unlock_date, row.station_unlock.as_ref())
            else {
                continue;
            };
            *counts.entry((stamp.date(), station.as_text())).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .map(|((date, station_unlock), trips)| DayStationUsage {
                date,
                station_unlock,
                trips,
            })
            .collect()
    }

    fn unlock_address_counts(&self) -> HashMap<&str, u64> {
        let mut counts = HashMap::new();
        for row in &self.rows {
            if let Some(address) = row.address_unlock.as_deref() {
                *counts.entry(address).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Unlock addresses tied for the highest trip count. The maximum may
    /// not be unique, so every tied address is returned.
    pub fn most_popular_unlock_addresses(&self) -> HashSet<String> {
        let counts = self.unlock_address_counts();
        let Some(max) = counts.values().copied().max() else {
            return HashSet::new();
        };
        counts
            .into_iter()
            .filter(|&(_, n)| n == max)
            .map(|(address, _)| address.to_string())
            .collect()
    }

    /// Combined trip count over all addresses tied for the maximum.
    pub fn usage_from_most_popular_unlock_address(&self) -> u64 {
        let counts = self.unlock_address_counts();
        let Some(max) = counts.values().copied().max() else {
            return 0;
        };
        counts.values().filter(|&&n| n == max).sum()
    }

    /// Monthly overview, or `None` when the dataset holds no rows.
    ///
    /// The popular lock station is the mode of the lock-station text; on
    /// ties the first-encountered station (in row order) wins.
    pub fn summary(&self) -> Option<MonthlySummary> {
        if self.rows.is_empty() {
            warn!(
                month = self.month,
                year = self.year,
                "dataset is empty, nothing to summarize"
            );
            return None;
        }

        let total_time_minutes = self.rows.iter().filter_map(|row| row.trip_minutes).sum();

        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for row in &self.rows {
            if let Some(station) = row.station_lock.as_ref().map(FieldValue::as_text) {
                if !counts.contains_key(&station) {
                    order.push(station.clone());
                }
                *counts.entry(station).or_insert(0) += 1;
            }
        }

        let mut most_popular_lock_station = String::new();
        let mut uses_from_most_popular = 0;
        for station in &order {
            let n = counts[station];
            if n > uses_from_most_popular {
                uses_from_most_popular = n;
                most_popular_lock_station = station.clone();
            }
        }

        Some(MonthlySummary {
            year: self.year,
            month: self.month,
            total_uses: self.rows.len() as u64,
            total_time_minutes,
            most_popular_lock_station,
            uses_from_most_popular,
        })
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} trip records for {:02}/{:02}",
            self.rows.len(),
            self.month,
            self.year
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BicimadError;
    use chrono::NaiveDate;

    const HEADER: &str = "idBike;fleet;trip_minutes;geolocation_unlock;address_unlock;unlock_date;locktype;unlocktype;geolocation_lock;address_lock;lock_date;station_unlock;unlock_station_name;station_lock;lock_station_name";

    fn dataset(rows: &[&str]) -> Dataset {
        let text = format!("{HEADER}\n{}\n", rows.join("\n"));
        Dataset::from_csv_text(2, 23, &text).unwrap()
    }

    // idBike / fleet / minutes / address_unlock / unlock_date / station_unlock / station_lock
    fn row(
        bike: &str,
        fleet: &str,
        minutes: &str,
        address: &str,
        unlock: &str,
        station_unlock: &str,
        station_lock: &str,
    ) -> String {
        format!(
            "{bike};{fleet};{minutes};;{address};{unlock};;;;;;{station_unlock};;{station_lock};"
        )
    }

    #[test]
    fn test_clean_removes_all_empty_rows() {
        let mut ds = dataset(&[
            &row("1", "1", "10", "Calle A", "2023-02-01T08:00", "66", "201"),
            ";;;;;;;;;;;;;;",
        ]);
        assert_eq!(ds.len(), 2);
        ds.clean();
        assert_eq!(ds.len(), 1);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let mut ds = dataset(&[
            &row("1.0", "1.0", "10", "Calle A", "2023-02-01T08:00", "66.0", "201.0"),
            ";;;;;;;;;;;;;;",
        ]);
        ds.clean();
        let after_first: Vec<_> = ds.rows().iter().map(|r| r.station_lock.clone()).collect();
        let len_first = ds.len();

        ds.clean();
        assert_eq!(ds.len(), len_first);
        let after_second: Vec<_> = ds.rows().iter().map(|r| r.station_lock.clone()).collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_clean_normalizes_identifier_fields_to_text() {
        let mut ds = dataset(&[&row(
            "8551.0",
            "1.0",
            "10",
            "Calle A",
            "2023-02-01T08:00",
            "66.0",
            "201.0",
        )]);
        ds.clean();

        let r = &ds.rows()[0];
        assert_eq!(r.id_bike, Some(FieldValue::Text("8551".to_string())));
        assert_eq!(r.fleet, Some(FieldValue::Text("1".to_string())));
        assert_eq!(r.station_unlock, Some(FieldValue::Text("66".to_string())));
        assert_eq!(r.station_lock, Some(FieldValue::Text("201".to_string())));
    }

    #[test]
    fn test_clean_keeps_absent_identifiers_absent() {
        let mut ds = dataset(&[&row("1", "1", "10", "Calle A", "2023-02-01T08:00", "66", "")]);
        ds.clean();
        assert!(ds.rows()[0].station_lock.is_none());
    }

    #[test]
    fn test_count_unlocked_without_lock() {
        let ds = dataset(&[
            &row("1", "1", "10", "Calle A", "2023-02-01T08:00", "66", ""),
            &row("2", "1", "10", "Calle B", "2023-02-01T09:00", "", "201"),
            &row("3", "1", "10", "Calle C", "2023-02-01T10:00", "66", "201"),
        ]);
        assert_eq!(ds.count_unlocked_without_lock(), 1);
    }

    #[test]
    fn test_filter_regular_fleet() {
        let ds = dataset(&[
            &row("1", "1", "10", "Calle A", "2023-02-01T08:00", "66", "201"),
            &row("2", "1.0", "10", "Calle B", "2023-02-01T09:00", "66", "201"),
            &row("3", "2", "10", "Calle C", "2023-02-01T10:00", "66", "201"),
            &row("4", "", "10", "Calle D", "2023-02-01T11:00", "66", "201"),
        ]);
        let regular = ds.filter_regular_fleet();
        assert_eq!(regular.len(), 2);
    }

    #[test]
    fn test_daily_usage_hours_groups_by_date() {
        let ds = dataset(&[
            &row("1", "1", "30", "Calle A", "2023-02-01T08:00", "66", "201"),
            &row("2", "1", "60", "Calle A", "2023-02-01T22:30", "66", "201"),
            &row("3", "1", "120", "Calle A", "2023-02-02T08:00", "66", "201"),
        ]);
        let hours = ds.daily_usage_hours();

        let feb1 = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap();
        let feb2 = NaiveDate::from_ymd_opt(2023, 2, 2).unwrap();
        assert_eq!(hours.len(), 2);
        assert!((hours[&feb1] - 1.5).abs() < 1e-9);
        assert!((hours[&feb2] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_weekday_usage_hours_labels_and_sums() {
        // 2023-02-01 is a Wednesday, 2023-02-05 a Sunday.
        let mut ds = dataset(&[
            &row("1", "1", "60", "Calle A", "2023-02-01T08:00", "66", "201"),
            &row("2", "1", "30", "Calle A", "2023-02-01T09:00", "66", "201"),
            &row("3", "1", "60", "Calle A", "2023-02-05T08:00", "66", "201"),
        ]);
        let hours = ds.weekday_usage_hours();

        assert!((hours[&'X'] - 1.5).abs() < 1e-9);
        assert!((hours[&'D'] - 1.0).abs() < 1e-9);

        // The derived label is stored on the rows as a side effect.
        assert_eq!(ds.rows()[0].weekday, Some('X'));
        assert_eq!(ds.rows()[2].weekday, Some('D'));
    }

    #[test]
    fn test_daily_trip_counts() {
        let ds = dataset(&[
            &row("1", "1", "10", "Calle A", "2023-02-01T08:00", "66", "201"),
            &row("2", "1", "10", "Calle A", "2023-02-01T09:00", "66", "201"),
            &row("3", "1", "10", "Calle A", "2023-02-02T08:00", "66", "201"),
        ]);
        let counts = ds.daily_trip_counts();
        let feb1 = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap();
        assert_eq!(counts[&feb1], 2);
    }

    #[test]
    fn test_usage_by_date_and_station() {
        let ds = dataset(&[
            &row("1", "1", "10", "Calle A", "2023-02-01T08:00", "66", "201"),
            &row("2", "1", "10", "Calle A", "2023-02-01T09:00", "66", "201"),
            &row("3", "1", "10", "Calle A", "2023-02-01T10:00", "67", "201"),
            &row("4", "1", "10", "Calle A", "2023-02-01T11:00", "", "201"),
        ]);
        let usage = ds.usage_by_date_and_station();

        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].station_unlock, "66");
        assert_eq!(usage[0].trips, 2);
        assert_eq!(usage[1].station_unlock, "67");
        assert_eq!(usage[1].trips, 1);
    }

    #[test]
    fn test_most_popular_addresses_returns_all_ties() {
        let ds = dataset(&[
            &row("1", "1", "10", "Calle A", "2023-02-01T08:00", "66", "201"),
            &row("2", "1", "10", "Calle A", "2023-02-01T09:00", "66", "201"),
            &row("3", "1", "10", "Calle A", "2023-02-01T10:00", "66", "201"),
            &row("4", "1", "10", "Calle B", "2023-02-02T08:00", "66", "201"),
            &row("5", "1", "10", "Calle B", "2023-02-02T09:00", "66", "201"),
            &row("6", "1", "10", "Calle B", "2023-02-02T10:00", "66", "201"),
            &row("7", "1", "10", "Calle C", "2023-02-03T08:00", "66", "201"),
        ]);

        let popular = ds.most_popular_unlock_addresses();
        assert_eq!(popular.len(), 2);
        assert!(popular.contains("Calle A"));
        assert!(popular.contains("Calle B"));

        assert_eq!(ds.usage_from_most_popular_unlock_address(), 6);
    }

    #[test]
    fn test_summary_on_empty_dataset_is_none() {
        let ds = dataset(&[]);
        assert!(ds.summary().is_none());
    }

    #[test]
    fn test_summary_counts_and_mode() {
        let ds = dataset(&[
            &row("1", "1", "15", "Calle A", "2023-02-01T08:00", "66", "201"),
            &row("2", "1", "30", "Calle B", "2023-02-01T09:00", "66", "202"),
            &row("3", "1", "45", "Calle C", "2023-02-02T08:00", "66", "201"),
        ]);
        let summary = ds.summary().unwrap();

        assert_eq!(summary.year, 23);
        assert_eq!(summary.month, 2);
        assert_eq!(summary.total_uses, 3);
        assert!((summary.total_time_minutes - 90.0).abs() < 1e-9);
        assert_eq!(summary.most_popular_lock_station, "201");
        assert_eq!(summary.uses_from_most_popular, 2);
    }

    #[test]
    fn test_summary_mode_tie_takes_first_encountered() {
        let ds = dataset(&[
            &row("1", "1", "10", "Calle A", "2023-02-01T08:00", "66", "202"),
            &row("2", "1", "10", "Calle A", "2023-02-01T09:00", "66", "201"),
            &row("3", "1", "10", "Calle A", "2023-02-01T10:00", "66", "201"),
            &row("4", "1", "10", "Calle A", "2023-02-01T11:00", "66", "202"),
        ]);
        let summary = ds.summary().unwrap();
        assert_eq!(summary.most_popular_lock_station, "202");
        assert_eq!(summary.uses_from_most_popular, 2);
    }

    #[test]
    fn test_aggregates_on_empty_dataset_are_empty() {
        let ds = dataset(&[]);
        assert!(ds.daily_usage_hours().is_empty());
        assert!(ds.daily_trip_counts().is_empty());
        assert!(ds.usage_by_date_and_station().is_empty());
        assert!(ds.most_popular_unlock_addresses().is_empty());
        assert_eq!(ds.usage_from_most_popular_unlock_address(), 0);
        assert_eq!(ds.count_unlocked_without_lock(), 0);
    }

    #[test]
    fn test_parse_policy_empty_degrades() {
        let ds =
            Dataset::from_csv_text_with_policy(2, 23, "foo;bar\n1;2\n", ParsePolicy::Empty)
                .unwrap();
        assert!(ds.is_empty());
    }

    #[test]
    fn test_parse_policy_fail_propagates() {
        let err = Dataset::from_csv_text_with_policy(2, 23, "foo;bar\n1;2\n", ParsePolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, BicimadError::CsvParse(_)));
    }

    #[test]
    fn test_display_overview() {
        let ds = dataset(&[&row("1", "1", "10", "Calle A", "2023-02-01T08:00", "66", "201")]);
        assert_eq!(ds.to_string(), "1 trip records for 02/23");
    }
}

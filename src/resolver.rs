//! Discovery and retrieval of monthly trip archives from the EMT portal.
//!
//! The portal publishes one ZIP per month, linked from a fixed index page.
//! Link filenames follow `trips_<YY>_<MM>_<name>.csv` (or the `-csv.<ext>`
//! export variant), which is the only contract this module relies on.

use std::collections::HashSet;
use std::io::{Cursor, Read};

use bytes::Bytes;
use regex::Regex;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{BicimadError, Result};
use crate::fetch::{BasicClient, HttpClient, fetch_bytes};

/// Base URL of the EMT open data portal.
pub const PORTAL_HOST: &str = "https://opendata.emtmadrid.es";

/// Index page listing the monthly trip archives.
pub const INDEX_PAGE: &str = "/Datos-estaticos/Datos-generales-(1)";

/// Anchor hrefs that point at a monthly trips archive.
const LINK_PATTERN: &str = r#"href="(/getattachment/[A-Za-z0-9-]+/trips_\d{2}_\d{2}_[A-Za-z]+(?:\.csv|-csv\.[A-Za-z]+))""#;

/// Extracts every monthly-archive link from index page HTML.
///
/// Matches are rewritten as absolute URLs and deduplicated; HTML with no
/// matching anchors yields an empty set. Pure function, no network access.
pub fn discover_links(html: &str) -> HashSet<String> {
    let pattern = Regex::new(LINK_PATTERN).expect("link pattern is valid");
    pattern
        .captures_iter(html)
        .map(|capture| format!("{PORTAL_HOST}{}", &capture[1]))
        .collect()
}

/// Two-digit year window for which archives are published.
///
/// The portal currently covers 2021 through 2023. The window is held as
/// configuration so the bound can move when new months appear; months are
/// always 1 through 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    pub min_year: u32,
    pub max_year: u32,
}

impl Default for PeriodWindow {
    fn default() -> Self {
        Self {
            min_year: 21,
            max_year: 23,
        }
    }
}

impl PeriodWindow {
    /// True when `month`/`year` fall inside the published window.
    pub fn contains(&self, month: u32, year: u32) -> bool {
        (1..=12).contains(&month) && (self.min_year..=self.max_year).contains(&year)
    }
}

/// Locates and retrieves monthly trip archives.
///
/// Each resolver owns its own link set; instances are explicitly constructed
/// and discarded by the caller, with no shared state between them. The
/// resolver is strict: every failure surfaces as a distinct error kind.
pub struct UrlResolver<C = BasicClient> {
    client: C,
    window: PeriodWindow,
    valid_urls: HashSet<String>,
}

impl UrlResolver<BasicClient> {
    pub fn new() -> Self {
        Self::with_client(BasicClient::new())
    }
}

impl Default for UrlResolver<BasicClient> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: HttpClient> UrlResolver<C> {
    /// Builds a resolver over a caller-supplied HTTP client.
    pub fn with_client(client: C) -> Self {
        Self {
            client,
            window: PeriodWindow::default(),
            valid_urls: HashSet::new(),
        }
    }

    /// Overrides the supported year window.
    pub fn with_window(mut self, window: PeriodWindow) -> Self {
        self.window = window;
        self
    }

    /// Archive links discovered by the last [`refresh`](Self::refresh).
    pub fn valid_urls(&self) -> &HashSet<String> {
        &self.valid_urls
    }

    /// Re-reads the index page and stores the discovered archive links.
    ///
    /// # Errors
    ///
    /// [`BicimadError::RemoteUnavailable`] when the index page cannot be
    /// downloaded.
    pub fn refresh(&mut self) -> Result<&HashSet<String>> {
        let index_url = format!("{PORTAL_HOST}{INDEX_PAGE}");
        let body = fetch_bytes(&self.client, &index_url)?;
        let html = String::from_utf8_lossy(&body);

        self.valid_urls = discover_links(&html);
        info!(links = self.valid_urls.len(), "index page refreshed");
        Ok(&self.valid_urls)
    }

    /// Returns the archive URL for the given month and two-digit year.
    ///
    /// When several stored links encode the same period, which one is
    /// returned is unspecified; callers must not rely on archive naming
    /// beyond the `trips_YY_MM` token.
    ///
    /// # Errors
    ///
    /// [`BicimadError::InvalidPeriod`] outside the supported window;
    /// [`BicimadError::PeriodNotFound`] when the link set has not been
    /// populated or holds no entry for the period.
    pub fn resolve(&self, month: u32, year: u32) -> Result<String> {
        if !self.window.contains(month, year) {
            return Err(BicimadError::InvalidPeriod { month, year });
        }

        let token = format!("trips_{year:02}_{month:02}");
        self.valid_urls
            .iter()
            .find(|url| url.contains(&token))
            .cloned()
            .ok_or(BicimadError::PeriodNotFound { month, year })
    }

    /// Downloads the archive at `url` and returns its CSV payload as text.
    ///
    /// # Errors
    ///
    /// [`BicimadError::RemoteUnavailable`] when the download fails;
    /// [`BicimadError::MalformedArchive`] when the body is not a ZIP, holds
    /// no `.csv` entry, or the entry is not valid UTF-8.
    pub fn fetch_payload(&self, url: &str) -> Result<String> {
        let body = fetch_bytes(&self.client, url)?;
        debug!(url, bytes = body.len(), "archive downloaded");
        extract_csv(body)
    }
}

/// Pulls the first `.csv` entry (in archive order) out of an in-memory ZIP.
fn extract_csv(body: Bytes) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(body))
        .map_err(|e| BicimadError::MalformedArchive(format!("not a ZIP archive: {e}")))?;

    let count = archive.len();
    let target = (0..count).find(|&i| {
        archive
            .by_index(i)
            .map(|entry| entry.name().ends_with(".csv"))
            .unwrap_or(false)
    });
    let Some(index) = target else {
        return Err(BicimadError::MalformedArchive(
            "archive holds no .csv entry".to_string(),
        ));
    };

    let mut entry = archive
        .by_index(index)
        .map_err(|e| BicimadError::MalformedArchive(e.to_string()))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| BicimadError::MalformedArchive(format!("entry is not UTF-8 text: {e}")))?;
    Ok(text)
}

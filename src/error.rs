use thiserror::Error;

/// All errors produced by the bicimad-report library.
#[derive(Error, Debug)]
pub enum BicimadError {
    /// Requested month or year falls outside the published data window.
    #[error("unsupported period: month {month}, year {year}")]
    InvalidPeriod { month: u32, year: u32 },

    /// The index page or an archive could not be downloaded.
    #[error("request to {url} failed: {reason}")]
    RemoteUnavailable { url: String, reason: String },

    /// The link set holds no archive for a period inside the window.
    #[error("no download link available for {month:02}/{year:02}")]
    PeriodNotFound { month: u32, year: u32 },

    /// The downloaded body is not a usable ZIP or holds no CSV entry.
    #[error("downloaded archive is unusable: {0}")]
    MalformedArchive(String),

    /// The extracted trips table could not be parsed.
    #[error("failed to parse trips CSV: {0}")]
    CsvParse(String),
}

impl From<csv::Error> for BicimadError {
    fn from(err: csv::Error) -> Self {
        BicimadError::CsvParse(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BicimadError>;

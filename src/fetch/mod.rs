mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use bytes::Bytes;
use reqwest::Method;
use reqwest::blocking::Request;

use crate::error::{BicimadError, Result};

/// Performs a plain GET against `url` and returns the response body.
///
/// # Errors
///
/// Returns [`BicimadError::RemoteUnavailable`] when the URL is invalid, the
/// request fails at the transport level, or the response status is not
/// successful.
pub fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes> {
    let remote = |reason: String| BicimadError::RemoteUnavailable {
        url: url.to_string(),
        reason,
    };

    let target = reqwest::Url::parse(url).map_err(|e| remote(e.to_string()))?;
    let req = Request::new(Method::GET, target);

    let resp = client
        .execute(req)
        .and_then(|r| r.error_for_status())
        .map_err(|e| remote(e.to_string()))?;

    resp.bytes().map_err(|e| remote(e.to_string()))
}

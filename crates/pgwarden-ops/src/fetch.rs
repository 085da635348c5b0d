// ABOUTME: HTTP(S) download capability used when a dump is restored from a URL.
// ABOUTME: The reqwest blocking client streams the body straight into the destination file.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait HttpFetcher {
    /// Download `url` into `dest`, returning the bytes written.
    fn download(&self, url: &Url, dest: &Path) -> Result<u64, FetchError>;
}

/// Fetcher backed by `reqwest::blocking`.
///
/// The client is built per download, so the fetcher can be created and
/// dropped from inside an async runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestFetcher;

impl HttpFetcher for ReqwestFetcher {
    fn download(&self, url: &Url, dest: &Path) -> Result<u64, FetchError> {
        let client = reqwest::blocking::Client::new();
        let mut response = client
            .get(url.clone())
            .send()
            .map_err(reqwest::Error::without_url)?;
        if let Some(err) = status_error(url, response.status()) {
            return Err(err);
        }

        let mut file = File::create(dest)?;
        let written = response
            .copy_to(&mut file)
            .map_err(reqwest::Error::without_url)?;
        file.flush()?;
        debug!(url = %origin(url), bytes = written, "downloaded");
        Ok(written)
    }
}

/// `scheme://host[:port]` of a URL. Credentials, path and query may carry
/// secrets and are left out of errors and logs.
pub fn origin(url: &Url) -> String {
    let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));
    if let Some(port) = url.port() {
        origin.push_str(&format!(":{port}"));
    }
    origin
}

fn status_error(url: &Url, status: StatusCode) -> Option<FetchError> {
    match status {
        StatusCode::NOT_FOUND => Some(FetchError::NotFound(origin(url))),
        status if !status.is_success() => Some(FetchError::Status {
            url: origin(url),
            status: status.as_u16(),
        }),
        _ => None,
    }
}

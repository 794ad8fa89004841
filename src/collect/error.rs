//! Error type shared by discovery, extraction and the HTTP collaborators.

use crate::fragment::FragmentError;
use thiserror::Error;

/// Failures while fetching or extracting. Page- and image-level variants are logged and skipped by
/// the pipeline; only a failed discovery visit is fatal.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to save image to {path}: {source}")]
    ImageWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not process content of {url}: {source}")]
    Content {
        url: String,
        #[source]
        source: FragmentError,
    },

    #[error("Selector {selector:?} matched nothing at {url} and body fallback is disabled.")]
    ExtractionSkip { url: String, selector: String },

    #[error("Fetched page {url} does not match any discovered link.")]
    UnknownPage { url: String },
}

impl CollectError {
    pub(crate) fn content(url: &str, source: FragmentError) -> Self {
        CollectError::Content {
            url: url.to_string(),
            source,
        }
    }
}

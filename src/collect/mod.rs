//! Link discovery and page extraction, plus the collaborator traits they run against.

mod client;
mod error;

pub mod links;
pub mod pages;

pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::CollectError;
pub use links::discover_links;
pub use pages::extract_pages;

use std::path::{Path, PathBuf};

/// A fetched HTML document. `url` is the document's own (post-redirect) URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

/// Retrieves one HTML document. Politeness and retry policy belong to the implementation.
pub trait PageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CollectError>;
}

/// Downloads an image into a scratch directory and returns the local file path.
pub trait ImageDownloader {
    fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, CollectError>;
}

/// Parse an absolute http(s) URL that has a host.
pub fn parse_absolute_url(input: &str) -> Result<reqwest::Url, CollectError> {
    let url = reqwest::Url::parse(input.trim()).map_err(|e| CollectError::InvalidUrl {
        input: input.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(CollectError::InvalidUrl {
            input: input.to_string(),
            reason: "URL has no host".to_string(),
        });
    }
    Ok(url)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators shared by the pipeline tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned HTML by URL; unknown URLs fail with HTTP 404. Records every request.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub pages: HashMap<String, String>,
        /// Requested URL -> reported document URL (simulates redirects).
        pub redirects: HashMap<String, String>,
        pub requests: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn with_page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        pub fn with_redirect(mut self, from: &str, to: &str) -> Self {
            self.redirects.insert(from.to_string(), to.to_string());
            self
        }
    }

    impl PageFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<FetchedPage, CollectError> {
            if let Ok(mut r) = self.requests.lock() {
                r.push(url.to_string());
            }
            match self.pages.get(url) {
                Some(body) => Ok(FetchedPage {
                    url: self
                        .redirects
                        .get(url)
                        .cloned()
                        .unwrap_or_else(|| url.to_string()),
                    body: body.clone(),
                }),
                None => Err(CollectError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                }),
            }
        }
    }

    /// Maps each image URL to `{dir}/{last path segment}`; URLs containing "missing" fail.
    #[derive(Default)]
    pub struct FakeImages {
        pub calls: Mutex<Vec<String>>,
    }

    impl ImageDownloader for FakeImages {
        fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, CollectError> {
            if let Ok(mut c) = self.calls.lock() {
                c.push(url.to_string());
            }
            if url.contains("missing") {
                return Err(CollectError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                });
            }
            let name = url.rsplit('/').next().unwrap_or("image");
            Ok(dir.join(name))
        }
    }
}

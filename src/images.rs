//! Image retrieval into the scratch directory.

use crate::collect::{CollectError, ImageDownloader, PoliteClient};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Downloads images with the shared HTTP client. Files are named `img-NNNN.<ext>` with a counter
/// shared across worker threads, so names never collide within one run.
#[derive(Debug)]
pub struct HttpImageDownloader<'a> {
    client: &'a PoliteClient,
    counter: AtomicUsize,
}

impl<'a> HttpImageDownloader<'a> {
    pub fn new(client: &'a PoliteClient) -> Self {
        Self {
            client,
            counter: AtomicUsize::new(0),
        }
    }
}

impl ImageDownloader for HttpImageDownloader<'_> {
    fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, CollectError> {
        let response = self
            .client
            .get_immediate(url)
            .map_err(|e| CollectError::Network {
                url: url.to_string(),
                source: e,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let ext = image_extension(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            url,
        );
        let bytes = response.bytes().map_err(|e| CollectError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let path = dir.join(format!("img-{:04}.{}", n, ext));
        std::fs::write(&path, &bytes).map_err(|e| CollectError::ImageWrite {
            path: path.clone(),
            source: e,
        })?;
        debug!(%url, path = %path.display(), bytes = bytes.len(), "image saved");
        Ok(path)
    }
}

/// File extension for a downloaded image: content type first, then the URL path, then "jpg".
pub fn image_extension(content_type: Option<&str>, url: &str) -> &'static str {
    if let Some(ct) = content_type.map(|c| c.to_ascii_lowercase()) {
        if ct.contains("jpeg") || ct.contains("jpg") {
            return "jpg";
        } else if ct.contains("png") {
            return "png";
        } else if ct.contains("gif") {
            return "gif";
        } else if ct.contains("webp") {
            return "webp";
        } else if ct.contains("svg") {
            return "svg";
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "png",
        Some("gif") => "gif",
        Some("webp") => "webp",
        Some("svg") => "svg",
        _ => "jpg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_prefers_content_type() {
        assert_eq!(image_extension(Some("image/png"), "https://x.org/a.jpg"), "png");
        assert_eq!(image_extension(Some("IMAGE/JPEG"), "https://x.org/a"), "jpg");
        assert_eq!(image_extension(Some("image/svg+xml"), "https://x.org/a"), "svg");
    }

    #[test]
    fn extension_falls_back_to_url_then_jpg() {
        assert_eq!(
            image_extension(Some("application/octet-stream"), "https://x.org/a.GIF?w=200"),
            "gif"
        );
        assert_eq!(image_extension(None, "https://x.org/pic.webp#frag"), "webp");
        assert_eq!(image_extension(None, "https://x.org/imgs/12345"), "jpg");
    }
}

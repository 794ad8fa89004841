//! Data passed between discovery, extraction and assembly.

use crate::fragment::Fragment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One content link found on the start page.
///
/// `order` is assigned at discovery time, zero-based and contiguous within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredLink {
    pub url: String,
    pub order: usize,
    /// Set when a subsection-marking rewrite rule changed this URL.
    pub subsection: bool,
}

/// Result of link discovery: the ordered links plus the collection title, if the page had one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Discovery {
    pub title: Option<String>,
    pub links: Vec<DiscoveredLink>,
}

/// Content extracted from one fetched page.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub url: String,
    /// Never empty; falls back to "Page {order + 1}".
    pub title: String,
    pub author: String,
    pub body: Fragment,
    pub order: usize,
    /// Derived from body length, not from the link's rewrite flag.
    pub subsection: bool,
    /// Local files downloaded for this page's images. Only these may be embedded in the book.
    pub images: Vec<PathBuf>,
}

impl ExtractedPage {
    /// Title shown in the table of contents.
    pub fn display_title(&self) -> String {
        format!("{} - {}", self.title, self.author)
    }
}

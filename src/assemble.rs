//! Ordering and assembly: turn the URL-keyed extraction result into an ordered book.

use crate::collect::ImageDownloader;
use crate::epub::{BookWriter, EpubError, SectionId};
use crate::fragment::FragmentError;
use crate::model::ExtractedPage;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Selectors whose contents are promoted to headings before a page is added.
const HEADING_SELECTORS: [&str; 2] = [".author-name", ".author-role"];

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Inconsistent page ordering across {expected} pages: missing orders {missing:?}, duplicated orders {duplicates:?}")]
    InconsistentOrdering {
        expected: usize,
        missing: Vec<usize>,
        duplicates: Vec<usize>,
    },

    #[error("Failed to prepare {url} for the book: {source}")]
    Content {
        url: String,
        #[source]
        source: FragmentError,
    },

    #[error(transparent)]
    Epub(#[from] EpubError),
}

/// How to treat gaps in the extracted orders (pages that failed to fetch leave gaps).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Orders must be exactly `0..pages.len()`.
    #[default]
    Strict,
    /// Sort by order, log gaps, fail only on duplicates.
    Compact,
}

/// What [assemble] added to the book.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub sections: usize,
    pub subsections: usize,
    pub images: usize,
    /// Table-of-contents titles in the order they were added.
    pub titles: Vec<String>,
}

impl AssemblyReport {
    pub fn total_pages(&self) -> usize {
        self.sections + self.subsections
    }
}

/// Validate the orders in `pages` and return the pages sorted by order.
pub fn order_pages(
    pages: HashMap<String, ExtractedPage>,
    policy: OrderingPolicy,
) -> Result<Vec<ExtractedPage>, AssembleError> {
    match policy {
        OrderingPolicy::Strict => order_strict(pages),
        OrderingPolicy::Compact => order_compact(pages),
    }
}

fn order_strict(pages: HashMap<String, ExtractedPage>) -> Result<Vec<ExtractedPage>, AssembleError> {
    let expected = pages.len();
    let mut slots: Vec<Option<ExtractedPage>> = vec![None; expected];
    let mut duplicates = Vec::new();
    for page in pages.into_values() {
        match slots.get_mut(page.order) {
            Some(slot @ None) => *slot = Some(page),
            Some(Some(_)) => duplicates.push(page.order),
            None => debug!(order = page.order, url = %page.url, "order out of range"),
        }
    }
    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_none())
        .map(|(i, _)| i)
        .collect();
    if !missing.is_empty() || !duplicates.is_empty() {
        duplicates.sort_unstable();
        return Err(AssembleError::InconsistentOrdering {
            expected,
            missing,
            duplicates,
        });
    }
    Ok(slots.into_iter().flatten().collect())
}

fn order_compact(pages: HashMap<String, ExtractedPage>) -> Result<Vec<ExtractedPage>, AssembleError> {
    let expected = pages.len();
    let mut ordered: Vec<ExtractedPage> = pages.into_values().collect();
    ordered.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.url.cmp(&b.url)));

    let mut duplicates: Vec<usize> = ordered
        .windows(2)
        .filter(|w| w[0].order == w[1].order)
        .map(|w| w[0].order)
        .collect();
    if !duplicates.is_empty() {
        duplicates.dedup();
        return Err(AssembleError::InconsistentOrdering {
            expected,
            missing: Vec::new(),
            duplicates,
        });
    }

    let mut next = 0usize;
    for page in &ordered {
        for gap in next..page.order {
            warn!(order = gap, "no page for this position; continuing without it");
        }
        next = page.order + 1;
    }
    Ok(ordered)
}

/// Body HTML ready for the writer: images downloaded for this page registered with the book
/// and author lines promoted to headings. Any other image source is left as it is and never read
/// from disk. Returns the XHTML and the number of images embedded.
fn prepare_body<W>(page: &ExtractedPage, writer: &mut W) -> Result<(String, usize), AssembleError>
where
    W: BookWriter + ?Sized,
{
    let content_err = |source| AssembleError::Content {
        url: page.url.clone(),
        source,
    };
    let mut body = page.body.clone();
    let embedded = body
        .replace_images(|src| {
            let Some(local) = page.images.iter().find(|p| p.as_os_str() == src) else {
                debug!(url = %page.url, %src, "image was not downloaded for this page; left as is");
                return None;
            };
            match writer.add_image(local) {
                Ok(reference) => Some(reference),
                Err(e) => {
                    warn!(url = %page.url, %src, error = %e, "image not embedded; keeping original reference");
                    None
                }
            }
        })
        .map_err(content_err)?;
    for sel in HEADING_SELECTORS {
        body.wrap_matching(sel, "h3").map_err(content_err)?;
    }
    Ok((body.into_html(), embedded))
}

/// Add `pages` (already ordered) to `writer`.
///
/// A non-subsection page starts a new top-level section and becomes the anchor for the
/// subsections after it. A subsection seen before any anchor is added at top level.
pub fn assemble<W>(
    pages: Vec<ExtractedPage>,
    css: Option<&str>,
    writer: &mut W,
) -> Result<AssemblyReport, AssembleError>
where
    W: BookWriter + ?Sized,
{
    let mut report = AssemblyReport::default();
    let mut anchor: Option<SectionId> = None;

    for page in pages {
        let title = page.display_title();
        let (html, embedded) = prepare_body(&page, writer)?;
        report.images += embedded;

        match (page.subsection, anchor) {
            (true, Some(parent)) => {
                writer.add_subsection(parent, &html, &title, css)?;
                report.subsections += 1;
            }
            (true, None) => {
                debug!(%title, "subsection before any section; adding at top level");
                writer.add_section(&html, &title, css)?;
                report.sections += 1;
            }
            (false, _) => {
                anchor = Some(writer.add_section(&html, &title, css)?);
                report.sections += 1;
            }
        }
        info!(order = page.order, %title, subsection = page.subsection, "added page");
        report.titles.push(title);
    }

    Ok(report)
}

/// Download `url` and make it the book cover. Failures are logged; returns whether a cover was set.
pub fn attach_cover<W, I>(url: &str, scratch_dir: &Path, images: &I, writer: &mut W) -> bool
where
    W: BookWriter + ?Sized,
    I: ImageDownloader + ?Sized,
{
    let path = match images.download(url, scratch_dir) {
        Ok(p) => p,
        Err(e) => {
            warn!(%url, error = %e, "cover download failed; writing the book without a cover");
            return false;
        }
    };
    let result = writer
        .add_image(&path)
        .and_then(|reference| writer.set_cover(&reference));
    match result {
        Ok(()) => {
            info!(%url, "cover set");
            true
        }
        Err(e) => {
            warn!(%url, error = %e, "cover could not be added; writing the book without a cover");
            false
        }
    }
}

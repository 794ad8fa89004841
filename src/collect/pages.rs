//! Page extraction: fetch every discovered link concurrently and pull out title, author and body.
//!
//! Workers share only read-only state (the profile, a URL -> order table, the collaborators).
//! Results travel back through the parallel iterator and are gathered into the map on the
//! calling thread, so no map is ever written concurrently.

use super::links::selected_text;
use super::{CollectError, FetchedPage, ImageDownloader, PageFetcher};
use crate::fragment::{parse_selector, Fragment};
use crate::model::{DiscoveredLink, ExtractedPage};
use crate::profile::Profile;
use rayon::prelude::*;
use reqwest::Url;
use scraper::Html;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Progress callback: (pages finished, pages total). Called from worker threads.
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Fetch and extract every link, at most `profile.parallelism` at a time.
///
/// Pages that fail to fetch, cannot be matched to a link, or have no content (with fallback
/// disabled) are logged and left out of the result. The map is keyed by document URL.
pub fn extract_pages<F, I>(
    links: &[DiscoveredLink],
    profile: &Profile,
    scratch_dir: &Path,
    fetcher: &F,
    images: &I,
    progress: Option<Progress<'_>>,
) -> HashMap<String, ExtractedPage>
where
    F: PageFetcher + Sync + ?Sized,
    I: ImageDownloader + Sync + ?Sized,
{
    info!(count = links.len(), parallelism = profile.parallelism, "processing discovered pages");
    let lookup: HashMap<&str, usize> = links.iter().map(|l| (l.url.as_str(), l.order)).collect();
    let total = links.len();
    let done = AtomicUsize::new(0);

    let run = || {
        links
            .par_iter()
            .filter_map(|link| {
                let result = fetcher.fetch(&link.url).and_then(|page| {
                    let order = lookup.get(page.url.as_str()).copied().ok_or_else(|| {
                        CollectError::UnknownPage {
                            url: page.url.clone(),
                        }
                    })?;
                    build_page(&page, order, profile, scratch_dir, images)
                });
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(p) = progress {
                    p(finished, total);
                }
                match result {
                    Ok(page) => Some((page.url.clone(), page)),
                    Err(e) => {
                        warn!(url = %link.url, error = %e, "page skipped");
                        None
                    }
                }
            })
            .collect::<Vec<(String, ExtractedPage)>>()
    };

    let results = match rayon::ThreadPoolBuilder::new()
        .num_threads(profile.parallelism.max(1))
        .thread_name(|i| format!("extract-{}", i))
        .build()
    {
        Ok(pool) => pool.install(run),
        Err(e) => {
            warn!(error = %e, "could not build worker pool; using the global pool");
            run()
        }
    };

    let pages: HashMap<String, ExtractedPage> = results.into_iter().collect();
    info!(extracted = pages.len(), discovered = total, "page extraction finished");
    pages
}

/// Apply the profile's author replacements (longest first) and trim.
pub fn clean_author(raw: &str, profile: &Profile) -> String {
    let mut author = raw.to_string();
    for (old, new) in profile.ordered_author_replacements() {
        author = author.replace(old, new);
    }
    author.trim().to_string()
}

/// Extract one fetched document. `order` is the matching link's discovery order.
pub fn build_page<I>(
    page: &FetchedPage,
    order: usize,
    profile: &Profile,
    scratch_dir: &Path,
    images: &I,
) -> Result<ExtractedPage, CollectError>
where
    I: ImageDownloader + ?Sized,
{
    let url = page.url.as_str();
    let doc = Html::parse_document(&page.body);

    let title_sel =
        parse_selector(&profile.title_selector).map_err(|e| CollectError::content(url, e))?;
    let title = Some(selected_text(&doc, &title_sel))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("Page {}", order + 1));

    let raw_author = match &profile.author_selector {
        Some(sel) => {
            let sel = parse_selector(sel).map_err(|e| CollectError::content(url, e))?;
            selected_text(&doc, &sel)
        }
        None => String::new(),
    };
    let author = if raw_author.is_empty() {
        profile.default_author.clone()
    } else {
        clean_author(&raw_author, profile)
    };

    let content_sel =
        parse_selector(&profile.content_selector).map_err(|e| CollectError::content(url, e))?;
    let mut body = match Fragment::from_matches(&doc, &content_sel) {
        Some(fragment) => fragment,
        None if profile.fallback_to_body => {
            warn!(%url, selector = %profile.content_selector, "content not found, falling back to body");
            let body_sel = parse_selector("body").map_err(|e| CollectError::content(url, e))?;
            Fragment::from_matches(&doc, &body_sel).unwrap_or_else(|| Fragment::new(""))
        }
        None => {
            return Err(CollectError::ExtractionSkip {
                url: url.to_string(),
                selector: profile.content_selector.clone(),
            })
        }
    };
    for sel in &profile.remove_selectors {
        body.remove_matching(sel)
            .map_err(|e| CollectError::content(url, e))?;
    }
    for sel in &profile.unwrap_selectors {
        body.unwrap_matching(sel)
            .map_err(|e| CollectError::content(url, e))?;
    }

    let text_len = body.text_len();
    let subsection = text_len >= profile.subsection_threshold;

    let base = Url::parse(url).ok();
    let mut local_images = Vec::new();
    let replaced = body
        .replace_images(|src| {
            let absolute = match &base {
                Some(b) => b.join(src.trim()),
                None => Url::parse(src.trim()),
            };
            let absolute = match absolute {
                Ok(u) => u,
                Err(e) => {
                    warn!(%src, error = %e, "image source is not a valid URL");
                    return None;
                }
            };
            match images.download(absolute.as_str(), scratch_dir) {
                Ok(path) => {
                    let local = path.to_string_lossy().into_owned();
                    local_images.push(path);
                    Some(local)
                }
                Err(e) => {
                    warn!(image = %absolute, error = %e, "image download failed; keeping original reference");
                    None
                }
            }
        })
        .map_err(|e| CollectError::content(url, e))?;

    debug!(%url, order, text_len, subsection, images = replaced, "extracted page");
    Ok(ExtractedPage {
        url: page.url.clone(),
        title,
        author,
        body,
        order,
        subsection,
        images: local_images,
    })
}

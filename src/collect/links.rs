//! Link discovery: one visit to the start page, producing the ordered content links.

use super::{parse_absolute_url, CollectError, PageFetcher};
use crate::fragment::parse_selector;
use crate::model::{DiscoveredLink, Discovery};
use crate::profile::{LinkRewrite, Profile};
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Visit `start_url` once and collect every content link in document order.
///
/// Fails only if the start URL is invalid or the single visit fails; individual links that are
/// unusable are skipped.
pub fn discover_links<F>(
    start_url: &str,
    profile: &Profile,
    same_host_only: bool,
    fetcher: &F,
) -> Result<Discovery, CollectError>
where
    F: PageFetcher + ?Sized,
{
    let start = parse_absolute_url(start_url)?;
    info!(url = %start, module = %profile.name, "discovering links");
    let page = fetcher.fetch(start.as_str())?;
    // Relative hrefs resolve against the page actually served (after redirects).
    let page_url = Url::parse(&page.url).unwrap_or_else(|_| start.clone());
    let discovery = parse_links(
        &page.body,
        &page_url,
        start.host_str().unwrap_or_default(),
        profile,
        same_host_only,
    )?;
    info!(count = discovery.links.len(), "links discovered");
    Ok(discovery)
}

/// Text of every element matching `selector`, concatenated and trimmed.
pub(crate) fn selected_text(document: &Html, selector: &Selector) -> String {
    document
        .select(selector)
        .flat_map(|e| e.text())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Apply rewrite rules in order. The flag is set only by a subsection rule that changed the URL.
pub fn apply_rewrites(url: &str, rules: &[LinkRewrite]) -> (String, bool) {
    let mut current = url.to_string();
    let mut subsection = false;
    for rule in rules {
        if rule.find.is_empty() {
            continue;
        }
        let next = current.replace(&rule.find, &rule.replace);
        if next != current {
            subsection |= rule.subsection;
            current = next;
        }
    }
    (current, subsection)
}

/// Extract the title and ordered links from an already fetched start page.
pub fn parse_links(
    html: &str,
    page_url: &Url,
    start_host: &str,
    profile: &Profile,
    same_host_only: bool,
) -> Result<Discovery, CollectError> {
    let doc = Html::parse_document(html);
    let title_sel =
        parse_selector(&profile.title_selector).map_err(|e| CollectError::content(page_url.as_str(), e))?;
    let link_sel =
        parse_selector(&profile.link_selector).map_err(|e| CollectError::content(page_url.as_str(), e))?;

    let title = Some(selected_text(&doc, &title_sel)).filter(|t| !t.is_empty());

    let mut links: Vec<DiscoveredLink> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for element in doc.select(&link_sel) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let resolved = match page_url.join(href.trim()) {
            Ok(u) => u,
            Err(e) => {
                debug!(%href, error = %e, "skipping unresolvable link");
                continue;
            }
        };
        if same_host_only && resolved.host_str() != Some(start_host) {
            debug!(url = %resolved, "skipping off-host link");
            continue;
        }
        let skip_ext = Path::new(resolved.path())
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| profile.skips_extension(ext));
        if skip_ext {
            debug!(url = %resolved, "skipping link by extension");
            continue;
        }
        let (url, subsection) = apply_rewrites(resolved.as_str(), &profile.link_rewrites);
        if let Some(filter) = profile.link_filter.as_deref().filter(|f| !f.is_empty()) {
            if url.contains(filter) {
                debug!(%url, %filter, "skipping filtered link");
                continue;
            }
        }
        if !seen.insert(url.clone()) {
            debug!(%url, "skipping repeated link");
            continue;
        }
        links.push(DiscoveredLink {
            url,
            order: links.len(),
            subsection,
        });
    }

    Ok(Discovery { title, links })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::testing::FakeFetcher;

    const START: &str = "https://www.example.org/study/scriptures/bofm?lang=eng";

    fn profile() -> Profile {
        Profile {
            name: "test".to_string(),
            link_selector: "a[href].list-tile".to_string(),
            ..Profile::default()
        }
    }

    fn toc_page(body: &str) -> String {
        format!(
            "<html><head><title>Book of Mormon</title></head><body>{}</body></html>",
            body
        )
    }

    #[test]
    fn discovers_links_in_document_order_with_contiguous_orders() -> Result<(), CollectError> {
        let html = toc_page(
            r#"<a class="list-tile" href="/study/scriptures/bofm/1-ne/1">1</a>
               <p><a class="other" href="/ignored">x</a></p>
               <a class="list-tile" href="2">2</a>
               <div><a class="list-tile" href="https://www.example.org/study/scriptures/bofm/1-ne/3">3</a></div>"#,
        );
        let fetcher = FakeFetcher::default().with_page(START, &html);
        let discovery = discover_links(START, &profile(), true, &fetcher)?;
        assert_eq!(discovery.title.as_deref(), Some("Book of Mormon"));
        let urls: Vec<&str> = discovery.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.example.org/study/scriptures/bofm/1-ne/1",
                "https://www.example.org/study/scriptures/2",
                "https://www.example.org/study/scriptures/bofm/1-ne/3",
            ]
        );
        let orders: Vec<usize> = discovery.links.iter().map(|l| l.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn skips_missing_href_off_host_and_skipped_extensions() -> Result<(), CollectError> {
        let html = toc_page(
            r#"<a class="list-tile">no href</a>
               <a class="list-tile" href="https://cdn.other.org/talk">off host</a>
               <a class="list-tile" href="/media/photo.JPG">image</a>
               <a class="list-tile" href="/talk/kept">kept</a>"#,
        );
        let fetcher = FakeFetcher::default().with_page(START, &html);
        let discovery = discover_links(START, &profile(), true, &fetcher)?;
        assert_eq!(discovery.links.len(), 1);
        assert_eq!(discovery.links[0].url, "https://www.example.org/talk/kept");
        assert_eq!(discovery.links[0].order, 0);

        let discovery = discover_links(START, &profile(), false, &fetcher)?;
        assert_eq!(discovery.links.len(), 2);
        assert_eq!(discovery.links[0].url, "https://cdn.other.org/talk");
        Ok(())
    }

    #[test]
    fn filter_applies_after_rewrites() -> Result<(), CollectError> {
        let mut p = profile();
        p.link_filter = Some("illustrations".to_string());
        p.link_rewrites = vec![LinkRewrite {
            find: "/pictures".to_string(),
            replace: "/illustrations".to_string(),
            subsection: false,
        }];
        let html = toc_page(
            r#"<a class="list-tile" href="/bofm/illustrations/1">a</a>
               <a class="list-tile" href="/bofm/pictures/2">b</a>
               <a class="list-tile" href="/bofm/1-ne">c</a>"#,
        );
        let fetcher = FakeFetcher::default().with_page(START, &html);
        let discovery = discover_links(START, &p, true, &fetcher)?;
        assert_eq!(discovery.links.len(), 1);
        assert!(discovery.links[0].url.ends_with("/bofm/1-ne"));
        assert!(discovery
            .links
            .iter()
            .all(|l| !l.url.contains("illustrations")));
        Ok(())
    }

    #[test]
    fn subsection_flag_requires_an_actual_change() {
        let rules = vec![
            LinkRewrite {
                find: "/_contents".to_string(),
                replace: String::new(),
                subsection: true,
            },
            LinkRewrite {
                find: "?lang=eng".to_string(),
                replace: String::new(),
                subsection: false,
            },
        ];
        let (url, sub) = apply_rewrites("https://x.org/bofm/1-ne/_contents?lang=eng", &rules);
        assert_eq!(url, "https://x.org/bofm/1-ne");
        assert!(sub);

        let (url, sub) = apply_rewrites("https://x.org/bofm/1-ne/2?lang=eng", &rules);
        assert_eq!(url, "https://x.org/bofm/1-ne/2");
        assert!(!sub);
    }

    #[test]
    fn repeated_links_keep_first_position() -> Result<(), CollectError> {
        let html = toc_page(
            r#"<a class="list-tile" href="/a">a</a>
               <a class="list-tile" href="/b">b</a>
               <a class="list-tile" href="/a">a again</a>"#,
        );
        let fetcher = FakeFetcher::default().with_page(START, &html);
        let discovery = discover_links(START, &profile(), true, &fetcher)?;
        let urls: Vec<&str> = discovery.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://www.example.org/a", "https://www.example.org/b"]
        );
        Ok(())
    }

    #[test]
    fn empty_title_is_none() -> Result<(), CollectError> {
        let html = "<html><head><title>  </title></head><body></body></html>";
        let fetcher = FakeFetcher::default().with_page(START, html);
        let discovery = discover_links(START, &profile(), true, &fetcher)?;
        assert!(discovery.title.is_none());
        assert!(discovery.links.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_start_url_and_failed_visit_are_errors() {
        let fetcher = FakeFetcher::default();
        assert!(matches!(
            discover_links("::nope", &profile(), true, &fetcher),
            Err(CollectError::InvalidUrl { .. })
        ));
        assert!(matches!(
            discover_links(START, &profile(), true, &fetcher),
            Err(CollectError::HttpStatus { status: 404, .. })
        ));
    }

    #[test]
    fn relative_links_resolve_against_redirected_page() -> Result<(), CollectError> {
        let html = toc_page(r#"<a class="list-tile" href="talk-1">t</a>"#);
        let fetcher = FakeFetcher::default()
            .with_page(START, &html)
            .with_redirect(START, "https://www.example.org/study/conference/2024/04/");
        let discovery = discover_links(START, &profile(), true, &fetcher)?;
        assert_eq!(
            discovery.links[0].url,
            "https://www.example.org/study/conference/2024/04/talk-1"
        );
        Ok(())
    }
}

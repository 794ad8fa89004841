//! Rich-content fragment: an owned HTML snippet with the handful of operations the pipeline needs.
//!
//! Queries go through `scraper`; mutations are streamed through `lol_html` so the fragment never
//! holds a mutable DOM. Nothing outside this module touches either library's node types.

use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;

/// Errors from fragment queries and rewrites.
#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("HTML rewrite failed: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),
}

/// An owned piece of HTML (the inner markup of one or more matched elements).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    html: String,
}

/// Parse a query selector without panicking.
pub fn parse_selector(sel: &str) -> Result<Selector, FragmentError> {
    Selector::parse(sel).map_err(|e| FragmentError::InvalidSelector {
        selector: sel.to_string(),
        reason: e.to_string(),
    })
}

/// Check a selector against the rewriter's grammar before handing it to `element!`.
fn check_rewrite_selector(sel: &str) -> Result<(), FragmentError> {
    sel.parse::<lol_html::Selector>()
        .map(|_| ())
        .map_err(|e| FragmentError::InvalidSelector {
            selector: sel.to_string(),
            reason: e.to_string(),
        })
}

/// Escape text or an attribute value with the five predefined XML entities.
pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Elements that never have content; written self-closed in XHTML.
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

fn write_xhtml_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&xml_escape(text)),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    write_xhtml_element(el, out);
                }
            }
            _ => {}
        }
    }
}

fn write_xhtml_element(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    out.push('<');
    out.push_str(name);
    let mut attrs: Vec<(&str, &str)> = element
        .value()
        .attrs()
        .filter(|(k, _)| is_xml_name(k))
        .collect();
    attrs.sort_unstable();
    for (k, v) in attrs {
        out.push_str(&format!(" {}=\"{}\"", k, xml_escape(v)));
    }
    if VOID_ELEMENTS.contains(&name) {
        out.push_str("/>");
        return;
    }
    out.push('>');
    write_xhtml_children(element, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

impl Fragment {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    /// Inner HTML of every element in `document` matching `selector`, concatenated in document
    /// order. `None` when nothing matches.
    pub fn from_matches(document: &Html, selector: &Selector) -> Option<Self> {
        let parts: Vec<String> = document.select(selector).map(|e| e.inner_html()).collect();
        if parts.is_empty() {
            None
        } else {
            Some(Self::new(parts.concat()))
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn into_html(self) -> String {
        self.html
    }

    /// All text nodes, markup stripped, whitespace preserved.
    pub fn text(&self) -> String {
        Html::parse_fragment(&self.html)
            .root_element()
            .text()
            .collect()
    }

    /// Well-formed XHTML for the fragment: void elements self-closed, entities reduced to the
    /// five XML ones (everything else is written as the literal character). Comments dropped.
    pub fn to_xhtml(&self) -> String {
        let doc = Html::parse_fragment(&self.html);
        let mut out = String::with_capacity(self.html.len());
        write_xhtml_children(doc.root_element(), &mut out);
        out
    }

    /// Visible text length in characters.
    pub fn text_len(&self) -> usize {
        self.text().chars().count()
    }

    /// Delete every element matching `selector`, descendants included.
    pub fn remove_matching(&mut self, selector: &str) -> Result<(), FragmentError> {
        check_rewrite_selector(selector)?;
        self.html = rewrite_str(
            &self.html,
            RewriteStrSettings {
                element_content_handlers: vec![element!(selector, |el| {
                    el.remove();
                    Ok(())
                })],
                ..RewriteStrSettings::new()
            },
        )?;
        Ok(())
    }

    /// Replace every element matching `selector` with its children.
    pub fn unwrap_matching(&mut self, selector: &str) -> Result<(), FragmentError> {
        check_rewrite_selector(selector)?;
        self.html = rewrite_str(
            &self.html,
            RewriteStrSettings {
                element_content_handlers: vec![element!(selector, |el| {
                    el.remove_and_keep_content();
                    Ok(())
                })],
                ..RewriteStrSettings::new()
            },
        )?;
        Ok(())
    }

    /// Wrap every element matching `selector` in `<tag>...</tag>`.
    pub fn wrap_matching(&mut self, selector: &str, tag: &str) -> Result<(), FragmentError> {
        check_rewrite_selector(selector)?;
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        self.html = rewrite_str(
            &self.html,
            RewriteStrSettings {
                element_content_handlers: vec![element!(selector, |el| {
                    el.before(&open, ContentType::Html);
                    el.after(&close, ContentType::Html);
                    Ok(())
                })],
                ..RewriteStrSettings::new()
            },
        )?;
        Ok(())
    }

    /// Offer each `<img src>` to `resolve`. When it returns a new source the element is replaced
    /// by a bare `<img src="..." alt=""/>`; when it returns `None` the element is left untouched.
    ///
    /// Images are visited one at a time in document order. Returns the number replaced.
    pub fn replace_images<F>(&mut self, mut resolve: F) -> Result<usize, FragmentError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut replaced = 0usize;
        self.html = rewrite_str(
            &self.html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("img[src]", |el| {
                    if let Some(src) = el.get_attribute("src") {
                        if let Some(new_src) = resolve(&src) {
                            el.replace(
                                &format!("<img src=\"{}\" alt=\"\"/>", xml_escape(&new_src)),
                                ContentType::Html,
                            );
                            replaced += 1;
                        }
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::new()
            },
        )?;
        Ok(replaced)
    }
}

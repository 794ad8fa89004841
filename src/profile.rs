//! Site profiles: the selectors and crawl policy for one family of sites.
//!
//! Built-in profiles are data in `profiles.toml` (embedded at compile time). The config file can
//! add more under `[profiles.<name>]`; those shadow built-ins with the same name. Nothing in the
//! pipeline branches on the profile name.

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

const BUILTIN_PROFILES: &str = include_str!("profiles.toml");

/// Extensions that never count as content pages unless a profile overrides the list.
const DEFAULT_SKIP_EXTENSIONS: [&str; 8] = [
    ".jpg", ".jpeg", ".png", ".gif", ".pdf", ".zip", ".mp3", ".mp4",
];

/// Errors resolving or validating a profile (fatal at startup).
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Unknown module: {name}. Available modules: {}", available.join(", "))]
    UnknownModule {
        name: String,
        available: Vec<String>,
    },

    #[error("Profile '{profile}' has an invalid selector {selector:?}: {reason}")]
    InvalidSelector {
        profile: String,
        selector: String,
        reason: String,
    },

    #[error("Profile '{profile}': {reason}")]
    Invalid { profile: String, reason: String },

    #[error("Built-in profile table is invalid: {0}")]
    BuiltinTable(#[from] toml::de::Error),
}

/// One literal URL rewrite applied during link discovery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkRewrite {
    pub find: String,
    #[serde(default)]
    pub replace: String,
    /// Links changed by this rule are flagged as subsections.
    #[serde(default)]
    pub subsection: bool,
}

/// Immutable per-site configuration consumed by discovery, extraction and assembly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Module identifier. Filled from the table key, never from the table body.
    #[serde(skip)]
    pub name: String,
    pub aliases: Vec<String>,

    pub link_selector: String,
    /// Links still containing this after rewriting are dropped.
    pub link_filter: Option<String>,
    pub link_rewrites: Vec<LinkRewrite>,

    pub title_selector: String,
    pub author_selector: Option<String>,
    pub content_selector: String,
    pub remove_selectors: Vec<String>,
    /// Elements replaced by their children (markup dropped, text kept).
    pub unwrap_selectors: Vec<String>,

    pub author_replacements: BTreeMap<String, String>,
    pub default_author: String,
    /// Creator written into the book metadata.
    pub book_author: String,

    /// Pages whose body text is shorter than this many characters start a new section.
    pub subsection_threshold: usize,
    pub fallback_to_body: bool,

    pub parallelism: usize,
    pub delay_secs: u64,
    pub skip_extensions: Vec<String>,
    pub css: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: String::new(),
            aliases: Vec::new(),
            link_selector: "a[href]".to_string(),
            link_filter: None,
            link_rewrites: Vec::new(),
            title_selector: "title".to_string(),
            author_selector: None,
            content_selector: "article".to_string(),
            remove_selectors: vec!["script".to_string(), "iframe".to_string()],
            unwrap_selectors: Vec::new(),
            author_replacements: BTreeMap::new(),
            default_author: String::new(),
            book_author: "Unknown".to_string(),
            subsection_threshold: 100,
            fallback_to_body: true,
            parallelism: 4,
            delay_secs: 3,
            skip_extensions: DEFAULT_SKIP_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            css: String::new(),
        }
    }
}

impl Profile {
    /// True if `name` (already lower-cased) identifies this profile.
    fn answers_to(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    /// True if a URL path with this extension (e.g. "PDF" or ".pdf") must not be crawled.
    pub fn skips_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.');
        if ext.is_empty() {
            return false;
        }
        self.skip_extensions
            .iter()
            .any(|s| s.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Author replacements in application order: longest `old` first, ties lexicographic.
    ///
    /// A fixed order keeps output stable when one entry is a substring of another.
    pub fn ordered_author_replacements(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .author_replacements
            .iter()
            .filter(|(old, _)| !old.is_empty())
            .map(|(old, new)| (old.as_str(), new.as_str()))
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        pairs
    }

    /// Check every selector against both the query engine and the rewriter, plus numeric limits.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let query_selectors = [
            Some(&self.link_selector),
            Some(&self.title_selector),
            self.author_selector.as_ref(),
            Some(&self.content_selector),
        ];
        for sel in query_selectors.into_iter().flatten() {
            scraper::Selector::parse(sel).map_err(|e| ProfileError::InvalidSelector {
                profile: self.name.clone(),
                selector: sel.clone(),
                reason: e.to_string(),
            })?;
        }
        for sel in self.remove_selectors.iter().chain(&self.unwrap_selectors) {
            sel.parse::<lol_html::Selector>()
                .map_err(|e| ProfileError::InvalidSelector {
                    profile: self.name.clone(),
                    selector: sel.clone(),
                    reason: e.to_string(),
                })?;
        }
        if self.parallelism == 0 {
            return Err(ProfileError::Invalid {
                profile: self.name.clone(),
                reason: "parallelism must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Built-in profiles keyed by name, in name order.
pub fn builtin_profiles() -> Result<BTreeMap<String, Profile>, ProfileError> {
    let table: BTreeMap<String, Profile> = toml::from_str(BUILTIN_PROFILES)?;
    Ok(name_profiles(table))
}

/// Copy each table key into the profile's `name`.
pub fn name_profiles(table: BTreeMap<String, Profile>) -> BTreeMap<String, Profile> {
    table
        .into_iter()
        .map(|(key, mut profile)| {
            profile.name = key.clone();
            (key, profile)
        })
        .collect()
}

/// Resolve a module name (case-insensitive, aliases allowed) to a validated profile.
///
/// `extra` holds config-file profiles. One with the same name as a built-in replaces it
/// entirely, aliases included.
pub fn resolve_profile(
    module: &str,
    extra: &BTreeMap<String, Profile>,
) -> Result<Profile, ProfileError> {
    let mut table = builtin_profiles()?;
    table.extend(extra.iter().map(|(k, p)| (k.clone(), p.clone())));
    let wanted = module.trim().to_lowercase();
    let found = table
        .values()
        .find(|p| p.name.eq_ignore_ascii_case(&wanted))
        .or_else(|| table.values().find(|p| p.answers_to(&wanted)));
    match found {
        Some(profile) => {
            profile.validate()?;
            Ok(profile.clone())
        }
        None => Err(ProfileError::UnknownModule {
            name: module.to_string(),
            available: table.keys().cloned().collect(),
        }),
    }
}

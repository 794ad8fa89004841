//! Optional config file loading. Search order: ./sitebinder.toml, then
//! $XDG_CONFIG_HOME/sitebinder/config.toml (or ~/.config/sitebinder/config.toml).

use crate::profile::{name_profiles, Profile};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Directory the EPUB is written to. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 1, no retry).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]).
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Module used when --module is not given.
    pub default_module: Option<String>,
    /// Extra site profiles, keyed by module name. Missing fields take profile defaults.
    pub profiles: BTreeMap<String, Profile>,
}

/// Parse config text. Profile names are taken from their table keys.
pub fn parse_config(s: &str) -> Result<Config, toml::de::Error> {
    let mut config: Config = toml::from_str(s)?;
    config.profiles = name_profiles(std::mem::take(&mut config.profiles));
    Ok(config)
}

/// Read and parse one config file.
pub fn load_config_at(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    parse_config(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}

/// Search order: (1) ./sitebinder.toml, (2) $XDG_CONFIG_HOME/sitebinder/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("sitebinder.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("sitebinder").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            tracing::debug!(path = %path.display(), "loading config");
            return load_config_at(path).map(Some);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c = parse_config("").unwrap();
        assert!(c.output_dir.is_none());
        assert!(c.user_agent.is_none());
        assert!(c.timeout_secs.is_none());
        assert!(c.retry_count.is_none());
        assert!(c.retry_backoff_secs.is_none());
        assert!(c.default_module.is_none());
        assert!(c.profiles.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            output_dir = "out"
            user_agent = "Custom/1.0"
            timeout_secs = 60
            retry_count = 3
            retry_backoff_secs = [1, 2]
            default_module = "scriptures"
        "#;
        let c = parse_config(s).unwrap();
        assert_eq!(c.output_dir.as_deref(), Some(Path::new("out")));
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.timeout_secs, Some(60));
        assert_eq!(c.retry_count, Some(3));
        assert_eq!(c.retry_backoff_secs.as_deref(), Some([1, 2].as_slice()));
        assert_eq!(c.default_module.as_deref(), Some("scriptures"));
    }

    #[test]
    fn profiles_take_names_from_keys_and_defaults_for_missing_fields() {
        let s = r#"
            [profiles.blog]
            link_selector = "a.post-link"
            content_selector = ".entry-content"
            parallelism = 2

            [profiles.blog.author_replacements]
            "Posted by" = ""
        "#;
        let c = parse_config(s).unwrap();
        let blog = &c.profiles["blog"];
        assert_eq!(blog.name, "blog");
        assert_eq!(blog.link_selector, "a.post-link");
        assert_eq!(blog.parallelism, 2);
        assert_eq!(blog.title_selector, Profile::default().title_selector);
        assert_eq!(blog.author_replacements.get("Posted by").map(String::as_str), Some(""));
    }

    #[test]
    fn load_config_at_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sitebinder.toml");
        std::fs::write(&path, "output_dir = [").unwrap();
        let err = load_config_at(&path).unwrap_err();
        assert!(err.starts_with("Invalid config"));
        assert!(err.contains("sitebinder.toml"));

        std::fs::write(&path, "timeout_secs = 5").unwrap();
        assert_eq!(load_config_at(&path).unwrap().timeout_secs, Some(5));
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(parse_config("output_dir = [").is_err());
        assert!(parse_config("[profiles.x]\nparallelism = \"many\"").is_err());
    }
}

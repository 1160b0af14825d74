//! Worker configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Origin, Url};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Cannot resolve {path:?} against the scope: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Precache manifest shipped with generation `v3` of the app shell.
pub const DEFAULT_PRECACHE: &[&str] = &[
    "./",
    "./index.html",
    "./manifest.webmanifest",
    "./icon-192-v2.png",
    "./icon-512-v2.png",
    // Older icon file names, still referenced by installed home-screen shortcuts.
    "./icon_192.png",
    "./icon_512.png",
];

/// Configuration of one worker generation.
///
/// Bumping `version` or editing `precache` is how a new generation ships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellCacheConfig {
    /// Store name prefix, shared by every generation.
    pub cache_prefix: String,

    /// Generation identifier appended to the prefix.
    pub version: String,

    /// URL the worker controls. Its origin is the app origin.
    pub scope: Url,

    /// Scope-relative paths that must be cached before the generation activates.
    pub precache: Vec<String>,

    /// Document served to navigations while offline.
    pub offline_fallback: String,

    /// Activate right after install instead of waiting for old clients to close.
    pub skip_waiting_on_install: bool,
}

impl Default for ShellCacheConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "jjs2025-cache-".to_string(),
            version: "v3".to_string(),
            scope: Url::parse("http://localhost:8080/").expect("static URL is valid"),
            precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            offline_fallback: "./index.html".to_string(),
            skip_waiting_on_install: true,
        }
    }
}

impl ShellCacheConfig {
    /// Default configuration for an app served at `scope`.
    pub fn for_scope(scope: Url) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    /// Set the generation identifier.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replace the precache manifest.
    pub fn with_precache<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.precache = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check that every path resolves and the generation is named.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid("version must not be empty".into()));
        }
        if self.scope.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!(
                "scope {} is not a hierarchical URL",
                self.scope
            )));
        }
        if !matches!(self.scope.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "scope {} must be http or https",
                self.scope
            )));
        }
        self.precache_urls()?;
        self.fallback_url()?;
        Ok(())
    }

    /// Name of this generation's store.
    pub fn cache_name(&self) -> String {
        format!("{}{}", self.cache_prefix, self.version)
    }

    /// The app's own origin.
    pub fn origin(&self) -> Origin {
        self.scope.origin()
    }

    /// Resolve a scope-relative path.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.scope
            .join(path)
            .map_err(|source| ConfigError::InvalidPath {
                path: path.to_string(),
                source,
            })
    }

    /// The precache manifest as absolute URLs, in manifest order.
    pub fn precache_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    /// Absolute URL of the offline navigation fallback.
    pub fn fallback_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.offline_fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ShellCacheConfig::default();
        assert_eq!(config.cache_name(), "jjs2025-cache-v3");
        assert_eq!(config.precache.len(), 7);
        assert!(config.skip_waiting_on_install);
        config.validate().unwrap();
    }

    #[test]
    fn test_paths_resolve_against_scope() {
        let config =
            ShellCacheConfig::for_scope(Url::parse("https://app.example/jjs2025/").unwrap());

        let urls = config.precache_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://app.example/jjs2025/");
        assert_eq!(urls[1].as_str(), "https://app.example/jjs2025/index.html");
        assert_eq!(
            config.fallback_url().unwrap().as_str(),
            "https://app.example/jjs2025/index.html"
        );
        assert_eq!(
            config.origin(),
            Url::parse("https://app.example/").unwrap().origin()
        );
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ShellCacheConfig::from_json_str(
            r#"{ "version": "v4", "scope": "https://app.example/", "precache": ["./", "./app.js"] }"#,
        )
        .unwrap();

        assert_eq!(config.cache_name(), "jjs2025-cache-v4");
        assert_eq!(config.precache, vec!["./", "./app.js"]);
        assert_eq!(config.offline_fallback, "./index.html");
    }

    #[test]
    fn test_rejects_empty_version() {
        let result = ShellCacheConfig::from_json_str(r#"{ "version": " " }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_opaque_scope() {
        let result = ShellCacheConfig::from_json_str(r#"{ "scope": "mailto:app@example.com" }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_json() {
        let result = ShellCacheConfig::from_json_str("{ version: }");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ShellCacheConfig::load("/nonexistent/shellcache.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}

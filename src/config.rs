//! Site configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. The user file is
//! sparse: stock defaults are serialized to a TOML table, the user's table is
//! merged on top, and the result is deserialized and validated. The resulting
//! [`SiteConfig`] is built once and only ever borrowed afterwards.
//!
//! ## Configuration Options
//!
//! ```toml
//! title = "The Incredible Rust"
//! description = "Learn Rust"
//! base_url = "https://example.github.io"
//! locales = ["en", "pt", "es"]
//! default_locale = "en"
//!
//! [[content.en]]
//! path = "_lessons"
//! collection = "lesson"
//!
//! [[content.pt]]
//! path = "_lessons_pt"
//! collection = "lesson"
//!
//! [collections.lesson]
//! url_segment = "lessons"
//! layout = "lesson"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Site configuration loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Site title (feed channel, `site.title` in templates).
    pub title: String,
    /// Site description (feed channel, `site.description`).
    pub description: String,
    /// Origin the site is published under, e.g. `https://example.org`.
    pub base_url: String,
    /// Subpath under the origin, e.g. `/repo` for a project page. Prefixed to
    /// every public URL; output paths are unaffected.
    pub base_path: String,
    /// Supported locale codes, in display order.
    pub locales: Vec<String>,
    /// Locale served from the site root (no URL prefix).
    pub default_locale: String,
    /// Content roots per locale.
    pub content: BTreeMap<String, Vec<ContentRoot>>,
    /// URL and layout settings per collection.
    pub collections: BTreeMap<String, CollectionConfig>,
    /// File extensions treated as content.
    pub content_extensions: Vec<String>,
    /// Paths skipped during discovery, relative to each content root.
    pub exclude: Vec<String>,
    /// Directory holding the layout set.
    pub layouts_dir: String,
    /// Layout used when neither the page nor its collection names one.
    pub default_layout: String,
    /// Longest allowed layout chain.
    pub max_layout_depth: usize,
    /// YAML file with per-locale translation tables.
    pub translations: String,
    /// Directory of YAML/JSON files exposed to layouts as `data.<stem>`.
    pub data_dir: String,
    /// Directories mirrored verbatim under the output root.
    pub static_dirs: Vec<String>,
    /// Single files copied to the output root.
    pub static_files: Vec<String>,
    /// Syndication feed settings.
    pub feed: FeedConfig,
    /// Emit `sitemap.xml`.
    pub sitemap: bool,
    /// Zero-byte marker telling the host not to post-process the output.
    pub marker_file: String,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        let mut content = BTreeMap::new();
        content.insert(
            "en".to_string(),
            vec![
                ContentRoot {
                    path: "_lessons".to_string(),
                    collection: "lesson".to_string(),
                },
                ContentRoot {
                    path: "_pages".to_string(),
                    collection: "page".to_string(),
                },
            ],
        );

        let mut collections = BTreeMap::new();
        collections.insert(
            "lesson".to_string(),
            CollectionConfig {
                url_segment: Some("lessons".to_string()),
                layout: None,
            },
        );
        collections.insert(
            "page".to_string(),
            CollectionConfig {
                url_segment: Some(String::new()),
                layout: None,
            },
        );

        Self {
            title: "Lessons".to_string(),
            description: String::new(),
            base_url: "http://localhost:8000".to_string(),
            base_path: String::new(),
            locales: vec!["en".to_string()],
            default_locale: "en".to_string(),
            content,
            collections,
            content_extensions: vec!["md".to_string(), "markdown".to_string(), "html".to_string()],
            exclude: Vec::new(),
            layouts_dir: "_layouts".to_string(),
            default_layout: "default".to_string(),
            max_layout_depth: 8,
            translations: "_data/translations.yml".to_string(),
            data_dir: "_data".to_string(),
            static_dirs: vec!["assets".to_string()],
            static_files: Vec::new(),
            feed: FeedConfig::default(),
            sitemap: true,
            marker_file: ".nojekyll".to_string(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl SiteConfig {
    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locales.is_empty() {
            return Err(ConfigError::Validation("locales must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for locale in &self.locales {
            if locale.is_empty() || locale.contains('/') || locale.starts_with('.') {
                return Err(ConfigError::Validation(format!(
                    "invalid locale code {locale:?}"
                )));
            }
            if !seen.insert(locale.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "locale {locale:?} listed twice"
                )));
            }
        }
        if !self.is_locale(&self.default_locale) {
            return Err(ConfigError::Validation(format!(
                "default_locale {:?} is not in locales",
                self.default_locale
            )));
        }
        for (locale, roots) in &self.content {
            if !self.is_locale(locale) {
                return Err(ConfigError::Validation(format!(
                    "content configured for unknown locale {locale:?}"
                )));
            }
            if let Some(root) = roots.iter().find(|r| r.collection.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "content root {:?} has an empty collection name",
                    root.path
                )));
            }
        }
        if self.max_layout_depth == 0 {
            return Err(ConfigError::Validation(
                "max_layout_depth must be at least 1".into(),
            ));
        }
        if self.feed.enabled && self.feed.limit == 0 {
            return Err(ConfigError::Validation("feed.limit must be non-zero".into()));
        }
        if self.base_path.contains("://") || self.base_path.split('/').any(|s| s == "..") {
            return Err(ConfigError::Validation(format!(
                "base_path {:?} must be a plain URL path such as \"/repo\"",
                self.base_path
            )));
        }
        if self.marker_file.is_empty() || self.marker_file.contains('/') {
            return Err(ConfigError::Validation(
                "marker_file must be a plain file name".into(),
            ));
        }
        Ok(())
    }

    pub fn is_locale(&self, code: &str) -> bool {
        self.locales.iter().any(|l| l == code)
    }

    pub fn is_default_locale(&self, code: &str) -> bool {
        self.default_locale == code
    }

    /// Content roots of a locale; empty if none are configured.
    pub fn roots_for(&self, locale: &str) -> &[ContentRoot] {
        self.content.get(locale).map(Vec::as_slice).unwrap_or(&[])
    }

    /// URL segment of a collection: the configured one, else the name itself.
    pub fn url_segment<'a>(&'a self, collection: &'a str) -> &'a str {
        self.collections
            .get(collection)
            .and_then(|c| c.url_segment.as_deref())
            .unwrap_or(collection)
    }

    /// Layout for pages of a collection that do not name one themselves.
    pub fn layout_for(&self, collection: &str) -> &str {
        self.collections
            .get(collection)
            .and_then(|c| c.layout.as_deref())
            .unwrap_or(&self.default_layout)
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// `base_path` normalized to `""` or `/segment[/segment…]`.
    pub fn base_path(&self) -> String {
        let trimmed = self.base_path.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Public URL for a site-relative path starting with `/`.
    pub fn site_url(&self, path: &str) -> String {
        format!("{}{}", self.base_path(), path)
    }

    /// URL of a locale's home page.
    pub fn locale_home(&self, locale: &str) -> String {
        if self.is_default_locale(locale) {
            self.site_url("/")
        } else {
            self.site_url(&format!("/{locale}/"))
        }
    }
}

/// A directory of content files belonging to one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentRoot {
    /// Directory relative to the source root.
    pub path: String,
    /// Collection every file under this root belongs to.
    pub collection: String,
}

/// Per-collection routing and layout settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionConfig {
    /// URL segment; empty places the collection at the locale root.
    pub url_segment: Option<String>,
    /// Layout for pages without a `layout` key.
    pub layout: Option<String>,
}

/// Syndication feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    pub enabled: bool,
    /// Collection the feed lists (default locale only).
    pub collection: String,
    /// Maximum number of items.
    pub limit: usize,
    /// Output path relative to the output root.
    pub path: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collection: "lesson".to_string(),
            limit: 20,
            path: "feed.xml".to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of worker threads.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(SiteConfig::default())
        .map_err(|e| ConfigError::Validation(format!("stock defaults do not serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
///
/// `content` is replaced as a whole when the overlay sets it: content roots
/// are a site layout, not a set of defaults to extend.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => {
            let mut base = base;
            if ov.get("content").is_some()
                && let toml::Value::Table(table) = &mut base
            {
                table.remove("content");
            }
            merge_toml(base, ov)
        }
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load a config file over the stock defaults.
///
/// A missing file yields the validated stock defaults.
pub fn load_config_file(path: &Path) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = if path.exists() {
        let content = fs::read_to_string(path)?;
        Some(toml::from_str::<toml::Value>(&content)?)
    } else {
        None
    };
    resolve_config(base, overlay)
}

/// Load `config.toml` from the given source directory.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    load_config_file(&root.join("config.toml"))
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# babelpress configuration
# ========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

title = "Lessons"
description = ""

# Origin of the published site, used for feed and sitemap links.
base_url = "http://localhost:8000"

# Subpath the site is served under ("/repo" for a project page). Every page
# URL starts with it; layouts can apply it to literal paths with the
# `relative_url` and `absolute_url` filters.
base_path = ""

# Supported locales, in the order they appear in language switchers.
locales = ["en"]

# Locale served from the site root. Every other locale lives under /<code>/.
default_locale = "en"

# File extensions treated as content. `.html` files skip markdown conversion.
content_extensions = ["md", "markdown", "html"]

# Paths skipped inside content roots (prefix or path component match).
exclude = []

# Layout set and the layout used when nothing else names one.
layouts_dir = "_layouts"
default_layout = "default"

# Longest allowed extends-chain; deeper chains are reported as cycles.
max_layout_depth = 8

# YAML file mapping locale codes to translation tables.
translations = "_data/translations.yml"

# YAML (.yml, .yaml) and JSON files here are available as data.<file stem>.
data_dir = "_data"

# Static assets: directories are mirrored, files land at the output root.
static_dirs = ["assets"]
static_files = []

# Emit sitemap.xml.
sitemap = true

# Zero-byte file telling the host not to post-process the output.
marker_file = ".nojekyll"

# ---------------------------------------------------------------------------
# Content roots, per locale
# ---------------------------------------------------------------------------
[[content.en]]
path = "_lessons"
collection = "lesson"

[[content.en]]
path = "_pages"
collection = "page"

# ---------------------------------------------------------------------------
# Collections
# ---------------------------------------------------------------------------
# url_segment: path segment under the locale prefix ("" = locale root).
# Collections without an entry use their name as the segment.
# layout: layout for pages that do not set one.
[collections.lesson]
url_segment = "lessons"

[collections.page]
url_segment = ""

# ---------------------------------------------------------------------------
# Syndication feed (default locale only)
# ---------------------------------------------------------------------------
[feed]
enabled = true
collection = "lesson"
limit = 20
path = "feed.xml"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum worker threads. Omit to use every CPU core.
# max_processes = 4
"##
}

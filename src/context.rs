//! Render context construction.
//!
//! Builds the value tree a layout sees for one page. Site-wide parts (the
//! `site` table, per-locale collection listings, the cross-locale index) are
//! computed once in [`SiteContext::new`]; [`SiteContext::page_context`] only
//! adds what is specific to the page.
//!
//! ## Keys
//!
//! | Key | Contents |
//! |-----|----------|
//! | `site` | title, description, base_url, base_path, default_locale, locales |
//! | `data.<stem>` | contents of each YAML/JSON file in `data_dir` |
//! | `t` | translation table of the page's locale |
//! | `page` | every front matter key, then title, slug, url, absolute_url, locale, collection, source, date |
//! | `locale`, `is_default_locale` | active locale |
//! | `content` | body HTML |
//! | `prev`, `next` | `{ title, url }` when the page has neighbours |
//! | `alternates` | `{ locale, url, current, found }` per configured locale |
//! | `collections.<name>` | `{ title, url, slug }` of every page of the collection in this locale |
//! | `nav.pager`, `nav.languages` | ready-made HTML |
//!
//! Every URL in the context already carries the site's `base_path`.

use crate::config::SiteConfig;
use crate::template::Value;
use crate::types::{MetaValue, Page, Route};
use maud::{Markup, html};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Failure to load translation tables or site data files.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to list data directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid translations file {path}: {message}")]
    Shape { path: PathBuf, message: String },
}

/// Per-locale translation tables, e.g.
///
/// ```yaml
/// en:
///   nav: { previous: Previous, next: Next }
/// pt:
///   nav: { previous: Anterior, next: Próximo }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Translations {
    tables: BTreeMap<String, Value>,
}

impl Translations {
    /// Load translation tables. A missing file gives empty tables.
    pub fn load(path: &Path, config: &SiteConfig) -> Result<Self, DataError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "translations file not found, using empty tables");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let translations = Self::parse(&text, path)?;
        for locale in &config.locales {
            if !translations.tables.contains_key(locale) {
                tracing::warn!(%locale, "no translation table for locale");
            }
        }
        Ok(translations)
    }

    /// Parse the YAML text of a translations file. `path` is only used in errors.
    pub fn parse(text: &str, path: &Path) -> Result<Self, DataError> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|source| DataError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        let shape_error = |message: String| DataError::Shape {
            path: path.to_path_buf(),
            message,
        };

        let mapping = match doc {
            serde_yaml::Value::Mapping(mapping) => mapping,
            serde_yaml::Value::Null => return Ok(Self::default()),
            _ => return Err(shape_error("expected a mapping of locale codes".into())),
        };

        let mut tables = BTreeMap::new();
        for (locale, table) in mapping {
            let serde_yaml::Value::String(locale) = locale else {
                return Err(shape_error(format!("locale key {locale:?} is not a string")));
            };
            let table = yaml_to_value(&table);
            if !matches!(table, Value::Map(_)) {
                return Err(shape_error(format!("table for `{locale}` is not a mapping")));
            }
            tables.insert(locale, table);
        }
        Ok(Self { tables })
    }

    /// Table for a locale; empty when none is defined.
    pub fn table(&self, locale: &str) -> Value {
        self.tables.get(locale).cloned().unwrap_or_else(Value::map)
    }

    /// Single string lookup by dotted key.
    pub fn get(&self, locale: &str, key: &str) -> Option<&str> {
        match self.tables.get(locale)?.lookup(key)? {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Convert arbitrary YAML into a context value. Scalars become text.
pub fn yaml_to_value(value: &serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Text(String::new()),
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => Value::Text(n.to_string()),
        serde_yaml::Value::String(s) => Value::Text(s.clone()),
        serde_yaml::Value::Sequence(items) => Value::List(items.iter().map(yaml_to_value).collect()),
        serde_yaml::Value::Mapping(mapping) => Value::Map(
            mapping
                .iter()
                .filter_map(|(k, v)| {
                    let key = match k {
                        serde_yaml::Value::String(s) => s.clone(),
                        serde_yaml::Value::Number(n) => n.to_string(),
                        serde_yaml::Value::Bool(b) => b.to_string(),
                        _ => return None,
                    };
                    Some((key, yaml_to_value(v)))
                })
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_value(&tagged.value),
    }
}

/// Convert JSON into a context value. Scalars become text; null is empty.
pub fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Text(String::new()),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Text(n.to_string()),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(object) => Value::Map(
            object
                .iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        ),
    }
}

/// Load every `.yml`, `.yaml` and `.json` file directly inside `dir` into a
/// map keyed by file stem. A missing directory gives an empty map.
///
/// Files are read in name order; when two share a stem the later one wins.
pub fn load_data_dir(dir: &Path) -> Result<Value, DataError> {
    let mut data = Value::map();
    if !dir.is_dir() {
        tracing::debug!(path = %dir.display(), "no data directory");
        return Ok(data);
    }

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| DataError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let read = || {
            fs::read_to_string(path).map_err(|source| DataError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        let value = match extension.as_str() {
            "yml" | "yaml" => {
                let doc: serde_yaml::Value =
                    serde_yaml::from_str(&read()?).map_err(|source| DataError::Yaml {
                        path: path.to_path_buf(),
                        source,
                    })?;
                yaml_to_value(&doc)
            }
            "json" => {
                let doc: serde_json::Value =
                    serde_json::from_str(&read()?).map_err(|source| DataError::Json {
                        path: path.to_path_buf(),
                        source,
                    })?;
                json_to_value(&doc)
            }
            _ => continue,
        };
        if data.get(&stem).is_some() {
            tracing::warn!(path = %path.display(), key = %stem, "data file replaces an earlier file with the same name");
        }
        data.set(stem, value);
    }
    tracing::debug!(path = %dir.display(), "loaded site data");
    Ok(data)
}

fn meta_to_value(value: &MetaValue) -> Value {
    match value {
        MetaValue::Text(s) => Value::Text(s.clone()),
        MetaValue::List(items) => Value::List(items.iter().cloned().map(Value::Text).collect()),
        MetaValue::Opaque(yaml) => yaml_to_value(yaml),
    }
}

fn link(title: &str, url: &str) -> Value {
    let mut value = Value::map();
    value.set("title", title);
    value.set("url", url);
    value
}

/// One entry of the language switcher.
struct Alternate<'a> {
    locale: &'a str,
    url: String,
    current: bool,
    found: bool,
}

/// Site-wide context shared by every page of a build.
pub struct SiteContext<'a> {
    config: &'a SiteConfig,
    pages: &'a [Page],
    routes: &'a [Route],
    translations: &'a Translations,
    site: Value,
    /// `data` context key, shared by every page.
    data: Value,
    /// `(locale, collection, translation key)` → page index.
    by_key: HashMap<(&'a str, &'a str, &'a str), usize>,
    /// locale → `collections` value.
    collections: HashMap<&'a str, Value>,
}

impl<'a> SiteContext<'a> {
    /// `pages` and `routes` are parallel slices.
    pub fn new(
        config: &'a SiteConfig,
        pages: &'a [Page],
        routes: &'a [Route],
        translations: &'a Translations,
    ) -> Self {
        let mut site = Value::map();
        site.set("title", config.title.as_str());
        site.set("description", config.description.as_str());
        site.set("base_url", config.base_url());
        site.set("base_path", config.base_path());
        site.set("default_locale", config.default_locale.as_str());
        site.set(
            "locales",
            config
                .locales
                .iter()
                .map(|l| Value::Text(l.clone()))
                .collect::<Vec<_>>(),
        );

        let mut by_key = HashMap::new();
        let mut listings: HashMap<&str, BTreeMap<String, Vec<Value>>> = HashMap::new();
        for (idx, (page, route)) in pages.iter().zip(routes).enumerate() {
            by_key
                .entry((
                    page.locale.as_str(),
                    page.collection.as_str(),
                    page.translation_key(),
                ))
                .or_insert(idx);

            if page.is_index() {
                continue;
            }
            let mut entry = link(&page.title, &route.public_url);
            entry.set("slug", page.slug.as_str());
            listings
                .entry(page.locale.as_str())
                .or_default()
                .entry(page.collection.clone())
                .or_default()
                .push(entry);
        }
        let collections = listings
            .into_iter()
            .map(|(locale, lists)| {
                let map = lists
                    .into_iter()
                    .map(|(name, items)| (name, Value::List(items)))
                    .collect();
                (locale, Value::Map(map))
            })
            .collect();

        Self {
            config,
            pages,
            routes,
            translations,
            site,
            data: Value::map(),
            by_key,
            collections,
        }
    }

    /// Attach site data loaded by [`load_data_dir`].
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Build the full context for the page at `idx`.
    pub fn page_context(&self, idx: usize) -> Value {
        let page = &self.pages[idx];
        let route = &self.routes[idx];
        let locale = page.locale.as_str();

        let mut ctx = Value::map();
        ctx.set("site", self.site.clone());
        ctx.set("data", self.data.clone());
        ctx.set("t", self.translations.table(locale));
        ctx.set("page", self.page_value(page, route));
        ctx.set("locale", locale);
        ctx.set("is_default_locale", self.config.is_default_locale(locale));
        ctx.set("content", Value::Html(page.body_html.clone()));
        ctx.set(
            "collections",
            self.collections.get(locale).cloned().unwrap_or_else(Value::map),
        );

        let prev = page.adjacent.and_then(|a| a.prev);
        let next = page.adjacent.and_then(|a| a.next);
        if let Some(p) = prev {
            ctx.set("prev", link(&self.pages[p].title, &self.routes[p].public_url));
        }
        if let Some(n) = next {
            ctx.set("next", link(&self.pages[n].title, &self.routes[n].public_url));
        }

        let alternates = self.alternates(page);
        ctx.set(
            "alternates",
            alternates
                .iter()
                .map(|alt| {
                    let mut v = Value::map();
                    v.set("locale", alt.locale);
                    v.set("url", alt.url.as_str());
                    v.set("current", alt.current);
                    v.set("found", alt.found);
                    v
                })
                .collect::<Vec<_>>(),
        );

        let mut nav = Value::map();
        nav.set("pager", self.render_pager(locale, prev, next));
        nav.set("languages", render_languages(&alternates));
        ctx.set("nav", nav);
        ctx
    }

    fn page_value(&self, page: &Page, route: &Route) -> Value {
        let mut value = Value::map();
        for (key, meta) in page.metadata.iter() {
            value.set(key, meta_to_value(meta));
        }
        value.set("title", page.title.as_str());
        value.set("slug", page.slug.as_str());
        value.set("url", route.public_url.as_str());
        value.set(
            "absolute_url",
            format!("{}{}", self.config.base_url(), route.public_url),
        );
        value.set("locale", page.locale.as_str());
        value.set("collection", page.collection.as_str());
        value.set("source", page.source.to_string_lossy().into_owned());
        value.set(
            "date",
            page.date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        );
        value
    }

    /// The same page in every configured locale, or that locale's home.
    fn alternates(&self, page: &Page) -> Vec<Alternate<'a>> {
        let config: &'a SiteConfig = self.config;
        config
            .locales
            .iter()
            .map(|locale| {
                let current = *locale == page.locale;
                let found = self
                    .by_key
                    .get(&(
                        locale.as_str(),
                        page.collection.as_str(),
                        page.translation_key(),
                    ))
                    .or_else(|| {
                        self.by_key.get(&(
                            locale.as_str(),
                            page.collection.as_str(),
                            page.slug.as_str(),
                        ))
                    });
                let url = match found {
                    Some(&idx) => self.routes[idx].public_url.clone(),
                    None => self.config.locale_home(locale),
                };
                Alternate {
                    locale,
                    url,
                    current,
                    found: found.is_some(),
                }
            })
            .collect()
    }

    fn render_pager(&self, locale: &str, prev: Option<usize>, next: Option<usize>) -> Value {
        if prev.is_none() && next.is_none() {
            return Value::Html(String::new());
        }
        let previous_label = self
            .translations
            .get(locale, "nav.previous")
            .unwrap_or("Previous");
        let next_label = self.translations.get(locale, "nav.next").unwrap_or("Next");

        let markup: Markup = html! {
            nav.pager {
                @if let Some(p) = prev {
                    a.pager-prev href=(self.routes[p].public_url) rel="prev" {
                        span.pager-label { (previous_label) }
                        " "
                        span.pager-title { (self.pages[p].title) }
                    }
                }
                @if let Some(n) = next {
                    a.pager-next href=(self.routes[n].public_url) rel="next" {
                        span.pager-label { (next_label) }
                        " "
                        span.pager-title { (self.pages[n].title) }
                    }
                }
            }
        };
        markup.into()
    }
}

/// Language switcher. Empty for single-locale sites.
fn render_languages(alternates: &[Alternate<'_>]) -> Value {
    if alternates.len() < 2 {
        return Value::Html(String::new());
    }
    let markup: Markup = html! {
        ul.languages {
            @for alt in alternates {
                li class=[alt.current.then_some("current")] {
                    a href=(alt.url) hreflang=(alt.locale) lang=(alt.locale) {
                        (alt.locale)
                    }
                }
            }
        }
    };
    markup.into()
}

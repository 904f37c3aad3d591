//! Shared types used across all pipeline stages.
//!
//! A [`Page`] is produced by the content builder, a [`Route`] by the router,
//! and both are read by the renderer and the assembler. Neither is mutated
//! once routing has run.

use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;

/// A single front matter value.
///
/// Scalars (strings, numbers, booleans) are kept as text, sequences of scalars
/// as string lists. Anything else is carried through untouched so templates
/// can still reach into it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Text(String),
    List(Vec<String>),
    Opaque(serde_yaml::Value),
}

impl MetaValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered front matter mapping. Keys keep their source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    entries: Vec<(String, MetaValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: MetaValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Previous/next neighbours within a page's collection, as indices into the
/// page set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Adjacent {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// One content file, parsed and converted.
#[derive(Debug, Clone)]
pub struct Page {
    /// Path of the source file, as discovered.
    pub source: PathBuf,
    pub locale: String,
    pub collection: String,
    /// URL slug, already normalized.
    pub slug: String,
    /// Title from metadata, first `# heading`, or the file stem.
    pub title: String,
    pub metadata: Metadata,
    /// Body converted to HTML.
    pub body_html: String,
    /// Explicit `order` from metadata.
    pub order: Option<i64>,
    pub date: Option<NaiveDate>,
    /// Neighbours in collection order; `None` for pages outside any chain.
    pub adjacent: Option<Adjacent>,
}

impl Page {
    /// Key used to find the same page in other locales: `ref` metadata or the slug.
    pub fn translation_key(&self) -> &str {
        self.metadata.text("ref").unwrap_or(&self.slug)
    }

    /// Landing pages (`index`) route to their collection root and stay out of
    /// prev/next chains.
    pub fn is_index(&self) -> bool {
        self.slug == "index"
    }
}

/// Computed location of a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Route {
    /// Path relative to the output root, always ending in `index.html`.
    pub output_path: PathBuf,
    /// Site-relative URL with leading and trailing slash.
    pub public_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_keeps_insertion_order() {
        let mut meta = Metadata::new();
        meta.insert("zeta", MetaValue::Text("1".into()));
        meta.insert("alpha", MetaValue::Text("2".into()));
        meta.insert("mid", MetaValue::List(vec!["a".into()]));

        let keys: Vec<&str> = meta.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn metadata_replace_keeps_position() {
        let mut meta = Metadata::new();
        meta.insert("a", MetaValue::Text("1".into()));
        meta.insert("b", MetaValue::Text("2".into()));
        meta.insert("a", MetaValue::Text("3".into()));

        assert_eq!(meta.len(), 2);
        assert_eq!(meta.text("a"), Some("3"));
        assert_eq!(meta.keys().next(), Some("a"));
    }

    #[test]
    fn text_accessor_ignores_lists() {
        let mut meta = Metadata::new();
        meta.insert("tags", MetaValue::List(vec!["rust".into()]));
        assert_eq!(meta.text("tags"), None);
        assert!(meta.get("tags").is_some());
    }
}

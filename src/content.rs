//! Content model building.
//!
//! Stage 2 of the build pipeline. Turns one discovered file into a [`Page`]:
//!
//! ```text
//! ---                       ← front matter opens on the very first line
//! title: Hello, World!
//! order: 1
//! tags: [basics, cli]
//! ---                       ← closes with `---` or `...`
//! # Hello                   ← body, converted to HTML
//! ```
//!
//! Front matter is YAML. Well-known keys are type-checked; every other key is
//! kept, in source order, as a [`MetaValue`]. A file without front matter is
//! valid and simply has no metadata.
//!
//! Body conversion goes through the [`MarkupConverter`] trait so the builder
//! stays a pure function of its input.

use crate::types::{Adjacent, MetaValue, Metadata, Page};
use chrono::{DateTime, NaiveDate};
use pulldown_cmark::{Options, Parser, html as md_html};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Front matter that is present but cannot be used.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{path}:{line}:{column}: malformed front matter: {message}")]
pub struct FrontMatterError {
    pub path: PathBuf,
    /// 1-based line in the source file.
    pub line: usize,
    /// 1-based column in the source file.
    pub column: usize,
    pub message: String,
}

/// Converts body markup to an HTML fragment. Must be pure.
pub trait MarkupConverter: Send + Sync {
    fn to_html(&self, source: &str) -> String;
}

/// CommonMark with the GitHub-flavoured extensions lessons rely on.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownConverter;

impl MarkupConverter for MarkdownConverter {
    fn to_html(&self, source: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        let parser = Parser::new_ext(source, options);
        let mut html = String::new();
        md_html::push_html(&mut html, parser);
        html
    }
}

/// Hands HTML bodies through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughConverter;

impl MarkupConverter for PassthroughConverter {
    fn to_html(&self, source: &str) -> String {
        source.to_string()
    }
}

/// Pick the converter for a file extension.
pub fn converter_for(extension: &str) -> &'static dyn MarkupConverter {
    if extension.eq_ignore_ascii_case("html") || extension.eq_ignore_ascii_case("htm") {
        &PassthroughConverter
    } else {
        &MarkdownConverter
    }
}

/// Front matter split from the body.
#[derive(Debug, PartialEq)]
pub struct Split<'a> {
    /// Raw YAML between the markers; `None` when the file has no front matter.
    pub front_matter: Option<&'a str>,
    /// 1-based line the YAML starts on.
    pub front_matter_line: usize,
    pub body: &'a str,
}

/// Split a file into front matter and body.
///
/// Returns `Err((line, message))` when the opening marker is not closed.
pub fn split_front_matter(text: &str) -> Result<Split<'_>, (usize, String)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let Some(after_open) = strip_marker_line(text, "---") else {
        return Ok(Split {
            front_matter: None,
            front_matter_line: 0,
            body: text,
        });
    };

    let mut offset = 0;
    for line in after_open.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']).trim_end();
        if trimmed == "---" || trimmed == "..." {
            return Ok(Split {
                front_matter: Some(&after_open[..offset]),
                front_matter_line: 2,
                body: &after_open[offset + line.len()..],
            });
        }
        offset += line.len();
    }
    Err((1, "front matter is not closed with `---`".to_string()))
}

/// If `text` starts with a line holding exactly `marker`, return the rest.
fn strip_marker_line<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(marker)?;
    let rest_trimmed = rest.trim_start_matches([' ', '\t']);
    if let Some(after) = rest_trimmed.strip_prefix("\r\n") {
        Some(after)
    } else if let Some(after) = rest_trimmed.strip_prefix('\n') {
        Some(after)
    } else if rest_trimmed.is_empty() {
        Some(rest_trimmed)
    } else {
        None
    }
}

/// Parse the YAML block into ordered metadata.
fn parse_metadata(
    yaml: &str,
    first_line: usize,
    path: &Path,
) -> Result<Metadata, FrontMatterError> {
    let error_at = |line: usize, column: usize, message: String| FrontMatterError {
        path: path.to_path_buf(),
        line,
        column,
        message,
    };

    if yaml.trim().is_empty() {
        return Ok(Metadata::new());
    }

    let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(|e| {
        let (line, column) = e
            .location()
            .map(|loc| (first_line + loc.line().saturating_sub(1), loc.column()))
            .unwrap_or((first_line, 1));
        error_at(line, column.max(1), e.to_string())
    })?;

    let mapping = match value {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => return Ok(Metadata::new()),
        _ => {
            return Err(error_at(
                first_line,
                1,
                "front matter must be a mapping of keys to values".to_string(),
            ));
        }
    };

    let mut metadata = Metadata::new();
    for (key, value) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => {
                return Err(error_at(
                    first_line,
                    1,
                    format!("unsupported key {other:?}"),
                ));
            }
        };
        metadata.insert(key, to_meta_value(value));
    }
    Ok(metadata)
}

fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_meta_value(value: serde_yaml::Value) -> MetaValue {
    if let Some(text) = scalar_text(&value) {
        return MetaValue::Text(text);
    }
    if let serde_yaml::Value::Sequence(items) = &value {
        let texts: Option<Vec<String>> = items.iter().map(scalar_text).collect();
        if let Some(texts) = texts {
            return MetaValue::List(texts);
        }
    }
    MetaValue::Opaque(value)
}

/// Well-known fields, checked after parsing.
struct KnownFields {
    title: Option<String>,
    slug: Option<String>,
    order: Option<i64>,
    date: Option<NaiveDate>,
    published: bool,
}

/// Typed checks of the well-known keys. Errors name the offending key.
fn check_known_fields(metadata: &Metadata) -> Result<KnownFields, (&'static str, String)> {
    for key in ["title", "slug", "layout", "permalink", "ref", "description"] {
        match metadata.get(key) {
            None | Some(MetaValue::Text(_)) => {}
            Some(_) => return Err((key, format!("`{key}` must be a single value"))),
        }
    }

    let order = match metadata.get("order") {
        None => None,
        Some(MetaValue::Text(s)) => Some(s.trim().parse::<i64>().map_err(|_| {
            ("order", format!("`order` must be an integer, got {s:?}"))
        })?),
        Some(_) => return Err(("order", "`order` must be an integer".to_string())),
    };

    let date = match metadata.get("date") {
        None => None,
        Some(MetaValue::Text(s)) => Some(parse_date(s).map_err(|m| ("date", m))?),
        Some(_) => return Err(("date", "`date` must be a single value".to_string())),
    };

    let published = match metadata.get("published") {
        None => true,
        Some(MetaValue::Text(s)) if s == "true" => true,
        Some(MetaValue::Text(s)) if s == "false" => false,
        Some(_) => {
            return Err(("published", "`published` must be true or false".to_string()));
        }
    };

    let slug = match metadata.text("slug") {
        Some(raw) => {
            let normalized = slugify(raw);
            if normalized.is_empty() {
                return Err(("slug", format!("`slug` {raw:?} has no usable characters")));
            }
            Some(normalized)
        }
        None => None,
    };

    Ok(KnownFields {
        title: metadata.text("title").map(str::to_string),
        slug,
        order,
        date,
        published,
    })
}

/// 1-based file line of the top-level `key:` entry in front matter whose
/// first line is `first_line`.
fn key_line(yaml: &str, key: &str, first_line: usize) -> Option<usize> {
    yaml.lines()
        .position(|line| {
            let line = line.strip_prefix(['"', '\'']).unwrap_or(line);
            line.strip_prefix(key).is_some_and(|rest| {
                let rest = rest.strip_prefix(['"', '\'']).unwrap_or(rest);
                rest.trim_start_matches([' ', '\t']).starts_with(':')
            })
        })
        .map(|idx| first_line + idx)
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time, or full RFC 3339.
fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.date_naive());
    }
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| format!("`date` must look like YYYY-MM-DD, got {raw:?}"))
}

/// Normalize text into a URL slug: ASCII transliteration, lowercase,
/// non-alphanumeric runs collapsed to `-`.
pub fn slugify(text: &str) -> String {
    slug::slugify(text)
}

/// Slug derived from a file name: stem without extension, normalized.
pub fn slug_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| slugify(&s.to_string_lossy()))
        .unwrap_or_default()
}

/// Title fallback: first `# ` heading, else the stem with dashes as spaces.
fn fallback_title(body: &str, path: &Path) -> String {
    body.lines()
        .find(|line| line.starts_with("# "))
        .map(|line| line.trim_start_matches("# ").trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().replace(['-', '_'], " "))
                .unwrap_or_default()
        })
}

/// Build a page from one source file.
///
/// Returns `Ok(None)` for files marked `published: false`.
pub fn build_page(
    path: &Path,
    text: &str,
    locale: &str,
    collection: &str,
    converter: &dyn MarkupConverter,
) -> Result<Option<Page>, FrontMatterError> {
    let split = split_front_matter(text).map_err(|(line, message)| FrontMatterError {
        path: path.to_path_buf(),
        line,
        column: 1,
        message,
    })?;

    let metadata = match split.front_matter {
        Some(yaml) => parse_metadata(yaml, split.front_matter_line, path)?,
        None => Metadata::new(),
    };

    let known = check_known_fields(&metadata).map_err(|(key, message)| FrontMatterError {
        path: path.to_path_buf(),
        line: split
            .front_matter
            .and_then(|yaml| key_line(yaml, key, split.front_matter_line))
            .unwrap_or(split.front_matter_line.max(1)),
        column: 1,
        message,
    })?;

    if !known.published {
        tracing::debug!(path = %path.display(), "skipping unpublished page");
        return Ok(None);
    }

    let slug = match known.slug {
        Some(slug) => slug,
        None => slug_from_path(path),
    };
    if slug.is_empty() {
        return Err(FrontMatterError {
            path: path.to_path_buf(),
            line: 1,
            column: 1,
            message: "cannot derive a slug from the file name; set `slug`".to_string(),
        });
    }

    let title = known
        .title
        .unwrap_or_else(|| fallback_title(split.body, path));

    Ok(Some(Page {
        source: path.to_path_buf(),
        locale: locale.to_string(),
        collection: collection.to_string(),
        slug,
        title,
        body_html: converter.to_html(split.body),
        metadata,
        order: known.order,
        date: known.date,
        adjacent: None,
    }))
}

/// Sort key within a collection: explicit order first, then slug.
fn collection_order(page: &Page) -> (bool, i64, &str) {
    (
        page.order.is_none(),
        page.order.unwrap_or_default(),
        page.slug.as_str(),
    )
}

/// Order the page set and link neighbours.
///
/// Pages are grouped by `(locale, collection)` and sorted by explicit `order`
/// (ordered pages first), then by slug. The result keeps groups contiguous in
/// `(locale, collection)` order, so builds are deterministic regardless of
/// discovery order. Landing pages (`index`) are kept but not linked.
pub fn order_collections(pages: Vec<Page>) -> Vec<Page> {
    let mut groups: BTreeMap<(String, String), Vec<Page>> = BTreeMap::new();
    for page in pages {
        groups
            .entry((page.locale.clone(), page.collection.clone()))
            .or_default()
            .push(page);
    }

    let mut ordered = Vec::new();
    for (_, mut group) in groups {
        group.sort_by(|a, b| {
            collection_order(a)
                .cmp(&collection_order(b))
                .then_with(|| a.source.cmp(&b.source))
        });

        let base = ordered.len();
        let linked: Vec<usize> = group
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_index())
            .map(|(i, _)| base + i)
            .collect();

        ordered.extend(group);

        if linked.len() < 2 {
            continue;
        }
        for (pos, &idx) in linked.iter().enumerate() {
            ordered[idx].adjacent = Some(Adjacent {
                prev: pos.checked_sub(1).map(|p| linked[p]),
                next: linked.get(pos + 1).copied(),
            });
        }
    }
    ordered
}

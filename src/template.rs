//! Layout templates with inheritance.
//!
//! Stage 4 of the build pipeline. Layouts live under `layouts_dir` as `.html`
//! files; a layout's name is its path relative to that directory without the
//! extension (`default`, `lesson`, `partials/card`).
//!
//! Layouts are Jinja templates rendered with [`minijinja`]:
//!
//! ```text
//! {% extends "default" %}                 names the parent layout
//! {% block main %}…{% endblock %}         placeholder in a parent, override in a child
//! {{ page.title }}                        HTML-escaped lookup
//! {{ page.summary | default("…") }}       fallback for missing values
//! {{ "/assets/site.css" | relative_url }} prefixed with the site's base path
//! {% for item in alternates %}…{% endfor %}
//! ```
//!
//! Lookups never fail: a missing value, or a field of one, renders as the
//! empty string.
//!
//! Layouts are compiled once, when the set is loaded. Syntax errors surface
//! there. The `extends` header of every layout is read up front as well, so
//! [`TemplateSet::resolve_chain`] can report cycles and unknown parents before
//! anything renders.

use maud::html;
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("layout cycle: {}", .chain.join(" -> "))]
    LayoutCycle { chain: Vec<String> },
    #[error("unknown layout `{name}`{}", .referenced_by.as_ref().map(|r| format!(" (extended by `{r}`)")).unwrap_or_default())]
    UnknownLayout {
        name: String,
        referenced_by: Option<String>,
    },
    #[error("layout `{layout}` never renders the page body with {{{{ content }}}}")]
    BodyNotRendered { layout: String },
    #[error("syntax error in layout `{layout}`: {source}")]
    Syntax {
        layout: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to render layout `{layout}`: {source}")]
    Render {
        layout: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to read layout {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Values
// ============================================================================

/// A context value.
///
/// `Html` holds markup that is already safe to emit (the page body,
/// pre-rendered navigation). Everything else is escaped on output.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Html(String),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Insert into a map value; no-op for other kinds.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Value::Map(map) = self {
            map.insert(key.into(), value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Follow a dotted path (`page.title`).
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |value, key| value.get(key))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Text(s) | Value::Html(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    /// Convert for rendering. `Html` becomes a safe string so auto-escaping
    /// leaves it alone.
    pub fn to_jinja(&self) -> minijinja::Value {
        match self {
            Value::Text(s) => minijinja::Value::from(s.as_str()),
            Value::Html(s) => minijinja::Value::from_safe_string(s.clone()),
            Value::Bool(b) => minijinja::Value::from(*b),
            Value::List(items) => {
                minijinja::Value::from(items.iter().map(Value::to_jinja).collect::<Vec<_>>())
            }
            Value::Map(map) => minijinja::Value::from(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_jinja()))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<maud::Markup> for Value {
    fn from(markup: maud::Markup) -> Self {
        Value::Html(markup.into_string())
    }
}

// ============================================================================
// Layout set
// ============================================================================

/// Layout names from the page's layout up to the root layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutChain {
    layouts: Vec<String>,
}

impl LayoutChain {
    pub fn names(&self) -> &[String] {
        &self.layouts
    }

    /// The layout the page asked for.
    pub fn leaf(&self) -> &str {
        self.layouts.first().map(String::as_str).unwrap_or_default()
    }

    /// The layout with no parent, rendered first.
    pub fn root(&self) -> &str {
        self.layouts.last().map(String::as_str).unwrap_or_default()
    }
}

/// All layouts of a site, compiled.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    env: Environment<'static>,
    /// Layout name → parent named by its `extends` tag.
    parents: HashMap<String, Option<String>>,
    max_depth: usize,
}

impl TemplateSet {
    /// Load and compile every `.html` file under `dir`.
    pub fn load(dir: &Path, max_depth: usize) -> Result<Self, TemplateError> {
        if !dir.is_dir() {
            return Err(TemplateError::Io {
                path: dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "layouts directory not found"),
            });
        }

        let mut sources = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name().follow_links(true) {
            let entry = entry.map_err(|e| TemplateError::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
                source: e.into(),
            })?;
            let path = entry.path();
            let is_layout = entry.file_type().is_file()
                && path
                    .extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("html"));
            if !is_layout {
                continue;
            }
            let source = fs::read_to_string(path).map_err(|source| TemplateError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let name = layout_name(path.strip_prefix(dir).unwrap_or(path));
            sources.push((name, source));
        }

        let set = Self::from_sources(sources, max_depth)?;
        tracing::debug!(count = set.len(), dir = %dir.display(), "loaded layouts");
        Ok(set)
    }

    /// Compile layouts from `(name, source)` pairs.
    pub fn from_sources<N, S>(
        sources: impl IntoIterator<Item = (N, S)>,
        max_depth: usize,
    ) -> Result<Self, TemplateError>
    where
        N: Into<String>,
        S: Into<String>,
    {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.set_formatter(|out, state, value| match value.as_str() {
            Some(text) if !value.is_safe() && matches!(state.auto_escape(), AutoEscape::Html) => {
                out.write_str(&html! { (text) }.into_string())?;
                Ok(())
            }
            _ => minijinja::escape_formatter(out, state, value),
        });

        let mut parents = HashMap::new();
        for (name, source) in sources {
            let name = name.into();
            let source = source.into();
            parents.insert(name.clone(), extends_target(&source));
            env.add_template_owned(name.clone(), source)
                .map_err(|source| TemplateError::Syntax {
                    layout: name,
                    source,
                })?;
        }
        Ok(Self {
            env,
            parents,
            max_depth,
        })
    }

    /// Register the `relative_url` and `absolute_url` filters.
    ///
    /// `relative_url` prefixes a site path (`/assets/x.css`) with `base_path`;
    /// URLs that already carry it, and relative or external URLs, pass
    /// through. `absolute_url` also prepends the `base_url` origin.
    pub fn with_site_urls(mut self, base_url: &str, base_path: &str) -> Self {
        let base_path = base_path.to_string();
        let origin = base_url.trim_end_matches('/').to_string();

        let prefix = base_path.clone();
        self.env.add_filter("relative_url", move |url: String| {
            prefix_base_path(&prefix, &url)
        });
        self.env.add_filter("absolute_url", move |url: String| {
            let path = prefix_base_path(&base_path, &url);
            if path.starts_with('/') {
                format!("{origin}{path}")
            } else {
                path
            }
        });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parents.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Follow `extends` from `name` to the root layout.
    pub fn resolve_chain(&self, name: &str) -> Result<LayoutChain, TemplateError> {
        let mut chain: Vec<String> = Vec::new();
        let mut current = name.to_string();
        let mut referenced_by: Option<String> = None;

        loop {
            let Some(parent) = self.parents.get(&current) else {
                return Err(TemplateError::UnknownLayout {
                    name: current,
                    referenced_by,
                });
            };
            let repeats = chain.contains(&current);
            chain.push(current.clone());
            if repeats || chain.len() > self.max_depth {
                return Err(TemplateError::LayoutCycle { chain });
            }
            match parent {
                Some(parent) => {
                    referenced_by = Some(current);
                    current = parent.clone();
                }
                None => return Ok(LayoutChain { layouts: chain }),
            }
        }
    }

    /// Render a resolved chain against a context.
    ///
    /// A non-empty `content` value must appear in the output verbatim.
    pub fn render(&self, chain: &LayoutChain, context: &Value) -> Result<String, TemplateError> {
        let leaf = chain.leaf();
        let render_error = |source| TemplateError::Render {
            layout: leaf.to_string(),
            source,
        };
        let template = self.env.get_template(leaf).map_err(render_error)?;
        let out = template.render(context.to_jinja()).map_err(render_error)?;

        if let Some(Value::Html(body) | Value::Text(body)) = context.get("content")
            && !body.is_empty()
            && !out.contains(body.as_str())
        {
            return Err(TemplateError::BodyNotRendered {
                layout: chain.root().to_string(),
            });
        }
        Ok(out)
    }
}

/// `partials/card.html` → `partials/card`, with `/` on every platform.
fn layout_name(relative: &Path) -> String {
    let without_ext = relative.with_extension("");
    without_ext
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parent layout named by an `{% extends "…" %}` tag.
///
/// Comments and `raw` sections are skipped. A computed parent
/// (`{% extends name %}`) is not followed and counts as no parent.
fn extends_target(source: &str) -> Option<String> {
    let mut rest = source;
    loop {
        let tag = rest.find("{%")?;
        if let Some(comment) = rest.find("{#").filter(|&c| c < tag) {
            let end = rest[comment..].find("#}")?;
            rest = &rest[comment + end + 2..];
            continue;
        }

        let inner_start = tag + 2;
        let inner_len = rest[inner_start..].find("%}")?;
        let inner = rest[inner_start..inner_start + inner_len]
            .trim_matches(|c: char| c == '-' || c == '+' || c.is_whitespace());
        rest = &rest[inner_start + inner_len + 2..];

        let (keyword, argument) = inner
            .split_once(char::is_whitespace)
            .unwrap_or((inner, ""));
        match keyword {
            "extends" => return unquote(argument),
            "raw" => {
                let end = rest.find("endraw")?;
                rest = &rest[end..];
            }
            _ => {}
        }
    }
}

/// Strip matching single or double quotes.
fn unquote(text: &str) -> Option<String> {
    let text = text.trim();
    ['"', '\''].iter().find_map(|&q| {
        text.strip_prefix(q)
            .and_then(|t| t.strip_suffix(q))
            .filter(|t| !t.contains(q))
            .map(str::to_string)
    })
}

/// `/x` → `{base_path}/x` unless already prefixed. Other URLs are unchanged.
fn prefix_base_path(base_path: &str, url: &str) -> String {
    let already = base_path.is_empty()
        || url == base_path
        || url
            .strip_prefix(base_path)
            .is_some_and(|rest| rest.starts_with('/'));
    if url.starts_with('/') && !url.starts_with("//") && !already {
        format!("{base_path}{url}")
    } else {
        url.to_string()
    }
}

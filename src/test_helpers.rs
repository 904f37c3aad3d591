//! Shared test utilities for the babelpress test suite.
//!
//! Page builders for unit tests of the pure stages, and a small bilingual
//! site on disk for the assembler.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let intro = page("pt", "lesson", "intro");
//! let draft = page_with("en", "lesson", "draft", |p| p.order = Some(3));
//!
//! let site = SiteFixture::bilingual();
//! site.write("_lessons/extra.md", "# Extra");
//! let plan = generate::plan(site.path(), &site.config()).unwrap();
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::{self, SiteConfig};
use crate::types::{Metadata, Page};

// =========================================================================
// Pages
// =========================================================================

/// A bare page with the given identity. Source is `<locale>/<collection>/<slug>.md`.
pub fn page(locale: &str, collection: &str, slug: &str) -> Page {
    Page {
        source: PathBuf::from(format!("{locale}/{collection}/{slug}.md")),
        locale: locale.to_string(),
        collection: collection.to_string(),
        slug: slug.to_string(),
        title: slug.to_string(),
        metadata: Metadata::new(),
        body_html: format!("<p>{slug}</p>\n"),
        order: None,
        date: None,
        adjacent: None,
    }
}

/// A page adjusted by `edit`.
pub fn page_with(locale: &str, collection: &str, slug: &str, edit: impl FnOnce(&mut Page)) -> Page {
    let mut p = page(locale, collection, slug);
    edit(&mut p);
    p
}

// =========================================================================
// Site fixture
// =========================================================================

const CONFIG: &str = r#"
title = "The Incredible Rust"
description = "Learn Rust one lesson at a time"
base_url = "https://example.org"
locales = ["en", "pt"]
default_locale = "en"

[[content.en]]
path = "_lessons"
collection = "lesson"

[[content.en]]
path = "_pages"
collection = "page"

[[content.pt]]
path = "_lessons_pt"
collection = "lesson"

[[content.pt]]
path = "_pages_pt"
collection = "page"

[collections.lesson]
url_segment = "lessons"
layout = "lesson"

[collections.page]
url_segment = ""
"#;

const DEFAULT_LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="{{ locale }}">
<head><title>{% block title %}{{ page.title }} | {{ site.title }}{% endblock %}</title></head>
<body>
{{ nav.languages }}
<main>{% block main %}{{ content }}{% endblock %}</main>
</body>
</html>
"#;

const LESSON_LAYOUT: &str = r#"{% extends "default" %}
{% block main %}<article>{{ content }}</article>
{{ nav.pager }}{% endblock %}
"#;

const TRANSLATIONS: &str = r#"en:
  nav:
    previous: Previous
    next: Next
pt:
  nav:
    previous: Anterior
    next: Próximo
"#;

/// A source directory on disk, removed on drop.
pub struct SiteFixture {
    dir: TempDir,
}

impl SiteFixture {
    /// An empty source directory.
    pub fn empty() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// English and Portuguese lessons, a landing page per locale, two layouts,
    /// translations, and one stylesheet.
    pub fn bilingual() -> Self {
        let site = Self::empty();
        site.write("config.toml", CONFIG);
        site.write("_layouts/default.html", DEFAULT_LAYOUT);
        site.write("_layouts/lesson.html", LESSON_LAYOUT);
        site.write("_data/translations.yml", TRANSLATIONS);
        site.write("assets/css/site.css", "body { margin: 0; }\n");
        site.write(
            "_lessons/intro.md",
            "---\ntitle: Introduction\norder: 1\ndate: 2024-01-10\n---\n# Introduction\n\nWelcome to Rust.\n",
        );
        site.write(
            "_lessons/ownership.md",
            "---\ntitle: Ownership\norder: 2\ndate: 2024-02-01\n---\nEvery value has an owner.\n",
        );
        site.write(
            "_lessons_pt/intro.md",
            "---\ntitle: Introdução\norder: 1\n---\nBem-vindo ao Rust.\n",
        );
        site.write("_pages/index.md", "---\ntitle: Home\n---\nStart here.\n");
        site.write("_pages_pt/index.md", "---\ntitle: Início\n---\nComece aqui.\n");
        site
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the source root, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> &Self {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
        self
    }

    /// The fixture's `config.toml`, loaded over the stock defaults.
    pub fn config(&self) -> SiteConfig {
        config::load_config(self.path()).unwrap()
    }
}

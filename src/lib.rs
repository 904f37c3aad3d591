//! # babelpress
//!
//! A static site generator for multilingual lesson and documentation sites.
//! Content is plain text with YAML front matter, organised by locale; pages
//! are rendered through a small set of shared layouts and written as a tree of
//! `index.html` files that any file server can host.
//!
//! # Architecture: Five-Stage Pipeline
//!
//! ```text
//! 1. Scan      content roots  →  source files      (per locale)
//! 2. Content   source files   →  pages             (front matter, markdown, slugs)
//! 3. Route     pages          →  routes            (URLs, output paths, collisions)
//! 4. Template  page + context →  HTML              (layout inheritance)
//! 5. Generate  everything     →  _site/            (staging dir, atomic swap)
//! ```
//!
//! Data flows one way. Stages 1 to 4 are pure apart from reading input files;
//! only [`generate`] writes, and only after every page rendered cleanly. A
//! broken file never leaves a half-built site behind.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Stage 1: walks content roots, yields eligible files lazily |
//! | [`content`] | Stage 2: front matter, markup conversion, slugs, collection order |
//! | [`route`] | Stage 3: locale-aware URLs and the global collision check |
//! | [`template`] | Stage 4: layout loading, chain resolution, rendering |
//! | [`context`] | Per-page render context, translation tables, data files |
//! | [`generate`] | Stage 5: orchestration, feed, sitemap, staged writes |
//! | [`config`] | `config.toml` loading, stock defaults, merging, validation |
//! | [`types`] | Shared `Page`, `Route` and metadata types |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Locale Is a Content Root, Not a Front Matter Key
//!
//! Each locale lists its own content directories in config (`_lessons`,
//! `_lessons_pt`). Translators work in a separate tree and never touch the
//! original files. The same page in two locales is matched by slug, or by an
//! explicit `ref` key when the translated slug differs.
//!
//! ## Plan First, Write Last
//!
//! [`generate::plan`] builds the entire site in memory and collects every
//! problem it meets: malformed front matter, unreadable files, colliding
//! routes, layout cycles, layouts that drop the page body, static files that
//! would overwrite a generated one. Nothing reaches the output directory unless
//! that list is empty, and even then the site is written into a staging
//! directory that replaces the old output in one rename.
//!
//! ## Jinja Layouts, Checked Before Rendering
//!
//! Layouts are Jinja templates rendered by minijinja, with lookups that never
//! fail. Each layout's `extends` header is read when the set loads, so cycles
//! and unknown parents are reported for every page before anything renders,
//! and a layout that never emits `{{ content }}` fails its page. Navigation
//! fragments such as `nav.pager` are pre-rendered with Maud.

pub mod config;
pub mod content;
pub mod context;
pub mod generate;
pub mod output;
pub mod route;
pub mod scan;
pub mod template;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

//! Site assembly.
//!
//! Stage 5 of the build pipeline, and the only stage that writes files. Runs
//! the earlier stages in order, gathers every per-page problem, and only if
//! there are none writes the site.
//!
//! ## Phases
//!
//! 1. Load layouts, translation tables and data files
//! 2. Discover content files per locale and content root
//! 3. Build pages (parallel), order collections, link neighbours
//! 4. Route every page, then check the whole route table for collisions
//! 5. Resolve every page's layout chain
//! 6. Render (parallel)
//! 7. Plan static assets and check that none overwrites a generated file
//! 8. Write into a staging directory, then swap it into place
//!
//! Phases 1 and 2 stop at the first failure, except for content files that
//! are not valid UTF-8. From there on every problem is collected and reported
//! together in a [`ContentFailure`].
//!
//! ## Output Structure
//!
//! ```text
//! _site/
//! ├── index.html                 # en / page / index
//! ├── lessons/
//! │   ├── index.html             # en / lesson / index
//! │   └── intro/index.html
//! ├── pt/
//! │   ├── index.html
//! │   └── lessons/intro/index.html
//! ├── assets/…                   # static_dirs, copied verbatim
//! ├── feed.xml
//! ├── sitemap.xml
//! └── .nojekyll                  # zero bytes
//! ```
//!
//! ## Atomic Replacement
//!
//! Everything is written to `.<output>.staging` next to the output directory.
//! When staging succeeds the old output is moved to `.<output>.previous`, the
//! staging directory takes its place, and the old tree is deleted. If staging
//! fails the staging directory is removed and the old output is untouched.

use crate::config::{ConfigError, SiteConfig};
use crate::content::{self, FrontMatterError};
use crate::context::{self, DataError, SiteContext, Translations};
use crate::route::{self, RouteError};
use crate::scan::{self, ScanError, ScanOptions};
use crate::template::{LayoutChain, TemplateError, TemplateSet};
use crate::types::{Page, Route};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Failed to load layouts: {0}")]
    Templates(#[source] TemplateError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Content(ContentFailure),
}

/// One problem with one page. Collected, never short-circuits.
#[derive(Error, Debug)]
pub enum Problem {
    #[error(transparent)]
    FrontMatter(#[from] FrontMatterError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("{path}: {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },
    #[error("{path}: not valid UTF-8: {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("static file {asset} would overwrite {output_path}")]
    StaticConflict {
        output_path: PathBuf,
        asset: PathBuf,
        /// Page source or static file that already writes `output_path`;
        /// the output path itself for the feed, sitemap and marker.
        claimed_by: PathBuf,
    },
}

impl Problem {
    /// Source files this problem is about.
    pub fn sources(&self) -> Vec<&Path> {
        match self {
            Problem::FrontMatter(e) => vec![e.path.as_path()],
            Problem::Route(RouteError::Collision { first, second, .. })
            | Problem::Route(RouteError::DuplicatePage { first, second, .. }) => {
                vec![first.as_path(), second.as_path()]
            }
            Problem::Route(RouteError::LocalePermalink { page, .. }) => vec![page.as_path()],
            Problem::Render { path, .. } | Problem::Encoding { path, .. } => vec![path.as_path()],
            Problem::StaticConflict { claimed_by, .. } => vec![claimed_by.as_path()],
        }
    }
}

/// Every problem found in a build, plus the pages that were fine.
#[derive(Debug)]
pub struct ContentFailure {
    pub problems: Vec<Problem>,
    /// Sources that made it through every phase.
    pub processed: Vec<PathBuf>,
}

impl fmt::Display for ContentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.problems.len();
        write!(
            f,
            "{n} problem{} found, nothing was written",
            if n == 1 { "" } else { "s" }
        )
    }
}

/// A fully rendered site held in memory.
#[derive(Debug)]
pub struct Plan {
    pub pages: Vec<Page>,
    /// Parallel to `pages`.
    pub routes: Vec<Route>,
    /// Parallel to `pages`.
    pub html: Vec<String>,
    pub feed: Option<String>,
    pub sitemap: Option<String>,
    /// Static files to copy, in source order.
    pub assets: Vec<StaticAsset>,
}

/// One file from `static_dirs` or `static_files`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAsset {
    /// Path relative to the source directory.
    pub origin: PathBuf,
    /// Path relative to the output root.
    pub output_path: PathBuf,
}

/// One row of the route table.
#[derive(Debug, Clone, Serialize)]
pub struct RouteEntry {
    pub locale: String,
    pub collection: String,
    pub slug: String,
    pub source: PathBuf,
    pub public_url: String,
    pub output_path: PathBuf,
}

impl Plan {
    pub fn route_table(&self) -> Vec<RouteEntry> {
        self.pages
            .iter()
            .zip(&self.routes)
            .map(|(page, route)| RouteEntry {
                locale: page.locale.clone(),
                collection: page.collection.clone(),
                slug: page.slug.clone(),
                source: page.source.clone(),
                public_url: route.public_url.clone(),
                output_path: route.output_path.clone(),
            })
            .collect()
    }
}

/// What a successful build wrote.
#[derive(Debug)]
pub struct BuildReport {
    pub output: PathBuf,
    pub pages: Vec<RouteEntry>,
    pub titles: Vec<String>,
    pub feed: Option<PathBuf>,
    pub sitemap: Option<PathBuf>,
    pub marker: PathBuf,
    pub static_files: usize,
}

// ============================================================================
// Planning
// ============================================================================

/// A discovered file with the locale and collection of its root.
struct Located {
    file: scan::SourceFile,
    source: PathBuf,
    locale: String,
    collection: String,
}

/// Run every phase up to rendering, without touching the filesystem.
pub fn plan(source: &Path, config: &SiteConfig) -> Result<Plan, BuildError> {
    let templates = TemplateSet::load(&source.join(&config.layouts_dir), config.max_layout_depth)
        .map_err(BuildError::Templates)?;
    let templates = templates.with_site_urls(config.base_url(), &config.base_path());
    let translations = Translations::load(&source.join(&config.translations), config)?;
    let data = context::load_data_dir(&source.join(&config.data_dir))?;
    tracing::info!(layouts = templates.len(), "loaded layouts");

    let (files, mut problems) = discover_all(source, config)?;
    tracing::info!(files = files.len(), "discovered content files");

    let built: Vec<Result<Option<Page>, FrontMatterError>> = files
        .par_iter()
        .map(|located| {
            let converter = content::converter_for(&located.file.extension());
            content::build_page(
                &located.source,
                &located.file.text,
                &located.locale,
                &located.collection,
                converter,
            )
        })
        .collect();

    let mut pages = Vec::with_capacity(built.len());
    for result in built {
        match result {
            Ok(Some(page)) => pages.push(page),
            Ok(None) => {}
            Err(e) => problems.push(e.into()),
        }
    }
    let pages = content::order_collections(pages);

    let routes: Vec<Route> = pages.iter().map(|p| route::route_page(p, config)).collect();
    problems.extend(route::check_collisions(&pages, &routes).into_iter().map(Problem::from));
    problems.extend(route::check_permalinks(&pages, config).into_iter().map(Problem::from));
    tracing::info!(pages = pages.len(), "routed pages");

    let chains: Vec<Option<LayoutChain>> = pages
        .iter()
        .map(|page| {
            let layout = page
                .metadata
                .text("layout")
                .unwrap_or_else(|| config.layout_for(&page.collection));
            match templates.resolve_chain(layout) {
                Ok(chain) => Some(chain),
                Err(source) => {
                    problems.push(Problem::Render {
                        path: page.source.clone(),
                        source,
                    });
                    None
                }
            }
        })
        .collect();

    let site = SiteContext::new(config, &pages, &routes, &translations).with_data(data);
    let rendered: Vec<Option<Result<String, TemplateError>>> = chains
        .par_iter()
        .enumerate()
        .map(|(idx, chain)| {
            chain.as_ref().map(|chain| {
                tracing::debug!(page = %pages[idx].source.display(), layout = chain.leaf(), "rendering");
                templates.render(chain, &site.page_context(idx))
            })
        })
        .collect();

    let mut html = Vec::with_capacity(rendered.len());
    for (idx, result) in rendered.into_iter().enumerate() {
        match result {
            Some(Ok(out)) => html.push(out),
            Some(Err(source)) => {
                problems.push(Problem::Render {
                    path: pages[idx].source.clone(),
                    source,
                });
                html.push(String::new());
            }
            None => html.push(String::new()),
        }
    }

    let assets = plan_static(source, config);
    problems.extend(check_static_conflicts(&assets, &pages, &routes, config));

    if !problems.is_empty() {
        let failed: HashSet<&Path> = problems.iter().flat_map(Problem::sources).collect();
        let processed = pages
            .iter()
            .map(|p| p.source.as_path())
            .filter(|p| !failed.contains(p))
            .map(Path::to_path_buf)
            .collect();
        return Err(BuildError::Content(ContentFailure {
            problems,
            processed,
        }));
    }

    let feed = config
        .feed
        .enabled
        .then(|| render_feed(config, &pages, &routes));
    let sitemap = config.sitemap.then(|| render_sitemap(config, &pages, &routes));

    Ok(Plan {
        pages,
        routes,
        html,
        feed,
        sitemap,
        assets,
    })
}

/// Every content file of every locale. Files that are not valid UTF-8 come
/// back as problems; any other scan failure is fatal.
fn discover_all(
    source: &Path,
    config: &SiteConfig,
) -> Result<(Vec<Located>, Vec<Problem>), ScanError> {
    let options = ScanOptions {
        extensions: &config.content_extensions,
        exclude: &config.exclude,
    };
    let mut located = Vec::new();
    let mut problems = Vec::new();
    for locale in &config.locales {
        for root in config.roots_for(locale) {
            let root_dir = source.join(&root.path);
            for file in scan::discover(&root_dir, options)? {
                let file = match file {
                    Ok(file) => file,
                    Err(ScanError::Encoding {
                        relative,
                        source: error,
                        ..
                    }) => {
                        problems.push(Problem::Encoding {
                            path: Path::new(&root.path).join(relative),
                            source: error.utf8_error(),
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                located.push(Located {
                    source: Path::new(&root.path).join(&file.relative),
                    file,
                    locale: locale.clone(),
                    collection: root.collection.clone(),
                });
            }
        }
    }
    Ok((located, problems))
}

// ============================================================================
// Static assets
// ============================================================================

/// Enumerate `static_dirs` (recursively, keeping their path) and
/// `static_files` (copied to the output root). Missing entries are skipped
/// with a warning.
fn plan_static(source: &Path, config: &SiteConfig) -> Vec<StaticAsset> {
    let mut assets = Vec::new();
    for dir in &config.static_dirs {
        let src = source.join(dir);
        if !src.is_dir() {
            tracing::warn!(path = %src.display(), "static directory not found, skipping");
            continue;
        }
        for entry in WalkDir::new(&src).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(path = %src.display(), error = %e, "skipping unreadable static entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&src).unwrap_or(entry.path());
            let output_path = Path::new(dir).join(relative);
            assets.push(StaticAsset {
                origin: output_path.clone(),
                output_path,
            });
        }
    }
    for file in &config.static_files {
        let src = source.join(file);
        let Some(name) = src.file_name() else {
            continue;
        };
        if !src.is_file() {
            tracing::warn!(path = %src.display(), "static file not found, skipping");
            continue;
        }
        assets.push(StaticAsset {
            origin: PathBuf::from(file),
            output_path: PathBuf::from(name),
        });
    }
    assets
}

/// Static files that would land on a path already written by a page, the
/// feed, the sitemap, the marker file or an earlier static file.
fn check_static_conflicts(
    assets: &[StaticAsset],
    pages: &[Page],
    routes: &[Route],
    config: &SiteConfig,
) -> Vec<Problem> {
    let mut claimed: HashMap<PathBuf, PathBuf> = pages
        .iter()
        .zip(routes)
        .map(|(page, route)| (route.output_path.clone(), page.source.clone()))
        .collect();
    let mut generated = vec![PathBuf::from(&config.marker_file)];
    if config.feed.enabled {
        generated.push(PathBuf::from(&config.feed.path));
    }
    if config.sitemap {
        generated.push(PathBuf::from("sitemap.xml"));
    }
    for path in generated {
        claimed.entry(path.clone()).or_insert(path);
    }

    let mut problems = Vec::new();
    for asset in assets {
        match claimed.get(&asset.output_path) {
            Some(owner) => problems.push(Problem::StaticConflict {
                output_path: asset.output_path.clone(),
                asset: asset.origin.clone(),
                claimed_by: owner.clone(),
            }),
            None => {
                claimed.insert(asset.output_path.clone(), asset.origin.clone());
            }
        }
    }
    problems
}

// ============================================================================
// Feed and sitemap
// ============================================================================

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// RSS 2.0 feed of the most recent pages of the feed collection in the
/// default locale. Undated pages come last, in collection order.
pub fn render_feed(config: &SiteConfig, pages: &[Page], routes: &[Route]) -> String {
    let base = config.base_url();
    let mut entries: Vec<(&Page, &Route)> = pages
        .iter()
        .zip(routes)
        .filter(|(p, _)| {
            config.is_default_locale(&p.locale)
                && p.collection == config.feed.collection
                && !p.is_index()
        })
        .collect();
    entries.sort_by(|(a, _), (b, _)| match (a.date, b.date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let mut items = String::new();
    for (page, route) in entries.into_iter().take(config.feed.limit) {
        let link = format!("{base}{}", route.public_url);
        items.push_str("    <item>\n");
        items.push_str(&format!("      <title>{}</title>\n", xml_escape(&page.title)));
        items.push_str(&format!("      <link>{}</link>\n", xml_escape(&link)));
        items.push_str(&format!("      <guid>{}</guid>\n", xml_escape(&link)));
        if let Some(date) = page.date.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            items.push_str(&format!(
                "      <pubDate>{}</pubDate>\n",
                date.and_utc().to_rfc2822()
            ));
        }
        if let Some(description) = page.metadata.text("description") {
            items.push_str(&format!(
                "      <description>{}</description>\n",
                xml_escape(description)
            ));
        }
        items.push_str("    </item>\n");
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\">\n  <channel>\n    <title>{}</title>\n    <link>{}</link>\n    <description>{}</description>\n    <language>{}</language>\n{}  </channel>\n</rss>\n",
        xml_escape(&config.title),
        xml_escape(&format!("{base}{}", config.site_url("/"))),
        xml_escape(&config.description),
        xml_escape(&config.default_locale),
        items
    )
}

/// Sitemap listing every page.
pub fn render_sitemap(config: &SiteConfig, pages: &[Page], routes: &[Route]) -> String {
    let base = config.base_url();
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    for (page, route) in pages.iter().zip(routes) {
        let loc = xml_escape(&format!("{base}{}", route.public_url));
        match page.date {
            Some(date) => xml.push_str(&format!(
                "  <url><loc>{loc}</loc><lastmod>{}</lastmod></url>\n",
                date.format("%Y-%m-%d")
            )),
            None => xml.push_str(&format!("  <url><loc>{loc}</loc></url>\n")),
        }
    }
    xml.push_str("</urlset>\n");
    xml
}

// ============================================================================
// Writing
// ============================================================================

/// Plan the site and write it to `output`.
pub fn build(source: &Path, output: &Path, config: &SiteConfig) -> Result<BuildReport, BuildError> {
    let plan = plan(source, config)?;
    write_site(&plan, source, output, config)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BuildError + '_ {
    move |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `.<name>.staging` and `.<name>.previous`, next to `output`.
fn sibling_paths(output: &Path) -> (PathBuf, PathBuf) {
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "site".to_string());
    (
        parent.join(format!(".{name}.staging")),
        parent.join(format!(".{name}.previous")),
    )
}

/// Write a planned site. The old output survives any failure.
pub fn write_site(
    plan: &Plan,
    source: &Path,
    output: &Path,
    config: &SiteConfig,
) -> Result<BuildReport, BuildError> {
    if output.exists() && !output.is_dir() {
        return Err(BuildError::Io {
            path: output.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "output path exists and is not a directory",
            ),
        });
    }
    let (staging, previous) = sibling_paths(output);
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(io_error(&staging))?;
    }

    let staged = stage(plan, source, &staging, config);
    let report = match staged {
        Ok(report) => report,
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::warn!(path = %staging.display(), error = %cleanup, "failed to remove staging directory");
            }
            return Err(e);
        }
    };

    swap_into_place(&staging, &previous, output)?;
    tracing::info!(output = %output.display(), pages = plan.pages.len(), "site written");

    Ok(BuildReport {
        output: output.to_path_buf(),
        ..report
    })
}

/// Write every artifact into `staging`.
fn stage(
    plan: &Plan,
    source: &Path,
    staging: &Path,
    config: &SiteConfig,
) -> Result<BuildReport, BuildError> {
    fs::create_dir_all(staging).map_err(io_error(staging))?;

    let mut artifacts: Vec<(PathBuf, &[u8])> = plan
        .routes
        .iter()
        .zip(&plan.html)
        .map(|(route, html)| (route.output_path.clone(), html.as_bytes()))
        .collect();
    let feed_path = plan.feed.as_ref().map(|feed| {
        artifacts.push((PathBuf::from(&config.feed.path), feed.as_bytes()));
        PathBuf::from(&config.feed.path)
    });
    let sitemap_path = plan.sitemap.as_ref().map(|sitemap| {
        artifacts.push((PathBuf::from("sitemap.xml"), sitemap.as_bytes()));
        PathBuf::from("sitemap.xml")
    });
    artifacts.push((PathBuf::from(&config.marker_file), b"".as_slice()));

    artifacts.par_iter().try_for_each(|(relative, bytes)| {
        let path = staging.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::write(&path, bytes).map_err(io_error(&path))
    })?;

    plan.assets.par_iter().try_for_each(|asset| {
        let src = source.join(&asset.origin);
        let dst = staging.join(&asset.output_path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::copy(&src, &dst).map(|_| ()).map_err(io_error(&src))
    })?;

    Ok(BuildReport {
        output: staging.to_path_buf(),
        pages: plan.route_table(),
        titles: plan.pages.iter().map(|p| p.title.clone()).collect(),
        feed: feed_path,
        sitemap: sitemap_path,
        marker: PathBuf::from(&config.marker_file),
        static_files: plan.assets.len(),
    })
}

/// Replace `output` with `staging`, keeping the old tree until the swap lands.
fn swap_into_place(staging: &Path, previous: &Path, output: &Path) -> Result<(), BuildError> {
    if previous.exists() {
        fs::remove_dir_all(previous).map_err(io_error(previous))?;
    }
    let had_output = output.exists();
    if had_output {
        fs::rename(output, previous).map_err(io_error(output))?;
    }
    if let Err(source) = fs::rename(staging, output) {
        if had_output && let Err(e) = fs::rename(previous, output) {
            tracing::warn!(path = %previous.display(), error = %e, "failed to restore previous output");
        }
        if let Err(e) = fs::remove_dir_all(staging) {
            tracing::warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
        }
        return Err(BuildError::Io {
            path: output.to_path_buf(),
            source,
        });
    }
    if had_output && let Err(e) = fs::remove_dir_all(previous) {
        tracing::warn!(path = %previous.display(), error = %e, "failed to remove previous output");
    }
    Ok(())
}

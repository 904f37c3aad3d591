//! End-to-end builds of small sites on disk.
//!
//! Each test writes a source tree into a temp directory, runs the public
//! pipeline, and inspects either the written output or the reported problems.
//!
//! Run with: cargo test --test build_pipeline

use babelpress::config::{self, SiteConfig};
use babelpress::output;
use babelpress::content::FrontMatterError;
use babelpress::generate::{self, BuildError, ContentFailure, Problem};
use babelpress::route::RouteError;
use babelpress::scan::ScanError;
use babelpress::template::TemplateError;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CONFIG: &str = r#"
title = "The Incredible Rust"
base_url = "https://example.org/"
locales = ["en", "pt"]
default_locale = "en"

[[content.en]]
path = "_lessons"
collection = "lesson"

[[content.pt]]
path = "_lessons_pt"
collection = "lesson"

[collections.lesson]
url_segment = "lessons"
"#;

const LAYOUT: &str = r#"<html lang="{{ locale }}">
<head><title>{{ page.title }}</title></head>
<body>{% block main %}{{ content }}{% endblock %}</body>
</html>
"#;

struct Site {
    root: TempDir,
}

impl Site {
    fn new() -> Self {
        Self::with_config("")
    }

    /// `extra` holds top-level keys and goes before the content tables.
    fn with_config(extra: &str) -> Self {
        let site = Self {
            root: TempDir::new().unwrap(),
        };
        site.write("config.toml", &format!("{extra}\n{CONFIG}"));
        site.write("_layouts/default.html", LAYOUT);
        fs::create_dir_all(site.source().join("_lessons")).unwrap();
        fs::create_dir_all(site.source().join("_lessons_pt")).unwrap();
        site
    }

    fn write(&self, relative: &str, contents: &str) -> &Self {
        let path = self.root.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
        self
    }

    fn source(&self) -> &Path {
        self.root.path()
    }

    fn output(&self) -> PathBuf {
        self.root.path().join("_site")
    }

    fn config(&self) -> SiteConfig {
        config::load_config(self.source()).unwrap()
    }

    fn build(&self) -> Result<generate::BuildReport, BuildError> {
        generate::build(self.source(), &self.output(), &self.config())
    }

    fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.output().join(relative)).unwrap()
    }
}

fn content_failure(result: Result<generate::BuildReport, BuildError>) -> ContentFailure {
    match result {
        Err(BuildError::Content(failure)) => failure,
        Err(other) => panic!("expected content problems, got {other}"),
        Ok(_) => panic!("expected content problems, build succeeded"),
    }
}

// =========================================================================
// Routing
// =========================================================================

#[test]
fn default_locale_lesson_is_served_without_prefix() {
    let site = Site::new();
    site.write("_lessons/intro.md", "---\ntitle: Intro\n---\nHello.\n");

    let report = site.build().unwrap();

    assert_eq!(report.pages.len(), 1);
    assert_eq!(report.pages[0].public_url, "/lessons/intro/");
    assert_eq!(
        report.pages[0].output_path,
        PathBuf::from("lessons/intro/index.html")
    );
    let html = site.read("lessons/intro/index.html");
    assert!(html.contains("<title>Intro</title>"));
    assert!(html.contains("<p>Hello.</p>"));
}

#[test]
fn other_locale_lesson_is_served_under_its_prefix() {
    let site = Site::new();
    site.write("_lessons/intro.md", "---\ntitle: Intro\n---\nHello.\n");
    site.write("_lessons_pt/intro.md", "---\ntitle: Introdução\n---\nOlá.\n");

    site.build().unwrap();

    let html = site.read("pt/lessons/intro/index.html");
    assert!(html.contains(r#"<html lang="pt">"#));
    assert!(html.contains("<p>Olá.</p>"));
}

#[test]
fn route_table_lists_every_page() {
    let site = Site::new();
    site.write("_lessons/intro.md", "# Intro\n");
    site.write("_lessons_pt/intro.md", "# Introdução\n");

    let plan = generate::plan(site.source(), &site.config()).unwrap();
    let urls: Vec<String> = plan
        .route_table()
        .into_iter()
        .map(|e| e.public_url)
        .collect();

    assert_eq!(urls, ["/lessons/intro/", "/pt/lessons/intro/"]);
}

#[test]
fn route_table_json_includes_dated_pages() {
    let site = Site::new();
    site.write("_lessons/intro.md", "---\ndate: 2024-03-01\n---\n# Intro\n");

    let plan = generate::plan(site.source(), &site.config()).unwrap();
    let json = output::format_route_table(&plan).unwrap();
    let rows: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(rows[0]["public_url"], "/lessons/intro/");
    assert_eq!(rows[0]["output_path"], "lessons/intro/index.html");
    assert_eq!(rows[0]["locale"], "en");
}

#[test]
fn base_path_prefixes_every_link() {
    let site = Site::with_config(r#"base_path = "/rust""#);
    site.write(
        "_layouts/default.html",
        r#"<a href="{{ "/" | relative_url }}">home</a>{% for l in alternates %}<a href="{{ l.url }}">{{ l.locale }}</a>{% endfor %}{% if next %}<a href="{{ next.url }}">next</a>{% endif %}{{ content }}"#,
    );
    site.write("_lessons/a.md", "---\norder: 1\n---\nA\n");
    site.write("_lessons/b.md", "---\norder: 2\n---\nB\n");
    site.write("_lessons_pt/a.md", "A\n");

    site.build().unwrap();

    let html = site.read("lessons/a/index.html");
    assert!(html.contains(r#"<a href="/rust/">home</a>"#));
    assert!(html.contains(r#"<a href="/rust/pt/lessons/a/">pt</a>"#));
    assert!(html.contains(r#"<a href="/rust/lessons/b/">next</a>"#));
    assert!(site.read("sitemap.xml").contains("<loc>https://example.org/rust/lessons/a/</loc>"));
}

#[test]
fn data_files_are_available_to_layouts() {
    let site = Site::new();
    site.write("_data/course.json", r#"{"name": "Rust 101"}"#);
    site.write("_data/authors.yaml", "- Ana\n- Bo\n");
    site.write(
        "_layouts/default.html",
        "{{ data.course.name }}:{% for a in data.authors %}{{ a }};{% endfor %}{{ content }}",
    );
    site.write("_lessons/intro.md", "Hi\n");

    site.build().unwrap();

    assert!(site.read("lessons/intro/index.html").starts_with("Rust 101:Ana;Bo;<p>Hi</p>"));
}

// =========================================================================
// Problems
// =========================================================================

#[test]
fn colliding_pages_are_reported_and_nothing_is_written() {
    let site = Site::new();
    site.write("_lessons/intro.md", "# Intro\n");
    site.write("_lessons/other.md", "---\nslug: intro\n---\n# Other\n");

    let failure = content_failure(site.build());

    assert_eq!(failure.problems.len(), 1);
    assert!(matches!(
        &failure.problems[0],
        Problem::Route(RouteError::Collision { output_path, .. })
            if output_path == Path::new("lessons/intro/index.html")
    ));
    assert!(!site.output().exists());
}

#[test]
fn malformed_front_matter_names_the_file_and_keeps_going() {
    let site = Site::new();
    site.write("_lessons/broken.md", "---\ntitle: [unclosed\n---\nBody\n");
    site.write("_lessons/fine.md", "---\ntitle: Fine\n---\nBody\n");

    let failure = content_failure(site.build());

    assert_eq!(failure.problems.len(), 1);
    match &failure.problems[0] {
        Problem::FrontMatter(FrontMatterError { path, line, .. }) => {
            assert_eq!(path, Path::new("_lessons/broken.md"));
            assert!(*line >= 2);
        }
        other => panic!("unexpected problem: {other}"),
    }
    assert_eq!(failure.processed, [PathBuf::from("_lessons/fine.md")]);
    assert!(!site.output().exists());
}

#[test]
fn every_problem_is_collected_in_one_run() {
    let site = Site::new();
    site.write("_lessons/broken.md", "---\norder: first\n---\n");
    site.write("_lessons/a.md", "# A\n");
    site.write("_lessons/b.md", "---\nslug: a\n---\n# B\n");
    site.write("_lessons/c.md", "---\nlayout: missing\n---\n# C\n");

    let failure = content_failure(site.build());

    assert_eq!(failure.problems.len(), 3);
    assert!(failure.to_string().starts_with("3 problems found"));
}

#[test]
fn non_utf8_file_is_reported_alongside_other_problems() {
    let site = Site::new();
    site.write("_lessons/good.md", "---\ntitle: [unclosed\n---\nBody\n");
    fs::write(site.source().join("_lessons/latin1.md"), b"caf\xe9").unwrap();
    site.write("_lessons/fine.md", "# Fine\n");

    let failure = content_failure(site.build());

    assert_eq!(failure.problems.len(), 2);
    assert!(failure.problems.iter().any(|p| matches!(p, Problem::FrontMatter(_))));
    let encoding = failure
        .problems
        .iter()
        .find(|p| matches!(p, Problem::Encoding { .. }))
        .unwrap();
    assert_eq!(encoding.sources(), [Path::new("_lessons/latin1.md")]);
    assert!(encoding.to_string().contains("not valid UTF-8"));
    assert_eq!(failure.processed, [PathBuf::from("_lessons/fine.md")]);
}

#[test]
fn bad_known_key_reports_its_own_line() {
    let site = Site::new();
    site.write("_lessons/intro.md", "---\ntitle: Intro\nauthor: Ana\norder: first\n---\n");

    let failure = content_failure(site.build());

    match &failure.problems[0] {
        Problem::FrontMatter(FrontMatterError { line, .. }) => assert_eq!(*line, 4),
        other => panic!("unexpected problem: {other}"),
    }
}

#[test]
fn permalink_starting_with_a_locale_is_rejected() {
    let site = Site::new();
    site.write("_lessons/intro.md", "---\npermalink: pt/intro\n---\n# Intro\n");

    let failure = content_failure(site.build());

    assert!(matches!(
        &failure.problems[0],
        Problem::Route(RouteError::LocalePermalink { locale, .. }) if locale == "pt"
    ));
}

#[test]
fn static_file_cannot_overwrite_a_page() {
    let site = Site::with_config(r#"static_dirs = ["lessons"]"#);
    site.write("_lessons/intro.md", "# Intro\n");
    site.write("lessons/intro/index.html", "STATIC");

    let failure = content_failure(site.build());

    assert_eq!(failure.problems.len(), 1);
    assert!(matches!(
        &failure.problems[0],
        Problem::StaticConflict { output_path, claimed_by, .. }
            if output_path == Path::new("lessons/intro/index.html")
                && claimed_by == Path::new("_lessons/intro.md")
    ));
    assert!(!site.output().exists());
}

#[test]
fn missing_content_root_stops_the_build() {
    let site = Site::new();
    site.write("_lessons/intro.md", "# Intro\n");
    fs::remove_dir(site.source().join("_lessons_pt")).unwrap();

    let err = site.build().unwrap_err();

    assert!(matches!(err, BuildError::Scan(ScanError::MissingRoot(ref p)) if p.ends_with("_lessons_pt")));
    assert!(!site.output().exists());
}

// =========================================================================
// Layouts
// =========================================================================

#[test]
fn layout_cycle_is_reported_before_rendering() {
    let site = Site::new();
    site.write("_layouts/a.html", "{% extends \"b\" %}");
    site.write("_layouts/b.html", "{% extends \"a\" %}");
    site.write("_lessons/intro.md", "---\nlayout: a\n---\n# Intro\n");

    let failure = content_failure(site.build());

    assert!(matches!(
        &failure.problems[0],
        Problem::Render { source: TemplateError::LayoutCycle { .. }, .. }
    ));
}

#[test]
fn layout_that_drops_the_body_is_rejected() {
    let site = Site::new();
    site.write("_layouts/bare.html", "<html>{{ page.title }}</html>");
    site.write("_lessons/intro.md", "---\nlayout: bare\n---\nHello.\n");

    let failure = content_failure(site.build());

    assert!(matches!(
        &failure.problems[0],
        Problem::Render { source: TemplateError::BodyNotRendered { .. }, .. }
    ));
}

#[test]
fn child_layout_overrides_parent_block() {
    let site = Site::new();
    site.write(
        "_layouts/lesson.html",
        "{% extends \"default\" %}{% block main %}<article>{{ content }}</article>{% endblock %}",
    );
    site.write("_lessons/intro.md", "---\nlayout: lesson\n---\nHello.\n");

    site.build().unwrap();

    let html = site.read("lessons/intro/index.html");
    assert!(html.contains("<body><article><p>Hello.</p>\n</article></body>"));
}

// =========================================================================
// Output directory
// =========================================================================

#[test]
fn marker_feed_and_sitemap_are_written() {
    let site = Site::new();
    site.write(
        "_lessons/intro.md",
        "---\ntitle: Intro & Setup\ndate: 2024-03-01\n---\nHello.\n",
    );

    site.build().unwrap();

    let marker = fs::metadata(site.output().join(".nojekyll")).unwrap();
    assert_eq!(marker.len(), 0);

    let feed = site.read("feed.xml");
    assert!(feed.contains("<title>Intro &amp; Setup</title>"));
    assert!(feed.contains("<link>https://example.org/lessons/intro/</link>"));

    let sitemap = site.read("sitemap.xml");
    assert!(sitemap.contains("<loc>https://example.org/lessons/intro/</loc>"));
}

#[test]
fn failed_rebuild_leaves_previous_output_untouched() {
    let site = Site::new();
    site.write("_lessons/intro.md", "# Intro\n");
    site.build().unwrap();
    let before = site.read("lessons/intro/index.html");

    site.write("_lessons/intro.md", "---\ntitle: [broken\n---\n# Intro\n");
    content_failure(site.build());

    assert_eq!(site.read("lessons/intro/index.html"), before);
}

#[test]
fn rebuild_replaces_stale_pages() {
    let site = Site::new();
    site.write("_lessons/old.md", "# Old\n");
    site.build().unwrap();
    assert!(site.output().join("lessons/old/index.html").exists());

    fs::remove_file(site.source().join("_lessons/old.md")).unwrap();
    site.write("_lessons/new.md", "# New\n");
    site.build().unwrap();

    assert!(!site.output().join("lessons/old/index.html").exists());
    assert!(site.output().join("lessons/new/index.html").exists());
    assert!(!site.source().join("._site.staging").exists());
    assert!(!site.source().join("._site.previous").exists());
}

#[test]
fn static_assets_are_copied_verbatim() {
    let site = Site::new();
    site.write("_lessons/intro.md", "# Intro\n");
    site.write("assets/css/site.css", "body { margin: 0; }\n");

    let report = site.build().unwrap();

    assert_eq!(report.static_files, 1);
    assert_eq!(site.read("assets/css/site.css"), "body { margin: 0; }\n");
}

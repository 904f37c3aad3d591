//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Pages are listed by what they are, title and position in their locale,
//! with files shown as indented context lines. The output reads as a content
//! inventory while still pointing back at the source of every page.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! en
//! 001 Home → index.html
//!     Source: _pages/index.md
//! 002 Introduction → lessons/intro/index.html
//!     Source: _lessons/intro.md
//! pt
//! 001 Início → pt/index.html
//!     Source: _pages_pt/index.md
//!
//! Feed → feed.xml
//! Sitemap → sitemap.xml
//! Assets: 3 files copied
//! Built 3 pages in 2 locales → _site
//! ```
//!
//! ## Problems
//!
//! ```text
//! error: _lessons/broken.md:2:8: malformed front matter: …
//! error: _lessons/a.md and _lessons/A.md both write lessons/a/index.html
//!
//! 2 problems found, nothing was written
//! 14 files processed without problems
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout or stderr.
//! Format functions are pure: no I/O, no side effects.

use crate::generate::{BuildReport, ContentFailure, Plan, RouteEntry};
use std::collections::BTreeSet;
use std::error::Error;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

/// Page inventory grouped by locale, in route-table order.
///
/// ```text
/// en
/// 001 Introduction → lessons/intro/index.html
///     Source: _lessons/intro.md
/// ```
fn page_lines(entries: &[RouteEntry], titles: &[String]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_locale: Option<&str> = None;
    let mut position = 0;

    for (entry, title) in entries.iter().zip(titles) {
        if current_locale != Some(entry.locale.as_str()) {
            lines.push(entry.locale.clone());
            current_locale = Some(entry.locale.as_str());
            position = 0;
        }
        position += 1;
        lines.push(format!(
            "{} {} → {}",
            format_index(position),
            title,
            entry.output_path.display()
        ));
        lines.push(format!("{}Source: {}", indent(1), entry.source.display()));
    }
    lines
}

fn locale_count(entries: &[RouteEntry]) -> usize {
    entries
        .iter()
        .map(|e| e.locale.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_output(report: &BuildReport) -> Vec<String> {
    let mut lines = page_lines(&report.pages, &report.titles);
    lines.push(String::new());

    if let Some(feed) = &report.feed {
        lines.push(format!("Feed → {}", feed.display()));
    }
    if let Some(sitemap) = &report.sitemap {
        lines.push(format!("Sitemap → {}", sitemap.display()));
    }
    if report.static_files > 0 {
        lines.push(format!(
            "Assets: {} copied",
            plural(report.static_files, "file", "files")
        ));
    }
    lines.push(format!(
        "Built {} in {} → {}",
        plural(report.pages.len(), "page", "pages"),
        plural(locale_count(&report.pages), "locale", "locales"),
        report.output.display()
    ));
    lines
}

pub fn print_build_output(report: &BuildReport) {
    for line in format_build_output(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

pub fn format_check_output(plan: &Plan) -> Vec<String> {
    let entries = plan.route_table();
    let titles: Vec<String> = plan.pages.iter().map(|p| p.title.clone()).collect();
    let mut lines = page_lines(&entries, &titles);
    lines.push(String::new());
    lines.push(format!(
        "{} in {}: content is valid",
        plural(entries.len(), "page", "pages"),
        plural(locale_count(&entries), "locale", "locales"),
    ));
    lines
}

pub fn print_check_output(plan: &Plan) {
    for line in format_check_output(plan) {
        println!("{}", line);
    }
}

/// Route table as pretty JSON.
pub fn format_route_table(plan: &Plan) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&plan.route_table())
}

// ============================================================================
// Errors
// ============================================================================

pub fn format_problems(failure: &ContentFailure) -> Vec<String> {
    let mut lines: Vec<String> = failure
        .problems
        .iter()
        .map(|p| format!("error: {}", p))
        .collect();
    lines.push(String::new());
    lines.push(failure.to_string());
    lines.push(format!(
        "{} processed without problems",
        plural(failure.processed.len(), "file", "files")
    ));
    for path in &failure.processed {
        lines.push(format!("{}{}", indent(1), path.display()));
    }
    lines
}

pub fn print_problems(failure: &ContentFailure) {
    for line in format_problems(failure) {
        eprintln!("{}", line);
    }
}

/// An error and its chain of causes, one per line.
pub fn format_error(err: &dyn Error) -> Vec<String> {
    let mut lines = vec![format!("error: {}", err)];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("{}caused by: {}", indent(1), cause));
        source = cause.source();
    }
    lines
}

pub fn print_error(err: &dyn Error) {
    for line in format_error(err) {
        eprintln!("{}", line);
    }
}

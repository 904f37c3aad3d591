//! Locale-aware routing.
//!
//! Stage 3 of the build pipeline. Every page gets a [`Route`]: the public URL
//! it is served under and the file it is written to.
//!
//! ```text
//! en / lesson / intro   →  /lessons/intro/      lessons/intro/index.html
//! pt / lesson / intro   →  /pt/lessons/intro/   pt/lessons/intro/index.html
//! pt / page   / index   →  /pt/                 pt/index.html
//! ```
//!
//! The default locale has no prefix. A collection's URL segment comes from
//! config and may be empty. A `permalink` in front matter replaces the
//! collection segment and slug but stays under the locale prefix. A
//! permalink may not start with a locale code; [`check_permalinks`] reports
//! those.
//!
//! Public URLs carry the configured `base_path`; output paths never do.
//!
//! Routing is pure. Collisions are found afterwards by [`check_collisions`],
//! once the whole page set is routed.

use crate::config::SiteConfig;
use crate::types::{Page, Route};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error("{first} and {second} both write {output_path}")]
    Collision {
        output_path: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("duplicate page {locale}/{collection}/{slug}: {first} and {second}")]
    DuplicatePage {
        locale: String,
        collection: String,
        slug: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("{page}: permalink {permalink:?} starts with locale code {locale:?}")]
    LocalePermalink {
        page: PathBuf,
        permalink: String,
        locale: String,
    },
}

/// Compute the route of one page.
pub fn route_page(page: &Page, config: &SiteConfig) -> Route {
    let mut segments: Vec<&str> = Vec::new();
    if !config.is_default_locale(&page.locale) {
        segments.push(&page.locale);
    }

    match page.metadata.text("permalink") {
        Some(permalink) => segments.extend(path_segments(permalink)),
        None => {
            segments.extend(path_segments(config.url_segment(&page.collection)));
            if !page.is_index() {
                segments.push(&page.slug);
            }
        }
    }

    let public_url = if segments.is_empty() {
        config.site_url("/")
    } else {
        config.site_url(&format!("/{}/", segments.join("/")))
    };
    let output_path: PathBuf = segments
        .iter()
        .copied()
        .chain(std::iter::once("index.html"))
        .collect();

    Route {
        output_path,
        public_url,
    }
}

/// Non-empty path segments, without `.` or `..`.
fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
}

/// Pages whose permalink begins with a configured locale code. Such a URL
/// would sit inside another locale's namespace.
pub fn check_permalinks(pages: &[Page], config: &SiteConfig) -> Vec<RouteError> {
    pages
        .iter()
        .filter_map(|page| {
            let permalink = page.metadata.text("permalink")?;
            let first = path_segments(permalink).next()?;
            config.is_locale(first).then(|| RouteError::LocalePermalink {
                page: page.source.clone(),
                permalink: permalink.to_string(),
                locale: first.to_string(),
            })
        })
        .collect()
}

/// Find every pair of pages that would overwrite each other or that share an
/// identity. `pages` and `routes` are parallel slices.
///
/// Pages are compared in slice order, so the first page to claim a path is
/// always reported as `first`.
pub fn check_collisions(pages: &[Page], routes: &[Route]) -> Vec<RouteError> {
    let mut errors = Vec::new();
    let mut by_path: HashMap<&PathBuf, usize> = HashMap::new();
    let mut by_identity: HashMap<(&str, &str, &str), usize> = HashMap::new();

    for (idx, (page, route)) in pages.iter().zip(routes).enumerate() {
        if let Some(&first) = by_path.get(&route.output_path) {
            errors.push(RouteError::Collision {
                output_path: route.output_path.clone(),
                first: pages[first].source.clone(),
                second: page.source.clone(),
            });
        } else {
            by_path.insert(&route.output_path, idx);
        }

        let identity = (
            page.locale.as_str(),
            page.collection.as_str(),
            page.slug.as_str(),
        );
        match by_identity.get(&identity) {
            Some(&first) if routes[first].output_path != route.output_path => {
                errors.push(RouteError::DuplicatePage {
                    locale: page.locale.clone(),
                    collection: page.collection.clone(),
                    slug: page.slug.clone(),
                    first: pages[first].source.clone(),
                    second: page.source.clone(),
                });
            }
            Some(_) => {}
            None => {
                by_identity.insert(identity, idx);
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{page, page_with};
    use crate::types::MetaValue;
    use std::path::Path;

    fn config() -> SiteConfig {
        SiteConfig {
            locales: vec!["en".into(), "pt".into()],
            ..SiteConfig::default()
        }
    }

    #[test]
    fn default_locale_lesson() {
        let route = route_page(&page("en", "lesson", "intro"), &config());
        assert_eq!(route.public_url, "/lessons/intro/");
        assert_eq!(route.output_path, Path::new("lessons/intro/index.html"));
    }

    #[test]
    fn secondary_locale_lesson() {
        let route = route_page(&page("pt", "lesson", "intro"), &config());
        assert_eq!(route.public_url, "/pt/lessons/intro/");
        assert_eq!(route.output_path, Path::new("pt/lessons/intro/index.html"));
    }

    #[test]
    fn empty_segment_is_dropped() {
        let route = route_page(&page("en", "page", "about"), &config());
        assert_eq!(route.public_url, "/about/");
        assert_eq!(route.output_path, Path::new("about/index.html"));
    }

    #[test]
    fn unmapped_collection_uses_its_name() {
        let route = route_page(&page("pt", "guide", "setup"), &config());
        assert_eq!(route.public_url, "/pt/guide/setup/");
    }

    #[test]
    fn index_pages_route_to_collection_root() {
        let cfg = config();
        assert_eq!(route_page(&page("en", "page", "index"), &cfg).public_url, "/");
        assert_eq!(
            route_page(&page("en", "page", "index"), &cfg).output_path,
            Path::new("index.html")
        );
        assert_eq!(route_page(&page("pt", "page", "index"), &cfg).public_url, "/pt/");
        assert_eq!(
            route_page(&page("en", "lesson", "index"), &cfg).public_url,
            "/lessons/"
        );
    }

    #[test]
    fn permalink_stays_under_locale_prefix() {
        let cfg = config();
        let en = page_with("en", "lesson", "intro", |p| {
            p.metadata
                .insert("permalink", MetaValue::Text("start/here".into()));
        });
        let pt = page_with("pt", "lesson", "intro", |p| {
            p.metadata
                .insert("permalink", MetaValue::Text("/comece/".into()));
        });
        assert_eq!(route_page(&en, &cfg).public_url, "/start/here/");
        assert_eq!(route_page(&pt, &cfg).public_url, "/pt/comece/");
        assert_eq!(
            route_page(&pt, &cfg).output_path,
            Path::new("pt/comece/index.html")
        );
    }

    #[test]
    fn permalink_cannot_escape_output_root() {
        let p = page_with("en", "lesson", "x", |p| {
            p.metadata
                .insert("permalink", MetaValue::Text("../../etc".into()));
        });
        assert_eq!(route_page(&p, &config()).public_url, "/etc/");
    }

    #[test]
    fn base_path_prefixes_public_url_only() {
        let cfg = SiteConfig {
            base_path: "/repo".into(),
            ..config()
        };
        let route = route_page(&page("pt", "lesson", "intro"), &cfg);
        assert_eq!(route.public_url, "/repo/pt/lessons/intro/");
        assert_eq!(route.output_path, Path::new("pt/lessons/intro/index.html"));
        assert_eq!(route_page(&page("en", "page", "index"), &cfg).public_url, "/repo/");
    }

    #[test]
    fn permalink_starting_with_locale_is_rejected() {
        let cfg = config();
        let shadowing = page_with("en", "page", "about", |p| {
            p.source = PathBuf::from("_pages/about.md");
            p.metadata
                .insert("permalink", MetaValue::Text("/pt/sobre".into()));
        });
        let fine = page_with("en", "page", "contact", |p| {
            p.metadata
                .insert("permalink", MetaValue::Text("ptx/contact".into()));
        });
        let errors = check_permalinks(&[shadowing, fine], &cfg);
        assert_eq!(
            errors,
            vec![RouteError::LocalePermalink {
                page: PathBuf::from("_pages/about.md"),
                permalink: "/pt/sobre".into(),
                locale: "pt".into(),
            }]
        );
    }

    #[test]
    fn routing_is_deterministic() {
        let cfg = config();
        let pages = vec![
            page("en", "lesson", "intro"),
            page("pt", "lesson", "intro"),
            page("en", "page", "index"),
        ];
        let first: Vec<Route> = pages.iter().map(|p| route_page(p, &cfg)).collect();
        let second: Vec<Route> = pages.iter().map(|p| route_page(p, &cfg)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_pages_do_not_collide() {
        let cfg = config();
        let pages = vec![page("en", "lesson", "intro"), page("pt", "lesson", "intro")];
        let routes: Vec<Route> = pages.iter().map(|p| route_page(p, &cfg)).collect();
        assert!(check_collisions(&pages, &routes).is_empty());
    }

    #[test]
    fn collision_names_both_sources() {
        let cfg = config();
        let mut a = page("en", "lesson", "intro");
        a.source = PathBuf::from("_lessons/intro.md");
        let mut b = page("en", "lesson", "intro");
        b.source = PathBuf::from("_lessons/Intro.md");
        let pages = vec![a, b];
        let routes: Vec<Route> = pages.iter().map(|p| route_page(p, &cfg)).collect();

        let errors = check_collisions(&pages, &routes);
        assert_eq!(
            errors,
            vec![RouteError::Collision {
                output_path: PathBuf::from("lessons/intro/index.html"),
                first: PathBuf::from("_lessons/intro.md"),
                second: PathBuf::from("_lessons/Intro.md"),
            }]
        );
    }

    #[test]
    fn permalink_can_collide_with_generated_route() {
        let cfg = config();
        let a = page("en", "lesson", "intro");
        let b = page_with("en", "page", "other", |p| {
            p.metadata
                .insert("permalink", MetaValue::Text("lessons/intro".into()));
        });
        let pages = vec![a, b];
        let routes: Vec<Route> = pages.iter().map(|p| route_page(p, &cfg)).collect();
        let errors = check_collisions(&pages, &routes);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RouteError::Collision { .. }));
    }

    #[test]
    fn duplicate_identity_with_different_paths() {
        let cfg = config();
        let a = page("en", "lesson", "intro");
        let b = page_with("en", "lesson", "intro", |p| {
            p.source = PathBuf::from("_lessons/intro-copy.md");
            p.metadata
                .insert("permalink", MetaValue::Text("intro-again".into()));
        });
        let pages = vec![a, b];
        let routes: Vec<Route> = pages.iter().map(|p| route_page(p, &cfg)).collect();
        let errors = check_collisions(&pages, &routes);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            RouteError::DuplicatePage { slug, .. } if slug == "intro"
        ));
    }
}

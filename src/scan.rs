//! Content discovery.
//!
//! Stage 1 of the build pipeline. Walks one content root of one locale and
//! yields every eligible content file as a [`SourceFile`]. Nothing is parsed
//! here; the content builder turns each file into a page.
//!
//! ## Eligibility
//!
//! A file is yielded when:
//! - its extension is one of the configured content extensions (case-insensitive)
//! - no path component starts with `.` (hidden files and directories)
//! - it is not a symlink, so nothing outside the root is ever read
//! - its root-relative path does not fall under an `exclude` entry
//!
//! A missing root is an error. An empty root is not: it yields nothing.
//! A file that is not valid UTF-8 yields [`ScanError::Encoding`]; callers
//! treat it as a problem with that one file and keep going.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Content root does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid UTF-8: {source}")]
    Encoding {
        path: PathBuf,
        /// Path relative to the content root.
        relative: PathBuf,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// A discovered content file with its raw text.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Full path of the file.
    pub path: PathBuf,
    /// Path relative to the content root it was found under.
    pub relative: PathBuf,
    pub text: String,
}

impl SourceFile {
    /// Lowercased file extension, empty if none.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Discovery filters shared by every root.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions<'a> {
    pub extensions: &'a [String],
    pub exclude: &'a [String],
}

/// Walk `root` lazily, yielding every eligible file in file-name order.
///
/// Fails up front if `root` is missing or not a directory.
pub fn discover<'a>(
    root: &Path,
    options: ScanOptions<'a>,
) -> Result<impl Iterator<Item = Result<SourceFile, ScanError>> + 'a, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::MissingRoot(root.to_path_buf()));
    }

    let base = root.to_path_buf();
    let filter_base = base.clone();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| keep_entry(entry, &filter_base, options.exclude));

    Ok(walker.filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                let path = source.path().map(Path::to_path_buf).unwrap_or_default();
                return Some(Err(ScanError::Walk { path, source }));
            }
        };
        if !entry.file_type().is_file() || !has_extension(entry.path(), options.extensions) {
            return None;
        }
        Some(read_source(entry.path(), &base))
    }))
}

fn read_source(path: &Path, root: &Path) -> Result<SourceFile, ScanError> {
    let bytes = fs::read(path).map_err(|source| ScanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    let text = String::from_utf8(bytes).map_err(|source| ScanError::Encoding {
        path: path.to_path_buf(),
        relative: relative.clone(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "discovered content file");
    Ok(SourceFile {
        path: path.to_path_buf(),
        relative,
        text,
    })
}

/// Directory-level filter: prunes hidden entries, symlinks, and excluded paths.
fn keep_entry(entry: &DirEntry, root: &Path, exclude: &[String]) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    if entry.path_is_symlink() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return false;
    }
    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
    !is_excluded(relative, exclude)
}

/// An entry is excluded when its relative path starts with an exclude entry,
/// or any of its components equals one.
pub fn is_excluded(relative: &Path, exclude: &[String]) -> bool {
    exclude.iter().any(|pattern| {
        let pattern = pattern.trim_matches('/');
        if pattern.is_empty() {
            return false;
        }
        relative.starts_with(pattern)
            || relative
                .components()
                .any(|c| c.as_os_str().to_string_lossy() == pattern)
    })
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|e| {
            let ext = e.to_string_lossy();
            extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false)
}

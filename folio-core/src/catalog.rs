use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::refs::PageRef;

/// Raster formats eligible for the page catalog.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Candidate subdirectories, in preference order; the book directory itself
/// is the last resort.
const IMAGE_SUBDIRS: &[&str] = &["pages", "webp"];

/// One discovered page image: its path relative to the book directory plus
/// the reference decoded from the filename stem, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    pub file: String,
    pub reference: Option<PageRef>,
}

#[derive(Debug, Clone, Default)]
pub struct PageCatalog {
    /// Ordered pages; a page's position here is its canonical index.
    pub pages: Vec<CatalogPage>,
    /// Reference → index lookup. Pages with undecodable stems are kept in
    /// `pages` (manual or unlabeled captures still display) but contribute
    /// no entry here.
    pub index: HashMap<PageRef, usize>,
    /// The directory the images were actually found in.
    pub source_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no eligible images found; checked: {}", display_paths(.checked))]
    NoImages { checked: Vec<PathBuf> },
    #[error("failed to list {path}")]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Scans a book directory for page images.
///
/// The first candidate location yielding at least one eligible file wins.
/// An empty result across all candidates is a build failure, not a
/// recoverable state; the error carries every location that was checked.
pub fn scan_book_dir(dir: &Path) -> Result<PageCatalog, CatalogError> {
    let mut checked = Vec::new();
    for &sub in IMAGE_SUBDIRS {
        let candidate = dir.join(sub);
        checked.push(candidate.clone());
        if !candidate.is_dir() {
            continue;
        }
        let names = eligible_files(&candidate)?;
        if !names.is_empty() {
            debug!(dir = %candidate.display(), count = names.len(), "using image subdirectory");
            return Ok(build_catalog(names, Some(sub), candidate));
        }
    }

    checked.push(dir.to_path_buf());
    if dir.is_dir() {
        let names = eligible_files(dir)?;
        if !names.is_empty() {
            return Ok(build_catalog(names, None, dir.to_path_buf()));
        }
    }

    Err(CatalogError::NoImages { checked })
}

fn eligible_files(dir: &Path) -> Result<Vec<String>, CatalogError> {
    let list_err = |source| CatalogError::List {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !IMAGE_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort_by(|a, b| natural_cmp(a, b));
    Ok(names)
}

fn build_catalog(names: Vec<String>, prefix: Option<&str>, source_dir: PathBuf) -> PageCatalog {
    let mut pages = Vec::with_capacity(names.len());
    let mut index = HashMap::new();
    for (i, name) in names.into_iter().enumerate() {
        let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&name);
        let reference = PageRef::parse(stem);
        if let Some(reference) = reference {
            index.insert(reference, i);
        }
        let file = match prefix {
            Some(sub) => format!("{sub}/{name}"),
            None => name.clone(),
        };
        pages.push(CatalogPage { file, reference });
    }
    PageCatalog {
        pages,
        index,
        source_dir,
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Run {
    // Declared first so numeric runs sort before text runs, matching how a
    // leading-digit name orders against a leading-letter one.
    Number(u64),
    Text(String),
}

fn natural_key(s: &str) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut value: u64 = 0;
            while let Some(digit) = chars.peek().and_then(|d| d.to_digit(10)) {
                value = value.saturating_mul(10).saturating_add(u64::from(digit));
                chars.next();
            }
            runs.push(Run::Number(value));
        } else {
            let mut text = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    break;
                }
                text.extend(d.to_lowercase());
                chars.next();
            }
            runs.push(Run::Text(text));
        }
    }
    runs
}

/// Natural ordering: numeric runs compare as integers, everything else
/// case-insensitively, so `2-9-1` sorts before `2-10-1`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}

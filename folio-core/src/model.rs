use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::catalog::PageCatalog;
use crate::outline::Chapter;
use crate::refs::{ChapterKey, PageRef};

/// Name of the artifact the build step writes into the book directory.
pub const MANIFEST_FILE: &str = "book.json";

/// The assembled document model, serialized as a single payload for the
/// viewer to consume. The wire shape keeps the compact string references.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookManifest {
    /// Ordered page files, relative to the book directory.
    pub pages: Vec<String>,
    pub toc: Option<Vec<Chapter>>,
    #[serde_as(as = "HashMap<DisplayFromStr, _>")]
    #[serde(rename = "pageMap")]
    pub page_map: HashMap<PageRef, usize>,
}

/// Pure composition of the catalog and the outline. Nothing here can fail:
/// an outline entry referencing a page absent from the catalog resolves to
/// index 0 at lookup time instead of failing assembly.
pub fn assemble(catalog: PageCatalog, outline: Option<Vec<Chapter>>) -> BookManifest {
    let PageCatalog { pages, index, .. } = catalog;
    BookManifest {
        pages: pages.into_iter().map(|page| page.file).collect(),
        toc: outline,
        page_map: index,
    }
}

pub fn write_manifest(dir: &Path, manifest: &BookManifest) -> Result<PathBuf> {
    let path = dir.join(MANIFEST_FILE);
    let payload = serde_json::to_string(manifest)?;
    fs::write(&path, payload).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn read_manifest(dir: &Path) -> Result<BookManifest> {
    let path = dir.join(MANIFEST_FILE);
    let text =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to decode {}", path.display()))
}

/// The runtime view over a manifest: the same data plus derived lookups.
/// Immutable once constructed; the navigation session only indexes into it.
#[derive(Debug)]
pub struct DocumentModel {
    manifest: BookManifest,
    refs: Vec<Option<PageRef>>,
    chapters: HashMap<ChapterKey, usize>,
    chapter_pages: HashMap<ChapterKey, usize>,
}

impl DocumentModel {
    pub fn new(manifest: BookManifest) -> Self {
        let refs: Vec<Option<PageRef>> = manifest
            .pages
            .iter()
            .map(|file| PageRef::parse(file_stem(file)))
            .collect();

        let mut chapters = HashMap::new();
        if let Some(toc) = &manifest.toc {
            for (i, chapter) in toc.iter().enumerate() {
                chapters.entry(chapter.key).or_insert(i);
            }
        }

        let mut chapter_pages: HashMap<ChapterKey, usize> = HashMap::new();
        for reference in refs.iter().flatten() {
            *chapter_pages.entry(reference.chapter_key()).or_default() += 1;
        }

        Self {
            manifest,
            refs,
            chapters,
            chapter_pages,
        }
    }

    pub fn manifest(&self) -> &BookManifest {
        &self.manifest
    }

    pub fn page_count(&self) -> usize {
        self.manifest.pages.len()
    }

    pub fn page_file(&self, index: usize) -> Option<&str> {
        self.manifest.pages.get(index).map(String::as_str)
    }

    /// The reference decoded from the page's filename stem, if any.
    pub fn page_ref(&self, index: usize) -> Option<PageRef> {
        self.refs.get(index).copied().flatten()
    }

    /// Resolves a reference to its page index, falling back to index 0 for
    /// references the catalog does not know. The fallback is lossy but
    /// deliberate: a stale outline must never break navigation.
    pub fn resolve(&self, reference: PageRef) -> usize {
        self.manifest.page_map.get(&reference).copied().unwrap_or(0)
    }

    pub fn outline(&self) -> Option<&[Chapter]> {
        self.manifest.toc.as_deref()
    }

    pub fn chapter(&self, key: ChapterKey) -> Option<&Chapter> {
        let index = *self.chapters.get(&key)?;
        self.manifest.toc.as_deref()?.get(index)
    }

    /// How many catalog pages share `key`'s chapter.
    pub fn chapter_page_count(&self, key: ChapterKey) -> usize {
        self.chapter_pages.get(&key).copied().unwrap_or(0)
    }
}

fn file_stem(file: &str) -> &str {
    let name = file.rsplit('/').next().unwrap_or(file);
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub chapter: Option<ChapterCrumb>,
    pub page_label: String,
    pub total_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterCrumb {
    pub key: ChapterKey,
    pub label: String,
}

/// Derives the breadcrumb for the current page. Pages whose stems carry no
/// reference fall back to a plain position over the whole catalog.
pub fn breadcrumb(model: &DocumentModel, index: usize) -> Breadcrumb {
    let Some(current) = model.page_ref(index) else {
        return Breadcrumb {
            chapter: None,
            page_label: format!("{}", index + 1),
            total_label: format!("/ {}", model.page_count()),
        };
    };

    let key = current.chapter_key();
    let label = match model.chapter(key) {
        Some(chapter) => format!("Ch{}: {}", current.chapter, chapter.name),
        None => format!("Ch {}", current.chapter),
    };
    let page_label = if current.page == 1 {
        "Contents".to_string()
    } else {
        format!("p.{}", current.page)
    };

    Breadcrumb {
        chapter: Some(ChapterCrumb { key, label }),
        page_label,
        total_label: format!("/ {}", model.chapter_page_count(key)),
    }
}

/// Which outline entries the sidebar should mark for the current page: the
/// page's chapter (at most one chapter is ever open) and, within it, the
/// nearest section at or before the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutlineHighlight {
    pub chapter: Option<ChapterKey>,
    /// Index into the open chapter's `sections`.
    pub section: Option<usize>,
}

pub fn outline_highlight(model: &DocumentModel, index: usize) -> OutlineHighlight {
    let Some(current) = model.page_ref(index) else {
        return OutlineHighlight::default();
    };
    let key = current.chapter_key();
    let Some(chapter) = model.chapter(key) else {
        return OutlineHighlight::default();
    };

    let mut best = None;
    let mut best_distance = usize::MAX;
    for (i, section) in chapter.sections.iter().enumerate() {
        let section_index = model.resolve(section.page);
        if section_index > index {
            continue;
        }
        let distance = index - section_index;
        if distance < best_distance {
            best = Some(i);
            best_distance = distance;
        }
    }

    OutlineHighlight {
        chapter: Some(key),
        section: best,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::outline::parse_outline_text;

    fn manifest_for(files: &[&str], outline_text: &str) -> BookManifest {
        let mut page_map = HashMap::new();
        for (i, file) in files.iter().enumerate() {
            if let Some(reference) = PageRef::parse(file_stem(file)) {
                page_map.insert(reference, i);
            }
        }
        let chapters = parse_outline_text(outline_text);
        BookManifest {
            pages: files.iter().map(|f| f.to_string()).collect(),
            toc: if chapters.is_empty() {
                None
            } else {
                Some(chapters)
            },
            page_map,
        }
    }

    fn chapter_fixture() -> DocumentModel {
        let files: Vec<String> = (1..=20)
            .map(|p| format!("pages/3-04-{p:02}.webp"))
            .collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        DocumentModel::new(manifest_for(
            &refs,
            "CH 3-04 | Algebra\n01 | Opening\n03 | Terms\n11 | Factoring\n18 | Review\n",
        ))
    }

    #[test]
    fn resolve_falls_back_to_index_zero() {
        let model = DocumentModel::new(manifest_for(&["pages/1-01-01.webp"], ""));
        assert_eq!(model.resolve(PageRef::new(1, 1, 1)), 0);
        assert_eq!(model.resolve(PageRef::new(9, 9, 9)), 0);
    }

    #[test]
    fn breadcrumb_uses_the_chapter_name_when_the_outline_has_it() {
        let model = chapter_fixture();
        let crumb = breadcrumb(&model, 14);
        assert_eq!(crumb.chapter.as_ref().unwrap().label, "Ch4: Algebra");
        assert_eq!(crumb.page_label, "p.15");
        assert_eq!(crumb.total_label, "/ 20");
    }

    #[test]
    fn breadcrumb_falls_back_to_a_bare_chapter_number() {
        let model = DocumentModel::new(manifest_for(&["pages/2-05-01.webp"], ""));
        let crumb = breadcrumb(&model, 0);
        assert_eq!(crumb.chapter.as_ref().unwrap().label, "Ch 5");
        assert_eq!(crumb.page_label, "Contents");
        assert_eq!(crumb.total_label, "/ 1");
    }

    #[test]
    fn breadcrumb_without_a_reference_shows_the_global_position() {
        let model = DocumentModel::new(manifest_for(&["cover.webp", "pages/1-01-01.webp"], ""));
        let crumb = breadcrumb(&model, 0);
        assert_eq!(crumb.chapter, None);
        assert_eq!(crumb.page_label, "1");
        assert_eq!(crumb.total_label, "/ 2");
    }

    #[test]
    fn highlight_picks_the_nearest_section_at_or_before_the_position() {
        let model = chapter_fixture();
        // Page 15 sits between the sections at pages 11 and 18.
        let index = model.resolve(PageRef::new(3, 4, 15));
        let highlight = outline_highlight(&model, index);
        assert_eq!(highlight.chapter, Some(ChapterKey::new(3, 4)));
        assert_eq!(highlight.section, Some(2));
    }

    #[test]
    fn highlight_is_empty_before_the_first_section() {
        let files: Vec<String> = (1..=9).map(|p| format!("pages/1-01-{p:02}.webp")).collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let model = DocumentModel::new(manifest_for(&refs, "CH 1-01 | C\n05 | Late start\n"));

        let highlight = outline_highlight(&model, 2);
        assert_eq!(highlight.chapter, Some(ChapterKey::new(1, 1)));
        assert_eq!(highlight.section, None);

        assert_eq!(outline_highlight(&model, 4).section, Some(0));
    }

    #[test]
    fn highlight_without_an_outline_chapter_marks_nothing() {
        let model = DocumentModel::new(manifest_for(&["pages/7-01-01.webp"], "CH 1-01 | Other\n"));
        assert_eq!(outline_highlight(&model, 0), OutlineHighlight::default());
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let model = chapter_fixture();
        let json = serde_json::to_string(model.manifest()).unwrap();
        let back: BookManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pages, model.manifest().pages);
        assert_eq!(back.page_map, model.manifest().page_map);
        assert_eq!(back.toc, model.manifest().toc);
    }

    #[test]
    fn write_and_read_manifest_use_the_artifact_name() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_for(&["pages/1-01-01.webp"], "CH 1-01 | Intro\n");
        let path = write_manifest(dir.path(), &manifest).unwrap();
        assert_eq!(path.file_name().unwrap(), MANIFEST_FILE);

        let back = read_manifest(dir.path()).unwrap();
        assert_eq!(back.pages, manifest.pages);
    }

    #[test]
    fn end_to_end_assembly_resolves_outline_sections() {
        use crate::catalog::scan_book_dir;
        use crate::outline::load_outline;

        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("pages");
        fs::create_dir(&pages).unwrap();
        for p in 1..=5 {
            fs::write(pages.join(format!("1-01-{p:02}.webp")), b"x").unwrap();
        }
        fs::write(dir.path().join("toc.txt"), "CH 1-01 | Intro\n03 | Middle\n").unwrap();

        let catalog = scan_book_dir(dir.path()).unwrap();
        let outline = load_outline(dir.path()).map(|(chapters, _)| chapters);
        let model = DocumentModel::new(assemble(catalog, outline));

        assert_eq!(model.resolve(PageRef::new(1, 1, 3)), 2);
        let crumb = breadcrumb(&model, 2);
        assert_eq!(crumb.chapter.as_ref().unwrap().label, "Ch1: Intro");
        assert_eq!(crumb.page_label, "p.3");
        let highlight = outline_highlight(&model, 2);
        let chapter = model.chapter(highlight.chapter.unwrap()).unwrap();
        assert_eq!(chapter.sections[highlight.section.unwrap()].name, "Middle");
    }
}

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A `book-chapter-page` triple identifying one captured page.
///
/// The canonical textual form zero-pads chapter and page to two digits
/// (`3-04-25`); the book number is never padded. Chapters or pages above 99
/// render with more digits, so the textual form is only bijective with the
/// triple up to two-digit components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageRef {
    pub book: u32,
    pub chapter: u32,
    pub page: u32,
}

/// The first two components of a [`PageRef`], used as the join key between
/// catalog pages and outline chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChapterKey {
    pub book: u32,
    pub chapter: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("not a page reference: {0:?}")]
pub struct ParseRefError(pub String);

impl PageRef {
    pub fn new(book: u32, chapter: u32, page: u32) -> Self {
        Self {
            book,
            chapter,
            page,
        }
    }

    /// Decodes a filename stem against the strict `\d+-\d+-\d+` grammar.
    ///
    /// Returns `None` rather than an error: catalogs may contain incidental
    /// images whose names simply are not references.
    pub fn parse(stem: &str) -> Option<Self> {
        let mut components = stem.split('-');
        let book = parse_component(components.next()?)?;
        let chapter = parse_component(components.next()?)?;
        let page = parse_component(components.next()?)?;
        if components.next().is_some() {
            return None;
        }
        Some(Self::new(book, chapter, page))
    }

    pub fn chapter_key(&self) -> ChapterKey {
        ChapterKey {
            book: self.book,
            chapter: self.chapter,
        }
    }
}

impl ChapterKey {
    pub fn new(book: u32, chapter: u32) -> Self {
        Self { book, chapter }
    }

    /// The reference of page `page` within this chapter.
    pub fn page(&self, page: u32) -> PageRef {
        PageRef::new(self.book, self.chapter, page)
    }
}

fn parse_component(component: &str) -> Option<u32> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    component.parse().ok()
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}-{:02}", self.book, self.chapter, self.page)
    }
}

impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.book, self.chapter)
    }
}

impl FromStr for PageRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ParseRefError(s.to_string()))
    }
}

impl FromStr for ChapterKey {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRefError(s.to_string());
        let (book, chapter) = s.split_once('-').ok_or_else(err)?;
        match (parse_component(book), parse_component(chapter)) {
            (Some(book), Some(chapter)) => Ok(Self::new(book, chapter)),
            _ => Err(err()),
        }
    }
}

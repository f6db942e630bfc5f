use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use tracing::{debug, warn};

use crate::refs::{ChapterKey, PageRef};

/// One outline chapter in canonical form, shared by both source grammars.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde_as(as = "DisplayFromStr")]
    #[serde(rename = "ref")]
    pub key: ChapterKey,
    pub number: u32,
    pub name: String,
    /// The page the outline jumps to when the chapter heading itself is
    /// activated. Defaults to the chapter's page 01.
    #[serde_as(as = "DisplayFromStr")]
    pub toc: PageRef,
    pub sections: Vec<Section>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    #[serde_as(as = "DisplayFromStr")]
    pub page: PageRef,
    /// Absent means "none specified"; an explicit empty list is never
    /// stored, so downstream consumers can tell the two apart.
    #[serde(rename = "lo", default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlineSource {
    Text,
    Json,
}

impl OutlineSource {
    pub fn file_name(&self) -> &'static str {
        match self {
            OutlineSource::Text => "toc.txt",
            OutlineSource::Json => "toc.json",
        }
    }
}

/// Parses the human-editable line grammar.
///
/// Blank lines and `#` comments are skipped; trailing ` `, `!` and `~` are
/// manual annotation flags with no parsed meaning. A malformed line is
/// dropped and parsing continues; one bad line never invalidates the
/// document. Chapters come back in file order, never re-sorted.
pub fn parse_outline_text(input: &str) -> Vec<Chapter> {
    let mut chapters: Vec<Chapter> = Vec::new();
    let mut current_book: Option<u32> = None;

    for raw in input.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let clean = line.trim_end_matches(|c| c == ' ' || c == '!' || c == '~');
        let parts: Vec<&str> = clean.split('|').map(str::trim).collect();
        let head = parts[0];
        let upper = head.to_uppercase();

        // BOOK <n> is the legacy form; it only sets the current-book register.
        if upper.starts_with("BOOK") {
            match head.split_whitespace().nth(1).map(str::parse::<u32>) {
                Some(Ok(book)) => current_book = Some(book),
                _ => debug!(line = raw, "dropping malformed book line"),
            }
            continue;
        }

        // CH <num> | name (legacy, needs the register) or
        // CH <book>-<num> | name (self-contained, updates the register).
        if upper.starts_with("CH") {
            let Some(token) = head.split_whitespace().nth(1) else {
                debug!(line = raw, "dropping malformed chapter line");
                continue;
            };
            let number = if let Some((book, number)) = token.split_once('-') {
                match (book.parse::<u32>(), number.parse::<u32>()) {
                    (Ok(book), Ok(number)) => {
                        current_book = Some(book);
                        Some(number)
                    }
                    _ => None,
                }
            } else {
                token.parse::<u32>().ok()
            };
            let Some(number) = number else {
                debug!(line = raw, "dropping malformed chapter line");
                continue;
            };
            let Some(book) = current_book else {
                debug!(line = raw, "skipping chapter with no book in effect");
                continue;
            };
            let key = ChapterKey::new(book, number);
            chapters.push(Chapter {
                key,
                number,
                name: parts.get(1).map(|s| s.to_string()).unwrap_or_default(),
                toc: key.page(1),
                sections: Vec::new(),
            });
            continue;
        }

        // <page> | name | lo1, lo2, ... adds a section to the open chapter.
        if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) {
            let Some(chapter) = chapters.last_mut() else {
                // Section line before any chapter: dropped silently.
                continue;
            };
            let Ok(page_number) = head.parse::<u32>() else {
                debug!(line = raw, "dropping section with oversized page number");
                continue;
            };
            let name = parts
                .get(1)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("Page {page_number}"));
            let objectives = parts
                .get(2)
                .map(|field| {
                    field
                        .split(',')
                        .map(str::trim)
                        .filter(|objective| !objective.is_empty())
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .filter(|objectives| !objectives.is_empty());
            chapter.sections.push(Section {
                name,
                page: chapter.key.page(page_number),
                objectives,
            });
            continue;
        }

        debug!(line = raw, "dropping unrecognized outline line");
    }

    chapters
}

/// Emits the canonical line grammar for `chapters`; parsing the result
/// reproduces the same chapter list.
pub fn render_outline_text(chapters: &[Chapter]) -> String {
    let mut out = String::new();
    for chapter in chapters {
        out.push_str(&format!(
            "CH {}-{:02} | {}\n",
            chapter.key.book, chapter.number, chapter.name
        ));
        for section in &chapter.sections {
            out.push_str(&format!("{:02} | {}", section.page.page, section.name));
            if let Some(objectives) = &section.objectives {
                out.push_str(" | ");
                out.push_str(&objectives.join(", "));
            }
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

#[derive(Debug, Deserialize)]
struct BookNode {
    #[serde(default)]
    book: u32,
    #[serde(default)]
    chapters: Vec<ChapterNode>,
}

#[derive(Debug, Deserialize)]
struct ChapterNode {
    number: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    toc: Option<String>,
    #[serde(default)]
    sections: Vec<SectionNode>,
}

#[derive(Debug, Deserialize)]
struct SectionNode {
    #[serde(default)]
    name: String,
    page: String,
    #[serde(default)]
    lo: Option<Vec<String>>,
}

/// Flattens the structured fallback (`book → chapters[] → sections[]`) into
/// the same chapter list the primary grammar produces.
pub fn parse_outline_json(input: &str) -> Result<Vec<Chapter>, serde_json::Error> {
    let books: Vec<BookNode> = serde_json::from_str(input)?;
    let mut chapters = Vec::new();
    for book in books {
        for node in book.chapters {
            let key = ChapterKey::new(book.book, node.number);
            let toc = node
                .toc
                .as_deref()
                .and_then(PageRef::parse)
                .unwrap_or_else(|| key.page(1));
            let mut sections = Vec::new();
            for section in node.sections {
                let Some(page) = PageRef::parse(&section.page) else {
                    debug!(
                        page = section.page.as_str(),
                        "dropping section with unparseable page reference"
                    );
                    continue;
                };
                sections.push(Section {
                    name: section.name,
                    page,
                    objectives: section.lo.filter(|objectives| !objectives.is_empty()),
                });
            }
            chapters.push(Chapter {
                key,
                number: node.number,
                name: node.name,
                toc,
                sections,
            });
        }
    }
    Ok(chapters)
}

/// Loads the outline for a book directory.
///
/// The editable `toc.txt` always wins when it yields at least one chapter;
/// only an empty or absent primary source consults `toc.json`, so partial
/// hand edits are never overridden by a stale structured fallback. `None`
/// means "no outline available", which is not an error.
pub fn load_outline(dir: &Path) -> Option<(Vec<Chapter>, OutlineSource)> {
    let primary = dir.join(OutlineSource::Text.file_name());
    if primary.exists() {
        match fs::read_to_string(&primary) {
            Ok(text) => {
                let chapters = parse_outline_text(&text);
                if !chapters.is_empty() {
                    return Some((chapters, OutlineSource::Text));
                }
            }
            Err(err) => warn!(?err, path = %primary.display(), "failed to read outline"),
        }
    }

    let fallback = dir.join(OutlineSource::Json.file_name());
    if fallback.exists() {
        match fs::read_to_string(&fallback) {
            Ok(text) => match parse_outline_json(&text) {
                Ok(chapters) if !chapters.is_empty() => {
                    return Some((chapters, OutlineSource::Json));
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(?err, path = %fallback.display(), "failed to parse fallback outline")
                }
            },
            Err(err) => warn!(?err, path = %fallback.display(), "failed to read fallback outline"),
        }
    }

    None
}

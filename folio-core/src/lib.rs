pub mod catalog;
pub mod config;
pub mod model;
pub mod outline;
pub mod refs;
pub mod session;
pub mod store;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

pub use catalog::{natural_cmp, scan_book_dir, CatalogError, CatalogPage, PageCatalog};
pub use config::ViewerConfig;
pub use model::{
    assemble, breadcrumb, outline_highlight, read_manifest, write_manifest, BookManifest,
    Breadcrumb, ChapterCrumb, DocumentModel, OutlineHighlight, MANIFEST_FILE,
};
pub use outline::{
    load_outline, parse_outline_json, parse_outline_text, render_outline_text, Chapter,
    OutlineSource, Section,
};
pub use refs::{ChapterKey, PageRef, ParseRefError};
pub use session::{
    deep_link_page, resolve_initial_state, Command, FitMode, ImmersiveMode, ImmersiveSurface,
    NoNativeSurface, PanOutcome, PersistedViewerState, SessionEvent, ViewerSession, ViewerState,
    REVEAL_WINDOW, ZOOM_MAX, ZOOM_MIN,
};
pub use store::{book_id_for_path, BookId, FileStateStore, MemoryStateStore, StateStore};

/// One decoded page, RGBA8, row-major.
#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub index: usize,
}

/// Decodes pages of one opened book.
pub trait PageBackend: Send + Sync {
    fn page_count(&self) -> usize;
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;
}

#[async_trait::async_trait]
pub trait PageProvider: Send + Sync {
    async fn open(&self, dir: &Path, manifest: &BookManifest) -> Result<Arc<dyn PageBackend>>;
}

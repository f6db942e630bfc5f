use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use folio_core::{BookManifest, PageBackend, PageProvider, RenderImage, RenderRequest};
use parking_lot::Mutex;
use tracing::debug;

/// Opens a book directory and serves its raster pages as RGBA frames.
#[derive(Default)]
pub struct ImageRenderFactory;

impl ImageRenderFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PageProvider for ImageRenderFactory {
    async fn open(&self, dir: &Path, manifest: &BookManifest) -> Result<Arc<dyn PageBackend>> {
        let root = dir
            .canonicalize()
            .with_context(|| format!("failed to resolve book directory {}", dir.display()))?;
        let paths: Vec<PathBuf> = manifest.pages.iter().map(|page| root.join(page)).collect();
        Ok(Arc::new(ImageBackend {
            paths,
            last: Mutex::new(None),
        }))
    }
}

struct ImageBackend {
    paths: Vec<PathBuf>,
    // The session keeps its own neighborhood cache; this only smooths
    // repeated redraws of the same page (resize, overlay churn).
    last: Mutex<Option<CachedPage>>,
}

struct CachedPage {
    index: usize,
    image: RenderImage,
}

impl PageBackend for ImageBackend {
    fn page_count(&self) -> usize {
        self.paths.len()
    }

    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        let path = self
            .paths
            .get(request.index)
            .ok_or_else(|| anyhow!("page {} out of range", request.index))?;

        if let Some(cached) = self.last.lock().as_ref() {
            if cached.index == request.index {
                return Ok(cached.image.clone());
            }
        }

        debug!(index = request.index, path = %path.display(), "decoding page");
        let image = decode_page(path)?;
        *self.last.lock() = Some(CachedPage {
            index: request.index,
            image: image.clone(),
        });
        Ok(image)
    }
}

fn decode_page(path: &Path) -> Result<RenderImage> {
    let decoded = image::ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to probe image format of {}", path.display()))?
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    let rgba = decoded.to_rgba8();
    Ok(RenderImage {
        width: rgba.width(),
        height: rgba.height(),
        pixels: rgba.into_raw(),
    })
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use citelens_core::{PageText, PageTextLayer, RenderImage, TextRun};
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

/// Binds Pdfium from `library_path` when given, else from the working
/// directory, else from the system library search path.
pub fn bind_pdfium(library_path: Option<&Path>) -> Result<Arc<Pdfium>> {
    let mut errors = Vec::new();

    if let Some(path) = library_path {
        match Pdfium::bind_to_library(path) {
            Ok(bindings) => return Ok(Arc::new(Pdfium::new(bindings))),
            Err(err) => {
                warn!("failed to load Pdfium from configured path {:?}: {}", path, err);
                errors.push(format!("{}: {}", path.display(), err));
            }
        }
    }

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Arc::new(Pdfium::new(bindings))),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Arc::new(Pdfium::new(bindings))),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}

/// A PDF on disk. Each call reopens the file, so the handle stays cheap to
/// share between tasks.
pub struct PdfiumDocument {
    pdfium: Arc<Pdfium>,
    path: PathBuf,
    page_count: u32,
}

impl PdfiumDocument {
    pub fn open(pdfium: Arc<Pdfium>, path: &Path) -> Result<Self> {
        let path = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let page_count = {
            let document = pdfium
                .load_pdf_from_file(&path, None)
                .with_context(|| format!("failed to open {:?}", path))?;
            u32::try_from(document.pages().len()).unwrap_or_default()
        };
        debug!(path = %path.display(), page_count, "opened document");
        Ok(Self {
            pdfium,
            path,
            page_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    fn with_page<R, F>(&self, page: u32, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        if page == 0 || page > self.page_count {
            return Err(anyhow!(
                "page {} out of range (document has {} pages)",
                page,
                self.page_count
            ));
        }
        let index: PdfPageIndex = (page - 1)
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page))?;
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        let pdf_page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page))?;
        f(&pdf_page)
    }

    /// Native page size in PDF points.
    pub fn page_size(&self, page: u32) -> Result<(f64, f64)> {
        self.with_page(page, |pdf_page| {
            Ok((pdf_page.width().value as f64, pdf_page.height().value as f64))
        })
    }

    /// Renders `page` so that its width matches `canvas_width` pixels.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn render_page(&self, page: u32, canvas_width: u32) -> Result<RenderImage> {
        self.with_page(page, |pdf_page| {
            let native_width = pdf_page.width().value;
            if native_width <= 0.0 {
                return Err(anyhow!("page {} has no width", page));
            }
            let factor = canvas_width as f32 / native_width;
            let config = PdfRenderConfig::new().scale_page_by_factor(factor.max(0.01));
            let bitmap = pdf_page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", page))?;
            let image = bitmap.as_image().to_rgba8();
            Ok(RenderImage {
                width: image.width(),
                height: image.height(),
                pixels: image.into_raw(),
            })
        })
    }

    fn extract_text(&self, page: u32) -> Result<PageText> {
        self.with_page(page, |pdf_page| {
            let text = pdf_page
                .text()
                .with_context(|| format!("failed to load text layer of page {}", page))?;
            let runs = text
                .segments()
                .iter()
                .map(|segment| {
                    let bounds = segment.bounds();
                    let left = bounds.left().value as f64;
                    let bottom = bounds.bottom().value as f64;
                    TextRun {
                        text: segment.text(),
                        left,
                        bottom,
                        width: bounds.right().value as f64 - left,
                        height: bounds.top().value as f64 - bottom,
                    }
                })
                .collect();
            Ok(PageText {
                native_width: pdf_page.width().value as f64,
                native_height: pdf_page.height().value as f64,
                runs,
            })
        })
    }
}

#[async_trait]
impl PageTextLayer for PdfiumDocument {
    async fn page_text(&self, page: u32) -> Result<PageText> {
        self.extract_text(page)
    }
}

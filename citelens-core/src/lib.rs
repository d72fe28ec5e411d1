//! Citation resolution and highlight localization.
//!
//! A citation emitted by a chat answer is parsed ([`citation`]), matched to a
//! concrete document and page ([`matcher`]), and once the page is rendered the
//! cited passage is located on it ([`locator`]), first through the digital text
//! layer and then through stored OCR layout data ([`resolver`]).

pub mod blob;
pub mod cancel;
pub mod citation;
pub mod config;
pub mod error;
pub mod keywords;
pub mod locator;
pub mod matcher;
pub mod ocr;
pub mod resolver;
pub mod scale;

use serde::{Deserialize, Serialize};

pub use blob::{BlobStore, DirBlobStore, MemoryBlobStore};
pub use cancel::CancelToken;
pub use citation::{parse_citation, Citation};
pub use config::EngineConfig;
pub use error::{BlobError, Cancelled};
pub use locator::{
    CanvasRect, Highlight, HighlightLocator, HighlightTracker, LocateKey, LocateRequest,
    PageText, PageTextLayer, ScoredPolygon, TextRun,
};
pub use matcher::{
    FileOwnerIndex, MatchContext, MatcherOptions, OpenDocument, OpenDocumentState, Resolution,
    ResultMatcher, Strategy,
};
pub use ocr::{OcrLine, OcrPage};
pub use resolver::{FolderRules, OcrLayoutResolver, OcrLookup, OcrQuery};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResult {
    pub filename: String,
    pub page: u32,
    pub blob_path: String,
    pub user_id: String,
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub score: f64,
    pub content: String,
    pub highlight: Option<String>,
}

impl SearchResult {
    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            user_id: self.user_id.clone(),
            filename: self.filename.clone(),
            page: self.page,
            blob_path: self.blob_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMeta {
    pub user_id: String,
    pub filename: String,
    pub page: u32,
    pub blob_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowsedFile {
    pub filename: String,
    pub blob_path: String,
    pub user_id: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_drawable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Clamps a 1-based page number into `[1, total]`. A `total` of `None` or zero
/// only enforces the lower bound.
pub fn clamp_page(page: u32, total: Option<u32>) -> u32 {
    let page = page.max(1);
    match total {
        Some(total) if total > 0 => page.min(total),
        _ => page,
    }
}

//! Page rendering and text extraction backed by Pdfium, plus highlight
//! painting for rendered pages.

pub mod overlay;
#[cfg(feature = "pdf")]
mod pdfium;

pub use overlay::{encode_png, paint_highlight, write_png, HighlightStyle};
#[cfg(feature = "pdf")]
pub use pdfium::{bind_pdfium, PdfiumDocument};

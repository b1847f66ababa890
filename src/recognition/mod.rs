//! Per-page recognition: page counting, rasterization, barcode decoding and
//! text extraction.
//!
//! Tool backends sit behind small traits:
//! - [`PageCounter`]: pdfinfo
//! - [`PageRasterizer`]: pdftoppm (default) or Ghostscript
//! - [`BarcodeDecoder`]: zbarimg
//! - [`TextLayerExtractor`]: pdftotext
//! - [`OcrEngine`]: Tesseract
//!
//! [`PageImages`], [`BarcodeReader`] and [`TextExtractor`] wrap them with
//! per-run caches keyed by `(document hash, page, kind)`. Recognition failures
//! degrade to "nothing recognized" rather than errors.

mod barcode;
mod page_count;
mod raster;
mod text;

use std::path::{Path, PathBuf};

pub use barcode::{BarcodeDecoder, BarcodeReader, ZbarDecoder};
pub use page_count::{PageCounter, PdfInfoPageCounter};
pub use raster::{GhostscriptRasterizer, PageImages, PageRasterizer, PdftoppmRasterizer};
pub use text::{normalize_whitespace, OcrEngine, PdftotextExtractor, TesseractOcr, TextExtractor, TextLayerExtractor};

/// The document being processed: its path and content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub hash: String,
}

impl SourceDocument {
    pub fn new(path: &Path, hash: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            hash: hash.to_string(),
        }
    }

    /// Short hash prefix used in file and directory names.
    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(16)]
    }
}

//! Text extraction from PDF pages using pdftotext and Tesseract.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::PageImages;
use crate::cache::{CacheKind, PageCache};
use crate::tools::{ToolCommand, ToolError, ToolRunner};

/// Collapse every run of whitespace into one space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts a page's embedded text layer.
pub trait TextLayerExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn page_text(&self, pdf: &Path, page: u32) -> Result<String, ToolError>;
}

/// Recognizes text in an image.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn ocr_image(&self, image: &Path, language: &str) -> Result<String, ToolError>;
}

/// Poppler's pdftotext, one page at a time.
pub struct PdftotextExtractor {
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
}

impl PdftotextExtractor {
    pub fn new(runner: Arc<dyn ToolRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl TextLayerExtractor for PdftotextExtractor {
    fn name(&self) -> &'static str {
        "pdftotext"
    }

    fn page_text(&self, pdf: &Path, page: u32) -> Result<String, ToolError> {
        let page_str = page.to_string();
        let cmd = ToolCommand::new("pdftotext", self.timeout)
            .args(["-layout", "-enc", "UTF-8", "-f", page_str.as_str(), "-l", page_str.as_str()])
            .path_arg(pdf)
            .arg("-"); // Output to stdout
        Ok(self.runner.run(&cmd)?.into_success("pdftotext")?.stdout)
    }
}

/// Tesseract OCR via command-line.
pub struct TesseractOcr {
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(runner: Arc<dyn ToolRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn ocr_image(&self, image: &Path, language: &str) -> Result<String, ToolError> {
        let cmd = ToolCommand::new("tesseract", self.timeout)
            .path_arg(image)
            .arg("stdout")
            .args(["-l", language]);
        Ok(self.runner.run(&cmd)?.into_success("tesseract")?.stdout)
    }
}

/// Page text with OCR fallback, cached by `(hash, page, method)`.
pub struct TextExtractor {
    images: Arc<PageImages>,
    text_layer: Arc<dyn TextLayerExtractor>,
    ocr: Arc<dyn OcrEngine>,
    language: String,
    /// Minimum characters of direct text before OCR is skipped.
    min_direct_chars: usize,
    direct: PageCache<String>,
    ocr_text: PageCache<String>,
}

impl TextExtractor {
    pub fn new(
        images: Arc<PageImages>,
        text_layer: Arc<dyn TextLayerExtractor>,
        ocr: Arc<dyn OcrEngine>,
        language: &str,
        min_direct_chars: usize,
    ) -> Self {
        Self {
            images,
            text_layer,
            ocr,
            language: language.to_string(),
            min_direct_chars,
            direct: PageCache::new(CacheKind::DirectText),
            ocr_text: PageCache::new(CacheKind::OcrText),
        }
    }

    fn hash(&self) -> &str {
        &self.images.document().hash
    }

    /// Normalized text layer of `page`; empty if extraction fails.
    pub fn extract_direct_text(&self, page: u32) -> String {
        self.direct.get_or_compute(self.hash(), page, || {
            let pdf = &self.images.document().path;
            match self.text_layer.page_text(pdf, page) {
                Ok(text) => normalize_whitespace(&text),
                Err(e) => {
                    tracing::warn!("{} failed on page {}: {}", self.text_layer.name(), page, e);
                    e.log_details();
                    String::new()
                }
            }
        })
    }

    /// Normalized OCR text of `page`'s rasterized image; empty if unavailable.
    pub fn extract_ocr_text(&self, page: u32) -> String {
        self.ocr_text.get_or_compute(self.hash(), page, || {
            let Some(image) = self.images.image_for(page) else {
                return String::new();
            };
            match self.ocr.ocr_image(&image, &self.language) {
                Ok(text) => normalize_whitespace(&text),
                Err(e) => {
                    tracing::warn!("{} failed on page {}: {}", self.ocr.name(), page, e);
                    e.log_details();
                    String::new()
                }
            }
        })
    }

    /// Direct text when it has enough content, otherwise OCR text.
    pub fn extract_best_text(&self, page: u32) -> String {
        let direct = self.extract_direct_text(page);
        if direct.chars().count() >= self.min_direct_chars {
            return direct;
        }
        tracing::debug!(
            "Page {} has {} chars of direct text, falling back to OCR",
            page,
            direct.chars().count()
        );
        let ocr = self.extract_ocr_text(page);
        if ocr.is_empty() {
            direct
        } else {
            ocr
        }
    }
}

//! Per-run state: scratch directory and recognition caches.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use super::{PipelineError, Toolchain};
use crate::config::Settings;
use crate::recognition::{BarcodeReader, PageImages, SourceDocument, TextExtractor};

/// Everything one run keeps for a document.
///
/// The scratch directory (and every page image in it) is removed when the
/// session is dropped.
pub struct RunSession {
    workspace: TempDir,
    barcodes: BarcodeReader,
    text: TextExtractor,
}

impl RunSession {
    pub fn open(
        tools: &Toolchain,
        settings: &Settings,
        document: SourceDocument,
    ) -> Result<Self, PipelineError> {
        fs::create_dir_all(&settings.work_dir).map_err(PipelineError::Workspace)?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("{}-", document.short_hash()))
            .tempdir_in(&settings.work_dir)
            .map_err(PipelineError::Workspace)?;

        let images = Arc::new(PageImages::new(
            tools.rasterizer.clone(),
            document,
            settings.recognition.dpi,
            workspace.path(),
        ));
        let barcodes = BarcodeReader::new(images.clone(), tools.barcode_decoder.clone());
        let text = TextExtractor::new(
            images,
            tools.text_layer.clone(),
            tools.ocr.clone(),
            &settings.ocr.language,
            settings.naming.min_direct_text_chars,
        );

        tracing::debug!("Work area {}", workspace.path().display());
        Ok(Self {
            workspace,
            barcodes,
            text,
        })
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    pub fn barcodes(&self) -> &BarcodeReader {
        &self.barcodes
    }

    pub fn text(&self) -> &TextExtractor {
        &self.text
    }
}

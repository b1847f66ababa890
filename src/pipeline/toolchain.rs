//! The set of recognition and extraction backends a run uses.

use std::sync::Arc;

use crate::config::{RasterBackend, Settings};
use crate::extract::PdfExtractor;
use crate::recognition::{
    BarcodeDecoder, GhostscriptRasterizer, OcrEngine, PageCounter, PageRasterizer,
    PdfInfoPageCounter, PdftoppmRasterizer, PdftotextExtractor, TesseractOcr,
    TextLayerExtractor, ZbarDecoder,
};
use crate::tools::ToolRunner;

/// Backends for every external step of the pipeline.
#[derive(Clone)]
pub struct Toolchain {
    pub page_counter: Arc<dyn PageCounter>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub barcode_decoder: Arc<dyn BarcodeDecoder>,
    pub text_layer: Arc<dyn TextLayerExtractor>,
    pub ocr: Arc<dyn OcrEngine>,
    pub extractor: Arc<PdfExtractor>,
}

impl Toolchain {
    /// Command-line backends chosen by `settings`, all run through `runner`.
    pub fn from_settings(settings: &Settings, runner: Arc<dyn ToolRunner>) -> Self {
        let timeout = settings.tools.timeout();
        let rasterizer: Arc<dyn PageRasterizer> = match settings.recognition.rasterizer {
            RasterBackend::Pdftoppm => Arc::new(PdftoppmRasterizer::new(runner.clone(), timeout)),
            RasterBackend::Ghostscript => {
                Arc::new(GhostscriptRasterizer::new(runner.clone(), timeout))
            }
        };

        Self {
            page_counter: Arc::new(PdfInfoPageCounter::new(runner.clone(), timeout)),
            rasterizer,
            barcode_decoder: Arc::new(ZbarDecoder::new(runner.clone(), timeout)),
            text_layer: Arc::new(PdftotextExtractor::new(runner.clone(), timeout)),
            ocr: Arc::new(TesseractOcr::new(runner.clone(), timeout)),
            extractor: Arc::new(PdfExtractor::from_config(
                &settings.extraction,
                runner,
                timeout,
            )),
        }
    }
}

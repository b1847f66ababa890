//! Shared fixtures: generated PDFs and fake recognition/extraction backends.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tempfile::TempDir;

use scansplit::config::Settings;
use scansplit::extract::{ExtractionError, PageSubsetter, PdfExtractor};
use scansplit::pipeline::{ProcessingOrchestrator, Sinks, Toolchain, UploadJob};
use scansplit::recognition::{
    BarcodeDecoder, OcrEngine, PageCounter, PageRasterizer, TextLayerExtractor,
};
use scansplit::store::{MemoryStore, Upload, UploadStore};
use scansplit::tools::ToolError;

/// Write an A4 PDF with `pages` pages, each showing "Page N".
pub fn write_pdf(path: &Path, pages: u32) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for n in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 36.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("Page {}", n))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => pages as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// Page count of a PDF on disk.
pub fn pdf_page_count(path: &Path) -> usize {
    Document::load(path).unwrap().get_pages().len()
}

/// Returns a fixed page count, or fails like a broken pdfinfo.
pub struct FixedPageCounter {
    pub pages: Option<u32>,
}

impl PageCounter for FixedPageCounter {
    fn page_count(&self, _pdf: &Path) -> Result<u32, ToolError> {
        self.pages.ok_or_else(|| ToolError::ExecutionFailed {
            tool: "pdfinfo".to_string(),
            code: Some(1),
            stderr: "Syntax Error: Couldn't find trailer dictionary".to_string(),
        })
    }
}

/// Writes the page number into the output "image".
#[derive(Default)]
pub struct PageNumberRasterizer {
    pub calls: AtomicUsize,
}

impl PageRasterizer for PageNumberRasterizer {
    fn name(&self) -> &'static str {
        "fake-raster"
    }

    fn rasterize(&self, _pdf: &Path, page: u32, _dpi: u32, output: &Path) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::write(output, page.to_string())?;
        Ok(())
    }
}

fn page_of(image: &Path) -> u32 {
    fs::read_to_string(image)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Barcode values by page number.
pub struct TableDecoder {
    pub barcodes: HashMap<u32, String>,
    pub calls: AtomicUsize,
}

impl TableDecoder {
    /// `barcodes[i]` is the barcode of page `i + 1`.
    pub fn new(barcodes: &[Option<&str>]) -> Self {
        Self {
            barcodes: barcodes
                .iter()
                .enumerate()
                .filter_map(|(i, b)| b.map(|b| (i as u32 + 1, b.to_string())))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl BarcodeDecoder for TableDecoder {
    fn name(&self) -> &'static str {
        "fake-barcode"
    }

    fn decode(&self, image: &Path) -> Result<Option<String>, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.barcodes.get(&page_of(image)).cloned())
    }
}

/// Text layer and OCR text by page number.
#[derive(Default)]
pub struct TableText {
    pub direct: HashMap<u32, String>,
    pub ocr: HashMap<u32, String>,
}

impl TextLayerExtractor for TableText {
    fn name(&self) -> &'static str {
        "fake-text"
    }

    fn page_text(&self, _pdf: &Path, page: u32) -> Result<String, ToolError> {
        Ok(self.direct.get(&page).cloned().unwrap_or_default())
    }
}

impl OcrEngine for TableText {
    fn name(&self) -> &'static str {
        "fake-ocr"
    }

    fn ocr_image(&self, image: &Path, _language: &str) -> Result<String, ToolError> {
        Ok(self.ocr.get(&page_of(image)).cloned().unwrap_or_default())
    }
}

/// Writes a fixed-size file, or fails for the listed first pages.
pub struct FakeSubsetter {
    pub name: &'static str,
    pub fail_first_pages: Vec<u32>,
    pub calls: Mutex<Vec<Vec<u32>>>,
}

impl FakeSubsetter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fail_first_pages: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(name: &'static str, first_pages: &[u32]) -> Self {
        Self {
            fail_first_pages: first_pages.to_vec(),
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> Vec<Vec<u32>> {
        self.calls.lock().unwrap().clone()
    }
}

impl PageSubsetter for FakeSubsetter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn subset(&self, _pdf: &Path, pages: &[u32], output: &Path) -> Result<(), ExtractionError> {
        self.calls.lock().unwrap().push(pages.to_vec());
        if self.fail_first_pages.contains(&pages[0]) {
            return Err(ExtractionError::Pdf("corrupt page tree".to_string()));
        }
        fs::write(output, vec![b'%'; 4096])?;
        Ok(())
    }
}

/// A temporary data directory, a source PDF and fake backends wired to an
/// in-memory store.
pub struct Harness {
    pub temp: TempDir,
    pub settings: Settings,
    pub store: Arc<MemoryStore>,
    pub pdf: PathBuf,
    pub rasterizer: Arc<PageNumberRasterizer>,
    pub decoder: Arc<TableDecoder>,
    pub text: Arc<TableText>,
    pub primary: Arc<FakeSubsetter>,
    pub secondary: Arc<FakeSubsetter>,
    pub page_counter: Arc<FixedPageCounter>,
}

impl Harness {
    /// One page per entry in `barcodes`.
    pub fn new(barcodes: &[Option<&str>]) -> Self {
        let temp = TempDir::new().unwrap();
        let pdf = temp.path().join("batch.pdf");
        write_pdf(&pdf, barcodes.len() as u32);

        let mut settings = Settings::with_data_dir(temp.path().join("data"));
        settings.recognition.workers = 2;

        Self {
            settings,
            store: Arc::new(MemoryStore::new()),
            pdf,
            rasterizer: Arc::new(PageNumberRasterizer::default()),
            decoder: Arc::new(TableDecoder::new(barcodes)),
            text: Arc::new(TableText::default()),
            primary: Arc::new(FakeSubsetter::new("primary")),
            secondary: Arc::new(FakeSubsetter::new("secondary")),
            page_counter: Arc::new(FixedPageCounter {
                pages: Some(barcodes.len() as u32),
            }),
            temp,
        }
    }

    pub fn with_text(mut self, page: u32, text: &str) -> Self {
        Arc::get_mut(&mut self.text)
            .unwrap()
            .direct
            .insert(page, text.to_string());
        self
    }

    pub fn with_ocr(mut self, page: u32, text: &str) -> Self {
        Arc::get_mut(&mut self.text)
            .unwrap()
            .ocr
            .insert(page, text.to_string());
        self
    }

    pub fn with_page_counter(mut self, pages: Option<u32>) -> Self {
        self.page_counter = Arc::new(FixedPageCounter { pages });
        self
    }

    pub fn with_subsetters(mut self, primary: FakeSubsetter, secondary: FakeSubsetter) -> Self {
        self.primary = Arc::new(primary);
        self.secondary = Arc::new(secondary);
        self
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            page_counter: self.page_counter.clone(),
            rasterizer: self.rasterizer.clone(),
            barcode_decoder: self.decoder.clone(),
            text_layer: self.text.clone(),
            ocr: self.text.clone(),
            extractor: Arc::new(PdfExtractor::new(
                self.primary.clone(),
                self.secondary.clone(),
                self.settings.extraction.min_output_bytes,
            )),
        }
    }

    pub fn orchestrator(&self) -> ProcessingOrchestrator {
        self.orchestrator_with(Sinks::from_store(self.store.clone()))
    }

    pub fn orchestrator_with(&self, sinks: Sinks) -> ProcessingOrchestrator {
        ProcessingOrchestrator::new(self.settings.clone(), self.toolchain(), sinks).unwrap()
    }

    /// Register upload `id` and return its job.
    pub fn job(&self, id: &str) -> UploadJob {
        self.store
            .create_upload(&Upload::new(id, "owner-1", self.pdf.clone()))
            .unwrap();
        UploadJob {
            upload_id: id.to_string(),
            owner_id: "owner-1".to_string(),
            pdf_path: self.pdf.clone(),
        }
    }

    pub fn output_dir(&self, upload_id: &str) -> PathBuf {
        self.settings.output_dir.join(upload_id)
    }
}

//! In-process page subsetting with lopdf.

use std::collections::BTreeSet;
use std::path::Path;

use lopdf::Document;

use super::{ExtractionError, PageSubsetter};

/// Loads the document, deletes every page not requested and saves the rest.
///
/// Needs no external binary, which makes it a dependable fallback. Page order
/// in the output follows the source document.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfSubsetter;

impl LopdfSubsetter {
    pub fn new() -> Self {
        Self
    }
}

impl PageSubsetter for LopdfSubsetter {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn subset(&self, pdf: &Path, pages: &[u32], output: &Path) -> Result<(), ExtractionError> {
        let mut doc = Document::load(pdf).map_err(|e| ExtractionError::Pdf(e.to_string()))?;
        let total = doc.get_pages().len() as u32;

        let keep: BTreeSet<u32> = pages.iter().copied().collect();
        if let Some(&last) = keep.iter().next_back() {
            if last > total {
                return Err(ExtractionError::InvalidPageList(format!(
                    "page {} beyond document end ({} pages)",
                    last, total
                )));
            }
        }

        let remove: Vec<u32> = (1..=total).filter(|p| !keep.contains(p)).collect();
        doc.delete_pages(&remove);
        doc.prune_objects();
        doc.compress();
        doc.save(output)
            .map_err(|e| ExtractionError::Pdf(e.to_string()))?;
        Ok(())
    }
}

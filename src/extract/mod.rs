//! Page-list extraction into new PDF files.
//!
//! [`PdfExtractor`] runs a primary [`PageSubsetter`] and falls back to a
//! secondary one when the primary fails or leaves a missing or undersized
//! output file. Engines:
//! - qpdf (default primary)
//! - pdftk
//! - lopdf, in-process (default secondary)

mod native;
mod pdftk;
mod qpdf;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ExtractionConfig, SubsetEngine};
use crate::tools::{ToolError, ToolRunner};

pub use native::LopdfSubsetter;
pub use pdftk::PdftkSubsetter;
pub use qpdf::QpdfSubsetter;

/// Errors from page extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Output {path} missing or too small ({size} bytes)")]
    ValidationFailed { path: PathBuf, size: u64 },

    #[error("Invalid page list: {0}")]
    InvalidPageList(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("All extraction engines failed (primary: {primary}; secondary: {secondary})")]
    AllEnginesFailed {
        primary: Box<ExtractionError>,
        secondary: Box<ExtractionError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes the given pages of a PDF, in order, to a new file.
pub trait PageSubsetter: Send + Sync {
    fn name(&self) -> &'static str;

    fn subset(&self, pdf: &Path, pages: &[u32], output: &Path) -> Result<(), ExtractionError>;
}

/// Build the subsetter for a configured engine.
pub fn subsetter_for(
    engine: SubsetEngine,
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
) -> Arc<dyn PageSubsetter> {
    match engine {
        SubsetEngine::Qpdf => Arc::new(QpdfSubsetter::new(runner, timeout)),
        SubsetEngine::Pdftk => Arc::new(PdftkSubsetter::new(runner, timeout)),
        SubsetEngine::Lopdf => Arc::new(LopdfSubsetter::new()),
    }
}

/// Compress ascending page numbers into ranges: `[2, 3, 4, 7]` -> `["2-4", "7"]`.
pub fn page_ranges(pages: &[u32]) -> Vec<String> {
    let mut ranges = Vec::new();
    let mut iter = pages.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            ranges.push(start.to_string());
        } else {
            ranges.push(format!("{}-{}", start, end));
        }
    }
    ranges
}

/// Check that `path` exists and holds at least `min_bytes`.
pub fn validate_output(path: &Path, min_bytes: u64) -> Result<u64, ExtractionError> {
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size == 0 || size < min_bytes {
        return Err(ExtractionError::ValidationFailed {
            path: path.to_path_buf(),
            size,
        });
    }
    Ok(size)
}

fn check_page_list(pages: &[u32]) -> Result<(), ExtractionError> {
    if pages.is_empty() {
        return Err(ExtractionError::InvalidPageList("empty".to_string()));
    }
    if pages.contains(&0) {
        return Err(ExtractionError::InvalidPageList("page 0".to_string()));
    }
    Ok(())
}

fn remove_partial(output: &Path) {
    if output.exists() {
        if let Err(e) = fs::remove_file(output) {
            tracing::debug!("Could not remove partial output {}: {}", output.display(), e);
        }
    }
}

/// Page extraction with primary/secondary fallback and output validation.
pub struct PdfExtractor {
    primary: Arc<dyn PageSubsetter>,
    secondary: Arc<dyn PageSubsetter>,
    min_output_bytes: u64,
}

impl PdfExtractor {
    pub fn new(
        primary: Arc<dyn PageSubsetter>,
        secondary: Arc<dyn PageSubsetter>,
        min_output_bytes: u64,
    ) -> Self {
        Self {
            primary,
            secondary,
            min_output_bytes,
        }
    }

    /// Build from configuration.
    pub fn from_config(config: &ExtractionConfig, runner: Arc<dyn ToolRunner>, timeout: Duration) -> Self {
        Self::new(
            subsetter_for(config.primary, runner.clone(), timeout),
            subsetter_for(config.secondary, runner, timeout),
            config.min_output_bytes,
        )
    }

    /// Extract `pages` from `pdf` into `output`.
    ///
    /// Returns the name of the engine that produced the file.
    pub fn extract_pages(
        &self,
        pdf: &Path,
        pages: &[u32],
        output: &Path,
    ) -> Result<&'static str, ExtractionError> {
        check_page_list(pages)?;
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        let primary_err = match self.attempt(self.primary.as_ref(), pdf, pages, output) {
            Ok(size) => {
                tracing::debug!(
                    "{} wrote {} ({} bytes)",
                    self.primary.name(),
                    output.display(),
                    size
                );
                return Ok(self.primary.name());
            }
            Err(e) => e,
        };

        tracing::warn!(
            "{} failed for {}: {}; trying {}",
            self.primary.name(),
            output.display(),
            primary_err,
            self.secondary.name()
        );
        remove_partial(output);

        match self.attempt(self.secondary.as_ref(), pdf, pages, output) {
            Ok(size) => {
                tracing::debug!(
                    "{} wrote {} ({} bytes)",
                    self.secondary.name(),
                    output.display(),
                    size
                );
                Ok(self.secondary.name())
            }
            Err(secondary_err) => {
                remove_partial(output);
                Err(ExtractionError::AllEnginesFailed {
                    primary: Box::new(primary_err),
                    secondary: Box::new(secondary_err),
                })
            }
        }
    }

    fn attempt(
        &self,
        engine: &dyn PageSubsetter,
        pdf: &Path,
        pages: &[u32],
        output: &Path,
    ) -> Result<u64, ExtractionError> {
        engine.subset(pdf, pages, output).inspect_err(|e| {
            if let ExtractionError::Tool(tool_err) = e {
                tool_err.log_details();
            }
        })?;
        validate_output(output, self.min_output_bytes)
    }
}

//! Page rasterization backends and the per-run image cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::SourceDocument;
use crate::cache::{CacheKind, PageCache};
use crate::tools::{ToolCommand, ToolError, ToolRunner};

/// Renders one PDF page to a PNG at `output`.
pub trait PageRasterizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn rasterize(&self, pdf: &Path, page: u32, dpi: u32, output: &Path) -> Result<(), ToolError>;
}

fn ensure_generated(tool: &str, output: &Path, page: u32) -> Result<(), ToolError> {
    if output.exists() {
        Ok(())
    } else {
        Err(ToolError::UnexpectedOutput {
            tool: tool.to_string(),
            detail: format!("no image generated for page {}", page),
        })
    }
}

/// Poppler's pdftoppm.
pub struct PdftoppmRasterizer {
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
}

impl PdftoppmRasterizer {
    pub fn new(runner: Arc<dyn ToolRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn name(&self) -> &'static str {
        "pdftoppm"
    }

    fn rasterize(&self, pdf: &Path, page: u32, dpi: u32, output: &Path) -> Result<(), ToolError> {
        // -singlefile writes exactly `{prefix}.png`, no page-number suffix.
        let prefix = output.with_extension("");
        let page_str = page.to_string();
        let cmd = ToolCommand::new("pdftoppm", self.timeout)
            .args(["-png", "-singlefile", "-r"])
            .arg(dpi.to_string())
            .args(["-f", page_str.as_str(), "-l", page_str.as_str()])
            .path_arg(pdf)
            .path_arg(&prefix);
        self.runner.run(&cmd)?.into_success("pdftoppm")?;
        ensure_generated("pdftoppm", output, page)
    }
}

/// Ghostscript's PNG device.
pub struct GhostscriptRasterizer {
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
}

impl GhostscriptRasterizer {
    pub fn new(runner: Arc<dyn ToolRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl PageRasterizer for GhostscriptRasterizer {
    fn name(&self) -> &'static str {
        "ghostscript"
    }

    fn rasterize(&self, pdf: &Path, page: u32, dpi: u32, output: &Path) -> Result<(), ToolError> {
        let mut output_arg = std::ffi::OsString::from("-sOutputFile=");
        output_arg.push(output.as_os_str());
        let cmd = ToolCommand::new("gs", self.timeout)
            .args(["-q", "-dNOPAUSE", "-dBATCH", "-dSAFER", "-sDEVICE=pnggray"])
            .arg(format!("-r{}", dpi))
            .arg(format!("-dFirstPage={}", page))
            .arg(format!("-dLastPage={}", page))
            .arg(output_arg)
            .path_arg(pdf);
        self.runner.run(&cmd)?.into_success("gs")?;
        ensure_generated("gs", output, page)
    }
}

/// Rasterized pages of one document, cached by `(hash, page)`.
///
/// Images live in the run's scratch directory under a name derived from the
/// document hash and page number, so repeated calls reuse the same file.
pub struct PageImages {
    rasterizer: Arc<dyn PageRasterizer>,
    document: SourceDocument,
    dpi: u32,
    dir: PathBuf,
    cache: PageCache<Option<PathBuf>>,
}

impl PageImages {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        document: SourceDocument,
        dpi: u32,
        dir: &Path,
    ) -> Self {
        Self {
            rasterizer,
            document,
            dpi,
            dir: dir.to_path_buf(),
            cache: PageCache::new(CacheKind::Image),
        }
    }

    pub fn document(&self) -> &SourceDocument {
        &self.document
    }

    /// Deterministic image location for a page.
    pub fn image_path(&self, page: u32) -> PathBuf {
        self.dir
            .join(format!("{}-page-{:05}.png", self.document.short_hash(), page))
    }

    /// Rasterize `page`, returning `None` when no image could be produced.
    ///
    /// A page whose image was [released](Self::release) is rendered again.
    pub fn image_for(&self, page: u32) -> Option<PathBuf> {
        let image = self
            .cache
            .get_or_compute(&self.document.hash, page, || self.render(page))?;
        if image.exists() {
            Some(image)
        } else {
            tracing::debug!("Page {} image was released, rendering again", page);
            self.render(page)
        }
    }

    /// Delete the image of `page` from the scratch directory.
    pub fn release(&self, page: u32) {
        let image = self.image_path(page);
        match std::fs::remove_file(&image) {
            Ok(()) => tracing::trace!("Released {}", image.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove {}: {}", image.display(), e),
        }
    }

    fn render(&self, page: u32) -> Option<PathBuf> {
        let output = self.image_path(page);
        match self
            .rasterizer
            .rasterize(&self.document.path, page, self.dpi, &output)
        {
            Ok(()) => Some(output),
            Err(e) => {
                tracing::warn!(
                    "{} failed on page {}: {}",
                    self.rasterizer.name(),
                    page,
                    e
                );
                e.log_details();
                None
            }
        }
    }
}

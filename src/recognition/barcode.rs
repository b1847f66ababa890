//! Barcode decoding and the cached per-page barcode reader.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::PageImages;
use crate::cache::{CacheKind, PageCache};
use crate::tools::{ToolCommand, ToolError, ToolRunner};

/// zbarimg exit status when the image contains no symbols.
const ZBAR_NO_SYMBOLS: i32 = 4;

/// Decodes a barcode value from an image.
pub trait BarcodeDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode the first barcode in `image`, `None` if there is none.
    fn decode(&self, image: &Path) -> Result<Option<String>, ToolError>;
}

/// ZBar's zbarimg.
pub struct ZbarDecoder {
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
}

impl ZbarDecoder {
    pub fn new(runner: Arc<dyn ToolRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl BarcodeDecoder for ZbarDecoder {
    fn name(&self) -> &'static str {
        "zbarimg"
    }

    fn decode(&self, image: &Path) -> Result<Option<String>, ToolError> {
        let cmd = ToolCommand::new("zbarimg", self.timeout)
            .args(["--quiet", "--raw"])
            .path_arg(image);
        let output = self.runner.run(&cmd)?;
        if output.code == Some(ZBAR_NO_SYMBOLS) {
            return Ok(None);
        }
        let output = output.into_success("zbarimg")?;
        Ok(first_value(&output.stdout))
    }
}

/// First non-blank line, trimmed. Blank output means no barcode.
fn first_value(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Reads page barcodes, memoized by `(hash, page)` for the lifetime of a run.
pub struct BarcodeReader {
    images: Arc<PageImages>,
    decoder: Arc<dyn BarcodeDecoder>,
    cache: PageCache<Option<String>>,
}

impl BarcodeReader {
    pub fn new(images: Arc<PageImages>, decoder: Arc<dyn BarcodeDecoder>) -> Self {
        Self {
            images,
            decoder,
            cache: PageCache::new(CacheKind::Barcode),
        }
    }

    /// Barcode on `page`, or `None` if nothing could be recognized.
    pub fn read_page_barcode(&self, page: u32) -> Option<String> {
        let hash = self.images.document().hash.clone();
        self.cache.get_or_compute(&hash, page, || {
            let image = self.images.image_for(page)?;
            match self.decoder.decode(&image) {
                Ok(Some(value)) if !value.trim().is_empty() => {
                    tracing::debug!("Page {} barcode: {}", page, value);
                    Some(value.trim().to_string())
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("{} failed on page {}: {}", self.decoder.name(), page, e);
                    e.log_details();
                    None
                }
            }
        })
    }

    /// Delete the image of `page`; later reads still hit the barcode cache.
    pub fn release_image(&self, page: u32) {
        self.images.release(page);
    }

    /// Warm the cache for `pages` using up to `workers` threads.
    ///
    /// Pages are split into contiguous chunks, one per worker, so no page is
    /// scanned by two threads. Once a page is decoded its image is deleted
    /// unless `keep(page, barcode)` holds.
    pub fn prefetch<K>(&self, pages: &[u32], workers: usize, keep: K)
    where
        K: Fn(u32, Option<&str>) -> bool + Sync,
    {
        let scan = |page: u32| {
            let barcode = self.read_page_barcode(page);
            if !keep(page, barcode.as_deref()) {
                self.images.release(page);
            }
        };

        let workers = workers.max(1).min(pages.len().max(1));
        if workers <= 1 {
            pages.iter().copied().for_each(scan);
            return;
        }

        let chunk_size = pages.len().div_ceil(workers);
        let scan = &scan;
        std::thread::scope(|scope| {
            for chunk in pages.chunks(chunk_size) {
                scope.spawn(move || chunk.iter().copied().for_each(scan));
            }
        });
    }
}

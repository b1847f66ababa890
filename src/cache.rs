//! Content addressing and per-run recognition caches.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of a file's contents.
///
/// Returns hex-encoded hash string. The file is streamed so large scans are
/// never held in memory.
pub fn compute_document_hash(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Kind of a cached per-page artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Image,
    Barcode,
    DirectText,
    OcrText,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Image => "image",
            CacheKind::Barcode => "barcode",
            CacheKind::DirectText => "direct-text",
            CacheKind::OcrText => "ocr-text",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cache key: `(document hash, page, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub document_hash: String,
    pub page: u32,
    pub kind: CacheKind,
}

/// Memoizing map for one kind of per-page artifact.
///
/// Each key owns a once-cell, so concurrent callers asking for the same key
/// block on a single computation instead of running it twice. Keys for
/// different pages never contend beyond the brief map lookup.
pub struct PageCache<V> {
    kind: CacheKind,
    entries: Mutex<HashMap<CacheKey, Arc<OnceLock<V>>>>,
}

impl<V: Clone> PageCache<V> {
    pub fn new(kind: CacheKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Return the cached value for `(hash, page)`, computing it with `compute` on first use.
    pub fn get_or_compute<F>(&self, document_hash: &str, page: u32, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        let key = CacheKey {
            document_hash: document_hash.to_string(),
            page,
            kind: self.kind,
        };
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.entry(key).or_default().clone()
        };
        if let Some(value) = cell.get() {
            tracing::trace!("cache hit: {} page {}", self.kind, page);
            return value.clone();
        }
        cell.get_or_init(compute).clone()
    }

    /// Cached value for `(hash, page)` if already computed.
    pub fn get(&self, document_hash: &str, page: u32) -> Option<V> {
        let key = CacheKey {
            document_hash: document_hash.to_string(),
            page,
            kind: self.kind,
        };
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&key).and_then(|cell| cell.get().cloned())
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|cell| cell.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

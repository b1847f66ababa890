//! Shared helper functions for CLI commands.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::store::{MemoryLock, ProcessingLock, ProgressSink, SqliteStore, StoreError};

/// Open the database named by `settings`.
pub fn open_store(settings: &Settings) -> anyhow::Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(&settings.database_path)?))
}

/// Lock backend from `lock.backend`: the database (default), `memory`, or a
/// `redis://` URL.
pub fn build_lock(
    settings: &Settings,
    store: Arc<SqliteStore>,
) -> anyhow::Result<Arc<dyn ProcessingLock>> {
    match settings.lock.backend.as_deref() {
        None | Some("sqlite") | Some("database") => Ok(store),
        Some("memory") => Ok(Arc::new(MemoryLock::new())),
        Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => {
            redis_lock(url)
        }
        Some(other) => Err(StoreError::UnsupportedBackend(other.to_string()).into()),
    }
}

#[cfg(feature = "redis-backend")]
fn redis_lock(url: &str) -> anyhow::Result<Arc<dyn ProcessingLock>> {
    Ok(Arc::new(crate::store::RedisLock::new(url)?))
}

#[cfg(not(feature = "redis-backend"))]
fn redis_lock(url: &str) -> anyhow::Result<Arc<dyn ProcessingLock>> {
    Err(StoreError::UnsupportedBackend(format!(
        "{} (rebuild with the redis-backend feature)",
        url
    ))
    .into())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:30.cyan/blue}] {pos:>3}% {prefix} {wide_msg}")
        .map(|style| style.progress_chars("█▓░"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Forwards progress to a store and mirrors it on one terminal bar per upload.
pub struct BarProgress {
    inner: Arc<dyn ProgressSink>,
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarProgress {
    pub fn new(inner: Arc<dyn ProgressSink>) -> Self {
        Self {
            inner,
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Add a bar for an upload.
    pub fn add(&self, upload_id: &str, pdf: &Path) {
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(bar_style());
        bar.set_prefix(
            pdf.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| upload_id.to_string()),
        );
        bar.set_message("Queued");
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(upload_id.to_string(), bar);
        }
    }

    /// Finish an upload's bar with a final message.
    pub fn finish(&self, upload_id: &str, message: String) {
        if let Ok(mut bars) = self.bars.lock() {
            if let Some(bar) = bars.remove(upload_id) {
                bar.finish_with_message(message);
            }
        }
    }

    /// Print a line without corrupting the bars.
    pub fn println(&self, line: String) {
        self.multi.suspend(|| println!("{}", line));
    }
}

impl ProgressSink for BarProgress {
    fn write_progress(&self, upload_id: &str, percent: u8, message: &str) -> crate::store::Result<()> {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(upload_id) {
                bar.set_position(percent as u64);
                bar.set_message(message.to_string());
            }
        }
        self.inner.write_progress(upload_id, percent, message)
    }
}

//! Upload processing: lock, recognize, segment, name, extract, persist.
//!
//! [`ProcessingOrchestrator::process`] runs one upload through the state
//! machine
//!
//! ```text
//! Idle -> Locked -> Hashing -> CountingPages -> DetectingSeparator -> Segmenting
//!      -> (Naming -> Extracting -> Persisting)* -> Finalizing -> Done | Failed
//! ```
//!
//! Runs are single-flight per upload through an expiring [`ProcessingLock`]
//! and idempotent: each run replaces every group a previous run stored.

mod progress;
mod session;
mod toolchain;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cache::compute_document_hash;
use crate::config::{ConfigError, Settings};
use crate::naming::{DerivedLabel, NameDeriver};
use crate::recognition::SourceDocument;
use crate::segment::{segment_pages, Segmentation, Separator};
use crate::store::{
    Group, GroupStore, NewGroup, ProcessingLock, ProgressSink, StoreError, UploadStore,
};
use crate::tools::ToolError;

pub use progress::{segment_progress, ProgressTracker};
pub use session::RunSession;
pub use toolchain::Toolchain;

/// Fatal, document-level failures.
///
/// Messages are safe to show to the uploader: they never carry raw tool output.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Could not read {path}: {source}")]
    Hashing {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0} is not a PDF document")]
    NotAPdf(PathBuf),

    #[error("Could not determine page count: {0}")]
    PageCount(ToolError),

    #[error("Invalid upload id {0:?}: must be a single path component")]
    InvalidUploadId(String),

    #[error("Could not create work area: {0}")]
    Workspace(std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Processing state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Idle,
    Locked,
    Hashing,
    CountingPages,
    DetectingSeparator,
    Segmenting,
    Naming,
    Extracting,
    Persisting,
    Finalizing,
    Done,
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Locked => "locked",
            Self::Hashing => "hashing",
            Self::CountingPages => "counting_pages",
            Self::DetectingSeparator => "detecting_separator",
            Self::Segmenting => "segmenting",
            Self::Naming => "naming",
            Self::Extracting => "extracting",
            Self::Persisting => "persisting",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to process one uploaded PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub upload_id: String,
    pub owner_id: String,
    pub pdf_path: PathBuf,
}

/// A segment that produced no group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSegment {
    /// 0-based segment index.
    pub index: usize,
    pub pages: Vec<u32>,
    pub reason: String,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub upload_id: String,
    pub total_pages: u32,
    /// Group code: separator token or the no-separator code.
    pub code: String,
    pub segments_total: usize,
    pub groups: Vec<Group>,
    pub skipped: Vec<SkippedSegment>,
    /// Groups from the previous run that were deleted.
    pub replaced: usize,
}

impl RunSummary {
    pub fn groups_created(&self) -> usize {
        self.groups.len()
    }

    /// Whether some segments were skipped.
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// How a call to [`ProcessingOrchestrator::process`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Another run holds the lock; nothing was touched.
    AlreadyProcessing,
    Completed(RunSummary),
    Failed { message: String },
}

/// Segment preview produced by [`ProcessingOrchestrator::inspect`].
#[derive(Debug, Clone, PartialEq)]
pub struct InspectedSegment {
    pub pages: Vec<u32>,
    pub derived: DerivedLabel,
    /// Label after disambiguation, as it would be used for the output file.
    pub file_label: String,
}

/// Dry-run view of how a document would be split.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectReport {
    pub document_hash: String,
    pub page_count: u32,
    pub separator: Separator,
    pub code: String,
    pub segments: Vec<InspectedSegment>,
}

/// The persistence and coordination sinks a run writes to.
#[derive(Clone)]
pub struct Sinks {
    pub uploads: Arc<dyn UploadStore>,
    pub groups: Arc<dyn GroupStore>,
    pub progress: Arc<dyn ProgressSink>,
    pub lock: Arc<dyn ProcessingLock>,
}

impl Sinks {
    /// Use one store for every sink.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UploadStore + GroupStore + ProgressSink + ProcessingLock + 'static,
    {
        Self {
            uploads: store.clone(),
            groups: store.clone(),
            progress: store.clone(),
            lock: store,
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn ProcessingLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

/// Reject upload ids that could escape the output directory.
pub fn validate_upload_id(upload_id: &str) -> Result<(), PipelineError> {
    let invalid = upload_id.is_empty()
        || upload_id == "."
        || upload_id.contains("..")
        || upload_id.contains(['/', '\\', '\0']);
    if invalid {
        Err(PipelineError::InvalidUploadId(upload_id.to_string()))
    } else {
        Ok(())
    }
}

/// Lock key for an upload.
pub fn lock_key(upload_id: &str) -> String {
    format!("upload:{}", upload_id)
}

/// Releases a held lock when dropped.
struct LockGuard<'a> {
    lock: &'a dyn ProcessingLock,
    key: String,
}

impl<'a> LockGuard<'a> {
    fn acquire(
        lock: &'a dyn ProcessingLock,
        key: String,
        ttl: Duration,
    ) -> Result<Option<Self>, StoreError> {
        if lock.acquire(&key, ttl)? {
            Ok(Some(Self { lock, key }))
        } else {
            Ok(None)
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        match self.lock.release(&self.key) {
            Ok(()) => tracing::debug!("Released {}", self.key),
            Err(e) => tracing::warn!("Failed to release {}: {}", self.key, e),
        }
    }
}

/// Labels already used for output files in this run.
///
/// Comparison ignores case so outputs don't collide on case-insensitive
/// filesystems.
#[derive(Debug, Default)]
struct LabelRegistry {
    used: HashSet<String>,
}

impl LabelRegistry {
    /// `label`, or `label_2`, `label_3`, ... if already taken.
    fn claim(&mut self, label: &str) -> String {
        if self.used.insert(label.to_lowercase()) {
            return label.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", label, n);
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Tracks the current state of one run for logging.
struct RunState<'a> {
    upload_id: &'a str,
    state: ProcessingState,
}

impl<'a> RunState<'a> {
    fn new(upload_id: &'a str) -> Self {
        Self {
            upload_id,
            state: ProcessingState::Idle,
        }
    }

    fn enter(&mut self, next: ProcessingState) {
        tracing::debug!("Upload {}: {} -> {}", self.upload_id, self.state, next);
        self.state = next;
    }
}

/// Composes recognition, segmentation, naming, extraction and persistence.
pub struct ProcessingOrchestrator {
    settings: Settings,
    tools: Toolchain,
    sinks: Sinks,
    namer: NameDeriver,
}

impl ProcessingOrchestrator {
    pub fn new(settings: Settings, tools: Toolchain, sinks: Sinks) -> Result<Self, ConfigError> {
        let namer = NameDeriver::new(&settings.naming)?;
        Ok(Self {
            settings,
            tools,
            sinks,
            namer,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Process one upload.
    ///
    /// Never returns an error: fatal failures are recorded on the upload and
    /// reported as [`ProcessOutcome::Failed`].
    pub fn process(&self, job: &UploadJob) -> ProcessOutcome {
        if let Err(e) = validate_upload_id(&job.upload_id) {
            tracing::error!("{}", e);
            return ProcessOutcome::Failed {
                message: e.to_string(),
            };
        }
        let mut run = RunState::new(&job.upload_id);

        let _guard = match LockGuard::acquire(
            self.sinks.lock.as_ref(),
            lock_key(&job.upload_id),
            self.settings.lock.ttl(),
        ) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::info!("Upload {} is already being processed", job.upload_id);
                return ProcessOutcome::AlreadyProcessing;
            }
            Err(e) => {
                // Not holding the lock: the upload row belongs to whoever does.
                tracing::error!("Could not acquire lock for {}: {}", job.upload_id, e);
                return ProcessOutcome::Failed {
                    message: format!("Could not acquire processing lock: {}", e),
                };
            }
        };
        run.enter(ProcessingState::Locked);

        let mut progress = ProgressTracker::new(self.sinks.progress.as_ref(), &job.upload_id);
        match self.run_locked(job, &mut run, &mut progress) {
            Ok(summary) => {
                run.enter(ProcessingState::Done);
                tracing::info!(
                    "Upload {} completed: {} of {} segments stored{}",
                    job.upload_id,
                    summary.groups_created(),
                    summary.segments_total,
                    if summary.is_partial() { " (partial)" } else { "" }
                );
                ProcessOutcome::Completed(summary)
            }
            Err(e) => {
                tracing::error!("Upload {} failed while {}: {}", job.upload_id, run.state, e);
                run.enter(ProcessingState::Failed);
                let message = e.to_string();
                if let Err(store_err) = self.sinks.uploads.mark_failed(&job.upload_id, &message) {
                    tracing::warn!("Could not mark {} failed: {}", job.upload_id, store_err);
                }
                ProcessOutcome::Failed { message }
            }
        }
    }

    fn run_locked(
        &self,
        job: &UploadJob,
        run: &mut RunState<'_>,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<RunSummary, PipelineError> {
        let upload = self
            .sinks
            .uploads
            .get_upload(&job.upload_id)?
            .ok_or_else(|| StoreError::UploadNotFound(job.upload_id.clone()))?;
        if upload.owner_id != job.owner_id || upload.source_path != job.pdf_path {
            tracing::info!(
                "Upload {}: source changed to {} (owner {})",
                job.upload_id,
                job.pdf_path.display(),
                job.owner_id
            );
            self.sinks
                .uploads
                .set_source(&job.upload_id, &job.owner_id, &job.pdf_path)?;
        }
        self.sinks.uploads.mark_processing(&job.upload_id)?;
        progress.report(progress::LOCKED, "Locked");

        run.enter(ProcessingState::Hashing);
        let hash = hash_pdf(&job.pdf_path)?;
        let session = RunSession::open(
            &self.tools,
            &self.settings,
            SourceDocument::new(&job.pdf_path, &hash),
        )?;

        run.enter(ProcessingState::CountingPages);
        let page_count = self.count_pages(&job.pdf_path)?;
        progress.report(
            progress::PAGES_COUNTED,
            &format!("Counted {} pages", page_count),
        );

        run.enter(ProcessingState::DetectingSeparator);
        let segmentation = self.detect_and_segment(&session, page_count, |separator| {
            progress.report(
                progress::SEPARATOR_DETECTED,
                &format!("Separator: {}", separator),
            );
            run.enter(ProcessingState::Segmenting);
        });
        let segments_total = segmentation.segments.len();
        progress.report(
            progress::SEGMENTED,
            &format!("Found {} segments", segments_total),
        );

        let code = segmentation
            .separator
            .code(&self.settings.naming.no_separator_code)
            .to_string();
        tracing::info!(
            "Upload {}: {} pages, separator {}, {} segments",
            job.upload_id,
            page_count,
            segmentation.separator,
            segments_total
        );

        let replaced = self.replace_previous_groups(&job.upload_id)?;

        let mut summary = RunSummary {
            upload_id: job.upload_id.clone(),
            total_pages: page_count,
            code: code.clone(),
            segments_total,
            groups: Vec::new(),
            skipped: Vec::new(),
            replaced,
        };
        let mut labels = LabelRegistry::default();

        for (index, segment) in segmentation.segments.iter().enumerate() {
            run.enter(ProcessingState::Naming);
            let derived =
                self.namer
                    .derive_label(session.text(), segment, index, &segmentation.separator);
            session.barcodes().release_image(segment.first_page());
            let label = labels.claim(&derived.label);
            let output = self.output_path(&job.upload_id, &label);

            run.enter(ProcessingState::Extracting);
            match self
                .tools
                .extractor
                .extract_pages(&job.pdf_path, segment.pages(), &output)
            {
                Ok(engine) => {
                    run.enter(ProcessingState::Persisting);
                    let new_group = NewGroup {
                        code: code.clone(),
                        label: label.clone(),
                        pdf_path: output.clone(),
                        pages: segment.pages().to_vec(),
                        owner_id: job.owner_id.clone(),
                        upload_id: job.upload_id.clone(),
                    };
                    match self.sinks.groups.create_group(&new_group) {
                        Ok(group) => {
                            tracing::debug!(
                                "Segment {} -> {} ({}, pages {:?})",
                                index + 1,
                                output.display(),
                                engine,
                                segment.pages()
                            );
                            summary.groups.push(group);
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Upload {}: could not store segment {}: {}",
                                job.upload_id,
                                index + 1,
                                e
                            );
                            remove_file_quietly(&output);
                            summary.skipped.push(SkippedSegment {
                                index,
                                pages: segment.pages().to_vec(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Upload {}: skipping segment {} (pages {:?}): {}",
                        job.upload_id,
                        index + 1,
                        segment.pages(),
                        e
                    );
                    summary.skipped.push(SkippedSegment {
                        index,
                        pages: segment.pages().to_vec(),
                        reason: e.to_string(),
                    });
                }
            }

            progress.report(
                segment_progress(index + 1, segments_total),
                &format!("Segment {}/{}", index + 1, segments_total),
            );
        }

        run.enter(ProcessingState::Finalizing);
        progress.report(progress::COMPLETE, "Completed");
        self.sinks
            .uploads
            .mark_completed(&job.upload_id, page_count)?;
        Ok(summary)
    }

    /// Work out segments and labels for a PDF without locking, extracting or
    /// storing anything.
    pub fn inspect(&self, pdf: &Path) -> Result<InspectReport, PipelineError> {
        let hash = hash_pdf(pdf)?;
        let session = RunSession::open(&self.tools, &self.settings, SourceDocument::new(pdf, &hash))?;
        let page_count = self.count_pages(pdf)?;
        let segmentation = self.detect_and_segment(&session, page_count, |_| {});

        let mut labels = LabelRegistry::default();
        let segments = segmentation
            .segments
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                let derived =
                    self.namer
                        .derive_label(session.text(), segment, index, &segmentation.separator);
                session.barcodes().release_image(segment.first_page());
                let file_label = labels.claim(&derived.label);
                InspectedSegment {
                    pages: segment.pages().to_vec(),
                    derived,
                    file_label,
                }
            })
            .collect();

        Ok(InspectReport {
            document_hash: hash,
            page_count,
            code: segmentation
                .separator
                .code(&self.settings.naming.no_separator_code)
                .to_string(),
            separator: segmentation.separator,
            segments,
        })
    }

    fn count_pages(&self, pdf: &Path) -> Result<u32, PipelineError> {
        self.tools.page_counter.page_count(pdf).map_err(|e| {
            e.log_details();
            PipelineError::PageCount(e)
        })
    }

    /// Read page 1's barcode, then the rest (in parallel), then segment.
    fn detect_and_segment<F>(
        &self,
        session: &RunSession,
        page_count: u32,
        on_separator: F,
    ) -> Segmentation
    where
        F: FnOnce(&Separator),
    {
        let barcodes = session.barcodes();
        let separator = if page_count > 0 {
            Separator::from_first_page(barcodes.read_page_barcode(1))
        } else {
            Separator::Absent
        };
        if separator.is_detected() {
            barcodes.release_image(1);
        }
        on_separator(&separator);

        // Only a segment's first page may still be OCR'd.
        let rest: Vec<u32> = (2..=page_count).collect();
        barcodes.prefetch(&rest, self.settings.recognition.workers, |page, barcode| {
            !separator.matches(barcode)
                && separator.matches(barcodes.read_page_barcode(page - 1).as_deref())
        });
        segment_pages(page_count, |page| barcodes.read_page_barcode(page))
    }

    /// Delete the previous generation of groups and their files.
    fn replace_previous_groups(&self, upload_id: &str) -> Result<usize, PipelineError> {
        let deleted = self.sinks.groups.delete_all_for_upload(upload_id)?;
        for group in &deleted {
            remove_file_quietly(&group.pdf_path);
        }
        if !deleted.is_empty() {
            tracing::info!(
                "Upload {}: replaced {} previous groups",
                upload_id,
                deleted.len()
            );
        }
        Ok(deleted.len())
    }

    fn output_path(&self, upload_id: &str, label: &str) -> PathBuf {
        self.settings
            .output_dir
            .join(upload_id)
            .join(format!("{}.pdf", label))
    }
}

/// Content hash of `path`, rejecting files that aren't PDFs.
fn hash_pdf(path: &Path) -> Result<String, PipelineError> {
    let hash = compute_document_hash(path).map_err(|source| PipelineError::Hashing {
        path: path.to_path_buf(),
        source,
    })?;

    let kind = infer::get_from_path(path).map_err(|source| PipelineError::Hashing {
        path: path.to_path_buf(),
        source,
    })?;
    if kind.map(|k| k.mime_type()) != Some("application/pdf") {
        return Err(PipelineError::NotAPdf(path.to_path_buf()));
    }
    Ok(hash)
}

fn remove_file_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

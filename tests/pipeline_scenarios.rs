//! End-to-end runs of the processing orchestrator against fake backends.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{FakeSubsetter, Harness};
use scansplit::extract::{ExtractionError, PageSubsetter, PdfExtractor};
use scansplit::pipeline::{lock_key, ProcessOutcome, ProcessingOrchestrator, RunSummary, Sinks};
use scansplit::store::{
    Group, GroupStore, MemoryStore, NewGroup, ProcessingLock, StoreError, UploadStatus,
    UploadStore,
};

fn completed(outcome: ProcessOutcome) -> RunSummary {
    match outcome {
        ProcessOutcome::Completed(summary) => summary,
        other => panic!("expected completion, got {:?}", other),
    }
}

fn labels(groups: &[Group]) -> Vec<String> {
    groups.iter().map(|g| g.label.clone()).collect()
}

#[test]
fn separator_pages_split_and_are_dropped() {
    let harness = Harness::new(&[Some("AAA"), None, None, Some("AAA"), None]);
    let summary = completed(harness.orchestrator().process(&harness.job("u1")));

    assert_eq!(summary.code, "AAA");
    assert_eq!(summary.total_pages, 5);
    assert_eq!(summary.segments_total, 2);
    assert!(!summary.is_partial());

    let groups = harness.store.list_for_upload("u1").unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].pages, vec![2, 3]);
    assert_eq!(groups[0].pages_count, 2);
    assert_eq!(groups[1].pages, vec![5]);
    assert_eq!(groups[1].pages_count, 1);
    assert!(groups.iter().all(|g| g.code == "AAA" && g.owner_id == "owner-1"));
    assert_eq!(labels(&groups), ["AAA_1", "AAA_2"]);

    assert_eq!(groups[0].pdf_path, harness.output_dir("u1").join("AAA_1.pdf"));
    assert!(groups.iter().all(|g| g.pdf_path.exists()));

    let upload = harness.store.get_upload("u1").unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Completed);
    assert_eq!(upload.total_pages, Some(5));
    assert_eq!(upload.progress, 100);
}

#[test]
fn no_barcode_on_first_page_yields_one_group() {
    let harness = Harness::new(&[None, None, Some("ZZZ"), None, None, None]);
    let summary = completed(harness.orchestrator().process(&harness.job("u1")));

    assert_eq!(summary.code, "NO_SEPARATOR");
    let groups = harness.store.list_for_upload("u1").unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].pages, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(groups[0].pages_count, 6);
    assert_eq!(groups[0].label, "NO_SEPARATOR_1");
}

#[test]
fn consecutive_separators_produce_no_empty_groups() {
    let harness = Harness::new(&[Some("S"), Some("S"), None, Some("S"), Some("S")]);
    let summary = completed(harness.orchestrator().process(&harness.job("u1")));

    assert_eq!(summary.segments_total, 1);
    assert_eq!(harness.primary.calls(), vec![vec![3]]);
}

#[test]
fn barcodes_are_read_once_per_page() {
    let harness = Harness::new(&[Some("AAA"), None, None, Some("AAA"), None]);
    completed(harness.orchestrator().process(&harness.job("u1")));

    assert_eq!(harness.decoder.calls.load(Ordering::SeqCst), 5);
    // OCR of the segment first pages reuses the cached images.
    assert_eq!(harness.rasterizer.calls.load(Ordering::SeqCst), 5);
}

fn count_page_images(work_dir: &Path) -> usize {
    let Ok(runs) = fs::read_dir(work_dir) else {
        return 0;
    };
    runs.flatten()
        .filter_map(|run| fs::read_dir(run.path()).ok())
        .flat_map(|entries| entries.flatten())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
        .count()
}

/// Records how many page images are on disk at each extraction.
struct ImageCountingSubsetter {
    work_dir: PathBuf,
    seen: Mutex<Vec<usize>>,
}

impl PageSubsetter for ImageCountingSubsetter {
    fn name(&self) -> &'static str {
        "image-counting"
    }

    fn subset(&self, _pdf: &Path, _pages: &[u32], output: &Path) -> Result<(), ExtractionError> {
        self.seen
            .lock()
            .unwrap()
            .push(count_page_images(&self.work_dir));
        fs::write(output, vec![b'%'; 4096])?;
        Ok(())
    }
}

#[test]
fn page_images_are_deleted_once_used() {
    let mut barcodes = vec![None; 41];
    for page in [1, 11, 21, 31] {
        barcodes[page - 1] = Some("SEP");
    }
    let harness = Harness::new(&barcodes);
    let counting = Arc::new(ImageCountingSubsetter {
        work_dir: harness.settings.work_dir.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let mut tools = harness.toolchain();
    tools.extractor = Arc::new(PdfExtractor::new(
        counting.clone(),
        harness.secondary.clone(),
        harness.settings.extraction.min_output_bytes,
    ));
    let orchestrator = ProcessingOrchestrator::new(
        harness.settings.clone(),
        tools,
        Sinks::from_store(harness.store.clone()),
    )
    .unwrap();

    let summary = completed(orchestrator.process(&harness.job("u1")));
    assert_eq!(summary.segments_total, 4);

    // Only first pages of segments not yet named stay on disk.
    assert_eq!(*counting.seen.lock().unwrap(), vec![3, 2, 1, 0]);
    // First pages were still available for OCR.
    assert_eq!(harness.rasterizer.calls.load(Ordering::SeqCst), 41);
    assert_eq!(count_page_images(&harness.settings.work_dir), 0);
}

#[test]
fn labels_come_from_first_page_text() {
    let harness = Harness::new(&[Some("SEP"), None, None, Some("SEP"), None, Some("SEP"), None])
        .with_text(2, "Invoice No. 4471 issued to Northwind Traders Ltd")
        .with_text(5, "Scan")
        .with_ocr(5, "Payment voucher No. 88-A for March rent")
        .with_text(7, "Invoice No. 4471 issued to Northwind Traders Ltd");

    let summary = completed(harness.orchestrator().process(&harness.job("u1")));
    assert_eq!(labels(&summary.groups), ["4471", "88-A", "4471_2"]);
    assert!(harness.output_dir("u1").join("4471_2.pdf").exists());
}

#[test]
fn rerun_replaces_previous_generation() {
    let harness = Harness::new(&[Some("AAA"), None, None, Some("AAA"), None]);
    let orchestrator = harness.orchestrator();

    let first = completed(orchestrator.process(&harness.job("u1")));
    let second = completed(orchestrator.process(&harness.job("u1")));

    assert_eq!(first.segments_total, second.segments_total);
    assert_eq!(labels(&first.groups), labels(&second.groups));
    assert_eq!(second.replaced, 2);

    let stored = harness.store.list_for_upload("u1").unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored, second.groups);
    assert!(stored.iter().all(|g| g.pdf_path.exists()));
}

/// Records the order of group store operations.
struct RecordingGroups {
    inner: Arc<MemoryStore>,
    ops: Mutex<Vec<&'static str>>,
}

impl GroupStore for RecordingGroups {
    fn create_group(&self, group: &NewGroup) -> Result<Group, StoreError> {
        self.ops.lock().unwrap().push("create");
        self.inner.create_group(group)
    }

    fn delete_all_for_upload(&self, upload_id: &str) -> Result<Vec<Group>, StoreError> {
        self.ops.lock().unwrap().push("delete");
        self.inner.delete_all_for_upload(upload_id)
    }

    fn list_for_upload(&self, upload_id: &str) -> Result<Vec<Group>, StoreError> {
        self.inner.list_for_upload(upload_id)
    }
}

#[test]
fn reprocessing_deletes_old_groups_and_files_first() {
    let harness = Harness::new(&[Some("NEW"), None, Some("NEW"), None]);
    let job = harness.job("u1");

    let stale_dir = harness.output_dir("u1");
    fs::create_dir_all(&stale_dir).unwrap();
    let mut stale_files = Vec::new();
    for label in ["old-a", "old-b", "old-c"] {
        let path = stale_dir.join(format!("{}.pdf", label));
        fs::write(&path, b"old").unwrap();
        harness
            .store
            .create_group(&NewGroup {
                code: "OLD".into(),
                label: label.into(),
                pdf_path: path.clone(),
                pages: vec![1],
                owner_id: "owner-1".into(),
                upload_id: "u1".into(),
            })
            .unwrap();
        stale_files.push(path);
    }

    let recording = Arc::new(RecordingGroups {
        inner: harness.store.clone(),
        ops: Mutex::new(Vec::new()),
    });
    let sinks = Sinks {
        groups: recording.clone(),
        ..Sinks::from_store(harness.store.clone())
    };
    let summary = completed(harness.orchestrator_with(sinks).process(&job));

    assert_eq!(summary.replaced, 3);
    assert_eq!(*recording.ops.lock().unwrap(), ["delete", "create", "create"]);
    assert!(stale_files.iter().all(|p| !p.exists()));

    let stored = harness.store.list_for_upload("u1").unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|g| g.code == "NEW"));
}

#[test]
fn held_lock_means_already_processing() {
    let harness = Harness::new(&[Some("AAA"), None]);
    let job = harness.job("u1");
    assert!(harness
        .store
        .acquire(&lock_key("u1"), Duration::from_secs(60))
        .unwrap());

    let outcome = harness.orchestrator().process(&job);
    assert_eq!(outcome, ProcessOutcome::AlreadyProcessing);

    let upload = harness.store.get_upload("u1").unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Queued);
    assert!(harness.store.progress_history("u1").is_empty());
    assert!(harness.primary.calls().is_empty());
}

#[test]
fn page_count_failure_fails_upload_and_releases_lock() {
    let harness = Harness::new(&[Some("AAA"), None]).with_page_counter(None);
    let outcome = harness.orchestrator().process(&harness.job("u1"));

    let message = match outcome {
        ProcessOutcome::Failed { message } => message,
        other => panic!("expected failure, got {:?}", other),
    };
    assert!(message.contains("page count"));
    assert!(!message.contains("trailer dictionary"));

    let upload = harness.store.get_upload("u1").unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Failed);
    assert_eq!(upload.error_message.as_deref(), Some(message.as_str()));
    assert!(!harness.store.is_locked(&lock_key("u1")));

    let leftovers: Vec<PathBuf> = fs::read_dir(&harness.settings.work_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert!(leftovers.is_empty(), "work area not cleaned: {:?}", leftovers);
}

#[test]
fn reprocessing_with_new_source_updates_the_upload() {
    let harness = Harness::new(&[Some("AAA"), None, Some("AAA"), None]);
    completed(harness.orchestrator().process(&harness.job("u1")));

    let replacement = harness.temp.path().join("rescan.pdf");
    fs::copy(&harness.pdf, &replacement).unwrap();
    let mut job = harness.job("u1");
    job.owner_id = "owner-2".to_string();
    job.pdf_path = replacement.clone();
    completed(harness.orchestrator().process(&job));

    let upload = harness.store.get_upload("u1").unwrap().unwrap();
    assert_eq!(upload.owner_id, "owner-2");
    assert_eq!(upload.source_path, replacement);
    let groups = harness.store.list_for_upload("u1").unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|g| g.owner_id == "owner-2"));
}

#[test]
fn upload_id_with_path_components_is_refused() {
    let harness = Harness::new(&[Some("AAA"), None]);
    let mut job = harness.job("u1");
    job.upload_id = "../escaped".to_string();

    match harness.orchestrator().process(&job) {
        ProcessOutcome::Failed { message } => assert!(message.contains("Invalid upload id")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(harness.primary.calls().is_empty());
    assert!(!harness.settings.output_dir.join("../escaped").exists());
    assert!(!harness.store.is_locked(&lock_key("../escaped")));
}

#[test]
fn non_pdf_input_is_rejected() {
    let harness = Harness::new(&[Some("AAA"), None]);
    let mut job = harness.job("u1");
    job.pdf_path = harness.temp.path().join("notes.txt");
    fs::write(&job.pdf_path, "just some text, not a pdf").unwrap();

    match harness.orchestrator().process(&job) {
        ProcessOutcome::Failed { message } => assert!(message.contains("not a PDF")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(
        harness.store.get_upload("u1").unwrap().unwrap().status,
        UploadStatus::Failed
    );
}

#[test]
fn primary_failure_falls_back_to_secondary() {
    let harness = Harness::new(&[Some("AAA"), None, None, Some("AAA"), None]).with_subsetters(
        FakeSubsetter::failing_on("primary", &[2]),
        FakeSubsetter::new("secondary"),
    );
    let summary = completed(harness.orchestrator().process(&harness.job("u1")));

    assert_eq!(summary.groups_created(), 2);
    assert_eq!(harness.secondary.calls(), vec![vec![2, 3]]);
}

#[test]
fn failed_segment_is_skipped_and_run_completes() {
    let harness = Harness::new(&[Some("AAA"), None, None, Some("AAA"), None, Some("AAA"), None])
        .with_subsetters(
            FakeSubsetter::failing_on("primary", &[5]),
            FakeSubsetter::failing_on("secondary", &[5]),
        );
    let summary = completed(harness.orchestrator().process(&harness.job("u1")));

    assert!(summary.is_partial());
    assert_eq!(summary.segments_total, 3);
    assert_eq!(summary.groups_created(), 2);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].index, 1);
    assert_eq!(summary.skipped[0].pages, vec![5]);
    assert!(!harness.output_dir("u1").join("AAA_2.pdf").exists());

    let stored = harness.store.list_for_upload("u1").unwrap();
    assert_eq!(labels(&stored), ["AAA_1", "AAA_3"]);
    assert_eq!(
        harness.store.get_upload("u1").unwrap().unwrap().status,
        UploadStatus::Completed
    );
}

/// Fails every insert whose label is listed.
struct FlakyGroups {
    inner: Arc<MemoryStore>,
    reject: &'static str,
}

impl GroupStore for FlakyGroups {
    fn create_group(&self, group: &NewGroup) -> Result<Group, StoreError> {
        if group.label == self.reject {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.create_group(group)
    }

    fn delete_all_for_upload(&self, upload_id: &str) -> Result<Vec<Group>, StoreError> {
        self.inner.delete_all_for_upload(upload_id)
    }

    fn list_for_upload(&self, upload_id: &str) -> Result<Vec<Group>, StoreError> {
        self.inner.list_for_upload(upload_id)
    }
}

#[test]
fn store_failure_skips_only_that_segment() {
    let harness = Harness::new(&[Some("AAA"), None, Some("AAA"), None]);
    let sinks = Sinks {
        groups: Arc::new(FlakyGroups {
            inner: harness.store.clone(),
            reject: "AAA_1",
        }),
        ..Sinks::from_store(harness.store.clone())
    };
    let summary = completed(harness.orchestrator_with(sinks).process(&harness.job("u1")));

    assert_eq!(summary.groups_created(), 1);
    assert_eq!(summary.skipped[0].index, 0);
    assert!(!harness.output_dir("u1").join("AAA_1.pdf").exists());
    assert!(harness.output_dir("u1").join("AAA_2.pdf").exists());
}

#[test]
fn progress_is_monotonic_and_ends_at_100() {
    let harness = Harness::new(&[Some("AAA"), None, Some("AAA"), None, Some("AAA"), None]);
    completed(harness.orchestrator().process(&harness.job("u1")));

    let values: Vec<u8> = harness
        .store
        .progress_history("u1")
        .into_iter()
        .map(|(p, _)| p)
        .collect();
    assert_eq!(values.first(), Some(&5));
    assert_eq!(values.last(), Some(&100));
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
    assert!(values.contains(&10) && values.contains(&15) && values.contains(&30));
    assert!(!harness.store.is_locked(&lock_key("u1")));
}

#[test]
fn empty_segmentation_still_completes() {
    let harness = Harness::new(&[Some("AAA"), Some("AAA")]);
    let summary = completed(harness.orchestrator().process(&harness.job("u1")));

    assert_eq!(summary.segments_total, 0);
    assert!(harness.store.list_for_upload("u1").unwrap().is_empty());
    let upload = harness.store.get_upload("u1").unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Completed);
    assert_eq!(upload.progress, 100);
}

#[test]
fn inspect_writes_nothing() {
    let harness = Harness::new(&[Some("AAA"), None, None, Some("AAA"), None])
        .with_text(5, "Journal entry No. JE-204 posted by accounting dept");
    let report = harness.orchestrator().inspect(&harness.pdf).unwrap();

    assert_eq!(report.page_count, 5);
    assert_eq!(report.code, "AAA");
    assert_eq!(
        report.segments.iter().map(|s| s.pages.clone()).collect::<Vec<_>>(),
        vec![vec![2, 3], vec![5]]
    );
    assert_eq!(report.segments[0].file_label, "AAA_1");
    assert_eq!(report.segments[1].file_label, "JE-204");
    assert!(harness.primary.calls().is_empty());
    assert!(!harness.output_dir("u1").exists());
}

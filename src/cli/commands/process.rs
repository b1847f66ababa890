//! Process command: split PDFs into stored groups.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use console::style;
use tokio::sync::Semaphore;

use crate::cli::helpers::{build_lock, open_store, BarProgress};
use crate::config::Settings;
use crate::pipeline::{
    validate_upload_id, ProcessOutcome, ProcessingOrchestrator, Sinks, Toolchain, UploadJob,
};
use crate::store::{Upload, UploadStore};
use crate::tools::SystemToolRunner;

/// Process each PDF as its own upload, up to `workers` at a time.
pub async fn cmd_process(
    settings: &Settings,
    pdfs: Vec<PathBuf>,
    owner: &str,
    upload_id: Option<String>,
    workers: usize,
) -> anyhow::Result<()> {
    if upload_id.is_some() && pdfs.len() > 1 {
        anyhow::bail!("--upload-id can only be used with a single PDF");
    }
    if let Some(ref id) = upload_id {
        validate_upload_id(id)?;
    }

    let store = open_store(settings)?;
    let lock = build_lock(settings, store.clone())?;
    let bars = Arc::new(BarProgress::new(store.clone()));
    let sinks = Sinks::from_store(store.clone())
        .with_lock(lock)
        .with_progress(bars.clone());

    let tools = Toolchain::from_settings(settings, Arc::new(SystemToolRunner::new()));
    let orchestrator = Arc::new(ProcessingOrchestrator::new(settings.clone(), tools, sinks)?);

    let mut jobs = Vec::with_capacity(pdfs.len());
    for pdf in pdfs {
        let pdf_path = std::fs::canonicalize(&pdf)
            .with_context(|| format!("Cannot open {}", pdf.display()))?;
        let id = upload_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        store.create_upload(&Upload::new(&id, owner, pdf_path.clone()))?;
        bars.add(&id, &pdf_path);
        jobs.push(UploadJob {
            upload_id: id,
            owner_id: owner.to_string(),
            pdf_path,
        });
    }

    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(total);
    for job in jobs {
        let permit = semaphore.clone().acquire_owned().await?;
        let orchestrator = orchestrator.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let outcome = orchestrator.process(&job);
            (job, outcome)
        }));
    }

    let mut failed = 0;
    for handle in handles {
        let (job, outcome) = handle.await.context("processing task panicked")?;
        let name = job
            .pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match outcome {
            ProcessOutcome::Completed(summary) => {
                let marker = if summary.is_partial() {
                    style("!").yellow()
                } else {
                    style("✓").green()
                };
                bars.finish(&job.upload_id, "Done".to_string());
                bars.println(format!(
                    "{} {}: {} groups from {} pages (code {}, upload {})",
                    marker,
                    name,
                    summary.groups_created(),
                    summary.total_pages,
                    summary.code,
                    job.upload_id
                ));
                for skipped in &summary.skipped {
                    bars.println(format!(
                        "    {} segment {} skipped: {}",
                        style("✗").red(),
                        skipped.index + 1,
                        skipped.reason
                    ));
                }
            }
            ProcessOutcome::AlreadyProcessing => {
                bars.finish(&job.upload_id, "Skipped".to_string());
                bars.println(format!(
                    "{} {}: upload {} is already being processed",
                    style("→").dim(),
                    name,
                    job.upload_id
                ));
            }
            ProcessOutcome::Failed { message } => {
                failed += 1;
                bars.finish(&job.upload_id, "Failed".to_string());
                bars.println(format!("{} {}: {}", style("✗").red(), name, message));
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, total);
    }
    Ok(())
}

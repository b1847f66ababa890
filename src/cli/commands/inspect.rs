//! Dry-run segmentation of a single PDF.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use console::style;

use crate::config::Settings;
use crate::naming::LabelSource;
use crate::pipeline::{ProcessingOrchestrator, Sinks, Toolchain};
use crate::store::MemoryStore;
use crate::tools::SystemToolRunner;

/// Print the separator, segments and labels a PDF would produce.
pub async fn cmd_inspect(settings: &Settings, pdf: PathBuf) -> anyhow::Result<()> {
    let tools = Toolchain::from_settings(settings, Arc::new(SystemToolRunner::new()));
    let sinks = Sinks::from_store(Arc::new(MemoryStore::new()));
    let orchestrator = ProcessingOrchestrator::new(settings.clone(), tools, sinks)?;

    println!("{} Inspecting {}", style("→").cyan(), pdf.display());
    let report = tokio::task::spawn_blocking(move || orchestrator.inspect(&pdf))
        .await
        .context("inspect task panicked")??;

    println!("  Hash:      {}", style(&report.document_hash[..16]).dim());
    println!("  Pages:     {}", report.page_count);
    if report.separator.is_detected() {
        println!("  Separator: {}", style(&report.separator).cyan());
    } else {
        println!(
            "  Separator: {} (code {})",
            style("none").yellow(),
            report.code
        );
    }

    println!("\n{}", style(format!("{} segments", report.segments.len())).bold());
    for (index, segment) in report.segments.iter().enumerate() {
        let source = match &segment.derived.source {
            LabelSource::Pattern(name) => style(name.clone()).green(),
            LabelSource::Fallback => style("fallback".to_string()).yellow(),
        };
        println!(
            "  {:>3}. {:<40} pages {:<20} [{}]",
            index + 1,
            segment.file_label,
            format_pages(&segment.pages),
            source
        );
    }

    Ok(())
}

fn format_pages(pages: &[u32]) -> String {
    crate::extract::page_ranges(pages).join(",")
}

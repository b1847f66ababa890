//! Upload status.

use console::style;

use crate::cli::helpers::open_store;
use crate::config::Settings;
use crate::store::{GroupStore, UploadStatus, UploadStore};

/// Show an upload and the groups stored for it.
pub async fn cmd_status(settings: &Settings, upload_id: &str, json: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let Some(upload) = store.get_upload(upload_id)? else {
        anyhow::bail!("Upload not found: {}", upload_id);
    };
    let groups = store.list_for_upload(upload_id)?;

    if json {
        let value = serde_json::json!({
            "upload": upload,
            "groups": groups,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let status = match upload.status {
        UploadStatus::Completed => style(upload.status.as_str()).green(),
        UploadStatus::Failed => style(upload.status.as_str()).red(),
        UploadStatus::Processing => style(upload.status.as_str()).cyan(),
        UploadStatus::Queued => style(upload.status.as_str()).dim(),
    };

    println!("\n{}", style(format!("Upload {}", upload.id)).bold());
    println!("  Source:   {}", upload.source_path.display());
    println!("  Owner:    {}", upload.owner_id);
    println!("  Status:   {}", status);
    println!(
        "  Progress: {}%{}",
        upload.progress,
        upload
            .progress_message
            .as_deref()
            .map(|m| format!(" ({})", m))
            .unwrap_or_default()
    );
    if let Some(pages) = upload.total_pages {
        println!("  Pages:    {}", pages);
    }
    if let Some(ref error) = upload.error_message {
        println!("  Error:    {}", style(error).red());
    }
    println!(
        "  Updated:  {}",
        upload.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if groups.is_empty() {
        println!("\n  {}", style("No groups").dim());
        return Ok(());
    }

    println!("\n{}", style(format!("{} groups", groups.len())).bold());
    for group in &groups {
        println!(
            "  {:<40} {:>4} pages  {}",
            group.label,
            group.pages_count,
            style(group.pdf_path.display()).dim()
        );
    }

    Ok(())
}

//! External tool availability.

use console::style;

use crate::config::{RasterBackend, Settings};
use crate::tools::check_tools;

/// Report which external tools are installed and which ones the settings need.
pub async fn cmd_tools(settings: &Settings) -> anyhow::Result<()> {
    let rasterizer = match settings.recognition.rasterizer {
        RasterBackend::Pdftoppm => "pdftoppm",
        RasterBackend::Ghostscript => "gs",
    };
    let required = [
        "pdfinfo",
        rasterizer,
        "zbarimg",
        "pdftotext",
        "tesseract",
        settings.extraction.primary.as_str(),
        settings.extraction.secondary.as_str(),
    ];

    println!("\n{}", style("External Tools").bold());
    let mut missing = Vec::new();
    for (tool, available) in check_tools() {
        let needed = required.contains(&tool);
        let marker = if available {
            style("✓ found").green()
        } else if needed {
            style("✗ not found").red()
        } else {
            style("○ not found").dim()
        };
        let note = if needed { "" } else { " (optional)" };
        println!("  {:<10} {}{}", tool, marker, style(note).dim());
        if needed && !available {
            missing.push(tool);
        }
    }
    println!(
        "  {:<10} {}",
        "lopdf",
        style("✓ built in").green()
    );

    println!();
    if missing.is_empty() {
        println!("{} All required tools are available", style("✓").green());
    } else {
        println!(
            "{} Missing required tools: {}",
            style("!").yellow(),
            missing.join(", ")
        );
        println!(
            "  {}",
            style("Install with: apt install poppler-utils zbar-tools tesseract-ocr qpdf").dim()
        );
    }

    Ok(())
}

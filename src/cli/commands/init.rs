//! Initialize command.

use console::style;

use crate::cli::helpers::open_store;
use crate::config::Settings;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    for dir in [&settings.data_dir, &settings.output_dir, &settings.work_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }

    let store = open_store(settings)?;

    println!(
        "{} Initialized scansplit in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  Database: {}", style(store.db_path().display()).dim());
    println!("  Outputs:  {}", style(settings.output_dir.display()).dim());

    Ok(())
}

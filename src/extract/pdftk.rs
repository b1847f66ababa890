//! pdftk page subsetting.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{page_ranges, ExtractionError, PageSubsetter};
use crate::tools::{ToolCommand, ToolRunner};

/// `pdftk <in> cat <ranges...> output <out>`.
pub struct PdftkSubsetter {
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
}

impl PdftkSubsetter {
    pub fn new(runner: Arc<dyn ToolRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl PageSubsetter for PdftkSubsetter {
    fn name(&self) -> &'static str {
        "pdftk"
    }

    fn subset(&self, pdf: &Path, pages: &[u32], output: &Path) -> Result<(), ExtractionError> {
        let cmd = ToolCommand::new("pdftk", self.timeout)
            .path_arg(pdf)
            .arg("cat")
            .args(page_ranges(pages))
            .arg("output")
            .path_arg(output);
        self.runner.run(&cmd)?.into_success("pdftk")?;
        Ok(())
    }
}

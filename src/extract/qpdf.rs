//! qpdf page subsetting.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{page_ranges, ExtractionError, PageSubsetter};
use crate::tools::{ToolCommand, ToolError, ToolRunner};

/// qpdf exit status for "succeeded with warnings".
const QPDF_EXIT_WARNINGS: i32 = 3;

/// `qpdf --empty --pages <in> <ranges> -- <out>`.
pub struct QpdfSubsetter {
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
}

impl QpdfSubsetter {
    pub fn new(runner: Arc<dyn ToolRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl PageSubsetter for QpdfSubsetter {
    fn name(&self) -> &'static str {
        "qpdf"
    }

    fn subset(&self, pdf: &Path, pages: &[u32], output: &Path) -> Result<(), ExtractionError> {
        let cmd = ToolCommand::new("qpdf", self.timeout)
            .args(["--empty", "--pages"])
            .path_arg(pdf)
            .arg(page_ranges(pages).join(","))
            .arg("--")
            .path_arg(output);
        let result = self.runner.run(&cmd)?;
        match result.code {
            Some(0) => Ok(()),
            Some(QPDF_EXIT_WARNINGS) => {
                tracing::debug!("qpdf finished with warnings for {}", output.display());
                Ok(())
            }
            code => Err(ToolError::ExecutionFailed {
                tool: "qpdf".to_string(),
                code,
                stderr: result.stderr,
            }
            .into()),
        }
    }
}

//! Page counting via pdfinfo.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::tools::{ToolCommand, ToolError, ToolRunner};

/// Counts the pages of a PDF.
pub trait PageCounter: Send + Sync {
    fn page_count(&self, pdf: &Path) -> Result<u32, ToolError>;
}

/// Uses Poppler's pdfinfo and reads its `Pages:` line.
pub struct PdfInfoPageCounter {
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
}

impl PdfInfoPageCounter {
    pub fn new(runner: Arc<dyn ToolRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl PageCounter for PdfInfoPageCounter {
    fn page_count(&self, pdf: &Path) -> Result<u32, ToolError> {
        let cmd = ToolCommand::new("pdfinfo", self.timeout).path_arg(pdf);
        let output = self.runner.run(&cmd)?.into_success("pdfinfo")?;
        parse_pages_line(&output.stdout).ok_or_else(|| ToolError::UnexpectedOutput {
            tool: "pdfinfo".to_string(),
            detail: "no Pages: line".to_string(),
        })
    }
}

fn parse_pages_line(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find(|line| line.starts_with("Pages:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::ScriptedRunner;

    #[test]
    fn test_parses_page_count() {
        let runner = Arc::new(ScriptedRunner::new(vec![ScriptedRunner::ok(
            "Producer:       scanner\nPages:          12\nEncrypted:      no\n",
        )]));
        let counter = PdfInfoPageCounter::new(runner.clone(), Duration::from_secs(5));

        assert_eq!(counter.page_count(Path::new("/tmp/scan.pdf")).unwrap(), 12);
        assert_eq!(runner.args_of(0), vec!["/tmp/scan.pdf"]);
    }

    #[test]
    fn test_missing_pages_line_is_an_error() {
        let runner = Arc::new(ScriptedRunner::new(vec![ScriptedRunner::ok("Title: x\n")]));
        let counter = PdfInfoPageCounter::new(runner, Duration::from_secs(5));
        assert!(matches!(
            counter.page_count(Path::new("x.pdf")),
            Err(ToolError::UnexpectedOutput { .. })
        ));
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let runner = Arc::new(ScriptedRunner::new(vec![ScriptedRunner::exit(
            1,
            "Syntax Error: Couldn't find trailer dictionary",
        )]));
        let counter = PdfInfoPageCounter::new(runner, Duration::from_secs(5));
        assert!(matches!(
            counter.page_count(Path::new("broken.pdf")),
            Err(ToolError::ExecutionFailed { code: Some(1), .. })
        ));
    }
}

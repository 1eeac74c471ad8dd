//! Result types produced by the OCR pipeline.

use crate::error::{OcrError, PageError};
use crate::pipeline::input::InputFile;
use serde::Serialize;
use std::path::PathBuf;

/// Placeholder written for a page where the service recognised nothing.
pub const NO_TEXT_PLACEHOLDER: &str = "[no text]";

/// What recognition produced for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PageOutcome {
    /// Recognised text (may still be empty if a caller built it that way).
    Text(String),
    /// The service answered but found no text on the page.
    NoText,
    /// The page could not be processed.
    Failed(PageError),
}

impl PageOutcome {
    /// Text to place in output documents for this page.
    ///
    /// Empty text and [`PageOutcome::NoText`] both render as
    /// [`NO_TEXT_PLACEHOLDER`]; failures render as `[<marker>]`.
    pub fn display_text(&self) -> String {
        match self {
            PageOutcome::Text(t) if !t.trim().is_empty() => t.clone(),
            PageOutcome::Text(_) | PageOutcome::NoText => NO_TEXT_PLACEHOLDER.to_string(),
            PageOutcome::Failed(e) => format!("[{}]", e.marker()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PageOutcome::Failed(_))
    }
}

/// The outcome of one page together with its 1-based page number.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub page_num: usize,
    pub outcome: PageOutcome,
    /// Number of OCR requests issued for this page (0 if it never got that far).
    pub attempts: u32,
    pub duration_ms: u64,
}

impl PageResult {
    pub fn new(page_num: usize, outcome: PageOutcome) -> Self {
        Self {
            page_num,
            outcome,
            attempts: 0,
            duration_ms: 0,
        }
    }
}

/// All page results of one input file, in rasterisation order.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub input: InputFile,
    pub pages: Vec<PageResult>,
}

impl FileResult {
    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.outcome.is_failure()).count()
    }
}

/// Per-file line in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub input: PathBuf,
    /// Per-file document, `None` when the file failed as a whole.
    pub output: Option<PathBuf>,
    pub pages: usize,
    pub failed_pages: usize,
    /// File-level failure (e.g. corrupt PDF).
    pub error: Option<String>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub files: Vec<FileSummary>,
    /// `all_text.{docx,txt,csv}` when merging was requested.
    pub merged_outputs: Vec<PathBuf>,
    pub cancelled: bool,
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }

    pub fn total_pages(&self) -> usize {
        self.files.iter().map(|f| f.pages).sum()
    }

    pub fn failed_pages(&self) -> usize {
        self.files.iter().map(|f| f.failed_pages).sum()
    }

    /// Exit code for a completed run: 0, or 130 when it was cancelled.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            130
        } else {
            0
        }
    }

    pub(crate) fn record_failure(&mut self, input: PathBuf, err: &OcrError) {
        self.files.push(FileSummary {
            input,
            output: None,
            pages: 0,
            failed_pages: 0,
            error: Some(err.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_renders_placeholder() {
        assert_eq!(PageOutcome::Text(String::new()).display_text(), "[no text]");
        assert_eq!(PageOutcome::Text("  \n".into()).display_text(), "[no text]");
        assert_eq!(PageOutcome::NoText.display_text(), "[no text]");
        assert_eq!(PageOutcome::Text("Hello".into()).display_text(), "Hello");
    }

    #[test]
    fn failure_renders_marker() {
        let o = PageOutcome::Failed(PageError::MalformedResponse {
            page: 1,
            detail: "eof".into(),
        });
        assert_eq!(o.display_text(), "[text extraction error]");
        assert!(o.is_failure());
    }

    #[test]
    fn cancelled_run_exit_code() {
        let mut s = RunSummary::default();
        assert_eq!(s.exit_code(), 0);
        s.cancelled = true;
        assert_eq!(s.exit_code(), 130);
    }
}

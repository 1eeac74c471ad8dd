//! Progress-callback trait for run, file and page events.
//!
//! Inject an [`Arc<dyn OcrProgressCallback>`] via
//! [`crate::config::OcrConfigBuilder::progress_callback`] to receive events
//! as the pipeline works through the batch. The CLI renders them as a
//! progress bar; library users can forward them anywhere.
//!
//! # Example
//!
//! ```rust
//! use yandex_ocr::{OcrProgressCallback, PageOutcome};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct FailureCounter(AtomicUsize);
//!
//! impl OcrProgressCallback for FailureCounter {
//!     fn on_page_complete(&self, _file: &str, _page: usize, _total: usize, outcome: &PageOutcome) {
//!         if outcome.is_failure() {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use crate::output::PageOutcome;
use std::sync::Arc;

/// Called by the pipeline as it processes files and pages.
///
/// All methods default to no-ops. With `concurrency > 1` the page methods may
/// be called from several tasks at once, so implementations must be
/// `Send + Sync`.
pub trait OcrProgressCallback: Send + Sync {
    /// Called once after input discovery.
    fn on_run_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called once the page count of a file is known.
    ///
    /// # Arguments
    /// * `file`        — display name of the input file
    /// * `file_index`  — 1-based position in the batch
    /// * `total_pages` — pages that will be recognised
    fn on_file_start(&self, file: &str, file_index: usize, total_pages: usize) {
        let _ = (file, file_index, total_pages);
    }

    /// Called after each page has its final outcome.
    fn on_page_complete(&self, file: &str, page_num: usize, total_pages: usize, outcome: &PageOutcome) {
        let _ = (file, page_num, total_pages, outcome);
    }

    /// Called when a file's document has been written.
    fn on_file_complete(&self, file: &str, pages: usize, failed_pages: usize) {
        let _ = (file, pages, failed_pages);
    }

    /// Called when a whole file failed (e.g. unreadable PDF).
    fn on_file_error(&self, file: &str, error: &str) {
        let _ = (file, error);
    }

    /// Called once at the end, also after cancellation.
    fn on_run_complete(&self, total_files: usize, failed_files: usize) {
        let _ = (total_files, failed_files);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl OcrProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::OcrConfig`].
pub type ProgressCallback = Arc<dyn OcrProgressCallback>;

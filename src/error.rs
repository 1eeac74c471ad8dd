//! Error types for the yandex-ocr library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`] — **Fatal** for the scope it is raised in. Configuration
//!   and input errors abort the whole run before any file is touched;
//!   file-level errors (a PDF pdfium cannot open) abort only that file and
//!   are recorded in [`crate::output::RunSummary`].
//!
//! * [`PageError`] — **Non-fatal**: a single page could not be rasterised,
//!   enhanced or recognised. Stored inside [`crate::output::PageOutcome`] so
//!   every page still produces exactly one result and the document keeps its
//!   page numbering.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the yandex-ocr library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// No IAM token, API key or exchangeable OAuth token was available.
    #[error(
        "No Yandex Cloud credentials available.\n\
Provide one of --iam-token, --api-key or --oauth-token \
(or YANDEX_IAM_TOKEN / YANDEX_API_KEY / YANDEX_OAUTH_TOKEN)."
    )]
    MissingCredentials,

    /// The folder id scoping the request is missing.
    #[error("No Yandex Cloud folder id.\nProvide --folder-id or set YANDEX_FOLDER_ID.")]
    MissingFolderId,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// The input path does not exist and could not be found by name.
    #[error("Input path '{path}' not found")]
    InputNotFound { path: PathBuf },

    /// The input directory contains no supported files.
    #[error("No supported input files (pdf, png, jpg, jpeg, tif, tiff, bmp) under '{path}'")]
    NoInputFiles { path: PathBuf },

    // ── File-level errors ─────────────────────────────────────────────────
    /// pdfium could not open the document at all.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or place the library next to the binary."
    )]
    PdfiumBindingFailed(String),

    /// The per-file scratch directory could not be created.
    #[error("Failed to create scratch directory under '{path}': {source}")]
    ScratchDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output document.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrError {
    /// Process exit code the CLI reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            OcrError::InputNotFound { .. } | OcrError::NoInputFiles { .. } => 1,
            OcrError::MissingCredentials => 2,
            OcrError::MissingFolderId => 3,
            OcrError::InvalidConfig(_) => 4,
            OcrError::OutputWriteFailed { .. } | OcrError::ScratchDirFailed { .. } => 5,
            OcrError::CorruptPdf { .. }
            | OcrError::PdfiumBindingFailed(_)
            | OcrError::Internal(_) => 6,
        }
    }

    /// True for errors that must stop the run before any file is processed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            OcrError::MissingCredentials | OcrError::MissingFolderId | OcrError::InvalidConfig(_)
        )
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// pdfium failed to render this page.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The page raster could not be decoded.
    #[error("Page {page}: image could not be read: {detail}")]
    ImageUnreadable { page: usize, detail: String },

    /// Preprocessing or JPEG encoding failed.
    #[error("Page {page}: preprocessing failed: {detail}")]
    EnhanceFailed { page: usize, detail: String },

    /// HTTP 429 on every attempt.
    #[error("Page {page}: rate limited on all {attempts} attempts")]
    RateLimited { page: usize, attempts: u32 },

    /// Non-success status other than 429; never retried.
    #[error("Page {page}: OCR service returned HTTP {status}: {detail}")]
    ServiceError {
        page: usize,
        status: u16,
        detail: String,
    },

    /// No HTTP response at all.
    #[error("Page {page}: OCR request failed: {detail}")]
    Transport { page: usize, detail: String },

    /// The response body was not the expected JSON.
    #[error("Page {page}: could not parse OCR response: {detail}")]
    MalformedResponse { page: usize, detail: String },

    /// The run was cancelled before this page finished.
    #[error("Page {page}: cancelled")]
    Cancelled { page: usize },
}

impl PageError {
    /// Short marker used as the document placeholder, e.g. `error 403`.
    pub fn marker(&self) -> String {
        match self {
            PageError::RenderFailed { .. } => "rasterisation error".to_string(),
            PageError::ImageUnreadable { .. } => "unreadable image".to_string(),
            PageError::EnhanceFailed { .. } => "preprocessing error".to_string(),
            PageError::RateLimited { .. } => "error 429".to_string(),
            PageError::ServiceError { status, .. } => format!("error {status}"),
            PageError::Transport { .. } => "request failed".to_string(),
            PageError::MalformedResponse { .. } => "text extraction error".to_string(),
            PageError::Cancelled { .. } => "cancelled".to_string(),
        }
    }

    /// 1-based page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::ImageUnreadable { page, .. }
            | PageError::EnhanceFailed { page, .. }
            | PageError::RateLimited { page, .. }
            | PageError::ServiceError { page, .. }
            | PageError::Transport { page, .. }
            | PageError::MalformedResponse { page, .. }
            | PageError::Cancelled { page } => *page,
        }
    }
}

//! # yandex-ocr
//!
//! Recognise text in scanned images and PDFs with Yandex Cloud Vision and
//! collect it into Word documents.
//!
//! ## Why preprocess?
//!
//! Phone photos and low-DPI scans come in grey, soft and noisy. The service
//! does noticeably better on a crisp bilevel image, and it rejects uploads
//! above roughly 1 MB. Every page is therefore upscaled if small, converted to
//! grayscale, contrast-boosted, sharpened and thresholded before a JPEG
//! quality ladder squeezes it under the size ceiling.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input path
//!  │
//!  ├─ 1. Input    file, directory walk, or by-name search
//!  ├─ 2. Render   PDF pages → PNG via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Enhance  grayscale, contrast, sharpen, threshold, JPEG ≤ 1 MB
//!  ├─ 4. OCR      batchAnalyze with 429 backoff
//!  ├─ 5. Extract  blocks → lines → words, normalised
//!  └─ 6. Output   <stem>/<stem>.docx, optional all_text.{docx,txt,csv}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use yandex_ocr::{run, CredentialSources, IamTokenExchange, OcrConfig};
//! use std::path::Path;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // YANDEX_IAM_TOKEN, YANDEX_API_KEY or YANDEX_OAUTH_TOKEN
//!     let exchange = IamTokenExchange::new(Duration::from_secs(30))?;
//!     let credentials =
//!         yandex_ocr::resolve_credentials(&CredentialSources::from_env(), &exchange).await?;
//!
//!     let config = OcrConfig::builder()
//!         .credentials(credentials)
//!         .folder_id(std::env::var("YANDEX_FOLDER_ID")?)
//!         .merge_output(true)
//!         .build()?;
//!
//!     let summary = run(Path::new("scans/"), &config, CancellationToken::new()).await?;
//!     eprintln!("{} pages, {} failed", summary.total_pages(), summary.failed_pages());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `yandex-ocr` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! yandex-ocr = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod auth;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{MergedOutput, RichDocument};
pub use auth::{
    resolve_credentials, CredentialSources, Credentials, IamTokenExchange, SessionToken,
    TokenExchange,
};
pub use config::{EnhanceSettings, OcrConfig, OcrConfigBuilder, RetryPolicy, TextFeature};
pub use convert::{process_file, run, run_with_transport};
pub use error::{OcrError, PageError};
pub use output::{FileResult, FileSummary, PageOutcome, PageResult, RunSummary};
pub use pipeline::input::{InputFile, InputKind};
pub use pipeline::ocr::{HttpReply, HttpTransport, OcrClient, OcrTransport};
pub use progress::{NoopProgressCallback, OcrProgressCallback, ProgressCallback};

//! Run entry points: discover inputs, recognise every page, write documents.
//!
//! ## Why files sequential, pages buffered?
//!
//! The OCR service rate-limits per folder, so hammering it with several files
//! at once only produces more 429s. Files are therefore processed one at a
//! time, while the pages of a file go through an order-preserving
//! `buffered(concurrency)` stream. With the default concurrency of 1 this is
//! fully sequential; raising it overlaps enhancement of page N+1 with the
//! request for page N without ever reordering results.
//!
//! ## Failure scopes
//!
//! * Configuration problems surface from [`crate::config::OcrConfigBuilder::build`]
//!   before this module is reached.
//! * Input discovery failures abort the run (nothing to do).
//! * A file pdfium cannot open, or whose document cannot be written, is
//!   recorded in the summary; the batch continues. Its recognised pages still
//!   go into the merged outputs.
//! * A page failure becomes a placeholder in that file's document.
//! * Only a failed write of the merged outputs aborts the run.

use crate::assemble::{file_docx_path, MergedOutput, RichDocument};
use crate::config::OcrConfig;
use crate::error::{OcrError, PageError};
use crate::output::{FileResult, FileSummary, PageOutcome, PageResult, RunSummary};
use crate::pipeline::enhance::prepare_page;
use crate::pipeline::input::{locate_inputs, InputFile};
use crate::pipeline::ocr::{HttpTransport, OcrClient, OcrTransport};
use crate::pipeline::render::{rasterize, Page};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Recognise everything under `input` and write the documents.
///
/// Uses the reqwest-backed [`HttpTransport`] against `config.endpoint`.
///
/// # Returns
/// `Ok(RunSummary)` whenever the run got as far as processing files, even if
/// some files or pages failed; check [`RunSummary::failed_files`] and
/// [`RunSummary::failed_pages`]. A cancelled run also returns `Ok` with
/// `cancelled` set, after flushing what it had.
///
/// # Errors
/// * [`OcrError::InputNotFound`] / [`OcrError::NoInputFiles`]
/// * [`OcrError::MissingCredentials`] / [`OcrError::MissingFolderId`]
/// * [`OcrError::OutputWriteFailed`] for the merged `all_text.*` outputs
pub async fn run(
    input: &Path,
    config: &OcrConfig,
    cancel: CancellationToken,
) -> Result<RunSummary, OcrError> {
    let transport = Arc::new(HttpTransport::from_config(config)?);
    run_with_transport(input, config, transport, cancel).await
}

/// Same as [`run`] with a caller-supplied transport.
pub async fn run_with_transport(
    input: &Path,
    config: &OcrConfig,
    transport: Arc<dyn OcrTransport>,
    cancel: CancellationToken,
) -> Result<RunSummary, OcrError> {
    let total_start = Instant::now();
    let client = OcrClient::new(config, transport)?;

    // ── Step 1: Discover inputs ──────────────────────────────────────────
    let exclude = [config.output_dir.clone(), config.tmp_dir.clone()];
    let files = locate_inputs(input, &exclude)?;
    info!("Processing {} file(s) from {}", files.len(), input.display());

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(files.len());
    }

    std::fs::create_dir_all(&config.tmp_dir).map_err(|source| OcrError::ScratchDirFailed {
        path: config.tmp_dir.clone(),
        source,
    })?;

    // ── Step 2: Files, one at a time ─────────────────────────────────────
    let mut summary = RunSummary::default();
    let mut merged = MergedOutput::new();

    for (idx, file) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("Cancelled, skipping {} remaining file(s)", files.len() - idx);
            break;
        }

        let result = match process_file(file, idx + 1, config, &client, &cancel).await {
            Ok(result) => result,
            Err(e) => {
                report_file_error(config, file, &e);
                summary.record_failure(file.path.clone(), &e);
                continue;
            }
        };

        let output = file_docx_path(&config.output_dir, &file.stem());
        let pages = result.pages.len();
        let failed = result.failed_pages();
        let written = RichDocument::for_file(&result).write_docx(&output);
        if config.merge_output {
            merged.push(result);
        }

        match written {
            Ok(()) => {
                info!(
                    "Saved OCR result for {} to {} ({} page(s), {} failed)",
                    file.path.display(),
                    output.display(),
                    pages,
                    failed
                );
                if let Some(ref cb) = config.progress_callback {
                    cb.on_file_complete(&file.display_name(), pages, failed);
                }
                summary.files.push(FileSummary {
                    input: file.path.clone(),
                    output: Some(output),
                    pages,
                    failed_pages: failed,
                    error: None,
                });
            }
            Err(e) => {
                report_file_error(config, file, &e);
                summary.files.push(FileSummary {
                    input: file.path.clone(),
                    output: None,
                    pages,
                    failed_pages: failed,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    // ── Step 3: Merged outputs ───────────────────────────────────────────
    if config.merge_output && !merged.is_empty() {
        summary.merged_outputs = merged.write(&config.output_dir)?;
    }

    summary.cancelled = cancel.is_cancelled();
    summary.total_duration_ms = total_start.elapsed().as_millis() as u64;

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(summary.files.len(), summary.failed_files());
    }
    info!(
        "Run finished: {} file(s), {} page(s), {} failed page(s), {} failed file(s) in {}ms{}",
        summary.files.len(),
        summary.total_pages(),
        summary.failed_pages(),
        summary.failed_files(),
        summary.total_duration_ms,
        if summary.cancelled { " (cancelled)" } else { "" }
    );

    Ok(summary)
}

fn report_file_error(config: &OcrConfig, file: &InputFile, err: &OcrError) {
    error!("{}: {}", file.path.display(), err);
    if let Some(ref cb) = config.progress_callback {
        cb.on_file_error(&file.display_name(), &err.to_string());
    }
}

/// Rasterise, enhance and recognise one file.
///
/// The scratch directory lives under `config.tmp_dir` and is removed when
/// this returns unless `config.keep_tmp` is set.
pub async fn process_file(
    file: &InputFile,
    file_index: usize,
    config: &OcrConfig,
    client: &OcrClient,
    cancel: &CancellationToken,
) -> Result<FileResult, OcrError> {
    let start = Instant::now();
    let scratch = tempfile::Builder::new()
        .prefix(&format!("{}-", file.stem()))
        .tempdir_in(&config.tmp_dir)
        .map_err(|source| OcrError::ScratchDirFailed {
            path: config.tmp_dir.clone(),
            source,
        })?;
    debug!("Scratch dir for {}: {}", file.display_name(), scratch.path().display());

    let pages = rasterize(file, config.dpi, scratch.path()).await?;
    let total_pages = pages.len();
    let name = file.display_name();

    if let Some(ref cb) = config.progress_callback {
        cb.on_file_start(&name, file_index, total_pages);
    }

    let scratch_path = scratch.path();
    let name_ref = name.as_str();
    let results: Vec<PageResult> = stream::iter(pages)
        .map(|page| async move {
            let result = process_page(page, config, client, scratch_path, cancel).await;
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_complete(name_ref, result.page_num, total_pages, &result.outcome);
            }
            result
        })
        .buffered(config.concurrency.max(1))
        .collect()
        .await;

    if config.keep_tmp {
        let kept = scratch.keep();
        info!("Keeping scratch images in {}", kept.display());
    }

    debug!(
        "{}: {} page(s) in {}ms",
        name,
        results.len(),
        start.elapsed().as_millis()
    );

    Ok(FileResult {
        input: file.clone(),
        pages: results,
    })
}

/// One page from raster to outcome. Never fails outright.
async fn process_page(
    page: Result<Page, PageError>,
    config: &OcrConfig,
    client: &OcrClient,
    scratch: &Path,
    cancel: &CancellationToken,
) -> PageResult {
    let page = match page {
        Ok(p) => p,
        Err(e) => return PageResult::new(e.page(), PageOutcome::Failed(e)),
    };
    let number = page.number;
    if cancel.is_cancelled() {
        return PageResult::new(number, PageOutcome::Failed(PageError::Cancelled { page: number }));
    }

    let settings = config.enhance;
    let scratch = scratch.to_path_buf();
    let prepared =
        match tokio::task::spawn_blocking(move || prepare_page(&page, &settings, &scratch)).await {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(e)) => {
                warn!("{}", e);
                return PageResult::new(number, PageOutcome::Failed(e));
            }
            Err(e) => {
                let e = PageError::EnhanceFailed {
                    page: number,
                    detail: format!("task panicked: {}", e),
                };
                return PageResult::new(number, PageOutcome::Failed(e));
            }
        };

    client.recognize(number, &prepared.jpeg, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::pipeline::ocr::HttpReply;
    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage, Luma};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport(AtomicUsize);

    #[async_trait]
    impl OcrTransport for CountingTransport {
        async fn send(&self, _auth: &str, _body: &Value) -> Result<HttpReply, String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(HttpReply {
                status: 200,
                body: format!(
                    r#"{{"results":[{{"results":[{{"textDetection":{{"pages":[{{"blocks":[{{"lines":[{{"words":[{{"text":"call{n}"}}]}}]}}]}}]}}}}]}}]}}"#
                ),
            })
        }
    }

    fn config(root: &Path) -> OcrConfig {
        OcrConfig::builder()
            .credentials(Credentials::Bearer("t1".into()))
            .folder_id("b1g")
            .output_dir(root.join("result"))
            .tmp_dir(root.join("result").join("tmp"))
            .build()
            .unwrap()
    }

    fn write_image(path: &Path) {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 20, Luma([200])))
            .save(path)
            .unwrap();
    }

    #[tokio::test]
    async fn image_file_yields_one_page_and_cleans_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("scan.png");
        write_image(&img);
        let config = config(dir.path());
        std::fs::create_dir_all(&config.tmp_dir).unwrap();
        let client = OcrClient::new(
            &config,
            Arc::new(CountingTransport(AtomicUsize::new(0))),
        )
        .unwrap();

        let result = process_file(&InputFile::new(&img), 1, &config, &client, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].outcome, PageOutcome::Text("call1".into()));
        assert_eq!(std::fs::read_dir(&config.tmp_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn keep_tmp_leaves_enhanced_image() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("scan.png");
        write_image(&img);
        let mut config = config(dir.path());
        config.keep_tmp = true;
        std::fs::create_dir_all(&config.tmp_dir).unwrap();
        let client = OcrClient::new(
            &config,
            Arc::new(CountingTransport(AtomicUsize::new(0))),
        )
        .unwrap();

        process_file(&InputFile::new(&img), 1, &config, &client, &CancellationToken::new())
            .await
            .unwrap();
        let kept: Vec<_> = std::fs::read_dir(&config.tmp_dir).unwrap().collect();
        assert_eq!(kept.len(), 1);
        let scratch = kept[0].as_ref().unwrap().path();
        assert!(scratch.join("scan_page_0001.jpg").exists());
    }

    #[tokio::test]
    async fn cancelled_file_gets_cancelled_markers() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("scan.png");
        write_image(&img);
        let config = config(dir.path());
        std::fs::create_dir_all(&config.tmp_dir).unwrap();
        let transport = Arc::new(CountingTransport(AtomicUsize::new(0)));
        let client = OcrClient::new(&config, transport.clone()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = process_file(&InputFile::new(&img), 1, &config, &client, &cancel)
            .await
            .unwrap();
        assert_eq!(result.pages[0].outcome.display_text(), "[cancelled]");
        assert_eq!(transport.0.load(Ordering::SeqCst), 0);
    }
}

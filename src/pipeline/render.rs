//! PDF rasterisation: render every page to a PNG in the file's scratch dir.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is
//! CPU-bound and not async-aware. `tokio::task::spawn_blocking` moves the
//! work onto the blocking pool so OCR requests for earlier files are not
//! stalled by rendering.
//!
//! ## Why write pages to disk?
//!
//! A 300 DPI A4 page is roughly 2480 × 3508 px, over 30 MB as RGBA. Keeping
//! every page of a long PDF in memory does not scale, so each page is written
//! as a PNG and decoded again by the enhancer when its turn comes.

use crate::error::{OcrError, PageError};
use crate::pipeline::input::{InputFile, InputKind};
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// One page of an input file, materialised as a raster on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    pub source: InputFile,
    /// Raster location: a PNG in the scratch dir, or the source image itself.
    pub path: PathBuf,
}

impl Page {
    /// Decode the raster.
    pub fn load(&self) -> Result<DynamicImage, PageError> {
        image::open(&self.path).map_err(|e| PageError::ImageUnreadable {
            page: self.number,
            detail: format!("{}: {}", self.path.display(), e),
        })
    }
}

/// Scratch file name for a rendered PDF page.
pub fn page_file_name(page_num: usize) -> String {
    format!("page_{page_num:04}.png")
}

/// Produce the pages of `input` in document order.
///
/// Image inputs become a single page without touching pdfium. For PDFs an
/// `Err` means the document as a whole could not be opened; a page that
/// fails on its own is an `Err` entry at its position.
pub async fn rasterize(
    input: &InputFile,
    dpi: u32,
    scratch: &Path,
) -> Result<Vec<Result<Page, PageError>>, OcrError> {
    if input.kind == InputKind::Image {
        return Ok(vec![Ok(Page {
            number: 1,
            source: input.clone(),
            path: input.path.clone(),
        })]);
    }

    let input = input.clone();
    let scratch = scratch.to_path_buf();

    tokio::task::spawn_blocking(move || rasterize_pdf_blocking(&input, dpi, &scratch))
        .await
        .map_err(|e| OcrError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of page rendering.
fn rasterize_pdf_blocking(
    input: &InputFile,
    dpi: u32,
    scratch: &Path,
) -> Result<Vec<Result<Page, PageError>>, OcrError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(&input.path, None)
        .map_err(|e| OcrError::CorruptPdf {
            path: input.path.clone(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    info!(
        "PDF loaded: {} ({} pages)",
        input.path.display(),
        pages.len()
    );

    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / POINTS_PER_INCH);
    let mut results = Vec::with_capacity(pages.len() as usize);

    for (idx, page) in pages.iter().enumerate() {
        let number = idx + 1;
        let rendered = page
            .render_with_config(&render_config)
            .map_err(|e| PageError::RenderFailed {
                page: number,
                detail: format!("{:?}", e),
            })
            .and_then(|bitmap| {
                let image = bitmap.as_image();
                let path = scratch.join(page_file_name(number));
                image
                    .save_with_format(&path, ImageFormat::Png)
                    .map_err(|e| PageError::RenderFailed {
                        page: number,
                        detail: format!("saving {}: {}", path.display(), e),
                    })?;
                debug!(
                    "Rendered page {} → {}x{} px",
                    number,
                    image.width(),
                    image.height()
                );
                Ok(Page {
                    number,
                    source: input.clone(),
                    path,
                })
            });

        if let Err(ref e) = rendered {
            warn!("{}: {}", input.path.display(), e);
        }
        results.push(rendered);
    }

    Ok(results)
}

/// Bind to a pdfium shared library.
///
/// Lookup order: `PDFIUM_LIB_PATH`, the working directory, then the system
/// library search path.
pub fn bind_pdfium() -> Result<Pdfium, OcrError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(path) => Pdfium::bind_to_library(PathBuf::from(path)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| OcrError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_file_names_sort_in_page_order() {
        let mut names: Vec<String> = [10, 2, 1, 100].iter().map(|&n| page_file_name(n)).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "page_0001.png",
                "page_0002.png",
                "page_0010.png",
                "page_0100.png"
            ]
        );
    }

    #[tokio::test]
    async fn image_input_is_a_single_page() {
        let input = InputFile::new("/scans/receipt.JPG");
        let pages = rasterize(&input, 300, Path::new("/unused")).await.unwrap();
        assert_eq!(pages.len(), 1);
        let page = pages[0].as_ref().unwrap();
        assert_eq!(page.number, 1);
        assert_eq!(page.path, PathBuf::from("/scans/receipt.JPG"));
    }

    #[tokio::test]
    async fn unreadable_pdf_is_a_file_level_error() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("broken.pdf");
        std::fs::write(&pdf, b"definitely not a pdf").unwrap();
        // Either pdfium is missing (binding error) or it rejects the file.
        let result = rasterize(&InputFile::new(&pdf), 300, dir.path()).await;
        assert!(matches!(
            result,
            Err(OcrError::CorruptPdf { .. }) | Err(OcrError::PdfiumBindingFailed(_))
        ));
    }

    #[test]
    fn missing_image_page_is_unreadable() {
        let page = Page {
            number: 3,
            source: InputFile::new("/nope/x.png"),
            path: PathBuf::from("/nope/x.png"),
        };
        assert!(matches!(
            page.load(),
            Err(PageError::ImageUnreadable { page: 3, .. })
        ));
    }

    #[tokio::test]
    async fn pdf_with_n_pages_yields_n_ordered_pages() {
        let Ok(pdfium) = bind_pdfium() else {
            println!("SKIP — pdfium library not available");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("three.pdf");
        {
            let mut document = pdfium.create_new_pdf().unwrap();
            for _ in 0..3 {
                document
                    .pages_mut()
                    .create_page_at_end(PdfPagePaperSize::a4())
                    .unwrap();
            }
            document.save_to_file(&pdf).unwrap();
        }
        drop(pdfium);

        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        let pages = rasterize(&InputFile::new(&pdf), 72, &scratch).await.unwrap();

        let numbers: Vec<usize> = pages.iter().map(|p| p.as_ref().unwrap().number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        for p in &pages {
            assert!(p.as_ref().unwrap().path.exists());
        }
    }
}

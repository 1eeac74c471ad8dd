//! Pipeline stages for turning scans into text.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ enhance ──▶ ocr ──▶ extract
//! (paths)   (pdfium)   (image)    (HTTP)   (JSON → text)
//! ```
//!
//! 1. [`input`]   — resolve the user-supplied path into an ordered file list
//! 2. [`render`]  — rasterise PDF pages to PNG; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`enhance`] — grayscale, contrast, sharpen, threshold, then fit the
//!    JPEG under the upload ceiling
//! 4. [`ocr`]     — the only stage with network I/O; retries 429 with backoff
//! 5. [`extract`] — walk the response structure and normalise the text

pub mod enhance;
pub mod extract;
pub mod input;
pub mod ocr;
pub mod render;

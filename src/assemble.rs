//! Turn page results into output documents.
//!
//! A [`RichDocument`] is a flat list of headings and paragraphs, built from
//! one or more [`FileResult`]s and rendered to `.docx` with docx-rs. The merged
//! plain-text and CSV outputs are written straight from the results.
//!
//! ## Layout
//!
//! ```text
//! per file  (<out>/<stem>/<stem>.docx)    merged  (<out>/all_text.docx)
//!   ## Page 1                               # scan.pdf
//!   <text>                                  ## Page 1
//!   ## Page 2                               <text>
//!   [no text]                               # photo.jpg
//!                                           ## Page 1
//!                                           [error 429]
//! ```

use crate::error::OcrError;
use crate::output::FileResult;
use docx_rs::{BreakType, Docx, Paragraph, Run, Style, StyleType};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MERGED_STEM: &str = "all_text";

/// One block of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph(String),
}

/// An ordered list of blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichDocument {
    pub blocks: Vec<Block>,
}

impl RichDocument {
    /// Page headings and texts of a single file.
    pub fn for_file(result: &FileResult) -> Self {
        let mut doc = Self::default();
        doc.push_pages(result);
        doc
    }

    /// All files, each introduced by a level-1 heading with its name.
    pub fn merged(results: &[FileResult]) -> Self {
        let mut doc = Self::default();
        for result in results {
            doc.blocks.push(Block::Heading {
                level: 1,
                text: result.input.display_name(),
            });
            doc.push_pages(result);
        }
        doc
    }

    fn push_pages(&mut self, result: &FileResult) {
        for page in &result.pages {
            self.blocks.push(Block::Heading {
                level: 2,
                text: format!("Page {}", page.page_num),
            });
            self.blocks.push(Block::Paragraph(page.outcome.display_text()));
        }
    }

    pub fn headings(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Heading { text, .. } => Some(text.as_str()),
            Block::Paragraph(_) => None,
        })
    }

    /// Render as `.docx` at `path`, creating parent directories.
    pub fn write_docx(&self, path: &Path) -> Result<(), OcrError> {
        write_with_parent(path, |p| {
            let file = File::create(p)?;
            self.to_docx()
                .build()
                .pack(file)
                .map_err(|e| io::Error::other(e.to_string()))
        })
    }

    fn to_docx(&self) -> Docx {
        let mut docx = Docx::new()
            .add_style(
                Style::new("Heading1", StyleType::Paragraph)
                    .name("Heading 1")
                    .size(32)
                    .bold(),
            )
            .add_style(
                Style::new("Heading2", StyleType::Paragraph)
                    .name("Heading 2")
                    .size(26)
                    .bold(),
            );

        for block in &self.blocks {
            let paragraph = match block {
                Block::Heading { level, text } => Paragraph::new()
                    .add_run(Run::new().add_text(text.as_str()))
                    .style(&format!("Heading{}", level)),
                Block::Paragraph(text) => Paragraph::new().add_run(multiline_run(text)),
            };
            docx = docx.add_paragraph(paragraph);
        }
        docx
    }
}

/// A run with one text node per line, separated by soft line breaks.
fn multiline_run(text: &str) -> Run {
    let mut run = Run::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            run = run.add_break(BreakType::TextWrapping);
        }
        run = run.add_text(line);
    }
    run
}

/// Write the merged plain-text output.
///
/// ```text
/// scan.pdf
/// Page 1
/// <text>
///
/// photo.jpg
/// Page 1
/// <text>
/// ```
pub fn write_plain_text(results: &[FileResult], path: &Path) -> Result<(), OcrError> {
    write_with_parent(path, |p| {
        let mut out = io::BufWriter::new(File::create(p)?);
        out.write_all(render_plain_text(results).as_bytes())?;
        out.flush()
    })
}

pub fn render_plain_text(results: &[FileResult]) -> String {
    let mut text = String::new();
    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            text.push('\n');
        }
        text.push_str(&result.input.display_name());
        text.push('\n');
        for page in &result.pages {
            text.push_str(&format!("Page {}\n{}\n", page.page_num, page.outcome.display_text()));
        }
    }
    text
}

/// Write the merged CSV: header `file,page,text`, one row per page.
pub fn write_csv(results: &[FileResult], path: &Path) -> Result<(), OcrError> {
    write_with_parent(path, |p| {
        let mut writer = csv::Writer::from_path(p).map_err(io::Error::from)?;
        writer.write_record(["file", "page", "text"]).map_err(io::Error::from)?;
        for result in results {
            let name = result.input.display_name();
            for page in &result.pages {
                writer
                    .write_record([
                        name.as_str(),
                        page.page_num.to_string().as_str(),
                        page.outcome.display_text().as_str(),
                    ])
                    .map_err(io::Error::from)?;
            }
        }
        writer.flush()
    })
}

fn write_with_parent(
    path: &Path,
    write: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<(), OcrError> {
    let wrap = |source: io::Error| OcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }
    write(path).map_err(wrap)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Per-file document location: `<output_dir>/<stem>/<stem>.docx`.
pub fn file_docx_path(output_dir: &Path, stem: &str) -> PathBuf {
    output_dir.join(stem).join(format!("{stem}.docx"))
}

/// Collects file results across a run for the merged outputs.
#[derive(Debug, Default)]
pub struct MergedOutput {
    results: Vec<FileResult>,
}

impl MergedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: FileResult) {
        self.results.push(result);
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Write `all_text.{docx,txt,csv}` into `output_dir`.
    pub fn write(&self, output_dir: &Path) -> Result<Vec<PathBuf>, OcrError> {
        let docx = output_dir.join(format!("{MERGED_STEM}.docx"));
        let txt = output_dir.join(format!("{MERGED_STEM}.txt"));
        let csv = output_dir.join(format!("{MERGED_STEM}.csv"));

        RichDocument::merged(&self.results).write_docx(&docx)?;
        write_plain_text(&self.results, &txt)?;
        write_csv(&self.results, &csv)?;

        info!(
            "Merged output for {} file(s) written to {}",
            self.results.len(),
            output_dir.display()
        );
        Ok(vec![docx, txt, csv])
    }
}

//! Input discovery: turn a user-supplied path into an ordered list of files.
//!
//! A path may name a file, a directory (walked recursively for supported
//! extensions), or a bare file name that is not present relative to the
//! current directory, in which case the working tree is searched for it.
//! Directory walks visit entries in lexicographic order so the batch order is
//! the same on every platform.

use crate::error::OcrError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extensions accepted when walking a directory (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// What kind of document a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InputKind {
    Pdf,
    Image,
}

/// One file the pipeline will process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputFile {
    pub path: PathBuf,
    pub kind: InputKind,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = if has_extension(&path, "pdf") {
            InputKind::Pdf
        } else {
            InputKind::Image
        };
        Self { path, kind }
    }

    /// File name without extension, used for output and scratch names.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string())
    }

    /// File name with extension, used in merged outputs and progress lines.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Check if the path has a supported extension.
pub fn is_supported(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.iter().any(|ext| has_extension(path, ext))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Resolve `path` against the current working directory and list its files.
///
/// Directories listed in `exclude` (typically the output and scratch
/// directories) are never descended into.
pub fn locate_inputs(path: &Path, exclude: &[PathBuf]) -> Result<Vec<InputFile>, OcrError> {
    let cwd = std::env::current_dir()
        .map_err(|e| OcrError::Internal(format!("cannot read current directory: {e}")))?;
    locate_inputs_in(path, &cwd, exclude)
}

/// Same as [`locate_inputs`] with an explicit root for the by-name search.
pub fn locate_inputs_in(
    path: &Path,
    search_root: &Path,
    exclude: &[PathBuf],
) -> Result<Vec<InputFile>, OcrError> {
    let resolved = resolve_path(path, search_root)?;

    if resolved.is_file() {
        debug!("Input is a single file: {}", resolved.display());
        return Ok(vec![InputFile::new(resolved)]);
    }

    let exclude: Vec<PathBuf> = exclude.iter().filter_map(|p| p.canonicalize().ok()).collect();
    let mut files = Vec::new();
    walk_sorted(&resolved, &exclude, &mut |entry: &Path| {
        if entry.is_file() && is_supported(entry) {
            files.push(InputFile::new(entry));
        }
        false
    });

    if files.is_empty() {
        return Err(OcrError::NoInputFiles { path: resolved });
    }
    info!("Found {} input files under {}", files.len(), resolved.display());
    Ok(files)
}

/// Find an existing path for `path`.
///
/// Only a bare name (one path component) triggers the tree search; a missing
/// multi-component path fails immediately.
pub fn resolve_path(path: &Path, search_root: &Path) -> Result<PathBuf, OcrError> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }

    let mut components = path.components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );
    if !single {
        return Err(OcrError::InputNotFound {
            path: path.to_path_buf(),
        });
    }

    let name = path.as_os_str();
    debug!(
        "'{}' not found, searching under {}",
        path.display(),
        search_root.display()
    );
    let mut found = None;
    walk_sorted(search_root, &[], &mut |entry: &Path| {
        if entry.file_name() == Some(name) {
            found = Some(entry.to_path_buf());
            return true;
        }
        false
    });

    match found {
        Some(p) => {
            info!("Resolved '{}' to {}", path.display(), p.display());
            Ok(p)
        }
        None => Err(OcrError::InputNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Depth-first walk in lexicographic order, visiting files and directories.
///
/// `visit` returns `true` to stop the walk. Symlinked directories are not
/// followed. Returns `true` if the walk was stopped.
fn walk_sorted(dir: &Path, exclude: &[PathBuf], visit: &mut dyn FnMut(&Path) -> bool) -> bool {
    let read = match std::fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) => {
            warn!("Skipping unreadable directory {}: {}", dir.display(), e);
            return false;
        }
    };

    let mut entries: Vec<_> = read.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if visit(&path) {
            return true;
        }
        let is_real_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_real_dir {
            continue;
        }
        if !exclude.is_empty() {
            if let Ok(canonical) = path.canonicalize() {
                if exclude.contains(&canonical) {
                    debug!("Skipping excluded directory {}", path.display());
                    continue;
                }
            }
        }
        if walk_sorted(&path, exclude, visit) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, b"x").unwrap();
        p
    }

    fn names(files: &[InputFile]) -> Vec<String> {
        files.iter().map(|f| f.display_name()).collect()
    }

    #[test]
    fn single_file_is_returned_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(dir.path(), "scan.PDF");
        let files = locate_inputs_in(&p, dir.path(), &[]).unwrap();
        assert_eq!(files, vec![InputFile::new(&p)]);
        assert_eq!(files[0].kind, InputKind::Pdf);
    }

    #[test]
    fn directory_walk_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.png");
        touch(dir.path(), "a.JPG");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "report.docx");
        touch(dir.path(), "sub/c.tiff");
        touch(dir.path(), "sub/deeper/d.Pdf");

        let files = locate_inputs_in(dir.path(), dir.path(), &[]).unwrap();
        assert_eq!(names(&files), vec!["a.JPG", "b.png", "c.tiff", "d.Pdf"]);
        assert_eq!(files[3].kind, InputKind::Pdf);
        assert_eq!(files[0].kind, InputKind::Image);
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "scan.jpg");
        touch(dir.path(), "result/tmp/scan/scan_page_0001.jpg");
        let files =
            locate_inputs_in(dir.path(), dir.path(), &[dir.path().join("result")]).unwrap();
        assert_eq!(names(&files), vec!["scan.jpg"]);
    }

    #[test]
    fn directory_without_supported_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "readme.md");
        let err = locate_inputs_in(dir.path(), dir.path(), &[]).unwrap_err();
        assert!(matches!(err, OcrError::NoInputFiles { .. }));
    }

    #[test]
    fn bare_name_is_searched_in_tree() {
        let dir = tempfile::tempdir().unwrap();
        let target = touch(dir.path(), "x/y/invoice.jpg");
        let files = locate_inputs_in(Path::new("invoice.jpg"), dir.path(), &[]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, target);
    }

    #[test]
    fn bare_name_search_picks_first_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = touch(dir.path(), "a/invoice.jpg");
        touch(dir.path(), "b/invoice.jpg");
        let resolved = resolve_path(Path::new("invoice.jpg"), dir.path()).unwrap();
        assert_eq!(resolved, first);
    }

    #[test]
    fn missing_multi_component_path_fails_without_search() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "docs/invoice.jpg");
        let err = resolve_path(Path::new("other/invoice.jpg"), dir.path()).unwrap_err();
        assert!(matches!(err, OcrError::InputNotFound { .. }));
    }

    #[test]
    fn missing_bare_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_path(Path::new("ghost.pdf"), dir.path()).unwrap_err();
        assert!(matches!(err, OcrError::InputNotFound { .. }));
    }

    #[test]
    fn stem_and_display_name() {
        let f = InputFile::new("/data/photo_2025-07-29.jpg");
        assert_eq!(f.stem(), "photo_2025-07-29");
        assert_eq!(f.display_name(), "photo_2025-07-29.jpg");
    }
}

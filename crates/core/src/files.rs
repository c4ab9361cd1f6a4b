//! Local file references, ingestion modes, and eligibility rules.
//!
//! Decides which local files a job will actually submit. Files rejected
//! here never become File Entries; they are reported back as
//! [`SkippedFile`]s so the caller can show why.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::CoreError;
use crate::job::JobSettings;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Extensions (lowercase, without the dot) the ingestion backend can parse.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "html", "htm", "pdf", "docx", "doc", "rtf", "csv", "json", "wav",
    "mp3", "m4a", "flac", "ogg", "aac",
];

/// Extension of archive bundles submitted as a single opaque blob.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Upper bound on files collected from one directory tree.
pub const MAX_SCAN_FILES: usize = 1000;

/// Bytes in one mebibyte, the unit the backend expresses size limits in.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Ingestion mode
// ---------------------------------------------------------------------------

/// How a set of local files is packaged for the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Loose individual files.
    Files,
    /// A directory tree, submitted as a file list with relative paths.
    Directory,
    /// A `.zip` bundle, submitted as one blob and expanded by the backend.
    Archive,
}

impl IngestMode {
    /// The `upload_type` form value the backend expects for this mode.
    pub fn upload_type(self) -> &'static str {
        match self {
            Self::Files => "multiple_files",
            Self::Directory => "folder",
            Self::Archive => "zip",
        }
    }

    /// Pick the mode for a path given on the command line or dropped by
    /// the user: directories are trees, `.zip` files are archives,
    /// anything else is a loose file.
    pub fn detect(path: &Path) -> Self {
        if path.is_dir() {
            Self::Directory
        } else if extension_of(path).as_deref() == Some(ARCHIVE_EXTENSION) {
            Self::Archive
        } else {
            Self::Files
        }
    }
}

// ---------------------------------------------------------------------------
// Local files
// ---------------------------------------------------------------------------

/// A reference to file content on local disk plus the metadata the queue
/// needs (name, size, relative path when structure is preserved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    /// Absolute or caller-relative path used to read the content.
    pub path: PathBuf,
    /// File name without directories.
    pub name: String,
    /// Size in bytes at the time the file was collected.
    pub size: u64,
    /// Path relative to the scanned directory root, `/`-separated.
    pub relative_path: Option<String>,
}

impl LocalFile {
    /// Build a reference without touching the filesystem.
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            path,
            name,
            size,
            relative_path: None,
        }
    }

    /// Stat `path` and build a reference from its metadata.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(CoreError::Validation(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self::new(path, metadata.len()))
    }

    /// Attach a relative path (directory mode).
    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    /// Lowercase extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        extension_of(Path::new(&self.name))
    }

    /// The name shown to users: the relative path when known, otherwise
    /// the bare file name.
    pub fn display_name(&self) -> &str {
        self.relative_path.as_deref().unwrap_or(&self.name)
    }
}

/// A file that was collected but will not be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

/// Result of applying the eligibility rules to a set of files.
#[derive(Debug, Clone, Default)]
pub struct FileSelection {
    /// Files to submit, in their original order.
    pub accepted: Vec<LocalFile>,
    /// Files left out, with a human-readable reason each.
    pub skipped: Vec<SkippedFile>,
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Whether the backend can parse files with this extension.
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Hidden (`.name`) and editor temp (`~name`) files are never uploaded.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('~')
}

/// Apply the eligibility rules for `mode` and `settings`.
///
/// Archives are passed through untouched: their contents are only known
/// to the backend. For files and directory trees:
///
/// - hidden and temp files are skipped,
/// - files above `max_file_size_bytes` are always skipped,
/// - unsupported types are skipped only when `skip_unsupported` is set.
pub fn select_files(
    files: Vec<LocalFile>,
    settings: &JobSettings,
    mode: IngestMode,
) -> FileSelection {
    if mode == IngestMode::Archive {
        return FileSelection {
            accepted: files,
            skipped: Vec::new(),
        };
    }

    let mut selection = FileSelection::default();
    for file in files {
        match rejection_reason(&file, settings) {
            Some(reason) => selection.skipped.push(SkippedFile {
                name: file.display_name().to_string(),
                reason,
            }),
            None => selection.accepted.push(file),
        }
    }
    selection
}

fn rejection_reason(file: &LocalFile, settings: &JobSettings) -> Option<String> {
    if is_hidden_name(&file.name) {
        return Some("Hidden or temporary file".to_string());
    }
    if file.size > settings.max_file_size_bytes {
        return Some(format!(
            "File too large: {:.1}MB",
            file.size as f64 / BYTES_PER_MB as f64
        ));
    }
    if settings.skip_unsupported {
        match file.extension() {
            Some(ext) if is_supported_extension(&ext) => {}
            Some(ext) => return Some(format!("Unsupported file type: .{ext}")),
            None => return Some("Unsupported file type: (no extension)".to_string()),
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Directory scanning
// ---------------------------------------------------------------------------

/// Collect up to `max_files` regular files below `root`, sorted by path,
/// each carrying its `/`-separated path relative to `root`.
///
/// Unreadable entries are ignored; eligibility is decided later by
/// [`select_files`].
pub fn scan_directory(root: &Path, max_files: usize) -> Result<Vec<LocalFile>, CoreError> {
    if !root.is_dir() {
        return Err(CoreError::Validation(format!(
            "Not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if files.len() >= max_files {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        files.push(LocalFile::new(entry.path(), metadata.len()).with_relative_path(relative));
    }
    Ok(files)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> LocalFile {
        LocalFile::new(format!("/tmp/{name}"), size)
    }

    #[test]
    fn supported_extension_ignores_case_and_dot() {
        assert!(is_supported_extension("PDF"));
        assert!(is_supported_extension(".md"));
        assert!(!is_supported_extension("exe"));
    }

    #[test]
    fn unsupported_file_skipped_when_requested() {
        let settings = JobSettings::default();
        let selection = select_files(
            vec![file("a.pdf", 10), file("b.exe", 10), file("c.txt", 10)],
            &settings,
            IngestMode::Files,
        );
        assert_eq!(selection.accepted.len(), 2);
        assert_eq!(selection.skipped.len(), 1);
        assert_eq!(selection.skipped[0].name, "b.exe");
        assert_eq!(selection.skipped[0].reason, "Unsupported file type: .exe");
    }

    #[test]
    fn unsupported_file_kept_when_not_skipping() {
        let settings = JobSettings {
            skip_unsupported: false,
            ..Default::default()
        };
        let selection = select_files(vec![file("b.exe", 10)], &settings, IngestMode::Files);
        assert_eq!(selection.accepted.len(), 1);
        assert!(selection.skipped.is_empty());
    }

    #[test]
    fn oversized_file_always_skipped() {
        let settings = JobSettings {
            skip_unsupported: false,
            max_file_size_bytes: 2 * BYTES_PER_MB,
            ..Default::default()
        };
        let selection = select_files(
            vec![file("big.pdf", 3 * BYTES_PER_MB)],
            &settings,
            IngestMode::Files,
        );
        assert!(selection.accepted.is_empty());
        assert_eq!(selection.skipped[0].reason, "File too large: 3.0MB");
    }

    #[test]
    fn hidden_and_temp_files_skipped() {
        let settings = JobSettings::default();
        let selection = select_files(
            vec![file(".DS_Store", 1), file("~lock.docx", 1)],
            &settings,
            IngestMode::Directory,
        );
        assert!(selection.accepted.is_empty());
        assert_eq!(selection.skipped.len(), 2);
    }

    #[test]
    fn archive_passes_through() {
        let settings = JobSettings::default();
        let selection = select_files(vec![file("bundle.zip", 1)], &settings, IngestMode::Archive);
        assert_eq!(selection.accepted.len(), 1);
    }

    #[test]
    fn upload_types() {
        assert_eq!(IngestMode::Files.upload_type(), "multiple_files");
        assert_eq!(IngestMode::Directory.upload_type(), "folder");
        assert_eq!(IngestMode::Archive.upload_type(), "zip");
    }

    #[test]
    fn display_name_prefers_relative_path() {
        let f = file("a.md", 1).with_relative_path("docs/a.md");
        assert_eq!(f.display_name(), "docs/a.md");
        assert_eq!(file("a.md", 1).display_name(), "a.md");
    }

    #[test]
    fn scan_directory_collects_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("sub").join("b.md"), b"# b").unwrap();

        let files = scan_directory(dir.path(), MAX_SCAN_FILES).unwrap();
        let rel: Vec<_> = files
            .iter()
            .map(|f| f.relative_path.clone().unwrap())
            .collect();
        assert_eq!(rel, vec!["a.txt".to_string(), "sub/b.md".to_string()]);
        assert_eq!(files[0].size, 5);
    }

    #[test]
    fn scan_directory_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("{i}.txt")), b"x").unwrap();
        }
        let files = scan_directory(dir.path(), 3).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn scan_directory_rejects_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"x").unwrap();
        assert!(scan_directory(&path, 10).is_err());
    }

    #[test]
    fn detect_mode() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(IngestMode::detect(dir.path()), IngestMode::Directory);
        assert_eq!(IngestMode::detect(Path::new("x/Bundle.ZIP")), IngestMode::Archive);
        assert_eq!(IngestMode::detect(Path::new("x/a.pdf")), IngestMode::Files);
    }
}

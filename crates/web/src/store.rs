//! Archive store and resolver
//!
//! Uploaded machine archives live under a small set of candidate
//! directories that are probed in a fixed priority order. Resolution is
//! a plain filesystem walk on every call so it always reflects the
//! current on-disk state.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use cyberlab_common::format_size;

/// Archive extensions accepted for upload and probed during resolution,
/// in probe order.
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["zip", "ova", "vmdk", "vdi", "iso"];

/// Upload size ceiling: 500 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

/// Strip every character outside `[A-Za-z0-9_-]`. Keeps archive lookups
/// inside the configured base directories regardless of what the client
/// sends as a machine name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Outcome of an archive lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found { path: PathBuf, size_bytes: u64 },
    NotFound,
}

/// One entry in the upload directory listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub size_formatted: String,
    pub download_url: String,
    pub modified: String,
    pub extension: String,
}

/// Filesystem area holding machine archives.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    data_dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Directory new uploads are written to (first in probe order).
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads").join("machines")
    }

    /// Candidate directories for one machine name, in probe order.
    fn candidate_dirs(&self, sanitized: &str) -> [PathBuf; 3] {
        [
            self.upload_dir(),
            self.data_dir.join("docker-machines").join(sanitized),
            self.data_dir.join("machines"),
        ]
    }

    /// Create the bootstrap directories. Directories that already exist
    /// are left alone; only fresh creations are logged.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.data_dir.join("uploads"),
            self.upload_dir(),
            self.data_dir.join("machines"),
        ] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }

    /// Locate the archive for a machine name: first existing file across
    /// the candidate directories and allowed extensions wins.
    pub fn resolve(&self, name: &str) -> Resolution {
        let sanitized = sanitize_name(name);
        if sanitized.is_empty() {
            return Resolution::NotFound;
        }

        for dir in self.candidate_dirs(&sanitized) {
            for ext in ALLOWED_EXTENSIONS {
                let candidate = dir.join(format!("{}.{}", sanitized, ext));
                match std::fs::metadata(&candidate) {
                    Ok(meta) if meta.is_file() => {
                        debug!("Resolved {} -> {}", name, candidate.display());
                        return Resolution::Found {
                            path: candidate,
                            size_bytes: meta.len(),
                        };
                    }
                    _ => {}
                }
            }
        }

        Resolution::NotFound
    }

    /// Best-effort removal of a machine's backing archive. Returns true
    /// when a file was deleted; failures are logged, never fatal.
    pub fn delete(&self, name: &str) -> bool {
        match self.resolve(name) {
            Resolution::Found { path, .. } => match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!("Deleted archive: {}", path.display());
                    true
                }
                Err(e) => {
                    warn!("Failed to delete archive {}: {}", path.display(), e);
                    false
                }
            },
            Resolution::NotFound => false,
        }
    }

    /// List every file in the upload directory, newest modification
    /// first.
    pub fn list_files(&self) -> std::io::Result<Vec<StoredFile>> {
        let dir = self.upload_dir();
        let mut files = Vec::new();

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };

            let filename = entry.file_name().to_string_lossy().to_string();
            let modified = meta
                .modified()
                .ok()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
                .unwrap_or_default();

            files.push(StoredFile {
                original_name: file_stem(&path),
                extension: file_extension(&path),
                download_url: format!("/api/download/{}", filename),
                size: meta.len(),
                size_formatted: format_size(meta.len()),
                filename,
                modified,
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(files)
    }
}

/// File stem as an owned string, empty when absent.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Lowercased extension without the dot, empty when absent.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

//! Archive folding, relocation and transient cleanup.
//!
//! A tier directory is folded into a single ZIP whose entries are sorted by
//! path and stamped with a fixed timestamp, so two builds of the same input
//! produce the same membership. All functions here block; async callers run
//! them through `spawn_blocking`.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::{ErrorKind, PipelineError, PipelineResult};

/// File extension of every produced archive.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Result of folding one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldedArchive {
    pub path: PathBuf,
    /// Number of file entries.
    pub entries: usize,
    /// Archive size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the archive bytes.
    pub sha256: String,
}

fn archive_error(context: String, source: impl std::error::Error + Send + Sync + 'static) -> PipelineError {
    PipelineError::new(ErrorKind::Archive, context).with_source(source)
}

/// Relative path of `path` under `root` using `/` separators.
fn entry_name(root: &Path, path: &Path, prefix: Option<&str>) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts: Vec<String> = Vec::new();
    if let Some(prefix) = prefix {
        parts.push(prefix.trim_end_matches('/').to_string());
    }
    for component in relative.components() {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    Some(parts.join("/"))
}

/// Fold every file below `source` into a ZIP at `destination`.
///
/// Entry names are relative to `source`, optionally under `prefix/`.
/// `destination` must not lie inside `source`.
pub fn fold_directory(
    source: &Path,
    destination: &Path,
    prefix: Option<&str>,
) -> PipelineResult<FoldedArchive> {
    if destination.starts_with(source) {
        return Err(PipelineError::new(
            ErrorKind::Archive,
            format!(
                "archive {} would be written inside {}",
                destination.display(),
                source.display()
            ),
        ));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PipelineError::io(ErrorKind::Archive, "create", parent, e))?;
    }

    let file = File::create(destination)
        .map_err(|e| PipelineError::io(ErrorKind::Archive, "create", destination, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut entries = 0;
    let mut buffer = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            archive_error(format!("failed to walk {}", source.display()), e)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry_name(source, entry.path(), prefix) else {
            continue;
        };

        buffer.clear();
        File::open(entry.path())
            .and_then(|mut f| f.read_to_end(&mut buffer))
            .map_err(|e| PipelineError::io(ErrorKind::Archive, "read", entry.path(), e))?;

        zip.start_file(name.as_str(), options)
            .map_err(|e| archive_error(format!("failed to add {}", name), e))?;
        zip.write_all(&buffer)
            .map_err(|e| PipelineError::io(ErrorKind::Archive, "write", destination, e))?;
        entries += 1;
    }

    let mut writer = zip
        .finish()
        .map_err(|e| archive_error(format!("failed to finish {}", destination.display()), e))?;
    writer
        .flush()
        .map_err(|e| PipelineError::io(ErrorKind::Archive, "flush", destination, e))?;
    drop(writer);

    let (size, sha256) = digest_file(destination)
        .map_err(|e| PipelineError::io(ErrorKind::Archive, "hash", destination, e))?;

    tracing::debug!(
        archive = %destination.display(),
        entries,
        size,
        "Folded directory"
    );

    Ok(FoldedArchive {
        path: destination.to_path_buf(),
        entries,
        size,
        sha256,
    })
}

fn digest_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
        size += read as u64;
    }
    Ok((size, format!("{:x}", hasher.finalize())))
}

/// Move an archive to its final location, replacing any previous file.
pub fn relocate(archive: &FoldedArchive, destination: &Path) -> PipelineResult<FoldedArchive> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PipelineError::io(ErrorKind::Archive, "create", parent, e))?;
    }
    fs::rename(&archive.path, destination)
        .map_err(|e| PipelineError::io(ErrorKind::Archive, "move archive to", destination, e))?;
    Ok(FoldedArchive {
        path: destination.to_path_buf(),
        ..archive.clone()
    })
}

/// Remove directories that only exist while a tier is being built.
///
/// Failures are logged and returned but never escalate.
pub fn remove_transient(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut failed = Vec::new();
    for path in paths {
        if let Err(e) = remove_dir_if_present(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove transient directory");
            failed.push(path.clone());
        }
    }
    failed
}

/// `remove_dir_all` that treats an absent directory as success.
pub fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Entry names of an archive, in stored order.
pub fn archive_entries(path: &Path) -> PipelineResult<Vec<String>> {
    let file =
        File::open(path).map_err(|e| PipelineError::io(ErrorKind::Archive, "open", path, e))?;
    let archive = ZipArchive::new(file)
        .map_err(|e| archive_error(format!("failed to read {}", path.display()), e))?;
    Ok(archive.file_names().map(str::to_string).collect::<Vec<_>>())
}

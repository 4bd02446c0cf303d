//! Unpacking of downloaded archives.
//!
//! Only zip archives are understood. An archive is unpacked next to
//! itself, into a directory named after its file stem.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use driveport_common::{Error, Result};

const COMPONENT: &str = "Archive";

/// Whether `path` names an archive format `extract` understands.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Unpack `archive` into `<parent>/<file stem>` and return that directory.
///
/// Entries whose names would land outside the directory are skipped.
///
/// # Errors
/// - `InvalidInput` if the file is not a supported archive
/// - `LocalRead` if the archive cannot be opened
/// - `Archive` if its contents are malformed
/// - `LocalWrite` if an entry cannot be written
pub async fn extract(archive: &Path) -> Result<PathBuf> {
    if !is_supported(archive) {
        return Err(Error::InvalidInput(format!(
            "{} is not a zip archive",
            archive.display()
        )));
    }
    let stem = archive.file_stem().ok_or_else(|| {
        Error::InvalidInput(format!("{} has no usable file name", archive.display()))
    })?;
    let target = archive
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(stem);

    let source = archive.to_path_buf();
    let dir = target.clone();
    let entries = tokio::task::spawn_blocking(move || extract_zip(&source, &dir))
        .await
        .map_err(|e| Error::Archive {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })??;

    tracing::info!(
        component = COMPONENT,
        archive = %archive.display(),
        target = %target.display(),
        entries = entries.len(),
        "Extracted archive"
    );
    Ok(target)
}

/// Blocking zip extraction; returns the files written.
fn extract_zip(archive_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>> {
    let corrupt = |e: zip::result::ZipError| Error::Archive {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    };
    let write_error = |path: &Path, source: io::Error| Error::LocalWrite {
        path: path.to_path_buf(),
        source,
    };

    let file = fs::File::open(archive_path).map_err(|source| Error::LocalRead {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(corrupt)?;
    fs::create_dir_all(target_dir).map_err(|e| write_error(target_dir, e))?;

    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(corrupt)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(
                component = COMPONENT,
                entry = entry.name(),
                "Skipping entry outside the target directory"
            );
            continue;
        };
        let out_path = target_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| write_error(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
        }
        let mut out = fs::File::create(&out_path).map_err(|e| write_error(&out_path, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => Error::Archive {
                path: archive_path.to_path_buf(),
                reason: e.to_string(),
            },
            _ => write_error(&out_path, e),
        })?;
        written.push(out_path);
    }
    Ok(written)
}

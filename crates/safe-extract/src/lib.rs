//! Zip extraction that refuses to write outside of the destination directory.
//!
//! [`unpack`] replaces the destination with the contents of a zip archive. Every
//! entry name is resolved against the destination before anything is written for
//! it, and an entry that would land outside of the destination aborts the whole
//! extraction with [`UnpackError::PathTraversal`].
//!
//! ```no_run
//! # use std::path::Path;
//! let summary = safe_extract::unpack(Path::new("/tmp/out"), Path::new("app.apk"))?;
//! println!("{summary}");
//! # Ok::<(), safe_extract::UnpackError>(())
//! ```

mod path;
#[cfg(test)]
mod tests;

pub use path::resolve_entry_path;

use std::fmt::{Display, Formatter};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    #[error("entry '{entry}' resolves to '{}', outside of the destination", .resolved.display())]
    PathTraversal { entry: String, resolved: PathBuf },
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Archive(#[from] ZipError),
}

impl UnpackError {
    fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| UnpackError::Io { path, source }
    }
}

/// What a successful [`unpack`] wrote.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct UnpackSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

impl Display for UnpackSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "files={} directories={} bytes={}",
            self.files, self.directories, self.bytes
        )
    }
}

/// Extract the zip archive at `source` into `destination`.
///
/// A relative `destination` is resolved against the current directory. An
/// existing `destination` is removed first, so repeated runs always end with
/// exactly the archive's contents. Extraction stops at the first failing entry
/// and leaves whatever was already written in place.
#[tracing::instrument(skip_all, fields(source = %source.display(), destination = %destination.display()))]
pub fn unpack(destination: &Path, source: &Path) -> Result<UnpackSummary, UnpackError> {
    let destination = path::normalized_destination(destination)?;
    remove_existing(&destination)?;

    let file = File::open(source).map_err(UnpackError::io(source))?;
    let mut archive = ZipArchive::new(BufReader::with_capacity(1024 * 1024, file))?;
    debug!(entries = archive.len(), "opened archive");

    let mut summary = UnpackSummary::default();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let target = resolve_entry_path(&destination, entry.name())?;

        if entry.is_dir() {
            trace!(path = %target.display(), "creating directory");
            fs::create_dir_all(&target).map_err(UnpackError::io(&target))?;
            summary.directories += 1;
            continue;
        }

        trace!(path = %target.display(), size = entry.size(), "unzipping file");
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(UnpackError::io(parent))?;
        }
        let mut output = File::create(&target).map_err(UnpackError::io(&target))?;
        summary.bytes += io::copy(&mut entry, &mut output).map_err(UnpackError::io(&target))?;
        drop(output);
        apply_mode(&target, entry.unix_mode()).map_err(UnpackError::io(&target))?;
        summary.files += 1;
    }

    info!(%summary, "unpacked archive");
    Ok(summary)
}

fn remove_existing(destination: &Path) -> Result<(), UnpackError> {
    let metadata = match fs::symlink_metadata(destination) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(UnpackError::io(destination)(e)),
    };
    debug!(path = %destination.display(), "removing previous extraction");
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(destination)
    } else {
        fs::remove_file(destination)
    };
    removed.map_err(UnpackError::io(destination))
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match mode.map(|mode| mode & 0o7777) {
        Some(bits) if bits != 0 => fs::set_permissions(path, fs::Permissions::from_mode(bits)),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

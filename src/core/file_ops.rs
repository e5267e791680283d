use crate::core::checksum_utils;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/*
 * This module wraps the low-level file system primitives the ledger needs to
 * relocate companions: moving or copying a file or a whole directory tree as
 * one unit, and pruning a source directory that has been emptied. The
 * `FileOperations` trait is the seam the ledger talks to, so tests can inject
 * failures; `CoreFileOperations` is the real implementation.
 */

#[derive(Debug)]
pub enum EntryOperationError {
    Io { path: PathBuf, source: io::Error },
    SourceMissing(PathBuf),
    DestinationExists(PathBuf),
    VerificationFailed(PathBuf),
}

impl std::fmt::Display for EntryOperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryOperationError::Io { path, source } => write!(f, "I/O error on {path:?}: {source}"),
            EntryOperationError::SourceMissing(p) => write!(f, "Source {p:?} no longer exists"),
            EntryOperationError::DestinationExists(p) => {
                write!(f, "Destination {p:?} already exists")
            }
            EntryOperationError::VerificationFailed(p) => {
                write!(f, "Copied content of {p:?} does not match the source")
            }
        }
    }
}

impl std::error::Error for EntryOperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EntryOperationError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<walkdir::Error> for EntryOperationError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        EntryOperationError::Io {
            path,
            source: err.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EntryOperationError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> EntryOperationError + '_ {
    move |source| EntryOperationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/*
 * File system capabilities used when applying queued work. Implementations
 * never overwrite an existing destination and create missing parent
 * directories of the destination. Directories are handled as whole subtrees.
 */
pub trait FileOperations: Send + Sync {
    fn move_entry(&self, source: &Path, destination: &Path) -> Result<()>;
    fn copy_entry(&self, source: &Path, destination: &Path) -> Result<()>;
    // Returns true if the directory held no files and was removed.
    fn remove_dir_if_empty(&self, directory: &Path) -> Result<bool>;
}

pub struct CoreFileOperations {}

impl CoreFileOperations {
    pub fn new() -> Self {
        CoreFileOperations {}
    }

    fn prepare_destination(source: &Path, destination: &Path) -> Result<()> {
        if source.symlink_metadata().is_err() {
            return Err(EntryOperationError::SourceMissing(source.to_path_buf()));
        }
        if destination.symlink_metadata().is_ok() {
            return Err(EntryOperationError::DestinationExists(
                destination.to_path_buf(),
            ));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        Ok(())
    }

    /*
     * Renames the entry. When source and destination live on different file
     * systems the entry is copied, verified and only then removed from the
     * source.
     */
    fn move_with(
        source: &Path,
        destination: &Path,
        rename: impl FnOnce(&Path, &Path) -> io::Result<()>,
    ) -> Result<()> {
        Self::prepare_destination(source, destination)?;
        match rename(source, destination) {
            Ok(()) => {
                log::trace!("CoreFileOperations: Renamed {source:?} -> {destination:?}");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                log::debug!(
                    "CoreFileOperations: {source:?} and {destination:?} are on different devices, copying instead."
                );
                copy_then_remove(source, destination)
            }
            Err(e) => Err(io_error(source)(e)),
        }
    }
}

impl Default for CoreFileOperations {
    fn default() -> Self {
        Self::new()
    }
}

impl FileOperations for CoreFileOperations {
    fn move_entry(&self, source: &Path, destination: &Path) -> Result<()> {
        Self::move_with(source, destination, |from, to| fs::rename(from, to))
    }

    fn copy_entry(&self, source: &Path, destination: &Path) -> Result<()> {
        Self::prepare_destination(source, destination)?;
        if let Err(e) = copy_tree(source, destination) {
            discard_partial_copy(destination);
            return Err(e);
        }
        log::trace!("CoreFileOperations: Copied {source:?} -> {destination:?}");
        Ok(())
    }

    fn remove_dir_if_empty(&self, directory: &Path) -> Result<bool> {
        if !directory.is_dir() {
            return Ok(false);
        }
        for entry in WalkDir::new(directory).min_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                log::trace!(
                    "CoreFileOperations: Keeping {directory:?}, it still contains {:?}.",
                    entry.path()
                );
                return Ok(false);
            }
        }
        fs::remove_dir_all(directory).map_err(io_error(directory))?;
        log::debug!("CoreFileOperations: Removed emptied directory {directory:?}.");
        Ok(true)
    }
}

/*
 * The fallback half of a move: copy everything, compare file contents and
 * remove the source only when the copy is identical. Any failure before the
 * source is removed discards the partial copy and leaves the source untouched.
 */
pub fn copy_then_remove(source: &Path, destination: &Path) -> Result<()> {
    copy_verify_remove(source, destination, verify_tree)
}

fn copy_verify_remove(
    source: &Path,
    destination: &Path,
    verify: impl FnOnce(&Path, &Path) -> Result<()>,
) -> Result<()> {
    if destination.symlink_metadata().is_ok() {
        return Err(EntryOperationError::DestinationExists(
            destination.to_path_buf(),
        ));
    }
    if let Err(e) = copy_tree(source, destination) {
        discard_partial_copy(destination);
        return Err(e);
    }
    if let Err(e) = verify(source, destination) {
        log::error!("CoreFileOperations: Verification of {destination:?} failed: {e}");
        discard_partial_copy(destination);
        return Err(e);
    }

    let source_type = source.symlink_metadata().map_err(io_error(source))?.file_type();
    if source_type.is_dir() {
        fs::remove_dir_all(source).map_err(io_error(source))?;
    } else {
        fs::remove_file(source).map_err(io_error(source))?;
    }
    Ok(())
}

// Only called on destinations created by this module, never on pre-existing ones.
fn discard_partial_copy(destination: &Path) {
    let Ok(metadata) = destination.symlink_metadata() else {
        return;
    };
    let cleanup = if metadata.is_dir() {
        fs::remove_dir_all(destination)
    } else {
        fs::remove_file(destination)
    };
    match cleanup {
        Ok(()) => log::debug!("CoreFileOperations: Discarded partial copy {destination:?}."),
        Err(e) => {
            log::warn!("CoreFileOperations: Could not discard partial copy {destination:?}: {e}")
        }
    }
}

fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    let file_type = source.symlink_metadata().map_err(io_error(source))?.file_type();
    if !file_type.is_dir() {
        return copy_single(source, destination, file_type.is_symlink());
    }

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| EntryOperationError::Io {
                path: entry.path().to_path_buf(),
                source: io::Error::other(e),
            })?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else {
            copy_single(entry.path(), &target, entry.file_type().is_symlink())?;
        }
    }
    Ok(())
}

fn copy_single(source: &Path, destination: &Path, is_symlink: bool) -> Result<()> {
    if is_symlink {
        #[cfg(unix)]
        {
            let link_target = fs::read_link(source).map_err(io_error(source))?;
            std::os::unix::fs::symlink(&link_target, destination)
                .map_err(io_error(destination))?;
            return Ok(());
        }
    }
    fs::copy(source, destination).map_err(io_error(destination))?;
    Ok(())
}

fn verify_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let copied = if entry.depth() == 0 {
            destination.to_path_buf()
        } else {
            let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
            destination.join(relative)
        };
        let identical =
            checksum_utils::files_identical(entry.path(), &copied).map_err(io_error(&copied))?;
        if !identical {
            return Err(EntryOperationError::VerificationFailed(entry.path().to_path_buf()));
        }
    }
    Ok(())
}

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Scratch directory removed on drop unless promoted with [`StagingDir::keep`].
pub(crate) struct StagingDir {
    inner: Option<tempfile::TempDir>,
    path: PathBuf,
}

impl StagingDir {
    pub(crate) fn new_in(root: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(root).map_err(|err| Error::io("create", root, err))?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .map_err(|err| Error::io("create a staging directory under", root, err))?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            inner: Some(dir),
            path,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Disarms the cleanup and hands out the path.
    pub(crate) fn keep(mut self) -> PathBuf {
        if let Some(dir) = self.inner.take() {
            return dir.keep();
        }
        self.path.clone()
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        let Some(dir) = self.inner.take() else {
            return;
        };
        let path = dir.keep();
        if let Err(err) = fs::remove_dir_all(&path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), %err, "failed to remove staging directory");
            }
        }
    }
}

/// Places `src` at `dest`, as a symlink when asked and supported, else as a copy.
/// An existing `dest` is replaced.
pub(crate) fn copy_or_symlink(src: &Path, dest: &Path, prefer_symlink: bool) -> Result<()> {
    if same_file(src, dest) {
        debug!(path = %dest.display(), "source and destination coincide");
        return Ok(());
    }
    if prefer_symlink && try_symlink(src, dest)? {
        debug!(src = %src.display(), dest = %dest.display(), "symlinked");
        return Ok(());
    }
    // a stale symlink at dest would make fs::copy write through it
    if fs::symlink_metadata(dest).is_ok_and(|meta| meta.file_type().is_symlink()) {
        fs::remove_file(dest).map_err(|err| Error::io("remove", dest, err))?;
    }
    fs::copy(src, dest).map_err(|err| Error::io("copy", src, err))?;
    debug!(src = %src.display(), dest = %dest.display(), "copied");
    Ok(())
}

/// Writes `contents` beside `dest` and renames it into place.
///
/// A symlink at `dest` is replaced, never written through. Nothing is left at
/// `dest` when the write fails.
pub(crate) fn write_replacing(dest: &Path, contents: &[u8]) -> Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp =
        NamedTempFile::new_in(dir).map_err(|err| Error::io("create a temp file in", dir, err))?;
    tmp.write_all(contents)
        .map_err(|err| Error::io("write", tmp.path(), err))?;
    tmp.persist(dest)
        .map_err(|err| Error::io("persist", dest, err.error))?;
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(unix)]
fn try_symlink(src: &Path, dest: &Path) -> Result<bool> {
    let target = fs::canonicalize(src).map_err(|err| Error::io("resolve", src, err))?;
    if fs::symlink_metadata(dest).is_ok() {
        fs::remove_file(dest).map_err(|err| Error::io("remove", dest, err))?;
    }
    std::os::unix::fs::symlink(&target, dest).map_err(|err| Error::io("symlink", dest, err))?;
    Ok(true)
}

#[cfg(not(unix))]
fn try_symlink(_src: &Path, _dest: &Path) -> Result<bool> {
    Ok(false)
}

pub(crate) fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|err| Error::io("create", path, err))
}

/// Relative path with `/` separators, as written into manifests and archives.
pub(crate) fn normalize_rel_path(path: &Path) -> Result<String> {
    let normalized = path.to_string_lossy().replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(Error::InvalidArgument(format!(
            "archive entries must be relative (got {normalized})"
        )));
    }
    if normalized.is_empty() {
        return Err(Error::InvalidArgument(
            "archive entry path is empty".to_string(),
        ));
    }
    Ok(normalized)
}

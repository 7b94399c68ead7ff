use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use dirs_next::home_dir;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::StoreError;

/// Where the resource cache lives and which setting chose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocation {
    pub path: PathBuf,
    pub source: &'static str,
}

/// Picks the cache root: an explicit override, else `$XDG_CACHE_HOME`, else
/// `~/.cache`, each suffixed with `folio/resources`.
pub fn resolve_cache_store_path(
    override_path: Option<&Path>,
    xdg_cache_home: Option<&Path>,
) -> Result<CacheLocation, StoreError> {
    if let Some(path) = override_path {
        return Ok(CacheLocation {
            path: absolutize(path)?,
            source: "FOLIO_CACHE_PATH",
        });
    }
    let (base, source) = match xdg_cache_home {
        Some(xdg) => (xdg.to_path_buf(), "XDG_CACHE_HOME"),
        None => (home_dir().ok_or(StoreError::NoCacheDir)?.join(".cache"), "~/.cache"),
    };
    Ok(CacheLocation {
        path: base.join("folio").join("resources"),
        source,
    })
}

fn absolutize(path: &Path) -> Result<PathBuf, StoreError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| StoreError::io("resolve", path, err))
}

/// Write-once URL → file store.
///
/// Each URL maps to `<root>/<sha256(url)>/<name>`, where `name` is the last
/// URL path segment so cached copies keep their extension.
#[derive(Debug, Clone)]
pub struct ResourceCache {
    root: PathBuf,
}

impl ResourceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let key = hex::encode(Sha256::digest(url.as_bytes()));
        let name = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .unwrap_or("resource");
        self.root.join(key).join(name)
    }

    /// Path of the cached copy of `url`, if there is one.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<PathBuf> {
        let path = self.entry_path(url);
        path.is_file().then_some(path)
    }

    /// Stores `bytes` under `url`. An existing entry wins and is returned as is.
    pub fn put(&self, url: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        self.persist(url, |tmp| tmp.write_all(bytes))
    }

    /// Stores a copy of the file at `source` under `url`.
    pub fn put_file(&self, url: &str, source: &Path) -> Result<PathBuf, StoreError> {
        let mut input =
            fs::File::open(source).map_err(|err| StoreError::io("open", source, err))?;
        self.persist(url, |tmp| io::copy(&mut input, tmp).map(drop))
    }

    fn persist(
        &self,
        url: &str,
        fill: impl FnOnce(&mut NamedTempFile) -> io::Result<()>,
    ) -> Result<PathBuf, StoreError> {
        let dest = self.entry_path(url);
        if dest.is_file() {
            return Ok(dest);
        }
        let parent = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|err| StoreError::io("create", parent, err))?;
        let mut tmp =
            NamedTempFile::new_in(parent).map_err(|err| StoreError::io("create", parent, err))?;
        fill(&mut tmp).map_err(|err| StoreError::io("write", tmp.path(), err))?;
        match tmp.persist_noclobber(&dest) {
            Ok(_) => {
                debug!(url, path = %dest.display(), "cached resource");
                Ok(dest)
            }
            // another writer got there first; its copy is just as good
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(dest),
            Err(err) => Err(StoreError::io("persist", &dest, err.error)),
        }
    }
}

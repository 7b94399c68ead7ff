use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use folio_mets::{
    is_local_url, mimetype_for_filename, MetsDocument, NewFile, MIMETYPE_ALTO,
};
use folio_store::{Fetcher, HttpFetcher, ResourceCache};
use regex::Regex;
use tracing::{debug, info};
use url::Url;
use walkdir::WalkDir;

use crate::fs::{copy_or_symlink, create_dir_all, write_replacing, StagingDir};
use crate::workspace::{Workspace, DEFAULT_METS_BASENAME};
use crate::{Config, Error, Result};

const WORKSPACE_PREFIX: &str = "folio-workspace-";

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^A-Za-z0-9]+").expect("valid pattern"));

/// Replaces every run of non-alphanumeric ASCII characters with a single `.`.
#[must_use]
pub fn safe_filename(url: &str) -> String {
    NON_ALNUM.replace_all(url, ".").into_owned()
}

/// Local filesystem path behind a `file://` URL or a scheme-less path.
pub(crate) fn local_source(url: &str) -> PathBuf {
    if url.starts_with("file://") {
        if let Some(path) = Url::parse(url).ok().and_then(|u| u.to_file_path().ok()) {
            return path;
        }
    }
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

/// Folder layout understood by [`Resolver::add_files_from_folder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// Images at the root, one first-level subfolder per file group.
    OcrdGt,
}

impl FromStr for Convention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ocrd-gt" => Ok(Self::OcrdGt),
            other => Err(Error::InvalidArgument(format!(
                "unknown folder convention '{other}' (expected 'ocrd-gt')"
            ))),
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OcrdGt => f.write_str("ocrd-gt"),
        }
    }
}

/// Options for [`Resolver::download_to_directory`].
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub basename: Option<String>,
    pub overwrite: bool,
    pub subdir: Option<String>,
    /// Overrides the configured placement policy.
    pub prefer_symlink: Option<bool>,
}

impl DownloadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = Some(basename.into());
        self
    }

    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    #[must_use]
    pub fn prefer_symlink(mut self, prefer_symlink: bool) -> Self {
        self.prefer_symlink = Some(prefer_symlink);
        self
    }
}

/// Acquires resources into workspace directories and creates workspaces.
pub struct Resolver {
    config: Config,
    cache: Option<ResourceCache>,
    fetcher: Arc<dyn Fetcher>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// A resolver fetching over HTTP with the configured timeout.
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.network().timeout)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    #[must_use]
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn Fetcher>) -> Self {
        let cache = config
            .cache()
            .location
            .as_ref()
            .map(|location| ResourceCache::new(&location.path));
        Self {
            config,
            cache,
            fetcher,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Materializes `url` as `directory/[subdir/]basename` and returns that path.
    ///
    /// An existing destination is returned untouched unless `overwrite` is set.
    pub fn download_to_directory(
        &self,
        directory: &Path,
        url: &str,
        options: &DownloadOptions,
    ) -> Result<PathBuf> {
        let basename = match (&options.basename, &options.subdir) {
            (Some(basename), _) => basename.clone(),
            (None, Some(_)) => url
                .rsplit('/')
                .next()
                .filter(|segment| !segment.is_empty())
                .map_or_else(|| safe_filename(url), ToOwned::to_owned),
            (None, None) => safe_filename(url),
        };
        let dest_dir = match &options.subdir {
            Some(subdir) => directory.join(subdir),
            None => directory.to_path_buf(),
        };
        let dest = dest_dir.join(&basename);
        if dest.exists() && !options.overwrite {
            debug!(path = %dest.display(), "file exists and overwrite is off");
            return Ok(dest);
        }
        create_dir_all(&dest_dir)?;
        let prefer_symlink = options
            .prefer_symlink
            .unwrap_or(self.config.prefer_symlink());

        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(url)) {
            debug!(url, cached = %cached.display(), "cache hit");
            if !dest.exists() {
                copy_or_symlink(&cached, &dest, prefer_symlink)?;
            }
            return Ok(dest);
        }

        if is_local_url(url) {
            let src = local_source(url);
            if !src.is_file() {
                return Err(Error::NotFound(format!(
                    "local file {} referenced by <{url}> does not exist",
                    src.display()
                )));
            }
            debug!(url, dest = %dest.display(), "placing local file");
            copy_or_symlink(&src, &dest, prefer_symlink)?;
        } else {
            debug!(url, dest = %dest.display(), "downloading");
            let response = self.fetcher.fetch(url)?;
            if !response.is_success() {
                return Err(Error::HttpStatus {
                    url: url.to_string(),
                    status: response.status,
                });
            }
            write_replacing(&dest, &response.body)?;
        }

        if let Some(cache) = &self.cache {
            let stored = cache.put_file(url, &dest)?;
            debug!(url, cached = %stored.display(), "stored in cache");
        }
        Ok(dest)
    }

    /// Creates a workspace around the METS document at `mets_url`.
    ///
    /// Without `directory`, a fresh directory is created under the configured
    /// temp root.
    pub fn workspace_from_url(
        self: &Arc<Self>,
        mets_url: &str,
        directory: Option<&Path>,
        mets_basename: Option<&str>,
    ) -> Result<Workspace> {
        let directory = self.workspace_directory(directory)?;
        let mets_basename = mets_basename.unwrap_or(DEFAULT_METS_BASENAME);
        info!(directory = %directory.display(), mets_url, "creating workspace from URL");
        let mets_url = absolutize_local_url(mets_url)?;
        self.download_to_directory(
            &directory,
            &mets_url,
            &DownloadOptions::new()
                .basename(mets_basename)
                .prefer_symlink(false),
        )?;
        Workspace::open(Arc::clone(self), directory, Some(mets_basename))
    }

    /// Writes an empty METS document into `directory` (or a fresh temp
    /// directory) and returns the workspace.
    pub fn workspace_from_nothing(
        self: &Arc<Self>,
        directory: Option<&Path>,
        clobber: bool,
    ) -> Result<Workspace> {
        let directory = self.workspace_directory(directory)?;
        let mets_path = directory.join(DEFAULT_METS_BASENAME);
        if mets_path.exists() && !clobber {
            return Err(Error::Conflict(format!(
                "not clobbering existing {}",
                mets_path.display()
            )));
        }
        info!(directory = %directory.display(), "creating empty workspace");
        let workspace = Workspace::with_document(
            Arc::clone(self),
            directory,
            DEFAULT_METS_BASENAME,
            MetsDocument::empty(),
        );
        workspace.save_mets()?;
        Ok(workspace)
    }

    /// Builds a METS document describing the files found under `directory`
    /// without writing it.
    pub fn document_from_folder(
        &self,
        directory: &Path,
        convention: Convention,
        clobber: bool,
    ) -> Result<MetsDocument> {
        let directory = checked_folder(directory, clobber)?;
        let mut mets = MetsDocument::empty();
        self.add_files_from_folder(convention, &mut mets, &directory)?;
        Ok(mets)
    }

    /// Like [`document_from_folder`](Self::document_from_folder), then saves
    /// the document as `mets.xml` in `directory`.
    pub fn workspace_from_folder(
        self: &Arc<Self>,
        directory: &Path,
        convention: Convention,
        clobber: bool,
    ) -> Result<Workspace> {
        let mets = self.document_from_folder(directory, convention, clobber)?;
        let directory = checked_folder(directory, true)?;
        let workspace =
            Workspace::with_document(Arc::clone(self), directory, DEFAULT_METS_BASENAME, mets);
        workspace.save_mets()?;
        info!(
            directory = %workspace.directory().display(),
            files = workspace.mets().find_files(&folio_mets::FileFilter::new()).len(),
            "created workspace from folder"
        );
        Ok(workspace)
    }

    /// Adds every file under `directory` to `mets` according to `convention`.
    ///
    /// Root files go to `OCR-D-IMG`; files in a first-level subfolder go to the
    /// group named after it. Deeper levels and the root `mets.xml` are ignored.
    pub fn add_files_from_folder(
        &self,
        convention: Convention,
        mets: &mut MetsDocument,
        directory: &Path,
    ) -> Result<()> {
        let Convention::OcrdGt = convention;
        let directory = fs::canonicalize(directory)
            .map_err(|err| Error::io("resolve", directory, err))?;
        let walker = WalkDir::new(&directory)
            .min_depth(1)
            .max_depth(2)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(&directory).to_path_buf();
                Error::io("walk", path, err.into())
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str() else {
                debug!(path = %path.display(), "skipping non-UTF-8 file name");
                continue;
            };
            let subdir = if entry.depth() == 1 {
                if filename == DEFAULT_METS_BASENAME {
                    continue;
                }
                None
            } else {
                path.parent()
                    .and_then(Path::file_name)
                    .and_then(|name| name.to_str())
            };
            let (file_grp, mimetype) = match subdir {
                None => ("OCR-D-IMG".to_string(), mimetype_for_filename(filename)),
                Some("alto") => ("OCR-D-OCR-ALTO".to_string(), MIMETYPE_ALTO),
                Some("page") => ("OCR-D-OCR-PAGE".to_string(), mimetype_for_filename(filename)),
                Some(other) => (other.to_uppercase(), mimetype_for_filename(filename)),
            };
            let id = format!("{file_grp}_{}", filename.replace('.', "_")).to_uppercase();
            let url = Url::from_file_path(path)
                .map_or_else(|()| format!("file://{}", path.display()), String::from);
            mets.add_file(
                NewFile::new(file_grp, id)
                    .mimetype(mimetype)
                    .url(url)
                    .local_filename(path),
            )?;
        }
        Ok(())
    }

    fn workspace_directory(&self, directory: Option<&Path>) -> Result<PathBuf> {
        match directory {
            Some(directory) => {
                create_dir_all(directory)?;
                fs::canonicalize(directory).map_err(|err| Error::io("resolve", directory, err))
            }
            None => Ok(StagingDir::new_in(self.config.tmp_root(), WORKSPACE_PREFIX)?.keep()),
        }
    }
}

/// Scheme-less relative paths are relative to the process; make them absolute
/// before the workspace directory becomes the reference point.
fn absolutize_local_url(url: &str) -> Result<String> {
    if url.contains("://") || Path::new(url).is_absolute() {
        return Ok(url.to_string());
    }
    let cwd = std::env::current_dir().map_err(|err| Error::io("resolve", url, err))?;
    Ok(cwd.join(url).to_string_lossy().into_owned())
}

fn checked_folder(directory: &Path, clobber: bool) -> Result<PathBuf> {
    if !directory.exists() {
        return Err(Error::NotFound(format!(
            "directory {} does not exist",
            directory.display()
        )));
    }
    if !directory.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "{} is not a directory",
            directory.display()
        )));
    }
    let mets_path = directory.join(DEFAULT_METS_BASENAME);
    if !clobber && mets_path.exists() {
        return Err(Error::Conflict(format!(
            "not clobbering existing {}",
            mets_path.display()
        )));
    }
    fs::canonicalize(directory).map_err(|err| Error::io("resolve", directory, err))
}

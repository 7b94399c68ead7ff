use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use folio_mets::{is_local_url, MetsDocument, MetsFile};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::resolver::{DownloadOptions, Resolver};
use crate::{Error, Result};

pub const DEFAULT_METS_BASENAME: &str = "mets.xml";

/// A directory bound to its METS document and the resolver that fills it.
#[derive(Debug)]
pub struct Workspace {
    resolver: Arc<Resolver>,
    directory: PathBuf,
    mets_basename: String,
    mets: MetsDocument,
}

impl Workspace {
    /// Loads the METS document of an existing workspace directory.
    pub fn open(
        resolver: Arc<Resolver>,
        directory: impl Into<PathBuf>,
        mets_basename: Option<&str>,
    ) -> Result<Self> {
        let directory = directory.into();
        let mets_basename = mets_basename.unwrap_or(DEFAULT_METS_BASENAME).to_string();
        let mets = read_mets(&directory.join(&mets_basename))?;
        Ok(Self {
            resolver,
            directory,
            mets_basename,
            mets,
        })
    }

    /// Binds an in-memory document to `directory` without touching disk.
    #[must_use]
    pub fn with_document(
        resolver: Arc<Resolver>,
        directory: impl Into<PathBuf>,
        mets_basename: &str,
        mets: MetsDocument,
    ) -> Self {
        Self {
            resolver,
            directory: directory.into(),
            mets_basename: mets_basename.to_string(),
            mets,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn mets_basename(&self) -> &str {
        &self.mets_basename
    }

    #[must_use]
    pub fn mets_path(&self) -> PathBuf {
        self.directory.join(&self.mets_basename)
    }

    #[must_use]
    pub fn mets(&self) -> &MetsDocument {
        &self.mets
    }

    pub fn mets_mut(&mut self) -> &mut MetsDocument {
        &mut self.mets
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Serializes the document to its file, replacing it atomically.
    pub fn save_mets(&self) -> Result<()> {
        let path = self.mets_path();
        let xml = self.mets.to_xml()?;
        fs::create_dir_all(&self.directory)
            .map_err(|err| Error::io("create", &self.directory, err))?;
        let mut tmp = NamedTempFile::new_in(&self.directory)
            .map_err(|err| Error::io("create a temp file in", &self.directory, err))?;
        tmp.write_all(xml.as_bytes())
            .map_err(|err| Error::io("write", tmp.path(), err))?;
        tmp.persist(&path)
            .map_err(|err| Error::io("persist", &path, err.error))?;
        info!(path = %path.display(), "saved METS");
        Ok(())
    }

    /// Replaces the in-memory document with what is on disk.
    pub fn reload_mets(&mut self) -> Result<()> {
        self.mets = read_mets(&self.mets_path())?;
        debug!(path = %self.mets_path().display(), "reloaded METS");
        Ok(())
    }

    /// Resolves workspace-relative local references against the directory.
    /// Remote URLs, `file://` URLs and absolute paths are returned unchanged.
    #[must_use]
    pub fn resolve_url(&self, url: &str) -> String {
        if !is_local_url(url) || url.starts_with("file://") || Path::new(url).is_absolute() {
            return url.to_string();
        }
        self.directory.join(url).to_string_lossy().into_owned()
    }

    /// Downloads `url` into the workspace directory.
    pub fn download_url(
        &self,
        url: &str,
        basename: Option<&str>,
        subdir: Option<&str>,
    ) -> Result<PathBuf> {
        let mut options = DownloadOptions::new();
        if let Some(basename) = basename {
            options = options.basename(basename);
        }
        if let Some(subdir) = subdir {
            options = options.subdir(subdir);
        }
        self.resolver
            .download_to_directory(&self.directory, &self.resolve_url(url), &options)
    }

    /// Materializes a referenced file under `<fileGrp>/` and records where it
    /// landed as the entry's local filename.
    pub fn download_file(&mut self, file: &MetsFile) -> Result<MetsFile> {
        if let Some(existing) = file.local_filename.as_deref().filter(|p| p.is_file()) {
            debug!(id = %file.id, path = %existing.display(), "already materialized");
            return Ok(file.clone());
        }
        let url = file.url.as_deref().ok_or_else(|| {
            Error::InvalidArgument(format!("mets:file '{}' has no URL to download", file.id))
        })?;
        let path = self.resolver.download_to_directory(
            &self.directory,
            &self.resolve_url(url),
            &DownloadOptions::new()
                .subdir(file.file_grp.as_str())
                .prefer_symlink(false),
        )?;
        self.mets.set_local_filename(&file.id, path)?;
        self.mets
            .find_file(&file.id)
            .ok_or_else(|| Error::NotFound(format!("mets:file '{}' vanished", file.id)))
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Workspace[directory={}, mets={}]",
            self.directory.display(),
            self.mets
        )
    }
}

fn read_mets(path: &Path) -> Result<MetsDocument> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!(
                "no METS document at {}",
                path.display()
            )));
        }
        Err(err) => return Err(Error::io("read", path, err)),
    };
    Ok(MetsDocument::from_xml(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::StaticFetcher;
    use crate::{Config, ErrorKind};
    use folio_mets::{FileFilter, NewFile};
    use folio_store::Fetcher;
    use tempfile::tempdir;

    fn resolver(fetcher: StaticFetcher) -> Arc<Resolver> {
        Arc::new(Resolver::with_fetcher(
            Config::default(),
            Arc::new(fetcher) as Arc<dyn Fetcher>,
        ))
    }

    #[test]
    fn save_and_reload_round_trip() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let mut workspace = Workspace::with_document(
            resolver(StaticFetcher::default()),
            temp.path(),
            DEFAULT_METS_BASENAME,
            MetsDocument::empty(),
        );
        workspace
            .mets_mut()
            .add_file(NewFile::new("OCR-D-IMG", "f1").mimetype("image/png").url("OCR-D-IMG/f1.png"))?;
        workspace.save_mets()?;

        workspace.mets_mut().remove_file("f1")?;
        workspace.reload_mets()?;
        assert!(workspace.mets().find_file("f1").is_some());
        Ok(())
    }

    #[test]
    fn open_reports_missing_documents() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let err = Workspace::open(resolver(StaticFetcher::default()), temp.path(), None)
            .expect_err("no mets.xml");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        fs::write(temp.path().join("mets.xml"), "<mets:mets")?;
        let err = Workspace::open(resolver(StaticFetcher::default()), temp.path(), None)
            .expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::Xml);
        Ok(())
    }

    #[test]
    fn resolve_url_only_touches_relative_paths() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let workspace = Workspace::with_document(
            resolver(StaticFetcher::default()),
            temp.path(),
            DEFAULT_METS_BASENAME,
            MetsDocument::empty(),
        );
        let joined = workspace.resolve_url("OCR-D-IMG/f1.png");
        assert_eq!(Path::new(&joined), temp.path().join("OCR-D-IMG/f1.png"));
        assert_eq!(workspace.resolve_url("https://x.org/a"), "https://x.org/a");
        assert_eq!(workspace.resolve_url("file:///a/b"), "file:///a/b");
        assert_eq!(workspace.resolve_url("/a/b"), "/a/b");
        Ok(())
    }

    #[test]
    fn download_file_records_local_filename() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let url = "https://example.org/img/0001.png";
        let mut workspace = Workspace::with_document(
            resolver(StaticFetcher::default().with(url, 200, b"png")),
            temp.path(),
            DEFAULT_METS_BASENAME,
            MetsDocument::empty(),
        );
        let file = workspace
            .mets_mut()
            .add_file(NewFile::new("OCR-D-IMG", "f1").mimetype("image/png").url(url))?;
        let downloaded = workspace.download_file(&file)?;
        let local = downloaded.local_filename.clone().expect("materialized");
        assert_eq!(local, temp.path().join("OCR-D-IMG").join("0001.png"));
        assert_eq!(fs::read(&local)?, b"png");
        assert_eq!(downloaded.url.as_deref(), Some(url));
        assert_eq!(
            workspace
                .mets()
                .find_files(&FileFilter::by_id("f1"))[0]
                .local_filename,
            Some(local)
        );
        Ok(())
    }

    #[test]
    fn download_url_uses_subdir_and_basename() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let url = "https://example.org/a.xml";
        let workspace = Workspace::with_document(
            resolver(StaticFetcher::default().with(url, 200, b"<a/>")),
            temp.path(),
            DEFAULT_METS_BASENAME,
            MetsDocument::empty(),
        );
        let path = workspace.download_url(url, Some("renamed.xml"), Some("GRP"))?;
        assert_eq!(path, temp.path().join("GRP").join("renamed.xml"));
        Ok(())
    }
}

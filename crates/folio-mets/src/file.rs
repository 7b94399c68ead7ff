use std::path::{Path, PathBuf};

use serde::Serialize;

/// Snapshot of a `mets:file` entry.
///
/// Values are copied out of the document; edits go through
/// [`MetsDocument`](crate::MetsDocument) so its indices stay in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetsFile {
    pub id: String,
    pub file_grp: String,
    pub mimetype: Option<String>,
    pub url: Option<String>,
    pub page_id: Option<String>,
    /// Materialized location, tracked in memory only.
    pub local_filename: Option<PathBuf>,
}

impl MetsFile {
    /// Whether the file's URL points at the local filesystem.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.url.as_deref().is_some_and(is_local_url)
    }

    /// Last path segment of the URL, if any.
    #[must_use]
    pub fn basename(&self) -> Option<&str> {
        self.url
            .as_deref()
            .and_then(|url| url.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }
}

/// A URL is local when it uses the `file://` scheme or has no scheme at all
/// (a plain absolute or workspace-relative path).
#[must_use]
pub fn is_local_url(url: &str) -> bool {
    url.starts_with("file://") || !url.contains("://")
}

/// Strips a `file://` scheme, leaving plain paths untouched.
#[must_use]
pub fn local_path_of(url: &str) -> &Path {
    Path::new(url.strip_prefix("file://").unwrap_or(url))
}

/// Parameters for [`MetsDocument::add_file`](crate::MetsDocument::add_file).
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub file_grp: String,
    pub id: String,
    pub mimetype: Option<String>,
    pub url: Option<String>,
    pub page_id: Option<String>,
    pub local_filename: Option<PathBuf>,
    /// Overwrite an existing entry with the same ID instead of failing.
    pub force: bool,
}

impl NewFile {
    pub fn new(file_grp: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            file_grp: file_grp.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn page_id(mut self, page_id: impl Into<String>) -> Self {
        self.page_id = Some(page_id.into());
        self
    }

    #[must_use]
    pub fn local_filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_filename = Some(path.into());
        self
    }

    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_urls() {
        assert!(is_local_url("file:///"));
        assert!(is_local_url("OCR-D-IMG/FILE_0001"));
        assert!(is_local_url("/data/scan.tif"));
        assert!(!is_local_url("https://example.org/scan.tif"));
        assert_eq!(local_path_of("file:///"), Path::new("/"));
        assert_eq!(local_path_of("a/b"), Path::new("a/b"));
    }
}

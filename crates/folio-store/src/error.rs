use std::io;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to fetch {url}: {message}")]
    Network { url: String, message: String },
    #[error("fetching {url} timed out after {}s", timeout.as_secs())]
    Timeout { url: String, timeout: Duration },
    #[error("unable to determine a cache directory (set FOLIO_CACHE_PATH)")]
    NoCacheDir,
}

impl StoreError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

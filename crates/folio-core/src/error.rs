use std::fmt;
use std::io;
use std::path::PathBuf;

use folio_mets::MetsError;
use folio_store::StoreError;
use serde::Serialize;

/// Coarse classification of every failure the core can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    Io,
    Network,
    Timeout,
    Xml,
    Archive,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidArgument => "invalid_argument",
            Self::Io => "io",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Xml => "xml",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Mets(#[from] MetsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("fetching {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("malformed archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Mets(err) => {
                if err.is_not_found() {
                    ErrorKind::NotFound
                } else if err.is_conflict() {
                    ErrorKind::Conflict
                } else if err.is_invalid_argument() {
                    ErrorKind::InvalidArgument
                } else {
                    ErrorKind::Xml
                }
            }
            Self::Store(StoreError::Io { .. } | StoreError::NoCacheDir) | Self::Io { .. } => {
                ErrorKind::Io
            }
            Self::Store(StoreError::Network { .. }) | Self::HttpStatus { .. } => ErrorKind::Network,
            Self::Store(StoreError::Timeout { .. }) => ErrorKind::Timeout,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Archive { .. } => ErrorKind::Archive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mets_errors_keep_their_classification() {
        let err = Error::from(MetsError::DuplicateFile("f1".into()));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "mets:file with ID 'f1' already exists");
        assert_eq!(
            Error::from(MetsError::FileNotFound("x".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::from(MetsError::Xml("eof".into())).kind(),
            ErrorKind::Xml
        );
    }

    #[test]
    fn store_errors_map_to_network_kinds() {
        let timeout = Error::from(StoreError::Timeout {
            url: "https://example.org".into(),
            timeout: std::time::Duration::from_secs(1),
        });
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        let status = Error::HttpStatus {
            url: "https://example.org".into(),
            status: 404,
        };
        assert_eq!(status.kind(), ErrorKind::Network);
        assert_eq!(status.kind().to_string(), "network");
    }
}

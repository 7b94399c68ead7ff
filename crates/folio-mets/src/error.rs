/// Failures raised while querying or editing a METS document.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetsError {
    #[error("no mets:file with ID '{0}'")]
    FileNotFound(String),
    #[error("no mets:fileGrp with USE '{0}'")]
    FileGroupNotFound(String),
    #[error("mets:file with ID '{0}' already exists")]
    DuplicateFile(String),
    #[error("mets:fileGrp '{0}' is not empty and recursive removal was not requested")]
    FileGroupNotEmpty(String),
    #[error("mets:fileGrp USE '{0}' must not contain commas")]
    ReservedCharacter(String),
    #[error("invalid regular expression '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("{0}")]
    InvalidArgument(String),
    #[error("malformed METS document: {0}")]
    Xml(String),
}

impl MetsError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_) | Self::FileGroupNotFound(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DuplicateFile(_) | Self::FileGroupNotEmpty(_) | Self::ReservedCharacter(_)
        )
    }

    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidPattern { .. } | Self::InvalidArgument(_))
    }
}

//! METS document model for OCR workspaces.
//!
//! A [`MetsDocument`] owns the parsed tree and keeps lookup indices for file
//! IDs and physical pages in sync with every edit.

mod agent;
mod constants;
mod document;
mod error;
mod file;
mod filter;
mod xml;

pub use agent::Agent;
pub use constants::{
    mimetype_for_filename, DEFAULT_MIMETYPE, EXT_TO_MIME, IDENTIFIER_PRIORITY, MIMETYPE_ALTO,
    MIMETYPE_PAGE, NS_METS, NS_MODS, NS_XLINK, NS_XSI, REGEX_PREFIX,
};
pub use document::MetsDocument;
pub use error::MetsError;
pub use file::{is_local_url, local_path_of, MetsFile, NewFile};
pub use filter::{FileFilter, Matcher};

pub(crate) use document::Names;

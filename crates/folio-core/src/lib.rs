//! Workspaces, resource resolution and OCRD-ZIP bagging on top of
//! [`folio_mets`].
//!
//! A [`Resolver`] turns URLs into local files (through the optional cache)
//! and creates [`Workspace`]s; a [`Bagger`] packs workspaces into BagIt bags
//! and unpacks them again.

mod bagger;
mod config;
mod error;
mod fs;
mod resolver;
mod workspace;

pub use bagger::{
    BagOptions, Bagger, ManifestationDepth, ValidationReport, BAGIT_TXT, OCRD_BAGIT_PROFILE_URL,
};
pub use config::{CacheConfig, Config, EnvSnapshot, NetworkConfig};
pub use error::{Error, ErrorKind, Result};
pub use resolver::{safe_filename, Convention, DownloadOptions, Resolver};
pub use workspace::{Workspace, DEFAULT_METS_BASENAME};

pub use folio_mets as mets;
pub use folio_store as store;

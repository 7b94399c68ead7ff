use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use folio_store::{resolve_cache_store_path, CacheLocation, DEFAULT_HTTP_TIMEOUT};

use crate::{Error, Result};

/// Process environment captured once, so configuration can be built from
/// fixed values in tests.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    /// Snapshot holding exactly `pairs`.
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn flag_is_enabled(&self, key: &str) -> bool {
        self.var(key).is_some_and(|value| {
            matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.var(key)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Resolved only when caching is enabled.
    pub location: Option<CacheLocation>,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub timeout: Duration,
}

/// Runtime settings shared by the resolver and the bagger.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) cache: CacheConfig,
    pub(crate) network: NetworkConfig,
    pub(crate) prefer_symlink: bool,
    pub(crate) tmp_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig { location: None },
            network: NetworkConfig {
                timeout: DEFAULT_HTTP_TIMEOUT,
            },
            prefer_symlink: false,
            tmp_root: env::temp_dir(),
        }
    }
}

impl Config {
    /// Builds a configuration from the current process environment.
    ///
    /// # Errors
    /// Fails when `FOLIO_HTTP_TIMEOUT` is not a number of seconds or no cache
    /// directory can be determined while caching is enabled.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let location = if snapshot.flag_is_enabled("FOLIO_CACHE") {
            let override_path = snapshot.path("FOLIO_CACHE_PATH");
            let xdg = snapshot.path("XDG_CACHE_HOME");
            Some(resolve_cache_store_path(
                override_path.as_deref(),
                xdg.as_deref(),
            )?)
        } else {
            None
        };
        let timeout = match snapshot.var("FOLIO_HTTP_TIMEOUT") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| {
                    Error::InvalidArgument(format!(
                        "FOLIO_HTTP_TIMEOUT must be a whole number of seconds (got '{raw}')"
                    ))
                })?,
            None => DEFAULT_HTTP_TIMEOUT,
        };
        Ok(Self {
            cache: CacheConfig { location },
            network: NetworkConfig { timeout },
            prefer_symlink: snapshot.flag_is_enabled("FOLIO_PREFER_SYMLINK"),
            tmp_root: snapshot.path("FOLIO_TMPDIR").unwrap_or_else(env::temp_dir),
        })
    }

    /// Enables the resource cache rooted at `root`.
    #[must_use]
    pub fn with_cache(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache.location = Some(CacheLocation {
            path: root.into(),
            source: "explicit",
        });
        self
    }

    #[must_use]
    pub fn with_tmp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.tmp_root = root.into();
        self
    }

    #[must_use]
    pub fn with_prefer_symlink(mut self, prefer_symlink: bool) -> Self {
        self.prefer_symlink = prefer_symlink;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.network.timeout = timeout;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    #[must_use]
    pub fn network(&self) -> NetworkConfig {
        self.network
    }

    #[must_use]
    pub fn prefer_symlink(&self) -> bool {
        self.prefer_symlink
    }

    #[must_use]
    pub fn tmp_root(&self) -> &Path {
        &self.tmp_root
    }
}

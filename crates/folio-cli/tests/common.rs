#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// A scratch area holding one workspace directory `ws/` and a private staging root.
pub struct Sandbox {
    pub temp: TempDir,
    pub workspace: PathBuf,
}

impl Sandbox {
    pub fn new() -> anyhow::Result<Self> {
        let temp = tempfile::Builder::new().prefix("folio-cli-").tempdir()?;
        let workspace = temp.path().join("ws");
        fs::create_dir_all(&workspace)?;
        Ok(Self { temp, workspace })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// `folio -d <ws>` with the environment pinned to the sandbox.
    pub fn folio(&self) -> Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("folio");
        cmd.env_remove("FOLIO_CACHE")
            .env_remove("FOLIO_CACHE_PATH")
            .env_remove("FOLIO_PREFER_SYMLINK")
            .env_remove("FOLIO_HTTP_TIMEOUT")
            .env("FOLIO_TMPDIR", self.root().join("tmp"))
            .current_dir(&self.workspace)
            .arg("-d")
            .arg(&self.workspace);
        cmd
    }

    pub fn write(&self, rel: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.workspace.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }
}

pub fn stdout_lines(output: &std::process::Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn parse_json(output: &std::process::Output) -> anyhow::Result<Value> {
    Ok(serde_json::from_slice(&output.stdout)?)
}

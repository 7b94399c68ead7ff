//! OCRD-ZIP: workspaces packed as BagIt bags, zipped or not, and back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use folio_mets::FileFilter;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha512};
use tempfile::NamedTempFile;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::fs::{copy_or_symlink, create_dir_all, normalize_rel_path, StagingDir};
use crate::resolver::{DownloadOptions, Resolver};
use crate::workspace::{Workspace, DEFAULT_METS_BASENAME};
use crate::{Error, Result};

pub const BAGIT_TXT: &str = "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF-8\n";
pub const OCRD_BAGIT_PROFILE_URL: &str = "https://ocr-d.github.io/bagit-profile.json";

const STAGING_PREFIX: &str = "folio-bagit-";
const MANIFEST: &str = "manifest-sha512.txt";
const TAG_MANIFEST: &str = "tagmanifest-sha512.txt";
const BAG_INFO: &str = "bag-info.txt";
const BAGIT: &str = "bagit.txt";
const REQUIRED_INFO_KEYS: [&str; 3] = [
    "BagIt-Profile-Identifier",
    "Ocrd-Identifier",
    "Ocrd-Manifestation-Depth",
];

static OCRD_ZIP_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\.ocrd)?\.zip$").expect("valid pattern"));

/// Whether a bag embeds every referenced file or only the local ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestationDepth {
    #[default]
    Full,
    Partial,
}

impl ManifestationDepth {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }
}

impl FromStr for ManifestationDepth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            other => Err(Error::InvalidArgument(format!(
                "manifestation depth must be 'full' or 'partial' (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for ManifestationDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BagOptions {
    /// Defaults to `<workspace>.ocrd.zip`, or `<workspace>.ocrd` with `skip_zip`.
    pub dest: Option<PathBuf>,
    pub mets_basename: String,
    pub depth: ManifestationDepth,
    pub base_version_checksum: Option<String>,
    pub skip_zip: bool,
    /// Checksum worker threads.
    pub parallelism: usize,
}

impl Default for BagOptions {
    fn default() -> Self {
        Self {
            dest: None,
            mets_basename: DEFAULT_METS_BASENAME.to_string(),
            depth: ManifestationDepth::Full,
            base_version_checksum: None,
            skip_zip: false,
            parallelism: 1,
        }
    }
}

/// Outcome of [`Bagger::validate`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
struct PayloadDigest {
    /// Path relative to the bag root, `/`-separated.
    path: String,
    sha512: String,
    size: u64,
}

#[derive(Debug, Clone)]
pub struct Bagger {
    resolver: Arc<Resolver>,
}

impl Bagger {
    #[must_use]
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    /// Packs `workspace` as an OCRD-ZIP and returns where it was written.
    ///
    /// The workspace itself is left unchanged; URL rewriting happens on a copy
    /// of its document.
    pub fn bag(
        &self,
        workspace: &Workspace,
        identifier: &str,
        options: &BagOptions,
    ) -> Result<PathBuf> {
        let dest = match &options.dest {
            Some(dest) => dest.clone(),
            None => default_bag_dest(workspace.directory(), options.skip_zip)?,
        };
        if dest.exists() {
            return Err(Error::Conflict(format!(
                "bag destination {} already exists",
                dest.display()
            )));
        }

        let staging = StagingDir::new_in(self.resolver.config().tmp_root(), STAGING_PREFIX)?;
        let bagdir = staging.path();
        let datadir = bagdir.join("data");
        info!(
            workspace = %workspace.directory().display(),
            dest = %dest.display(),
            staging = %bagdir.display(),
            depth = %options.depth,
            "bagging workspace"
        );
        create_dir_all(&datadir)?;
        write_text(&bagdir.join(BAGIT), BAGIT_TXT)?;

        let mut mets = workspace.mets().clone();
        for file in mets.find_files(&FileFilter::new()) {
            if options.depth == ManifestationDepth::Partial && !file.is_local() {
                debug!(id = %file.id, "leaving remote file out of partial bag");
                continue;
            }
            let Some(url) = file.url.as_deref() else {
                warn!(id = %file.id, "mets:file has no URL, not bagged");
                continue;
            };
            payload_segment("fileGrp USE", &file.file_grp)?;
            payload_segment("file ID", &file.id)?;
            self.resolver.download_to_directory(
                &datadir.join(&file.file_grp),
                &workspace.resolve_url(url),
                &DownloadOptions::new()
                    .basename(file.id.as_str())
                    .prefer_symlink(false),
            )?;
            mets.set_file_url(&file.id, &format!("{}/{}", file.file_grp, file.id))?;
        }
        write_text(&datadir.join(&options.mets_basename), &mets.to_xml()?)?;

        let payload = checksum_payload(bagdir, options.parallelism)?;
        let total_bytes: u64 = payload.iter().map(|entry| entry.size).sum();
        write_text(&bagdir.join(MANIFEST), &manifest_text(&payload))?;

        let mut bag_info = BTreeMap::new();
        bag_info.insert("BagIt-Profile-Identifier", OCRD_BAGIT_PROFILE_URL.to_string());
        let bagging_date = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| Error::archive(bagdir, err))?;
        bag_info.insert("Bagging-Date", bagging_date);
        bag_info.insert("Ocrd-Identifier", identifier.to_string());
        bag_info.insert("Ocrd-Manifestation-Depth", options.depth.to_string());
        if let Some(checksum) = &options.base_version_checksum {
            bag_info.insert("Ocrd-Base-Version-Checksum", checksum.clone());
        }
        if options.mets_basename != DEFAULT_METS_BASENAME {
            bag_info.insert("Ocrd-Mets", options.mets_basename.clone());
        }
        bag_info.insert("Payload-Oxum", format!("{total_bytes}.{}", payload.len()));
        let info_text: String = bag_info
            .iter()
            .map(|(key, value)| format!("{key}: {value}\n"))
            .collect();
        write_text(&bagdir.join(BAG_INFO), &info_text)?;

        let tag_files = [BAGIT, BAG_INFO, MANIFEST]
            .iter()
            .map(|name| digest_entry(bagdir, Path::new(name)))
            .collect::<Result<Vec<_>>>()?;
        write_text(&bagdir.join(TAG_MANIFEST), &manifest_text(&tag_files))?;

        if options.skip_zip {
            move_dir(staging, &dest)?;
        } else {
            zip_directory(bagdir, &dest)?;
        }
        info!(dest = %dest.display(), files = payload.len(), bytes = total_bytes, "created bag");
        Ok(dest)
    }

    /// Unpacks the bag at `src` (zip or directory) into a workspace at `dest`.
    ///
    /// When `dest` is an existing directory, the workspace goes into a
    /// subdirectory named after `src` without its `.ocrd.zip` suffix.
    pub fn spill(&self, src: &Path, dest: &Path) -> Result<Workspace> {
        if !src.exists() {
            return Err(Error::NotFound(format!("no bag at {}", src.display())));
        }
        if dest.exists() && !dest.is_dir() {
            return Err(Error::Conflict(format!(
                "{} exists and is not a directory",
                dest.display()
            )));
        }
        let dest = if dest.is_dir() {
            let name = src
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("{} has no file name", src.display()))
                })?;
            let nested = dest.join(OCRD_ZIP_SUFFIX.replace(&name, "").as_ref());
            if nested.exists() {
                return Err(Error::Conflict(format!(
                    "directory {} already exists",
                    nested.display()
                )));
            }
            nested
        } else {
            dest.to_path_buf()
        };
        create_dir_all(&dest)?;
        info!(src = %src.display(), dest = %dest.display(), "spilling bag");

        let opened = OpenedBag::open(src, self.resolver.config().tmp_root())?;
        let datadir = opened.root().join("data");
        if !datadir.is_dir() {
            return Err(Error::archive(src, "bag has no data/ directory"));
        }
        for entry in WalkDir::new(&datadir).sort_by_file_name() {
            let entry = entry.map_err(|err| walk_error(&datadir, err))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&datadir)
                .map_err(|err| Error::archive(src, err))?;
            let target = dest.join(rel);
            if let Some(parent) = target.parent() {
                create_dir_all(parent)?;
            }
            debug!(src = %entry.path().display(), dest = %target.display(), "copy");
            copy_or_symlink(entry.path(), &target, false)?;
        }

        let mets_basename = read_bag_info(opened.root())?
            .into_iter()
            .find_map(|(key, value)| (key == "Ocrd-Mets").then_some(value))
            .unwrap_or_else(|| DEFAULT_METS_BASENAME.to_string());
        drop(opened);
        Workspace::open(Arc::clone(&self.resolver), dest, Some(&mets_basename))
    }

    /// Checks the bag at `src` (zip or directory) against BagIt and the
    /// OCR-D profile keys.
    pub fn validate(&self, src: &Path) -> Result<ValidationReport> {
        if !src.exists() {
            return Err(Error::NotFound(format!("no bag at {}", src.display())));
        }
        let opened = OpenedBag::open(src, self.resolver.config().tmp_root())?;
        let root = opened.root();
        let mut report = ValidationReport::default();

        match fs::read_to_string(root.join(BAGIT)) {
            Ok(text) if text.lines().any(|line| line.starts_with("BagIt-Version:")) => {}
            Ok(_) => report.errors.push(format!("{BAGIT} lacks BagIt-Version")),
            Err(_) => report.errors.push(format!("missing {BAGIT}")),
        }

        let info = if root.join(BAG_INFO).is_file() {
            read_bag_info(root)?
        } else {
            report.errors.push(format!("missing {BAG_INFO}"));
            Vec::new()
        };
        let info_value = |key: &str| {
            info.iter()
                .find(|(k, _)| k == key)
                .map(|(_, value)| value.as_str())
        };
        for key in REQUIRED_INFO_KEYS {
            if info_value(key).is_none() {
                report.errors.push(format!("{BAG_INFO} lacks required key {key}"));
            }
        }
        if let Some(profile) = info_value("BagIt-Profile-Identifier") {
            if profile != OCRD_BAGIT_PROFILE_URL {
                report
                    .warnings
                    .push(format!("unexpected BagIt-Profile-Identifier {profile}"));
            }
        }
        if let Some(depth) = info_value("Ocrd-Manifestation-Depth") {
            if let Err(err) = depth.parse::<ManifestationDepth>() {
                report.errors.push(err.to_string());
            }
        }
        let mets_basename = info_value("Ocrd-Mets").unwrap_or(DEFAULT_METS_BASENAME);
        if !root.join("data").join(mets_basename).is_file() {
            report
                .errors
                .push(format!("payload lacks data/{mets_basename}"));
        }

        let actual = checksum_payload(root, rayon::current_num_threads())?;
        match fs::read_to_string(root.join(MANIFEST)) {
            Ok(text) => {
                let listed = parse_manifest(&text, &mut report.errors);
                check_digests(&listed, &actual, &mut report.errors);
                let listed_paths: BTreeSet<&str> =
                    listed.iter().map(|(_, path)| path.as_str()).collect();
                for entry in &actual {
                    if !listed_paths.contains(entry.path.as_str()) {
                        report
                            .errors
                            .push(format!("{} is not listed in {MANIFEST}", entry.path));
                    }
                }
            }
            Err(_) => report.errors.push(format!("missing {MANIFEST}")),
        }

        match info_value("Payload-Oxum") {
            Some(oxum) => {
                let bytes: u64 = actual.iter().map(|entry| entry.size).sum();
                let expected = format!("{bytes}.{}", actual.len());
                if oxum != expected {
                    report
                        .errors
                        .push(format!("Payload-Oxum is {oxum}, payload has {expected}"));
                }
            }
            None => report.warnings.push(format!("{BAG_INFO} lacks Payload-Oxum")),
        }

        match fs::read_to_string(root.join(TAG_MANIFEST)) {
            Ok(text) => {
                let listed = parse_manifest(&text, &mut report.errors);
                let tag_files = listed
                    .iter()
                    .filter(|(_, path)| root.join(path).is_file())
                    .map(|(_, path)| digest_entry(root, Path::new(path)))
                    .collect::<Result<Vec<_>>>()?;
                check_digests(&listed, &tag_files, &mut report.errors);
            }
            Err(_) => report.warnings.push(format!("missing {TAG_MANIFEST}")),
        }

        report.is_valid = report.errors.is_empty();
        info!(
            bag = %src.display(),
            valid = report.is_valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "validated bag"
        );
        Ok(report)
    }
}

/// A bag readable on disk: the directory itself, or a zip unpacked into a
/// staging directory that is removed on drop.
struct OpenedBag {
    root: PathBuf,
    _staging: Option<StagingDir>,
}

impl OpenedBag {
    fn open(src: &Path, tmp_root: &Path) -> Result<Self> {
        if src.is_dir() {
            return Ok(Self {
                root: src.to_path_buf(),
                _staging: None,
            });
        }
        let staging = StagingDir::new_in(tmp_root, STAGING_PREFIX)?;
        unpack_zip(src, staging.path())?;
        Ok(Self {
            root: staging.path().to_path_buf(),
            _staging: Some(staging),
        })
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

fn default_bag_dest(directory: &Path, skip_zip: bool) -> Result<PathBuf> {
    let directory =
        fs::canonicalize(directory).map_err(|err| Error::io("resolve", directory, err))?;
    let name = directory
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "cannot derive a bag name from {}",
                directory.display()
            ))
        })?;
    let suffix = if skip_zip { ".ocrd" } else { ".ocrd.zip" };
    Ok(directory.with_file_name(format!("{name}{suffix}")))
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).map_err(|err| Error::io("write", path, err))
}

fn walk_error(root: &Path, err: walkdir::Error) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    Error::io("walk", path, err.into())
}

fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path).map_err(|err| Error::io("open", path, err))?;
    let mut hasher = Sha512::new();
    let size = io::copy(&mut file, &mut hasher).map_err(|err| Error::io("read", path, err))?;
    Ok((hex::encode(hasher.finalize()), size))
}

fn digest_entry(root: &Path, rel: &Path) -> Result<PayloadDigest> {
    let (sha512, size) = hash_file(&root.join(rel))?;
    Ok(PayloadDigest {
        path: normalize_rel_path(rel)?,
        sha512,
        size,
    })
}

/// Digests of every file under `root/data`, sorted by path, hashed on a pool
/// of `parallelism` threads.
fn checksum_payload(root: &Path, parallelism: usize) -> Result<Vec<PayloadDigest>> {
    let datadir = root.join("data");
    let mut files = Vec::new();
    if datadir.is_dir() {
        for entry in WalkDir::new(&datadir).sort_by_file_name() {
            let entry = entry.map_err(|err| walk_error(&datadir, err))?;
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(root)
                    .map_err(|err| Error::archive(root, err))?
                    .to_path_buf();
                files.push(rel);
            }
        }
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .build()
        .map_err(|err| {
            Error::InvalidArgument(format!("cannot start {parallelism} checksum workers: {err}"))
        })?;
    let mut digests = pool.install(|| {
        files
            .par_iter()
            .map(|rel| digest_entry(root, rel))
            .collect::<Result<Vec<_>>>()
    })?;
    digests.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(files = digests.len(), threads = parallelism.max(1), "checksummed payload");
    Ok(digests)
}

fn manifest_text(entries: &[PayloadDigest]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}  {}\n", entry.sha512, entry.path))
        .collect()
}

fn parse_manifest(text: &str, errors: &mut Vec<String>) -> Vec<(String, String)> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match line.split_once(char::is_whitespace) {
            Some((digest, path)) => Some((digest.to_string(), path.trim_start().to_string())),
            None => {
                errors.push(format!("malformed manifest line '{line}'"));
                None
            }
        })
        .collect()
}

fn check_digests(listed: &[(String, String)], actual: &[PayloadDigest], errors: &mut Vec<String>) {
    let by_path: BTreeMap<&str, &str> = actual
        .iter()
        .map(|entry| (entry.path.as_str(), entry.sha512.as_str()))
        .collect();
    for (digest, path) in listed {
        match by_path.get(path.as_str()) {
            Some(actual) if actual.eq_ignore_ascii_case(digest) => {}
            Some(_) => errors.push(format!("checksum mismatch for {path}")),
            None => errors.push(format!("{path} is listed but missing")),
        }
    }
}

/// `Key: Value` pairs in file order; indented lines continue the previous value.
fn read_bag_info(root: &Path) -> Result<Vec<(String, String)>> {
    let path = root.join(BAG_INFO);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::io("read", &path, err)),
    };
    let mut pairs: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = pairs.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            pairs.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(pairs)
}

/// Rejects names that would leave `data/` once joined into a payload path.
fn payload_segment(what: &str, value: &str) -> Result<()> {
    let unsafe_name = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\']);
    if unsafe_name {
        return Err(Error::InvalidArgument(format!(
            "{what} {value:?} cannot be used as a bag path component"
        )));
    }
    Ok(())
}

/// Zips `root` into a temp file beside `dest`, which only appears once the
/// archive is complete.
fn zip_directory(root: &Path, dest: &Path) -> Result<()> {
    let parent = match dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(parent)
        .map_err(|err| Error::io("create a temp file in", parent, err))?;
    let mut zip = ZipWriter::new(tmp);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| walk_error(root, err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|err| Error::archive(dest, err))?;
        zip.start_file(normalize_rel_path(rel)?, options)
            .map_err(|err| Error::archive(dest, err))?;
        let mut input =
            File::open(entry.path()).map_err(|err| Error::io("open", entry.path(), err))?;
        io::copy(&mut input, &mut zip).map_err(|err| Error::io("write", dest, err))?;
    }
    let tmp = zip.finish().map_err(|err| Error::archive(dest, err))?;
    tmp.persist_noclobber(dest)
        .map_err(|err| Error::io("persist", dest, err.error))?;
    Ok(())
}

fn unpack_zip(src: &Path, dest: &Path) -> Result<()> {
    let file = File::open(src).map_err(|err| Error::io("open", src, err))?;
    let mut archive = ZipArchive::new(file).map_err(|err| Error::archive(src, err))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| Error::archive(src, err))?;
        let Some(enclosed) = entry.enclosed_name().map(|p| dest.join(p)) else {
            warn!(name = entry.name(), "skipping zip entry escaping the bag");
            continue;
        };
        if entry.is_dir() {
            create_dir_all(&enclosed)?;
            continue;
        }
        if let Some(parent) = enclosed.parent() {
            create_dir_all(parent)?;
        }
        let mut outfile =
            File::create(&enclosed).map_err(|err| Error::io("create", &enclosed, err))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| Error::io("write", &enclosed, err))?;
        outfile
            .flush()
            .map_err(|err| Error::io("write", &enclosed, err))?;
    }
    Ok(())
}

/// Promotes the staging directory to `dest`, copying when a rename is not
/// possible (e.g. across filesystems).
fn move_dir(staging: StagingDir, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    if fs::rename(staging.path(), dest).is_ok() {
        staging.keep();
        return Ok(());
    }
    let root = staging.path();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| walk_error(root, err))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|err| Error::archive(root, err))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            create_dir_all(&target)?;
        } else {
            copy_or_symlink(entry.path(), &target, false)?;
        }
    }
    Ok(())
}

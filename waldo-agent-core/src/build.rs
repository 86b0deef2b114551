//! # build: turning a build artifact into an uploadable payload
//!
//! A build is recognized purely by its extension, looked up in [`BUILD_KINDS`].
//! File artifacts (`.apk`, `.ipa`) are uploaded as they are; directory
//! bundles (`.app`) are zipped into a scoped [`WorkingDir`] first.
//!
//! Validation ([`validate_build_path`]) never touches the filesystem beyond
//! resolving the path, so a bad extension is reported before anything else
//! runs. Shape checks happen in [`create_payload`].

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{AgentError, Result};

pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSuffix {
    Apk,
    App,
    Ipa,
}

impl BuildSuffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildSuffix::Apk => "apk",
            BuildSuffix::App => "app",
            BuildSuffix::Ipa => "ipa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Android,
    Ios,
}

impl Flavor {
    pub fn name(&self) -> &'static str {
        match self {
            Flavor::Android => "Android",
            Flavor::Ios => "iOS",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// A single regular file, uploaded verbatim.
    File,
    /// A bundle directory, zipped before upload.
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildKind {
    pub suffix: BuildSuffix,
    pub flavor: Flavor,
    pub layout: Layout,
    pub content_type: &'static str,
}

pub const BUILD_KINDS: &[BuildKind] = &[
    BuildKind {
        suffix: BuildSuffix::Apk,
        flavor: Flavor::Android,
        layout: Layout::File,
        content_type: BINARY_CONTENT_TYPE,
    },
    BuildKind {
        suffix: BuildSuffix::App,
        flavor: Flavor::Ios,
        layout: Layout::Directory,
        content_type: ZIP_CONTENT_TYPE,
    },
    BuildKind {
        suffix: BuildSuffix::Ipa,
        flavor: Flavor::Ios,
        layout: Layout::File,
        content_type: BINARY_CONTENT_TYPE,
    },
];

/// A validated build artifact and where its payload will live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    pub absolute_path: PathBuf,
    pub kind: BuildKind,
    /// Same as `absolute_path` for file layouts, the zip archive otherwise.
    pub payload_path: PathBuf,
}

impl BuildDescriptor {
    pub fn suffix(&self) -> BuildSuffix {
        self.kind.suffix
    }

    pub fn flavor(&self) -> Flavor {
        self.kind.flavor
    }

    pub fn content_type(&self) -> &'static str {
        self.kind.content_type
    }
}

fn lookup_kind(path: &Path) -> Option<BuildKind> {
    let extension = path.extension()?.to_str()?;
    BUILD_KINDS
        .iter()
        .find(|kind| kind.suffix.as_str() == extension)
        .copied()
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Check the build path and derive everything needed to package it.
///
/// `working_dir` is only used to name the archive of directory bundles.
pub fn validate_build_path(path: &Path, working_dir: &Path) -> Result<BuildDescriptor> {
    if path.as_os_str().is_empty() {
        return Err(AgentError::EmptyBuildPath);
    }

    let absolute_path = absolutize(path)?;
    let kind = lookup_kind(&absolute_path)
        .ok_or_else(|| AgentError::UnrecognizedBuildSuffix(absolute_path.clone()))?;

    let payload_path = match kind.layout {
        Layout::File => absolute_path.clone(),
        Layout::Directory => {
            let mut archive_name = absolute_path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_default();
            archive_name.push(".zip");
            working_dir.join(archive_name)
        }
    };

    debug!(
        build = %absolute_path.display(),
        suffix = kind.suffix.as_str(),
        flavor = %kind.flavor,
        payload = %payload_path.display(),
        "Build path validated"
    );

    Ok(BuildDescriptor {
        absolute_path,
        kind,
        payload_path,
    })
}

/// Make sure the payload exists, archiving directory bundles as needed.
pub fn create_payload(descriptor: &BuildDescriptor) -> Result<()> {
    let path = &descriptor.absolute_path;
    let metadata = fs::metadata(path).map_err(|_| AgentError::UnreadableBuild(path.clone()))?;

    match descriptor.kind.layout {
        Layout::File if metadata.is_file() => Ok(()),
        Layout::Directory if metadata.is_dir() => {
            info!(
                build = %path.display(),
                archive = %descriptor.payload_path.display(),
                "[UPLOAD] Archiving build bundle"
            );
            archive_directory(path, &descriptor.payload_path).map_err(|e| AgentError::Archive {
                path: path.clone(),
                message: e.to_string(),
            })
        }
        _ => Err(AgentError::UnreadableBuild(path.clone())),
    }
}

/// Open the payload and return its length in bytes.
///
/// Upload attempts stream the same file, so a payload that cannot be opened
/// here fails the upload without touching the network.
pub fn payload_size(descriptor: &BuildDescriptor) -> Result<u64> {
    let path = &descriptor.payload_path;
    let unreadable = |_| AgentError::UnreadableBuild(path.clone());
    let file = File::open(path).map_err(unreadable)?;
    let length = file.metadata().map_err(unreadable)?.len();
    debug!(payload = %path.display(), length, "Payload ready");
    Ok(length)
}

/// Zip `source` into `archive`, with the directory itself as the top-level entry.
fn archive_directory(source: &Path, archive: &Path) -> zip::result::ZipResult<()> {
    let parent = source.parent().unwrap_or_else(|| Path::new(""));
    let mut writer = ZipWriter::new(File::create(archive)?);
    let mut entries = 0usize;

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(parent).unwrap_or(entry.path());
        let name = entry_name(relative);
        let metadata = fs::symlink_metadata(entry.path())?;
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(permissions_of(&metadata))
            .large_file(metadata.len() >= u64::from(u32::MAX));

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            writer.add_symlink(name, target.to_string_lossy(), options)?;
        } else if file_type.is_dir() {
            writer.add_directory(name, options)?;
        } else if file_type.is_file() {
            writer.start_file(name, options)?;
            io::copy(&mut File::open(entry.path())?, &mut writer)?;
        } else {
            warn!(path = %entry.path().display(), "Skipping special file in build bundle");
            continue;
        }
        entries += 1;
    }

    writer.finish()?;
    debug!(entries, archive = %archive.display(), "Build bundle archived");
    Ok(())
}

/// Zip entry names always use `/`, whatever the host separator.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn permissions_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions_of(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}

/// Scratch directory for payloads, removed when dropped.
#[derive(Debug)]
pub struct WorkingDir {
    path: PathBuf,
}

impl WorkingDir {
    /// `<tmp>/WaldoAgent-<pid>`.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(format!("WaldoAgent-{}", std::process::id()))
    }

    /// Clear whatever is at `path` and create it afresh.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let prepare = || -> io::Result<()> {
            match fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            fs::create_dir_all(&path)
        };

        prepare().map_err(|source| AgentError::WorkingDirectory {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "Working directory ready");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Unable to remove working directory");
            }
        }
    }
}

//! Backup archive extraction.
//!
//! Archives are semi-trusted: every entry is validated before anything is
//! written, so an archive with a single escaping entry leaves the destination
//! untouched.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to read archive {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Archive entry escapes destination directory: {0}")]
    UnsafeEntry(PathBuf),
    #[error("Archive entry has unsupported type: {0}")]
    UnsupportedEntry(PathBuf),
}

/// Counts reported after a successful extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub entries: u64,
    pub bytes: u64,
}

pub trait ArchiveExtractor: Send + Sync {
    /// Unpack `archive` into `dest`. `dest` must already exist.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<ExtractSummary, ArchiveError>;
}

/// Extractor for `.tgz` / `.tar.gz` archives (plain `.tar` is also accepted).
#[derive(Debug, Default, Clone)]
pub struct TarGzExtractor;

impl TarGzExtractor {
    pub fn new() -> Self {
        Self
    }

    fn open(&self, archive: &Path) -> Result<Archive<Box<dyn Read>>, ArchiveError> {
        let file = File::open(archive).map_err(|e| io_error(archive, e))?;
        let reader = BufReader::new(file);

        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let stream: Box<dyn Read> = if name.ends_with(".tar") {
            Box::new(reader)
        } else {
            Box::new(GzDecoder::new(reader))
        };

        Ok(Archive::new(stream))
    }

    /// First pass: walk the archive without writing and reject unsafe entries.
    fn validate(&self, archive: &Path) -> Result<ExtractSummary, ArchiveError> {
        let mut tar = self.open(archive)?;
        let mut summary = ExtractSummary::default();
        // Symlinks created by earlier entries. Nothing may be written through them.
        let mut links: HashSet<PathBuf> = HashSet::new();

        for entry in tar.entries().map_err(|e| io_error(archive, e))? {
            let entry = entry.map_err(|e| io_error(archive, e))?;
            let path = entry.path().map_err(|e| io_error(archive, e))?.into_owned();

            if !stays_within(&path) || through_link(&path, &links) {
                return Err(ArchiveError::UnsafeEntry(path));
            }

            match entry.header().entry_type() {
                EntryType::Regular
                | EntryType::Continuous
                | EntryType::Directory
                | EntryType::GNUSparse => {}
                EntryType::Symlink => {
                    let target = link_target(&entry, archive, &path)?;
                    // Symlink targets resolve relative to the link's own directory.
                    let resolved = path.parent().unwrap_or(Path::new("")).join(&target);
                    if target.is_absolute()
                        || !stays_within(&resolved)
                        || through_link(&resolved, &links)
                    {
                        return Err(ArchiveError::UnsafeEntry(path));
                    }
                    links.insert(normalize(&path));
                }
                EntryType::Link => {
                    let target = link_target(&entry, archive, &path)?;
                    if !stays_within(&target) || through_link(&target, &links) {
                        return Err(ArchiveError::UnsafeEntry(path));
                    }
                }
                // Metadata records consumed by the tar reader itself.
                EntryType::XGlobalHeader | EntryType::XHeader => continue,
                EntryType::GNULongName | EntryType::GNULongLink => continue,
                _ => return Err(ArchiveError::UnsupportedEntry(path)),
            }

            summary.entries += 1;
            summary.bytes += entry.size();
        }

        Ok(summary)
    }
}

impl ArchiveExtractor for TarGzExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<ExtractSummary, ArchiveError> {
        let summary = self.validate(archive)?;
        debug!(
            archive = %archive.display(),
            entries = summary.entries,
            "Archive validated"
        );

        let mut tar = self.open(archive)?;
        tar.set_preserve_permissions(true);
        tar.set_overwrite(true);

        for entry in tar.entries().map_err(|e| io_error(archive, e))? {
            let mut entry = entry.map_err(|e| io_error(archive, e))?;
            let path = entry.path().map_err(|e| io_error(archive, e))?.into_owned();

            let unpacked = entry.unpack_in(dest).map_err(|e| io_error(archive, e))?;
            if !unpacked {
                // unpack_in refuses paths it considers unsafe; validation should
                // already have caught these.
                return Err(ArchiveError::UnsafeEntry(path));
            }
        }

        info!(
            archive = %archive.display(),
            dest = %dest.display(),
            entries = summary.entries,
            bytes = summary.bytes,
            "Archive extracted"
        );

        Ok(summary)
    }
}

fn link_target<R: Read>(
    entry: &tar::Entry<'_, R>,
    archive: &Path,
    path: &Path,
) -> Result<PathBuf, ArchiveError> {
    entry
        .link_name()
        .map_err(|e| io_error(archive, e))?
        .map(|p| p.into_owned())
        .ok_or_else(|| ArchiveError::UnsafeEntry(path.to_path_buf()))
}

/// Lexically check that a relative path never climbs above its root.
fn stays_within(path: &Path) -> bool {
    let mut depth: usize = 0;

    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }

    true
}

/// Whether any prefix of `path`, or `path` itself, is one of `links`.
fn through_link(path: &Path, links: &HashSet<PathBuf>) -> bool {
    if links.is_empty() {
        return false;
    }

    let mut prefix = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                prefix.push(part);
                if links.contains(&prefix) {
                    return true;
                }
            }
            Component::ParentDir => {
                prefix.pop();
            }
            _ => {}
        }
    }

    false
}

/// Lexical form of a relative path without `.` components.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn io_error(path: &Path, source: io::Error) -> ArchiveError {
    ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

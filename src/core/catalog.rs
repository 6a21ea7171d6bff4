//! Server discovery and backup listing.
//!
//! A server is any directory under the base path that has both a `data/` and
//! a `backups/` subdirectory. The directory name doubles as the container name.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::container::ContainerStatus;

static BACKUP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^world-(\d{8})-(\d{6})\.(tgz|tar\.gz)$").expect("backup pattern is valid")
});

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Server not found: {0}")]
    ServerNotFound(String),
    #[error("Backup not found: {0}")]
    BackupNotFound(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Filesystem locations belonging to one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub backups_dir: PathBuf,
}

impl ServerPaths {
    pub fn backup(&self, filename: &str) -> PathBuf {
        self.backups_dir.join(filename)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub filename: String,
    pub created_at: NaiveDateTime,
    pub size_bytes: u64,
    pub size_human: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub status: ContainerStatus,
    pub data_path: PathBuf,
    pub backups_path: PathBuf,
    pub has_backups: bool,
}

#[derive(Debug, Clone)]
pub struct ServerCatalog {
    base_path: PathBuf,
}

impl ServerCatalog {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn paths(&self, name: &str) -> ServerPaths {
        let root = self.base_path.join(name);
        ServerPaths {
            data_dir: root.join("data"),
            backups_dir: root.join("backups"),
            root,
        }
    }

    /// Names of all servers, sorted. A missing base path yields no servers.
    pub fn discover_servers(&self) -> Result<Vec<String>, CatalogError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.base_path).map_err(|e| CatalogError::Io {
            path: self.base_path.clone(),
            source: e,
        })?;

        let mut servers: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let path = entry.path();
                path.is_dir() && path.join("data").is_dir() && path.join("backups").is_dir()
            })
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();

        servers.sort();
        Ok(servers)
    }

    /// Rejects names that could point outside the base path.
    pub fn is_valid_server(&self, name: &str) -> bool {
        if !is_plain_name(name) {
            return false;
        }
        self.discover_servers()
            .map(|servers| servers.iter().any(|s| s == name))
            .unwrap_or(false)
    }

    pub fn require_server(&self, name: &str) -> Result<ServerPaths, CatalogError> {
        if self.is_valid_server(name) {
            Ok(self.paths(name))
        } else {
            Err(CatalogError::ServerNotFound(name.to_string()))
        }
    }

    /// Backups for `name`, newest first. Symlinks such as `latest.tgz` are skipped.
    pub fn list_backups(&self, name: &str) -> Result<Vec<BackupInfo>, CatalogError> {
        let backups_dir = self.paths(name).backups_dir;
        if !backups_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&backups_dir).map_err(|e| CatalogError::Io {
            path: backups_dir.clone(),
            source: e,
        })?;

        let mut backups = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() || !file_type.is_file() {
                continue;
            }

            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            let Some(created_at) = parse_backup_timestamp(&filename) else {
                debug!(file = %filename, "Skipping file that does not look like a backup");
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };

            backups.push(BackupInfo {
                filename,
                created_at,
                size_bytes: metadata.len(),
                size_human: format_size(metadata.len()),
            });
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Whether `filename` is a regular file (not a symlink) in the server's backups.
    pub fn backup_exists(&self, name: &str, filename: &str) -> bool {
        if !is_plain_name(name) || !is_plain_name(filename) {
            return false;
        }
        let path = self.paths(name).backup(filename);
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta.file_type().is_file(),
            Err(_) => false,
        }
    }

    pub fn server_info(&self, name: &str, status: ContainerStatus) -> Result<ServerInfo, CatalogError> {
        let paths = self.require_server(name)?;
        let has_backups = !self.list_backups(name)?.is_empty();

        Ok(ServerInfo {
            name: name.to_string(),
            status,
            data_path: paths.data_dir,
            backups_path: paths.backups_dir,
            has_backups,
        })
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

fn parse_backup_timestamp(filename: &str) -> Option<NaiveDateTime> {
    let caps = BACKUP_PATTERN.captures(filename)?;
    let stamp = format!("{}{}", &caps[1], &caps[2]);
    NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M%S").ok()
}

/// Human-readable byte size using 1024 steps, e.g. `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

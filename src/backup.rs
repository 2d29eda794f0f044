// src/backup.rs
use crate::config::Settings;
use crate::credentials::{CopyMode, LiveCredentials};
use crate::error::{AppError, AppResult};
use crate::fsutil;
use chrono::Utc;
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::DirBuilderExt;

/// UTC, second resolution; sorts lexicographically in chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

// Same-second collisions get `-01`..`-99`, which still sort after the bare name.
const MAX_SAME_SECOND: u32 = 99;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub timestamp: String,
    pub files: Vec<String>,
}

/// Timestamped snapshots of the live credentials, bounded by count.
pub struct BackupRetention<'a> {
    live: &'a LiveCredentials,
    max_backups: usize,
}

impl<'a> BackupRetention<'a> {
    pub fn new(live: &'a LiveCredentials, settings: &Settings) -> Self {
        BackupRetention {
            live,
            max_backups: settings.effective_max_backups(),
        }
    }

    fn backups_dir(&self) -> PathBuf {
        self.live.paths().backups_dir()
    }

    /// Snapshots the live credentials. Individual file failures are skipped;
    /// only failing to allocate the backup directory is an error. Returns the
    /// backup name, or `None` when there was nothing to back up.
    pub fn create_backup(&self) -> AppResult<Option<String>> {
        let backups_dir = self.backups_dir();
        fsutil::create_private_dir_all(&backups_dir)
            .map_err(|e| AppError::io(&backups_dir, e))?;

        let (timestamp, backup_dir) = allocate_backup_dir(&backups_dir)?;
        let copied = self.live.snapshot_into(&backup_dir, CopyMode::BestEffort)?;

        let result = if copied.is_empty() {
            debug!("Nothing to back up, removing {:?}", backup_dir);
            if let Err(e) = fs::remove_dir_all(&backup_dir) {
                warn!("Cannot remove empty backup {:?}: {}", backup_dir, e);
            }
            None
        } else {
            info!("Backed up {} file(s) to {:?}", copied.len(), backup_dir);
            Some(timestamp)
        };

        self.prune();
        Ok(result)
    }

    /// Deletes the oldest backups beyond the retention bound. Returns how many
    /// were removed; deletion failures are logged and skipped.
    pub fn prune(&self) -> usize {
        self.prune_with(|dir| fs::remove_dir_all(dir))
    }

    fn prune_with<F>(&self, remove: F) -> usize
    where
        F: Fn(&Path) -> io::Result<()>,
    {
        let backups_dir = self.backups_dir();
        let mut names = match backup_names(&backups_dir) {
            Ok(names) => names,
            Err(e) => {
                warn!("Cannot read backups in {:?}: {}", backups_dir, e);
                return 0;
            }
        };
        if names.len() <= self.max_backups {
            return 0;
        }

        names.sort();
        let excess = names.len() - self.max_backups;
        let mut removed = 0;
        for name in names.iter().take(excess) {
            let dir = backups_dir.join(name);
            match remove(&dir) {
                Ok(()) => {
                    debug!("Pruned backup {:?}", dir);
                    removed += 1;
                }
                Err(e) => warn!("Cannot prune backup {:?}: {}", dir, e),
            }
        }
        removed
    }

    /// Backups newest first, with the files each one holds.
    pub fn list(&self) -> AppResult<Vec<BackupInfo>> {
        let backups_dir = self.backups_dir();
        let mut names = match backup_names(&backups_dir) {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::io(&backups_dir, e)),
        };
        names.sort_by(|a, b| b.cmp(a));

        names
            .into_iter()
            .map(|timestamp| {
                let dir = backups_dir.join(&timestamp);
                let mut files: Vec<String> = fs::read_dir(&dir)
                    .map_err(|e| AppError::io(&dir, e))?
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                files.sort();
                Ok(BackupInfo { timestamp, files })
            })
            .collect()
    }

    /// Copies the files of one backup back to the live locations. A backup
    /// with no credential files restores nothing and is only a warning.
    pub fn restore(&self, timestamp: &str) -> AppResult<usize> {
        let valid = !timestamp.is_empty()
            && timestamp
                .chars()
                .all(|c| c.is_ascii_digit() || c == '-');
        let backup_dir = self.backups_dir().join(timestamp);
        if !valid || !fsutil::dir_exists(&backup_dir) {
            return Err(AppError::NotFound(format!(
                "backup {:?} not found (use 'cs backup list' to see available backups)",
                timestamp
            )));
        }

        let restored = self.live.restore_from(&backup_dir)?;
        if restored == 0 {
            warn!("Backup {:?} contained no credential files", timestamp);
        } else {
            info!("Restored {} file(s) from backup {:?}", restored, timestamp);
        }
        Ok(restored)
    }
}

fn backup_names(backups_dir: &Path) -> io::Result<Vec<String>> {
    Ok(fs::read_dir(backups_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect())
}

fn allocate_backup_dir(backups_dir: &Path) -> AppResult<(String, PathBuf)> {
    let base = Utc::now().format(TIMESTAMP_FORMAT).to_string();
    let candidates =
        std::iter::once(base.clone()).chain((1..=MAX_SAME_SECOND).map(|n| format!("{}-{:02}", base, n)));

    for name in candidates {
        let dir = backups_dir.join(&name);
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(0o700);
        match builder.create(&dir) {
            Ok(()) => return Ok((name, dir)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(AppError::io(dir, e)),
        }
    }

    Err(AppError::io(
        backups_dir.join(&base),
        io::Error::new(io::ErrorKind::AlreadyExists, "too many backups this second"),
    ))
}

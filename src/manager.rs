// src/manager.rs
use crate::backup::BackupRetention;
use crate::config::{Config, Paths, ProfileEntry};
use crate::credentials::{
    stored_file_names, CopyMode, CredentialStore, LiveCredentials, CREDENTIALS_FILE, CREDENTIAL_FILES,
    HOME_CREDENTIAL_FILES, HOME_PREFIX,
};
use crate::error::{AppError, AppResult};
use crate::fsutil;
use crate::token;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Profile names: ASCII letters, digits, `-` and `_`.
pub fn validate_name(name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::Validation(
            "profile name cannot be empty".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::Validation(format!(
            "invalid profile name {:?}: use only letters, numbers, hyphens, underscores",
            name
        )));
    }
    Ok(())
}

/// A re-import replaces the whole identity, so stored files the new one
/// lacks are deleted.
pub(crate) fn remove_stale_files(profile_dir: &Path, keep: &[String]) {
    for stale in stored_file_names().iter().filter(|f| !keep.contains(f)) {
        let path = profile_dir.join(stale);
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot remove stale {:?}: {}", path, e),
        }
    }
}

/// One stored file slot of a profile; `size` is `None` when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileInfo {
    pub entry: ProfileEntry,
    pub files: Vec<StoredFile>,
    pub account_details: Vec<(String, String)>,
}

/// Owns the loaded config and the live credential set, and keeps the two
/// consistent across import, switch and removal.
pub struct ProfileManager {
    config: Config,
    live: LiveCredentials,
}

impl ProfileManager {
    pub fn new(config: Config, live: LiveCredentials) -> Self {
        ProfileManager { config, live }
    }

    pub fn load(paths: Paths, store: Box<dyn CredentialStore>) -> AppResult<Self> {
        let config = Config::load(&paths)?;
        Ok(Self::new(config, LiveCredentials::new(paths, store)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn paths(&self) -> &Paths {
        self.live.paths()
    }

    pub fn live(&self) -> &LiveCredentials {
        &self.live
    }

    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.paths().profile_dir(name)
    }

    pub fn save(&self) -> AppResult<()> {
        self.config.save(self.paths())?;
        Ok(())
    }

    pub fn backups(&self) -> BackupRetention<'_> {
        BackupRetention::new(&self.live, &self.config.settings)
    }

    /// Saves the live credentials as profile `name`, overwriting any profile
    /// of the same name.
    pub fn import(&mut self, name: &str, description: Option<&str>) -> AppResult<ProfileEntry> {
        validate_name(name)?;
        let profile_dir = self.profile_dir(name);
        let created = self.prepare_profile_dir(&profile_dir)?;

        let copied = match self.live.snapshot_into(&profile_dir, CopyMode::Strict) {
            Ok(copied) => copied,
            Err(e) => {
                self.discard_new_dir(&profile_dir, created);
                return Err(e);
            }
        };
        if copied.is_empty() {
            self.discard_new_dir(&profile_dir, created);
            return Err(AppError::NotFound(format!(
                "no credential files found in {:?} (is Claude Code installed and logged in?)",
                self.paths().claude_dir()
            )));
        }

        self.finish_import(name, description, &profile_dir, &copied)
    }

    /// Like [`import`](Self::import), but takes the credential files from a
    /// companion config directory instead of the live locations. Used after a
    /// fresh login into a temporary directory.
    pub fn import_from_dir(
        &mut self,
        name: &str,
        description: Option<&str>,
        source_dir: &Path,
    ) -> AppResult<ProfileEntry> {
        validate_name(name)?;
        if !fsutil::dir_exists(source_dir) {
            return Err(AppError::NotFound(format!(
                "source directory {:?} does not exist",
                source_dir
            )));
        }

        let profile_dir = self.profile_dir(name);
        let created = self.prepare_profile_dir(&profile_dir)?;

        // With a redirected config directory the home-scoped files live inside it.
        let pairs = CREDENTIAL_FILES
            .iter()
            .map(|f| (f.to_string(), f.to_string()))
            .chain(
                HOME_CREDENTIAL_FILES
                    .iter()
                    .map(|f| (f.to_string(), format!("{}{}", HOME_PREFIX, f))),
            );

        let mut copied = Vec::new();
        for (source_name, stored) in pairs {
            let src = source_dir.join(&source_name);
            if !fsutil::file_exists(&src) {
                continue;
            }
            if let Err(e) = fsutil::copy_private(&src, &profile_dir.join(&stored)) {
                self.discard_new_dir(&profile_dir, created);
                return Err(AppError::io(src, e));
            }
            copied.push(stored);
        }

        if copied.is_empty() {
            self.discard_new_dir(&profile_dir, created);
            return Err(AppError::NotFound(format!(
                "no credential files found in {:?}",
                source_dir
            )));
        }

        self.finish_import(name, description, &profile_dir, &copied)
    }

    /// Creates the profile directory; returns whether it was newly created.
    fn prepare_profile_dir(&self, profile_dir: &Path) -> AppResult<bool> {
        let existed = fsutil::dir_exists(profile_dir);
        fsutil::create_private_dir_all(profile_dir)
            .map_err(|e| AppError::io(profile_dir, e))?;
        Ok(!existed)
    }

    fn discard_new_dir(&self, profile_dir: &Path, created: bool) {
        if !created {
            return;
        }
        if let Err(e) = fs::remove_dir_all(profile_dir) {
            warn!("Cannot remove partial profile {:?}: {}", profile_dir, e);
        }
    }

    fn finish_import(
        &mut self,
        name: &str,
        description: Option<&str>,
        profile_dir: &Path,
        copied: &[String],
    ) -> AppResult<ProfileEntry> {
        remove_stale_files(profile_dir, copied);

        let email = token::email_from_profile_dir(profile_dir);
        let entry = ProfileEntry::new(name, email, description.map(str::to_string));
        let entry = self.register(entry)?;
        info!("Imported profile {:?} ({} file(s))", name, copied.len());
        Ok(entry)
    }

    /// Adds or replaces a registry entry and persists. The entry is active if
    /// the registry was empty, or if it replaces the currently active profile.
    pub(crate) fn register(&mut self, mut entry: ProfileEntry) -> AppResult<ProfileEntry> {
        let is_first = self.config.profiles.is_empty();
        entry.is_active = is_first || self.config.active_profile == entry.name;
        if is_first {
            self.config.active_profile = entry.name.clone();
        }
        self.config.profiles.insert(entry.name.clone(), entry.clone());
        self.save()?;
        Ok(entry)
    }

    /// Makes `name` the active profile: backs up the live credentials (when
    /// enabled), restores the profile's files over them, then persists the
    /// new pointer. Returns the name of the backup taken, if any.
    pub fn use_profile(&mut self, name: &str) -> AppResult<Option<String>> {
        if !self.config.profiles.contains_key(name) {
            return Err(AppError::NotFound(format!(
                "profile {:?} not found (use 'cs list' to see available profiles)",
                name
            )));
        }
        let profile_dir = self.profile_dir(name);
        if !fsutil::dir_exists(&profile_dir) {
            return Err(AppError::NotFound(format!(
                "profile directory for {:?} is missing, try re-importing",
                name
            )));
        }

        let backup = if self.config.settings.auto_backup {
            self.backups().create_backup().map_err(|e| {
                error!("Backup failed, not switching to {:?}: {}", name, e);
                e
            })?
        } else {
            None
        };

        let restored = self.live.restore_from(&profile_dir)?;
        if restored == 0 {
            warn!("Profile {:?} has no credential files to restore", name);
        }

        for (key, entry) in self.config.profiles.iter_mut() {
            entry.is_active = key == name;
        }
        self.config.active_profile = name.to_string();
        self.save()?;

        info!("Switched to profile {:?} ({} file(s) restored)", name, restored);
        Ok(backup)
    }

    /// Deletes a non-active profile. If its directory cannot be removed the
    /// config is left untouched.
    pub fn remove(&mut self, name: &str) -> AppResult<()> {
        if !self.config.profiles.contains_key(name) {
            return Err(AppError::NotFound(format!("profile {:?} not found", name)));
        }
        if self.config.active_profile == name {
            return Err(AppError::Validation(format!(
                "cannot remove active profile {:?}, switch to another profile first",
                name
            )));
        }

        let profile_dir = self.profile_dir(name);
        match fs::remove_dir_all(&profile_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Profile directory {:?} was already missing", profile_dir)
            }
            Err(e) => return Err(AppError::io(profile_dir, e)),
        }

        self.config.profiles.remove(name);
        self.save()?;
        info!("Removed profile {:?}", name);
        Ok(())
    }

    /// All profiles, sorted by name.
    pub fn list(&self) -> Vec<ProfileEntry> {
        let mut entries: Vec<ProfileEntry> = self.config.profiles.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Registry entry, stored file inventory and account fields of one profile.
    pub fn info(&self, name: &str) -> AppResult<ProfileInfo> {
        let entry = self
            .config
            .profiles
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("profile {:?} not found", name)))?;
        let profile_dir = self.profile_dir(name);

        let files = stored_file_names()
            .into_iter()
            .map(|file_name| {
                let size = fs::metadata(profile_dir.join(&file_name))
                    .ok()
                    .filter(|m| m.is_file())
                    .map(|m| m.len());
                StoredFile {
                    name: file_name,
                    size,
                }
            })
            .collect();

        let account_details = fs::read(profile_dir.join(CREDENTIALS_FILE))
            .ok()
            .and_then(|data| serde_json::from_slice::<Value>(&data).ok())
            .map(|root| token::account_details(&root))
            .unwrap_or_default();

        Ok(ProfileInfo {
            entry: entry.clone(),
            files,
            account_details,
        })
    }

    pub fn current(&self) -> AppResult<&ProfileEntry> {
        let active = &self.config.active_profile;
        if active.is_empty() {
            return Err(AppError::NotFound(
                "no active profile (import a profile first with 'cs import <name>')".to_string(),
            ));
        }
        self.config.profiles.get(active).ok_or_else(|| {
            AppError::NotFound(format!("active profile {:?} not found in config", active))
        })
    }
}

// src/config.rs
use crate::error::{ConfigError, ConfigResult};
use crate::fsutil;
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = ".claude-switch";
pub const CONFIG_FILE: &str = "config.json";
pub const CLAUDE_DIR: &str = ".claude";

const DEFAULT_MAX_BACKUPS: i64 = 10;

/// Filesystem layout rooted at one home directory.
///
/// Every component takes a `Paths` instead of looking up the home directory
/// on its own, so a whole store can live inside a temporary directory.
#[derive(Debug, Clone)]
pub struct Paths {
    home_dir: PathBuf,
    app_dir: PathBuf,
    claude_dir: PathBuf,
}

impl Paths {
    pub fn discover() -> ConfigResult<Self> {
        let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self::from_home(base_dirs.home_dir()))
    }

    pub fn from_home(home: impl AsRef<Path>) -> Self {
        let home_dir = home.as_ref().to_path_buf();
        Paths {
            app_dir: home_dir.join(APP_DIR),
            claude_dir: home_dir.join(CLAUDE_DIR),
            home_dir,
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// `~/.claude`, the companion tool's live configuration directory.
    pub fn claude_dir(&self) -> &Path {
        &self.claude_dir
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.app_dir.join("profiles")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.app_dir.join("backups")
    }

    pub fn config_file(&self) -> PathBuf {
        self.app_dir.join(CONFIG_FILE)
    }

    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.profiles_dir().join(name)
    }

    /// Creates the app, profiles and backups directories with mode 0700.
    pub fn ensure_dirs(&self) -> ConfigResult<()> {
        for dir in [self.app_dir.clone(), self.profiles_dir(), self.backups_dir()] {
            fsutil::create_private_dir_all(&dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub auto_backup: bool,
    pub max_backups: i64,
    pub color_output: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            auto_backup: true,
            max_backups: DEFAULT_MAX_BACKUPS,
            color_output: true,
        }
    }
}

impl Settings {
    /// Retention bound with non-positive values mapped to the default.
    pub fn effective_max_backups(&self) -> usize {
        if self.max_backups <= 0 {
            DEFAULT_MAX_BACKUPS as usize
        } else {
            self.max_backups as usize
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProfileEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_active: bool,
}

impl ProfileEntry {
    pub fn new(name: &str, email: Option<String>, description: Option<String>) -> Self {
        ProfileEntry {
            name: name.to_string(),
            email: email.filter(|e| !e.is_empty()),
            description: description.filter(|d| !d.is_empty()),
            created_at: Utc::now(),
            is_active: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub active_profile: String,
    pub profiles: BTreeMap<String, ProfileEntry>,
    pub settings: Settings,
}

impl Config {
    /// Reads the config at the standard location. A missing file is a fresh
    /// default config; malformed JSON is an error and is never auto-repaired.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        Self::load_from(&paths.config_file())
    }

    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Config file {:?} not found, using defaults", path);
                return Ok(Config::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            "Loaded config from {:?} ({} profiles)",
            path,
            config.profiles.len()
        );
        Ok(config)
    }

    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        self.save_to(&paths.config_file())
    }

    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fsutil::write_private_atomic(path, &json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.active_profile.is_empty());
        assert!(config.profiles.is_empty());
        assert!(config.settings.auto_backup);
        assert_eq!(config.settings.max_backups, 10);
        assert!(config.settings.color_output);
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempdir().unwrap();
        let paths = Paths::from_home(dir.path());
        let config = Config::load(&paths).unwrap();
        assert_eq!(config, Config::default());
        assert!(!paths.config_file().exists(), "load must not create the file");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let paths = Paths::from_home(dir.path());

        let mut config = Config::default();
        let mut entry = ProfileEntry::new(
            "work",
            Some("me@work.example".to_string()),
            Some("Work account".to_string()),
        );
        entry.is_active = true;
        config.profiles.insert("work".to_string(), entry);
        config
            .profiles
            .insert("home".to_string(), ProfileEntry::new("home", None, None));
        config.active_profile = "work".to_string();
        config.settings.max_backups = 3;
        config.settings.color_output = false;

        config.save(&paths).unwrap();
        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_malformed_json_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ this is not json").unwrap();

        match Config::load_from(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_partial_settings_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"active_profile": "", "profiles": {}, "settings": {"max_backups": 4}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.settings.max_backups, 4);
        assert!(config.settings.auto_backup);
        assert!(config.settings.color_output);
    }

    #[test]
    fn test_effective_max_backups() {
        let mut settings = Settings::default();
        settings.max_backups = 0;
        assert_eq!(settings.effective_max_backups(), 10);
        settings.max_backups = -5;
        assert_eq!(settings.effective_max_backups(), 10);
        settings.max_backups = 2;
        assert_eq!(settings.effective_max_backups(), 2);
    }

    #[test]
    fn test_empty_email_is_dropped() {
        let entry = ProfileEntry::new("x", Some(String::new()), Some(String::new()));
        assert!(entry.email.is_none());
        assert!(entry.description.is_none());
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("email"));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_config_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let paths = Paths::from_home(dir.path());
        Config::default().save(&paths).unwrap();

        let mode = fs::metadata(paths.config_file()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let dir_mode = fs::metadata(paths.app_dir()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }
}

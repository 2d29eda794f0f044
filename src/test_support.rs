// src/test_support.rs

use crate::config::{Config, Paths};
use crate::credentials::{FileCredentialStore, LiveCredentials};
use crate::manager::ProfileManager;
use std::fs;
use tempfile::TempDir;

/// A throwaway home directory with an optional logged-in companion setup.
pub(crate) struct TestHome {
    // Keep the tempdir alive for the duration of the test.
    _dir: TempDir,
    pub paths: Paths,
}

impl TestHome {
    /// A home with an empty `~/.claude` and nothing logged in.
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = Paths::from_home(dir.path());
        fs::create_dir_all(paths.claude_dir()).expect("create claude dir");
        paths.ensure_dirs().expect("ensure dirs");
        TestHome { _dir: dir, paths }
    }

    /// A home whose live `.credentials.json` holds `credentials`.
    pub fn logged_in(credentials: &str) -> Self {
        let home = Self::empty();
        home.write_live(".credentials.json", credentials);
        home
    }

    pub fn write_live(&self, name: &str, content: &str) {
        fs::write(self.paths.claude_dir().join(name), content).expect("write live file");
    }

    pub fn read_live(&self, name: &str) -> String {
        fs::read_to_string(self.paths.claude_dir().join(name)).expect("read live file")
    }

    pub fn write_home(&self, name: &str, content: &str) {
        fs::write(self.paths.home_dir().join(name), content).expect("write home file");
    }

    pub fn live(&self) -> LiveCredentials {
        LiveCredentials::new(
            self.paths.clone(),
            Box::new(FileCredentialStore::new(&self.paths)),
        )
    }

    /// A manager over a fresh default config.
    pub fn manager(&self) -> ProfileManager {
        ProfileManager::new(Config::default(), self.live())
    }

    /// A manager over whatever config is currently persisted.
    pub fn reload_manager(&self) -> ProfileManager {
        let config = Config::load(&self.paths).expect("load config");
        ProfileManager::new(config, self.live())
    }
}

// src/credentials.rs
use crate::config::Paths;
use crate::error::{AppError, AppResult, CredentialError, CredentialResult};
use crate::fsutil;
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The file the companion tool keeps its OAuth credentials in.
pub const CREDENTIALS_FILE: &str = ".credentials.json";

/// Files tracked from the companion's config directory.
pub const CREDENTIAL_FILES: &[&str] = &[CREDENTIALS_FILE, "statsig", "statsig_metadata"];

/// Files tracked from the home directory, stored under [`HOME_PREFIX`].
pub const HOME_CREDENTIAL_FILES: &[&str] = &[".claude.json"];

pub const HOME_PREFIX: &str = "home_";

/// Every file name a profile, backup or export bundle may contain.
pub fn stored_file_names() -> Vec<String> {
    CREDENTIAL_FILES
        .iter()
        .map(|f| f.to_string())
        .chain(
            HOME_CREDENTIAL_FILES
                .iter()
                .map(|f| format!("{}{}", HOME_PREFIX, f)),
        )
        .collect()
}

pub fn is_stored_file_name(name: &str) -> bool {
    stored_file_names().iter().any(|f| f == name)
}

/// Access to wherever the companion tool reads its live credentials from.
///
/// Writes fail closed: on error the previous credentials are still in place.
pub trait CredentialStore {
    fn read_current(&self) -> CredentialResult<Vec<u8>>;
    fn write_current(&self, data: &[u8]) -> CredentialResult<()>;

    /// The stored file name this store stands in for.
    fn covered_file(&self) -> &'static str {
        CREDENTIALS_FILE
    }

    fn describe(&self) -> String;
}

/// `~/.claude/.credentials.json`
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(paths: &Paths) -> Self {
        FileCredentialStore {
            path: paths.claude_dir().join(CREDENTIALS_FILE),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn read_current(&self) -> CredentialResult<Vec<u8>> {
        fs::read(&self.path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CredentialError::NotFound(self.describe())
            } else {
                CredentialError::Io {
                    path: self.path.clone(),
                    source: e,
                }
            }
        })
    }

    fn write_current(&self, data: &[u8]) -> CredentialResult<()> {
        fsutil::write_private_atomic(&self.path, data).map_err(|source| CredentialError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn describe(&self) -> String {
        format!("{}", self.path.display())
    }
}

#[cfg(target_os = "macos")]
pub use keychain::KeychainCredentialStore;

#[cfg(target_os = "macos")]
mod keychain {
    use super::CredentialStore;
    use crate::error::{CredentialError, CredentialResult};
    use log::debug;

    /// Service name the companion tool registers its keychain item under.
    pub const KEYCHAIN_SERVICE: &str = "Claude Code-credentials";

    #[derive(Debug, Clone)]
    pub struct KeychainCredentialStore {
        service: String,
        account: String,
    }

    impl KeychainCredentialStore {
        /// Returns a store if the platform keychain answers a lookup.
        pub fn probe() -> Option<Self> {
            let account = std::env::var("USER")
                .ok()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "claude-switch".to_string());
            let store = KeychainCredentialStore {
                service: KEYCHAIN_SERVICE.to_string(),
                account,
            };
            let lookup = match keyring::Entry::new(&store.service, &store.account) {
                Ok(entry) => entry.get_password().map(|_| ()),
                Err(e) => Err(e),
            };
            is_reachable(&lookup).then_some(store)
        }

        fn entry(&self) -> CredentialResult<keyring::Entry> {
            keyring::Entry::new(&self.service, &self.account)
                .map_err(|e| CredentialError::Store(e.to_string()))
        }
    }

    /// A found item and a missing item both mean the keychain is usable.
    pub(super) fn is_reachable(lookup: &Result<(), keyring::Error>) -> bool {
        match lookup {
            Ok(()) | Err(keyring::Error::NoEntry) => true,
            Err(e) => {
                debug!("Keychain lookup failed: {}", e);
                false
            }
        }
    }

    impl CredentialStore for KeychainCredentialStore {
        fn read_current(&self) -> CredentialResult<Vec<u8>> {
            match self.entry()?.get_password() {
                Ok(secret) => Ok(secret.trim().as_bytes().to_vec()),
                Err(keyring::Error::NoEntry) => Err(CredentialError::NotFound(self.describe())),
                Err(e) => Err(CredentialError::Store(e.to_string())),
            }
        }

        fn write_current(&self, data: &[u8]) -> CredentialResult<()> {
            let secret = std::str::from_utf8(data).map_err(|_| {
                CredentialError::Store("credentials are not valid UTF-8".to_string())
            })?;
            self.entry()?
                .set_password(secret)
                .map_err(|e| CredentialError::Store(e.to_string()))
        }

        fn describe(&self) -> String {
            format!("macOS keychain (service: {})", self.service)
        }
    }
}

/// Picks the credential store for this machine: the platform keychain when it
/// is reachable, otherwise the flat credentials file.
pub fn detect_credential_store(paths: &Paths) -> Box<dyn CredentialStore> {
    #[cfg(target_os = "macos")]
    {
        if let Some(store) = KeychainCredentialStore::probe() {
            debug!("Using credential store: {}", store.describe());
            return Box::new(store);
        }
        warn!("macOS keychain unavailable, falling back to credentials file");
    }
    let store = FileCredentialStore::new(paths);
    debug!("Using credential store: {}", store.describe());
    Box::new(store)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// First failure on an existing file aborts.
    Strict,
    /// Failures are logged and the file is skipped.
    BestEffort,
}

/// The live tracked-file set: the store-covered credential plus plain copies
/// of every other tracked and home-scoped file.
pub struct LiveCredentials {
    paths: Paths,
    store: Box<dyn CredentialStore>,
}

impl LiveCredentials {
    pub fn new(paths: Paths, store: Box<dyn CredentialStore>) -> Self {
        LiveCredentials { paths, store }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    /// (live location, stored name) for every tracked file the store does not cover.
    fn file_pairs(&self) -> Vec<(PathBuf, String)> {
        let covered = self.store.covered_file();
        let tracked = CREDENTIAL_FILES
            .iter()
            .filter(|f| **f != covered)
            .map(|f| (self.paths.claude_dir().join(f), f.to_string()));
        let home = HOME_CREDENTIAL_FILES.iter().map(|f| {
            (
                self.paths.home_dir().join(f),
                format!("{}{}", HOME_PREFIX, f),
            )
        });
        tracked.chain(home).collect()
    }

    /// Copies the live credentials into `dest`. Missing files are skipped.
    /// Returns the stored names that were written.
    pub fn snapshot_into(&self, dest: &Path, mode: CopyMode) -> AppResult<Vec<String>> {
        let mut copied = Vec::new();

        let covered = self.store.covered_file();
        match self.store.read_current() {
            Ok(data) if !data.is_empty() => {
                let dst = dest.join(covered);
                match fsutil::write_private_atomic(&dst, &data) {
                    Ok(()) => copied.push(covered.to_string()),
                    Err(e) if mode == CopyMode::BestEffort => {
                        warn!("Skipping {}: cannot write {:?}: {}", covered, dst, e)
                    }
                    Err(e) => return Err(AppError::io(dst, e)),
                }
            }
            Ok(_) => debug!("Live {} is empty, skipping", covered),
            Err(CredentialError::NotFound(location)) => {
                debug!("No live credentials in {}", location)
            }
            Err(e) if mode == CopyMode::BestEffort => {
                warn!("Skipping {}: {}", covered, e)
            }
            Err(e) => return Err(e.into()),
        }

        for (src, stored) in self.file_pairs() {
            if !fsutil::file_exists(&src) {
                continue;
            }
            let dst = dest.join(&stored);
            match fsutil::copy_private(&src, &dst) {
                Ok(()) => {
                    debug!("Copied {:?} -> {:?}", src, dst);
                    copied.push(stored);
                }
                Err(e) if mode == CopyMode::BestEffort => {
                    warn!("Skipping {:?}: {}", src, e)
                }
                Err(e) => return Err(AppError::io(src, e)),
            }
        }

        Ok(copied)
    }

    /// Writes every stored file found in `src` back to its live location,
    /// overwriting. Files absent from `src` leave the live file untouched.
    pub fn restore_from(&self, src: &Path) -> AppResult<usize> {
        let mut restored = 0;

        let covered = src.join(self.store.covered_file());
        if fsutil::file_exists(&covered) {
            let data = fs::read(&covered).map_err(|e| AppError::io(&covered, e))?;
            self.store.write_current(&data)?;
            debug!("Restored {:?} into {}", covered, self.store.describe());
            restored += 1;
        }

        for (live, stored) in self.file_pairs() {
            let from = src.join(&stored);
            if !fsutil::file_exists(&from) {
                continue;
            }
            fsutil::copy_private(&from, &live).map_err(|e| AppError::io(&live, e))?;
            debug!("Restored {:?} -> {:?}", from, live);
            restored += 1;
        }

        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHome;

    #[test]
    fn test_stored_file_names() {
        let names = stored_file_names();
        assert!(names.contains(&".credentials.json".to_string()));
        assert!(names.contains(&"home_.claude.json".to_string()));
        assert!(is_stored_file_name("statsig"));
        assert!(!is_stored_file_name("../escape"));
        assert!(!is_stored_file_name(".claude.json"));
    }

    #[test]
    fn test_file_store_read_missing_is_not_found() {
        let home = TestHome::empty();
        let store = FileCredentialStore::new(&home.paths);
        match store.read_current() {
            Err(CredentialError::NotFound(_)) => {}
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_file_store_write_then_read() {
        let home = TestHome::empty();
        let store = FileCredentialStore::new(&home.paths);
        store.write_current(br#"{"token":"abc"}"#).unwrap();
        assert_eq!(store.read_current().unwrap(), br#"{"token":"abc"}"#);
    }

    #[test]
    fn test_snapshot_and_restore() {
        let home = TestHome::logged_in(r#"{"email":"a@example.com"}"#);
        home.write_live("statsig", "stats");
        home.write_home(".claude.json", r#"{"oauthAccount":{}}"#);
        let live = home.live();

        let snap = home.paths.home_dir().join("snap");
        let copied = live.snapshot_into(&snap, CopyMode::Strict).unwrap();
        assert_eq!(copied, [".credentials.json", "statsig", "home_.claude.json"]);
        assert!(snap.join(".credentials.json").exists());
        assert!(snap.join("statsig").exists());
        assert!(snap.join("home_.claude.json").exists());
        assert!(!snap.join("statsig_metadata").exists());

        home.write_live(".credentials.json", "changed");
        home.write_live("statsig_metadata", "left alone");
        let restored = live.restore_from(&snap).unwrap();
        assert_eq!(restored, 3);
        assert_eq!(home.read_live(".credentials.json"), r#"{"email":"a@example.com"}"#);
        // Not in the snapshot, so not touched.
        assert_eq!(home.read_live("statsig_metadata"), "left alone");
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_keychain_reachability() {
        use super::keychain::is_reachable;
        assert!(is_reachable(&Ok(())));
        assert!(is_reachable(&Err(keyring::Error::NoEntry)));
        assert!(!is_reachable(&Err(keyring::Error::NoStorageAccess(
            "locked".into()
        ))));
        assert!(!is_reachable(&Err(keyring::Error::PlatformFailure(
            "denied".into()
        ))));
    }

    #[test]
    fn test_snapshot_with_nothing_live() {
        let home = TestHome::empty();
        let snap = home.paths.home_dir().join("snap");
        let copied = home.live().snapshot_into(&snap, CopyMode::Strict).unwrap();
        assert!(copied.is_empty());
    }
}

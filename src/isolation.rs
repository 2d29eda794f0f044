// src/isolation.rs
use crate::credentials::{CREDENTIAL_FILES, HOME_CREDENTIAL_FILES, HOME_PREFIX};
use crate::error::{AppError, AppResult};
use crate::fsutil;
use crate::manager::ProfileManager;
use log::{debug, info, warn};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable the companion reads its config directory from.
pub const CONFIG_DIR_VAR: &str = "CLAUDE_CONFIG_DIR";

/// Shared between every profile: linked, never copied.
pub const SHARED_DIRS: &[&str] = &["commands", "todos", "agents", "skills"];
pub const SHARED_FILES: &[&str] = &["settings.json", "settings.local.json", "CLAUDE.md"];

/// A throwaway companion config directory holding one profile's credentials.
/// Removed on [`cleanup`](IsolatedEnv::cleanup) or drop.
#[derive(Debug)]
pub struct IsolatedEnv {
    profile_name: String,
    temp_dir: PathBuf,
    cleaned: bool,
}

impl IsolatedEnv {
    pub fn setup(manager: &ProfileManager, name: &str) -> AppResult<Self> {
        if !manager.config().profiles.contains_key(name) {
            return Err(AppError::NotFound(format!("profile {:?} not found", name)));
        }
        let profile_dir = manager.profile_dir(name);
        if !fsutil::dir_exists(&profile_dir) {
            return Err(AppError::NotFound(format!(
                "profile directory for {:?} is missing, try re-importing",
                name
            )));
        }

        let temp_dir = allocate_temp_dir(name)?;
        let mut env = IsolatedEnv {
            profile_name: name.to_string(),
            temp_dir,
            cleaned: false,
        };

        if let Err(e) = env.populate(&profile_dir, manager.paths().claude_dir()) {
            env.cleanup();
            return Err(e);
        }
        info!(
            "Prepared isolated environment for {:?} in {:?}",
            name, env.temp_dir
        );
        Ok(env)
    }

    /// An empty config directory for logging in a new account. Only the
    /// shared items are linked in.
    pub fn for_login(claude_dir: &Path, name: &str) -> AppResult<Self> {
        let temp_dir = allocate_temp_dir(name)?;
        let env = IsolatedEnv {
            profile_name: name.to_string(),
            temp_dir,
            cleaned: false,
        };
        env.link_shared_items(claude_dir);
        debug!("Prepared login environment in {:?}", env.temp_dir);
        Ok(env)
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn dir(&self) -> &Path {
        &self.temp_dir
    }

    fn populate(&self, profile_dir: &Path, claude_dir: &Path) -> AppResult<()> {
        // A redirected companion reads the home-scoped files from its config dir.
        let pairs = CREDENTIAL_FILES
            .iter()
            .map(|f| (f.to_string(), f.to_string()))
            .chain(
                HOME_CREDENTIAL_FILES
                    .iter()
                    .map(|f| (format!("{}{}", HOME_PREFIX, f), f.to_string())),
            );
        for (stored, target) in pairs {
            let src = profile_dir.join(&stored);
            if !fsutil::file_exists(&src) {
                continue;
            }
            let dst = self.temp_dir.join(&target);
            fsutil::copy_private(&src, &dst).map_err(|e| AppError::io(&src, e))?;
            debug!("Copied {:?} -> {:?}", src, dst);
        }

        self.link_shared_items(claude_dir);
        Ok(())
    }

    fn link_shared_items(&self, claude_dir: &Path) {
        for name in SHARED_DIRS {
            let src = claude_dir.join(name);
            if fsutil::dir_exists(&src) {
                link_shared(&src, &self.temp_dir.join(name), true);
            }
        }
        for name in SHARED_FILES {
            let src = claude_dir.join(name);
            if fsutil::file_exists(&src) {
                link_shared(&src, &self.temp_dir.join(name), false);
            }
        }
    }

    /// The current process environment with the config directory redirected.
    pub fn env(&self) -> Vec<(OsString, OsString)> {
        self.env_from(std::env::vars_os())
    }

    /// `ambient` minus any existing [`CONFIG_DIR_VAR`], plus exactly one
    /// pointing at the temp directory.
    pub fn env_from<I>(&self, ambient: I) -> Vec<(OsString, OsString)>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut env: Vec<(OsString, OsString)> = ambient
            .into_iter()
            .filter(|(key, _)| key != CONFIG_DIR_VAR)
            .collect();
        env.push((
            OsString::from(CONFIG_DIR_VAR),
            self.temp_dir.clone().into_os_string(),
        ));
        env
    }

    /// Removes the temp directory. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        match fs::remove_dir_all(&self.temp_dir) {
            Ok(()) => debug!("Removed {:?}", self.temp_dir),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot remove {:?}: {}", self.temp_dir, e),
        }
    }
}

impl Drop for IsolatedEnv {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// `cs-<name>-<random>` under the system temp dir, owner-only on unix.
/// Ownership passes to the caller, which removes it in `cleanup`.
fn allocate_temp_dir(name: &str) -> AppResult<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("cs-{}-", name))
        .tempdir()
        .map_err(|e| AppError::io(std::env::temp_dir(), e))?;
    Ok(dir.keep())
}

fn link_shared(src: &Path, dst: &Path, is_dir: bool) {
    match symlink(src, dst, is_dir) {
        Ok(()) => debug!("Linked {:?} -> {:?}", dst, src),
        Err(e) => warn!("Cannot link {:?}: {}", src, e),
    }
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path, _is_dir: bool) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHome;

    fn home_with_profile() -> (TestHome, ProfileManager) {
        let home = TestHome::logged_in(r#"{"token":"iso"}"#);
        home.write_live("statsig", "stats");
        home.write_home(".claude.json", r#"{"oauthAccount":{}}"#);
        home.write_live("settings.json", r#"{"theme":"dark"}"#);
        fs::create_dir_all(home.paths.claude_dir().join("commands")).unwrap();
        let mut mgr = home.manager();
        mgr.import("iso", None).unwrap();
        (home, mgr)
    }

    #[test]
    fn test_setup_copies_credentials() {
        let (_home, mgr) = home_with_profile();
        let env = IsolatedEnv::setup(&mgr, "iso").unwrap();
        let dir = env.dir();

        assert_eq!(env.profile_name(), "iso");
        for name in [".credentials.json", "statsig", ".claude.json"] {
            let meta = fs::symlink_metadata(dir.join(name)).unwrap();
            assert!(meta.file_type().is_file(), "{} should be a real copy", name);
        }
        assert_eq!(
            fs::read_to_string(dir.join(".credentials.json")).unwrap(),
            r#"{"token":"iso"}"#
        );
        assert!(!dir.join("statsig_metadata").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_setup_links_shared_items() {
        let (home, mgr) = home_with_profile();
        let env = IsolatedEnv::setup(&mgr, "iso").unwrap();

        let settings = env.dir().join("settings.json");
        assert!(fs::symlink_metadata(&settings).unwrap().file_type().is_symlink());
        assert_eq!(
            fs::read_link(&settings).unwrap(),
            home.paths.claude_dir().join("settings.json")
        );
        assert!(fs::symlink_metadata(env.dir().join("commands"))
            .unwrap()
            .file_type()
            .is_symlink());
        // Absent in the live dir, so not linked.
        assert!(fs::symlink_metadata(env.dir().join("todos")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_temp_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let (_home, mgr) = home_with_profile();
        let env = IsolatedEnv::setup(&mgr, "iso").unwrap();
        let mode = fs::metadata(env.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        let dir_name = env.dir().file_name().unwrap().to_string_lossy().into_owned();
        assert!(dir_name.starts_with("cs-iso-"), "{}", dir_name);
        assert!(env.dir().starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_env_has_exactly_one_config_dir() {
        let (_home, mgr) = home_with_profile();
        let env = IsolatedEnv::setup(&mgr, "iso").unwrap();

        let ambient = vec![
            (OsString::from("PATH"), OsString::from("/usr/bin")),
            (OsString::from(CONFIG_DIR_VAR), OsString::from("/elsewhere")),
            (OsString::from(CONFIG_DIR_VAR), OsString::from("/again")),
        ];
        let vars = env.env_from(ambient);

        let config_dirs: Vec<_> = vars.iter().filter(|(k, _)| k == CONFIG_DIR_VAR).collect();
        assert_eq!(config_dirs.len(), 1);
        assert_eq!(config_dirs[0].1, env.dir().as_os_str());
        assert!(vars.iter().any(|(k, v)| k == "PATH" && v == "/usr/bin"));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let (_home, mgr) = home_with_profile();
        let mut env = IsolatedEnv::setup(&mgr, "iso").unwrap();
        let dir = env.dir().to_path_buf();
        assert!(dir.exists());

        env.cleanup();
        assert!(!dir.exists());
        env.cleanup();
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_removes_temp_dir() {
        let (home, mgr) = home_with_profile();
        let dir = {
            let env = IsolatedEnv::setup(&mgr, "iso").unwrap();
            env.dir().to_path_buf()
        };
        assert!(!dir.exists());
        // Shared items were links, so the originals survive.
        assert!(home.paths.claude_dir().join("settings.json").exists());
        assert!(home.paths.claude_dir().join("commands").is_dir());
    }

    #[test]
    fn test_login_env_has_no_credentials() {
        let (home, _mgr) = home_with_profile();
        let env = IsolatedEnv::for_login(home.paths.claude_dir(), "fresh").unwrap();
        assert!(!env.dir().join(".credentials.json").exists());
        assert!(!env.dir().join(".claude.json").exists());
        assert!(env.dir().join("settings.json").exists());
    }

    #[test]
    fn test_setup_unknown_profile() {
        let (home, mgr) = home_with_profile();
        assert!(matches!(
            IsolatedEnv::setup(&mgr, "ghost"),
            Err(AppError::NotFound(_))
        ));

        fs::remove_dir_all(home.paths.profile_dir("iso")).unwrap();
        assert!(matches!(
            IsolatedEnv::setup(&mgr, "iso"),
            Err(AppError::NotFound(_))
        ));
    }
}

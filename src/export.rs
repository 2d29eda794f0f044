// src/export.rs
use crate::config::ProfileEntry;
use crate::credentials::{is_stored_file_name, stored_file_names};
use crate::crypto;
use crate::error::{AppError, AppResult};
use crate::fsutil;
use crate::manager::{remove_stale_files, validate_name, ProfileManager};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

pub const BUNDLE_VERSION: u32 = 1;

/// Default extension for exported profiles.
pub const EXPORT_EXTENSION: &str = "csprofile";

/// Plaintext content of an export artifact.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExportBundle {
    pub version: u32,
    pub profile_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "crypto::base64_map")]
    pub files: BTreeMap<String, Vec<u8>>,
}

/// Collects a stored profile into a bundle. Only files that exist are
/// included; a profile with none cannot be exported.
pub fn build_bundle(manager: &ProfileManager, name: &str) -> AppResult<ExportBundle> {
    let entry = manager
        .config()
        .profiles
        .get(name)
        .ok_or_else(|| AppError::NotFound(format!("profile {:?} not found", name)))?;

    let profile_dir = manager.profile_dir(name);
    if !fsutil::dir_exists(&profile_dir) {
        return Err(AppError::NotFound(format!(
            "profile directory for {:?} is missing",
            name
        )));
    }

    let mut files = BTreeMap::new();
    for file_name in stored_file_names() {
        let path = profile_dir.join(&file_name);
        if !fsutil::file_exists(&path) {
            continue;
        }
        let data = fs::read(&path).map_err(|e| AppError::io(&path, e))?;
        files.insert(file_name, data);
    }

    if files.is_empty() {
        return Err(AppError::NotFound(format!(
            "profile {:?} has no credential files to export",
            name
        )));
    }

    Ok(ExportBundle {
        version: BUNDLE_VERSION,
        profile_name: name.to_string(),
        email: entry.email.clone(),
        description: entry.description.clone(),
        files,
    })
}

/// Encrypts a stored profile under `passphrase`.
pub fn export_profile(manager: &ProfileManager, name: &str, passphrase: &str) -> AppResult<Vec<u8>> {
    let bundle = build_bundle(manager, name)?;
    let plaintext = serde_json::to_vec(&bundle)
        .map_err(|e| AppError::InvalidBundle(format!("cannot serialize bundle: {}", e)))?;
    let encrypted = crypto::encrypt(&plaintext, passphrase)?;
    info!(
        "Exported profile {:?} ({} file(s))",
        name,
        bundle.files.len()
    );
    Ok(encrypted)
}

/// Decrypts an export artifact and stores it as a profile, named
/// `override_name` when given, else the name embedded in the bundle.
pub fn import_profile_file(
    manager: &mut ProfileManager,
    data: &[u8],
    passphrase: &str,
    override_name: Option<&str>,
) -> AppResult<ProfileEntry> {
    let plaintext = crypto::decrypt(data, passphrase)?;
    let bundle: ExportBundle = serde_json::from_slice(&plaintext)
        .map_err(|e| AppError::InvalidBundle(e.to_string()))?;
    if bundle.version != BUNDLE_VERSION {
        return Err(AppError::InvalidBundle(format!(
            "unsupported bundle version {}",
            bundle.version
        )));
    }

    let name = override_name
        .filter(|n| !n.is_empty())
        .unwrap_or(&bundle.profile_name)
        .to_string();
    if name.is_empty() {
        return Err(AppError::Validation(
            "profile name is empty in bundle".to_string(),
        ));
    }
    validate_name(&name)?;

    if bundle.files.is_empty() {
        return Err(AppError::InvalidBundle(
            "bundle contains no credential files".to_string(),
        ));
    }
    if let Some(bad) = bundle.files.keys().find(|f| !is_stored_file_name(f)) {
        return Err(AppError::InvalidBundle(format!(
            "unexpected file {:?} in bundle",
            bad
        )));
    }

    let profile_dir = manager.profile_dir(&name);
    fsutil::create_private_dir_all(&profile_dir).map_err(|e| AppError::io(&profile_dir, e))?;
    for (file_name, content) in &bundle.files {
        let path = profile_dir.join(file_name);
        fsutil::write_private_atomic(&path, content).map_err(|e| AppError::io(&path, e))?;
        debug!("Wrote {:?}", path);
    }
    let written: Vec<String> = bundle.files.keys().cloned().collect();
    remove_stale_files(&profile_dir, &written);

    let entry = ProfileEntry::new(&name, bundle.email, bundle.description);
    let entry = manager.register(entry)?;
    info!("Imported profile {:?} from export", name);
    Ok(entry)
}

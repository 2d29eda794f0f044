// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Argon2 key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("ChaCha20Poly1305 encryption failed: {0}")]
    Encryption(String),
    // Deliberately carries no detail: a wrong passphrase and a corrupted
    // artifact must be indistinguishable to the caller.
    #[error("Decryption failed: wrong passphrase or corrupted file")]
    DecryptionFailed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot determine home directory")]
    NoHomeDir,
    #[error("Cannot access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config JSON in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No credentials found in {0}")]
    NotFound(String),
    // Only the macOS keychain store raises this outside tests.
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    #[error("Credential store error: {0}")]
    Store(String),
    #[error("Cannot access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cryptography error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
    #[error("Invalid profile bundle: {0}")]
    InvalidBundle(String),
    #[error("Companion tool error: {0}")]
    Companion(String),
    #[error("CLI error: {0}")]
    Cli(String),
}

impl AppError {
    /// Wraps an `io::Error` together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.into(),
            source,
        }
    }
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type CryptoResult<T> = Result<T, CryptoError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type CredentialResult<T> = Result<T, CredentialError>;

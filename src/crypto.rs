// src/crypto.rs
use crate::error::{CryptoError, CryptoResult};

use argon2::Argon2;
use chacha20poly1305::{
    aead::{Aead, NewAead, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Envelope format version. Anything else is rejected.
pub const PAYLOAD_VERSION: u32 = 1;
pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

/// Argon2id cost parameters.
///
/// Export artifacts carry no parameters, so these are fixed for the format:
/// changing them requires a new [`PAYLOAD_VERSION`].
#[derive(Debug, Clone)]
pub struct Argon2Params {
    pub m_cost: u32, // KiB
    pub t_cost: u32, // iterations
    pub p_cost: u32, // parallelism
}

impl Default for Argon2Params {
    fn default() -> Self {
        Argon2Params {
            m_cost: 19456, // 19 MiB
            t_cost: 2,
            p_cost: 1,
        }
    }
}

/// Wire format of an encrypted export: `{version, salt, nonce, data}` with
/// base64 byte fields.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EncryptedPayload {
    pub version: u32,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}

/// `name -> bytes` maps with base64 values.
pub(crate) mod base64_map {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::ser::SerializeMap;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        files: &BTreeMap<String, Vec<u8>>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(files.len()))?;
        for (name, bytes) in files {
            map.serialize_entry(name, &STANDARD.encode(bytes))?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(d)?;
        raw.into_iter()
            .map(|(name, encoded)| {
                STANDARD
                    .decode(encoded)
                    .map(|bytes| (name, bytes))
                    .map_err(de::Error::custom)
            })
            .collect()
    }
}

/// Generates a fresh random salt for key derivation.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generates a fresh random nonce for ChaCha20Poly1305.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derives a 32-byte key from a passphrase and salt using Argon2id.
pub fn derive_key(passphrase: &str, salt: &[u8], params: &Argon2Params) -> CryptoResult<[u8; KEY_LEN]> {
    let argon2_params = argon2::Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEY_LEN))
        .map_err(|e| {
            let msg = format!("Argon2 params error: {}", e);
            log::error!("derive_key: {}", msg);
            CryptoError::KeyDerivation(msg)
        })?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| {
            let msg = format!("Key derivation failed: {}", e);
            log::error!("derive_key: {}", msg);
            CryptoError::KeyDerivation(msg)
        })?;
    Ok(key)
}

fn encrypt_data(data: &[u8], key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN]) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: data, aad: &[] })
        .map_err(|e| {
            let msg = format!("Encryption failed: {}", e);
            log::error!("encrypt_data: {}", msg);
            CryptoError::Encryption(msg)
        })
}

fn decrypt_data(encrypted: &[u8], key: &[u8; KEY_LEN], nonce: &[u8]) -> Option<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: encrypted, aad: &[] })
        .ok()
}

/// Encrypts `plaintext` under a passphrase and returns the serialized
/// envelope. Every call uses a fresh salt and nonce.
pub fn encrypt(plaintext: &[u8], passphrase: &str) -> CryptoResult<Vec<u8>> {
    let salt = generate_salt();
    let key = derive_key(passphrase, &salt, &Argon2Params::default())?;
    let nonce = generate_nonce();
    let data = encrypt_data(plaintext, &key, &nonce)?;

    let payload = EncryptedPayload {
        version: PAYLOAD_VERSION,
        salt: salt.to_vec(),
        nonce: nonce.to_vec(),
        data,
    };
    serde_json::to_vec(&payload).map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Reverses [`encrypt`]. Any failure, from malformed input to a wrong
/// passphrase, is reported as the same [`CryptoError::DecryptionFailed`].
pub fn decrypt(encrypted: &[u8], passphrase: &str) -> CryptoResult<Vec<u8>> {
    let payload: EncryptedPayload = serde_json::from_slice(encrypted).map_err(|e| {
        log::debug!("decrypt: envelope does not parse: {}", e);
        CryptoError::DecryptionFailed
    })?;

    if payload.version != PAYLOAD_VERSION
        || payload.salt.len() != SALT_LEN
        || payload.nonce.len() != NONCE_LEN
    {
        log::debug!("decrypt: unsupported envelope (version {})", payload.version);
        return Err(CryptoError::DecryptionFailed);
    }

    let key = derive_key(passphrase, &payload.salt, &Argon2Params::default())
        .map_err(|_| CryptoError::DecryptionFailed)?;

    decrypt_data(&payload.data, &key, &payload.nonce).ok_or_else(|| {
        log::warn!("decrypt: authentication failed (wrong passphrase or corrupted data)");
        CryptoError::DecryptionFailed
    })
}

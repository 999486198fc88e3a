//! At-rest encryption for sensitive variable values.
//!
//! Values tagged with the inline vault marker stay encrypted through
//! inventory construction and layer merging; they are decrypted only at
//! resolution time, keyed by a caller-supplied passphrase or passphrase
//! file. Encryption is AES-256-GCM with an Argon2-derived key.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use base64::Engine;
use rand::rngs::OsRng;
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{Error, Result};

/// Header line identifying an encrypted payload.
const HEADER: &str = "$CONVERGE_VAULT;1.0;AES256-GCM";

/// Marker prefix for inline encrypted variable values.
const INLINE_PREFIX: &str = "!vault |";

/// Vault encryption and decryption utilities.
pub struct Vault;

impl Vault {
    /// Encrypt content with a passphrase.
    pub fn encrypt(content: &str, passphrase: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(passphrase.as_bytes(), &salt)
            .map_err(|e| Error::VaultEncryption(e.to_string()))?;

        let key_bytes = password_hash
            .hash
            .ok_or_else(|| Error::VaultEncryption("failed to derive key".to_string()))?;

        let key_slice = &key_bytes.as_bytes()[..32];
        let cipher = Aes256Gcm::new_from_slice(key_slice)
            .map_err(|e| Error::VaultEncryption(e.to_string()))?;

        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, content.as_bytes())
            .map_err(|e| Error::VaultEncryption(e.to_string()))?;

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(format!(
            "{}\n{}\n{}\n{}",
            HEADER,
            salt.as_str(),
            b64.encode(nonce_bytes),
            b64.encode(&ciphertext)
        ))
    }

    /// Decrypt vault content with a passphrase.
    pub fn decrypt(content: &str, passphrase: &str) -> Result<String> {
        let lines: Vec<&str> = content.lines().collect();

        if lines.len() < 4 || !lines[0].starts_with("$CONVERGE_VAULT;") {
            return Err(Error::InvalidVaultFormat);
        }

        let salt = SaltString::from_b64(lines[1]).map_err(|_| Error::InvalidVaultFormat)?;

        let b64 = base64::engine::general_purpose::STANDARD;
        let nonce_bytes = b64
            .decode(lines[2])
            .map_err(|_| Error::InvalidVaultFormat)?;
        let ciphertext = b64
            .decode(lines[3..].join(""))
            .map_err(|_| Error::InvalidVaultFormat)?;

        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(passphrase.as_bytes(), &salt)
            .map_err(|e| Error::VaultDecryption(e.to_string()))?;

        let key_bytes = password_hash
            .hash
            .ok_or_else(|| Error::VaultDecryption("failed to derive key".to_string()))?;

        let key_slice = &key_bytes.as_bytes()[..32];
        let cipher = Aes256Gcm::new_from_slice(key_slice)
            .map_err(|e| Error::VaultDecryption(e.to_string()))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| Error::VaultDecryption(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| Error::VaultDecryption(e.to_string()))
    }

    /// Check if content is vault encrypted.
    pub fn is_encrypted(content: &str) -> bool {
        content.trim_start().starts_with("$CONVERGE_VAULT;")
    }

    /// Wrap plaintext as an inline encrypted variable value.
    pub fn encrypt_inline(content: &str, passphrase: &str) -> Result<JsonValue> {
        let encrypted = Self::encrypt(content, passphrase)?;
        Ok(JsonValue::String(format!("{}{}", INLINE_PREFIX, encrypted)))
    }

    /// Whether a variable value carries the inline vault marker.
    pub fn is_tagged(value: &JsonValue) -> bool {
        matches!(value, JsonValue::String(s) if s.starts_with(INLINE_PREFIX))
    }

    /// Read a passphrase from a file, trimming trailing whitespace.
    pub fn read_passphrase_file<P: AsRef<Path>>(path: P) -> Result<String> {
        let content = std::fs::read_to_string(path)?;
        Ok(content.trim_end().to_string())
    }
}

/// Recursively decrypt inline-tagged values inside a variable value.
///
/// Untagged values pass through unchanged, so this is safe to apply to a
/// whole effective mapping at resolution time.
pub fn decrypt_tagged(value: &JsonValue, passphrase: &str) -> Result<JsonValue> {
    match value {
        JsonValue::String(s) if s.starts_with(INLINE_PREFIX) => {
            let encrypted = s.trim_start_matches(INLINE_PREFIX).trim_start();
            let decrypted = Vault::decrypt(encrypted, passphrase)?;
            Ok(JsonValue::String(decrypted))
        }
        JsonValue::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                result.insert(k.clone(), decrypt_tagged(v, passphrase)?);
            }
            Ok(JsonValue::Object(result))
        }
        JsonValue::Array(seq) => {
            let result: Result<Vec<_>> =
                seq.iter().map(|v| decrypt_tagged(v, passphrase)).collect();
            Ok(JsonValue::Array(result?))
        }
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let encrypted = Vault::encrypt("s3cret", "passphrase").unwrap();
        assert!(Vault::is_encrypted(&encrypted));
        assert_eq!(Vault::decrypt(&encrypted, "passphrase").unwrap(), "s3cret");
    }

    #[test]
    fn test_decrypt_with_wrong_passphrase_fails() {
        let encrypted = Vault::encrypt("s3cret", "passphrase").unwrap();
        let err = Vault::decrypt(&encrypted, "wrong").unwrap_err();
        assert!(matches!(err, Error::VaultDecryption(_)));
    }

    #[test]
    fn test_decrypt_garbage_fails() {
        let err = Vault::decrypt("not a vault payload", "pw").unwrap_err();
        assert!(matches!(err, Error::InvalidVaultFormat));
    }

    #[test]
    fn test_tagged_value_decryption() {
        let tagged = Vault::encrypt_inline("db-password", "pw").unwrap();
        assert!(Vault::is_tagged(&tagged));

        let value = json!({"plain": "visible", "secret": tagged});
        let decrypted = decrypt_tagged(&value, "pw").unwrap();

        assert_eq!(decrypted["plain"], json!("visible"));
        assert_eq!(decrypted["secret"], json!("db-password"));
    }

    #[test]
    fn test_untagged_values_pass_through() {
        let value = json!({"a": 1, "b": ["x", "y"]});
        assert_eq!(decrypt_tagged(&value, "pw").unwrap(), value);
    }
}

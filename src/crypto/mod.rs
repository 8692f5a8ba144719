//! Field-level encryption
//!
//! Sensitive values that must be kept (for example a tokenization map the
//! caller will reverse later) are sealed with AES-256-GCM. Ciphertext, IV and
//! authentication tag travel separately as base64 so they fit JSON columns.

mod keys;

pub use keys::{FieldKey, KEY_SIZE};

use crate::dlp::TokenMap;
use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroize;

/// Nonce size for AES-GCM
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for AES-GCM
pub const TAG_SIZE: usize = 16;

/// Encrypted value with its IV and tag, all base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedField {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

/// Encryption service for individual fields
pub trait FieldCipher: Send + Sync {
    /// Encrypt `plaintext`, binding it to `aad`
    fn encrypt(&self, plaintext: &str, aad: &str) -> Result<EncryptedField>;

    /// Decrypt a field; fails if the data or `aad` was altered
    fn decrypt(&self, field: &EncryptedField, aad: &str) -> Result<String>;
}

/// AES-256-GCM field cipher with a random 96-bit IV per call
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(key: &FieldKey) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| Error::Crypto(format!("Failed to create cipher: {}", e)))?;
        Ok(Self { cipher })
    }
}

impl FieldCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str, aad: &str) -> Result<EncryptedField> {
        let mut iv = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(EncryptedField {
            ciphertext: STANDARD.encode(&sealed),
            iv: STANDARD.encode(iv),
            auth_tag: STANDARD.encode(tag),
        })
    }

    fn decrypt(&self, field: &EncryptedField, aad: &str) -> Result<String> {
        let decode = |name: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| Error::Crypto(format!("Invalid {} encoding: {}", name, e)))
        };
        let iv = decode("iv", &field.iv)?;
        let tag = decode("auth tag", &field.auth_tag)?;
        let mut sealed = decode("ciphertext", &field.ciphertext)?;

        if iv.len() != NONCE_SIZE {
            return Err(Error::Crypto(format!("IV must be {} bytes", NONCE_SIZE)));
        }
        if tag.len() != TAG_SIZE {
            return Err(Error::Crypto(format!("Auth tag must be {} bytes", TAG_SIZE)));
        }
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| Error::Crypto("Decryption failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            Error::Crypto("Decrypted field is not UTF-8".to_string())
        })
    }
}

/// Encrypt a token map so the caller can hold it under its own access control
pub fn seal_tokens(cipher: &dyn FieldCipher, tokens: &TokenMap, aad: &str) -> Result<EncryptedField> {
    let entries: BTreeMap<&str, &str> = tokens.entries().collect();
    let mut json = serde_json::to_string(&entries)?;
    let sealed = cipher.encrypt(&json, aad);
    json.zeroize();
    sealed
}

/// Decrypt a token map produced by [`seal_tokens`]
pub fn open_tokens(cipher: &dyn FieldCipher, field: &EncryptedField, aad: &str) -> Result<TokenMap> {
    let mut json = cipher.decrypt(field, aad)?;
    let parsed: std::result::Result<BTreeMap<String, String>, _> = serde_json::from_str(&json);
    json.zeroize();

    let mut entries = parsed?;
    let mut tokens = TokenMap::default();
    for (token, original) in &entries {
        tokens.insert(token.clone(), original);
    }
    for value in entries.values_mut() {
        value.zeroize();
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlp::{DlpEngine, RedactOptions, RedactionStyle};

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::new(&FieldKey::generate()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = cipher();
        let field = cipher.encrypt("555-12-3456", "patient:42").unwrap();
        assert_ne!(field.ciphertext, "555-12-3456");
        assert_eq!(STANDARD.decode(&field.iv).unwrap().len(), NONCE_SIZE);
        assert_eq!(STANDARD.decode(&field.auth_tag).unwrap().len(), TAG_SIZE);
        assert_eq!(cipher.decrypt(&field, "patient:42").unwrap(), "555-12-3456");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let cipher = cipher();
        let a = cipher.encrypt("same", "").unwrap();
        let b = cipher.encrypt("same", "").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_aad_fails() {
        let cipher = cipher();
        let field = cipher.encrypt("secret", "tenant-a").unwrap();
        assert!(matches!(cipher.decrypt(&field, "tenant-b"), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let field = cipher().encrypt("secret", "").unwrap();
        assert!(cipher().decrypt(&field, "").is_err());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let cipher = cipher();
        let mut field = cipher.encrypt("secret", "").unwrap();
        field.auth_tag = STANDARD.encode([0u8; TAG_SIZE]);
        assert!(cipher.decrypt(&field, "").is_err());

        field.iv = STANDARD.encode([0u8; 4]);
        assert!(cipher.decrypt(&field, "").is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = cipher();
        let field = cipher.encrypt("", "").unwrap();
        assert_eq!(field.ciphertext, "");
        assert_eq!(cipher.decrypt(&field, "").unwrap(), "");
    }

    #[test]
    fn test_sealed_token_map_restores_text() {
        let engine = DlpEngine::new(false).unwrap();
        let options = RedactOptions::new("general", RedactionStyle::Tokenize);
        let text = "mail jo@example.com or kim@example.org";
        let result = engine.redact(text, &options);
        assert!(!result.tokens.is_empty());

        let cipher = cipher();
        let sealed = seal_tokens(&cipher, &result.tokens, "req-1").unwrap();
        assert!(!sealed.ciphertext.contains("jo@example.com"));

        let opened = open_tokens(&cipher, &sealed, "req-1").unwrap();
        assert_eq!(opened.len(), result.tokens.len());
        assert_eq!(opened.restore(&result.text), text);
        assert!(open_tokens(&cipher, &sealed, "req-2").is_err());
    }
}

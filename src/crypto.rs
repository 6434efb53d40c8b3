//! Credential encryption at rest
//!
//! Tokens are sealed with ChaCha20-Poly1305 under a key derived from a
//! configured secret. The stored envelope is `v1:<nonce>:<ciphertext>` with
//! both parts URL-safe base64 without padding.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, AeadCore, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use sha2::{Digest, Sha256};
use thiserror::Error;

const ENVELOPE_PREFIX: &str = "v1";
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Error)]
pub enum CipherError {
    #[error("encryption key is not configured: {0}")]
    MissingKey(String),

    #[error("failed to encrypt credential")]
    Encrypt,

    #[error("failed to decrypt credential: {0}")]
    Decrypt(String),
}

/// Opaque encrypt/decrypt capability for stored credentials
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError>;
}

/// ChaCha20-Poly1305 cipher keyed from a secret string
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl TokenCipher {
    /// Derive the key by hashing `secret` with SHA-256
    pub fn from_secret(secret: &str) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Err(CipherError::MissingKey("secret is empty".to_string()));
        }

        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(Self { key })
    }

    /// Read the secret from the named environment variable
    pub fn from_env(var: &str) -> Result<Self, CipherError> {
        let secret = std::env::var(var)
            .map_err(|_| CipherError::MissingKey(format!("{} is not set", var)))?;
        Self::from_secret(&secret)
    }

    fn aead(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenCipher(<redacted>)")
    }
}

impl Cipher for TokenCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .aead()
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        Ok(format!(
            "{}:{}:{}",
            ENVELOPE_PREFIX,
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let mut parts = ciphertext.splitn(3, ':');
        let (Some(ENVELOPE_PREFIX), Some(nonce_b64), Some(body_b64)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CipherError::Decrypt("unrecognised envelope".to_string()));
        };

        let nonce_raw = URL_SAFE_NO_PAD
            .decode(nonce_b64)
            .map_err(|e| CipherError::Decrypt(format!("invalid nonce: {}", e)))?;
        if nonce_raw.len() != NONCE_LEN {
            return Err(CipherError::Decrypt("invalid nonce length".to_string()));
        }
        let body = URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|e| CipherError::Decrypt(format!("invalid ciphertext: {}", e)))?;

        let plaintext = self
            .aead()
            .decrypt(Nonce::from_slice(&nonce_raw), body.as_ref())
            .map_err(|_| CipherError::Decrypt("authentication failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CipherError::Decrypt(format!("plaintext is not utf-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serial_test::serial;

    #[test]
    fn test_round_trip() {
        let cipher = TokenCipher::from_secret("correct horse battery staple").unwrap();
        let sealed = cipher.encrypt("ghp_exampletoken").unwrap();

        assert!(sealed.starts_with("v1:"));
        assert!(!sealed.contains("ghp_exampletoken"));
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "ghp_exampletoken");
    }

    #[test]
    fn test_nonce_differs_per_encryption() {
        let cipher = TokenCipher::from_secret("secret").unwrap();
        let a = cipher.encrypt("token").unwrap();
        let b = cipher.encrypt("token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = TokenCipher::from_secret("one").unwrap().encrypt("token").unwrap();
        let other = TokenCipher::from_secret("two").unwrap();
        assert_matches!(other.decrypt(&sealed), Err(CipherError::Decrypt(_)));
    }

    #[test]
    fn test_garbage_input_fails() {
        let cipher = TokenCipher::from_secret("secret").unwrap();
        assert!(cipher.decrypt("").is_err());
        assert!(cipher.decrypt("plain-token").is_err());
        assert!(cipher.decrypt("v1:short:abcd").is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert_matches!(TokenCipher::from_secret(""), Err(CipherError::MissingKey(_)));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let cipher = TokenCipher::from_secret("secret").unwrap();
        let rendered = format!("{:?}", cipher);
        assert_eq!(rendered, "TokenCipher(<redacted>)");
        assert!(!rendered.contains(&format!("{:?}", cipher.key)));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("ISSUEBRIDGE_TEST_KEY", "from-env");
        let cipher = TokenCipher::from_env("ISSUEBRIDGE_TEST_KEY").unwrap();
        let sealed = cipher.encrypt("token").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "token");
        std::env::remove_var("ISSUEBRIDGE_TEST_KEY");

        assert_matches!(
            TokenCipher::from_env("ISSUEBRIDGE_TEST_KEY"),
            Err(CipherError::MissingKey(_))
        );
    }
}

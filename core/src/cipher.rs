//! Encryption at rest for repository credentials.
//!
//! Values are encrypted with AES-256-GCM under a key derived from the
//! configured secret, base64-encoded with the random nonce prepended,
//! and tagged with a scheme prefix. Without a secret the cipher is a
//! passthrough; stored values without the prefix are returned verbatim
//! so databases written before a secret was configured keep working.

use aes_gcm::Aes256Gcm;
use aes_gcm::aead::Aead;
use aes_gcm::aead::KeyInit;
use aes_gcm::aead::generic_array::GenericArray;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use sha2::Digest;
use sha2::Sha256;

const SCHEME_PREFIX: &str = "aesgcm:";
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("credential encryption failed")]
    Encrypt,

    #[error("credential decryption failed")]
    Decrypt,

    #[error("stored credential is malformed")]
    Malformed,

    #[error("a cipher secret is required to decrypt this credential")]
    MissingSecret,
}

/// Symmetric cipher for credentials stored in repository rows.
#[derive(Clone)]
pub struct CredentialCipher {
    key: Option<[u8; 32]>,
}

impl CredentialCipher {
    /// Derive the key from `secret`. A blank secret disables
    /// encryption and the cipher passes values through unchanged.
    pub fn new(secret: &str) -> Self {
        let secret = secret.trim();
        if secret.is_empty() {
            return Self::disabled();
        }
        Self {
            key: Some(Sha256::digest(secret.as_bytes()).into()),
        }
    }

    pub fn disabled() -> Self {
        Self { key: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_string());
        };
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key));

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let nonce_ga = GenericArray::from_slice(&nonce);

        let ciphertext = cipher
            .encrypt(nonce_ga, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(format!("{SCHEME_PREFIX}{}", BASE64.encode(combined)))
    }

    /// Recover the plaintext of a stored value. Values without the
    /// scheme prefix predate encryption and are returned as-is.
    pub fn decrypt(&self, stored: &str) -> Result<String, CipherError> {
        let Some(encoded) = stored.strip_prefix(SCHEME_PREFIX) else {
            return Ok(stored.to_string());
        };
        let Some(key) = &self.key else {
            return Err(CipherError::MissingSecret);
        };

        let combined = BASE64.decode(encoded).map_err(|_| CipherError::Malformed)?;
        if combined.len() < NONCE_LEN {
            return Err(CipherError::Malformed);
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
        let nonce_ga = GenericArray::from_slice(nonce);
        let plaintext = cipher
            .decrypt(nonce_ga, ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_with_a_secret() {
        let cipher = CredentialCipher::new("s3cret");
        let stored = cipher.encrypt("hunter2").unwrap();
        assert!(stored.starts_with(SCHEME_PREFIX));
        assert_eq!(cipher.decrypt(&stored).unwrap(), "hunter2");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let cipher = CredentialCipher::new("s3cret");
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn without_a_secret_values_pass_through() {
        let cipher = CredentialCipher::disabled();
        assert_eq!(cipher.encrypt("plain").unwrap(), "plain");
        assert_eq!(cipher.decrypt("plain").unwrap(), "plain");
        assert!(!cipher.is_enabled());
    }

    #[test]
    fn blank_secret_disables_encryption() {
        let cipher = CredentialCipher::new("   ");
        assert!(!cipher.is_enabled());
        assert_eq!(cipher.encrypt("plain").unwrap(), "plain");
    }

    #[test]
    fn unprefixed_values_decrypt_verbatim_even_with_a_secret() {
        let cipher = CredentialCipher::new("s3cret");
        assert_eq!(cipher.decrypt("legacy-password").unwrap(), "legacy-password");
    }

    #[test]
    fn prefixed_value_without_a_secret_is_an_error() {
        let with_secret = CredentialCipher::new("s3cret");
        let stored = with_secret.encrypt("hunter2").unwrap();
        let without = CredentialCipher::disabled();
        assert!(matches!(
            without.decrypt(&stored),
            Err(CipherError::MissingSecret)
        ));
    }

    #[test]
    fn wrong_secret_fails_to_decrypt() {
        let stored = CredentialCipher::new("right").encrypt("hunter2").unwrap();
        let wrong = CredentialCipher::new("wrong");
        assert!(matches!(wrong.decrypt(&stored), Err(CipherError::Decrypt)));
    }

    #[test]
    fn malformed_stored_values_are_rejected() {
        let cipher = CredentialCipher::new("s3cret");
        assert!(matches!(
            cipher.decrypt("aesgcm:!!!not-base64!!!"),
            Err(CipherError::Malformed)
        ));
        assert!(matches!(
            cipher.decrypt("aesgcm:AAAA"),
            Err(CipherError::Malformed)
        ));
    }
}

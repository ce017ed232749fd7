use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::encryption::EncryptionProvider;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Registry secret cipher using AES-256-GCM with a key from configuration
///
/// Ciphertext layout (before base64): 12-byte nonce, then ciphertext + tag.
pub struct LocalEncryptionProvider {
    cipher: Aes256Gcm,
}

impl LocalEncryptionProvider {
    /// Create a provider from a base64-encoded 32-byte key
    pub fn new(key_base64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .context("Failed to decode encryption key from base64")?;
        Self::from_key_bytes(&key_bytes)
    }

    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != KEY_LEN {
            bail!(
                "Encryption key must be {} bytes (256 bits) for AES-256-GCM, got {} bytes",
                KEY_LEN,
                key_bytes.len()
            );
        }

        let cipher = Aes256Gcm::new_from_slice(key_bytes)
            .map_err(|e| anyhow!("Failed to create AES-256-GCM cipher: {}", e))?;
        Ok(Self { cipher })
    }
}

#[async_trait]
impl EncryptionProvider for LocalEncryptionProvider {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&sealed))
    }

    async fn decrypt(&self, ciphertext_base64: &str) -> Result<String> {
        let sealed = BASE64
            .decode(ciphertext_base64)
            .context("Failed to decode ciphertext from base64")?;

        if sealed.len() <= NONCE_LEN {
            bail!("Invalid ciphertext: too short");
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }

    fn provider_name(&self) -> &str {
        "local-aes-256-gcm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_provider() -> LocalEncryptionProvider {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        LocalEncryptionProvider::new(&BASE64.encode(key)).unwrap()
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let provider = random_provider();

        let password = "dckr_pat_0123456789";
        let ciphertext = provider.encrypt(password).await.unwrap();
        assert_ne!(ciphertext, password);
        assert_eq!(provider.decrypt(&ciphertext).await.unwrap(), password);
    }

    #[tokio::test]
    async fn test_same_secret_encrypts_differently() {
        let provider = random_provider();

        let first = provider.encrypt("same token").await.unwrap();
        let second = provider.encrypt("same token").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(provider.decrypt(&second).await.unwrap(), "same token");
    }

    #[tokio::test]
    async fn test_wrong_key_fails_to_decrypt() {
        let sealed = random_provider().encrypt("secret").await.unwrap();
        assert!(random_provider().decrypt(&sealed).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_ciphertext_rejected() {
        let provider = random_provider();
        let short = BASE64.encode([0u8; NONCE_LEN]);
        assert!(provider.decrypt(&short).await.is_err());
        assert!(provider.decrypt("%%%").await.is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = BASE64.encode(b"tooshort");
        assert!(LocalEncryptionProvider::new(&short_key).is_err());
    }
}

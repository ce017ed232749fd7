pub mod providers;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::registry::models::StringMap;
use crate::settings::EncryptionSettings;

/// Encryption provider trait for encrypting/decrypting secrets
#[async_trait]
pub trait EncryptionProvider: Send + Sync {
    /// Encrypt plaintext and return base64-encoded ciphertext
    async fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Decrypt base64-encoded ciphertext and return plaintext
    async fn decrypt(&self, ciphertext: &str) -> Result<String>;

    /// Get provider name for logging
    fn provider_name(&self) -> &str;
}

/// Encrypt every non-empty value of a field map
///
/// Returns a new map; on failure nothing is returned, so callers never see a
/// partially encrypted set. Empty values stay empty.
pub async fn encrypt_map(provider: &dyn EncryptionProvider, fields: &StringMap) -> Result<StringMap> {
    let mut out = StringMap::new();
    for (key, value) in fields {
        let sealed = if value.is_empty() {
            String::new()
        } else {
            provider
                .encrypt(value)
                .await
                .with_context(|| format!("Failed to encrypt field '{}'", key))?
        };
        out.insert(key.clone(), sealed);
    }
    Ok(out)
}

/// Decrypt every non-empty value of a field map (inverse of [`encrypt_map`])
pub async fn decrypt_map(provider: &dyn EncryptionProvider, fields: &StringMap) -> Result<StringMap> {
    let mut out = StringMap::new();
    for (key, value) in fields {
        let opened = if value.is_empty() {
            String::new()
        } else {
            provider
                .decrypt(value)
                .await
                .with_context(|| format!("Failed to decrypt field '{}'", key))?
        };
        out.insert(key.clone(), opened);
    }
    Ok(out)
}

/// Initialize encryption provider from settings
pub async fn init_provider(
    encryption_settings: Option<&EncryptionSettings>,
) -> Result<Option<Arc<dyn EncryptionProvider>>> {
    let Some(encryption_config) = encryption_settings else {
        return Ok(None);
    };

    match encryption_config {
        EncryptionSettings::Local { key } => {
            let provider = providers::local::LocalEncryptionProvider::new(key)
                .context("Failed to initialize local encryption provider")?;
            tracing::info!("Using {} encryption provider", provider.provider_name());
            Ok(Some(Arc::new(provider)))
        }
        #[cfg(feature = "aws")]
        EncryptionSettings::AwsKms {
            region,
            key_id,
            access_key_id,
            secret_access_key,
        } => {
            let provider = providers::aws_kms::AwsKmsEncryptionProvider::new(
                region,
                key_id.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
            )
            .await
            .context("Failed to initialize AWS KMS encryption provider")?;
            tracing::info!("Using {} encryption provider", provider.provider_name());
            Ok(Some(Arc::new(provider)))
        }
        #[cfg(not(feature = "aws"))]
        EncryptionSettings::AwsKms { .. } => {
            anyhow::bail!(
                "AWS KMS encryption is configured but the 'aws' feature is not enabled. \
                 Please rebuild with --features aws"
            )
        }
    }
}

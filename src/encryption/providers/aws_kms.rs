use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client as KmsClient;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::aws::{load_sdk_config, static_credentials};
use crate::encryption::EncryptionProvider;

/// Registry secret cipher backed by an AWS KMS key
pub struct AwsKmsEncryptionProvider {
    client: KmsClient,
    key_id: String,
}

impl AwsKmsEncryptionProvider {
    /// Static credentials are for development; otherwise the default chain is used
    pub async fn new(
        region: &str,
        key_id: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    ) -> Result<Self> {
        let credentials = access_key_id
            .zip(secret_access_key)
            .map(|(access_key, secret_key)| static_credentials(access_key, secret_key, None));
        let config = load_sdk_config(region, credentials).await;

        Ok(Self {
            client: KmsClient::new(&config),
            key_id,
        })
    }
}

#[async_trait]
impl EncryptionProvider for AwsKmsEncryptionProvider {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let response = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(plaintext.as_bytes()))
            .send()
            .await
            .context("KMS encryption failed")?;

        let ciphertext_blob = response
            .ciphertext_blob()
            .context("No ciphertext blob in KMS response")?;

        Ok(BASE64.encode(ciphertext_blob.as_ref()))
    }

    async fn decrypt(&self, ciphertext_base64: &str) -> Result<String> {
        let ciphertext_bytes = BASE64
            .decode(ciphertext_base64)
            .context("Failed to decode ciphertext from base64")?;

        let response = self
            .client
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(ciphertext_bytes))
            .send()
            .await
            .context("KMS decryption failed")?;

        let plaintext_blob = response
            .plaintext()
            .context("No plaintext in KMS response")?;

        String::from_utf8(plaintext_blob.as_ref().to_vec())
            .context("Decrypted data is not valid UTF-8")
    }

    fn provider_name(&self) -> &str {
        "aws-kms"
    }
}

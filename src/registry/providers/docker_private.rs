use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionProvider;
use crate::error::{BlobKind, Result};
use crate::registry::client::V2Endpoint;
use crate::registry::models::{from_string_map, to_string_map, SecretString, StringMap};
use crate::registry::providers::{credential_outcome, decode_payload, open, seal, FromParts};
use crate::registry::{
    require_fields, validate_name, IngestedImage, Registry, RegistryClient, RegistryType,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonSecret {
    pub docker_registry_url: String,
    pub docker_username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub docker_password: SecretString,
}

/// Any self-hosted registry speaking the Docker Registry HTTP API v2
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerPrivateRegistry {
    pub name: String,
    pub non_secret: NonSecret,
    pub secret: Secret,
}

impl DockerPrivateRegistry {
    fn endpoint(&self) -> V2Endpoint {
        V2Endpoint::new(&self.non_secret.docker_registry_url, &self.name).with_basic_auth(
            &self.non_secret.docker_username,
            self.secret.docker_password.expose(),
        )
    }
}

impl FromParts for DockerPrivateRegistry {
    const REGISTRY_TYPE: RegistryType = RegistryType::DockerPrivate;

    fn from_payload(payload: &[u8]) -> Result<Self> {
        decode_payload(payload)
    }

    fn from_parts(
        name: String,
        non_secret: StringMap,
        secret: StringMap,
        _extras: StringMap,
    ) -> Result<Self> {
        Ok(Self {
            name,
            non_secret: from_string_map(non_secret, BlobKind::NonSecret)?,
            secret: from_string_map(secret, BlobKind::Secret)?,
        })
    }
}

#[async_trait]
impl Registry for DockerPrivateRegistry {
    fn registry_type(&self) -> RegistryType {
        Self::REGISTRY_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.non_secret.docker_registry_url
    }

    fn username(&self) -> &str {
        &self.non_secret.docker_username
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        require_fields(&[
            ("docker_registry_url", &self.non_secret.docker_registry_url),
            ("docker_username", &self.non_secret.docker_username),
            ("docker_password", self.secret.docker_password.expose()),
        ])
    }

    async fn is_valid_credential(&self, client: &RegistryClient) -> bool {
        let outcome = match self.validate() {
            Ok(()) => client.ping_v2(&self.endpoint()).await,
            Err(e) => Err(e),
        };
        credential_outcome(self, outcome)
    }

    async fn encrypt_secret(&mut self, cipher: &dyn EncryptionProvider) -> Result<()> {
        self.secret = seal(&self.secret, BlobKind::Secret, cipher).await?;
        Ok(())
    }

    async fn decrypt_secret(&mut self, cipher: &dyn EncryptionProvider) -> Result<()> {
        self.secret = open(&self.secret, BlobKind::Secret, cipher).await?;
        Ok(())
    }

    fn non_secret(&self) -> StringMap {
        to_string_map(&self.non_secret)
    }

    fn secret(&self) -> StringMap {
        to_string_map(&self.secret)
    }

    async fn fetch_images(&self, client: &RegistryClient) -> Result<Vec<IngestedImage>> {
        client
            .list_v2_images(&self.endpoint(), None, Self::REGISTRY_TYPE, &self.name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::providers::tests::test_cipher;

    fn sample() -> DockerPrivateRegistry {
        DockerPrivateRegistry {
            name: "builds".to_string(),
            non_secret: NonSecret {
                docker_registry_url: "https://registry.internal:5000".to_string(),
                docker_username: "ci".to_string(),
            },
            secret: Secret {
                docker_password: "pa55".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_secret_roundtrip() {
        let cipher = test_cipher();
        let mut registry = sample();

        registry.encrypt_secret(&cipher).await.unwrap();
        assert_ne!(registry.secret.docker_password.expose(), "pa55");
        assert_eq!(registry.non_secret, sample().non_secret);

        registry.decrypt_secret(&cipher).await.unwrap();
        assert_eq!(registry, sample());
    }

    #[tokio::test]
    async fn test_failed_decrypt_leaves_secret_untouched() {
        let cipher = test_cipher();
        let mut registry = sample();

        let err = registry.decrypt_secret(&cipher).await.unwrap_err();
        assert!(matches!(err, crate::error::RegistryError::Encryption(_)));
        assert_eq!(registry.secret.docker_password.expose(), "pa55");
    }

    #[test]
    fn test_validate_requires_password() {
        let mut registry = sample();
        assert!(registry.validate().is_ok());

        registry.secret = Secret::default();
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_debug_output_hides_password() {
        let debug = format!("{:?}", sample());
        assert!(!debug.contains("pa55"));
    }
}

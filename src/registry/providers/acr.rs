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
    pub azure_registry_url: String,
    pub azure_registry_username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub azure_registry_password: SecretString,
}

/// Azure Container Registry, authenticated with an admin user or service principal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcrRegistry {
    pub name: String,
    pub non_secret: NonSecret,
    pub secret: Secret,
}

impl AcrRegistry {
    fn endpoint(&self) -> V2Endpoint {
        V2Endpoint::new(&self.non_secret.azure_registry_url, &self.name).with_basic_auth(
            &self.non_secret.azure_registry_username,
            self.secret.azure_registry_password.expose(),
        )
    }
}

impl FromParts for AcrRegistry {
    const REGISTRY_TYPE: RegistryType = RegistryType::Acr;

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
impl Registry for AcrRegistry {
    fn registry_type(&self) -> RegistryType {
        Self::REGISTRY_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.non_secret.azure_registry_url
    }

    fn username(&self) -> &str {
        &self.non_secret.azure_registry_username
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        require_fields(&[
            ("azure_registry_url", &self.non_secret.azure_registry_url),
            ("azure_registry_username", &self.non_secret.azure_registry_username),
            ("azure_registry_password", self.secret.azure_registry_password.expose()),
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

    fn sample() -> AcrRegistry {
        AcrRegistry {
            name: "azure-prod".to_string(),
            non_secret: NonSecret {
                azure_registry_url: "https://acme.azurecr.io".to_string(),
                azure_registry_username: "acme-pull".to_string(),
            },
            secret: Secret {
                azure_registry_password: "sp-secret".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_secret_roundtrip() {
        let cipher = test_cipher();
        let mut registry = sample();

        registry.encrypt_secret(&cipher).await.unwrap();
        assert_ne!(registry.secret.azure_registry_password.expose(), "sp-secret");
        assert_eq!(registry.non_secret, sample().non_secret);

        registry.decrypt_secret(&cipher).await.unwrap();
        assert_eq!(registry, sample());
    }

    #[test]
    fn test_validate_requires_password() {
        let mut registry = sample();
        assert!(registry.validate().is_ok());

        registry.secret = Secret::default();
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_identity_accessors() {
        let registry = sample();
        assert_eq!(registry.registry_type(), RegistryType::Acr);
        assert_eq!(registry.namespace(), "https://acme.azurecr.io");
        assert_eq!(registry.username(), "acme-pull");
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionProvider;
use crate::error::{BlobKind, Result};
use crate::registry::client::{normalize_base_url, V2Endpoint};
use crate::registry::models::{from_string_map, to_string_map, SecretString, StringMap};
use crate::registry::providers::{credential_outcome, decode_payload, open, seal, FromParts};
use crate::registry::{
    require_fields, validate_name, IngestedImage, Registry, RegistryClient, RegistryType,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonSecret {
    pub jfrog_registry_url: String,
    pub jfrog_repository: String,
    pub jfrog_username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    /// Password or API key
    pub jfrog_password: SecretString,
}

/// A Docker repository hosted in JFrog Artifactory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JfrogRegistry {
    pub name: String,
    pub non_secret: NonSecret,
    pub secret: Secret,
}

impl JfrogRegistry {
    /// Artifactory serves each Docker repository's v2 API under its REST path
    fn api_base(&self) -> String {
        format!(
            "{}/artifactory/api/docker/{}",
            normalize_base_url(&self.non_secret.jfrog_registry_url),
            self.non_secret.jfrog_repository.trim_matches('/')
        )
    }

    fn endpoint(&self) -> V2Endpoint {
        V2Endpoint::new(&self.api_base(), &self.name).with_basic_auth(
            &self.non_secret.jfrog_username,
            self.secret.jfrog_password.expose(),
        )
    }
}

impl FromParts for JfrogRegistry {
    const REGISTRY_TYPE: RegistryType = RegistryType::Jfrog;

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
impl Registry for JfrogRegistry {
    fn registry_type(&self) -> RegistryType {
        Self::REGISTRY_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.non_secret.jfrog_repository
    }

    fn username(&self) -> &str {
        &self.non_secret.jfrog_username
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        require_fields(&[
            ("jfrog_registry_url", &self.non_secret.jfrog_registry_url),
            ("jfrog_repository", &self.non_secret.jfrog_repository),
            ("jfrog_username", &self.non_secret.jfrog_username),
            ("jfrog_password", self.secret.jfrog_password.expose()),
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

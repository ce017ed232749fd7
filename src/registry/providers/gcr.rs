use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionProvider;
use crate::error::{BlobKind, RegistryError, Result};
use crate::registry::client::V2Endpoint;
use crate::registry::models::{from_string_map, to_string_map, SecretString, StringMap};
use crate::registry::providers::{credential_outcome, decode_payload, open, seal, FromParts};
use crate::registry::{
    require_fields, validate_name, IngestedImage, Registry, RegistryClient, RegistryType,
};

/// User name GCR expects when the password is a service-account key file
const JSON_KEY_USER: &str = "_json_key";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonSecret {
    pub registry_url: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub project_id: SecretString,
    pub private_key_id: SecretString,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extras {
    /// Full service-account key file, stored encrypted
    pub service_account_json: SecretString,
}

/// Google Container Registry / Artifact Registry, authenticated with a service-account key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcrRegistry {
    pub name: String,
    pub non_secret: NonSecret,
    pub secret: Secret,
    pub extras: Extras,
}

/// The subset of a service-account key file we read
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    private_key_id: String,
}

impl GcrRegistry {
    /// Fill project and key ids from the service-account key when the payload omits them
    fn apply_service_account(&mut self) -> Result<()> {
        let raw = self.extras.service_account_json.expose();
        if raw.trim().is_empty() {
            return Ok(());
        }
        let key: ServiceAccountKey =
            serde_json::from_str(raw).map_err(|e| RegistryError::decode(BlobKind::Extras, e))?;

        if self.non_secret.project_id.is_empty() {
            self.non_secret.project_id = key.project_id.clone();
        }
        if self.secret.project_id.is_empty() {
            self.secret.project_id = key.project_id.into();
        }
        if self.secret.private_key_id.is_empty() {
            self.secret.private_key_id = key.private_key_id.into();
        }
        Ok(())
    }

    fn endpoint(&self) -> V2Endpoint {
        V2Endpoint::new(&self.non_secret.registry_url, &self.name)
            .with_basic_auth(JSON_KEY_USER, self.extras.service_account_json.expose())
    }
}

impl FromParts for GcrRegistry {
    const REGISTRY_TYPE: RegistryType = RegistryType::Gcr;

    fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut registry: Self = decode_payload(payload)?;
        registry.apply_service_account()?;
        Ok(registry)
    }

    fn from_parts(
        name: String,
        non_secret: StringMap,
        secret: StringMap,
        extras: StringMap,
    ) -> Result<Self> {
        Ok(Self {
            name,
            non_secret: from_string_map(non_secret, BlobKind::NonSecret)?,
            secret: from_string_map(secret, BlobKind::Secret)?,
            extras: from_string_map(extras, BlobKind::Extras)?,
        })
    }
}

#[async_trait]
impl Registry for GcrRegistry {
    fn registry_type(&self) -> RegistryType {
        Self::REGISTRY_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.non_secret.project_id
    }

    fn username(&self) -> &str {
        ""
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        require_fields(&[
            ("registry_url", &self.non_secret.registry_url),
            ("project_id", &self.non_secret.project_id),
            (
                "service_account_json",
                self.extras.service_account_json.expose(),
            ),
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

    async fn encrypt_extras(&mut self, cipher: &dyn EncryptionProvider) -> Result<()> {
        self.extras = seal(&self.extras, BlobKind::Extras, cipher).await?;
        Ok(())
    }

    async fn decrypt_extras(&mut self, cipher: &dyn EncryptionProvider) -> Result<()> {
        self.extras = open(&self.extras, BlobKind::Extras, cipher).await?;
        Ok(())
    }

    fn non_secret(&self) -> StringMap {
        to_string_map(&self.non_secret)
    }

    fn secret(&self) -> StringMap {
        to_string_map(&self.secret)
    }

    fn extras(&self) -> StringMap {
        to_string_map(&self.extras)
    }

    async fn fetch_images(&self, client: &RegistryClient) -> Result<Vec<IngestedImage>> {
        client
            .list_v2_images(
                &self.endpoint(),
                Some(&self.non_secret.project_id),
                Self::REGISTRY_TYPE,
                &self.name,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::providers::tests::test_cipher;
    use crate::registry::testing::{basic_header, spawn_server, test_client};
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use serde_json::json;

    const KEY_FILE: &str =
        r#"{"type":"service_account","project_id":"acme-prod","private_key_id":"k-123"}"#;

    fn payload(url: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "name": "gcr-prod",
            "non_secret": { "registry_url": url },
            "extras": { "service_account_json": KEY_FILE }
        }))
        .unwrap()
    }

    #[test]
    fn test_payload_fills_ids_from_key_file() {
        let registry = GcrRegistry::from_payload(&payload("https://gcr.io")).unwrap();
        assert_eq!(registry.namespace(), "acme-prod");
        assert_eq!(registry.secret.project_id.expose(), "acme-prod");
        assert_eq!(registry.secret.private_key_id.expose(), "k-123");
        assert_eq!(registry.username(), "");
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn test_malformed_key_file_is_extras_decode_error() {
        let body = br#"{"name":"gcr","extras":{"service_account_json":"{not json"}}"#;
        let err = GcrRegistry::from_payload(body).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Decode {
                part: BlobKind::Extras,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_extras_roundtrip() {
        let cipher = test_cipher();
        let original = GcrRegistry::from_payload(&payload("https://gcr.io")).unwrap();
        let mut registry = original.clone();

        registry.encrypt_extras(&cipher).await.unwrap();
        assert_ne!(registry.extras.service_account_json.expose(), KEY_FILE);
        assert_eq!(registry.secret, original.secret);

        registry.decrypt_extras(&cipher).await.unwrap();
        assert_eq!(registry, original);
    }

    #[tokio::test]
    async fn test_fetch_images_scoped_to_project() {
        async fn catalog(headers: HeaderMap) -> impl IntoResponse {
            let expected = basic_header(JSON_KEY_USER, KEY_FILE);
            if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            Json(json!({ "repositories": ["acme-prod/api", "other-project/db"] })).into_response()
        }

        async fn tags(Path(rest): Path<String>) -> impl IntoResponse {
            let repo = rest.trim_end_matches("/tags/list").to_string();
            Json(json!({ "name": repo, "tags": ["v1"] }))
        }

        let base = spawn_server(|_| {
            Router::new()
                .route("/v2/_catalog", get(catalog))
                .route("/v2/{*rest}", get(tags))
        })
        .await;
        let client = test_client(&base);

        let registry = GcrRegistry::from_payload(&payload(&base)).unwrap();
        let images = registry.fetch_images(&client).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].node_id, "acme-prod/api:v1");
        assert_eq!(images[0].registry_type, RegistryType::Gcr);
    }
}

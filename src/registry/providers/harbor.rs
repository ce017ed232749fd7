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
    pub harbor_registry_url: String,
    pub harbor_username: String,
    pub harbor_project_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub harbor_password: SecretString,
}

/// A Harbor project; only repositories under the project are listed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarborRegistry {
    pub name: String,
    pub non_secret: NonSecret,
    pub secret: Secret,
}

impl HarborRegistry {
    fn endpoint(&self) -> V2Endpoint {
        V2Endpoint::new(&self.non_secret.harbor_registry_url, &self.name).with_basic_auth(
            &self.non_secret.harbor_username,
            self.secret.harbor_password.expose(),
        )
    }
}

impl FromParts for HarborRegistry {
    const REGISTRY_TYPE: RegistryType = RegistryType::Harbor;

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
impl Registry for HarborRegistry {
    fn registry_type(&self) -> RegistryType {
        Self::REGISTRY_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.non_secret.harbor_project_name
    }

    fn username(&self) -> &str {
        &self.non_secret.harbor_username
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        require_fields(&[
            ("harbor_registry_url", &self.non_secret.harbor_registry_url),
            ("harbor_username", &self.non_secret.harbor_username),
            ("harbor_password", self.secret.harbor_password.expose()),
            ("harbor_project_name", &self.non_secret.harbor_project_name),
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
        let project = self.non_secret.harbor_project_name.as_str();
        let prefix = (!project.is_empty()).then_some(project);
        client
            .list_v2_images(&self.endpoint(), prefix, Self::REGISTRY_TYPE, &self.name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::{basic_header, spawn_server, test_client};
    use axum::{extract::Path, http::HeaderMap, response::IntoResponse, routing::get, Json, Router};
    use serde_json::json;

    fn harbor(url: &str) -> HarborRegistry {
        HarborRegistry {
            name: "harbor-eu".to_string(),
            non_secret: NonSecret {
                harbor_registry_url: url.to_string(),
                harbor_username: "robot$scanner".to_string(),
                harbor_project_name: "payments".to_string(),
            },
            secret: Secret {
                harbor_password: "robot-token".into(),
            },
        }
    }

    fn router() -> Router {
        fn ok(headers: &HeaderMap) -> bool {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some(basic_header("robot$scanner", "robot-token").as_str())
        }

        async fn ping(headers: HeaderMap) -> axum::http::StatusCode {
            if ok(&headers) {
                axum::http::StatusCode::OK
            } else {
                axum::http::StatusCode::UNAUTHORIZED
            }
        }

        async fn catalog(headers: HeaderMap) -> axum::response::Response {
            if !ok(&headers) {
                return axum::http::StatusCode::UNAUTHORIZED.into_response();
            }
            Json(json!({ "repositories": ["payments/api", "payments/worker", "search/indexer"] }))
                .into_response()
        }

        async fn tags(Path(rest): Path<String>) -> Json<serde_json::Value> {
            let repo = rest.trim_end_matches("/tags/list").to_string();
            Json(json!({ "name": repo, "tags": ["v1"] }))
        }

        Router::new()
            .route("/v2/", get(ping))
            .route("/v2/_catalog", get(catalog))
            .route("/v2/{*rest}", get(tags))
    }

    #[tokio::test]
    async fn test_fetch_images_scoped_to_project() {
        let base = spawn_server(|_| router()).await;
        let client = test_client(&base);

        let images = harbor(&base).fetch_images(&client).await.unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["payments/api", "payments/worker"]);
        assert!(images.iter().all(|i| i.registry_name == "harbor-eu"));
    }

    #[tokio::test]
    async fn test_is_valid_credential() {
        let base = spawn_server(|_| router()).await;
        let client = test_client(&base);

        assert!(harbor(&base).is_valid_credential(&client).await);

        let mut wrong = harbor(&base);
        wrong.secret.harbor_password = "expired".into();
        assert!(!wrong.is_valid_credential(&client).await);

        let mut incomplete = harbor(&base);
        incomplete.non_secret.harbor_project_name.clear();
        assert!(!incomplete.is_valid_credential(&client).await);
    }

    #[test]
    fn test_payload_without_project_decodes_to_empty_project() {
        let payload = br#"{
            "name": "harbor-eu",
            "non_secret": {"harbor_registry_url": "https://harbor.local", "harbor_username": "admin"},
            "secret": {"harbor_password": "Harbor12345"}
        }"#;
        let registry = HarborRegistry::from_payload(payload).unwrap();
        assert_eq!(registry.namespace(), "");
        assert_eq!(registry.username(), "admin");
        assert_eq!(registry.secret.harbor_password.expose(), "Harbor12345");
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::encryption::EncryptionProvider;
use crate::error::{BlobKind, RegistryError, Result};
use crate::registry::models::{from_string_map, to_string_map, SecretString, StringMap};
use crate::registry::providers::{credential_outcome, decode_payload, open, seal, FromParts};
use crate::registry::{
    require_fields, validate_name, IngestedImage, Registry, RegistryClient, RegistryType,
};

#[cfg(feature = "aws")]
const SESSION_NAME: &str = "regvault-image-listing";

/// Rows store flags as `"true"`/`"false"`; payloads may send JSON booleans
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b.to_string(),
        Some(Flag::Text(s)) => s,
        None => String::new(),
    })
}

fn is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonSecret {
    #[serde(deserialize_with = "flag")]
    pub use_iam_role: String,
    #[serde(deserialize_with = "flag")]
    pub is_public: String,
    pub aws_access_key_id: String,
    pub aws_region_name: String,
    pub aws_account_id: String,
    /// Role assumed on top of the IAM role, for cross-account registries
    pub target_account_role_arn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub aws_secret_access_key: SecretString,
}

/// Amazon Elastic Container Registry, listed through the AWS SDK
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcrRegistry {
    pub name: String,
    pub non_secret: NonSecret,
    pub secret: Secret,
}

impl EcrRegistry {
    pub fn uses_iam_role(&self) -> bool {
        is_true(&self.non_secret.use_iam_role)
    }

    pub fn is_public(&self) -> bool {
        is_true(&self.non_secret.is_public)
    }

    #[cfg(feature = "aws")]
    async fn ecr_client(&self) -> Result<aws_sdk_ecr::Client> {
        use crate::aws::{format_sdk_error, load_sdk_config, static_credentials};

        let region = &self.non_secret.aws_region_name;
        let base_credentials = (!self.uses_iam_role()).then(|| {
            static_credentials(
                self.non_secret.aws_access_key_id.clone(),
                self.secret.aws_secret_access_key.expose(),
                None,
            )
        });
        let mut config = load_sdk_config(region, base_credentials).await;

        let role_arn = self.non_secret.target_account_role_arn.trim();
        if self.uses_iam_role() && !role_arn.is_empty() {
            tracing::debug!(role_arn = %role_arn, "Assuming target account role");
            let response = aws_sdk_sts::Client::new(&config)
                .assume_role()
                .role_arn(role_arn)
                .role_session_name(SESSION_NAME)
                .send()
                .await
                .map_err(|e| {
                    RegistryError::auth(
                        &self.name,
                        format!("failed to assume role {}: {}", role_arn, format_sdk_error(&e)),
                    )
                })?;
            let assumed = response
                .credentials()
                .ok_or_else(|| RegistryError::auth(&self.name, "AssumeRole returned no credentials"))?;
            config = load_sdk_config(
                region,
                Some(static_credentials(
                    assumed.access_key_id(),
                    assumed.secret_access_key(),
                    Some(assumed.session_token().to_string()),
                )),
            )
            .await;
        }

        Ok(aws_sdk_ecr::Client::new(&config))
    }

    #[cfg(feature = "aws")]
    async fn list_repositories(&self, ecr: &aws_sdk_ecr::Client) -> Result<Vec<String>> {
        use crate::aws::format_sdk_error;

        let mut repositories = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = ecr
                .describe_repositories()
                .registry_id(&self.non_secret.aws_account_id);
            if let Some(token) = next_token {
                request = request.next_token(token);
            }

            let response = request.send().await.map_err(|e| {
                RegistryError::response(
                    &self.name,
                    format!("failed to list ECR repositories: {}", format_sdk_error(&e)),
                )
            })?;

            repositories.extend(
                response
                    .repositories()
                    .iter()
                    .filter_map(|r| r.repository_name().map(String::from)),
            );

            next_token = response.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(repositories)
    }

    #[cfg(feature = "aws")]
    async fn list_images(
        &self,
        ecr: &aws_sdk_ecr::Client,
        repository: &str,
    ) -> Result<Vec<IngestedImage>> {
        use crate::aws::format_sdk_error;

        let mut images = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = ecr
                .describe_images()
                .registry_id(&self.non_secret.aws_account_id)
                .repository_name(repository);
            if let Some(token) = next_token {
                request = request.next_token(token);
            }

            let response = request.send().await.map_err(|e| {
                RegistryError::response(
                    &self.name,
                    format!(
                        "failed to list images of {}: {}",
                        repository,
                        format_sdk_error(&e)
                    ),
                )
            })?;

            for detail in response.image_details() {
                let pushed_at = detail
                    .image_pushed_at()
                    .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), t.subsec_nanos()));
                let size = detail
                    .image_size_in_bytes()
                    .and_then(|s| u64::try_from(s).ok());

                // Untagged manifests are not pullable by tag
                for tag in detail.image_tags() {
                    let mut image =
                        IngestedImage::new(RegistryType::Ecr, &self.name, repository, tag.as_str())
                            .with_digest(detail.image_digest())
                            .with_size(size);
                    image.created_at = pushed_at;
                    images.push(image);
                }
            }

            next_token = response.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(images)
    }

    #[cfg(feature = "aws")]
    async fn check_authorization(&self) -> Result<()> {
        use crate::aws::format_sdk_error;

        let ecr = self.ecr_client().await?;
        ecr.get_authorization_token().send().await.map_err(|e| {
            RegistryError::auth(&self.name, format_sdk_error(&e))
        })?;
        Ok(())
    }

    #[cfg(not(feature = "aws"))]
    async fn check_authorization(&self) -> Result<()> {
        Err(RegistryError::Unsupported(
            "amazon_ecr requires the aws feature".to_string(),
        ))
    }
}

impl FromParts for EcrRegistry {
    const REGISTRY_TYPE: RegistryType = RegistryType::Ecr;

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
impl Registry for EcrRegistry {
    fn registry_type(&self) -> RegistryType {
        Self::REGISTRY_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.non_secret.aws_account_id
    }

    fn username(&self) -> &str {
        &self.non_secret.aws_access_key_id
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        require_fields(&[("aws_region_name", &self.non_secret.aws_region_name)])?;
        if !self.is_public() {
            require_fields(&[("aws_account_id", &self.non_secret.aws_account_id)])?;
        }
        if !self.uses_iam_role() {
            require_fields(&[
                ("aws_access_key_id", &self.non_secret.aws_access_key_id),
                (
                    "aws_secret_access_key",
                    self.secret.aws_secret_access_key.expose(),
                ),
            ])?;
        }
        Ok(())
    }

    async fn is_valid_credential(&self, _client: &RegistryClient) -> bool {
        let outcome = match self.validate() {
            Ok(()) => self.check_authorization().await,
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

    #[cfg(feature = "aws")]
    async fn fetch_images(&self, _client: &RegistryClient) -> Result<Vec<IngestedImage>> {
        if self.is_public() {
            return Err(RegistryError::Unsupported(
                "listing public ECR repositories".to_string(),
            ));
        }

        let ecr = self.ecr_client().await?;
        let repositories = self.list_repositories(&ecr).await?;

        let mut images = Vec::new();
        for repository in &repositories {
            images.extend(self.list_images(&ecr, repository).await?);
        }
        images.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tag.cmp(&b.tag)));

        tracing::info!(
            registry = %self.name,
            account = %self.non_secret.aws_account_id,
            repositories = repositories.len(),
            count = images.len(),
            "Fetched images from ECR"
        );
        Ok(images)
    }

    #[cfg(not(feature = "aws"))]
    async fn fetch_images(&self, _client: &RegistryClient) -> Result<Vec<IngestedImage>> {
        Err(RegistryError::Unsupported(
            "amazon_ecr requires the aws feature".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::test_client;

    fn static_keys() -> EcrRegistry {
        EcrRegistry {
            name: "ecr-prod".to_string(),
            non_secret: NonSecret {
                use_iam_role: "false".to_string(),
                is_public: "false".to_string(),
                aws_access_key_id: "AKIAEXAMPLE".to_string(),
                aws_region_name: "eu-west-1".to_string(),
                aws_account_id: "123456789012".to_string(),
                target_account_role_arn: String::new(),
            },
            secret: Secret {
                aws_secret_access_key: "wJalrXUtnFEMI".into(),
            },
        }
    }

    #[test]
    fn test_payload_accepts_boolean_flags() {
        let payload = br#"{
            "name": "ecr-prod",
            "non_secret": {
                "use_iam_role": true,
                "is_public": "false",
                "aws_region_name": "us-east-1",
                "aws_account_id": "123456789012"
            }
        }"#;
        let registry = EcrRegistry::from_payload(payload).unwrap();
        assert!(registry.uses_iam_role());
        assert!(!registry.is_public());
        assert_eq!(registry.non_secret()["use_iam_role"], "true");
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn test_row_flags_missing_mean_false() {
        let registry = EcrRegistry::from_parts(
            "ecr".to_string(),
            StringMap::new(),
            StringMap::new(),
            StringMap::new(),
        )
        .unwrap();
        assert!(!registry.uses_iam_role());
        assert!(!registry.is_public());
    }

    #[test]
    fn test_validate_rules() {
        assert!(static_keys().validate().is_ok());

        let mut missing_secret = static_keys();
        missing_secret.secret = Secret::default();
        assert!(missing_secret.validate().is_err());

        let mut iam = missing_secret.clone();
        iam.non_secret.use_iam_role = "true".to_string();
        iam.non_secret.aws_access_key_id.clear();
        assert!(iam.validate().is_ok());

        let mut public = static_keys();
        public.non_secret.is_public = "TRUE".to_string();
        public.non_secret.aws_account_id.clear();
        assert!(public.validate().is_ok());

        let mut no_region = static_keys();
        no_region.non_secret.aws_region_name.clear();
        assert!(no_region.validate().is_err());
    }

    #[test]
    fn test_identity_accessors() {
        let registry = static_keys();
        assert_eq!(registry.namespace(), "123456789012");
        assert_eq!(registry.username(), "AKIAEXAMPLE");
        assert!(!format!("{:?}", registry).contains("wJalrXUtnFEMI"));
    }

    #[tokio::test]
    async fn test_public_listing_is_unsupported() {
        let mut registry = static_keys();
        registry.non_secret.is_public = "true".to_string();

        let err = registry
            .fetch_images(&test_client("http://127.0.0.1:9"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_not_a_valid_credential() {
        let mut registry = static_keys();
        registry.non_secret.aws_region_name.clear();
        assert!(
            !registry
                .is_valid_credential(&test_client("http://127.0.0.1:9"))
                .await
        );
    }
}

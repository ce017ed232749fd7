use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionProvider;
use crate::error::{BlobKind, RegistryError, Result};
use crate::registry::client::normalize_base_url;
use crate::registry::models::{from_string_map, to_string_map, SecretString, StringMap};
use crate::registry::providers::{credential_outcome, decode_payload, open, seal, FromParts};
use crate::registry::{
    require_fields, validate_name, IngestedImage, Registry, RegistryClient, RegistryType,
};

const DEFAULT_QUAY_URL: &str = "https://quay.io";

/// Quay rejects tag pages larger than this
const MAX_TAG_PAGE: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonSecret {
    pub quay_namespace: String,
    /// Empty means quay.io
    pub quay_registry_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    /// OAuth application token; public repositories are listed without one
    pub quay_access_token: SecretString,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuayRegistry {
    pub name: String,
    pub non_secret: NonSecret,
    pub secret: Secret,
}

#[derive(Debug, Deserialize)]
struct RepositoryPage {
    #[serde(default)]
    repositories: Vec<QuayRepository>,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuayRepository {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    tags: Vec<QuayTag>,
    #[serde(default)]
    has_additional: bool,
}

#[derive(Debug, Deserialize)]
struct QuayTag {
    name: String,
    #[serde(default)]
    manifest_digest: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    last_modified: Option<String>,
}

impl QuayRegistry {
    pub fn base_url(&self) -> String {
        if self.non_secret.quay_registry_url.trim().is_empty() {
            DEFAULT_QUAY_URL.to_string()
        } else {
            normalize_base_url(&self.non_secret.quay_registry_url)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.secret.quay_access_token.is_empty() {
            request
        } else {
            request.bearer_auth(self.secret.quay_access_token.expose())
        }
    }

    async fn list_repositories(&self, client: &RegistryClient) -> Result<Vec<QuayRepository>> {
        let url = format!("{}/api/v1/repository", self.base_url());
        let mut repositories = Vec::new();
        let mut next_page: Option<String> = None;

        loop {
            let mut query = vec![("namespace", self.non_secret.quay_namespace.clone())];
            if let Some(token) = &next_page {
                query.push(("next_page", token.clone()));
            }
            let request = self.authorize(client.http().get(&url).query(&query));
            let page: RepositoryPage = client.send_json(&self.name, request).await?;
            repositories.extend(page.repositories);

            match page.next_page.filter(|t| !t.is_empty()) {
                Some(token) if Some(&token) != next_page.as_ref() => next_page = Some(token),
                _ => break,
            }
        }

        Ok(repositories)
    }

    async fn list_tags(&self, client: &RegistryClient, repository: &str) -> Result<Vec<QuayTag>> {
        let url = format!(
            "{}/api/v1/repository/{}/{}/tag/",
            self.base_url(),
            urlencoding::encode(&self.non_secret.quay_namespace),
            urlencoding::encode(repository)
        );
        let limit = client.page_size().min(MAX_TAG_PAGE).to_string();
        let mut tags = Vec::new();
        let mut page = 1u32;
        let mut previous_first: Option<String> = None;

        loop {
            let request = self.authorize(client.http().get(&url).query(&[
                ("onlyActiveTags", "true"),
                ("limit", limit.as_str()),
                ("page", page.to_string().as_str()),
            ]));
            let body: TagPage = client.send_json(&self.name, request).await?;

            // A server that ignores `page` keeps answering with the first page
            let first = body.tags.first().map(|t| t.name.clone());
            if first.is_none() || first == previous_first {
                if first.is_some() {
                    tracing::warn!(
                        repository = %repository,
                        page,
                        "Quay returned a repeated tag page, stopping pagination"
                    );
                }
                break;
            }
            tags.extend(body.tags);

            if !body.has_additional {
                break;
            }
            previous_first = first;
            page += 1;
        }

        Ok(tags)
    }
}

impl FromParts for QuayRegistry {
    const REGISTRY_TYPE: RegistryType = RegistryType::Quay;

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
impl Registry for QuayRegistry {
    fn registry_type(&self) -> RegistryType {
        Self::REGISTRY_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.non_secret.quay_namespace
    }

    fn username(&self) -> &str {
        ""
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        require_fields(&[("quay_namespace", &self.non_secret.quay_namespace)])?;
        url::Url::parse(&self.base_url()).map_err(|e| {
            RegistryError::Validation(format!("quay_registry_url is not a valid URL: {}", e))
        })?;
        Ok(())
    }

    async fn is_valid_credential(&self, client: &RegistryClient) -> bool {
        let outcome = match self.validate() {
            Ok(()) => {
                let url = format!("{}/api/v1/repository", self.base_url());
                let request = self.authorize(
                    client
                        .http()
                        .get(&url)
                        .query(&[("namespace", self.non_secret.quay_namespace.as_str())]),
                );
                client
                    .send_json::<RepositoryPage>(&self.name, request)
                    .await
                    .map(|_| ())
            }
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
        let repositories = self.list_repositories(client).await?;
        let namespace = &self.non_secret.quay_namespace;

        let per_repo: Vec<Vec<IngestedImage>> = futures::stream::iter(repositories)
            .map(|repository| async move {
                let tags = self.list_tags(client, &repository.name).await?;
                let image_name = format!("{}/{}", namespace, repository.name);
                Ok::<_, RegistryError>(
                    tags.into_iter()
                        .map(|tag| {
                            IngestedImage::new(Self::REGISTRY_TYPE, &self.name, &image_name, tag.name)
                                .with_digest(tag.manifest_digest.as_deref())
                                .with_size(tag.size)
                                .with_created_at(tag.last_modified.as_deref())
                        })
                        .collect(),
                )
            })
            .buffer_unordered(client.concurrency())
            .try_collect()
            .await?;

        let mut images: Vec<IngestedImage> = per_repo.into_iter().flatten().collect();
        images.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tag.cmp(&b.tag)));

        tracing::info!(
            registry = %self.name,
            namespace = %namespace,
            count = images.len(),
            "Fetched images from Quay"
        );
        Ok(images)
    }
}

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::encryption::EncryptionProvider;
use crate::error::{BlobKind, Result};
use crate::registry::models::{from_string_map, to_string_map, SecretString, StringMap};
use crate::registry::providers::{credential_outcome, decode_payload, open, seal, FromParts};
use crate::registry::{
    require_fields, validate_name, IngestedImage, Registry, RegistryClient, RegistryType,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonSecret {
    pub docker_hub_namespace: String,
    pub docker_hub_username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    /// Password or personal access token
    pub docker_hub_password: SecretString,
}

/// A Docker Hub namespace (user or organization)
///
/// Username and password are optional: without them only public repositories
/// of the namespace are listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerHubRegistry {
    pub name: String,
    pub non_secret: NonSecret,
    pub secret: Secret,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct HubPage<T> {
    #[serde(default)]
    next: Option<String>,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HubRepository {
    name: String,
}

#[derive(Debug, Deserialize)]
struct HubTag {
    name: String,
    #[serde(default)]
    full_size: Option<u64>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    digest: Option<String>,
}

impl DockerHubRegistry {
    fn has_credentials(&self) -> bool {
        !self.non_secret.docker_hub_username.is_empty()
            && !self.secret.docker_hub_password.is_empty()
    }

    /// JWT for the Hub API, or `None` for anonymous access
    async fn login(&self, client: &RegistryClient) -> Result<Option<String>> {
        if !self.has_credentials() {
            return Ok(None);
        }

        let url = format!("{}/v2/users/login", client.docker_hub_url());
        let request = client.http().post(&url).json(&LoginRequest {
            username: &self.non_secret.docker_hub_username,
            password: self.secret.docker_hub_password.expose(),
        });
        let response: LoginResponse = client.send_json(&self.name, request).await?;
        Ok(Some(response.token))
    }

    /// Follow `next` links until the listing is exhausted
    async fn get_all<T: DeserializeOwned>(
        &self,
        client: &RegistryClient,
        first_url: String,
        token: Option<&str>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first_url);

        while let Some(url) = next.take() {
            let mut request = client.http().get(&url);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            let page: HubPage<T> = client.send_json(&self.name, request).await?;
            items.extend(page.results);
            next = page.next.filter(|n| !n.is_empty() && *n != url);
        }

        Ok(items)
    }

    fn repositories_url(&self, client: &RegistryClient) -> String {
        format!(
            "{}/v2/repositories/{}/?page_size={}",
            client.docker_hub_url(),
            urlencoding::encode(&self.non_secret.docker_hub_namespace),
            client.page_size()
        )
    }
}

impl FromParts for DockerHubRegistry {
    const REGISTRY_TYPE: RegistryType = RegistryType::DockerHub;

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
impl Registry for DockerHubRegistry {
    fn registry_type(&self) -> RegistryType {
        Self::REGISTRY_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.non_secret.docker_hub_namespace
    }

    fn username(&self) -> &str {
        &self.non_secret.docker_hub_username
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        require_fields(&[(
            "docker_hub_namespace",
            &self.non_secret.docker_hub_namespace,
        )])?;
        // A username without a password (or the reverse) is a typo, not anonymous access
        if self.non_secret.docker_hub_username.is_empty() != self.secret.docker_hub_password.is_empty()
        {
            require_fields(&[
                ("docker_hub_username", &self.non_secret.docker_hub_username),
                ("docker_hub_password", self.secret.docker_hub_password.expose()),
            ])?;
        }
        Ok(())
    }

    async fn is_valid_credential(&self, client: &RegistryClient) -> bool {
        let outcome = match self.validate() {
            Ok(()) if self.has_credentials() => self.login(client).await.map(|_| ()),
            Ok(()) => {
                let url = self.repositories_url(client);
                client
                    .send_json::<HubPage<HubRepository>>(&self.name, client.http().get(&url))
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
        let token = self.login(client).await?;
        let token = token.as_deref();
        let namespace = &self.non_secret.docker_hub_namespace;

        let repositories: Vec<HubRepository> = self
            .get_all(client, self.repositories_url(client), token)
            .await?;
        tracing::debug!(
            namespace = %namespace,
            count = repositories.len(),
            "Listed Docker Hub repositories"
        );

        let per_repo: Vec<Vec<IngestedImage>> = futures::stream::iter(repositories)
            .map(|repository| async move {
                let url = format!(
                    "{}/v2/repositories/{}/{}/tags/?page_size={}",
                    client.docker_hub_url(),
                    urlencoding::encode(namespace),
                    urlencoding::encode(&repository.name),
                    client.page_size()
                );
                let tags: Vec<HubTag> = self.get_all(client, url, token).await?;
                let image_name = format!("{}/{}", namespace, repository.name);
                Ok::<_, crate::error::RegistryError>(
                    tags.into_iter()
                        .map(|tag| {
                            IngestedImage::new(Self::REGISTRY_TYPE, &self.name, &image_name, tag.name)
                                .with_digest(tag.digest.as_deref())
                                .with_size(tag.full_size)
                                .with_created_at(tag.last_updated.as_deref())
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
            count = images.len(),
            "Fetched images from Docker Hub"
        );
        Ok(images)
    }
}

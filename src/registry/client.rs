//! HTTP collaborator used by registry handles to check credentials and list images
//!
//! Speaks the Docker Registry HTTP API v2 directly (catalog, tag listing, basic and
//! bearer-token authentication) and exposes a small JSON helper for the
//! provider-specific REST APIs (Docker Hub, Quay).

use std::collections::HashMap;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};

use crate::error::{RegistryError, Result};
use crate::registry::{IngestedImage, RegistryType};
use crate::settings::HttpSettings;

/// Shared HTTP client with the registry-facing settings applied
#[derive(Clone)]
pub struct RegistryClient {
    http: Client,
    docker_hub_url: String,
    page_size: u32,
    concurrency: usize,
}

/// Username/password pair sent as HTTP basic auth
#[derive(Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A Docker Registry v2 API root, e.g. `https://registry.example.com`
///
/// Some products mount the API below a path (JFrog: `<url>/artifactory/api/docker/<repo>`);
/// `base_url` is everything before `/v2/`.
#[derive(Debug, Clone)]
pub struct V2Endpoint {
    pub base_url: String,
    pub credentials: Option<BasicCredentials>,
    /// Registry display name used in errors and logs
    pub label: String,
}

impl V2Endpoint {
    pub fn new(base_url: &str, label: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            credentials: None,
            label: label.to_string(),
        }
    }

    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        if !username.is_empty() || !password.is_empty() {
            self.credentials = Some(BasicCredentials {
                username: username.to_string(),
                password: password.to_string(),
            });
        }
        self
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}/v2/{}", self.base_url, path_and_query)
    }
}

/// Strip trailing slashes and add `https://` when no scheme is given
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagsPage {
    name: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Parsed `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    /// Parse `Bearer realm="...",service="...",scope="..."`
    fn parse(header_value: &str) -> Option<Self> {
        let params_str = header_value
            .strip_prefix("Bearer ")
            .or_else(|| header_value.strip_prefix("bearer "))?;

        let mut params = HashMap::new();
        let mut rest = params_str.trim();
        while !rest.is_empty() {
            let eq = rest.find('=')?;
            let key = rest[..eq].trim().trim_start_matches(',').trim();
            rest = rest[eq + 1..].trim_start();

            let value;
            if let Some(stripped) = rest.strip_prefix('"') {
                let end = stripped.find('"')?;
                value = &stripped[..end];
                rest = &stripped[end + 1..];
            } else {
                let end = rest.find(',').unwrap_or(rest.len());
                value = rest[..end].trim();
                rest = &rest[end..];
            }
            params.insert(key.to_ascii_lowercase(), value.to_string());
            rest = rest.trim_start().trim_start_matches(',').trim_start();
        }

        Some(Self {
            realm: params.remove("realm")?,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}

/// Query string of the `rel="next"` target in a `Link` header
fn next_page_query(response: &Response) -> Option<String> {
    let link = response.headers().get(header::LINK)?.to_str().ok()?;
    link.split(',')
        .find(|part| part.contains("rel=\"next\""))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            let target = &part[start..end];
            target.split_once('?').map(|(_, query)| query.to_string())
        })
}

impl RegistryClient {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .map_err(|e| RegistryError::network("http client", e))?;

        Ok(Self {
            http,
            docker_hub_url: settings.docker_hub_url.trim_end_matches('/').to_string(),
            page_size: settings.page_size.max(1),
            concurrency: settings.concurrency.max(1),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn docker_hub_url(&self) -> &str {
        &self.docker_hub_url
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Send a request and decode a JSON body, mapping HTTP failures to registry errors
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        label: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::network(label, e))?;
        let response = check_status(label, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RegistryError::response(label, format!("invalid JSON body: {}", e)))
    }

    /// `GET /v2/` with the endpoint's credentials
    pub async fn ping_v2(&self, endpoint: &V2Endpoint) -> Result<()> {
        let response = self.get_v2(endpoint, "").await?;
        check_status(&endpoint.label, response).await?;
        Ok(())
    }

    /// Every repository in the catalog, optionally restricted to names under `prefix/`
    pub async fn list_v2_repositories(
        &self,
        endpoint: &V2Endpoint,
        prefix: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut repositories = Vec::new();
        let mut query = format!("n={}", self.page_size);

        loop {
            let response = self
                .get_v2(endpoint, &format!("_catalog?{}", query))
                .await?;
            let response = check_status(&endpoint.label, response).await?;
            let next = next_page_query(&response);
            let page: CatalogPage = response.json().await.map_err(|e| {
                RegistryError::response(&endpoint.label, format!("invalid catalog: {}", e))
            })?;

            repositories.extend(page.repositories.unwrap_or_default());

            match next {
                Some(next) if next != query => query = next,
                _ => break,
            }
        }

        if let Some(prefix) = prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            let scoped = format!("{}/", prefix);
            repositories.retain(|repo| repo.starts_with(&scoped));
        }

        tracing::debug!(
            registry = %endpoint.label,
            count = repositories.len(),
            "Listed v2 catalog"
        );
        Ok(repositories)
    }

    /// Every tag of one repository
    pub async fn list_v2_tags(&self, endpoint: &V2Endpoint, repository: &str) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut query = format!("n={}", self.page_size);

        loop {
            let response = self
                .get_v2(endpoint, &format!("{}/tags/list?{}", repository, query))
                .await?;
            let response = check_status(&endpoint.label, response).await?;
            let next = next_page_query(&response);
            let page: TagsPage = response.json().await.map_err(|e| {
                RegistryError::response(
                    &endpoint.label,
                    format!("invalid tag list for {}: {}", repository, e),
                )
            })?;

            if page.name != repository {
                tracing::debug!(
                    requested = %repository,
                    returned = %page.name,
                    "Registry returned a different repository name"
                );
            }
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(next) if next != query => query = next,
                _ => break,
            }
        }

        Ok(tags)
    }

    /// Catalog plus tags for every repository, as ingestion records
    pub async fn list_v2_images(
        &self,
        endpoint: &V2Endpoint,
        prefix: Option<&str>,
        registry_type: RegistryType,
        registry_name: &str,
    ) -> Result<Vec<IngestedImage>> {
        let repositories = self.list_v2_repositories(endpoint, prefix).await?;

        let per_repo: Vec<Vec<IngestedImage>> = futures::stream::iter(repositories)
            .map(|repository| async move {
                let tags = self.list_v2_tags(endpoint, &repository).await?;
                Ok::<_, RegistryError>(
                    tags.into_iter()
                        .map(|tag| {
                            IngestedImage::new(registry_type, registry_name, &repository, tag)
                        })
                        .collect(),
                )
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut images: Vec<IngestedImage> = per_repo.into_iter().flatten().collect();
        images.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tag.cmp(&b.tag)));

        tracing::info!(
            registry = %endpoint.label,
            count = images.len(),
            "Fetched images from registry"
        );
        Ok(images)
    }

    /// GET a v2 path, answering a bearer challenge once if the registry issues one
    async fn get_v2(&self, endpoint: &V2Endpoint, path_and_query: &str) -> Result<Response> {
        let url = endpoint.url(path_and_query);
        tracing::debug!(url = %url, "Registry v2 request");

        let mut request = self.http.get(&url);
        if let Some(creds) = &endpoint.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::network(&endpoint.label, e))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse);

        let Some(challenge) = challenge else {
            return Ok(response);
        };

        let token = self.fetch_bearer_token(endpoint, &challenge).await?;
        self.http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RegistryError::network(&endpoint.label, e))
    }

    async fn fetch_bearer_token(
        &self,
        endpoint: &V2Endpoint,
        challenge: &BearerChallenge,
    ) -> Result<String> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope));
        }

        let mut request = self.http.get(&challenge.realm).query(&query);
        if let Some(creds) = &endpoint.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let token: TokenResponse = self.send_json(&endpoint.label, request).await?;
        token
            .token
            .or(token.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::auth(&endpoint.label, "token endpoint returned no token"))
    }
}

/// Map non-success statuses to `Auth` (401/403) or `Response` errors
pub(crate) async fn check_status(label: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.chars().take(200).collect::<String>())
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::auth(label, detail)),
        _ => Err(RegistryError::response(label, detail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::{basic_header, spawn_server, test_client};
    use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use serde_json::json;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:library/nginx:pull,push")
        );

        assert!(BearerChallenge::parse(r#"Basic realm="registry""#).is_none());
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("registry.example.com/"),
            "https://registry.example.com"
        );
        assert_eq!(
            normalize_base_url("http://localhost:5000"),
            "http://localhost:5000"
        );
        assert_eq!(
            normalize_base_url("  https://myacr.azurecr.io//"),
            "https://myacr.azurecr.io"
        );
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == basic_header("bot", "s3cret"))
            .unwrap_or(false)
    }

    fn basic_router() -> Router {
        async fn ping(headers: HeaderMap) -> impl IntoResponse {
            if authorized(&headers) {
                (AxumStatus::OK, Json(json!({}))).into_response()
            } else {
                (
                    AxumStatus::UNAUTHORIZED,
                    [("www-authenticate", "Basic realm=\"test\"")],
                )
                    .into_response()
            }
        }

        async fn catalog(
            headers: HeaderMap,
            Query(query): Query<HashMap<String, String>>,
        ) -> impl IntoResponse {
            if !authorized(&headers) {
                return AxumStatus::UNAUTHORIZED.into_response();
            }
            if query.contains_key("last") {
                Json(json!({ "repositories": ["team/api"] })).into_response()
            } else {
                (
                    [("link", "</v2/_catalog?last=library%2Fnginx&n=2>; rel=\"next\"")],
                    Json(json!({ "repositories": ["library/nginx", "other/tool"] })),
                )
                    .into_response()
            }
        }

        async fn tags(headers: HeaderMap, Path(rest): Path<String>) -> impl IntoResponse {
            if !authorized(&headers) {
                return AxumStatus::UNAUTHORIZED.into_response();
            }
            let Some(repo) = rest.strip_suffix("/tags/list") else {
                return AxumStatus::NOT_FOUND.into_response();
            };
            let tags = match repo {
                "library/nginx" => vec!["1.25", "latest"],
                "team/api" => vec!["v2"],
                _ => vec![],
            };
            Json(json!({ "name": repo, "tags": tags })).into_response()
        }

        Router::new()
            .route("/v2/", get(ping))
            .route("/v2/_catalog", get(catalog))
            .route("/v2/{*rest}", get(tags))
    }

    #[tokio::test]
    async fn test_ping_with_basic_auth() {
        let base = spawn_server(|_| basic_router()).await;
        let client = test_client(&base);

        let good = V2Endpoint::new(&base, "private").with_basic_auth("bot", "s3cret");
        client.ping_v2(&good).await.unwrap();

        let bad = V2Endpoint::new(&base, "private").with_basic_auth("bot", "wrong");
        let err = client.ping_v2(&bad).await.unwrap_err();
        assert!(matches!(err, RegistryError::Auth { .. }));
    }

    #[tokio::test]
    async fn test_catalog_follows_link_pagination() {
        let base = spawn_server(|_| basic_router()).await;
        let client = test_client(&base);
        let endpoint = V2Endpoint::new(&base, "private").with_basic_auth("bot", "s3cret");

        let repos = client.list_v2_repositories(&endpoint, None).await.unwrap();
        assert_eq!(repos, vec!["library/nginx", "other/tool", "team/api"]);

        let scoped = client
            .list_v2_repositories(&endpoint, Some("library"))
            .await
            .unwrap();
        assert_eq!(scoped, vec!["library/nginx"]);
    }

    #[tokio::test]
    async fn test_list_images_collects_tags_sorted() {
        let base = spawn_server(|_| basic_router()).await;
        let client = test_client(&base);
        let endpoint = V2Endpoint::new(&base, "private").with_basic_auth("bot", "s3cret");

        let images = client
            .list_v2_images(&endpoint, None, RegistryType::DockerPrivate, "private")
            .await
            .unwrap();

        let names: Vec<String> = images.iter().map(|i| i.node_id.clone()).collect();
        assert_eq!(
            names,
            vec!["library/nginx:1.25", "library/nginx:latest", "team/api:v2"]
        );
        assert!(images
            .iter()
            .all(|i| i.registry_type == RegistryType::DockerPrivate));
    }

    #[derive(Clone)]
    struct TokenState {
        realm: String,
    }

    fn bearer_router(base: &str) -> Router {
        async fn challenge_or<T: IntoResponse>(
            state: &TokenState,
            headers: &HeaderMap,
            ok: T,
        ) -> axum::response::Response {
            let bearer_ok = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(|v| v == "Bearer tok-123")
                .unwrap_or(false);
            if bearer_ok {
                ok.into_response()
            } else {
                let value = format!(
                    "Bearer realm=\"{}\",service=\"test-registry\",scope=\"registry:catalog:*\"",
                    state.realm
                );
                (AxumStatus::UNAUTHORIZED, [("www-authenticate", value)]).into_response()
            }
        }

        async fn ping(State(state): State<TokenState>, headers: HeaderMap) -> axum::response::Response {
            challenge_or(&state, &headers, Json(json!({}))).await
        }

        async fn catalog(
            State(state): State<TokenState>,
            headers: HeaderMap,
        ) -> axum::response::Response {
            challenge_or(&state, &headers, Json(json!({ "repositories": ["app"] }))).await
        }

        async fn token(
            headers: HeaderMap,
            Query(query): Query<HashMap<String, String>>,
        ) -> impl IntoResponse {
            let service_ok = query.get("service").map(String::as_str) == Some("test-registry");
            if authorized(&headers) && service_ok {
                Json(json!({ "token": "tok-123" })).into_response()
            } else {
                AxumStatus::UNAUTHORIZED.into_response()
            }
        }

        Router::new()
            .route("/v2/", get(ping))
            .route("/v2/_catalog", get(catalog))
            .route("/token", get(token))
            .with_state(TokenState {
                realm: format!("{}/token", base),
            })
    }

    #[tokio::test]
    async fn test_bearer_challenge_is_answered() {
        let base = spawn_server(bearer_router).await;
        let client = test_client(&base);

        let endpoint = V2Endpoint::new(&base, "acr").with_basic_auth("bot", "s3cret");
        client.ping_v2(&endpoint).await.unwrap();
        let repos = client.list_v2_repositories(&endpoint, None).await.unwrap();
        assert_eq!(repos, vec!["app"]);

        let wrong = V2Endpoint::new(&base, "acr").with_basic_auth("bot", "nope");
        let err = client.ping_v2(&wrong).await.unwrap_err();
        assert!(matches!(err, RegistryError::Auth { .. }));
    }
}

//! In-process registry servers for tests

use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::registry::RegistryClient;
use crate::settings::HttpSettings;

/// Serve `build(base_url)` on an ephemeral local port and return its base URL
pub(crate) async fn spawn_server<F>(build: F) -> String
where
    F: FnOnce(&str) -> Router,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let router = build(&base);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    base
}

/// A client whose Docker Hub API points at `docker_hub_url`
pub(crate) fn test_client(docker_hub_url: &str) -> RegistryClient {
    let settings = HttpSettings {
        timeout_secs: 5,
        docker_hub_url: docker_hub_url.to_string(),
        page_size: 2,
        ..HttpSettings::default()
    };
    RegistryClient::new(&settings).unwrap()
}

pub(crate) fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{}:{}", username, password)))
}

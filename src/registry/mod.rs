pub mod client;
pub mod factory;
pub mod models;
pub mod providers;
#[cfg(test)]
pub(crate) mod testing;

pub use client::RegistryClient;
pub use factory::{from_payload, from_row, from_safe_row};
pub use models::{ContainerRegistryRow, ContainerRegistrySafeRow, IngestedImage, StringMap};

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionProvider;
use crate::error::{RegistryError, Result};

/// The closed set of supported registry providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryType {
    #[serde(rename = "docker_hub")]
    DockerHub,
    #[serde(rename = "quay")]
    Quay,
    #[serde(rename = "google_container_registry")]
    Gcr,
    #[serde(rename = "azure_container_registry")]
    Acr,
    #[serde(rename = "docker_private_registry")]
    DockerPrivate,
    #[serde(rename = "harbor")]
    Harbor,
    #[serde(rename = "jfrog_container_registry")]
    Jfrog,
    #[serde(rename = "amazon_ecr")]
    Ecr,
}

impl RegistryType {
    pub const ALL: [RegistryType; 8] = [
        RegistryType::DockerHub,
        RegistryType::Quay,
        RegistryType::Gcr,
        RegistryType::Acr,
        RegistryType::DockerPrivate,
        RegistryType::Harbor,
        RegistryType::Jfrog,
        RegistryType::Ecr,
    ];

    /// The type tag as stored in rows and sent by clients
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::DockerHub => "docker_hub",
            RegistryType::Quay => "quay",
            RegistryType::Gcr => "google_container_registry",
            RegistryType::Acr => "azure_container_registry",
            RegistryType::DockerPrivate => "docker_private_registry",
            RegistryType::Harbor => "harbor",
            RegistryType::Jfrog => "jfrog_container_registry",
            RegistryType::Ecr => "amazon_ecr",
        }
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        RegistryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RegistryError::UnsupportedType(s.to_string()))
    }
}

/// Capability set every registry provider implements
///
/// A handle is a flat record of non-secret, secret and (optionally) extras
/// fields. Encryption calls replace the secret or extras set only when every
/// field succeeded; on error the handle is unchanged.
#[async_trait]
pub trait Registry: Send + Sync + fmt::Debug {
    fn registry_type(&self) -> RegistryType;

    /// Display name chosen by the user
    fn name(&self) -> &str;

    fn namespace(&self) -> &str;

    /// Empty for providers that authenticate without a user name
    fn username(&self) -> &str;

    /// Required-field checks; construction itself tolerates missing fields
    fn validate(&self) -> Result<()>;

    /// Whether the registry accepts these credentials
    ///
    /// Invalid configuration and failed authentication both yield `false`.
    async fn is_valid_credential(&self, client: &RegistryClient) -> bool;

    async fn encrypt_secret(&mut self, cipher: &dyn EncryptionProvider) -> Result<()>;

    async fn decrypt_secret(&mut self, cipher: &dyn EncryptionProvider) -> Result<()>;

    /// No-op for providers without extras
    async fn encrypt_extras(&mut self, _cipher: &dyn EncryptionProvider) -> Result<()> {
        Ok(())
    }

    /// No-op for providers without extras
    async fn decrypt_extras(&mut self, _cipher: &dyn EncryptionProvider) -> Result<()> {
        Ok(())
    }

    fn non_secret(&self) -> StringMap;

    fn secret(&self) -> StringMap;

    fn extras(&self) -> StringMap {
        StringMap::new()
    }

    /// List every image tag visible with these credentials
    async fn fetch_images(&self, client: &RegistryClient) -> Result<Vec<IngestedImage>>;
}

/// Check the display name constraints shared by all providers
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if !(2..=64).contains(&len) {
        return Err(RegistryError::Validation(format!(
            "name must be between 2 and 64 characters, got {}",
            len
        )));
    }
    Ok(())
}

/// Fail on the first empty field among `(field name, value)` pairs
pub(crate) fn require_fields(fields: &[(&str, &str)]) -> Result<()> {
    for (field, value) in fields {
        if value.trim().is_empty() {
            return Err(RegistryError::Validation(format!("{} is required", field)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for registry_type in RegistryType::ALL {
            let parsed: RegistryType = registry_type.as_str().parse().unwrap();
            assert_eq!(parsed, registry_type);

            let json = serde_json::to_string(&registry_type).unwrap();
            assert_eq!(json, format!("\"{}\"", registry_type.as_str()));
        }
    }

    #[test]
    fn test_unknown_tag_is_unsupported() {
        let err = "nope".parse::<RegistryType>().unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedType(ref tag) if tag == "nope"));
    }

    #[test]
    fn test_validate_name_bounds() {
        assert!(validate_name("a").is_err());
        assert!(validate_name("ok").is_ok());
        assert!(validate_name(&"x".repeat(64)).is_ok());
        assert!(validate_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_require_fields_names_first_missing() {
        let err = require_fields(&[("docker_username", "bot"), ("docker_password", " ")])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid registry configuration: docker_password is required"
        );
    }
}

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{BlobKind, RegistryError, Result};
use crate::registry::{Registry, RegistryType};

/// Flat string-keyed field set, the shape of every persisted blob
pub type StringMap = BTreeMap<String, String>;

/// A credential value whose `Debug` output is redacted
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("\"<redacted>\"")
        }
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A persisted registry record with secrets (`GetContainerRegistriesRow`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRegistryRow {
    pub registry_type: String,
    pub name: String,
    /// JSON object of non-secret fields
    pub non_secret: Vec<u8>,
    /// JSON object of encrypted secret fields
    pub encrypted_secret: Vec<u8>,
    /// JSON object of provider extras (encrypted where the provider requires it)
    pub extras: Vec<u8>,
}

/// A persisted registry record without secrets (`GetContainerRegistriesSafeRow`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRegistrySafeRow {
    pub registry_type: String,
    pub name: String,
    pub non_secret: Vec<u8>,
}

impl ContainerRegistryRow {
    /// Serialize a handle into a row
    ///
    /// The handle's secret and extras are written as they currently are, so
    /// callers encrypt them first.
    pub fn from_registry(registry: &dyn Registry) -> Result<Self> {
        Ok(Self {
            registry_type: registry.registry_type().as_str().to_string(),
            name: registry.name().to_string(),
            non_secret: encode_blob(&registry.non_secret(), BlobKind::NonSecret)?,
            encrypted_secret: encode_blob(&registry.secret(), BlobKind::Secret)?,
            extras: encode_blob(&registry.extras(), BlobKind::Extras)?,
        })
    }
}

impl From<&ContainerRegistryRow> for ContainerRegistrySafeRow {
    fn from(row: &ContainerRegistryRow) -> Self {
        Self {
            registry_type: row.registry_type.clone(),
            name: row.name.clone(),
            non_secret: row.non_secret.clone(),
        }
    }
}

/// One image tag discovered in a registry, in the shape the ingestion pipeline consumes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestedImage {
    /// Manifest digest when the registry reports one, otherwise `name:tag`
    #[serde(rename = "docker_image_id")]
    pub id: String,
    pub node_id: String,
    #[serde(rename = "docker_image_name")]
    pub name: String,
    #[serde(rename = "docker_image_tag")]
    pub tag: String,
    /// Compressed size in bytes, when known
    #[serde(rename = "docker_image_size", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(
        rename = "docker_image_created_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    pub registry_type: RegistryType,
    pub registry_name: String,
}

impl IngestedImage {
    pub fn new(
        registry_type: RegistryType,
        registry_name: &str,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let tag = tag.into();
        let node_id = format!("{}:{}", name, tag);
        Self {
            id: node_id.clone(),
            node_id,
            name,
            tag,
            size: None,
            created_at: None,
            registry_type,
            registry_name: registry_name.to_string(),
        }
    }

    pub fn with_digest(mut self, digest: Option<&str>) -> Self {
        if let Some(digest) = digest.filter(|d| !d.is_empty()) {
            self.id = digest.to_string();
        }
        self
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    /// Accepts RFC 3339 or RFC 2822 timestamps; anything else is dropped
    pub fn with_created_at(mut self, timestamp: Option<&str>) -> Self {
        self.created_at = timestamp.and_then(parse_timestamp);
        self
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Decode a stored blob as a flat string map
///
/// An empty blob or a JSON `null` decodes as an empty map.
pub(crate) fn decode_blob(blob: &[u8], part: BlobKind) -> Result<StringMap> {
    if blob.iter().all(u8::is_ascii_whitespace) {
        return Ok(StringMap::new());
    }
    let map: Option<StringMap> =
        serde_json::from_slice(blob).map_err(|e| RegistryError::decode(part, e))?;
    Ok(map.unwrap_or_default())
}

pub(crate) fn encode_blob(map: &StringMap, part: BlobKind) -> Result<Vec<u8>> {
    serde_json::to_vec(map).map_err(|e| RegistryError::decode(part, e))
}

/// Flatten a field struct into its string map
///
/// Field structs hold only strings, so every value is a JSON string.
pub(crate) fn to_string_map<T: Serialize>(fields: &T) -> StringMap {
    match serde_json::to_value(fields) {
        Ok(serde_json::Value::Object(object)) => object
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        _ => StringMap::new(),
    }
}

/// Pluck a field struct out of a string map; absent keys become empty strings
pub(crate) fn from_string_map<T: DeserializeOwned>(map: StringMap, part: BlobKind) -> Result<T> {
    let object: serde_json::Map<String, serde_json::Value> = map
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| RegistryError::decode(part, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Fields {
        harbor_registry_url: String,
        harbor_project_name: String,
    }

    #[test]
    fn test_decode_blob_accepts_empty_and_null() {
        assert!(decode_blob(b"", BlobKind::Extras).unwrap().is_empty());
        assert!(decode_blob(b"null", BlobKind::Extras).unwrap().is_empty());
        assert!(decode_blob(b"{}", BlobKind::Extras).unwrap().is_empty());
    }

    #[test]
    fn test_decode_blob_rejects_non_string_values() {
        let err = decode_blob(br#"{"port": 5000}"#, BlobKind::NonSecret).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Decode {
                part: BlobKind::NonSecret,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_key_becomes_empty_field() {
        let mut map = StringMap::new();
        map.insert(
            "harbor_registry_url".to_string(),
            "https://harbor.local".to_string(),
        );
        map.insert("unrelated".to_string(), "ignored".to_string());

        let fields: Fields = from_string_map(map, BlobKind::NonSecret).unwrap();
        assert_eq!(fields.harbor_registry_url, "https://harbor.local");
        assert_eq!(fields.harbor_project_name, "");
    }

    #[test]
    fn test_to_string_map_lists_every_field() {
        let fields = Fields {
            harbor_registry_url: "https://harbor.local".to_string(),
            harbor_project_name: String::new(),
        };
        let map = to_string_map(&fields);
        assert_eq!(map.len(), 2);
        assert_eq!(map["harbor_project_name"], "");
    }

    #[test]
    fn test_ingested_image_serializes_with_ingestion_names() {
        let image = IngestedImage::new(RegistryType::Harbor, "prod", "library/nginx", "1.25")
            .with_digest(Some("sha256:abc"))
            .with_size(Some(42))
            .with_created_at(Some("2024-03-01T10:00:00Z"));

        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["docker_image_id"], "sha256:abc");
        assert_eq!(json["node_id"], "library/nginx:1.25");
        assert_eq!(json["docker_image_name"], "library/nginx");
        assert_eq!(json["docker_image_tag"], "1.25");
        assert_eq!(json["docker_image_size"], 42);
        assert_eq!(json["registry_type"], "harbor");
    }

    #[test]
    fn test_secret_string_redacts_debug_but_not_json() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{:?}", secret), "\"<redacted>\"");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"hunter2\"");
        assert_eq!(format!("{:?}", SecretString::default()), "\"\"");
    }

    #[test]
    fn test_created_at_accepts_rfc2822() {
        let image = IngestedImage::new(RegistryType::Quay, "q", "ns/app", "v1")
            .with_created_at(Some("Fri, 01 Mar 2024 10:00:00 -0000"));
        assert!(image.created_at.is_some());

        let image = image.with_created_at(Some("yesterday"));
        assert!(image.created_at.is_none());
    }
}

//! Construction of registry handles from request payloads and persisted rows
//!
//! The type tag selects a provider exactly once, in [`constructors`]. Each
//! provider contributes its three constructors through [`FromParts`], so adding
//! a provider means adding an enum variant and one match arm.

use serde::Deserialize;

use crate::error::{BlobKind, RegistryError, Result};
use crate::registry::models::{decode_blob, ContainerRegistryRow, ContainerRegistrySafeRow, StringMap};
use crate::registry::providers::{
    payload_object, AcrRegistry, DockerHubRegistry, DockerPrivateRegistry, EcrRegistry, FromParts,
    GcrRegistry, HarborRegistry, JfrogRegistry, QuayRegistry,
};
use crate::registry::{Registry, RegistryType};

type PayloadFn = fn(&[u8]) -> Result<Box<dyn Registry>>;
type PartsFn = fn(String, StringMap, StringMap, StringMap) -> Result<Box<dyn Registry>>;

/// Type-erased constructors of one provider
struct Constructors {
    from_payload: PayloadFn,
    from_parts: PartsFn,
}

impl Constructors {
    const fn of<R: FromParts>() -> Self {
        Self {
            from_payload: payload_of::<R>,
            from_parts: parts_of::<R>,
        }
    }
}

fn payload_of<R: FromParts>(payload: &[u8]) -> Result<Box<dyn Registry>> {
    Ok(Box::new(R::from_payload(payload)?))
}

fn parts_of<R: FromParts>(
    name: String,
    non_secret: StringMap,
    secret: StringMap,
    extras: StringMap,
) -> Result<Box<dyn Registry>> {
    Ok(Box::new(R::from_parts(name, non_secret, secret, extras)?))
}

fn constructors(registry_type: RegistryType) -> Constructors {
    match registry_type {
        RegistryType::DockerHub => Constructors::of::<DockerHubRegistry>(),
        RegistryType::Quay => Constructors::of::<QuayRegistry>(),
        RegistryType::Gcr => Constructors::of::<GcrRegistry>(),
        RegistryType::Acr => Constructors::of::<AcrRegistry>(),
        RegistryType::DockerPrivate => Constructors::of::<DockerPrivateRegistry>(),
        RegistryType::Harbor => Constructors::of::<HarborRegistry>(),
        RegistryType::Jfrog => Constructors::of::<JfrogRegistry>(),
        RegistryType::Ecr => Constructors::of::<EcrRegistry>(),
    }
}

/// Optional `registry_type` a client may repeat inside the payload body
#[derive(Debug, Default, Deserialize)]
struct PayloadHeader {
    #[serde(default)]
    registry_type: Option<String>,
}

/// Build a handle from a create/update request body
///
/// Secrets in the payload are plaintext; nothing is encrypted here.
pub fn from_payload(registry_type: &str, payload: &[u8]) -> Result<Box<dyn Registry>> {
    let parsed: RegistryType = registry_type.parse()?;

    let header: PayloadHeader = serde_json::from_value(payload_object(payload)?)
        .map_err(|e| RegistryError::decode(BlobKind::Payload, e))?;
    if let Some(declared) = header.registry_type.filter(|d| !d.is_empty()) {
        if declared != parsed.as_str() {
            return Err(RegistryError::TypeMismatch {
                declared,
                expected: parsed.as_str().to_string(),
            });
        }
    }

    let registry = (constructors(parsed).from_payload)(payload)?;
    tracing::debug!(
        registry_type = %parsed,
        name = %registry.name(),
        "Built registry from payload"
    );
    Ok(registry)
}

/// Build a handle from a stored row, secrets still encrypted
pub fn from_row(row: &ContainerRegistryRow) -> Result<Box<dyn Registry>> {
    let parsed: RegistryType = row.registry_type.parse()?;

    let non_secret = decode_blob(&row.non_secret, BlobKind::NonSecret)?;
    let secret = decode_blob(&row.encrypted_secret, BlobKind::Secret)?;
    let extras = decode_blob(&row.extras, BlobKind::Extras)?;

    (constructors(parsed).from_parts)(row.name.clone(), non_secret, secret, extras)
}

/// Build a handle from a stored row without secrets; secret and extras stay empty
pub fn from_safe_row(row: &ContainerRegistrySafeRow) -> Result<Box<dyn Registry>> {
    let parsed: RegistryType = row.registry_type.parse()?;

    let non_secret = decode_blob(&row.non_secret, BlobKind::NonSecret)?;

    (constructors(parsed).from_parts)(
        row.name.clone(),
        non_secret,
        StringMap::new(),
        StringMap::new(),
    )
}

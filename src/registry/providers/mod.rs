pub mod acr;
pub mod docker_private;
pub mod dockerhub;
pub mod ecr;
pub mod gcr;
pub mod harbor;
pub mod jfrog;
pub mod quay;

pub use acr::AcrRegistry;
pub use docker_private::DockerPrivateRegistry;
pub use dockerhub::DockerHubRegistry;
pub use ecr::EcrRegistry;
pub use gcr::GcrRegistry;
pub use harbor::HarborRegistry;
pub use jfrog::JfrogRegistry;
pub use quay::QuayRegistry;

use serde::{de::DeserializeOwned, Serialize};

use crate::encryption::{decrypt_map, encrypt_map, EncryptionProvider};
use crate::error::{BlobKind, RegistryError, Result};
use crate::registry::models::{from_string_map, to_string_map, StringMap};
use crate::registry::{Registry, RegistryType};

/// Construction hooks the factory dispatches to
pub(crate) trait FromParts: Registry + Sized + 'static {
    const REGISTRY_TYPE: RegistryType;

    /// Decode a create/update request body
    fn from_payload(payload: &[u8]) -> Result<Self>;

    /// Assemble from decoded row maps; absent keys become empty fields
    fn from_parts(
        name: String,
        non_secret: StringMap,
        secret: StringMap,
        extras: StringMap,
    ) -> Result<Self>;
}

/// Parse a request body that must be a JSON object
///
/// Handle structs default every field, so serde would also fill them from an array.
pub(crate) fn payload_object(payload: &[u8]) -> Result<serde_json::Value> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| RegistryError::decode(BlobKind::Payload, e))?;
    if !value.is_object() {
        return Err(RegistryError::decode(
            BlobKind::Payload,
            <serde_json::Error as serde::de::Error>::custom("payload must be a JSON object"),
        ));
    }
    Ok(value)
}

pub(crate) fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_value(payload_object(payload)?)
        .map_err(|e| RegistryError::decode(BlobKind::Payload, e))
}

/// Encrypt every field of a field struct, returning the sealed copy
pub(crate) async fn seal<T>(fields: &T, part: BlobKind, cipher: &dyn EncryptionProvider) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let sealed = encrypt_map(cipher, &to_string_map(fields))
        .await
        .map_err(RegistryError::Encryption)?;
    from_string_map(sealed, part)
}

/// Decrypt every field of a field struct, returning the plaintext copy
pub(crate) async fn open<T>(fields: &T, part: BlobKind, cipher: &dyn EncryptionProvider) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let opened = decrypt_map(cipher, &to_string_map(fields))
        .await
        .map_err(RegistryError::Encryption)?;
    from_string_map(opened, part)
}

/// Log why a credential check failed and turn the outcome into a boolean
pub(crate) fn credential_outcome(registry: &dyn Registry, outcome: Result<()>) -> bool {
    match outcome {
        Ok(()) => {
            tracing::info!(
                registry_type = %registry.registry_type(),
                name = %registry.name(),
                "Registry credentials are valid"
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                registry_type = %registry.registry_type(),
                name = %registry.name(),
                error = %e,
                "Registry credential check failed"
            );
            false
        }
    }
}

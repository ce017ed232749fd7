//! Credential and metadata adapters for container image registries
//!
//! A [`registry::Registry`] handle wraps the non-secret, secret and extras
//! fields of one configured registry (Docker Hub, Quay, GCR, ACR, Harbor,
//! JFrog, ECR or a generic v2 registry). Handles are built by the factory
//! functions from a request payload or a persisted row, encrypt and decrypt
//! their secrets through an [`encryption::EncryptionProvider`], check their
//! credentials and list the images they can see.

#[cfg(feature = "aws")]
pub mod aws;
pub mod encryption;
pub mod error;
pub mod registry;
pub mod settings;

pub use error::{RegistryError, Result};
pub use registry::{
    from_payload, from_row, from_safe_row, ContainerRegistryRow, ContainerRegistrySafeRow,
    IngestedImage, Registry, RegistryClient, RegistryType,
};

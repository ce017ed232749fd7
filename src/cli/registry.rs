use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use regvault::encryption::{init_provider, EncryptionProvider};
use regvault::registry::StringMap;
use regvault::settings::Settings;
use regvault::{
    from_payload, from_row, from_safe_row, ContainerRegistryRow, ContainerRegistrySafeRow,
    IngestedImage, Registry, RegistryClient,
};
use tracing::info;

use super::row::{read_input, RowDocument};

const MASK: &str = "********";

async fn require_cipher(settings: &Settings) -> Result<Arc<dyn EncryptionProvider>> {
    init_provider(settings.encryption.as_ref())
        .await?
        .context("No encryption provider configured. Set [encryption] in the config or REGVAULT_ENCRYPTION__TYPE")
}

/// Build a registry from a payload, validate it and check its credentials
pub async fn validate_command(settings: &Settings, registry_type: &str, payload: &Path) -> Result<()> {
    let body = read_input(payload)?;
    let registry = from_payload(registry_type, &body)?;
    registry.validate()?;

    let client = RegistryClient::new(&settings.http)?;
    if !registry.is_valid_credential(&client).await {
        bail!(
            "Registry '{}' ({}) rejected the credentials",
            registry.name(),
            registry.registry_type()
        );
    }

    println!(
        "✓ Credentials for '{}' ({}) are valid",
        registry.name(),
        registry.registry_type()
    );
    Ok(())
}

/// Build a registry from a payload and print the row to store, secrets encrypted
pub async fn seal_command(settings: &Settings, registry_type: &str, payload: &Path) -> Result<()> {
    let body = read_input(payload)?;
    let mut registry = from_payload(registry_type, &body)?;
    registry.validate()?;

    let cipher = require_cipher(settings).await?;
    registry
        .encrypt_secret(cipher.as_ref())
        .await
        .context("Failed to encrypt secret fields")?;
    registry
        .encrypt_extras(cipher.as_ref())
        .await
        .context("Failed to encrypt extras")?;

    let row = ContainerRegistryRow::from_registry(registry.as_ref())?;
    let document = RowDocument::from_row(&row)?;
    info!(
        name = %registry.name(),
        provider = %cipher.provider_name(),
        "Sealed registry credentials"
    );

    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

/// Print identity and fields of a stored row
pub fn show_command(row_path: &Path, safe: bool) -> Result<()> {
    let row = RowDocument::load(row_path)?.to_row()?;
    let registry = if safe {
        from_safe_row(&ContainerRegistrySafeRow::from(&row))?
    } else {
        from_row(&row)?
    };

    print_identity(registry.as_ref());
    println!();
    print_fields(registry.as_ref());
    Ok(())
}

/// Decrypt a stored row and list the images the registry exposes
pub async fn images_command(settings: &Settings, row_path: &Path, json: bool) -> Result<()> {
    let row = RowDocument::load(row_path)?.to_row()?;
    let mut registry = from_row(&row)?;

    let cipher = require_cipher(settings).await?;
    registry
        .decrypt_secret(cipher.as_ref())
        .await
        .context("Failed to decrypt secret fields")?;
    registry
        .decrypt_extras(cipher.as_ref())
        .await
        .context("Failed to decrypt extras")?;

    let client = RegistryClient::new(&settings.http)?;
    let images = registry.fetch_images(&client).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&images)?);
    } else if images.is_empty() {
        println!("No images found.");
    } else {
        print_images(&images);
    }
    Ok(())
}

fn bold(text: &str) -> Cell {
    Cell::new(text).add_attribute(Attribute::Bold)
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn print_identity(registry: &dyn Registry) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);

    table.add_row(vec![bold("Type"), Cell::new(registry.registry_type())]);
    table.add_row(vec![bold("Name"), Cell::new(registry.name())]);
    table.add_row(vec![bold("Namespace"), Cell::new(or_dash(registry.namespace()))]);
    table.add_row(vec![bold("Username"), Cell::new(or_dash(registry.username()))]);

    println!("{}", table);
}

fn print_fields(registry: &dyn Registry) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![bold("FIELD"), bold("PART"), bold("VALUE")]);

    let mut add = |part: &str, fields: StringMap, masked: bool| {
        for (key, value) in fields {
            let shown = if value.is_empty() {
                "-".to_string()
            } else if masked {
                MASK.to_string()
            } else {
                value
            };
            table.add_row(vec![Cell::new(key), Cell::new(part), Cell::new(shown)]);
        }
    };

    add("non_secret", registry.non_secret(), false);
    add("secret", registry.secret(), true);
    add("extras", registry.extras(), true);

    println!("{}", table);
}

fn print_images(images: &[IngestedImage]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            bold("IMAGE"),
            bold("TAG"),
            bold("ID"),
            bold("SIZE"),
            bold("CREATED"),
        ]);

    for image in images {
        let size = image
            .size
            .map(|s| format!("{:.1} MB", s as f64 / 1_000_000.0))
            .unwrap_or_else(|| "-".to_string());
        let created = image
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&image.name),
            Cell::new(&image.tag),
            Cell::new(&image.id),
            Cell::new(size),
            Cell::new(created),
        ]);
    }

    println!("{}", table);
    println!("{} image(s)", images.len());
}

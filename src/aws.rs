//! Shared AWS SDK configuration loading

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ecr::config::Credentials;

/// Credentials from an explicit key pair (plus session token for assumed roles)
pub fn static_credentials(
    access_key_id: impl Into<String>,
    secret_access_key: impl Into<String>,
    session_token: Option<String>,
) -> Credentials {
    Credentials::new(
        access_key_id,
        secret_access_key,
        session_token,
        None,
        "regvault-static",
    )
}

/// Build an SDK config for `region`
///
/// Without explicit credentials the default chain applies (IRSA, instance profile, env vars).
pub async fn load_sdk_config(region: &str, credentials: Option<Credentials>) -> SdkConfig {
    let loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));

    match credentials {
        Some(creds) => loader.credentials_provider(creds).load().await,
        None => loader.load().await,
    }
}

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The SDK errors have verbose Debug output; the meaningful part is the
/// `message: Some("...")` field when present.
pub fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15;
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.len() > 200 {
        let cut = (0..=200)
            .rev()
            .find(|i| debug_str.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...", &debug_str[..cut])
    } else {
        debug_str
    }
}

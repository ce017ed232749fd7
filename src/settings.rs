use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub encryption: Option<EncryptionSettings>,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Docker Hub API base URL (default: "https://hub.docker.com")
    #[serde(default = "default_docker_hub_url")]
    pub docker_hub_url: String,

    /// Page size requested from catalog and tag listing endpoints (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Number of repositories whose tags are listed concurrently (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Skip TLS certificate verification (self-signed private registries only)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("regvault/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_docker_hub_url() -> String {
    "https://hub.docker.com".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_concurrency() -> usize {
    4
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            docker_hub_url: default_docker_hub_url(),
            page_size: default_page_size(),
            concurrency: default_concurrency(),
            accept_invalid_certs: false,
        }
    }
}

/// Encryption provider configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EncryptionSettings {
    /// Local AES-256-GCM encryption using a symmetric key
    #[serde(rename = "aes-gcm-256")]
    Local {
        /// Base64-encoded 32-byte encryption key
        /// Generate with: openssl rand -base64 32
        key: String,
    },
    /// AWS KMS encryption
    #[serde(rename = "aws-kms")]
    AwsKms {
        region: String,
        /// KMS key ID or ARN
        key_id: String,
        /// Optional static credentials (development only)
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
    },
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        let re = match regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
            Ok(re) => re,
            Err(_) => return s.to_string(),
        };

        re.replace_all(s, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match env::var(var_name) {
                Ok(val) => val,
                Err(_) => default_value.unwrap_or("").to_string(),
            }
        })
        .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            // JSON numbers stop at 64 bits; out-of-range values become null
            ValueKind::I128(i) => i64::try_from(*i)
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => u64::try_from(*u)
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    /// Returns true if a file was loaded
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
    ) -> bool {
        let extensions = ["toml", "yaml", "yml"];

        for ext in extensions {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return true;
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir,
            name
        );
        false
    }

    /// Load settings from `REGVAULT_CONFIG_DIR` (default: "config") and `REGVAULT_*` env vars
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = env::var("REGVAULT_CONFIG_DIR").unwrap_or_else(|_| "config".into());
        Self::load_from(&config_dir)
    }

    /// Load settings from an explicit config directory
    ///
    /// Files are layered as default, then `REGVAULT_CONFIG_RUN_MODE` (default: "development"),
    /// then local. All of them are optional; a missing directory yields defaults.
    pub fn load_from(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode =
            env::var("REGVAULT_CONFIG_RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder();
        Self::try_add_config_file(&mut builder, config_dir, "default");
        Self::try_add_config_file(&mut builder, config_dir, &run_mode);
        Self::try_add_config_file(&mut builder, config_dir, "local");

        let builder = builder.add_source(
            config::Environment::with_prefix("REGVAULT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .ignore_empty(true),
        );

        let config = builder.build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            // Bootstrap variables are not settings
            if k == "config_dir" || k == "config_run_mode" {
                continue;
            }
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }
        let json_value = serde_json::Value::Object(json_map);

        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field in regvault config: {}", field);
        }

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http.concurrency == 0 {
            return Err(ConfigError::Message(
                "http.concurrency must be at least 1".to_string(),
            ));
        }
        if self.http.page_size == 0 {
            return Err(ConfigError::Message(
                "http.page_size must be at least 1".to_string(),
            ));
        }
        if let Some(EncryptionSettings::Local { key }) = &self.encryption {
            if key.is_empty() {
                return Err(ConfigError::Message(
                    "Encryption key not configured. Set REGVAULT_ENCRYPTION__KEY or [encryption] key in config. Generate with: openssl rand -base64 32".to_string(),
                ));
            }
        }
        Ok(())
    }
}

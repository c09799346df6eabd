//! Configuration loading.
//!
//! Configuration merges defaults, an optional `gatehouse.yaml` /
//! `gatehouse.json` file, and `GATEHOUSE_`-prefixed environment variables,
//! in that order. Declared tokens (config-file tokens with optional scopes)
//! come from the file only.

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Optional peer gossip; absent means single-node operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base path the admin surface hangs under.
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_base_path() -> String {
    "/".to_string()
}

/// Tokens declared directly in configuration, checked before the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<DeclaredToken>,
}

/// A config-declared bearer token with optional scope restrictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredToken {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_providers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_models: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_webhooks: Option<Vec<String>>,
    /// RFC 3339 expiry; validated on every use, not at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Passphrase deriving the AES-256 key for encryption at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            passphrase: None,
        }
    }
}

fn default_db_path() -> String {
    "./data/gatehouse.db".to_string()
}

/// Gateway tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Maximum retained thought signatures.
    #[serde(default = "default_signature_cache_size")]
    pub signature_cache_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            signature_cache_size: default_signature_cache_size(),
        }
    }
}

fn default_signature_cache_size() -> usize {
    crate::llm::signatures::DEFAULT_CAPACITY
}

/// UDP gossip cluster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Local UDP bind address, e.g. `0.0.0.0:7946`.
    pub bind: String,
    /// Peer addresses to gossip with.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Stable node identity; defaults to `host:port` of `bind`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl AppConfig {
    /// Load configuration from defaults, config file, and environment.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(config::File::with_name(path));
            }
            None => {
                builder = builder
                    .add_source(config::File::with_name("gatehouse").required(false));
            }
        }
        let loaded = builder
            .add_source(config::Environment::with_prefix("GATEHOUSE").separator("__"))
            .build()?;

        Ok(loaded.try_deserialize()?)
    }
}

//! Process configuration, read from the environment at boot.

use crate::duration::parse_duration;
use crate::error::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vault authentication method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "method")]
pub enum VaultAuth {
    /// Static token (development / CI).
    Token { token: String },
    /// Kubernetes service-account auth.
    Kubernetes {
        role: String,
        /// Auth mount path; empty means `"kubernetes"`.
        #[serde(default)]
        mount: String,
    },
}

/// Vault connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub address: String,
    pub auth: VaultAuth,
}

/// Top-level process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the control plane operates in.
    pub namespace: String,
    /// Listen address for the HTTP surface (webhooks, health).
    pub listen_addr: String,
    /// Vault settings; absent disables dynamic credentials.
    pub vault: Option<VaultConfig>,
    /// Maximum time to wait for in-flight runs on shutdown.
    pub drain_timeout: Duration,
    /// How long terminal runs are retained.
    pub retention_ttl: Duration,
    /// Anthropic API key for the LLM driver; absent disables live runs.
    pub anthropic_api_key: Option<String>,
    /// Webhook trigger debounce window.
    pub debounce_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            listen_addr: "0.0.0.0:8089".to_string(),
            vault: None,
            drain_timeout: Duration::from_secs(120),
            retention_ttl: Duration::from_secs(7 * 24 * 3600),
            anthropic_api_key: None,
            debounce_window: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Build configuration from process environment variables.
    ///
    /// Recognized: `LEGATOR_NAMESPACE`, `LEGATOR_LISTEN_ADDR`, `VAULT_ADDR`,
    /// `VAULT_TOKEN`, `VAULT_K8S_ROLE`, `VAULT_K8S_MOUNT`,
    /// `LEGATOR_DRAIN_TIMEOUT`, `LEGATOR_RETENTION_TTL`,
    /// `LEGATOR_DEBOUNCE_WINDOW`, `ANTHROPIC_API_KEY`.
    pub fn from_env() -> TypesResult<Self> {
        let mut cfg = Config::default();

        if let Ok(ns) = std::env::var("LEGATOR_NAMESPACE") {
            if !ns.is_empty() {
                cfg.namespace = ns;
            }
        }
        if let Ok(addr) = std::env::var("LEGATOR_LISTEN_ADDR") {
            if !addr.is_empty() {
                cfg.listen_addr = addr;
            }
        }

        if let Ok(vault_addr) = std::env::var("VAULT_ADDR") {
            if !vault_addr.is_empty() {
                let auth = if let Ok(token) = std::env::var("VAULT_TOKEN") {
                    VaultAuth::Token { token }
                } else if let Ok(role) = std::env::var("VAULT_K8S_ROLE") {
                    VaultAuth::Kubernetes {
                        role,
                        mount: std::env::var("VAULT_K8S_MOUNT").unwrap_or_default(),
                    }
                } else {
                    return Err(TypesError::InvalidConfig(
                        "VAULT_ADDR set but neither VAULT_TOKEN nor VAULT_K8S_ROLE provided"
                            .to_string(),
                    ));
                };
                cfg.vault = Some(VaultConfig {
                    address: vault_addr,
                    auth,
                });
            }
        }

        if let Ok(v) = std::env::var("LEGATOR_DRAIN_TIMEOUT") {
            if !v.is_empty() {
                cfg.drain_timeout = parse_duration(&v)?;
            }
        }
        if let Ok(v) = std::env::var("LEGATOR_RETENTION_TTL") {
            if !v.is_empty() {
                cfg.retention_ttl = parse_duration(&v)?;
            }
        }
        if let Ok(v) = std::env::var("LEGATOR_DEBOUNCE_WINDOW") {
            if !v.is_empty() {
                cfg.debounce_window = parse_duration(&v)?;
            }
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                cfg.anthropic_api_key = Some(key);
            }
        }

        Ok(cfg)
    }
}

//! The Environment resource — the external-world binding for agents:
//! endpoints, notification channels, credential sources, connectivity, and
//! an optional remote-cluster kubeconfig reference.

use crate::meta::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named network endpoint an agent may operate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Notification transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelType {
    Slack,
    Telegram,
    Webhook,
}

/// A named notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Webhook URL for slack/webhook, chat id for telegram.
    pub target: String,
    /// Secret holding the transport token (telegram bot token).
    #[serde(default)]
    pub secret_ref: String,
}

/// Where a named credential comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum CredentialSourceSpec {
    /// A key in a store-resident secret. No revocation.
    StaticSecret { secret_ref: String, key: String },
    /// Vault KV v2 read of a static secret.
    VaultKv { mount: String, path: String },
    /// Short-TTL SSH certificate via a Vault SSH CA role.
    VaultSshCa {
        mount: String,
        role: String,
        /// SSH username (valid principal).
        user: String,
        /// Certificate TTL as a duration string; empty means 5m.
        #[serde(default)]
        ttl: String,
    },
    /// Dynamic database credentials from a Vault database role.
    VaultDatabase { mount: String, role: String },
}

/// How the agent reaches its targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectivityKind {
    #[default]
    Direct,
    MeshVpn,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivitySpec {
    pub kind: ConnectivityKind,
}

/// Reference to a kubeconfig held in a secret, for agents that target a
/// cluster other than the local one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeconfigRef {
    pub secret_ref: String,
    /// Key within the secret; empty means `"kubeconfig"`.
    #[serde(default)]
    pub key: String,
}

/// Desired state of an environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSpec {
    pub endpoints: BTreeMap<String, EndpointSpec>,
    pub channels: BTreeMap<String, ChannelSpec>,
    pub credentials: BTreeMap<String, CredentialSourceSpec>,
    pub connectivity: Option<ConnectivitySpec>,
    pub remote_cluster: Option<KubeconfigRef>,
}

/// The external-world binding for agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub meta: ObjectMeta,
    pub spec: EnvironmentSpec,
}

/// An opaque store-resident secret: string keys to string values.
///
/// Backs kubeconfigs, channel tokens, and static credentials. Values are
/// never logged; call sites reference entries by handle name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

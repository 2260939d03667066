//! Remote-cluster client factory for agents that target a cluster other
//! than the local one.
//!
//! The factory reads a kubeconfig from a referenced secret, builds an
//! authenticated HTTP client for that cluster's API server, and caches it
//! keyed by `(namespace, secret, key, resourceVersion)` so a rotated
//! secret invalidates the entry on its own.

use crate::error::{KernelError, KernelResult};
use base64::Engine as _;
use dashmap::DashMap;
use legator_store::Store;
use legator_types::environment::Environment;
use legator_types::meta::NamespacedName;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

const DEFAULT_SECRET_KEY: &str = "kubeconfig";
const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

/// An authenticated handle to a remote cluster's API server.
pub struct ClusterClient {
    pub server: String,
    token: Option<Zeroizing<String>>,
    http: reqwest::Client,
}

impl ClusterClient {
    /// GET a path under the API server, returning the raw body.
    pub async fn get_raw(&self, path: &str) -> KernelResult<String> {
        let url = format!("{}/{}", self.server.trim_end_matches('/'), path.trim_start_matches('/'));
        let mut req = self.http.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| KernelError::Multicluster(format!("request {path}: {e}")))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(KernelError::Multicluster(format!(
                "{path} returned {status}"
            )));
        }
        Ok(body)
    }
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct CacheKey {
    namespace: String,
    secret_name: String,
    secret_key: String,
    resource_version: u64,
}

/// Builds and caches remote-cluster clients.
pub struct ClientFactory {
    store: Arc<Store>,
    cache: DashMap<CacheKey, Arc<ClusterClient>>,
}

impl ClientFactory {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Client for an environment's remote cluster. `None` when the
    /// environment has no remote binding (caller uses the local store).
    pub fn client_for_environment(
        &self,
        env: &Environment,
    ) -> KernelResult<Option<Arc<ClusterClient>>> {
        let Some(kubeconfig_ref) = &env.spec.remote_cluster else {
            return Ok(None);
        };
        let secret_key_name = if kubeconfig_ref.key.is_empty() {
            DEFAULT_SECRET_KEY
        } else {
            &kubeconfig_ref.key
        };

        let secret = self
            .store
            .secrets
            .get(&NamespacedName::new(
                env.meta.namespace.clone(),
                kubeconfig_ref.secret_ref.clone(),
            ))
            .map_err(|e| KernelError::Multicluster(format!("kubeconfig secret: {e}")))?;

        let cache_key = CacheKey {
            namespace: env.meta.namespace.clone(),
            secret_name: kubeconfig_ref.secret_ref.clone(),
            secret_key: secret_key_name.to_string(),
            resource_version: secret.meta.resource_version,
        };
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(Some(Arc::clone(&cached)));
        }

        let raw = secret.data.get(secret_key_name).ok_or_else(|| {
            KernelError::Multicluster(format!(
                "secret {}/{} has no key {secret_key_name:?}",
                env.meta.namespace, kubeconfig_ref.secret_ref
            ))
        })?;

        let client = Arc::new(build_client(raw)?);
        self.cache.insert(cache_key, Arc::clone(&client));
        Ok(Some(client))
    }

    /// Drop every cached client.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    /// Drop cached clients built from one secret.
    pub fn invalidate_secret(&self, namespace: &str, name: &str) {
        self.cache
            .retain(|k, _| !(k.namespace == namespace && k.secret_name == name));
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

// -- kubeconfig parsing -----------------------------------------------------

#[derive(Deserialize)]
struct Kubeconfig {
    clusters: Vec<NamedCluster>,
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default, rename = "current-context")]
    current_context: String,
}

#[derive(Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Deserialize)]
struct ClusterEntry {
    server: String,
    #[serde(default, rename = "certificate-authority-data")]
    certificate_authority_data: String,
    #[serde(default, rename = "insecure-skip-tls-verify")]
    insecure_skip_tls_verify: bool,
}

#[derive(Deserialize)]
struct NamedUser {
    name: String,
    user: UserEntry,
}

#[derive(Deserialize, Default)]
struct UserEntry {
    #[serde(default)]
    token: String,
}

#[derive(Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: String,
}

/// Build a cluster client from kubeconfig YAML. The current context picks
/// the cluster/user pair; without contexts the first entries are used.
fn build_client(kubeconfig_yaml: &str) -> KernelResult<ClusterClient> {
    let config: Kubeconfig = serde_yaml::from_str(kubeconfig_yaml)
        .map_err(|e| KernelError::Multicluster(format!("parse kubeconfig: {e}")))?;
    if config.clusters.is_empty() {
        return Err(KernelError::Multicluster("kubeconfig has no clusters".to_string()));
    }

    let (cluster_name, user_name) = config
        .contexts
        .iter()
        .find(|c| c.name == config.current_context)
        .map(|c| (c.context.cluster.clone(), c.context.user.clone()))
        .unwrap_or_else(|| {
            (
                config.clusters[0].name.clone(),
                config.users.first().map(|u| u.name.clone()).unwrap_or_default(),
            )
        });

    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == cluster_name)
        .map(|c| &c.cluster)
        .unwrap_or(&config.clusters[0].cluster);
    let token = config
        .users
        .iter()
        .find(|u| u.name == user_name)
        .or_else(|| config.users.first())
        .map(|u| u.user.token.clone())
        .filter(|t| !t.is_empty());

    let mut builder = reqwest::Client::builder().timeout(CLIENT_TIMEOUT);
    if cluster.insecure_skip_tls_verify {
        builder = builder.danger_accept_invalid_certs(true);
    } else if !cluster.certificate_authority_data.is_empty() {
        let pem = base64::engine::general_purpose::STANDARD
            .decode(&cluster.certificate_authority_data)
            .map_err(|e| KernelError::Multicluster(format!("decode cluster CA: {e}")))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| KernelError::Multicluster(format!("parse cluster CA: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }
    let http = builder
        .build()
        .map_err(|e| KernelError::Multicluster(format!("build client: {e}")))?;

    Ok(ClusterClient {
        server: cluster.server.clone(),
        token: token.map(Zeroizing::new),
        http,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use legator_types::environment::{EnvironmentSpec, KubeconfigRef, Secret};
    use legator_types::meta::ObjectMeta;
    use std::collections::BTreeMap;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
  - name: remote
    cluster:
      server: https://remote.cluster:6443
      insecure-skip-tls-verify: true
users:
  - name: admin
    user:
      token: abc123
contexts:
  - name: remote-ctx
    context:
      cluster: remote
      user: admin
current-context: remote-ctx
"#;

    fn seed(store: &Store, kubeconfig: &str) -> Environment {
        let mut data = BTreeMap::new();
        data.insert("kubeconfig".to_string(), kubeconfig.to_string());
        store
            .secrets
            .create(Secret {
                meta: ObjectMeta::new("default", "remote-kc"),
                data,
            })
            .unwrap();
        store
            .environments
            .create(Environment {
                meta: ObjectMeta::new("default", "remote-env"),
                spec: EnvironmentSpec {
                    remote_cluster: Some(KubeconfigRef {
                        secret_ref: "remote-kc".to_string(),
                        key: String::new(),
                    }),
                    ..Default::default()
                },
            })
            .unwrap()
    }

    #[test]
    fn no_remote_binding_returns_none() {
        let store = Arc::new(Store::new());
        let env = store
            .environments
            .create(Environment {
                meta: ObjectMeta::new("default", "local-env"),
                spec: EnvironmentSpec::default(),
            })
            .unwrap();
        let factory = ClientFactory::new(store);
        assert!(factory.client_for_environment(&env).unwrap().is_none());
    }

    #[test]
    fn builds_and_caches_client() {
        let store = Arc::new(Store::new());
        let env = seed(&store, KUBECONFIG);
        let factory = ClientFactory::new(Arc::clone(&store));

        let client = factory.client_for_environment(&env).unwrap().unwrap();
        assert_eq!(client.server, "https://remote.cluster:6443");
        assert_eq!(factory.cache_size(), 1);

        // Same resource version hits the cache.
        let again = factory.client_for_environment(&env).unwrap().unwrap();
        assert!(Arc::ptr_eq(&client, &again));
        assert_eq!(factory.cache_size(), 1);
    }

    #[test]
    fn secret_rotation_invalidates_via_resource_version() {
        let store = Arc::new(Store::new());
        let env = seed(&store, KUBECONFIG);
        let factory = ClientFactory::new(Arc::clone(&store));

        let first = factory.client_for_environment(&env).unwrap().unwrap();

        // Rotate the secret; the resource version changes.
        let key = NamespacedName::new("default", "remote-kc");
        let mut rotated = store.secrets.get(&key).unwrap();
        rotated.data.insert(
            "kubeconfig".to_string(),
            KUBECONFIG.replace("remote.cluster", "other.cluster"),
        );
        store.secrets.update(rotated).unwrap();

        let second = factory.client_for_environment(&env).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.server, "https://other.cluster:6443");
    }

    #[test]
    fn explicit_invalidation_by_secret() {
        let store = Arc::new(Store::new());
        let env = seed(&store, KUBECONFIG);
        let factory = ClientFactory::new(Arc::clone(&store));
        factory.client_for_environment(&env).unwrap().unwrap();
        assert_eq!(factory.cache_size(), 1);

        factory.invalidate_secret("default", "remote-kc");
        assert_eq!(factory.cache_size(), 0);

        factory.client_for_environment(&env).unwrap().unwrap();
        factory.invalidate_all();
        assert_eq!(factory.cache_size(), 0);
    }

    #[test]
    fn bad_kubeconfig_is_an_error() {
        let store = Arc::new(Store::new());
        let env = seed(&store, "not: [valid");
        let factory = ClientFactory::new(store);
        assert!(factory.client_for_environment(&env).is_err());
    }
}

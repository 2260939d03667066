//! HashiCorp Vault client: K8s or token auth, KV v2 reads, SSH CA signing,
//! dynamic database credentials, and lease revocation.

use crate::error::{RuntimeError, RuntimeResult};
use serde::Deserialize;
use serde_json::json;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SA_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const MAX_ERROR_BODY: usize = 256;

/// Vault client configuration.
#[derive(Debug, Clone, Default)]
pub struct VaultClientConfig {
    /// Server URL, e.g. `"http://vault.vault:8200"`.
    pub address: String,
    /// Static token. Mutually exclusive with K8s auth.
    pub token: Option<String>,
    /// Vault K8s auth role name.
    pub k8s_auth_role: Option<String>,
    /// Auth mount path; empty means `"kubernetes"`.
    pub k8s_auth_mount: String,
    /// Service-account token path; empty means the in-cluster default.
    pub sa_token_path: String,
}

/// Authenticated Vault access.
pub struct VaultClient {
    addr: String,
    http: reqwest::Client,
    token: RwLock<Option<Zeroizing<String>>>,
    k8s_auth_role: Option<String>,
    k8s_auth_mount: String,
    sa_token_path: String,
}

impl VaultClient {
    pub fn new(cfg: VaultClientConfig) -> RuntimeResult<Self> {
        if cfg.address.is_empty() {
            return Err(RuntimeError::Vault("vault address is required".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Ok(Self {
            addr: cfg.address.trim_end_matches('/').to_string(),
            http,
            token: RwLock::new(cfg.token.map(Zeroizing::new)),
            k8s_auth_role: cfg.k8s_auth_role,
            k8s_auth_mount: if cfg.k8s_auth_mount.is_empty() {
                "kubernetes".to_string()
            } else {
                cfg.k8s_auth_mount
            },
            sa_token_path: if cfg.sa_token_path.is_empty() {
                DEFAULT_SA_TOKEN_PATH.to_string()
            } else {
                cfg.sa_token_path
            },
        })
    }

    /// Obtain a token via the K8s auth method. No-op with a static token.
    pub async fn authenticate(&self) -> RuntimeResult<()> {
        let has_token = self
            .token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        let role = match &self.k8s_auth_role {
            Some(role) => role.clone(),
            None if has_token => return Ok(()),
            None => {
                return Err(RuntimeError::Vault(
                    "neither token nor k8s auth role configured".to_string(),
                ))
            }
        };

        let sa_token = Zeroizing::new(
            tokio::fs::read_to_string(&self.sa_token_path)
                .await
                .map_err(|e| {
                    RuntimeError::Vault(format!(
                        "read service account token {}: {e}",
                        self.sa_token_path
                    ))
                })?,
        );

        let url = format!("{}/v1/auth/{}/login", self.addr, self.k8s_auth_mount);
        let resp = self
            .http
            .post(&url)
            .json(&json!({"role": role, "jwt": sa_token.as_str()}))
            .send()
            .await
            .map_err(|e| RuntimeError::Vault(format!("auth request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RuntimeError::Vault(format!(
                "auth failed (status {status}): {}",
                truncate(&body, MAX_ERROR_BODY)
            )));
        }

        #[derive(Deserialize)]
        struct AuthResponse {
            auth: AuthBody,
        }
        #[derive(Deserialize)]
        struct AuthBody {
            client_token: String,
        }

        let parsed: AuthResponse = resp
            .json()
            .await
            .map_err(|e| RuntimeError::Vault(format!("decode auth response: {e}")))?;
        *self.token.write().unwrap_or_else(|e| e.into_inner()) =
            Some(Zeroizing::new(parsed.auth.client_token));
        debug!("vault k8s auth complete");
        Ok(())
    }

    /// Check Vault is reachable and unsealed.
    pub async fn health(&self) -> RuntimeResult<()> {
        let url = format!("{}/v1/sys/health", self.addr);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RuntimeError::Vault(format!("unreachable: {e}")))?;

        // 200 active, 429 unsealed standby, 473 performance standby.
        match resp.status().as_u16() {
            200 | 429 | 473 => Ok(()),
            501 => Err(RuntimeError::Vault("not initialized".to_string())),
            503 => Err(RuntimeError::Vault("sealed".to_string())),
            other => Err(RuntimeError::Vault(format!(
                "health check returned status {other}"
            ))),
        }
    }

    /// Read a KV v2 secret. KV v2 nests the payload under `data.data`.
    pub async fn read_kv(
        &self,
        mount: &str,
        path: &str,
    ) -> RuntimeResult<std::collections::BTreeMap<String, Zeroizing<String>>> {
        let url = format!("{}/v1/{}/data/{}", self.addr, mount, path);
        let data = self.do_get(&url).await?;
        let inner = data
            .get("data")
            .and_then(|d| d.get("data"))
            .and_then(|d| d.as_object())
            .ok_or_else(|| RuntimeError::Vault("unexpected KV response structure".to_string()))?;

        let mut out = std::collections::BTreeMap::new();
        for (k, v) in inner {
            let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
            out.insert(k.clone(), Zeroizing::new(value));
        }
        Ok(out)
    }

    /// Sign an SSH public key via the SSH CA secrets engine.
    pub async fn sign_ssh_key(&self, req: SshSignRequest) -> RuntimeResult<SshSignResponse> {
        let ttl = if req.ttl.is_empty() { "5m" } else { &req.ttl };
        let url = format!("{}/v1/{}/sign/{}", self.addr, req.mount, req.role);
        let data = self
            .do_put(
                &url,
                &json!({
                    "public_key": req.public_key,
                    "valid_principals": req.valid_principals,
                    "ttl": ttl,
                    "cert_type": "user",
                }),
            )
            .await?;

        let inner = data
            .get("data")
            .and_then(|d| d.as_object())
            .ok_or_else(|| RuntimeError::Vault("unexpected SSH sign response".to_string()))?;
        let signed_key = inner
            .get("signed_key")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if signed_key.is_empty() {
            return Err(RuntimeError::Vault("empty signed key in response".to_string()));
        }
        let serial_number = inner
            .get("serial_number")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(SshSignResponse {
            signed_key,
            serial_number,
        })
    }

    /// Generate dynamic database credentials from a database role.
    pub async fn database_credentials(
        &self,
        mount: &str,
        role: &str,
    ) -> RuntimeResult<DatabaseCredentialLease> {
        let mount = if mount.is_empty() { "database" } else { mount };
        let url = format!("{}/v1/{}/creds/{}", self.addr, mount, role);
        let data = self.do_get(&url).await?;

        let inner = data
            .get("data")
            .and_then(|d| d.as_object())
            .ok_or_else(|| RuntimeError::Vault("unexpected database creds response".to_string()))?;
        let username = inner
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let password = inner
            .get("password")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if username.is_empty() || password.is_empty() {
            return Err(RuntimeError::Vault(
                "incomplete database credentials in response".to_string(),
            ));
        }
        let lease_id = data
            .get("lease_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let lease_secs = data
            .get("lease_duration")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok(DatabaseCredentialLease {
            username,
            password: Zeroizing::new(password),
            lease_id,
            lease_ttl: Duration::from_secs(lease_secs),
        })
    }

    /// Explicitly revoke a lease. Revoking an empty lease id is a no-op.
    pub async fn revoke_lease(&self, lease_id: &str) -> RuntimeResult<()> {
        if lease_id.is_empty() {
            return Ok(());
        }
        let url = format!("{}/v1/sys/leases/revoke", self.addr);
        self.do_put(&url, &json!({"lease_id": lease_id}))
            .await
            .map_err(|e| RuntimeError::Vault(format!("revoke lease {lease_id:?}: {e}")))?;
        Ok(())
    }

    // -- HTTP helpers -------------------------------------------------------

    async fn do_get(&self, url: &str) -> RuntimeResult<serde_json::Value> {
        let req = self.http.get(url);
        self.do_request(req).await
    }

    async fn do_put(&self, url: &str, body: &serde_json::Value) -> RuntimeResult<serde_json::Value> {
        let req = self.http.put(url).json(body);
        self.do_request(req).await
    }

    async fn do_request(&self, mut req: reqwest::RequestBuilder) -> RuntimeResult<serde_json::Value> {
        let token = self
            .token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|t| t.as_str().to_string());
        if let Some(t) = token {
            req = req.header("X-Vault-Token", t);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RuntimeError::Vault(format!("request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| RuntimeError::Vault(format!("reading response: {e}")))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(RuntimeError::Vault(format!(
                "returned status {status}: {}",
                truncate(&text, MAX_ERROR_BODY)
            )));
        }
        // Empty bodies (204 from revocation) decode to an empty object.
        if body.is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_slice(&body)
            .map_err(|e| RuntimeError::Vault(format!("decoding response: {e}")))
    }
}

/// Request to sign an SSH public key.
#[derive(Debug, Clone, Default)]
pub struct SshSignRequest {
    /// SSH secrets engine mount (e.g. `"ssh-client-signer"`).
    pub mount: String,
    /// SSH CA role name.
    pub role: String,
    /// OpenSSH-format public key to sign.
    pub public_key: String,
    /// Usernames the certificate is valid for.
    pub valid_principals: String,
    /// Certificate TTL; empty means `"5m"`.
    pub ttl: String,
}

#[derive(Debug, Clone)]
pub struct SshSignResponse {
    pub signed_key: String,
    pub serial_number: String,
}

/// A dynamic database credential with its revocable lease.
pub struct DatabaseCredentialLease {
    pub username: String,
    pub password: Zeroizing<String>,
    pub lease_id: String,
    pub lease_ttl: Duration,
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_address() {
        assert!(VaultClient::new(VaultClientConfig::default()).is_err());
    }

    #[test]
    fn trims_trailing_slash() {
        let c = VaultClient::new(VaultClientConfig {
            address: "http://vault:8200/".to_string(),
            token: Some("root".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(c.addr, "http://vault:8200");
    }

    #[test]
    fn defaults_for_k8s_auth() {
        let c = VaultClient::new(VaultClientConfig {
            address: "http://vault:8200".to_string(),
            k8s_auth_role: Some("legator".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(c.k8s_auth_mount, "kubernetes");
        assert_eq!(c.sa_token_path, DEFAULT_SA_TOKEN_PATH);
    }

    #[tokio::test]
    async fn authenticate_without_config_errors() {
        let c = VaultClient::new(VaultClientConfig {
            address: "http://vault:8200".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(c.authenticate().await.is_err());
    }
}

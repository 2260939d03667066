//! Pre-run connectivity checks: mesh-VPN sidecar health and endpoint TCP
//! reachability. Informational — unreachable endpoints are logged, never
//! fatal to the run.

use legator_types::environment::{ConnectivityKind, ConnectivitySpec, EndpointSpec};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SIDECAR_ADDR: &str = "127.0.0.1:41112";
const SIDECAR_TIMEOUT: Duration = Duration::from_secs(2);
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);

/// Health of the connectivity layer.
#[derive(Debug, Clone)]
pub struct ConnectivityStatus {
    pub kind: ConnectivityKind,
    pub ready: bool,
    pub message: String,
}

/// Reachability of one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub reachable: bool,
    pub latency: Duration,
    pub error: String,
}

/// Check the connectivity layer. Direct connectivity is always healthy; a
/// mesh VPN requires its sidecar to answer on the local API port.
pub async fn check_health(spec: Option<&ConnectivitySpec>) -> ConnectivityStatus {
    let kind = spec.map(|s| s.kind).unwrap_or_default();
    match kind {
        ConnectivityKind::Direct => ConnectivityStatus {
            kind,
            ready: true,
            message: "direct connectivity".to_string(),
        },
        ConnectivityKind::MeshVpn => {
            match tokio::time::timeout(
                SIDECAR_TIMEOUT,
                tokio::net::TcpStream::connect(SIDECAR_ADDR),
            )
            .await
            {
                Ok(Ok(_)) => ConnectivityStatus {
                    kind,
                    ready: true,
                    message: "mesh sidecar is running".to_string(),
                },
                Ok(Err(e)) => ConnectivityStatus {
                    kind,
                    ready: false,
                    message: format!("mesh sidecar not reachable: {e}"),
                },
                Err(_) => ConnectivityStatus {
                    kind,
                    ready: false,
                    message: "mesh sidecar not reachable: dial timed out".to_string(),
                },
            }
        }
    }
}

/// TCP-dial every endpoint to verify reachability.
pub async fn check_endpoints(
    endpoints: &BTreeMap<String, EndpointSpec>,
) -> BTreeMap<String, EndpointStatus> {
    let mut results = BTreeMap::new();
    for (name, ep) in endpoints {
        results.insert(name.clone(), check_endpoint(ep).await);
    }
    results
}

async fn check_endpoint(ep: &EndpointSpec) -> EndpointStatus {
    let start = Instant::now();
    let Some((host, port)) = extract_host_port(&ep.url) else {
        return EndpointStatus {
            reachable: false,
            latency: Duration::ZERO,
            error: format!("could not parse host from {:?}", ep.url),
        };
    };

    let addr = format!("{host}:{port}");
    match tokio::time::timeout(ENDPOINT_TIMEOUT, tokio::net::TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => EndpointStatus {
            reachable: true,
            latency: start.elapsed(),
            error: String::new(),
        },
        Ok(Err(e)) => EndpointStatus {
            reachable: false,
            latency: start.elapsed(),
            error: format!("tcp dial failed: {e}"),
        },
        Err(_) => EndpointStatus {
            reachable: false,
            latency: start.elapsed(),
            error: "tcp dial timed out".to_string(),
        },
    }
}

/// Parse a URL or `host:port` string into host and port, defaulting the
/// port from the scheme.
pub fn extract_host_port(url: &str) -> Option<(String, u16)> {
    let default_port = if url.starts_with("https://") {
        443
    } else if url.starts_with("http://") {
        80
    } else if url.starts_with("ssh://") {
        22
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        5432
    } else {
        443
    };

    let mut rest = url;
    for prefix in ["https://", "http://", "tcp://", "ssh://", "postgres://", "postgresql://"] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    let host_port = rest.split('/').next().unwrap_or(rest);
    if host_port.is_empty() {
        return None;
    }

    match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().ok()?;
            Some((host.to_string(), port))
        }
        None => Some((host_port.to_string(), default_port)),
    }
}

/// Comprehensive pre-run check: layer health plus endpoint reachability.
/// Unreachable endpoints are logged but do not fail the run; an unready
/// mesh layer does.
pub async fn pre_run_check(
    spec: Option<&ConnectivitySpec>,
    endpoints: &BTreeMap<String, EndpointSpec>,
) -> Result<(), String> {
    let health = check_health(spec).await;
    if !health.ready {
        return Err(format!("connectivity not ready: {}", health.message));
    }
    debug!(kind = ?health.kind, message = %health.message, "connectivity layer healthy");

    if endpoints.is_empty() {
        return Ok(());
    }
    let results = check_endpoints(endpoints).await;
    let unreachable: Vec<&str> = results
        .iter()
        .filter(|(_, s)| !s.reachable)
        .map(|(name, _)| name.as_str())
        .collect();
    for (name, status) in &results {
        if status.reachable {
            debug!(endpoint = %name, latency_ms = status.latency.as_millis() as u64, "endpoint reachable");
        } else {
            warn!(endpoint = %name, error = %status.error, "endpoint unreachable");
        }
    }
    if !unreachable.is_empty() {
        info!(
            unreachable = unreachable.len(),
            total = results.len(),
            "some endpoints unreachable"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_extraction() {
        assert_eq!(
            extract_host_port("https://api.example.com/v1"),
            Some(("api.example.com".to_string(), 443))
        );
        assert_eq!(
            extract_host_port("http://api.example.com:8080/v1"),
            Some(("api.example.com".to_string(), 8080))
        );
        assert_eq!(
            extract_host_port("ssh://bastion.internal"),
            Some(("bastion.internal".to_string(), 22))
        );
        assert_eq!(
            extract_host_port("db.internal:5432"),
            Some(("db.internal".to_string(), 5432))
        );
        assert_eq!(extract_host_port("https://"), None);
    }

    #[tokio::test]
    async fn direct_is_always_healthy() {
        let status = check_health(None).await;
        assert!(status.ready);
        assert_eq!(status.kind, ConnectivityKind::Direct);

        let status = check_health(Some(&ConnectivitySpec {
            kind: ConnectivityKind::Direct,
        }))
        .await;
        assert!(status.ready);
    }

    #[tokio::test]
    async fn pre_run_check_passes_with_no_endpoints() {
        assert!(pre_run_check(None, &BTreeMap::new()).await.is_ok());
    }
}

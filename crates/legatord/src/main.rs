//! Legator control-plane daemon.
//!
//! Exit codes: 0 clean shutdown, 1 fatal configuration, 2 fatal store
//! error (listener bind counts — it is our only external surface here).

use legator_api::{router, ApiState};
use legator_kernel::{Kernel, KernelConfig};
use legator_runtime::llm::anthropic::AnthropicDriver;
use legator_runtime::llm::scripted::ScriptedDriver;
use legator_runtime::llm::LlmDriver;
use legator_runtime::tools::ToolRegistry;
use legator_runtime::vault::{VaultClient, VaultClientConfig};
use legator_store::Store;
use legator_types::config::{Config, VaultAuth};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal configuration error");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::from(1);
        }
    };
    runtime.block_on(run(config))
}

async fn run(config: Config) -> ExitCode {
    info!(namespace = %config.namespace, listen = %config.listen_addr, "legatord starting");

    // Vault is optional; dynamic credentials are disabled without it.
    let vault = match &config.vault {
        None => None,
        Some(vault_cfg) => {
            let client_cfg = match &vault_cfg.auth {
                VaultAuth::Token { token } => VaultClientConfig {
                    address: vault_cfg.address.clone(),
                    token: Some(token.clone()),
                    ..Default::default()
                },
                VaultAuth::Kubernetes { role, mount } => VaultClientConfig {
                    address: vault_cfg.address.clone(),
                    k8s_auth_role: Some(role.clone()),
                    k8s_auth_mount: mount.clone(),
                    ..Default::default()
                },
            };
            match VaultClient::new(client_cfg) {
                Ok(client) => {
                    if let Err(e) = client.authenticate().await {
                        error!(error = %e, "vault authentication failed");
                        return ExitCode::from(1);
                    }
                    if let Err(e) = client.health().await {
                        warn!(error = %e, "vault health check failed, continuing");
                    }
                    Some(Arc::new(client))
                }
                Err(e) => {
                    error!(error = %e, "fatal vault configuration error");
                    return ExitCode::from(1);
                }
            }
        }
    };

    // Without a provider key the scripted driver keeps the process useful
    // for dry runs; live agents need ANTHROPIC_API_KEY.
    let driver: Arc<dyn LlmDriver> = match &config.anthropic_api_key {
        Some(key) => Arc::new(AnthropicDriver::new(key.clone())),
        None => {
            warn!("ANTHROPIC_API_KEY not set, runs will fail at the first model turn");
            Arc::new(ScriptedDriver::new(vec![]))
        }
    };

    let store = Arc::new(Store::new());
    let kernel_config = KernelConfig {
        drain_timeout: config.drain_timeout,
        debounce_window: config.debounce_window,
        retention: legator_kernel::retention::RetentionConfig {
            ttl: config.retention_ttl,
            ..Default::default()
        },
        ..Default::default()
    };
    let kernel = Kernel::new(
        Arc::clone(&store),
        Arc::new(ToolRegistry::builtin()),
        driver,
        vault,
        kernel_config,
    );

    let shutdown = CancellationToken::new();
    kernel.start(&shutdown).await;

    let app = router(Arc::new(ApiState {
        triggers: Arc::clone(&kernel.triggers),
    }));
    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.listen_addr, error = %e, "failed to bind listener");
            return ExitCode::from(2);
        }
    };
    info!(addr = %config.listen_addr, "http surface listening");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    // Run until SIGINT/SIGTERM.
    wait_for_signal().await;
    info!("shutdown signal received, draining");
    shutdown.cancel();

    let cancelled = kernel.drain().await;
    if cancelled > 0 {
        warn!(cancelled, "runs were forcibly cancelled at the drain deadline");
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "http server error");
            return ExitCode::from(2);
        }
        Err(e) => {
            error!(error = %e, "http server task panicked");
            return ExitCode::from(2);
        }
    }

    info!("clean shutdown");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

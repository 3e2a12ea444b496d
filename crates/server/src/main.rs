//! The portal server binary: wires every crate in the workspace into one
//! listening process. Owns nothing itself beyond the single-instance
//! lockfile, the listener, and the background token sweeper — all
//! session-lifecycle and request-handling logic lives in
//! `portal-gateway` and `portal-registry`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use portal_core::config::Config;
use portal_core::lockfile::{AcquireResult, DaemonLockfile};
use portal_gateway::routes::build_router;
use portal_gateway::state::AppState;
use portal_gateway::directory::DirectoryVerifier;
use portal_gateway::identity::IdentityVerifier;
use portal_gateway::workspace::NullWorkspaceFiles;
use portal_harness::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use portal_harness::shutdown::ShutdownSignal;
use portal_registry::driver::{ContainerDriver, DockerContainerDriver};
use portal_registry::{PortAllocator, SessionRegistry, SessionRegistryConfig};
use portal_store::{OwnershipStore, TokenStore, UserStore};

const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::load().context("failed to load configuration")?;
    config.apply_env_overrides();
    config
        .validate()
        .context("invalid configuration, refusing to start")?;

    portal_telemetry::logging::init_from_format("portal-server", "info", &config.logging.format);

    let lockfile = DaemonLockfile {
        pid: std::process::id(),
        bind_host: config.server.bind_host.clone(),
        bind_port: config.server.bind_port,
        started_at: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    match lockfile.acquire() {
        Ok(AcquireResult::Acquired) => {}
        Ok(AcquireResult::StaleRemoved) => match lockfile.acquire() {
            Ok(AcquireResult::Acquired) => {}
            _ => anyhow::bail!("failed to acquire daemon lockfile after clearing a stale one"),
        },
        Ok(AcquireResult::AlreadyRunning(existing)) => {
            anyhow::bail!(
                "portal server already running (pid={}, bound to {}:{})",
                existing.pid,
                existing.bind_host,
                existing.bind_port
            );
        }
        Err(e) => return Err(e).context("failed to acquire daemon lockfile"),
    }

    let config = Arc::new(config);

    let state_dir = Config::default_path()
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("/var/lib/portal"));
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("failed to create state directory {}", state_dir.display()))?;

    let ownership = Arc::new(
        OwnershipStore::load(state_dir.join("ownership.tsv"))
            .context("failed to load ownership store")?,
    );

    let users = Arc::new(
        UserStore::load(
            config
                .auth
                .auth_file
                .clone()
                .unwrap_or_else(|| state_dir.join("users.json").to_string_lossy().into_owned()),
        )
        .context("failed to load local user file")?,
    );

    let directory = DirectoryVerifier::from_config(&config.directory_service);
    let identity = Arc::new(IdentityVerifier::new(users, directory));

    if identity.auth_disabled() {
        warn!(
            "no local users and no directory service configured — auth is disabled; \
             binding to loopback only regardless of BIND_HOST"
        );
    }

    let tokens = Arc::new(TokenStore::new(config.sessions.session_timeout_hours));

    let ports = PortAllocator::new(config.sessions.port_lo, config.sessions.port_hi);

    let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
    let driver: Arc<dyn ContainerDriver> = Arc::new(
        DockerContainerDriver::connect_with_defaults(breaker)
            .context("failed to connect to the container engine")?,
    );

    let registry = Arc::new(SessionRegistry::new(
        SessionRegistryConfig {
            max_sessions_per_user: config.sessions.max_sessions_per_user,
            ready_timeout: Duration::from_secs(config.sessions.ready_timeout_secs),
            container_image: config.containers.image.clone(),
            container_memory_mb: config.containers.memory_mb,
            container_cpu_quota: config.containers.cpu_quota,
            workspace_root: config.containers.workspace_root.clone(),
        },
        ports,
        ownership.clone(),
        driver,
    ));

    let shutdown = ShutdownSignal::new();

    let state = Arc::new(AppState::new(
        config.clone(),
        registry,
        ownership,
        tokens.clone(),
        identity,
        Arc::new(NullWorkspaceFiles),
        shutdown.clone(),
    ));

    spawn_token_sweeper(tokens, shutdown.clone());

    let router = build_router(state.clone());

    let bind_host = if state.identity.auth_disabled() {
        "127.0.0.1".to_string()
    } else {
        config.server.bind_host.clone()
    };
    let bind_addr = format!("{bind_host}:{}", config.server.bind_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {bind_addr}"))?;
    info!(addr = %bind_addr, "portal server listening");

    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating graceful shutdown");
        DaemonLockfile::remove();
        shutdown_for_signal.trigger();
    });

    let mut shutdown_rx = shutdown.subscribe();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .context("server loop exited with an error")?;

    DaemonLockfile::remove();
    info!("portal server stopped");
    Ok(())
}

/// Background sweeper that bounds the token store's memory by evicting
/// expired entries periodically (§4.4), independent of any one request
/// resolving an expired token and evicting it lazily.
fn spawn_token_sweeper(tokens: Arc<TokenStore>, shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        let mut rx = shutdown.subscribe();
        let mut ticker = tokio::time::interval(TOKEN_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = tokens.sweep_expired();
                    if swept > 0 {
                        info!(swept, "swept expired session tokens");
                    }
                }
                _ = rx.recv() => {
                    info!("token sweeper stopping for process shutdown");
                    return;
                }
            }
        }
    });
}

//! Thin adapter over the container engine: create-and-start, remove, and
//! poll-for-ready. The Session Registry depends only on the
//! [`ContainerDriver`] trait, so it is unit-testable against a stub
//! implementation without a real container engine.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config as BollardConfig, CreateContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use portal_harness::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use tracing::{info, warn};

/// The fixed port the terminal daemon listens on inside every container.
pub const CONTAINER_TERMINAL_PORT: u16 = 7681;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("container engine unreachable")]
    EngineUnreachable,
    #[error("container failed to start: {0}")]
    ContainerStartFailed(String),
    #[error("timed out waiting for terminal daemon readiness")]
    Timeout,
}

/// Opaque handle returned by [`ContainerDriver::create_and_start`]; callers
/// must treat its contents as implementation detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle(pub String);

/// Parameters for creating a session's backing container.
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub session_id: String,
    pub image: String,
    pub host_port: u16,
    pub memory_mb: u64,
    pub cpu_quota: f64,
    pub hostname: String,
    pub workspace_mount: String,
    pub env: HashMap<String, String>,
}

#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn create_and_start(&self, params: CreateParams) -> Result<ContainerHandle, DriverError>;

    /// Idempotent, forced removal — safe to call on an already-removed
    /// handle; teardown must be re-entrant.
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), DriverError>;

    async fn await_ready(&self, port: u16, deadline: Duration) -> Result<(), DriverError>;

    /// Used by `/readyz` — whether the engine itself answers at all,
    /// independent of any particular container.
    async fn engine_reachable(&self) -> bool;
}

/// Production [`ContainerDriver`] backed by the Docker-compatible engine
/// via `bollard`, with a circuit breaker guarding every engine call so a
/// burst of `/session/new` requests during an outage fails fast.
pub struct DockerContainerDriver {
    docker: Docker,
    breaker: CircuitBreaker,
}

impl DockerContainerDriver {
    pub fn new(docker: Docker, breaker: CircuitBreaker) -> Self {
        Self { docker, breaker }
    }

    pub fn connect_with_defaults(
        breaker: CircuitBreaker,
    ) -> Result<Self, bollard::errors::Error> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker, breaker))
    }
}

fn map_breaker_error(e: CircuitBreakerError) -> DriverError {
    match e {
        CircuitBreakerError::Open | CircuitBreakerError::Timeout(_) => {
            DriverError::EngineUnreachable
        }
        CircuitBreakerError::Inner(msg) => DriverError::ContainerStartFailed(msg),
    }
}

#[async_trait]
impl ContainerDriver for DockerContainerDriver {
    async fn create_and_start(&self, params: CreateParams) -> Result<ContainerHandle, DriverError> {
        let name = format!("session-{}", params.session_id);
        let docker = self.docker.clone();
        let params_clone = params.clone();

        let container_id = self
            .breaker
            .call(|| async move {
                let mut port_bindings = HashMap::new();
                port_bindings.insert(
                    format!("{}/tcp", CONTAINER_TERMINAL_PORT),
                    Some(vec![PortBinding {
                        host_ip: Some("127.0.0.1".to_string()),
                        host_port: Some(params_clone.host_port.to_string()),
                    }]),
                );

                let host_config = HostConfig {
                    port_bindings: Some(port_bindings),
                    memory: Some((params_clone.memory_mb * 1024 * 1024) as i64),
                    nano_cpus: Some((params_clone.cpu_quota * 1_000_000_000.0) as i64),
                    binds: Some(vec![format!(
                        "{}:/workspace:rw",
                        params_clone.workspace_mount
                    )]),
                    restart_policy: Some(RestartPolicy {
                        name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                        maximum_retry_count: None,
                    }),
                    ..Default::default()
                };

                let env: Vec<String> = params_clone
                    .env
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();

                let config = BollardConfig {
                    image: Some(params_clone.image.clone()),
                    hostname: Some(params_clone.hostname.clone()),
                    env: Some(env),
                    labels: Some(HashMap::from([(
                        "portal.session".to_string(),
                        params_clone.session_id.clone(),
                    )])),
                    host_config: Some(host_config),
                    ..Default::default()
                };

                let options = CreateContainerOptions {
                    name: format!("session-{}", params_clone.session_id),
                    platform: None,
                };

                let created = docker.create_container(Some(options), config).await?;
                docker
                    .start_container(&created.id, None::<StartContainerOptions<String>>)
                    .await?;
                Ok::<String, bollard::errors::Error>(created.id)
            })
            .await
            .map_err(map_breaker_error)?;

        info!(%name, container_id, "container created and started");
        Ok(ContainerHandle(container_id))
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), DriverError> {
        let docker = self.docker.clone();
        let id = handle.0.clone();
        let result = self
            .breaker
            .call(|| async move {
                let _ = docker
                    .stop_container(&id, Some(StopContainerOptions { t: 5 }))
                    .await;
                docker
                    .remove_container(
                        &id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            // Removal is idempotent: "no such container" is not a failure.
            Err(CircuitBreakerError::Inner(msg)) if msg.contains("No such container") => Ok(()),
            Err(e) => {
                warn!(container_id = %handle.0, error = %e, "failed to remove container");
                Err(map_breaker_error(e))
            }
        }
    }

    async fn await_ready(&self, port: u16, deadline: Duration) -> Result<(), DriverError> {
        let start = tokio::time::Instant::now();
        loop {
            match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
                Ok(_) => return Ok(()),
                Err(_) if start.elapsed() < deadline => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Err(_) => return Err(DriverError::Timeout),
            }
        }
    }

    async fn engine_reachable(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

/// Exposed outside this crate's own test binary (behind the `test-util`
/// feature) so downstream crates — notably `portal-gateway`'s
/// router-level integration tests — can exercise the Session Registry
/// end to end without a real container engine.
#[cfg(any(test, feature = "test-util"))]
pub mod stub {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// A programmable stub used to unit-test the Session Registry without
    /// a real container engine.
    pub struct StubContainerDriver {
        pub fail_create: AtomicBool,
        pub fail_ready: AtomicBool,
        pub removed: Mutex<Vec<ContainerHandle>>,
    }

    impl StubContainerDriver {
        pub fn new() -> Self {
            Self {
                fail_create: AtomicBool::new(false),
                fail_ready: AtomicBool::new(false),
                removed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerDriver for StubContainerDriver {
        async fn create_and_start(
            &self,
            params: CreateParams,
        ) -> Result<ContainerHandle, DriverError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(DriverError::ContainerStartFailed("stub failure".into()));
            }
            Ok(ContainerHandle(format!("stub-{}", params.session_id)))
        }

        async fn remove(&self, handle: &ContainerHandle) -> Result<(), DriverError> {
            self.removed.lock().unwrap().push(handle.clone());
            Ok(())
        }

        async fn await_ready(&self, _port: u16, _deadline: Duration) -> Result<(), DriverError> {
            if self.fail_ready.load(Ordering::SeqCst) {
                Err(DriverError::Timeout)
            } else {
                Ok(())
            }
        }

        async fn engine_reachable(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn stub_create_and_remove_roundtrips() {
        let driver = StubContainerDriver::new();
        let handle = driver
            .create_and_start(CreateParams {
                session_id: "abc".into(),
                image: "portal-terminal:latest".into(),
                host_port: 20000,
                memory_mb: 256,
                cpu_quota: 1.0,
                hostname: "abc".into(),
                workspace_mount: "/tmp/abc".into(),
                env: HashMap::new(),
            })
            .await
            .unwrap();
        driver.remove(&handle).await.unwrap();
        assert_eq!(driver.removed.lock().unwrap().len(), 1);
    }
}

//! Docker/Podman client wrapper.
//!
//! Owns the daemon connection and the low-level probes (image presence,
//! container state) the manager builds on. Endpoint selection walks a fixed
//! candidate list instead of requiring configuration: the default Docker
//! endpoint first, then any Podman socket actually present on disk.

use crate::container::{ContainerError, Result};
use bollard::Docker;
use std::sync::Arc;
use tracing::{debug, info};

/// Seconds before a connection attempt is abandoned.
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Whether an API error is a plain 404.
fn is_not_found(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Docker/Podman API client wrapper.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
}

impl ContainerClient {
    /// Connect to the first reachable container runtime and verify it
    /// answers a ping.
    ///
    /// # Errors
    ///
    /// Returns error when every candidate endpoint fails; the message
    /// lists what was tried.
    pub async fn new() -> Result<Self> {
        let docker = Self::connect()?;
        let client = Self {
            docker: Arc::new(docker),
        };
        client.ping().await?;
        Ok(client)
    }

    /// Walk the endpoint candidates: Docker's defaults (honoring
    /// `DOCKER_HOST`), then Podman sockets that exist on disk.
    fn connect() -> Result<Docker> {
        let mut tried = Vec::new();

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Using default container runtime endpoint");
                return Ok(docker);
            }
            Err(e) => tried.push(format!("default endpoint: {}", e)),
        }

        #[cfg(unix)]
        for socket in Self::podman_socket_candidates() {
            if !std::path::Path::new(&socket).exists() {
                continue;
            }
            let uri = format!("unix://{}", socket);
            debug!("Probing Podman socket {}", socket);
            match Docker::connect_with_socket(&uri, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION) {
                Ok(docker) => {
                    info!("Using Podman socket {}", socket);
                    return Ok(docker);
                }
                Err(e) => tried.push(format!("{}: {}", socket, e)),
            }
        }

        Err(ContainerError::Other(format!(
            "no container runtime reachable ({})",
            tried.join("; ")
        )))
    }

    /// Podman socket paths worth probing, rootless before system-wide.
    #[cfg(unix)]
    fn podman_socket_candidates() -> Vec<String> {
        let mut candidates = Vec::new();
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            candidates.push(format!("{}/podman/podman.sock", runtime_dir));
        }
        if let Ok(home) = std::env::var("HOME") {
            candidates.push(format!("{}/run/podman/podman.sock", home));
        }
        candidates.push("/run/podman/podman.sock".to_string());
        candidates
    }

    /// Round-trip to the daemon.
    ///
    /// # Errors
    ///
    /// Returns error if the runtime does not answer.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Get the underlying Docker client for direct API access.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Whether an image is present locally.
    ///
    /// # Errors
    ///
    /// Returns error for any failure other than the image being absent.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Inspect a container, mapping a 404 to [`ContainerError::NotFound`].
    async fn inspect(
        &self,
        name_or_id: &str,
    ) -> Result<bollard::models::ContainerInspectResponse> {
        self.docker
            .inspect_container(
                name_or_id,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ContainerError::NotFound(name_or_id.to_string())
                } else {
                    ContainerError::Api(e)
                }
            })
    }

    /// Container state by name or ID. A container the runtime reports no
    /// state for counts as stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] for unknown containers.
    pub async fn container_state(&self, name_or_id: &str) -> Result<ContainerState> {
        let state = self.inspect(name_or_id).await?.state.unwrap_or_default();
        Ok(match state {
            s if s.paused.unwrap_or(false) => ContainerState::Paused,
            s if s.running.unwrap_or(false) => ContainerState::Running,
            _ => ContainerState::Stopped,
        })
    }

    /// Resolve a container name to its ID.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if no such container exists.
    pub async fn resolve_id(&self, name: &str) -> Result<String> {
        self.inspect(name)
            .await?
            .id
            .ok_or_else(|| ContainerError::Other(format!("Container {} has no ID", name)))
    }
}

/// Container state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Container is running
    Running,
    /// Container is paused
    Paused,
    /// Container is stopped or was never started
    Stopped,
}

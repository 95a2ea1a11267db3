//! Container provisioning and teardown.
//!
//! High-level manager over the runtime client: pulls images to completion,
//! creates containers with the fixed security profile and the session
//! workspace bound at `/workspace`, keeps the warm pool serviced, cleans
//! workspaces between reuses, and pairs container removal with host
//! workspace deletion. A final sweep removes orphaned managed containers
//! left behind by crashed processes.

use crate::container::client::{ContainerClient, ContainerState};
use crate::container::config::{
    ContainerConfig, CPU_PERIOD_MICROS, IDLE_COMMAND, MountSpec, WORKSPACE_TARGET,
};
use crate::container::exec::{ExecRequest, run_exec};
use crate::container::pool::{ContainerPool, PoolConfig};
use crate::container::{ContainerError, Result};
use crate::workspace;
use bollard::Docker;
use bollard::service::HostConfig;
use dashmap::DashMap;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shell command that empties `/workspace`, dotfiles included.
const CLEAN_WORKSPACE_CMD: &str = "rm -rf /workspace/* /workspace/.[!.]* /workspace/..?*";

/// Label marking containers owned by this orchestrator.
const MANAGED_LABEL: &str = "codebox.managed";

/// Container manager configuration.
#[derive(Debug, Clone)]
pub struct ContainerManagerConfig {
    /// Container name prefix for ownership identification
    pub name_prefix: String,
    /// Seconds to wait for a graceful stop before killing
    pub stop_timeout: i64,
    /// Warm-pool bounds
    pub pool: PoolConfig,
}

impl Default for ContainerManagerConfig {
    fn default() -> Self {
        Self {
            name_prefix: "codebox".to_string(),
            stop_timeout: 10,
            pool: PoolConfig::default(),
        }
    }
}

/// A container created and tracked by the manager.
#[derive(Debug, Clone)]
pub struct ManagedContainer {
    /// Runtime-assigned container ID
    pub id: String,
    /// Orchestrator-assigned name (`<prefix>-<uuid>`)
    pub name: String,
    /// Image the container was created from
    pub image: String,
    /// Host directory bound at `/workspace`
    pub workspace_dir: PathBuf,
}

/// Warm-pool occupancy snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Total tracked entries
    pub size: usize,
    /// Entries not currently borrowed
    pub free: usize,
}

/// High-level container manager.
pub struct ContainerManager {
    client: ContainerClient,
    config: ContainerManagerConfig,
    pool: ContainerPool,
    tracked: DashMap<String, ManagedContainer>,
}

impl ContainerManager {
    /// Create a manager with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to the container runtime fails.
    pub async fn new() -> Result<Self> {
        Self::with_config(ContainerManagerConfig::default()).await
    }

    /// Create a manager with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to the container runtime fails.
    pub async fn with_config(config: ContainerManagerConfig) -> Result<Self> {
        let client = ContainerClient::new().await?;
        let pool = ContainerPool::new(config.pool.clone());
        Ok(Self {
            client,
            config,
            pool,
            tracked: DashMap::new(),
        })
    }

    /// The underlying API client.
    pub fn client(&self) -> &ContainerClient {
        &self.client
    }

    /// Direct access to the bollard client.
    pub fn docker(&self) -> &Docker {
        self.client.docker()
    }

    /// The configured container name prefix.
    pub fn name_prefix(&self) -> &str {
        &self.config.name_prefix
    }

    /// Allocate a unique container name under the managed prefix.
    pub fn allocate_name(&self) -> String {
        format!("{}-{}", self.config.name_prefix, Uuid::new_v4())
    }

    /// Current warm-pool occupancy.
    pub fn pool_status(&self) -> PoolStatus {
        let (size, free) = self.pool.counts();
        PoolStatus { size, free }
    }

    /// Pull an image if not present locally, awaiting pull completion.
    ///
    /// # Errors
    ///
    /// Returns error if the pull fails.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.client.image_exists(image).await? {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        info!("Pulling image: {}", image);
        let mut stream = self.docker().create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => return Err(ContainerError::Api(e)),
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    /// Create and start a container with the baseline profile.
    ///
    /// The workspace directory is bound read-write at `/workspace`; the
    /// caller-supplied mounts from `config` are bound after it. Zip mounts
    /// are extracted to a temp directory first.
    ///
    /// # Errors
    ///
    /// Returns error on pull, mount resolution, create, or start failure.
    /// A container that was created but failed to start is removed again.
    pub async fn provision(
        &self,
        image: &str,
        name: &str,
        workspace_dir: &Path,
        config: &ContainerConfig,
    ) -> Result<ManagedContainer> {
        self.ensure_image(image).await?;

        let mut binds = vec![format!("{}:{}:rw", workspace_dir.display(), WORKSPACE_TARGET)];
        for mount in &config.mounts {
            binds.push(self.resolve_mount(mount).await?);
        }

        let memory = config.memory_bytes();
        let cpu_quota = config.cpu_quota();

        let host_config = HostConfig {
            binds: Some(binds),
            memory: Some(memory),
            memory_swap: Some(memory),
            cpu_period: Some(CPU_PERIOD_MICROS),
            cpu_quota: Some(cpu_quota),
            network_mode: Some("bridge".to_string()),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            ..Default::default()
        };

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let container_config = bollard::container::Config {
            image: Some(image.to_string()),
            cmd: Some(IDLE_COMMAND.iter().map(|s| s.to_string()).collect()),
            working_dir: Some(WORKSPACE_TARGET.to_string()),
            env: if config.env.is_empty() {
                None
            } else {
                Some(config.env.clone())
            },
            tty: Some(true),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        debug!("Creating container {} from {}", name, image);
        let response = self
            .docker()
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name,
                    ..Default::default()
                }),
                container_config,
            )
            .await?;

        let container = ManagedContainer {
            id: response.id.clone(),
            name: name.to_string(),
            image: image.to_string(),
            workspace_dir: workspace_dir.to_path_buf(),
        };

        if let Err(e) = self.start(&container.id).await {
            warn!("Container {} failed to start, removing: {}", name, e);
            let _ = self.force_remove(&container.id).await;
            return Err(e);
        }

        info!(
            "Created container {} ({})",
            name,
            response.id.get(..12).unwrap_or(&response.id)
        );

        self.tracked.insert(container.id.clone(), container.clone());
        Ok(container)
    }

    /// Turn a mount spec into a bind string, extracting zip archives.
    async fn resolve_mount(&self, mount: &MountSpec) -> Result<String> {
        match mount {
            MountSpec::File { source, target } => {
                if !tokio::fs::try_exists(source).await? {
                    return Err(ContainerError::Mount(format!(
                        "File mount source does not exist: {}",
                        source.display()
                    )));
                }
                Ok(format!("{}:{}:ro", source.display(), target))
            }
            MountSpec::Directory { source, target } => {
                if !tokio::fs::try_exists(source).await? {
                    return Err(ContainerError::Mount(format!(
                        "Directory mount source does not exist: {}",
                        source.display()
                    )));
                }
                Ok(format!("{}:{}:rw", source.display(), target))
            }
            MountSpec::Zip { source, target } => {
                let extracted = workspace::extract_zip(source)
                    .await
                    .map_err(|e| ContainerError::Mount(e.to_string()))?;
                Ok(format!("{}:{}:rw", extracted.display(), target))
            }
        }
    }

    /// Start a container.
    pub async fn start(&self, container_id: &str) -> Result<()> {
        self.docker()
            .start_container(
                container_id,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await?;
        Ok(())
    }

    /// Stop a container gracefully, without removing it.
    pub async fn stop(&self, container_id: &str) -> Result<()> {
        self.docker()
            .stop_container(
                container_id,
                Some(bollard::container::StopContainerOptions {
                    t: self.config.stop_timeout,
                }),
            )
            .await?;
        Ok(())
    }

    /// Kill a container immediately. Used when an exec exceeds its timeout.
    pub async fn kill(&self, container_id: &str) -> Result<()> {
        self.docker()
            .kill_container(
                container_id,
                Some(bollard::container::KillContainerOptions { signal: "SIGKILL" }),
            )
            .await?;
        Ok(())
    }

    /// Start a container if it is not currently running.
    pub async fn ensure_running(&self, container: &ManagedContainer) -> Result<()> {
        match self.client.container_state(&container.id).await? {
            ContainerState::Running => Ok(()),
            _ => self.start(&container.id).await,
        }
    }

    /// Empty `/workspace` inside a container and verify the exec succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Cleanup`] when the cleanup command exits
    /// nonzero or cannot be run.
    pub async fn clean_workspace(&self, container_id: &str) -> Result<()> {
        let request = ExecRequest::shell(CLEAN_WORKSPACE_CMD);
        let output = run_exec(self.docker(), container_id, &request, None, None).await?;
        if !output.success() {
            return Err(ContainerError::Cleanup(format!(
                "exit code {}: {}",
                output.exit_code, output.stderr
            )));
        }
        Ok(())
    }

    /// Update the live memory and CPU caps of a container.
    ///
    /// Swap is pinned to the memory cap so the container gets no extra
    /// headroom beyond it.
    pub async fn apply_resource_limits(
        &self,
        container_id: &str,
        memory_bytes: i64,
        cpu_quota: i64,
    ) -> Result<()> {
        self.docker()
            .update_container(
                container_id,
                bollard::container::UpdateContainerOptions::<String> {
                    memory: Some(memory_bytes),
                    memory_swap: Some(memory_bytes),
                    cpu_period: Some(CPU_PERIOD_MICROS),
                    cpu_quota: Some(cpu_quota),
                    ..Default::default()
                },
            )
            .await?;
        debug!(
            "Updated limits on {}: memory={} cpu_quota={}",
            container_id.get(..12).unwrap_or(container_id),
            memory_bytes,
            cpu_quota
        );
        Ok(())
    }

    /// Force-remove a container and, if requested, its workspace directory.
    pub async fn remove_container(
        &self,
        container: &ManagedContainer,
        delete_dir: bool,
    ) -> Result<()> {
        self.force_remove(&container.id).await?;
        self.tracked.remove(&container.id);
        self.pool.discard(&container.id);

        if delete_dir {
            workspace::remove_dir(&container.workspace_dir).await?;
        }

        info!("Removed container {}", container.name);
        Ok(())
    }

    async fn force_remove(&self, container_id: &str) -> Result<()> {
        self.docker()
            .remove_container(
                container_id,
                Some(bollard::container::RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    /// Acquire a warm container for the image, or create one if the pool
    /// has room. Returns `None` when the pool is exhausted or the matched
    /// entry failed its workspace cleanup.
    ///
    /// # Errors
    ///
    /// Returns error only for provisioning failures of a fresh container.
    pub async fn pool_acquire(
        &self,
        image: &str,
        config: &ContainerConfig,
    ) -> Result<Option<ManagedContainer>> {
        if let Some(container) = self.pool.borrow_matching(image) {
            match self.prepare_reused(&container).await {
                Ok(()) => {
                    debug!("Pool hit for image {}: {}", image, container.name);
                    return Ok(Some(container));
                }
                Err(e) => {
                    warn!(
                        "Pooled container {} failed workspace cleanup, discarding: {}",
                        container.name, e
                    );
                    self.pool.discard(&container.id);
                    if let Err(e) = self.remove_container(&container, true).await {
                        warn!("Failed to remove unusable pooled container: {}", e);
                    }
                    return Ok(None);
                }
            }
        }

        if !self.pool.has_room() {
            debug!("Pool at capacity, no free entry for image {}", image);
            return Ok(None);
        }

        let name = self.allocate_name();
        let workspace_dir = workspace::ensure_dir_for(&name).await?;
        let container = self.provision(image, &name, &workspace_dir, config).await?;

        if !self.pool.insert_within_cap(container.clone(), true) {
            // Lost a race on the last slot.
            warn!("Pool filled while provisioning {}, removing it", name);
            self.remove_container(&container, true).await?;
            return Ok(None);
        }

        Ok(Some(container))
    }

    async fn prepare_reused(&self, container: &ManagedContainer) -> Result<()> {
        self.ensure_running(container).await?;
        self.clean_workspace(&container.id).await
    }

    /// Return a borrowed container to the pool, then run pool maintenance:
    /// evict idle-expired entries and top the pool back up to its minimum
    /// size with fresh containers of the just-released image.
    pub async fn pool_release(&self, container: &ManagedContainer) {
        match self.clean_workspace(&container.id).await {
            Ok(()) => self.pool.mark_free(&container.id),
            Err(e) => {
                warn!(
                    "Container {} failed cleanup on release, removing: {}",
                    container.name, e
                );
                self.pool.discard(&container.id);
                if let Err(e) = self.remove_container(container, true).await {
                    warn!("Failed to remove container after cleanup failure: {}", e);
                }
            }
        }

        for expired in self.pool.take_idle_expired() {
            info!("Evicting idle pooled container {}", expired.name);
            if let Err(e) = self.remove_container(&expired, true).await {
                warn!("Failed to evict pooled container {}: {}", expired.name, e);
            }
        }

        let min_size = self.pool.config().min_size;
        loop {
            let (total, _) = self.pool.counts();
            if total >= min_size {
                break;
            }
            let name = self.allocate_name();
            let workspace_dir = match workspace::ensure_dir_for(&name).await {
                Ok(dir) => dir,
                Err(e) => {
                    warn!("Failed to create workspace for pool spare: {}", e);
                    break;
                }
            };
            match self
                .provision(&container.image, &name, &workspace_dir, &ContainerConfig::default())
                .await
            {
                Ok(spare) => {
                    if !self.pool.insert_within_cap(spare.clone(), false) {
                        let _ = self.remove_container(&spare, true).await;
                        break;
                    }
                    debug!("Topped up pool with {}", spare.name);
                }
                Err(e) => {
                    warn!("Failed to top up pool: {}", e);
                    break;
                }
            }
        }
    }

    /// Remove everything the manager tracks, then sweep orphaned managed
    /// containers left over from previous runs.
    ///
    /// Residue from crashes is identified by the name prefix; any such
    /// container that is no longer running is removed along with its host
    /// workspace directory.
    pub async fn cleanup(&self) -> Result<()> {
        for container in self.pool.drain_all() {
            if let Err(e) = self.remove_container(&container, true).await {
                warn!("Failed to remove pooled container {}: {}", container.name, e);
            }
        }

        let remaining: Vec<ManagedContainer> =
            self.tracked.iter().map(|e| e.value().clone()).collect();
        for container in remaining {
            if let Err(e) = self.remove_container(&container, true).await {
                warn!("Failed to remove container {}: {}", container.name, e);
            }
        }

        self.sweep_orphans().await
    }

    async fn sweep_orphans(&self) -> Result<()> {
        let mut filters = HashMap::new();
        filters.insert(
            "name".to_string(),
            vec![format!("{}-", self.config.name_prefix)],
        );

        let containers = self
            .docker()
            .list_containers(Some(bollard::container::ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        for summary in containers {
            let running = summary
                .state
                .as_ref()
                .map(|s| s.to_string().eq_ignore_ascii_case("running"))
                .unwrap_or(false);
            if running {
                continue;
            }

            let Some(id) = summary.id else { continue };
            let name = summary
                .names
                .unwrap_or_default()
                .into_iter()
                .next()
                .map(|n| n.trim_start_matches('/').to_string());

            info!(
                "Sweeping orphaned container {}",
                name.as_deref().unwrap_or(&id)
            );
            if let Err(e) = self.force_remove(&id).await {
                warn!("Failed to remove orphan {}: {}", id, e);
                continue;
            }
            self.tracked.remove(&id);

            if let Some(name) = name {
                if let Err(e) = workspace::remove_dir(&workspace::dir_for(&name)).await {
                    warn!("Failed to remove orphan workspace for {}: {}", name, e);
                }
            }
        }

        Ok(())
    }
}

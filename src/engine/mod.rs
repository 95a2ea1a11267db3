//! Execution engine.
//!
//! The orchestrator proper: consumes the language registry, the container
//! manager, and the session store to run untrusted code. One
//! [`ExecutionEngine::execute_code`] call walks a fixed pipeline:
//! validate, resolve the image, acquire a container per the session's
//! placement strategy, apply resource overrides, capture the workspace
//! baseline, install dependencies (checksum-cached), prepare the run
//! target, exec with live stream demultiplexing, account generated files,
//! and return or retain the container.

use crate::container::{
    ContainerError, ContainerManager, ContainerManagerConfig, ExecHandle, ExecRequest,
    ManagedContainer, MountSpec, PoolStatus, cpu_quota_for, images_match, parse_memory_limit,
};
use crate::language::{self, LanguagePlugin};
use crate::session::{
    ContainerMeta, PlacementStrategy, Session, SessionConfig, SessionStore, WorkspaceSharing,
};
use crate::workspace::{self, WorkspaceError};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

mod options;

pub use options::{ExecutionOptions, ExecutionResult, RunApp, StreamOutput};

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No plugin registered for the requested language
    #[error("Unknown language: {0}")]
    UnknownLanguage(String),

    /// Session id does not exist
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session id already exists and a new one was enforced
    #[error("Session already exists: {0}")]
    SessionExists(String),

    /// Invalid strategy/sharing/run-target combination
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Warm pool has no free entry and no room for a new container
    #[error("Container pool exhausted for image {0}")]
    PoolExhausted(String),

    /// Session has no container whose workspace could be accessed
    #[error("Session {0} has no active workspace")]
    NoWorkspace(String),

    /// Execution exceeded the caller-supplied timeout
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// Container runtime failure
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Host workspace failure
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Logging detail for per-phase progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Phase progress at debug level
    Info,
    /// Phase progress promoted to info level
    Debug,
}

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Container manager configuration (name prefix, stop timeout, pool)
    pub manager: ContainerManagerConfig,
}

/// The sandbox orchestrator.
///
/// Cheap to share behind an `Arc`; independent sessions may execute
/// concurrently, while calls within one session are serialized by contract.
pub struct ExecutionEngine {
    manager: Arc<ContainerManager>,
    sessions: SessionStore,
    verbose_phases: AtomicBool,
}

impl ExecutionEngine {
    /// Engine with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the container runtime is unreachable.
    pub async fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default()).await
    }

    /// Engine with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the container runtime is unreachable.
    pub async fn with_config(config: EngineConfig) -> Result<Self> {
        let manager = ContainerManager::with_config(config.manager).await?;
        Ok(Self {
            manager: Arc::new(manager),
            sessions: SessionStore::new(),
            verbose_phases: AtomicBool::new(false),
        })
    }

    /// Promote or demote per-phase progress logging.
    pub fn set_verbosity(&self, verbosity: Verbosity) {
        self.verbose_phases
            .store(verbosity == Verbosity::Debug, Ordering::Relaxed);
    }

    fn phase(&self, message: String) {
        if self.verbose_phases.load(Ordering::Relaxed) {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
    }

    /// Current warm-pool occupancy.
    pub fn pool_status(&self) -> PoolStatus {
        self.manager.pool_status()
    }

    /// Ids of all live sessions.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.session_ids()
    }

    /// Create a session, or return an existing one.
    ///
    /// A requested id that already exists is returned as-is unless the
    /// configuration enforces a new session, in which case this fails.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionExists`] when `enforce_new_session` is
    /// set and the id is taken.
    pub fn create_session(&self, config: SessionConfig) -> Result<String> {
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.sessions.contains(&session_id) {
            if config.enforce_new_session {
                return Err(EngineError::SessionExists(session_id));
            }
            debug!("Reusing existing session {}", session_id);
            return Ok(session_id);
        }

        self.sessions.insert(&session_id, config);
        info!("Created session {}", session_id);
        Ok(session_id)
    }

    /// Point-in-time view of a session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionNotFound`] for unknown ids.
    pub fn get_session_info(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .snapshot(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    /// Execute code in a session.
    ///
    /// # Errors
    ///
    /// Configuration problems surface before any container is touched;
    /// provisioning and exec failures propagate. A nonzero exit code from
    /// the user code is not an error and is reported on the result.
    pub async fn execute_code(
        &self,
        session_id: &str,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult> {
        // Step 1: validate.
        let config = self
            .sessions
            .config(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        let plugin = language::get(&options.language)
            .ok_or_else(|| EngineError::UnknownLanguage(options.language.clone()))?;

        if options.workspace_sharing == WorkspaceSharing::Shared
            && config.strategy != PlacementStrategy::PerSession
        {
            return Err(EngineError::InvalidConfiguration(
                "shared workspaces require the per-session placement strategy".to_string(),
            ));
        }

        if options.code.is_none() && options.run_app.is_none() {
            return Err(EngineError::InvalidConfiguration(
                "either inline code or a run-app target is required".to_string(),
            ));
        }

        if let Some(run_app) = &options.run_app {
            let mounted = config.container.mounts.iter().any(|m| {
                matches!(m, MountSpec::Directory { .. } | MountSpec::Zip { .. })
                    && m.target() == run_app.cwd
            });
            if !mounted {
                return Err(EngineError::InvalidConfiguration(format!(
                    "run-app cwd {} does not match any directory mount target",
                    run_app.cwd
                )));
            }
        }

        // Step 2: resolve image.
        let image = config
            .container
            .image
            .clone()
            .unwrap_or_else(|| plugin.default_image().to_string());

        // Step 3: acquire container and workspace.
        self.phase(format!(
            "Acquiring {:?} container for session {} (image {})",
            config.strategy, session_id, image
        ));
        let meta = self
            .acquire_container(session_id, &config, &image, options.workspace_sharing)
            .await?;

        // Manifest files for the dependency phase. The snippet itself is
        // delivered through an exec in step 7, never written on the host.
        plugin
            .materialize(&options.dependencies, &meta.workspace_dir)
            .await?;

        self.sessions.set_running(&meta.container_id, true);

        let outcome = self
            .run_pipeline(&config, plugin.as_ref(), meta, &options)
            .await;

        match &outcome {
            Ok(result) => self.phase(format!(
                "Execution finished in {} ms with exit code {}",
                result.execution_time_ms, result.exit_code
            )),
            Err(e) => {
                if let Some(meta) = self.sessions.current_meta(session_id) {
                    self.sessions.set_running(&meta.container_id, false);
                }
                warn!("Execution failed in session {}: {}", session_id, e);
            }
        }
        let result = outcome?;

        // Step 10: return/retain per strategy. Pooled containers stay
        // bound to the session until cleanup; per-session containers keep
        // running; per-execution containers die here.
        if config.strategy == PlacementStrategy::PerExecution {
            self.teardown_one_shot(session_id, options.keep_generated_files)
                .await;
        }

        Ok(result)
    }

    /// Steps 4 through 9 on an acquired container.
    async fn run_pipeline(
        &self,
        config: &SessionConfig,
        plugin: &dyn LanguagePlugin,
        mut meta: ContainerMeta,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();

        // Step 4: resource overrides. Caps are applied before every exec so
        // a reused container never keeps a previous run's limits.
        let memory_bytes = match options.memory_limit.as_deref() {
            Some(limit) => match parse_memory_limit(limit) {
                Some(bytes) => bytes,
                None => {
                    warn!("Unparseable memory limit {:?}, keeping session cap", limit);
                    config.container.memory_bytes()
                }
            },
            None => config.container.memory_bytes(),
        };
        let cpu_quota = options
            .cpu_limit
            .map(cpu_quota_for)
            .unwrap_or_else(|| config.container.cpu_quota());

        if let Err(e) = self
            .manager
            .apply_resource_limits(&meta.container_id, memory_bytes, cpu_quota)
            .await
        {
            warn!(
                "Failed to update resource limits on {}: {}",
                meta.container_name, e
            );
        }

        // Step 5: baseline, before any user code runs.
        meta.baseline_files = workspace::snapshot_files(&meta.workspace_dir).await?;

        // Step 6: dependency phase.
        let (dependency_stdout, dependency_stderr) =
            self.install_dependencies(plugin, &mut meta, options).await?;

        self.sessions.update_meta(&meta.container_id, |m| {
            m.deps_installed = meta.deps_installed;
            m.deps_checksum = meta.deps_checksum.clone();
            m.baseline_files = meta.baseline_files.clone();
        });

        // Step 7: prepare the run target.
        let (working_dir, command) = if let Some(run_app) = &options.run_app {
            (
                run_app.cwd.clone(),
                plugin.run_app_command(&run_app.entry_file, meta.deps_installed),
            )
        } else {
            let code = options.code.as_deref().unwrap_or_default();
            self.write_inline_code(&meta, plugin, code).await?;
            // The snippet lands after the baseline was captured; fold it in
            // so it is never reported as a generated file.
            meta.baseline_files
                .insert(meta.workspace_dir.join(plugin.inline_filename()));
            (
                "/workspace".to_string(),
                plugin.inline_command(meta.deps_installed),
            )
        };

        // Step 8: execute with live demultiplexing.
        self.phase(format!(
            "Running {:?} in {} ({})",
            command, working_dir, meta.container_name
        ));
        let request = ExecRequest::new(command).in_dir(working_dir);
        let handle = ExecHandle::new(self.manager.docker(), &meta.container_id);

        let run = handle.run(
            &request,
            options.streams.stdout.as_deref(),
            options.streams.stderr.as_deref(),
        );
        let output = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result?,
                Err(_) => {
                    self.kill_timed_out(&meta).await;
                    return Err(EngineError::Timeout(limit));
                }
            },
            None => run.await?,
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        // Step 9: post-run accounting.
        let current_files = workspace::snapshot_files(&meta.workspace_dir).await?;
        let generated: BTreeSet<PathBuf> = current_files
            .difference(&meta.baseline_files)
            .filter(|p| p.starts_with(&meta.workspace_dir))
            .cloned()
            .collect();

        meta.generated_files = generated.clone();
        meta.session_generated_files.extend(generated.iter().cloned());

        self.sessions.update_meta(&meta.container_id, |m| {
            m.generated_files = meta.generated_files.clone();
            m.session_generated_files
                .extend(meta.generated_files.iter().cloned());
        });
        self.sessions.set_running(&meta.container_id, false);

        Ok(ExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            dependency_stdout,
            dependency_stderr,
            exit_code: output.exit_code,
            execution_time_ms,
            workspace_dir: meta.workspace_dir.clone(),
            generated_files: meta.generated_files.iter().cloned().collect(),
            session_generated_files: meta.session_generated_files.iter().cloned().collect(),
        })
    }

    /// Step 6: install dependencies unless the checksum cache matches.
    ///
    /// On success the baseline is re-captured so installer artifacts are
    /// not reported as generated files. On a nonzero installer exit the run
    /// proceeds with `deps_installed` left false; command builders may fall
    /// back or fail loudly.
    async fn install_dependencies(
        &self,
        plugin: &dyn LanguagePlugin,
        meta: &mut ContainerMeta,
        options: &ExecutionOptions,
    ) -> Result<(String, String)> {
        let checksum = dependency_checksum(&options.dependencies);

        if meta.deps_installed && meta.deps_checksum == checksum {
            self.phase(format!(
                "Dependency cache hit on {} ({} entries)",
                meta.container_name,
                options.dependencies.len()
            ));
            return Ok((String::new(), String::new()));
        }

        if options.dependencies.is_empty() {
            meta.deps_installed = true;
            meta.deps_checksum = checksum;
            return Ok((String::new(), String::new()));
        }

        self.phase(format!(
            "Installing {} dependencies on {}",
            options.dependencies.len(),
            meta.container_name
        ));

        let handle = ExecHandle::new(self.manager.docker(), &meta.container_id);
        let install = plugin.install_dependencies(
            &handle,
            &options.dependencies,
            options.streams.dependency_stdout.as_deref(),
            options.streams.dependency_stderr.as_deref(),
        );

        let outcome = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, install).await {
                Ok(result) => result?,
                Err(_) => {
                    self.kill_timed_out(meta).await;
                    return Err(EngineError::Timeout(limit));
                }
            },
            None => install.await?,
        };

        match outcome {
            Some(output) => {
                if output.success() {
                    meta.deps_installed = true;
                    meta.deps_checksum = checksum;
                    meta.baseline_files = workspace::snapshot_files(&meta.workspace_dir).await?;
                } else {
                    warn!(
                        "Dependency install exited {} on {}",
                        output.exit_code, meta.container_name
                    );
                }
                Ok((output.stdout, output.stderr))
            }
            None => {
                meta.deps_installed = true;
                meta.deps_checksum = checksum;
                Ok((String::new(), String::new()))
            }
        }
    }

    /// Step 7 for inline snippets: write the code file through an exec so
    /// pool containers whose workspace was cleaned in-container see it
    /// immediately.
    async fn write_inline_code(
        &self,
        meta: &ContainerMeta,
        plugin: &dyn LanguagePlugin,
        code: &str,
    ) -> Result<()> {
        let path = format!("/workspace/{}", plugin.inline_filename());
        let delimiter = heredoc_delimiter(code);

        let mut script = format!("cat > {path} <<'{delimiter}'\n{code}\n{delimiter}\n");
        if plugin.marks_executable() {
            script.push_str(&format!("chmod +x {path}\n"));
        }

        let handle = ExecHandle::new(self.manager.docker(), &meta.container_id);
        let output = handle.run(&ExecRequest::shell(script), None, None).await?;
        if !output.success() {
            return Err(EngineError::Container(ContainerError::Execution(format!(
                "failed to write inline code (exit {}): {}",
                output.exit_code, output.stderr
            ))));
        }
        Ok(())
    }

    /// Kill a container whose exec outlived the caller's timeout. The
    /// container is not removed; session strategies decide its fate later.
    async fn kill_timed_out(&self, meta: &ContainerMeta) {
        warn!(
            "Killing container {} after execution timeout",
            meta.container_name
        );
        if let Err(e) = self.manager.kill(&meta.container_id).await {
            warn!("Failed to kill {}: {}", meta.container_name, e);
        }
    }

    /// Step 3 dispatch on the session's placement strategy.
    async fn acquire_container(
        &self,
        session_id: &str,
        config: &SessionConfig,
        image: &str,
        sharing: WorkspaceSharing,
    ) -> Result<ContainerMeta> {
        match config.strategy {
            PlacementStrategy::PerExecution => {
                self.create_session_container(session_id, config, image, sharing)
                    .await
            }
            PlacementStrategy::Pool => {
                if let Some(current) = self.sessions.current_meta(session_id) {
                    if images_match(&current.image, image) {
                        self.manager
                            .ensure_running(&managed_from_meta(&current))
                            .await?;
                        return Ok(current);
                    }
                    self.detach_and_remove(session_id, &current).await;
                }

                let container = self
                    .manager
                    .pool_acquire(image, &config.container)
                    .await?
                    .ok_or_else(|| EngineError::PoolExhausted(image.to_string()))?;

                let meta = ContainerMeta::new(
                    session_id,
                    &container.id,
                    &container.name,
                    &container.image,
                    container.workspace_dir.clone(),
                );
                self.sessions.set_current(session_id, meta.clone());
                Ok(meta)
            }
            PlacementStrategy::PerSession => {
                if let Some(current) = self.sessions.current_meta(session_id) {
                    if images_match(&current.image, image) {
                        self.manager
                            .ensure_running(&managed_from_meta(&current))
                            .await?;
                        return Ok(current);
                    }

                    if sharing == WorkspaceSharing::Shared {
                        // Park the mismatched container for later reuse and
                        // try to wake a retained one for this image.
                        if let Err(e) = self.manager.stop(&current.container_id).await {
                            warn!("Failed to stop {}: {}", current.container_name, e);
                        }
                        self.sessions.take_current(session_id);
                        let mut parked = current.clone();
                        parked.is_running = false;
                        self.sessions.push_idle_retained(session_id, parked);

                        if let Some(idle) =
                            self.sessions.take_idle_retained_matching(session_id, image)
                        {
                            self.manager
                                .ensure_running(&managed_from_meta(&idle))
                                .await?;
                            self.sessions.set_current(session_id, idle.clone());
                            return Ok(idle);
                        }
                    } else {
                        self.detach_and_remove(session_id, &current).await;
                    }
                }

                self.create_session_container(session_id, config, image, sharing)
                    .await
            }
        }
    }

    /// Remove a session's current container on image mismatch.
    async fn detach_and_remove(&self, session_id: &str, current: &ContainerMeta) {
        self.phase(format!(
            "Image mismatch, replacing container {}",
            current.container_name
        ));
        self.sessions.take_current(session_id);
        self.sessions.forget_container(&current.container_id);
        if let Err(e) = self
            .manager
            .remove_container(&managed_from_meta(current), true)
            .await
        {
            warn!(
                "Failed to remove mismatched container {}: {}",
                current.container_name, e
            );
        }
    }

    /// Create a fresh container bound to the session.
    async fn create_session_container(
        &self,
        session_id: &str,
        config: &SessionConfig,
        image: &str,
        sharing: WorkspaceSharing,
    ) -> Result<ContainerMeta> {
        let name = config
            .container
            .name
            .clone()
            .unwrap_or_else(|| self.manager.allocate_name());

        // Shared workspaces are keyed by session so replacement containers
        // bind the same directory; isolated ones are keyed by container.
        let workspace_key = match sharing {
            WorkspaceSharing::Shared => format!("session-{}", session_id),
            WorkspaceSharing::Isolated => name.clone(),
        };
        let workspace_dir = workspace::ensure_dir_for(&workspace_key).await?;

        let container = self
            .manager
            .provision(image, &name, &workspace_dir, &config.container)
            .await?;

        let meta = ContainerMeta::new(
            session_id,
            &container.id,
            &container.name,
            image,
            workspace_dir,
        );
        self.sessions.set_current(session_id, meta.clone());
        Ok(meta)
    }

    /// Step 10 for per-execution sessions: the container lives for exactly
    /// one call, and the session entry goes with it.
    async fn teardown_one_shot(&self, session_id: &str, keep_generated: bool) {
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };
        let Some(meta) = session.container else {
            return;
        };

        let managed = managed_from_meta(&meta);
        if keep_generated {
            if let Err(e) =
                workspace::prune_keeping(&meta.workspace_dir, &meta.session_generated_files).await
            {
                warn!("Failed to prune workspace of {}: {}", meta.container_name, e);
            }
            if let Err(e) = self.manager.remove_container(&managed, false).await {
                warn!("Failed to remove {}: {}", meta.container_name, e);
            }
        } else if let Err(e) = self.manager.remove_container(&managed, true).await {
            warn!("Failed to remove {}: {}", meta.container_name, e);
        }
    }

    /// End a session, releasing or removing its containers.
    ///
    /// Pooled containers go back to the warm pool with their workspace
    /// cleaned inside the container. Other strategies remove container and
    /// workspace together, unless `keep_generated` asks to preserve the
    /// files generated during the session, in which case everything else in
    /// the workspace is deleted and the directory survives. Idle-retained
    /// containers are removed the same way.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionNotFound`] for unknown ids. Teardown
    /// problems are logged, not propagated; cleanup is best-effort.
    pub async fn cleanup_session(&self, session_id: &str, keep_generated: bool) -> Result<()> {
        let session = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        self.phase(format!("Cleaning up session {}", session_id));

        // One keep-set across the whole session; shared workspaces are
        // served by several containers in turn.
        let keep: BTreeSet<PathBuf> = session
            .container_history
            .iter()
            .flat_map(|m| m.session_generated_files.iter().cloned())
            .collect();

        if let Some(current) = session.container {
            match session.config.strategy {
                PlacementStrategy::Pool => {
                    self.manager
                        .pool_release(&managed_from_meta(&current))
                        .await;
                }
                _ => {
                    self.remove_with_keep(&current, keep_generated, &keep).await;
                }
            }
        }

        for idle in session.idle_retained {
            self.remove_with_keep(&idle, keep_generated, &keep).await;
        }

        Ok(())
    }

    async fn remove_with_keep(
        &self,
        meta: &ContainerMeta,
        keep_generated: bool,
        keep: &BTreeSet<PathBuf>,
    ) {
        let managed = managed_from_meta(meta);
        if keep_generated {
            if let Err(e) = workspace::prune_keeping(&meta.workspace_dir, keep).await {
                warn!("Failed to prune workspace of {}: {}", meta.container_name, e);
            }
            if let Err(e) = self.manager.remove_container(&managed, false).await {
                warn!("Failed to remove {}: {}", meta.container_name, e);
            }
        } else if let Err(e) = self.manager.remove_container(&managed, true).await {
            warn!("Failed to remove {}: {}", meta.container_name, e);
        }
    }

    /// End every session, then remove all managed containers and sweep
    /// orphans left by earlier crashes.
    ///
    /// # Errors
    ///
    /// Returns error only for the final manager-wide cleanup; per-session
    /// teardown problems are logged and skipped.
    pub async fn cleanup(&self, keep_generated: bool) -> Result<()> {
        for session_id in self.sessions.session_ids() {
            if let Err(e) = self.cleanup_session(&session_id, keep_generated).await {
                warn!("Failed to clean up session {}: {}", session_id, e);
            }
        }

        if !keep_generated {
            self.manager.cleanup().await?;
        }
        Ok(())
    }

    /// Host workspace files of the session's current container.
    ///
    /// # Errors
    ///
    /// Returns error for unknown sessions or sessions without a container.
    pub async fn list_workspace_files(
        &self,
        session_id: &str,
        only_generated: bool,
    ) -> Result<Vec<PathBuf>> {
        let meta = self.require_workspace(session_id)?;
        if only_generated {
            Ok(meta.session_generated_files.iter().cloned().collect())
        } else {
            let files = workspace::snapshot_files(&meta.workspace_dir).await?;
            Ok(files.into_iter().collect())
        }
    }

    /// Decode a base64 payload into the session workspace.
    ///
    /// # Errors
    ///
    /// Returns error for unknown sessions, bad payloads, or path escapes.
    pub async fn add_file_from_base64(
        &self,
        session_id: &str,
        rel_path: &str,
        payload_b64: &str,
    ) -> Result<PathBuf> {
        let meta = self.require_workspace(session_id)?;
        Ok(workspace::add_file_base64(&meta.workspace_dir, rel_path, payload_b64).await?)
    }

    /// Copy a local file into the session workspace.
    ///
    /// # Errors
    ///
    /// Returns error for unknown sessions or IO failures.
    pub async fn copy_file_into_workspace(
        &self,
        session_id: &str,
        local_path: &std::path::Path,
        dest_rel_path: &str,
    ) -> Result<PathBuf> {
        let meta = self.require_workspace(session_id)?;
        Ok(workspace::copy_into(&meta.workspace_dir, local_path, dest_rel_path).await?)
    }

    /// Read a workspace file base64-encoded.
    ///
    /// # Errors
    ///
    /// Returns error for unknown sessions or missing files.
    pub async fn read_file_base64(&self, session_id: &str, rel_path: &str) -> Result<String> {
        let meta = self.require_workspace(session_id)?;
        Ok(workspace::read_file_base64(&meta.workspace_dir, rel_path).await?)
    }

    /// Read a workspace file as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns error for unknown sessions or missing files.
    pub async fn read_file_binary(&self, session_id: &str, rel_path: &str) -> Result<Vec<u8>> {
        let meta = self.require_workspace(session_id)?;
        Ok(workspace::read_file_binary(&meta.workspace_dir, rel_path).await?)
    }

    fn require_workspace(&self, session_id: &str) -> Result<ContainerMeta> {
        if !self.sessions.contains(session_id) {
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        }
        self.sessions
            .current_meta(session_id)
            .ok_or_else(|| EngineError::NoWorkspace(session_id.to_string()))
    }
}

fn managed_from_meta(meta: &ContainerMeta) -> ManagedContainer {
    ManagedContainer {
        id: meta.container_id.clone(),
        name: meta.container_name.clone(),
        image: meta.image.clone(),
        workspace_dir: meta.workspace_dir.clone(),
    }
}

/// Checksum of a dependency set: SHA-256 over the sorted tokens, or the
/// empty string when there are none.
pub fn dependency_checksum(dependencies: &[String]) -> String {
    if dependencies.is_empty() {
        return String::new();
    }
    let mut sorted: Vec<&str> = dependencies.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{:x}", Sha256::digest(sorted.join("\n").as_bytes()))
}

/// Here-document delimiter guaranteed not to occur in the payload.
fn heredoc_delimiter(code: &str) -> String {
    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        let delimiter = format!("CODEBOX_EOF_{}", &suffix[..8]);
        if !code.contains(&delimiter) {
            return delimiter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_checksum_order_independent() {
        let a = dependency_checksum(&["b".to_string(), "a".to_string()]);
        let b = dependency_checksum(&["a".to_string(), "b".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_dependency_checksum_empty_is_empty_string() {
        assert_eq!(dependency_checksum(&[]), "");
    }

    #[test]
    fn test_dependency_checksum_sensitive_to_pins() {
        let plain = dependency_checksum(&["requests".to_string()]);
        let pinned = dependency_checksum(&["requests==2.31".to_string()]);
        assert_ne!(plain, pinned);
    }

    #[test]
    fn test_heredoc_delimiter_avoids_payload() {
        let delimiter = heredoc_delimiter("echo CODEBOX_EOF_ test");
        assert!(delimiter.starts_with("CODEBOX_EOF_"));
        assert!(!"echo CODEBOX_EOF_ test".contains(&delimiter));
    }
}

//! Session model.
//!
//! A session binds a caller to its placement policy, its current container,
//! and the bookkeeping the engine needs across executions: per-container
//! metadata, an append-only container history, and containers kept idle for
//! image-matched reuse in shared-workspace mode.
//!
//! The store in [`store`] is pure in-memory bookkeeping; nothing here talks
//! to the container runtime.

use crate::container::ContainerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

mod store;

pub use store::SessionStore;

/// Policy governing which container serves an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    /// A fresh container per `execute_code` call, torn down afterwards
    PerExecution,
    /// One container retained by the session across calls
    PerSession,
    /// Containers borrowed from the shared warm pool
    Pool,
}

/// Whether the workspace directory persists across runs of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceSharing {
    /// Fresh workspace per container
    #[default]
    Isolated,
    /// One host directory reused across runs; per-session strategy only
    Shared,
}

/// Configuration a session is created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Placement policy for every execution in this session
    pub strategy: PlacementStrategy,
    /// Container configuration (image override, mounts, env, caps)
    #[serde(default)]
    pub container: ContainerConfig,
    /// Requested session id; generated when `None`
    #[serde(default)]
    pub session_id: Option<String>,
    /// Fail instead of returning an existing session with the same id
    #[serde(default)]
    pub enforce_new_session: bool,
}

impl SessionConfig {
    /// Configuration with the given strategy and defaults otherwise.
    pub fn new(strategy: PlacementStrategy) -> Self {
        Self {
            strategy,
            container: ContainerConfig::default(),
            session_id: None,
            enforce_new_session: false,
        }
    }
}

/// Per-container state inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMeta {
    /// Owning session
    pub session_id: String,
    /// Runtime container ID
    pub container_id: String,
    /// Orchestrator-assigned container name
    pub container_name: String,
    /// Image the container runs
    pub image: String,
    /// Host directory bound at `/workspace`
    pub workspace_dir: PathBuf,
    /// Whether the last dependency-install phase succeeded
    pub deps_installed: bool,
    /// Checksum of the dependency set the install matched; empty when none
    pub deps_checksum: String,
    /// Workspace files present before user code last started
    pub baseline_files: BTreeSet<PathBuf>,
    /// Files generated by the most recent run
    pub generated_files: BTreeSet<PathBuf>,
    /// Union of generated files across all runs in the session
    pub session_generated_files: BTreeSet<PathBuf>,
    /// Whether an exec is currently running in this container
    pub is_running: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time the most recent run began
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl ContainerMeta {
    /// Fresh metadata for a just-created container.
    pub fn new(
        session_id: impl Into<String>,
        container_id: impl Into<String>,
        container_name: impl Into<String>,
        image: impl Into<String>,
        workspace_dir: PathBuf,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            container_id: container_id.into(),
            container_name: container_name.into(),
            image: image.into(),
            workspace_dir,
            deps_installed: false,
            deps_checksum: String::new(),
            baseline_files: BTreeSet::new(),
            generated_files: BTreeSet::new(),
            session_generated_files: BTreeSet::new(),
            is_running: false,
            created_at: Utc::now(),
            last_executed_at: None,
        }
    }
}

/// Point-in-time view of a session, as returned by `get_session_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session id
    pub session_id: String,
    /// Configuration the session was created with
    pub config: SessionConfig,
    /// Currently bound container, if any
    pub container: Option<ContainerMeta>,
    /// Every container that ever served this session
    pub container_history: Vec<ContainerMeta>,
    /// Stopped containers retained for image-matched reuse
    pub idle_retained: Vec<ContainerMeta>,
    /// Earliest container creation time, or session creation when none
    pub created_at: DateTime<Utc>,
    /// Latest run start across all containers
    pub last_executed_at: Option<DateTime<Utc>>,
    /// Whether an exec is running in the current container
    pub is_active: bool,
}

//! # codebox
//!
//! A sandbox orchestrator: given an untrusted code snippet, a language, and
//! an optional dependency list, codebox runs the code inside a short-lived,
//! resource-constrained container and returns the captured streams, exit
//! code, wall-clock duration, and any files the code produced.
//!
//! ## Architecture
//!
//! The crate is organized bottom-up:
//!
//! - **[`language`]**: the process-wide registry of language plugins
//!   (JavaScript, TypeScript, Python, shell built in) describing images,
//!   file materialization, run commands, and dependency installation
//! - **[`container`]**: the Docker/Podman layer: provisioning with a fixed
//!   security profile, exec with live stream demultiplexing, the warm pool,
//!   and teardown paired with host workspace deletion
//! - **[`workspace`]**: host directories bound at `/workspace`, snapshot
//!   diffing for generated-file detection, and file import/export helpers
//! - **[`session`]**: in-memory session bookkeeping (configuration,
//!   current container, history, and idle-retained containers)
//! - **[`engine`]**: the orchestrator tying it all together behind
//!   [`ExecutionEngine`]
//!
//! ## Placement strategies
//!
//! Every session picks one of three container placement policies:
//!
//! - **per-execution**: a fresh container per call, removed afterwards
//! - **per-session**: one container kept across calls, replaced on image
//!   change (optionally retaining the old one in shared-workspace mode)
//! - **pool**: containers borrowed from a bounded warm pool and returned
//!   at session cleanup with their workspace wiped
//!
//! ## Example
//!
//! ```rust,no_run
//! use codebox::{ExecutionEngine, ExecutionOptions, PlacementStrategy, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = ExecutionEngine::new().await?;
//!
//!     let session = engine.create_session(SessionConfig::new(PlacementStrategy::PerSession))?;
//!
//!     let result = engine
//!         .execute_code(
//!             &session,
//!             ExecutionOptions::new("python")
//!                 .with_code("print('hello from the sandbox')")
//!                 .with_dependencies(["requests"]),
//!         )
//!         .await?;
//!
//!     println!("exit {}: {}", result.exit_code, result.stdout);
//!
//!     engine.cleanup_session(&session, false).await?;
//!     Ok(())
//! }
//! ```

/// Container runtime layer: client, provisioning profile, exec streaming,
/// warm pool, and manager.
pub mod container;

/// The execution engine and its caller-facing options and results.
pub mod engine;

/// Language plugins and the process-wide registry.
pub mod language;

/// Session model and in-memory store.
pub mod session;

/// Host workspace directories and file helpers.
pub mod workspace;

/// Command-line façade.
pub mod cli;

// Re-export the main engine types
pub use engine::{
    EngineConfig, EngineError, ExecutionEngine, ExecutionOptions, ExecutionResult, RunApp,
    StreamOutput, Verbosity,
};

// Re-export the container surface callers configure
pub use container::{
    ContainerConfig, ContainerManagerConfig, MountSpec, OutputSink, PoolConfig,
};

// Re-export session types
pub use session::{
    ContainerMeta, PlacementStrategy, Session, SessionConfig, WorkspaceSharing,
};

// Re-export the plugin seam
pub use language::LanguagePlugin;

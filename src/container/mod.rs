//! Container runtime layer.
//!
//! Wraps the Docker/Podman API (via bollard) with everything the execution
//! engine needs: connection management, image pulling, container provisioning
//! with a fixed security profile, command execution with live stream
//! demultiplexing, a warm pool of idle containers, and cleanup that pairs
//! container removal with host workspace deletion.
//!
//! ## Components
//!
//! - [`client`]: Docker/Podman API client wrapper with connection fallback
//! - [`config`]: container provisioning profile and caller-supplied mounts
//! - [`exec`]: in-container command execution with stdout/stderr demux
//! - [`pool`]: warm-pool bookkeeping (bounded, image-keyed, idle-evicted)
//! - [`manager`]: high-level provisioning, reuse, and teardown

mod client;
mod config;
mod exec;
mod image;
mod manager;
mod pool;

pub use client::{ContainerClient, ContainerState};
pub use config::{
    ContainerConfig, MountSpec, CPU_PERIOD_MICROS, DEFAULT_CPU_QUOTA, DEFAULT_MEMORY_BYTES,
    cpu_quota_for, parse_memory_limit,
};
pub use exec::{ExecHandle, ExecOutput, ExecRequest, OutputSink};
pub use image::images_match;
pub use manager::{ContainerManager, ContainerManagerConfig, ManagedContainer, PoolStatus};
pub use pool::PoolConfig;

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker/Podman API error
    #[error("Container API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// Container not found
    #[error("Container not found: {0}")]
    NotFound(String),

    /// Container configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mount source missing or invalid
    #[error("Mount error: {0}")]
    Mount(String),

    /// Command execution inside a container failed
    #[error("Execution error: {0}")]
    Execution(String),

    /// Workspace cleanup inside a container failed
    #[error("Workspace cleanup failed: {0}")]
    Cleanup(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// General error
    #[error("Container error: {0}")]
    Other(String),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

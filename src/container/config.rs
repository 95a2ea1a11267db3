//! Container provisioning profile.
//!
//! Every container the orchestrator creates carries the same baseline
//! profile: a pseudo-TTY, no-new-privileges, bounded memory and CPU,
//! bridged networking, the session workspace bound at `/workspace`, and a
//! long-running idle command so the container survives repeated execs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default memory cap applied at creation: 512 MiB.
pub const DEFAULT_MEMORY_BYTES: i64 = 512 * 1024 * 1024;

/// CPU accounting period in microseconds.
pub const CPU_PERIOD_MICROS: i64 = 100_000;

/// Default CPU quota: 50 ms per 100 ms period (half a core).
pub const DEFAULT_CPU_QUOTA: i64 = 50_000;

/// In-container path of the bound workspace directory.
pub const WORKSPACE_TARGET: &str = "/workspace";

/// Idle command keeping the container alive between execs.
pub const IDLE_COMMAND: [&str; 3] = ["tail", "-f", "/dev/null"];

/// A caller-supplied bind mount.
///
/// Files bind read-only, directories read-write. Zip archives are extracted
/// to a temp directory first and bound read-write like a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MountSpec {
    /// A single host file, bound read-only.
    File {
        /// Host path of the file
        source: PathBuf,
        /// Absolute in-container path
        target: String,
    },
    /// A host directory, bound read-write.
    Directory {
        /// Host path of the directory
        source: PathBuf,
        /// Absolute in-container path
        target: String,
    },
    /// A zip archive, extracted and bound as a read-write directory.
    Zip {
        /// Host path of the archive
        source: PathBuf,
        /// Absolute in-container path
        target: String,
    },
}

impl MountSpec {
    /// The in-container path this mount appears at.
    pub fn target(&self) -> &str {
        match self {
            MountSpec::File { target, .. }
            | MountSpec::Directory { target, .. }
            | MountSpec::Zip { target, .. } => target,
        }
    }

    /// The host path backing this mount.
    pub fn source(&self) -> &std::path::Path {
        match self {
            MountSpec::File { source, .. }
            | MountSpec::Directory { source, .. }
            | MountSpec::Zip { source, .. } => source,
        }
    }
}

/// Session-level container configuration.
///
/// The image defaults to the language plugin's image when unset. Resource
/// caps replace the baseline profile for every container the session creates
/// and remain overridable per execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image override; plugin default applies when `None`
    pub image: Option<String>,
    /// Caller-supplied bind mounts
    pub mounts: Vec<MountSpec>,
    /// Environment variables as `KEY=VALUE` entries
    pub env: Vec<String>,
    /// Explicit container name; auto-generated when `None`
    pub name: Option<String>,
    /// Memory cap such as `512m`, `1g`, `512k`, or raw bytes
    pub memory_limit: Option<String>,
    /// Fractional CPU allowance, e.g. `0.5`
    pub cpu_limit: Option<f64>,
}

impl ContainerConfig {
    /// Configuration pinned to a specific image.
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Self::default()
        }
    }

    /// Memory cap in bytes, falling back to the baseline profile.
    pub fn memory_bytes(&self) -> i64 {
        self.memory_limit
            .as_deref()
            .and_then(parse_memory_limit)
            .unwrap_or(DEFAULT_MEMORY_BYTES)
    }

    /// CPU quota in microseconds per period, falling back to the baseline.
    pub fn cpu_quota(&self) -> i64 {
        self.cpu_limit.map(cpu_quota_for).unwrap_or(DEFAULT_CPU_QUOTA)
    }
}

/// Parse a memory limit string (`512m`, `1g`, `512k`, or raw bytes) to bytes.
///
/// Returns `None` for malformed input; callers log and fall back.
pub fn parse_memory_limit(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (digits, multiplier) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 1024i64),
        'm' | 'M' => (&s[..s.len() - 1], 1024i64 * 1024),
        'g' | 'G' => (&s[..s.len() - 1], 1024i64 * 1024 * 1024),
        '0'..='9' => (s, 1),
        _ => return None,
    };

    digits
        .parse::<i64>()
        .ok()
        .filter(|v| *v > 0)
        .map(|v| v.saturating_mul(multiplier))
}

/// CPU quota for a fractional CPU value at the fixed period.
pub fn cpu_quota_for(cpus: f64) -> i64 {
    (cpus * CPU_PERIOD_MICROS as f64).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_suffixes() {
        assert_eq!(parse_memory_limit("512k"), Some(512 * 1024));
        assert_eq!(parse_memory_limit("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("2G"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1048576"), Some(1_048_576));
    }

    #[test]
    fn test_parse_memory_rejects_garbage() {
        assert_eq!(parse_memory_limit(""), None);
        assert_eq!(parse_memory_limit("abc"), None);
        assert_eq!(parse_memory_limit("12q"), None);
        assert_eq!(parse_memory_limit("-5m"), None);
        assert_eq!(parse_memory_limit("0"), None);
    }

    #[test]
    fn test_cpu_quota_conversion() {
        assert_eq!(cpu_quota_for(0.5), 50_000);
        assert_eq!(cpu_quota_for(1.0), 100_000);
        assert_eq!(cpu_quota_for(0.25), 25_000);
    }

    #[test]
    fn test_config_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.memory_bytes(), DEFAULT_MEMORY_BYTES);
        assert_eq!(config.cpu_quota(), DEFAULT_CPU_QUOTA);
    }

    #[test]
    fn test_config_caps_override_defaults() {
        let config = ContainerConfig {
            memory_limit: Some("1g".to_string()),
            cpu_limit: Some(1.5),
            ..Default::default()
        };
        assert_eq!(config.memory_bytes(), 1024 * 1024 * 1024);
        assert_eq!(config.cpu_quota(), 150_000);
    }

    #[test]
    fn test_malformed_memory_falls_back() {
        let config = ContainerConfig {
            memory_limit: Some("lots".to_string()),
            ..Default::default()
        };
        assert_eq!(config.memory_bytes(), DEFAULT_MEMORY_BYTES);
    }

    #[test]
    fn test_mount_accessors() {
        let mount = MountSpec::Directory {
            source: PathBuf::from("/host/proj"),
            target: "/project".to_string(),
        };
        assert_eq!(mount.target(), "/project");
        assert_eq!(mount.source(), std::path::Path::new("/host/proj"));
    }
}

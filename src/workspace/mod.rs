//! Host-side workspace handling.
//!
//! Every container gets a host directory under a single process-wide temp
//! root, bound into the container at `/workspace`. This module owns that
//! mapping plus the host-side file operations built on it: snapshotting for
//! generated-file detection, pruning after a keep-generated cleanup, base64
//! import/export, and zip-mount extraction.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Workspace and host-file errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Base64 payload could not be decoded
    #[error("Invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Zip archive could not be read or extracted
    #[error("Zip extraction failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Relative path escapes the workspace or is absolute
    #[error("Invalid workspace-relative path: {0}")]
    InvalidPath(String),
}

/// Result type for workspace operations.
pub type Result<T> = std::result::Result<T, WorkspaceError>;

static BASE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    let base = std::env::temp_dir().join("codebox-workspaces");
    if let Err(e) = std::fs::create_dir_all(&base) {
        // Surfaced again, with context, on first real use.
        debug!("Failed to pre-create workspace base {}: {}", base.display(), e);
    }
    base
});

/// The process-wide base directory holding all workspaces.
pub fn base_dir() -> &'static Path {
    &BASE_DIR
}

/// Deterministic host directory for a container name.
pub fn dir_for(container_name: &str) -> PathBuf {
    base_dir().join(container_name)
}

/// Create (if needed) and return the host directory for a container name.
pub async fn ensure_dir_for(container_name: &str) -> std::io::Result<PathBuf> {
    let dir = dir_for(container_name);
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Recursively delete a workspace directory. Missing directories are fine.
pub async fn remove_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// All file paths currently under a directory, recursively.
///
/// Returns the empty set when the directory does not exist. Symlinks are
/// recorded as files and not followed.
pub async fn snapshot_files(root: &Path) -> std::io::Result<BTreeSet<PathBuf>> {
    let (files, _) = walk(root).await?;
    Ok(files)
}

async fn walk(root: &Path) -> std::io::Result<(BTreeSet<PathBuf>, Vec<PathBuf>)> {
    let mut files = BTreeSet::new();
    let mut dirs = Vec::new();

    if !tokio::fs::try_exists(root).await? {
        return Ok((files, dirs));
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                dirs.push(path.clone());
                stack.push(path);
            } else {
                files.insert(path);
            }
        }
    }

    Ok((files, dirs))
}

/// Delete every file under `root` that is not in `keep`, then remove any
/// directories left empty, deepest first. The root itself survives.
pub async fn prune_keeping(root: &Path, keep: &BTreeSet<PathBuf>) -> std::io::Result<()> {
    let (files, mut dirs) = walk(root).await?;

    for file in files {
        if !keep.contains(&file) {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }

    // Deepest directories first so parents empty out as children go.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        // Fails for non-empty directories, which is exactly what we want.
        let _ = tokio::fs::remove_dir(&dir).await;
    }

    Ok(())
}

/// Resolve a workspace-relative path, rejecting absolute paths and any
/// `..` traversal out of the workspace.
pub fn resolve_rel(workspace_dir: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(WorkspaceError::InvalidPath(rel.to_string()));
    }
    for component in rel_path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(WorkspaceError::InvalidPath(rel.to_string())),
        }
    }
    Ok(workspace_dir.join(rel_path))
}

/// Decode a base64 payload into a file inside the workspace, creating
/// parent directories as needed. Returns the absolute host path.
pub async fn add_file_base64(
    workspace_dir: &Path,
    rel: &str,
    payload_b64: &str,
) -> Result<PathBuf> {
    let path = resolve_rel(workspace_dir, rel)?;
    let bytes = BASE64.decode(payload_b64.trim())?;
    let written = bytes.len();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, bytes).await?;
    debug!("Wrote {} bytes to {}", written, path.display());
    Ok(path)
}

/// Read a workspace file and return it base64-encoded.
pub async fn read_file_base64(workspace_dir: &Path, rel: &str) -> Result<String> {
    let bytes = read_file_binary(workspace_dir, rel).await?;
    Ok(BASE64.encode(bytes))
}

/// Read a workspace file as raw bytes.
pub async fn read_file_binary(workspace_dir: &Path, rel: &str) -> Result<Vec<u8>> {
    let path = resolve_rel(workspace_dir, rel)?;
    Ok(tokio::fs::read(&path).await?)
}

/// Copy a local file into the workspace at a relative destination.
pub async fn copy_into(
    workspace_dir: &Path,
    local: &Path,
    dest_rel: &str,
) -> Result<PathBuf> {
    let dest = resolve_rel(workspace_dir, dest_rel)?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(local, &dest).await?;
    Ok(dest)
}

/// Extract a zip archive into a fresh directory under the temp base and
/// return that directory, ready to be bound as a directory mount.
pub async fn extract_zip(archive: &Path) -> Result<PathBuf> {
    let dest = base_dir().join(format!("zip-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&dest).await?;

    let source = archive.to_path_buf();
    let target = dest.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::open(&source)?;
        let mut zip = zip::ZipArchive::new(file)?;
        zip.extract(&target)?;
        Ok(())
    })
    .await
    .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))??;

    debug!("Extracted {} to {}", archive.display(), dest.display());
    Ok(dest)
}

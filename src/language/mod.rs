//! Language plugins and the process-wide registry.
//!
//! A language plugin is a capability record describing how to run one
//! language inside a container: which image to use, what the inline snippet
//! file is called, which manifest files the declared dependencies require in
//! the workspace, how to build the run commands, and (optionally) how to
//! install those dependencies inside the container. The snippet itself is
//! not written by the plugin; the engine delivers it through an in-container
//! exec so freshly cleaned workspaces see it immediately.
//!
//! Four plugins ship built in: [`javascript`], [`typescript`], [`python`],
//! and [`shell`]. Additional plugins can be registered at runtime with
//! [`register`].

use crate::container::{ExecHandle, ExecOutput, OutputSink};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

pub mod javascript;
pub mod python;
pub mod shell;
pub mod typescript;

pub use javascript::JavaScript;
pub use python::Python;
pub use shell::Shell;
pub use typescript::TypeScript;

/// A language known to the orchestrator.
///
/// Implementations must be cheap to share; the registry hands out
/// `Arc<dyn LanguagePlugin>` clones.
#[async_trait]
pub trait LanguagePlugin: Send + Sync {
    /// Registry key, e.g. `"python"`.
    fn name(&self) -> &'static str;

    /// Container image used when the session does not override it.
    fn default_image(&self) -> &'static str;

    /// In-workspace filename for inline snippets.
    fn inline_filename(&self) -> &'static str;

    /// Whether the inline file must carry the executable bit.
    fn marks_executable(&self) -> bool {
        false
    }

    /// Write the manifest files the declared dependencies need (package
    /// manifests, compiler configuration) into a host workspace.
    ///
    /// The inline snippet is not written here; the engine delivers it
    /// through an exec. Languages without manifests keep the no-op default.
    /// Idempotence across runs is not required; the engine calls this
    /// before every execution.
    async fn materialize(&self, dependencies: &[String], dir: &Path) -> std::io::Result<()> {
        let _ = (dependencies, dir);
        Ok(())
    }

    /// argv for running the inline snippet from `/workspace`.
    fn inline_command(&self, deps_installed: bool) -> Vec<String>;

    /// argv for running an existing app entry file from its mount directory.
    fn run_app_command(&self, entry_file: &str, deps_installed: bool) -> Vec<String>;

    /// Install the declared dependencies inside the container.
    ///
    /// Returns `Ok(None)` when the language has no install routine; the
    /// engine then treats the phase as a success with empty streams. Chunks
    /// are forwarded to the sinks as they arrive.
    async fn install_dependencies(
        &self,
        exec: &ExecHandle<'_>,
        dependencies: &[String],
        stdout_sink: Option<&dyn OutputSink>,
        stderr_sink: Option<&dyn OutputSink>,
    ) -> crate::container::Result<Option<ExecOutput>> {
        let _ = (exec, dependencies, stdout_sink, stderr_sink);
        Ok(None)
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn LanguagePlugin>>>> = Lazy::new(|| {
    let mut map: HashMap<String, Arc<dyn LanguagePlugin>> = HashMap::new();
    let builtins: Vec<Arc<dyn LanguagePlugin>> = vec![
        Arc::new(JavaScript),
        Arc::new(TypeScript),
        Arc::new(Python),
        Arc::new(Shell),
    ];
    for plugin in builtins {
        map.insert(plugin.name().to_string(), plugin);
    }
    RwLock::new(map)
});

/// Look up a plugin by language name.
pub fn get(name: &str) -> Option<Arc<dyn LanguagePlugin>> {
    REGISTRY
        .read()
        .expect("language registry poisoned")
        .get(name)
        .cloned()
}

/// Register a plugin, replacing any existing one with the same name.
pub fn register(plugin: Arc<dyn LanguagePlugin>) {
    REGISTRY
        .write()
        .expect("language registry poisoned")
        .insert(plugin.name().to_string(), plugin);
}

/// Names of all registered languages, sorted.
pub fn names() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY
        .read()
        .expect("language registry poisoned")
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

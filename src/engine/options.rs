//! Execution options and results.

use crate::container::OutputSink;
use crate::session::WorkspaceSharing;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Run an existing entry file inside a mounted directory instead of an
/// inline snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunApp {
    /// Entry file, relative to `cwd`
    pub entry_file: String,
    /// Working directory; must equal the target of a directory mount
    pub cwd: String,
}

/// Subscriber sinks for live output.
///
/// All sinks are optional; streams are always captured in full on the
/// result regardless. Dependency-install output has its own pair.
#[derive(Clone, Default)]
pub struct StreamOutput {
    /// User-code stdout chunks
    pub stdout: Option<Arc<dyn OutputSink>>,
    /// User-code stderr chunks
    pub stderr: Option<Arc<dyn OutputSink>>,
    /// Dependency-install stdout chunks
    pub dependency_stdout: Option<Arc<dyn OutputSink>>,
    /// Dependency-install stderr chunks
    pub dependency_stderr: Option<Arc<dyn OutputSink>>,
}

impl std::fmt::Debug for StreamOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOutput")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("dependency_stdout", &self.dependency_stdout.is_some())
            .field("dependency_stderr", &self.dependency_stderr.is_some())
            .finish()
    }
}

/// Options for a single `execute_code` call.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Language name as registered in the language registry
    pub language: String,
    /// Inline snippet; mutually exclusive with `run_app`
    pub code: Option<String>,
    /// Run an existing app entry file instead of inline code
    pub run_app: Option<RunApp>,
    /// Dependency tokens, interpreted by the language plugin
    pub dependencies: Vec<String>,
    /// Per-execution CPU override (fractional CPUs)
    pub cpu_limit: Option<f64>,
    /// Per-execution memory override (`512m`, `1g`, `512k`, or bytes)
    pub memory_limit: Option<String>,
    /// Bound on the dependency-install and user-code execs
    pub timeout: Option<Duration>,
    /// Live output subscribers
    pub streams: StreamOutput,
    /// Workspace persistence across runs (per-session strategy only)
    pub workspace_sharing: WorkspaceSharing,
    /// Keep generated files on per-execution teardown
    pub keep_generated_files: bool,
}

impl ExecutionOptions {
    /// Options for a language with everything else defaulted.
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: None,
            run_app: None,
            dependencies: Vec::new(),
            cpu_limit: None,
            memory_limit: None,
            timeout: None,
            streams: StreamOutput::default(),
            workspace_sharing: WorkspaceSharing::Isolated,
            keep_generated_files: false,
        }
    }

    /// Set the inline snippet.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Run an existing entry file instead of inline code.
    pub fn with_run_app(mut self, entry_file: impl Into<String>, cwd: impl Into<String>) -> Self {
        self.run_app = Some(RunApp {
            entry_file: entry_file.into(),
            cwd: cwd.into(),
        });
        self
    }

    /// Declare dependencies.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Override the CPU allowance for this execution.
    pub fn with_cpu_limit(mut self, cpus: f64) -> Self {
        self.cpu_limit = Some(cpus);
        self
    }

    /// Override the memory cap for this execution.
    pub fn with_memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = Some(limit.into());
        self
    }

    /// Bound the execution time.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach live output sinks.
    pub fn with_streams(mut self, streams: StreamOutput) -> Self {
        self.streams = streams;
        self
    }

    /// Reuse the session's persistent workspace across runs.
    pub fn with_workspace_sharing(mut self, sharing: WorkspaceSharing) -> Self {
        self.workspace_sharing = sharing;
        self
    }

    /// Keep generated files when a per-execution container is torn down.
    pub fn keep_generated(mut self) -> Self {
        self.keep_generated_files = true;
        self
    }
}

/// Outcome of one `execute_code` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// User-code stdout, captured in full
    pub stdout: String,
    /// User-code stderr, captured in full
    pub stderr: String,
    /// Dependency-install stdout; empty on cache hit or no-op
    pub dependency_stdout: String,
    /// Dependency-install stderr
    pub dependency_stderr: String,
    /// User-code exit code; 1 when the runtime reported none
    pub exit_code: i64,
    /// Wall-clock duration of the execution, in milliseconds
    pub execution_time_ms: u64,
    /// Host workspace directory of the serving container
    pub workspace_dir: PathBuf,
    /// Files generated by this run
    pub generated_files: Vec<PathBuf>,
    /// Files generated across all runs of the session
    pub session_generated_files: Vec<PathBuf>,
}

impl ExecutionResult {
    /// Whether the user code exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = ExecutionOptions::new("python")
            .with_code("print(1)")
            .with_dependencies(["requests"])
            .with_memory_limit("1g")
            .with_cpu_limit(1.0)
            .with_timeout(Duration::from_secs(30))
            .keep_generated();

        assert_eq!(options.language, "python");
        assert_eq!(options.code.as_deref(), Some("print(1)"));
        assert_eq!(options.dependencies, vec!["requests"]);
        assert_eq!(options.memory_limit.as_deref(), Some("1g"));
        assert_eq!(options.cpu_limit, Some(1.0));
        assert!(options.keep_generated_files);
        assert_eq!(options.workspace_sharing, WorkspaceSharing::Isolated);
    }

    #[test]
    fn test_stream_output_debug_shows_presence() {
        let streams = StreamOutput {
            stdout: Some(Arc::new(|_: &[u8]| {})),
            ..Default::default()
        };
        let rendered = format!("{:?}", streams);
        assert!(rendered.contains("stdout: true"));
        assert!(rendered.contains("stderr: false"));
    }
}

//! In-container command execution.
//!
//! Creates an exec with stdout and stderr attached, starts it hijacked, and
//! demultiplexes the combined stream into per-stream buffers while pushing
//! each chunk to optional subscriber sinks in arrival order.

use crate::container::{ContainerError, Result};
use bollard::Docker;
use bollard::exec::{CreateExecOptions, StartExecResults};
use futures::stream::StreamExt;
use std::default::Default;
use tracing::debug;

/// Exit code reported when the runtime does not supply one.
pub const MISSING_EXIT_CODE: i64 = 1;

/// Push interface for live output chunks.
///
/// Sinks receive opaque byte chunks synchronously from the stream reader, in
/// the order the container emitted them. A sink may drop chunks at its own
/// discretion but must never reorder them; slow sinks should buffer
/// internally rather than block.
pub trait OutputSink: Send + Sync {
    /// Receive one output chunk.
    fn chunk(&self, data: &[u8]);
}

impl<F> OutputSink for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn chunk(&self, data: &[u8]) {
        self(data)
    }
}

/// A command to run inside a container.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// argv of the command
    pub cmd: Vec<String>,
    /// Working directory inside the container
    pub working_dir: Option<String>,
    /// Extra environment as `KEY=VALUE` entries
    pub env: Vec<String>,
}

impl ExecRequest {
    /// Request for a plain argv with no working directory override.
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(|s| s.into()).collect(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Request running a shell command line via `/bin/sh -c`.
    pub fn shell(command_line: impl Into<String>) -> Self {
        Self::new(["/bin/sh".to_string(), "-c".to_string(), command_line.into()])
    }

    /// Set the working directory.
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add environment entries.
    pub fn with_env(mut self, env: impl IntoIterator<Item = String>) -> Self {
        self.env.extend(env);
        self
    }
}

/// Captured output of a finished exec.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Standard output, captured in full
    pub stdout: String,
    /// Standard error, captured in full
    pub stderr: String,
    /// Exit code; [`MISSING_EXIT_CODE`] when the runtime reported none
    pub exit_code: i64,
}

impl ExecOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Execution facade bound to one container.
///
/// Hands language plugins and the engine a way to run commands without
/// exposing the raw API client.
pub struct ExecHandle<'a> {
    docker: &'a Docker,
    container_id: &'a str,
}

impl<'a> ExecHandle<'a> {
    /// Bind a handle to a container.
    pub fn new(docker: &'a Docker, container_id: &'a str) -> Self {
        Self {
            docker,
            container_id,
        }
    }

    /// The container this handle executes in.
    pub fn container_id(&self) -> &str {
        self.container_id
    }

    /// Run a command to completion, streaming chunks to the given sinks.
    ///
    /// # Errors
    ///
    /// Returns error if the exec cannot be created or started, or if the
    /// runtime disconnects mid-stream. A nonzero exit code from the command
    /// itself is not an error; it is reported in the output.
    pub async fn run(
        &self,
        request: &ExecRequest,
        stdout_sink: Option<&dyn OutputSink>,
        stderr_sink: Option<&dyn OutputSink>,
    ) -> Result<ExecOutput> {
        run_exec(self.docker, self.container_id, request, stdout_sink, stderr_sink).await
    }
}

/// Execute a command in a running container, demultiplexing its output.
///
/// # Errors
///
/// Returns error if exec creation, start, or streaming fails.
pub(crate) async fn run_exec(
    docker: &Docker,
    container_id: &str,
    request: &ExecRequest,
    stdout_sink: Option<&dyn OutputSink>,
    stderr_sink: Option<&dyn OutputSink>,
) -> Result<ExecOutput> {
    debug!(
        "Executing in container {}: {:?}",
        container_id.get(..12).unwrap_or(container_id),
        request.cmd
    );

    let exec_options = CreateExecOptions {
        cmd: Some(request.cmd.clone()),
        env: if request.env.is_empty() {
            None
        } else {
            Some(request.env.clone())
        },
        working_dir: request.working_dir.clone(),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    };

    let exec = docker.create_exec(container_id, exec_options).await?;
    let start_results = docker.start_exec(&exec.id, None).await?;

    let mut stdout = String::new();
    let mut stderr = String::new();

    match start_results {
        StartExecResults::Attached { mut output, .. } => {
            while let Some(result) = output.next().await {
                match result {
                    Ok(bollard::container::LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                        if let Some(sink) = stdout_sink {
                            sink.chunk(&message);
                        }
                    }
                    Ok(bollard::container::LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                        if let Some(sink) = stderr_sink {
                            sink.chunk(&message);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ContainerError::Execution(format!(
                            "Failed to read exec output: {}",
                            e
                        )));
                    }
                }
            }
        }
        StartExecResults::Detached => {
            return Err(ContainerError::Execution(
                "Unexpected detached execution".to_string(),
            ));
        }
    }

    let inspect = docker.inspect_exec(&exec.id).await?;
    let exit_code = inspect.exit_code.unwrap_or(MISSING_EXIT_CODE);

    debug!("Exec finished with exit code {}", exit_code);

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_exec_request_shell() {
        let request = ExecRequest::shell("echo hi").in_dir("/workspace");
        assert_eq!(request.cmd[0], "/bin/sh");
        assert_eq!(request.cmd[1], "-c");
        assert_eq!(request.cmd[2], "echo hi");
        assert_eq!(request.working_dir.as_deref(), Some("/workspace"));
    }

    #[test]
    fn test_exec_output_success() {
        let output = ExecOutput {
            stdout: "hello\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(output.success());

        let output = ExecOutput {
            exit_code: 2,
            ..output
        };
        assert!(!output.success());
    }

    #[test]
    fn test_closure_sink_receives_chunks() {
        let seen: Mutex<Vec<u8>> = Mutex::new(Vec::new());
        let sink = |data: &[u8]| {
            seen.lock().unwrap().extend_from_slice(data);
        };

        let as_sink: &dyn OutputSink = &sink;
        as_sink.chunk(b"abc");
        as_sink.chunk(b"def");

        assert_eq!(&*seen.lock().unwrap(), b"abcdef");
    }
}

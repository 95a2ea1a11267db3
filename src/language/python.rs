//! Python plugin.
//!
//! Runs snippets on `python:3.9-slim` with unbuffered output. Dependencies
//! go into a `requirements.txt` installed with pip inside the container.

use crate::container::{ExecHandle, ExecOutput, ExecRequest, OutputSink};
use crate::language::LanguagePlugin;
use async_trait::async_trait;
use std::borrow::Cow;
use std::path::Path;

/// Shell line that prefers `python3` and falls back to `python`.
fn interpreter_command(script: &str) -> Vec<String> {
    let script = shell_escape::escape(Cow::from(script));
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!(
            "if command -v python3 >/dev/null 2>&1; then exec python3 -u {script}; else exec python -u {script}; fi"
        ),
    ]
}

/// Python via pip and requirements.txt.
pub struct Python;

#[async_trait]
impl LanguagePlugin for Python {
    fn name(&self) -> &'static str {
        "python"
    }

    fn default_image(&self) -> &'static str {
        "python:3.9-slim"
    }

    fn inline_filename(&self) -> &'static str {
        "code.py"
    }

    async fn materialize(&self, dependencies: &[String], dir: &Path) -> std::io::Result<()> {
        if !dependencies.is_empty() {
            let mut requirements = dependencies.join("\n");
            requirements.push('\n');
            tokio::fs::write(dir.join("requirements.txt"), requirements).await?;
        }
        Ok(())
    }

    fn inline_command(&self, _deps_installed: bool) -> Vec<String> {
        interpreter_command(self.inline_filename())
    }

    fn run_app_command(&self, entry_file: &str, _deps_installed: bool) -> Vec<String> {
        interpreter_command(entry_file)
    }

    async fn install_dependencies(
        &self,
        exec: &ExecHandle<'_>,
        _dependencies: &[String],
        stdout_sink: Option<&dyn OutputSink>,
        stderr_sink: Option<&dyn OutputSink>,
    ) -> crate::container::Result<Option<ExecOutput>> {
        let request = ExecRequest::shell("pip install --no-cache-dir -r requirements.txt")
            .in_dir("/workspace");
        let output = exec.run(&request, stdout_sink, stderr_sink).await?;
        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_materialize_with_dependencies() {
        let dir = TempDir::new().unwrap();
        let deps = vec!["requests".to_string(), "flask==2.3.0".to_string()];

        Python.materialize(&deps, dir.path()).await.unwrap();

        let requirements =
            std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap();
        assert_eq!(requirements, "requests\nflask==2.3.0\n");
    }

    #[tokio::test]
    async fn test_materialize_without_dependencies_writes_nothing() {
        let dir = TempDir::new().unwrap();

        Python.materialize(&[], dir.path()).await.unwrap();

        assert!(!dir.path().join("requirements.txt").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_command_probes_both_interpreters() {
        let cmd = Python.inline_command(true);
        assert_eq!(cmd[0], "/bin/sh");
        assert!(cmd[2].contains("python3 -u code.py"));
        assert!(cmd[2].contains("python -u code.py"));
    }
}

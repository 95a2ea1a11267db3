//! Shell plugin.
//!
//! Runs POSIX shell scripts on `alpine:latest`. Dependencies are Alpine
//! package names: the installer refreshes the package index and installs
//! them with apk's no-cache flag.

use crate::container::{ExecHandle, ExecOutput, ExecRequest, OutputSink};
use crate::language::LanguagePlugin;
use async_trait::async_trait;
use std::borrow::Cow;

/// Shell scripts via /bin/sh with apk-installed packages.
pub struct Shell;

#[async_trait]
impl LanguagePlugin for Shell {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn default_image(&self) -> &'static str {
        "alpine:latest"
    }

    fn inline_filename(&self) -> &'static str {
        "code.sh"
    }

    // No manifest files; the default materialize no-op applies. The engine
    // marks the delivered script executable.
    fn marks_executable(&self) -> bool {
        true
    }

    fn inline_command(&self, _deps_installed: bool) -> Vec<String> {
        vec!["/bin/sh".to_string(), self.inline_filename().to_string()]
    }

    fn run_app_command(&self, entry_file: &str, _deps_installed: bool) -> Vec<String> {
        vec!["/bin/sh".to_string(), entry_file.to_string()]
    }

    async fn install_dependencies(
        &self,
        exec: &ExecHandle<'_>,
        dependencies: &[String],
        stdout_sink: Option<&dyn OutputSink>,
        stderr_sink: Option<&dyn OutputSink>,
    ) -> crate::container::Result<Option<ExecOutput>> {
        let packages = dependencies
            .iter()
            .map(|p| shell_escape::escape(Cow::from(p.as_str())).into_owned())
            .collect::<Vec<_>>()
            .join(" ");

        let request =
            ExecRequest::shell(format!("apk update && apk add --no-cache {}", packages));
        let output = exec.run(&request, stdout_sink, stderr_sink).await?;
        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_materialize_has_no_manifests() {
        let dir = TempDir::new().unwrap();
        Shell.materialize(&["jq".to_string()], dir.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_commands() {
        assert_eq!(Shell.inline_command(false), ["/bin/sh", "code.sh"]);
        assert_eq!(
            Shell.run_app_command("start.sh", true),
            ["/bin/sh", "start.sh"]
        );
        assert!(Shell.marks_executable());
    }
}

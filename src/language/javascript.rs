//! JavaScript plugin.
//!
//! Runs snippets with Node on `node:18-alpine`. Declared dependencies are
//! written into a minimal `package.json` and installed with npm inside the
//! container.

use crate::container::{ExecHandle, ExecOutput, ExecRequest, OutputSink};
use crate::language::LanguagePlugin;
use async_trait::async_trait;
use std::path::Path;

/// npm invocation shared by the JavaScript and TypeScript plugins.
pub(crate) const NPM_INSTALL: &str = "npm install --no-audit --no-fund --loglevel=error";

/// Split a dependency token into `(package, version)`.
///
/// `express` maps to `latest`; `express@4.18.2` keeps the pin. The leading
/// `@` of scoped packages is not a version separator.
pub(crate) fn split_dependency(token: &str) -> (&str, &str) {
    match token.char_indices().skip(1).find(|&(_, c)| c == '@') {
        Some((at, _)) => (&token[..at], &token[at + 1..]),
        None => (token, "latest"),
    }
}

/// Render the workspace `package.json` for the declared dependencies.
pub(crate) fn package_manifest(dependencies: &[String], dev_dependencies: &[&str]) -> String {
    let mut deps = serde_json::Map::new();
    for token in dependencies {
        if token.is_empty() {
            continue;
        }
        let (name, version) = split_dependency(token);
        deps.insert(name.to_string(), serde_json::Value::String(version.to_string()));
    }

    let mut dev = serde_json::Map::new();
    for name in dev_dependencies {
        dev.insert(name.to_string(), serde_json::Value::String("latest".to_string()));
    }

    let manifest = serde_json::json!({
        "name": "codebox-workspace",
        "version": "1.0.0",
        "private": true,
        "dependencies": deps,
        "devDependencies": dev,
    });

    // json! never produces non-serializable values.
    serde_json::to_string_pretty(&manifest).unwrap_or_default()
}

/// Run npm against the workspace manifest, streaming installer output.
pub(crate) async fn npm_install(
    exec: &ExecHandle<'_>,
    stdout_sink: Option<&dyn OutputSink>,
    stderr_sink: Option<&dyn OutputSink>,
) -> crate::container::Result<Option<ExecOutput>> {
    let request = ExecRequest::shell(NPM_INSTALL).in_dir("/workspace");
    let output = exec.run(&request, stdout_sink, stderr_sink).await?;
    Ok(Some(output))
}

/// Plain JavaScript on Node.
pub struct JavaScript;

#[async_trait]
impl LanguagePlugin for JavaScript {
    fn name(&self) -> &'static str {
        "javascript"
    }

    fn default_image(&self) -> &'static str {
        "node:18-alpine"
    }

    fn inline_filename(&self) -> &'static str {
        "code.js"
    }

    async fn materialize(&self, dependencies: &[String], dir: &Path) -> std::io::Result<()> {
        tokio::fs::write(dir.join("package.json"), package_manifest(dependencies, &[])).await
    }

    fn inline_command(&self, _deps_installed: bool) -> Vec<String> {
        vec!["node".to_string(), self.inline_filename().to_string()]
    }

    fn run_app_command(&self, entry_file: &str, _deps_installed: bool) -> Vec<String> {
        vec!["node".to_string(), entry_file.to_string()]
    }

    async fn install_dependencies(
        &self,
        exec: &ExecHandle<'_>,
        _dependencies: &[String],
        stdout_sink: Option<&dyn OutputSink>,
        stderr_sink: Option<&dyn OutputSink>,
    ) -> crate::container::Result<Option<ExecOutput>> {
        npm_install(exec, stdout_sink, stderr_sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_dependency() {
        assert_eq!(split_dependency("express"), ("express", "latest"));
        assert_eq!(split_dependency("express@4.18.2"), ("express", "4.18.2"));
        assert_eq!(split_dependency("@types/node"), ("@types/node", "latest"));
        assert_eq!(split_dependency("@scope/pkg@1.0.0"), ("@scope/pkg", "1.0.0"));
    }

    #[tokio::test]
    async fn test_materialize_writes_manifest_only() {
        let dir = TempDir::new().unwrap();
        let deps = vec!["express".to_string(), "lodash@4.17.21".to_string()];

        JavaScript.materialize(&deps, dir.path()).await.unwrap();

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("package.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["dependencies"]["express"], "latest");
        assert_eq!(manifest["dependencies"]["lodash"], "4.17.21");
        assert_eq!(manifest["private"], true);

        // The snippet reaches the workspace through the engine, not here.
        assert!(!dir.path().join("code.js").exists());
    }

    #[test]
    fn test_commands() {
        assert_eq!(JavaScript.inline_command(true), ["node", "code.js"]);
        assert_eq!(
            JavaScript.run_app_command("server.js", true),
            ["node", "server.js"]
        );
    }
}

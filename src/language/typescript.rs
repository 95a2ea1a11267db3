//! TypeScript plugin.
//!
//! Same image and npm handling as JavaScript, plus a generated
//! `tsconfig.json`; snippets run through the ts-node launcher.

use crate::container::{ExecHandle, ExecOutput, OutputSink};
use crate::language::LanguagePlugin;
use crate::language::javascript::{npm_install, package_manifest};
use async_trait::async_trait;
use std::path::Path;

const TSCONFIG: &str = r#"{
  "compilerOptions": {
    "target": "ES2020",
    "module": "commonjs",
    "esModuleInterop": true,
    "skipLibCheck": true,
    "strict": false
  }
}
"#;

/// TypeScript on Node via ts-node.
pub struct TypeScript;

impl TypeScript {
    fn launcher(entry: &str, deps_installed: bool) -> Vec<String> {
        // A completed install provides the local launcher; otherwise npx
        // fetches it on demand.
        let mut cmd = vec!["npx".to_string()];
        if !deps_installed {
            cmd.push("--yes".to_string());
        }
        cmd.push("ts-node".to_string());
        cmd.push(entry.to_string());
        cmd
    }
}

#[async_trait]
impl LanguagePlugin for TypeScript {
    fn name(&self) -> &'static str {
        "typescript"
    }

    fn default_image(&self) -> &'static str {
        "node:18-alpine"
    }

    fn inline_filename(&self) -> &'static str {
        "code.ts"
    }

    async fn materialize(&self, dependencies: &[String], dir: &Path) -> std::io::Result<()> {
        tokio::fs::write(
            dir.join("package.json"),
            package_manifest(dependencies, &["typescript", "ts-node"]),
        )
        .await?;
        tokio::fs::write(dir.join("tsconfig.json"), TSCONFIG).await?;
        Ok(())
    }

    fn inline_command(&self, deps_installed: bool) -> Vec<String> {
        Self::launcher(self.inline_filename(), deps_installed)
    }

    fn run_app_command(&self, entry_file: &str, deps_installed: bool) -> Vec<String> {
        Self::launcher(entry_file, deps_installed)
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

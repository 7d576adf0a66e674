// Document rendering: aligned content -> LaTeX source -> compiled PDF.
// Every render owns a uniquely named temporary workspace that is removed on all paths.

pub mod compiler;
pub mod converter;
pub mod latex;
pub mod sections;
pub mod templates;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CompilerSettings;
use crate::generation::alignment::AlignedContentSet;
use crate::models::profile::ProfileSnapshot;
use crate::render::compiler::{CompileError, DocumentCompiler};
use crate::render::sections::plan_sections;
use crate::render::templates::Template;

/// Compiler logs kept on a failed render are cut to this many trailing characters.
pub const MAX_LOG_CHARS: usize = 5000;

const SOURCE_FILE: &str = "cv.tex";
const PDF_FILE: &str = "cv.pdf";
const LOG_FILE: &str = "cv.log";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown template '{0}'")]
    UnknownTemplate(String),

    #[error("generated source is invalid: {0}")]
    InvalidSource(String),

    #[error("render workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("compiler unavailable: {0}")]
    CompilerUnavailable(String),

    #[error("compiler timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64, log: String },

    #[error("compiler exited with status {exit_code:?}")]
    CompilerFailed { exit_code: Option<i32>, log: String },

    #[error("compiler reported success but produced no document")]
    MissingOutput { log: String },
}

impl RenderError {
    /// Captured compiler log, for the variants that ran the compiler.
    pub fn compiler_log(&self) -> Option<&str> {
        match self {
            RenderError::Timeout { log, .. }
            | RenderError::CompilerFailed { log, .. }
            | RenderError::MissingOutput { log } => Some(log),
            _ => None,
        }
    }
}

/// A compiled document together with the exact source it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub template: Template,
    pub source: String,
    pub pdf: Bytes,
}

/// Keeps the last `MAX_LOG_CHARS` characters on a char boundary.
fn tail(log: &str) -> String {
    let count = log.chars().count();
    if count <= MAX_LOG_CHARS {
        return log.to_string();
    }
    log.chars().skip(count - MAX_LOG_CHARS).collect()
}

async fn read_log(workspace: &Path, fallback: &str) -> String {
    match tokio::fs::read(workspace.join(LOG_FILE)).await {
        Ok(bytes) => tail(&String::from_utf8_lossy(&bytes)),
        Err(_) => tail(fallback),
    }
}

#[derive(Clone)]
pub struct DocumentRenderer {
    compiler: Arc<dyn DocumentCompiler>,
    settings: CompilerSettings,
}

impl DocumentRenderer {
    pub fn new(compiler: Arc<dyn DocumentCompiler>, settings: CompilerSettings) -> Self {
        Self { compiler, settings }
    }

    /// Deterministic LaTeX source for `content`; no I/O.
    pub fn compose(
        &self,
        profile: &ProfileSnapshot,
        content: &AlignedContentSet,
        template: Template,
    ) -> Result<String, RenderError> {
        latex::compose_source(template, &plan_sections(profile, content))
    }

    pub async fn render(
        &self,
        run_id: Uuid,
        profile: &ProfileSnapshot,
        content: &AlignedContentSet,
        template_name: &str,
    ) -> Result<RenderedDocument, RenderError> {
        let template = Template::from_name(template_name)?;
        let source = self.compose(profile, content, template)?;

        tokio::fs::create_dir_all(&self.settings.workspace_root).await?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("render-{run_id}-"))
            .tempdir_in(&self.settings.workspace_root)?;
        debug!(run_id = %run_id, workspace = %workspace.path().display(), "Render workspace created");

        let result = self.compile_in(workspace.path(), &source).await;

        let cleanup = workspace.close();
        if let Err(e) = cleanup {
            warn!(run_id = %run_id, "Failed to remove render workspace: {e}");
        }

        let pdf = result?;
        info!(run_id = %run_id, template = template.name(), bytes = pdf.len(), "Document rendered");
        Ok(RenderedDocument {
            template,
            source,
            pdf,
        })
    }

    async fn compile_in(&self, workspace: &Path, source: &str) -> Result<Bytes, RenderError> {
        let source_path = workspace.join(SOURCE_FILE);
        tokio::fs::write(&source_path, source).await?;

        let timeout = self.settings.timeout;
        let output = match self.compiler.compile(&source_path, timeout).await {
            Ok(output) => output,
            Err(CompileError::Timeout { timeout_secs }) => {
                let fallback = format!("compiler killed after {timeout_secs}s");
                return Err(RenderError::Timeout {
                    timeout_secs,
                    log: read_log(workspace, &fallback).await,
                });
            }
            Err(e @ CompileError::Spawn { .. }) => {
                return Err(RenderError::CompilerUnavailable(e.to_string()));
            }
        };

        if !output.succeeded() {
            return Err(RenderError::CompilerFailed {
                exit_code: output.exit_code,
                log: read_log(workspace, &output.stderr).await,
            });
        }

        match tokio::fs::read(workspace.join(PDF_FILE)).await {
            Ok(bytes) if !bytes.is_empty() => Ok(Bytes::from(bytes)),
            _ => Err(RenderError::MissingOutput {
                log: read_log(workspace, &output.stderr).await,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::alignment::align;
    use crate::generation::alignment::tests::{scenario_profile, scenario_requirements};
    use crate::test_support::{StubBehaviour, StubCompiler};
    use std::time::Duration;

    fn renderer(behaviour: StubBehaviour, root: &Path) -> (DocumentRenderer, Arc<StubCompiler>) {
        let compiler = Arc::new(StubCompiler::new(behaviour));
        let settings = CompilerSettings {
            timeout: Duration::from_secs(30),
            workspace_root: root.to_path_buf(),
            ..CompilerSettings::default()
        };
        (DocumentRenderer::new(compiler.clone(), settings), compiler)
    }

    fn content() -> AlignedContentSet {
        align(&scenario_requirements(), &scenario_profile(), 0.1)
    }

    #[tokio::test]
    async fn test_render_success_returns_pdf_and_removes_workspace() {
        let root = tempfile::tempdir().unwrap();
        let (renderer, compiler) = renderer(StubBehaviour::Succeed, root.path());

        let doc = renderer
            .render(Uuid::new_v4(), &scenario_profile(), &content(), "classic")
            .await
            .unwrap();

        assert!(doc.pdf.starts_with(b"%PDF"));
        assert!(doc.source.contains(r"\begin{document}"));
        let workspaces = compiler.workspaces();
        assert_eq!(workspaces.len(), 1);
        assert!(!workspaces[0].exists());
    }

    #[tokio::test]
    async fn test_render_is_deterministic() {
        let root = tempfile::tempdir().unwrap();
        let (renderer, _) = renderer(StubBehaviour::Succeed, root.path());
        let profile = scenario_profile();
        let content = content();

        let a = renderer.render(Uuid::new_v4(), &profile, &content, "compact").await.unwrap();
        let b = renderer.render(Uuid::new_v4(), &profile, &content, "compact").await.unwrap();

        assert_eq!(a.source, b.source);
        assert_eq!(a.pdf, b.pdf);
    }

    #[tokio::test]
    async fn test_timeout_carries_log_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let (renderer, compiler) = renderer(StubBehaviour::Timeout, root.path());

        let err = renderer
            .render(Uuid::new_v4(), &scenario_profile(), &content(), "classic")
            .await
            .unwrap_err();

        assert!(matches!(err, RenderError::Timeout { timeout_secs: 30, .. }));
        assert!(err.compiler_log().unwrap().contains("30s"));
        assert!(!compiler.workspaces()[0].exists());
    }

    #[tokio::test]
    async fn test_failed_compile_reads_log_file() {
        let root = tempfile::tempdir().unwrap();
        let (renderer, _) = renderer(
            StubBehaviour::Fail {
                exit_code: 1,
                log: "! Undefined control sequence.".to_string(),
            },
            root.path(),
        );

        let err = renderer
            .render(Uuid::new_v4(), &scenario_profile(), &content(), "classic")
            .await
            .unwrap_err();

        assert!(matches!(err, RenderError::CompilerFailed { exit_code: Some(1), .. }));
        assert_eq!(err.compiler_log(), Some("! Undefined control sequence."));
    }

    #[tokio::test]
    async fn test_success_without_pdf_is_missing_output() {
        let root = tempfile::tempdir().unwrap();
        let (renderer, _) = renderer(StubBehaviour::NoOutput, root.path());

        let err = renderer
            .render(Uuid::new_v4(), &scenario_profile(), &content(), "classic")
            .await
            .unwrap_err();

        assert!(matches!(err, RenderError::MissingOutput { .. }));
    }

    #[tokio::test]
    async fn test_unknown_template_never_compiles() {
        let root = tempfile::tempdir().unwrap();
        let (renderer, compiler) = renderer(StubBehaviour::Succeed, root.path());

        let err = renderer
            .render(Uuid::new_v4(), &scenario_profile(), &content(), "glossy")
            .await
            .unwrap_err();

        assert!(matches!(err, RenderError::UnknownTemplate(_)));
        assert!(compiler.workspaces().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_renders_use_distinct_workspaces() {
        let root = tempfile::tempdir().unwrap();
        let (renderer, compiler) = renderer(StubBehaviour::Succeed, root.path());
        let profile = scenario_profile();
        let content = content();

        let (a, b) = tokio::join!(
            renderer.render(Uuid::new_v4(), &profile, &content, "classic"),
            renderer.render(Uuid::new_v4(), &profile, &content, "classic"),
        );
        assert!(a.is_ok() && b.is_ok());

        let workspaces = compiler.workspaces();
        assert_eq!(workspaces.len(), 2);
        assert_ne!(workspaces[0], workspaces[1]);
    }

    #[tokio::test]
    #[ignore = "needs pdflatex on PATH"]
    async fn test_pdflatex_output_is_byte_identical_across_workspaces() {
        use crate::render::compiler::ProcessCompiler;

        let root = tempfile::tempdir().unwrap();
        let settings = CompilerSettings {
            timeout: Duration::from_secs(60),
            workspace_root: root.path().to_path_buf(),
            ..CompilerSettings::default()
        };
        let compiler = Arc::new(ProcessCompiler::from_settings(&settings));
        let renderer = DocumentRenderer::new(compiler, settings);
        let profile = scenario_profile();
        let content = content();

        let a = renderer.render(Uuid::new_v4(), &profile, &content, "classic").await.unwrap();
        let b = renderer.render(Uuid::new_v4(), &profile, &content, "classic").await.unwrap();

        assert!(a.pdf.starts_with(b"%PDF"));
        assert_eq!(a.pdf, b.pdf);
    }

    #[test]
    fn test_log_tail_keeps_last_chars() {
        let log = format!("{}END", "x".repeat(MAX_LOG_CHARS));
        let kept = tail(&log);
        assert_eq!(kept.chars().count(), MAX_LOG_CHARS);
        assert!(kept.ends_with("END"));
    }
}

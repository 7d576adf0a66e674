//! External typesetting compiler invocation.
//!
//! The compiler runs in the render workspace with a cleared environment, shell escape
//! disabled, TeX file access restricted to the working directory, and a fixed source
//! date so identical sources compile to identical bytes. The source is passed by file
//! name relative to that directory, so the workspace path never reaches the output.
//! Timeouts kill the process.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CompilerSettings;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compiler did not finish within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("failed to start compiler '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raw result of one compiler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CompileOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Seam between the renderer and the typesetting toolchain.
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    /// Compiles `source`; outputs land next to it. Bounded by `timeout`.
    async fn compile(&self, source: &Path, timeout: Duration) -> Result<CompileOutput, CompileError>;
}

/// Runs a compiler binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    program: String,
    /// `{source}` is replaced by the source file name per run.
    args: Vec<String>,
    sandbox_wrapper: Vec<String>,
}

impl ProcessCompiler {
    #[cfg(test)]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            sandbox_wrapper: Vec::new(),
        }
    }

    /// pdflatex-compatible invocation from settings.
    pub fn from_settings(settings: &CompilerSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: vec![
                "-interaction=nonstopmode".to_string(),
                "-halt-on-error".to_string(),
                "-no-shell-escape".to_string(),
                "-output-directory=.".to_string(),
                "{source}".to_string(),
            ],
            sandbox_wrapper: settings.sandbox_wrapper.clone(),
        }
    }

    fn command(&self, source: &Path) -> Command {
        let outdir = source.parent().unwrap_or_else(|| Path::new("."));
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let args = self.args.iter().map(|a| a.replace("{source}", &file_name));

        let mut command = match self.sandbox_wrapper.split_first() {
            Some((wrapper, wrapper_args)) => {
                let mut c = Command::new(wrapper);
                c.args(wrapper_args).arg(&self.program);
                c
            }
            None => Command::new(&self.program),
        };
        command
            .args(args)
            .current_dir(outdir)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", outdir)
            .env("openin_any", "p")
            .env("openout_any", "p")
            .env("shell_escape", "f")
            .env("SOURCE_DATE_EPOCH", "0")
            .env("FORCE_SOURCE_DATE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl DocumentCompiler for ProcessCompiler {
    async fn compile(&self, source: &Path, timeout: Duration) -> Result<CompileOutput, CompileError> {
        let mut command = self.command(source);
        debug!(program = %self.program, source = %source.display(), "Starting compiler");

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(result) => result.map_err(|source| CompileError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                // the dropped future kills the child
                warn!(timeout_secs = timeout.as_secs(), "Compiler timed out");
                return Err(CompileError::Timeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        Ok(CompileOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> ProcessCompiler {
        ProcessCompiler::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_exit_code_and_streams_captured() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cv.tex");
        std::fs::write(&source, "x").unwrap();

        let output = shell("echo out; echo err >&2; exit 3")
            .compile(&source, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.succeeded());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_runs_in_source_directory_with_cleared_env() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cv.tex");
        std::fs::write(&source, "x").unwrap();
        std::env::set_var("ATS_TEST_LEAK", "secret");

        let output = shell("ls; echo \"leak=${ATS_TEST_LEAK:-none}\"; echo \"epoch=$SOURCE_DATE_EPOCH\"")
            .compile(&source, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(output.succeeded());
        assert!(output.stdout.contains("cv.tex"));
        assert!(output.stdout.contains("leak=none"));
        assert!(output.stdout.contains("epoch=0"));
    }

    #[tokio::test]
    async fn test_placeholders_substituted() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cv.tex");
        std::fs::write(&source, "x").unwrap();

        let compiler = ProcessCompiler::new(
            "sh",
            vec!["-c".to_string(), "cat \"$0\"".to_string(), "{source}".to_string()],
        );
        let output = compiler.compile(&source, Duration::from_secs(5)).await.unwrap();

        assert_eq!(output.stdout, "x");
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cv.tex");

        let result = shell("sleep 5")
            .compile(&source, Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(CompileError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cv.tex");

        let result = ProcessCompiler::new("definitely-not-a-compiler-binary", Vec::new())
            .compile(&source, Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(CompileError::Spawn { .. })));
    }

    #[test]
    fn test_sandbox_wrapper_prefixes_program() {
        let settings = CompilerSettings {
            sandbox_wrapper: vec!["unshare".to_string(), "-rn".to_string()],
            ..CompilerSettings::default()
        };
        let compiler = ProcessCompiler::from_settings(&settings);
        let command = compiler.command(Path::new("/tmp/ws/cv.tex"));
        let std_cmd = command.as_std();

        assert_eq!(std_cmd.get_program(), "unshare");
        let args: Vec<String> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "-rn");
        assert_eq!(args[1], "pdflatex");
        assert!(args.contains(&"-no-shell-escape".to_string()));
        assert!(args.contains(&"-output-directory=.".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("cv.tex"));
        assert!(args.iter().all(|a| !a.contains("/tmp/ws")));
        assert_eq!(std_cmd.get_current_dir(), Some(Path::new("/tmp/ws")));
    }
}

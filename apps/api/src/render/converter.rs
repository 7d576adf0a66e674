//! Secondary export formats, produced from the stored LaTeX source.
//! One attempt per call; retrying is the caller's decision.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Docx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Docx => "docx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("converter workspace error: {0}")]
    Io(#[from] std::io::Error),

    #[error("converter did not finish within {0}s")]
    Timeout(u64),

    #[error("converter exited with {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

#[async_trait]
pub trait FormatConverter: Send + Sync {
    async fn convert(&self, latex_source: &str, format: ExportFormat) -> Result<Bytes, ConvertError>;
}

/// Converts with the `pandoc` binary in a throwaway workspace.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    program: String,
    timeout: Duration,
}

impl PandocConverter {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl Default for PandocConverter {
    fn default() -> Self {
        Self::new("pandoc", Duration::from_secs(30))
    }
}

#[async_trait]
impl FormatConverter for PandocConverter {
    async fn convert(&self, latex_source: &str, format: ExportFormat) -> Result<Bytes, ConvertError> {
        let workspace = tempfile::Builder::new().prefix("export-").tempdir()?;
        let input = workspace.path().join("cv.tex");
        let output = workspace.path().join(format!("cv.{}", format.extension()));
        tokio::fs::write(&input, latex_source).await?;

        let mut command = Command::new(&self.program);
        command
            .arg("--from=latex")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(format = format.extension(), "Running export conversion");
        let result = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ConvertError::Timeout(self.timeout.as_secs()))??;

        if !result.status.success() {
            return Err(ConvertError::Failed {
                exit_code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }
        Ok(Bytes::from(tokio::fs::read(&output).await?))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::RunError;
use crate::generation::alignment::AlignedContentSet;
use crate::generation::requirements::RequirementSet;
use crate::generation::scorer::ScoreBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Partial,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Partial
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }
}

/// Storage keys of a compiled document and the source it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub pdf_key: String,
    pub source_key: String,
}

/// A secondary export produced from a run's stored source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRef {
    pub key: String,
    pub content_type: String,
}

/// The unit-of-work record for one optimization run.
///
/// Created `Pending` at submit, claimed to `Running` by exactly one worker, and
/// frozen once the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub user_id: String,
    pub idempotency_key: Option<String>,
    pub job_description: String,
    pub template: String,
    pub status: RunStatus,
    pub iteration_count: u32,
    pub best_score_seen: Option<ScoreBreakdown>,
    #[serde(default)]
    pub missing_terms: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub requirements: Option<RequirementSet>,
    pub final_content: Option<AlignedContentSet>,
    pub artifact_ref: Option<ArtifactRef>,
    pub error: Option<RunError>,
    /// Set when the run ended without reaching the target score.
    #[serde(default)]
    pub below_target: bool,
    /// Set when requirements came from the rule-based fallback.
    #[serde(default)]
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(
        user_id: impl Into<String>,
        job_description: impl Into<String>,
        template: impl Into<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            user_id: user_id.into(),
            idempotency_key,
            job_description: job_description.into(),
            template: template.into(),
            status: RunStatus::Pending,
            iteration_count: 0,
            best_score_seen: None,
            missing_terms: Vec::new(),
            recommendations: Vec::new(),
            requirements: None,
            final_content: None,
            artifact_ref: None,
            error: None,
            below_target: false,
            degraded: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn fail(&mut self, error: RunError) {
        self.status = RunStatus::Failed;
        self.error = Some(error);
    }

    pub fn result(&self) -> RunResult {
        RunResult {
            run_id: self.run_id,
            status: self.status,
            score: self.best_score_seen,
            artifact_ref: self.artifact_ref.clone(),
            below_target: self.below_target,
            error: self.error.clone(),
        }
    }
}

/// What a caller gets once a run is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub score: Option<ScoreBreakdown>,
    pub artifact_ref: Option<ArtifactRef>,
    pub below_target: bool,
    pub error: Option<RunError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Partial.is_terminal());
    }

    #[test]
    fn test_new_run_is_pending_and_empty() {
        let run = PipelineRun::new("u-1", "jd", "classic", None);
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.iteration_count, 0);
        assert!(run.best_score_seen.is_none());
        assert!(run.artifact_ref.is_none());
    }

    #[test]
    fn test_run_survives_json_storage() {
        let mut run = PipelineRun::new("u-1", "jd", "classic", Some("key-1".to_string()));
        run.best_score_seen = Some(ScoreBreakdown::new(
            50.0,
            40.0,
            100.0,
            75.0,
            Default::default(),
        ));
        run.fail(RunError::from(&PipelineError::Internal("boom".to_string())));

        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "failed");
        let back: PipelineRun = serde_json::from_value(json).unwrap();
        assert_eq!(back, run);
    }
}

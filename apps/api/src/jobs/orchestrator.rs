//! Job Orchestrator: owns the lifecycle of every `PipelineRun`.
//!
//! - `submit` validates input synchronously, snapshots the profile, persists a
//!   pending run and spawns its execution. Nothing is created for invalid input.
//! - Execution waits on a `Semaphore` so at most `worker_concurrency` runs are active.
//! - The optimization loop owns extraction → scoring; this module writes the summary
//!   for the best content, renders it, stores artifacts, freezes the record and
//!   publishes the result.
//! - A render failure fails the run but keeps its score and content for diagnostics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::{export_key, store_document, ArtifactStore};
use crate::config::PipelineConfig;
use crate::errors::{AppError, PipelineError, RunError, StoreError};
use crate::generation::alignment::{align, AlignedContentSet};
use crate::generation::extractor::{extract_requirements, validate_job_description};
use crate::generation::optimizer::{LoopOutcome, OptimizationLoop, ProgressObserver};
use crate::generation::requirements::RequirementSet;
use crate::generation::scorer::{score, ScoreReport};
use crate::generation::summary::write_summary;
use crate::jobs::notify::RunNotifier;
use crate::jobs::store::RunStore;
use crate::llm_client::LanguageModel;
use crate::models::profile::ProfileSnapshot;
use crate::models::run::{ExportRef, PipelineRun, RunResult, RunStatus};
use crate::profiles::ProfileStore;
use crate::render::converter::{ExportFormat, FormatConverter};
use crate::render::sections::plan_sections;
use crate::render::templates::Template;
use crate::render::DocumentRenderer;

/// Request body for `POST /api/v1/runs`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub user_id: String,
    pub job_description: String,
    pub template: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Request body for `POST /api/v1/analyze`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub user_id: String,
    pub job_description: String,
}

/// One scored alignment of a profile against a job description, without a render.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub requirements: RequirementSet,
    pub score: ScoreReport,
    /// Aligned items in relevance order, as they would be rendered before refinement.
    pub content: AlignedContentSet,
    pub degraded: bool,
}

/// External collaborators the orchestrator drives.
pub struct Collaborators {
    pub runs: Arc<dyn RunStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub notifier: Arc<dyn RunNotifier>,
    pub llm: Arc<dyn LanguageModel>,
    pub renderer: DocumentRenderer,
    pub converter: Arc<dyn FormatConverter>,
}

struct Inner {
    deps: Collaborators,
    config: PipelineConfig,
    permits: Arc<Semaphore>,
    cancel_flags: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(deps: Collaborators, config: PipelineConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));
        Self {
            inner: Arc::new(Inner {
                deps,
                config,
                permits,
                cancel_flags: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validates and enqueues a run, returning its id immediately.
    /// A repeated idempotency key returns the existing run's id without new work.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Uuid, AppError> {
        let inner = &self.inner;
        let job_description =
            validate_job_description(&request.job_description, inner.config.max_jd_chars)?;

        let template_name = request
            .template
            .as_deref()
            .unwrap_or(&inner.config.default_template);
        let template = Template::from_name(template_name)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let profile = inner.deps.profiles.fetch(&request.user_id).await?;

        let run = PipelineRun::new(
            request.user_id,
            job_description,
            template.name(),
            request.idempotency_key,
        );
        let new_id = run.run_id;
        let stored = inner.deps.runs.insert(run).await?;
        if stored.run_id != new_id {
            info!(run_id = %stored.run_id, "Idempotent resubmission; returning existing run");
            return Ok(stored.run_id);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.flags().insert(new_id, Arc::clone(&cancel));

        info!(run_id = %new_id, user_id = %stored.user_id, "Run submitted");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.execute(new_id, Arc::new(profile), cancel).await;
        });
        Ok(new_id)
    }

    /// Extracts, aligns and scores in the request. No run is created and nothing is rendered.
    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<Analysis, AppError> {
        let inner = &self.inner;
        let profile = inner.deps.profiles.fetch(&request.user_id).await?;
        let requirements =
            extract_requirements(&request.job_description, inner.deps.llm.as_ref(), &inner.config)
                .await?;

        let floor = inner.config.alignment_floor;
        let (requirements, profile, content) = tokio::task::spawn_blocking(move || {
            let content = align(&requirements, &profile, floor);
            (requirements, profile, content)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("alignment task failed: {e}")))?;

        let sections = plan_sections(&profile, &content);
        let report = score(&content, &requirements, &sections, &inner.config);
        info!(
            user_id = %request.user_id,
            composite = report.breakdown.composite(),
            degraded = requirements.degraded,
            "Profile analyzed"
        );
        Ok(Analysis {
            degraded: requirements.degraded,
            requirements,
            score: report,
            content,
        })
    }

    pub async fn get_status(&self, run_id: Uuid) -> Result<PipelineRun, AppError> {
        self.inner
            .deps
            .runs
            .get(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))
    }

    /// Score and artifact of a terminal run; `Conflict` while it is still in flight.
    pub async fn get_result(&self, run_id: Uuid) -> Result<RunResult, AppError> {
        let run = self.get_status(run_id).await?;
        if !run.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Run {run_id} is still {}",
                run.status.as_str()
            )));
        }
        Ok(run.result())
    }

    /// Requests cancellation. A pending run fails immediately; a running one stops at
    /// its next state transition.
    pub async fn cancel(&self, run_id: Uuid) -> Result<PipelineRun, AppError> {
        let mut run = self.get_status(run_id).await?;
        if run.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Run {run_id} already finished as {}",
                run.status.as_str()
            )));
        }
        if let Some(flag) = self.flags().get(&run_id) {
            flag.store(true, Ordering::SeqCst);
        }

        if run.status == RunStatus::Pending {
            run.fail(RunError::from(&PipelineError::Cancelled));
            run.updated_at = Utc::now();
            match self.inner.deps.runs.update(&run).await {
                Ok(()) => {
                    info!(run_id = %run_id, "Pending run cancelled");
                    self.inner.notify(&run).await;
                }
                Err(StoreError::Terminal(_)) => return self.get_status(run_id).await,
                Err(e) => return Err(e.into()),
            }
        } else {
            info!(run_id = %run_id, "Cancellation requested for running run");
        }
        Ok(run)
    }

    /// Converts a finished run's stored source into `format` and stores the result.
    pub async fn export(&self, run_id: Uuid, format: ExportFormat) -> Result<ExportRef, AppError> {
        let run = self.get_status(run_id).await?;
        let artifact = run.artifact_ref.as_ref().ok_or_else(|| {
            AppError::Conflict(format!("Run {run_id} has no rendered document to export"))
        })?;

        let deps = &self.inner.deps;
        let source = deps.artifacts.get(&artifact.source_key).await?;
        let source = String::from_utf8(source.to_vec())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("stored source is not UTF-8: {e}")))?;

        let converted = deps
            .converter
            .convert(&source, format)
            .await
            .map_err(|e| AppError::Conversion(e.to_string()))?;

        let export = ExportRef {
            key: export_key(run_id, format),
            content_type: format.content_type().to_string(),
        };
        deps.artifacts
            .put(&export.key, converted, &export.content_type)
            .await?;
        info!(run_id = %run_id, key = %export.key, "Run exported");
        Ok(export)
    }

    fn flags(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<AtomicBool>>> {
        self.inner
            .cancel_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Background execution
// ────────────────────────────────────────────────────────────────────────────

/// Persists iteration progress while the loop runs.
struct RunProgress<'a> {
    runs: &'a dyn RunStore,
    run: Mutex<PipelineRun>,
}

impl RunProgress<'_> {
    fn into_run(self) -> PipelineRun {
        self.run.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProgressObserver for RunProgress<'_> {
    async fn on_iteration(&self, iteration: u32, _latest: &ScoreReport, best: &ScoreReport) {
        let snapshot = {
            let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
            run.iteration_count = iteration;
            run.best_score_seen = Some(best.breakdown);
            run.missing_terms = best.missing_terms.clone();
            run.recommendations = best.recommendations.clone();
            run.updated_at = Utc::now();
            run.clone()
        };
        if let Err(e) = self.runs.update(&snapshot).await {
            warn!(run_id = %snapshot.run_id, "Failed to persist iteration progress: {e}");
        }
    }
}

impl Inner {
    async fn execute(self: Arc<Self>, run_id: Uuid, profile: Arc<ProfileSnapshot>, cancel: Arc<AtomicBool>) {
        let permit = Arc::clone(&self.permits).acquire_owned().await;
        if permit.is_err() {
            error!(run_id = %run_id, "Worker pool closed; run left pending");
            return;
        }

        match self.deps.runs.claim(run_id).await {
            Ok(Some(run)) => {
                info!(run_id = %run_id, "Run started");
                let finished = self.drive(run, &profile, &cancel).await;
                self.finish(finished).await;
            }
            Ok(None) => debug!(run_id = %run_id, "Run no longer pending; skipping"),
            Err(e) => error!(run_id = %run_id, "Failed to claim run: {e}"),
        }

        self.cancel_flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id);
    }

    /// Runs the loop and the render; returns the terminal record.
    async fn drive(
        &self,
        run: PipelineRun,
        profile: &Arc<ProfileSnapshot>,
        cancel: &AtomicBool,
    ) -> PipelineRun {
        let job_description = run.job_description.clone();
        let progress = RunProgress {
            runs: self.deps.runs.as_ref(),
            run: Mutex::new(run),
        };

        let outcome = OptimizationLoop::new(self.deps.llm.as_ref(), &self.config, cancel, &progress)
            .run(&job_description, Arc::clone(profile))
            .await;
        let mut run = progress.into_run();

        let mut outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                run.fail(RunError::from(&e));
                return run;
            }
        };
        record_outcome(&mut run, &outcome);

        if cancel.load(Ordering::SeqCst) {
            run.fail(RunError::from(&PipelineError::Cancelled));
            return run;
        }

        let summary = write_summary(
            &outcome.content,
            &outcome.requirements,
            profile,
            self.deps.llm.as_ref(),
            &self.config,
        )
        .await;
        outcome.content.set_summary(summary);
        run.final_content = Some(outcome.content.clone());

        let document = match self
            .deps
            .renderer
            .render(run.run_id, profile, &outcome.content, &run.template)
            .await
        {
            Ok(document) => document,
            Err(e) => {
                run.fail(RunError::from(&PipelineError::Render(e)));
                return run;
            }
        };

        match store_document(self.deps.artifacts.as_ref(), run.run_id, document.pdf, &document.source).await {
            Ok(artifact) => {
                run.artifact_ref = Some(artifact);
                run.status = if outcome.met_target {
                    RunStatus::Succeeded
                } else {
                    RunStatus::Partial
                };
            }
            Err(e) => {
                error!(run_id = %run.run_id, "Failed to store rendered document: {e}");
                run.fail(RunError::from(&PipelineError::Storage(e)));
            }
        }
        run
    }

    async fn finish(&self, mut run: PipelineRun) {
        run.updated_at = Utc::now();
        let composite = run.best_score_seen.map(|b| b.composite());
        match run.status {
            RunStatus::Failed => warn!(
                run_id = %run.run_id,
                error_kind = ?run.error.as_ref().map(|e| e.kind),
                composite,
                "Run failed"
            ),
            status => info!(
                run_id = %run.run_id,
                status = status.as_str(),
                iterations = run.iteration_count,
                composite,
                below_target = run.below_target,
                "Run finished"
            ),
        }

        if let Err(e) = self.deps.runs.update(&run).await {
            error!(run_id = %run.run_id, "Failed to persist terminal run: {e}");
            return;
        }
        self.notify(&run).await;
    }

    async fn notify(&self, run: &PipelineRun) {
        if let Err(e) = self.deps.notifier.run_finished(run).await {
            warn!(run_id = %run.run_id, "Failed to publish run result: {e}");
        }
    }
}

fn record_outcome(run: &mut PipelineRun, outcome: &LoopOutcome) {
    run.iteration_count = outcome.iterations;
    run.best_score_seen = Some(*outcome.breakdown());
    run.missing_terms = outcome.report.missing_terms.clone();
    run.recommendations = outcome.report.recommendations.clone();
    run.requirements = Some(outcome.requirements.clone());
    run.final_content = Some(outcome.content.clone());
    run.degraded = outcome.degraded();
    run.below_target = !outcome.met_target;
    if outcome.refine.unresolved > 0 {
        debug!(
            run_id = %run.run_id,
            unresolved = outcome.refine.unresolved,
            "Bullets left outside the word range"
        );
    }
}

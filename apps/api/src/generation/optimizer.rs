//! Optimization Loop: extract → align → refine → score, retried with escalating
//! refinement until the target score is met or the iteration budget runs out.
//!
//! # Architecture
//! - `OptimizationLoop::run` drives an explicit `LoopState` machine; every transition is
//!   a single `match` arm and is logged at debug.
//! - The requirement set and alignment are computed once. Retries only intensify
//!   refinement (rule-only first, then model-assisted).
//! - The best-scoring iteration is kept (earlier wins ties), so exhaustion returns the
//!   best content seen rather than the last.
//! - The cancel flag is checked before every transition. A stage already inside an
//!   external call finishes (bounded by its own timeout) before the check runs.
//! - Alignment is CPU-bound and runs via `tokio::task::spawn_blocking`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::generation::alignment::{align, AlignedContentSet};
use crate::generation::extractor::extract_requirements;
use crate::generation::refiner::{refine, Aggressiveness, RefineReport};
use crate::generation::requirements::RequirementSet;
use crate::generation::scorer::{score, ScoreBreakdown, ScoreReport};
use crate::llm_client::LanguageModel;
use crate::models::profile::ProfileSnapshot;
use crate::render::sections::plan_sections;

// ────────────────────────────────────────────────────────────────────────────
// Progress reporting
// ────────────────────────────────────────────────────────────────────────────

/// Receives the outcome of every scoring pass while the loop is still running.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_iteration(&self, iteration: u32, latest: &ScoreReport, best: &ScoreReport);
}

/// Observer that ignores progress.
pub struct NoProgress;

#[async_trait]
impl ProgressObserver for NoProgress {
    async fn on_iteration(&self, _iteration: u32, _latest: &ScoreReport, _best: &ScoreReport) {}
}

// ────────────────────────────────────────────────────────────────────────────
// State machine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Best {
    content: AlignedContentSet,
    report: ScoreReport,
    refine: RefineReport,
}

/// Everything that exists once requirements and alignment are done.
#[derive(Debug)]
struct Working {
    requirements: RequirementSet,
    content: AlignedContentSet,
    aggressiveness: Aggressiveness,
    iteration: u32,
    last_refine: RefineReport,
    best: Option<Best>,
}

#[derive(Debug)]
enum LoopState {
    Extracting,
    Aligning(RequirementSet),
    Refining(Working),
    Scoring(Working),
    Retrying(Working),
    Done(Working),
    Exhausted(Working),
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            LoopState::Extracting => "extracting",
            LoopState::Aligning(_) => "aligning",
            LoopState::Refining(_) => "refining",
            LoopState::Scoring(_) => "scoring",
            LoopState::Retrying(_) => "retrying",
            LoopState::Done(_) => "done",
            LoopState::Exhausted(_) => "exhausted",
        }
    }
}

/// Final result of a loop that did not fail.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub requirements: RequirementSet,
    /// Content of the best-scoring iteration.
    pub content: AlignedContentSet,
    pub report: ScoreReport,
    /// Refinement metadata of the best iteration, including unresolved bullets.
    pub refine: RefineReport,
    /// Scoring passes performed; never more than `max_iterations`.
    pub iterations: u32,
    pub met_target: bool,
}

impl LoopOutcome {
    pub fn breakdown(&self) -> &ScoreBreakdown {
        &self.report.breakdown
    }

    pub fn degraded(&self) -> bool {
        self.requirements.degraded
    }
}

pub struct OptimizationLoop<'a> {
    llm: &'a dyn LanguageModel,
    config: &'a PipelineConfig,
    cancel: &'a AtomicBool,
    observer: &'a dyn ProgressObserver,
}

impl<'a> OptimizationLoop<'a> {
    pub fn new(
        llm: &'a dyn LanguageModel,
        config: &'a PipelineConfig,
        cancel: &'a AtomicBool,
        observer: &'a dyn ProgressObserver,
    ) -> Self {
        Self {
            llm,
            config,
            cancel,
            observer,
        }
    }

    pub async fn run(
        &self,
        job_description: &str,
        profile: Arc<ProfileSnapshot>,
    ) -> Result<LoopOutcome, PipelineError> {
        let mut state = LoopState::Extracting;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!(state = state.name(), "Optimization loop cancelled");
                return Err(PipelineError::Cancelled);
            }
            debug!(state = state.name(), "Optimization loop transition");

            state = match state {
                LoopState::Extracting => {
                    let requirements =
                        extract_requirements(job_description, self.llm, self.config).await?;
                    LoopState::Aligning(requirements)
                }

                LoopState::Aligning(requirements) => {
                    let content = self.align_blocking(&requirements, &profile).await?;
                    debug!(items = content.len(), "Alignment complete");
                    LoopState::Refining(Working {
                        requirements,
                        content,
                        aggressiveness: Aggressiveness::RuleOnly,
                        iteration: 0,
                        last_refine: RefineReport::default(),
                        best: None,
                    })
                }

                LoopState::Refining(mut w) => {
                    w.last_refine = refine(
                        &mut w.content,
                        &w.requirements,
                        &profile,
                        w.aggressiveness,
                        self.llm,
                        self.config,
                    )
                    .await;
                    LoopState::Scoring(w)
                }

                LoopState::Scoring(mut w) => {
                    w.iteration += 1;
                    let sections = plan_sections(&profile, &w.content);
                    let report = score(&w.content, &w.requirements, &sections, self.config);
                    let composite = report.breakdown.composite();
                    debug!(iteration = w.iteration, composite, "Iteration scored");

                    let improved = w
                        .best
                        .as_ref()
                        .map_or(true, |b| composite > b.report.breakdown.composite());
                    if improved {
                        w.best = Some(Best {
                            content: w.content.clone(),
                            report: report.clone(),
                            refine: w.last_refine.clone(),
                        });
                    }
                    if let Some(best) = &w.best {
                        self.observer.on_iteration(w.iteration, &report, &best.report).await;
                    }

                    if report.breakdown.meets(self.config.target_score) {
                        LoopState::Done(w)
                    } else if w.iteration < self.config.max_iterations {
                        LoopState::Retrying(w)
                    } else {
                        LoopState::Exhausted(w)
                    }
                }

                LoopState::Retrying(mut w) => {
                    w.aggressiveness = Aggressiveness::LlmAssisted;
                    LoopState::Refining(w)
                }

                LoopState::Done(w) => return finish(w, true),
                LoopState::Exhausted(w) => return finish(w, false),
            };
        }
    }

    async fn align_blocking(
        &self,
        requirements: &RequirementSet,
        profile: &Arc<ProfileSnapshot>,
    ) -> Result<AlignedContentSet, PipelineError> {
        let requirements = requirements.clone();
        let profile = Arc::clone(profile);
        let floor = self.config.alignment_floor;
        tokio::task::spawn_blocking(move || align(&requirements, &profile, floor))
            .await
            .map_err(|e| PipelineError::Internal(format!("spawn_blocking failed in alignment: {e}")))
    }
}

fn finish(w: Working, met_target: bool) -> Result<LoopOutcome, PipelineError> {
    let best = w
        .best
        .ok_or_else(|| PipelineError::Internal("loop finished without a scored iteration".into()))?;
    info!(
        iterations = w.iteration,
        composite = best.report.breakdown.composite(),
        met_target,
        "Optimization loop finished"
    );
    Ok(LoopOutcome {
        requirements: w.requirements,
        content: best.content,
        report: best.report,
        refine: best.refine,
        iterations: w.iteration,
        met_target,
    })
}

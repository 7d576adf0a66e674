//! In-process doubles for every external collaborator. Test builds only.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::config::{CompilerSettings, PipelineConfig};
use crate::errors::StoreError;
use crate::generation::alignment::tests::scenario_profile;
use crate::jobs::notify::RunNotifier;
use crate::jobs::orchestrator::{Collaborators, Orchestrator};
use crate::jobs::store::RunStore;
use crate::llm_client::{FinishReason, LanguageModel, LlmCompletion, LlmError, LlmRequest};
use crate::models::profile::ProfileSnapshot;
use crate::models::run::{PipelineRun, RunStatus};
use crate::profiles::{ProfileStore, ProfileStoreError};
use crate::render::compiler::{CompileError, CompileOutput, DocumentCompiler};
use crate::render::converter::{ConvertError, ExportFormat, FormatConverter};
use crate::render::DocumentRenderer;

pub const SCENARIO_JD: &str = "Seeking a backend engineer with Python and PostgreSQL experience";

pub const SCENARIO_EXTRACTION: &str = r#"{"requirements": [
    {"term": "python", "category": "skill", "weight": 0.9},
    {"term": "postgresql", "category": "skill", "weight": 0.8},
    {"term": "backend", "category": "responsibility", "weight": 0.7},
    {"term": "rest api", "category": "skill", "weight": 0.5}
]}"#;

// ────────────────────────────────────────────────────────────────────────────
// Language model
// ────────────────────────────────────────────────────────────────────────────

/// Replays a fixed script of answers; an exhausted script answers `EmptyContent`.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
    max_tokens: Mutex<Vec<u32>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            max_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `max_tokens` of every request received, in call order.
    pub fn max_tokens_seen(&self) -> Vec<u32> {
        self.max_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.max_tokens.lock().unwrap().push(request.max_tokens);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(LlmCompletion {
                text,
                finish_reason: FinishReason::Stop,
            }),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::EmptyContent),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Compiler and converter
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum StubBehaviour {
    /// Writes `cv.pdf` derived from the source and exits 0.
    Succeed,
    /// Writes `cv.log` and exits with `exit_code`.
    Fail { exit_code: i32, log: String },
    Timeout,
    /// Exits 0 without producing a PDF.
    NoOutput,
}

pub struct StubCompiler {
    behaviour: StubBehaviour,
    workspaces: Mutex<Vec<PathBuf>>,
}

impl StubCompiler {
    pub fn new(behaviour: StubBehaviour) -> Self {
        Self {
            behaviour,
            workspaces: Mutex::new(Vec::new()),
        }
    }

    /// Directories the compiler was invoked in, in call order.
    pub fn workspaces(&self) -> Vec<PathBuf> {
        self.workspaces.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentCompiler for StubCompiler {
    async fn compile(&self, source: &Path, timeout: Duration) -> Result<CompileOutput, CompileError> {
        let dir = source.parent().unwrap().to_path_buf();
        self.workspaces.lock().unwrap().push(dir.clone());

        let ok = CompileOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        match &self.behaviour {
            StubBehaviour::Succeed => {
                let mut pdf = b"%PDF-1.4\n".to_vec();
                pdf.extend(std::fs::read(source).unwrap());
                std::fs::write(dir.join("cv.pdf"), pdf).unwrap();
                Ok(ok)
            }
            StubBehaviour::Fail { exit_code, log } => {
                std::fs::write(dir.join("cv.log"), log).unwrap();
                Ok(CompileOutput {
                    exit_code: Some(*exit_code),
                    ..ok
                })
            }
            StubBehaviour::Timeout => Err(CompileError::Timeout {
                timeout_secs: timeout.as_secs(),
            }),
            StubBehaviour::NoOutput => Ok(ok),
        }
    }
}

/// Prefixes the source with the format name.
pub struct StubConverter;

#[async_trait]
impl FormatConverter for StubConverter {
    async fn convert(&self, latex_source: &str, format: ExportFormat) -> Result<Bytes, ConvertError> {
        let name = format.extension().to_uppercase();
        Ok(Bytes::from(format!("{name}:{latex_source}")))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stores and notifier
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: HashMap<String, ProfileSnapshot>,
}

impl InMemoryProfileStore {
    pub fn with(profiles: Vec<ProfileSnapshot>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.user_id.clone(), p)).collect(),
        }
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn fetch(&self, user_id: &str) -> Result<ProfileSnapshot, ProfileStoreError> {
        self.profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| ProfileStoreError::NotFound(user_id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryRunStore {
    pub fn len(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert(&self, run: PipelineRun) -> Result<PipelineRun, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(key) = &run.idempotency_key {
            let existing = runs
                .values()
                .find(|r| r.user_id == run.user_id && r.idempotency_key.as_ref() == Some(key));
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }
        runs.insert(run.run_id, run.clone());
        Ok(run)
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.runs.lock().unwrap().get(&run_id).cloned())
    }

    async fn claim(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        match runs.get_mut(&run_id) {
            Some(run) if run.status == RunStatus::Pending => {
                run.status = RunStatus::Running;
                run.updated_at = Utc::now();
                Ok(Some(run.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap();
        match runs.get_mut(&run.run_id) {
            None => Err(StoreError::NotFound(format!("run {}", run.run_id))),
            Some(stored) if stored.is_terminal() => Err(StoreError::Terminal(run.run_id)),
            Some(stored) => {
                *stored = run.clone();
                Ok(())
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryArtifactStore {
    objects: Mutex<HashMap<String, Bytes>>,
    rejecting: AtomicBool,
}

impl InMemoryArtifactStore {
    /// Makes every later `put` fail with a backend error.
    pub fn reject_puts(&self) {
        self.rejecting.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<(), StoreError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("bucket unavailable for {key}")));
        }
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

/// Records which runs were announced instead of publishing anywhere.
#[derive(Default)]
pub struct RecordingNotifier {
    notified: Mutex<Vec<Uuid>>,
}

impl RecordingNotifier {
    pub fn notified(&self) -> Vec<Uuid> {
        self.notified.lock().unwrap().clone()
    }

    /// Waits until at least `count` runs were announced.
    pub async fn wait_for(&self, count: usize) -> Vec<Uuid> {
        for _ in 0..500 {
            let seen = self.notified();
            if seen.len() >= count {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} notifications, got {:?}", self.notified());
    }
}

#[async_trait]
impl RunNotifier for RecordingNotifier {
    async fn run_finished(&self, run: &PipelineRun) -> Result<(), StoreError> {
        self.notified.lock().unwrap().push(run.run_id);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestrator harness
// ────────────────────────────────────────────────────────────────────────────

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub runs: Arc<InMemoryRunStore>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub model: Arc<ScriptedModel>,
    pub compiler: Arc<StubCompiler>,
    /// Keeps the render workspace root alive for the harness lifetime.
    pub workspace_root: tempfile::TempDir,
}

/// An orchestrator over in-memory collaborators and the scenario profile (`u-1`).
pub fn orchestrator_with(
    behaviour: StubBehaviour,
    script: Vec<Result<String, LlmError>>,
    config: PipelineConfig,
) -> Harness {
    let workspace_root = tempfile::tempdir().unwrap();
    let runs = Arc::new(InMemoryRunStore::default());
    let artifacts = Arc::new(InMemoryArtifactStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let model = Arc::new(ScriptedModel::new(script));
    let compiler = Arc::new(StubCompiler::new(behaviour));

    let settings = CompilerSettings {
        workspace_root: workspace_root.path().to_path_buf(),
        ..config.compiler.clone()
    };
    let deps = Collaborators {
        runs: runs.clone(),
        profiles: Arc::new(InMemoryProfileStore::with(vec![scenario_profile()])),
        artifacts: artifacts.clone(),
        notifier: notifier.clone(),
        llm: model.clone(),
        renderer: DocumentRenderer::new(compiler.clone(), settings),
        converter: Arc::new(StubConverter),
    };

    Harness {
        orchestrator: Orchestrator::new(deps, config),
        runs,
        artifacts,
        notifier,
        model,
        compiler,
        workspace_root,
    }
}

/// Polls until the run is terminal.
pub async fn wait_terminal(orchestrator: &Orchestrator, run_id: Uuid) -> PipelineRun {
    for _ in 0..500 {
        let run = orchestrator.get_status(run_id).await.unwrap();
        if run.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} did not finish");
}

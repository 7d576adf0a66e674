use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Service wiring loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

/// Weights of the four ATS score components. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub keyword_match: f64,
    pub semantic_similarity: f64,
    pub bullet_quality: f64,
    pub section_coverage: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            keyword_match: 0.35,
            semantic_similarity: 0.30,
            bullet_quality: 0.20,
            section_coverage: 0.15,
        }
    }
}

/// Bullet shape constraints shared by the refiner and the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletRules {
    pub min_words: usize,
    pub max_words: usize,
    /// No requirement term may occur more often than this across all bullets.
    pub max_keyword_repeats: usize,
}

impl Default for BulletRules {
    fn default() -> Self {
        Self {
            min_words: 12,
            max_words: 20,
            max_keyword_repeats: 3,
        }
    }
}

/// Word bounds for the generated professional summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRules {
    pub min_words: usize,
    pub max_words: usize,
}

impl Default for SummaryRules {
    fn default() -> Self {
        Self {
            min_words: 20,
            max_words: 60,
        }
    }
}

/// Exponential backoff for transient external-call failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base, base*factor, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1);
        self.base_delay * self.factor.saturating_pow(exp)
    }
}

/// External compiler invocation settings.
#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pub program: String,
    pub timeout: Duration,
    /// Scratch root under which each render gets its own workspace.
    pub workspace_root: PathBuf,
    /// Optional wrapper (e.g. `unshare -rn`) prefixed to the compiler command.
    pub sandbox_wrapper: Vec<String>,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            program: "pdflatex".to_string(),
            timeout: Duration::from_secs(30),
            workspace_root: std::env::temp_dir(),
            sandbox_wrapper: Vec::new(),
        }
    }
}

/// Everything a pipeline run needs to know about thresholds and budgets.
/// Passed explicitly into the orchestrator and every stage; never read globally.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub target_score: u32,
    pub max_iterations: u32,
    pub max_jd_chars: usize,
    pub alignment_floor: f64,
    pub max_requirement_terms: usize,
    pub bullet_rules: BulletRules,
    pub summary_rules: SummaryRules,
    pub weights: ScoreWeights,
    pub llm_retry: RetryPolicy,
    /// Completion budget for requirement extraction.
    pub llm_max_tokens: u32,
    /// Completion budget for a single bullet rewrite.
    pub rewrite_max_tokens: u32,
    /// Completion budget for the professional summary.
    pub summary_max_tokens: u32,
    pub compiler: CompilerSettings,
    pub worker_concurrency: usize,
    pub default_template: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_score: 90,
            max_iterations: 5,
            max_jd_chars: 20_000,
            alignment_floor: 0.1,
            max_requirement_terms: 30,
            bullet_rules: BulletRules::default(),
            summary_rules: SummaryRules::default(),
            weights: ScoreWeights::default(),
            llm_retry: RetryPolicy::default(),
            llm_max_tokens: 2048,
            rewrite_max_tokens: 256,
            summary_max_tokens: 400,
            compiler: CompilerSettings::default(),
            worker_concurrency: 4,
            default_template: "classic".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by any pipeline variables present in the environment.
    pub fn from_env() -> Result<Self> {
        let defaults = PipelineConfig::default();

        let sandbox_wrapper = std::env::var("COMPILER_SANDBOX")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let workspace_root = std::env::var("RENDER_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.compiler.workspace_root);

        let config = PipelineConfig {
            target_score: env_or("ATS_MIN_SCORE", defaults.target_score)?,
            max_iterations: env_or("ATS_MAX_ITERATIONS", defaults.max_iterations)?,
            max_jd_chars: env_or("MAX_JD_CHARS", defaults.max_jd_chars)?,
            alignment_floor: env_or("ALIGNMENT_FLOOR", defaults.alignment_floor)?,
            max_requirement_terms: env_or(
                "MAX_REQUIREMENT_TERMS",
                defaults.max_requirement_terms,
            )?,
            bullet_rules: BulletRules {
                min_words: env_or("BULLET_MIN_WORDS", defaults.bullet_rules.min_words)?,
                max_words: env_or("BULLET_MAX_WORDS", defaults.bullet_rules.max_words)?,
                max_keyword_repeats: env_or(
                    "MAX_KEYWORD_REPEATS",
                    defaults.bullet_rules.max_keyword_repeats,
                )?,
            },
            summary_rules: SummaryRules {
                min_words: env_or("SUMMARY_MIN_WORDS", defaults.summary_rules.min_words)?,
                max_words: env_or("SUMMARY_MAX_WORDS", defaults.summary_rules.max_words)?,
            },
            weights: defaults.weights,
            llm_retry: RetryPolicy {
                max_retries: env_or("LLM_MAX_RETRIES", defaults.llm_retry.max_retries)?,
                base_delay: Duration::from_millis(env_or("LLM_BACKOFF_BASE_MS", 500u64)?),
                factor: defaults.llm_retry.factor,
            },
            llm_max_tokens: env_or("LLM_MAX_TOKENS", defaults.llm_max_tokens)?,
            rewrite_max_tokens: env_or("LLM_REWRITE_MAX_TOKENS", defaults.rewrite_max_tokens)?,
            summary_max_tokens: env_or("LLM_SUMMARY_MAX_TOKENS", defaults.summary_max_tokens)?,
            compiler: CompilerSettings {
                program: std::env::var("LATEX_COMPILER")
                    .unwrap_or(defaults.compiler.program),
                timeout: Duration::from_secs(env_or("LATEX_TIMEOUT_SECS", 30u64)?),
                workspace_root,
                sandbox_wrapper,
            },
            worker_concurrency: env_or("WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            default_template: std::env::var("DEFAULT_TEMPLATE")
                .unwrap_or(defaults.default_template),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            anyhow::bail!("ATS_MAX_ITERATIONS must be at least 1");
        }
        if self.bullet_rules.min_words == 0
            || self.bullet_rules.min_words > self.bullet_rules.max_words
        {
            anyhow::bail!("BULLET_MIN_WORDS must be between 1 and BULLET_MAX_WORDS");
        }
        if self.summary_rules.min_words == 0
            || self.summary_rules.min_words > self.summary_rules.max_words
        {
            anyhow::bail!("SUMMARY_MIN_WORDS must be between 1 and SUMMARY_MAX_WORDS");
        }
        if !(0.0..=1.0).contains(&self.alignment_floor) {
            anyhow::bail!("ALIGNMENT_FLOOR must be within [0, 1]");
        }
        if self.worker_concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be at least 1");
        }
        Ok(())
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        Err(_) => Ok(default),
    }
}

//! ATS Scorer: pure, deterministic compatibility scoring.
//!
//! composite = w_km × keyword_match + w_ss × semantic_similarity
//!           + w_bq × bullet_quality + w_sc × section_coverage
//!
//! The composite is never stored on its own: `ScoreBreakdown` derives it from the four
//! components every time, including after deserialisation.

use serde::{Deserialize, Serialize};

use crate::config::{PipelineConfig, ScoreWeights};
use crate::generation::alignment::AlignedContentSet;
use crate::generation::refiner::keyword_counts;
use crate::generation::requirements::RequirementSet;
use crate::generation::text::Normalized;
use crate::render::sections::{RenderedSection, SectionKind};

/// Missing terms reported alongside a score.
const MAX_MISSING_REPORTED: usize = 20;
/// Keyword match below this triggers a recommendation.
const LOW_KEYWORD_MATCH: f64 = 60.0;

/// The four component scores, each in [0, 100], and the weights that combine them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "StoredBreakdown", from = "StoredBreakdown")]
pub struct ScoreBreakdown {
    keyword_match: f64,
    semantic_similarity: f64,
    bullet_quality: f64,
    section_coverage: f64,
    weights: ScoreWeights,
}

/// Wire form. `composite` is written for readers and ignored when read back.
#[derive(Serialize, Deserialize)]
struct StoredBreakdown {
    keyword_match: f64,
    semantic_similarity: f64,
    bullet_quality: f64,
    section_coverage: f64,
    #[serde(default)]
    composite: f64,
    #[serde(default)]
    weights: Option<ScoreWeights>,
}

impl From<ScoreBreakdown> for StoredBreakdown {
    fn from(b: ScoreBreakdown) -> Self {
        StoredBreakdown {
            keyword_match: b.keyword_match,
            semantic_similarity: b.semantic_similarity,
            bullet_quality: b.bullet_quality,
            section_coverage: b.section_coverage,
            composite: b.composite(),
            weights: Some(b.weights),
        }
    }
}

impl From<StoredBreakdown> for ScoreBreakdown {
    fn from(s: StoredBreakdown) -> Self {
        ScoreBreakdown::new(
            s.keyword_match,
            s.semantic_similarity,
            s.bullet_quality,
            s.section_coverage,
            s.weights.unwrap_or_default(),
        )
    }
}

fn clamp_component(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

impl ScoreBreakdown {
    pub fn new(
        keyword_match: f64,
        semantic_similarity: f64,
        bullet_quality: f64,
        section_coverage: f64,
        weights: ScoreWeights,
    ) -> Self {
        Self {
            keyword_match: clamp_component(keyword_match),
            semantic_similarity: clamp_component(semantic_similarity),
            bullet_quality: clamp_component(bullet_quality),
            section_coverage: clamp_component(section_coverage),
            weights,
        }
    }

    pub fn keyword_match(&self) -> f64 {
        self.keyword_match
    }

    pub fn semantic_similarity(&self) -> f64 {
        self.semantic_similarity
    }

    pub fn bullet_quality(&self) -> f64 {
        self.bullet_quality
    }

    pub fn section_coverage(&self) -> f64 {
        self.section_coverage
    }

    pub fn composite(&self) -> f64 {
        let w = &self.weights;
        w.keyword_match * self.keyword_match
            + w.semantic_similarity * self.semantic_similarity
            + w.bullet_quality * self.bullet_quality
            + w.section_coverage * self.section_coverage
    }

    /// Composite rounded half-up to an integer; the value compared with the target.
    pub fn rounded_composite(&self) -> u32 {
        self.composite().round() as u32
    }

    pub fn meets(&self, target: u32) -> bool {
        self.rounded_composite() >= target
    }
}

/// A breakdown plus the diagnostics a caller needs to act on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub breakdown: ScoreBreakdown,
    pub matched_terms: Vec<String>,
    pub missing_terms: Vec<String>,
    pub recommendations: Vec<String>,
}

fn percent(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

fn section_present(sections: &[RenderedSection], kind: SectionKind) -> bool {
    sections.iter().any(|s| s.kind == kind && !s.is_empty())
}

/// Scores `content` against `requirements` given the sections the renderer would emit.
pub fn score(
    content: &AlignedContentSet,
    requirements: &RequirementSet,
    sections: &[RenderedSection],
    config: &PipelineConfig,
) -> ScoreReport {
    let rules = &config.bullet_rules;

    let text = Normalized::new(&content.content_text());
    let (matched_terms, missing_terms): (Vec<String>, Vec<String>) = requirements
        .terms()
        .map(str::to_string)
        .partition(|t| text.strength(t) > 0.0);
    let keyword_match = percent(matched_terms.len(), requirements.len());

    let counts = keyword_counts(content, requirements);
    let stuffed: Vec<&String> = counts
        .iter()
        .filter(|(_, n)| **n > rules.max_keyword_repeats)
        .map(|(t, _)| t)
        .collect();

    let mut too_short = 0;
    let mut too_long = 0;
    let mut good = 0;
    let mut total = 0;
    for bullet in content.bullets() {
        total += 1;
        let carries_stuffed = {
            let normalized = Normalized::new(&bullet.current_text);
            stuffed.iter().any(|t| normalized.contains_phrase(t))
        };
        if bullet.word_count < rules.min_words {
            too_short += 1;
        } else if bullet.word_count > rules.max_words {
            too_long += 1;
        } else if !carries_stuffed {
            good += 1;
        }
    }
    let bullet_quality = percent(good, total);

    let expected = [
        section_present(sections, SectionKind::Contact),
        section_present(sections, SectionKind::Education),
        section_present(sections, SectionKind::Skills),
        section_present(sections, SectionKind::Experience)
            || section_present(sections, SectionKind::Projects),
    ];
    let present = expected.iter().filter(|p| **p).count();
    let section_coverage = percent(present, expected.len());

    let semantic_similarity = content.mean_relevance() * 100.0;

    let breakdown = ScoreBreakdown::new(
        keyword_match,
        semantic_similarity,
        bullet_quality,
        section_coverage,
        config.weights,
    );

    let mut recommendations = Vec::new();
    if keyword_match < LOW_KEYWORD_MATCH && !missing_terms.is_empty() {
        let preview: Vec<&str> = missing_terms.iter().take(5).map(String::as_str).collect();
        recommendations.push(format!(
            "Keyword match is {keyword_match:.0}%. Add evidence for: {}",
            preview.join(", ")
        ));
    }
    if too_short > 0 {
        recommendations.push(format!(
            "{too_short} bullet(s) are under {} words; add scope, tools, or outcomes",
            rules.min_words
        ));
    }
    if too_long > 0 {
        recommendations.push(format!(
            "{too_long} bullet(s) are over {} words; split or tighten them",
            rules.max_words
        ));
    }
    if !stuffed.is_empty() {
        let terms: Vec<&str> = stuffed.iter().map(|t| t.as_str()).collect();
        recommendations.push(format!(
            "Reduce repetition of: {} (max {} uses each)",
            terms.join(", "),
            rules.max_keyword_repeats
        ));
    }
    if total == 0 {
        recommendations.push("No project or experience bullets match this role".to_string());
    }
    for (ok, name) in expected
        .iter()
        .zip(["contact details", "education", "skills", "experience or projects"])
    {
        if !ok {
            recommendations.push(format!("Add a non-empty {name} section"));
        }
    }

    ScoreReport {
        breakdown,
        matched_terms,
        missing_terms: missing_terms.into_iter().take(MAX_MISSING_REPORTED).collect(),
        recommendations,
    }
}

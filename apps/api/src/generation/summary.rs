//! Professional summary tailored to the job description.
//!
//! The model drafts the paragraph from profile facts and the profile-backed target
//! keywords. A draft is only kept if it stays in the word range, mentions no requirement
//! term the profile cannot back, and keeps every term under the document keyword cap.
//! Otherwise the summary is assembled from the strongest aligned terms and the
//! candidate's own project and role names.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::generation::alignment::AlignedContentSet;
use crate::generation::prompts::{summary_system, SUMMARY_PROMPT_TEMPLATE};
use crate::generation::refiner::{backed_terms, join_terms, keyword_counts, BackedTerm};
use crate::generation::requirements::RequirementSet;
use crate::generation::text::{word_count, Normalized};
use crate::llm_client::{complete_with_retry, LanguageModel, LlmRequest, ModelOutput};
use crate::models::profile::ProfileSnapshot;

/// Keywords named in the summary prompt and in the rule-built sentence.
const MAX_SUMMARY_TERMS: usize = 5;
/// Project names quoted in the rule-built summary.
const MAX_SUMMARY_PROJECTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Model,
    Rules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub source: SummarySource,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

/// Backed terms the aligned content actually matched, heaviest first.
fn aligned_terms<'a>(content: &AlignedContentSet, backed: &'a [BackedTerm]) -> Vec<&'a BackedTerm> {
    backed
        .iter()
        .filter(|b| {
            content
                .items()
                .iter()
                .any(|item| item.matched_terms.contains(&b.term))
        })
        .take(MAX_SUMMARY_TERMS)
        .collect()
}

fn profile_facts(profile: &ProfileSnapshot) -> String {
    let mut lines = Vec::new();
    if !profile.skills.is_empty() {
        let skills: Vec<&str> = profile.skills.iter().map(|s| s.name.as_str()).collect();
        lines.push(format!("- Skills: {}", skills.join(", ")));
    }
    for project in &profile.projects {
        let mut line = format!("- Project: {}", project.name);
        if !project.tech_stack.is_empty() {
            line.push_str(&format!(" ({})", project.tech_stack.join(", ")));
        }
        for bullet in &project.bullets {
            line.push_str(&format!("; {}", bullet.text));
        }
        lines.push(line);
    }
    for internship in &profile.internships {
        lines.push(format!("- Role: {} at {}", internship.title, internship.company));
    }
    for cert in &profile.certifications {
        lines.push(format!("- Certification: {}", cert.name));
    }
    lines.join("\n")
}

/// Accepts a model summary only if it is one paragraph in range, grounded, and under the cap.
fn validate_summary(
    candidate: &str,
    content: &AlignedContentSet,
    backed: &[BackedTerm],
    requirements: &RequirementSet,
    config: &PipelineConfig,
) -> Option<String> {
    if candidate.contains('\n') {
        return None;
    }
    let text = candidate.split_whitespace().collect::<Vec<_>>().join(" ");
    let rules = config.summary_rules;
    let words = word_count(&text);
    if text.is_empty() || words < rules.min_words || words > rules.max_words {
        return None;
    }

    let summary = Normalized::new(&text);
    let cap = config.bullet_rules.max_keyword_repeats;
    let document = keyword_counts(content, requirements);
    let within_cap = requirements.terms().all(|term| {
        let n = summary.count_phrase(term);
        n == 0 || (n == 1 && document.get(term).copied().unwrap_or(0) < cap)
    });
    let grounded = requirements
        .terms()
        .all(|term| summary.strength(term) == 0.0 || backed.iter().any(|b| b.term == term));
    (within_cap && grounded).then_some(text)
}

/// Summary assembled from aligned terms and the profile's own names.
/// `None` when the profile offers nothing to say.
fn rule_summary(
    content: &AlignedContentSet,
    backed: &[BackedTerm],
    profile: &ProfileSnapshot,
) -> Option<Summary> {
    let terms: Vec<&str> = aligned_terms(content, backed)
        .into_iter()
        .map(|b| b.display.as_str())
        .collect();
    let projects: Vec<&str> = profile
        .projects
        .iter()
        .take(MAX_SUMMARY_PROJECTS)
        .map(|p| p.name.as_str())
        .collect();

    let mut sentences = Vec::new();
    if !terms.is_empty() {
        sentences.push(format!("Hands-on experience with {}.", join_terms(&terms)));
    }
    if !projects.is_empty() {
        sentences.push(format!("Built and shipped {}.", join_terms(&projects)));
    }
    if let Some(internship) = profile.internships.first() {
        sentences.push(format!(
            "Worked as {} at {}.",
            internship.title, internship.company
        ));
    }
    if sentences.is_empty() {
        return None;
    }
    Some(Summary {
        text: sentences.join(" "),
        source: SummarySource::Rules,
    })
}

async fn request_summary(
    content: &AlignedContentSet,
    backed: &[BackedTerm],
    profile: &ProfileSnapshot,
    llm: &dyn LanguageModel,
    config: &PipelineConfig,
) -> Result<Option<String>, crate::llm_client::LlmError> {
    let keywords: Vec<&str> = aligned_terms(content, backed)
        .into_iter()
        .map(|b| b.display.as_str())
        .collect();
    let request = LlmRequest {
        system_prompt: summary_system(),
        user_content: SUMMARY_PROMPT_TEMPLATE
            .replace("{min_words}", &config.summary_rules.min_words.to_string())
            .replace("{max_words}", &config.summary_rules.max_words.to_string())
            .replace("{keywords}", &keywords.join(", "))
            .replace("{facts}", &profile_facts(profile)),
        max_tokens: config.summary_max_tokens,
    };

    let completion = complete_with_retry(llm, &request, &config.llm_retry).await?;
    Ok(match completion.parse_json::<SummaryResponse>() {
        ModelOutput::Parsed(response) => Some(response.summary),
        ModelOutput::Unparsed(_) => None,
    })
}

/// Writes the summary for the final content. Model failures never fail the run.
pub async fn write_summary(
    content: &AlignedContentSet,
    requirements: &RequirementSet,
    profile: &ProfileSnapshot,
    llm: &dyn LanguageModel,
    config: &PipelineConfig,
) -> Option<Summary> {
    let backed = backed_terms(requirements, profile);

    match request_summary(content, &backed, profile, llm, config).await {
        Ok(Some(raw)) => {
            if let Some(text) = validate_summary(&raw, content, &backed, requirements, config) {
                return Some(Summary {
                    text,
                    source: SummarySource::Model,
                });
            }
            debug!("Rejected model summary that failed validation");
        }
        Ok(None) => debug!("Model summary did not match the expected schema"),
        Err(e) => warn!("Summary call failed, using rule-built summary: {e}"),
    }
    rule_summary(content, &backed, profile)
}

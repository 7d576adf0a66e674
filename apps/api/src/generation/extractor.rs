//! Requirement Extractor: turns raw job-description text into a weighted `RequirementSet`.
//!
//! The language model is asked first. Anything other than a clean, non-empty structured
//! answer (transport failure after retries, truncation, schema mismatch) drops to the
//! deterministic rule-based extractor and the set is marked `degraded`.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::generation::prompts::{extraction_system, EXTRACTION_PROMPT_TEMPLATE};
use crate::generation::requirements::{RequirementCandidate, RequirementCategory, RequirementSet};
use crate::generation::text::{
    is_filler, is_known_technology, is_stop_word, tokenize, QUALIFICATION_WORDS,
};
use crate::llm_client::{complete_with_retry, LanguageModel, LlmRequest, ModelOutput};

/// Longest technology phrase in the lexicon, in tokens.
const MAX_PHRASE_TOKENS: usize = 3;

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    requirements: Vec<RequirementCandidate>,
}

/// Rejects empty or oversized job descriptions. Returns the trimmed text.
pub fn validate_job_description(jd_text: &str, max_chars: usize) -> Result<&str, PipelineError> {
    let trimmed = jd_text.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Input(
            "job description must not be empty".to_string(),
        ));
    }
    let chars = trimmed.chars().count();
    if chars > max_chars {
        return Err(PipelineError::Input(format!(
            "job description is {chars} characters; the limit is {max_chars}"
        )));
    }
    Ok(trimmed)
}

/// Extracts requirements, preferring the language model and falling back to rules.
pub async fn extract_requirements(
    jd_text: &str,
    llm: &dyn LanguageModel,
    config: &PipelineConfig,
) -> Result<RequirementSet, PipelineError> {
    let jd = validate_job_description(jd_text, config.max_jd_chars)?;

    if let Some(set) = extract_with_model(jd, llm, config).await {
        info!(terms = set.len(), "Requirements extracted by language model");
        return Ok(set);
    }

    let set = extract_with_rules(jd, config.max_requirement_terms)?;
    info!(terms = set.len(), "Requirements extracted by rule-based fallback (degraded)");
    Ok(set)
}

async fn extract_with_model(
    jd: &str,
    llm: &dyn LanguageModel,
    config: &PipelineConfig,
) -> Option<RequirementSet> {
    let request = LlmRequest {
        system_prompt: extraction_system(),
        user_content: EXTRACTION_PROMPT_TEMPLATE
            .replace("{max_terms}", &config.max_requirement_terms.to_string())
            .replace("{jd_text}", jd),
        max_tokens: config.llm_max_tokens,
    };

    let completion = match complete_with_retry(llm, &request, &config.llm_retry).await {
        Ok(completion) => completion,
        Err(e) => {
            // absorbed here; never recorded on a run
            let err = PipelineError::TransientCall(e.to_string());
            warn!("{err}; using rule-based fallback");
            return None;
        }
    };

    match completion.parse_json::<ExtractionResponse>() {
        ModelOutput::Parsed(response) => {
            let set = RequirementSet::from_candidates(
                response.requirements,
                config.max_requirement_terms,
                false,
            );
            if set.is_empty() {
                warn!("Model returned no usable requirement terms, using rule-based fallback");
                None
            } else {
                Some(set)
            }
        }
        ModelOutput::Unparsed(raw) => {
            warn!(
                finish_reason = ?completion.finish_reason,
                chars = raw.len(),
                "Model output unparseable, using rule-based fallback"
            );
            None
        }
    }
}

fn years_regex() -> &'static Regex {
    static YEARS: OnceLock<Regex> = OnceLock::new();
    YEARS.get_or_init(|| {
        Regex::new(r"(\d{1,2})\s*\+?\s*(?:years|yrs)").expect("valid years regex")
    })
}

/// Deterministic extractor: lexicon phrases become skills, degree words and
/// "N+ years" become qualifications, remaining content words become
/// responsibilities ranked by frequency. Weight is raw frequency before normalisation.
pub fn extract_with_rules(jd: &str, max_terms: usize) -> Result<RequirementSet, PipelineError> {
    let tokens = tokenize(jd);

    let mut skills = FrequencyTable::default();
    let mut qualifications = FrequencyTable::default();
    let mut responsibilities = FrequencyTable::default();

    let mut i = 0;
    while i < tokens.len() {
        let matched = (1..=MAX_PHRASE_TOKENS.min(tokens.len() - i))
            .rev()
            .find(|&n| is_known_technology(&tokens[i..i + n].join(" ")));
        if let Some(n) = matched {
            skills.bump(tokens[i..i + n].join(" "));
            i += n;
            continue;
        }

        let token = &tokens[i];
        if QUALIFICATION_WORDS.contains(&token.as_str()) {
            let term = match tokens.get(i + 1) {
                Some(next) if next == "degree" && token != "degree" => {
                    i += 1;
                    format!("{token} degree")
                }
                _ => token.clone(),
            };
            qualifications.bump(term);
        } else if is_content_word(token) {
            responsibilities.bump(token.clone());
        }
        i += 1;
    }

    for caps in years_regex().captures_iter(&jd.to_lowercase()) {
        qualifications.bump(format!("{}+ years", &caps[1]));
    }

    let mut candidates: Vec<RequirementCandidate> = Vec::new();
    candidates.extend(skills.into_candidates(RequirementCategory::Skill, false));
    candidates.extend(qualifications.into_candidates(RequirementCategory::Qualification, false));
    let room = max_terms.saturating_sub(candidates.len());
    candidates.extend(
        responsibilities
            .into_candidates(RequirementCategory::Responsibility, true)
            .into_iter()
            .take(room),
    );

    debug!(candidates = candidates.len(), "Rule-based extraction candidates");

    let set = RequirementSet::from_candidates(candidates, max_terms, true);
    if set.is_empty() {
        return Err(PipelineError::Extraction(
            "no requirement terms could be extracted from the job description".to_string(),
        ));
    }
    Ok(set)
}

fn is_content_word(token: &str) -> bool {
    token.len() > 2
        && !is_stop_word(token)
        && !is_filler(token)
        && !token.chars().all(|c| c.is_ascii_digit() || c == '+' || c == '.')
}

/// Term counts that remember first-seen order.
#[derive(Default)]
struct FrequencyTable {
    order: Vec<String>,
    counts: HashMap<String, u32>,
}

impl FrequencyTable {
    fn bump(&mut self, term: String) {
        let count = self.counts.entry(term.clone()).or_insert(0);
        if *count == 0 {
            self.order.push(term);
        }
        *count += 1;
    }

    fn into_candidates(
        self,
        category: RequirementCategory,
        rank_by_frequency: bool,
    ) -> Vec<RequirementCandidate> {
        let mut out: Vec<RequirementCandidate> = self
            .order
            .into_iter()
            .map(|term| {
                let weight = f64::from(self.counts.get(&term).copied().unwrap_or(1));
                RequirementCandidate {
                    term,
                    category,
                    weight,
                }
            })
            .collect();
        if rank_by_frequency {
            out.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::LlmError;
    use crate::test_support::ScriptedModel;

    const SCENARIO_JD: &str = "Seeking a backend engineer with Python and PostgreSQL experience";

    fn terms(set: &RequirementSet) -> Vec<&str> {
        set.terms().collect()
    }

    #[test]
    fn test_empty_and_whitespace_jd_rejected() {
        assert!(matches!(
            validate_job_description("", 100),
            Err(PipelineError::Input(_))
        ));
        assert!(matches!(
            validate_job_description("   \n\t ", 100),
            Err(PipelineError::Input(_))
        ));
    }

    #[test]
    fn test_oversized_jd_rejected() {
        let jd = "python ".repeat(20);
        assert!(matches!(
            validate_job_description(&jd, 50),
            Err(PipelineError::Input(_))
        ));
        assert!(validate_job_description(&jd, 500).is_ok());
    }

    #[test]
    fn test_rules_extract_scenario_terms() {
        let set = extract_with_rules(SCENARIO_JD, 30).unwrap();
        let extracted = terms(&set);
        for expected in ["python", "postgresql", "backend"] {
            assert!(extracted.contains(&expected), "missing {expected}: {extracted:?}");
        }
        assert!(!extracted.contains(&"seeking"));
        assert!(!extracted.contains(&"experience"));
        assert!(set.degraded);
        assert!(set.requirements().iter().all(|r| r.weight > 0.0));
    }

    #[test]
    fn test_rules_prefer_longest_lexicon_phrase() {
        let set = extract_with_rules("Design distributed systems on Amazon Web Services", 30)
            .unwrap();
        let extracted = terms(&set);
        assert!(extracted.contains(&"distributed systems"));
        assert!(extracted.contains(&"amazon web services"));
        assert!(!extracted.contains(&"amazon"));
    }

    #[test]
    fn test_rules_extract_qualifications() {
        let set = extract_with_rules(
            "Bachelor degree in computer science and 3+ years of Java required",
            30,
        )
        .unwrap();
        let quals: Vec<&str> = set
            .requirements()
            .iter()
            .filter(|r| r.category == RequirementCategory::Qualification)
            .map(|r| r.term.as_str())
            .collect();
        assert_eq!(quals, vec!["bachelor degree", "3+ years"]);
    }

    #[test]
    fn test_rules_respect_term_budget() {
        let jd = (0..60)
            .map(|i| format!("duty{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let set = extract_with_rules(&format!("Python {jd}"), 10).unwrap();
        assert_eq!(set.len(), 10);
        assert_eq!(set.requirements()[0].term, "python");
    }

    #[test]
    fn test_rules_fail_on_contentless_text() {
        let result = extract_with_rules("the and of to a", 30);
        assert!(matches!(result, Err(PipelineError::Extraction(_))));
    }

    #[tokio::test]
    async fn test_model_answer_is_used_when_parseable() {
        let model = ScriptedModel::new(vec![Ok(r#"{"requirements": [
                {"term": "Python", "category": "skill", "weight": 0.9},
                {"term": "PostgreSQL", "category": "skill", "weight": 0.8},
                {"term": "backend", "category": "responsibility", "weight": 0.7},
                {"term": "REST API", "category": "skill", "weight": 0.5},
                {"term": "python", "category": "skill", "weight": 0.2}
            ]}"#
        .to_string())]);

        let set = extract_requirements(SCENARIO_JD, &model, &PipelineConfig::default())
            .await
            .unwrap();

        assert_eq!(terms(&set), vec!["python", "postgresql", "backend", "rest api"]);
        assert!(!set.degraded);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_garbage_model_output_falls_back_to_rules() {
        let model = ScriptedModel::new(vec![Ok("python, postgres, backend".to_string())]);

        let set = extract_requirements(SCENARIO_JD, &model, &PipelineConfig::default())
            .await
            .unwrap();

        assert!(set.degraded);
        assert!(terms(&set).contains(&"python"));
    }

    #[tokio::test]
    async fn test_empty_parsed_set_falls_back_to_rules() {
        let model = ScriptedModel::new(vec![Ok(r#"{"requirements": []}"#.to_string())]);

        let set = extract_requirements(SCENARIO_JD, &model, &PipelineConfig::default())
            .await
            .unwrap();

        assert!(set.degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_then_fall_back() {
        let model = ScriptedModel::new(vec![
            Err(LlmError::Timeout),
            Err(LlmError::Api { status: 503, message: "overloaded".to_string() }),
            Err(LlmError::Timeout),
        ]);

        let set = extract_requirements(SCENARIO_JD, &model, &PipelineConfig::default())
            .await
            .unwrap();

        assert!(set.degraded);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_jd_never_calls_model() {
        let model = ScriptedModel::new(vec![]);

        let result = extract_requirements("  ", &model, &PipelineConfig::default()).await;

        assert!(matches!(result, Err(PipelineError::Input(_))));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_both_paths_failing_is_extraction_error() {
        let model = ScriptedModel::new(vec![Ok("not json".to_string())]);

        let result =
            extract_requirements("the and of to a", &model, &PipelineConfig::default()).await;

        assert!(matches!(result, Err(PipelineError::Extraction(_))));
    }
}

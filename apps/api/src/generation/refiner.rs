//! Bullet Refiner: brings bullets into the configured word range without keyword stuffing.
//!
//! Rule-only refinement shortens long bullets at clause boundaries (hard-truncating as a
//! last resort) and lengthens short ones by inserting profile-backed requirement terms
//! plus a context phrase. The LLM-assisted pass asks the model for a rewrite and only
//! accepts it if it passes the same length, stuffing and grounding checks; otherwise the
//! rule-only result stands. A bullet that still cannot reach the range is flagged
//! `WordCountUnresolved` rather than padded with invented content.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{BulletRules, PipelineConfig};
use crate::generation::alignment::{AlignedContentSet, BulletCandidate, BulletFlag};
use crate::generation::prompts::{bullet_rewrite_system, BULLET_REWRITE_PROMPT_TEMPLATE};
use crate::generation::requirements::RequirementSet;
use crate::generation::text::{is_stop_word, normalize_term, word_count, Normalized};
use crate::llm_client::{complete_with_retry, LanguageModel, LlmRequest, ModelOutput};
use crate::models::profile::ProfileSnapshot;

/// Keyword insertions per bullet in one rule-only pass.
const MAX_INSERTED_TERMS: usize = 2;
/// Target keywords named in one rewrite prompt.
const MAX_PROMPT_KEYWORDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggressiveness {
    None,
    RuleOnly,
    LlmAssisted,
}

/// What one refinement pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefineReport {
    pub rewritten: usize,
    pub llm_accepted: usize,
    pub llm_rejected: usize,
    /// A model call failed and the rest of the pass ran rule-only.
    pub llm_unavailable: bool,
    pub dropped: usize,
    pub unresolved: usize,
}

/// Occurrences of each requirement term across all bullet text, in term order.
pub fn keyword_counts(
    content: &AlignedContentSet,
    requirements: &RequirementSet,
) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> =
        requirements.terms().map(|t| (t.to_string(), 0)).collect();
    for bullet in content.bullets() {
        for (term, n) in counts_in(&bullet.current_text, requirements) {
            *counts.entry(term).or_insert(0) += n;
        }
    }
    counts
}

fn counts_in(text: &str, requirements: &RequirementSet) -> Vec<(String, usize)> {
    let normalized = Normalized::new(text);
    requirements
        .terms()
        .map(|t| (t.to_string(), normalized.count_phrase(t)))
        .filter(|(_, n)| *n > 0)
        .collect()
}

/// Document-wide keyword occurrence counts, kept current as bullets change.
struct KeywordLedger<'a> {
    counts: BTreeMap<String, usize>,
    cap: usize,
    requirements: &'a RequirementSet,
}

impl<'a> KeywordLedger<'a> {
    fn build(content: &AlignedContentSet, requirements: &'a RequirementSet, cap: usize) -> Self {
        Self {
            counts: keyword_counts(content, requirements),
            cap,
            requirements,
        }
    }

    fn count(&self, term: &str) -> usize {
        self.counts.get(term).copied().unwrap_or(0)
    }

    /// Whether swapping `old` for `new` keeps every term at or under the cap.
    /// Terms already over the cap may stay where they are but must not grow.
    fn fits(&self, old: &str, new: &str) -> bool {
        let old_counts: BTreeMap<String, usize> =
            counts_in(old, self.requirements).into_iter().collect();
        counts_in(new, self.requirements).into_iter().all(|(term, n)| {
            let before = old_counts.get(&term).copied().unwrap_or(0);
            let after = self.count(&term).saturating_sub(before) + n;
            after <= self.cap || n <= before
        })
    }

    fn replace(&mut self, old: &str, new: &str) {
        for (term, n) in counts_in(old, self.requirements) {
            if let Some(c) = self.counts.get_mut(&term) {
                *c = c.saturating_sub(n);
            }
        }
        for (term, n) in counts_in(new, self.requirements) {
            *self.counts.entry(term).or_insert(0) += n;
        }
    }

    fn over_cap(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|(_, n)| **n > self.cap)
            .map(|(t, _)| t.clone())
            .collect()
    }
}

/// A requirement term the profile can back up, with the spelling to write it in.
#[derive(Debug, Clone)]
pub(crate) struct BackedTerm {
    pub term: String,
    pub display: String,
}

/// Requirement terms with evidence anywhere in the profile, heaviest first.
pub(crate) fn backed_terms(requirements: &RequirementSet, profile: &ProfileSnapshot) -> Vec<BackedTerm> {
    let mut spellings: Vec<&str> = Vec::new();
    spellings.extend(profile.skills.iter().map(|s| s.name.as_str()));
    for project in &profile.projects {
        spellings.extend(project.tech_stack.iter().map(String::as_str));
    }

    let mut evidence: Vec<&str> = spellings.clone();
    for project in &profile.projects {
        evidence.push(&project.name);
        evidence.extend(project.bullets.iter().map(|b| b.text.as_str()));
    }
    for internship in &profile.internships {
        evidence.push(&internship.title);
        evidence.extend(internship.bullets.iter().map(|b| b.text.as_str()));
    }
    for cert in &profile.certifications {
        evidence.push(&cert.name);
        evidence.extend(cert.bullets.iter().map(|b| b.text.as_str()));
    }
    let evidence = Normalized::new(&evidence.join("\n"));

    requirements
        .by_weight()
        .into_iter()
        .filter(|r| evidence.strength(&r.term) > 0.0)
        .map(|r| {
            let display = spellings
                .iter()
                .find(|s| normalize_term(s) == r.term)
                .map(|s| s.to_string())
                .unwrap_or_else(|| r.term.clone());
            BackedTerm {
                term: r.term.clone(),
                display,
            }
        })
        .collect()
}

fn clause_regex() -> &'static Regex {
    static CLAUSE: OnceLock<Regex> = OnceLock::new();
    CLAUSE.get_or_init(|| Regex::new(r"[;,]\s*|\.\s+").expect("valid clause regex"))
}

fn tidy(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '-'))
        .to_string()
}

/// Keeps leading clauses while they fit; falls back to cutting at `max_words`
/// and dropping dangling stop words.
fn shorten(text: &str, rules: &BulletRules) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut words = 0;
    for clause in clause_regex().split(text).map(str::trim).filter(|c| !c.is_empty()) {
        let n = word_count(clause);
        if words + n > rules.max_words {
            break;
        }
        kept.push(clause);
        words += n;
    }
    if words >= rules.min_words {
        return tidy(&kept.join(", "));
    }

    let mut cut: Vec<&str> = text.split_whitespace().take(rules.max_words).collect();
    while cut.len() > 1 {
        let last = normalize_term(cut[cut.len() - 1]);
        if last.is_empty() || is_stop_word(&last) {
            cut.pop();
        } else {
            break;
        }
    }
    tidy(&cut.join(" "))
}

pub(crate) fn join_terms(terms: &[&str]) -> String {
    match terms {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

/// Lengthens a short bullet with profile-backed terms it lacks, then its context phrase.
fn lengthen(
    bullet: &BulletCandidate,
    backed: &[BackedTerm],
    ledger: &KeywordLedger,
    rules: &BulletRules,
) -> String {
    let base = tidy(&bullet.current_text);
    let present = Normalized::new(&base);

    let mut candidates: Vec<&BackedTerm> = backed
        .iter()
        .filter(|b| present.strength(&b.term) == 0.0 && ledger.count(&b.term) < ledger.cap)
        .collect();
    // unmatched terms first; stable, so weight order holds within each group
    candidates.sort_by_key(|b| ledger.count(&b.term) > 0);

    let mut inserted: Vec<&str> = Vec::new();
    let mut text = base.clone();
    for candidate in candidates.into_iter().take(MAX_INSERTED_TERMS) {
        if word_count(&text) >= rules.min_words {
            break;
        }
        let mut trial = inserted.clone();
        trial.push(candidate.display.as_str());
        let attempt = format!("{base} with {}", join_terms(&trial));
        if word_count(&attempt) <= rules.max_words {
            inserted = trial;
            text = attempt;
        }
    }

    let has_context = !bullet.context.is_empty()
        && text.to_lowercase().contains(&bullet.context.to_lowercase());
    if word_count(&text) < rules.min_words && !bullet.context.is_empty() && !has_context {
        let attempt = format!("{text} {}", bullet.context);
        if word_count(&attempt) <= rules.max_words {
            text = attempt;
        }
    }
    text
}

/// Rule-only rewrite of one bullet. Returns the bullet unchanged when already in range.
fn rule_rewrite(
    bullet: &BulletCandidate,
    backed: &[BackedTerm],
    ledger: &KeywordLedger,
    rules: &BulletRules,
) -> String {
    let words = bullet.word_count;
    if words > rules.max_words {
        shorten(&bullet.current_text, rules)
    } else if words < rules.min_words {
        lengthen(bullet, backed, ledger, rules)
    } else {
        bullet.current_text.clone()
    }
}

fn in_range(text: &str, rules: &BulletRules) -> bool {
    (rules.min_words..=rules.max_words).contains(&word_count(text))
}

#[derive(Debug, Deserialize)]
struct RewriteResponse {
    text: String,
}

/// Accepts a model rewrite only if it is one line, in range, within the keyword cap and
/// introduces no requirement term the profile cannot back.
fn validate_rewrite(
    bullet: &BulletCandidate,
    candidate: &str,
    backed: &[BackedTerm],
    ledger: &KeywordLedger,
    requirements: &RequirementSet,
    rules: &BulletRules,
) -> Option<String> {
    if candidate.contains('\n') {
        return None;
    }
    let text = tidy(candidate);
    if text.is_empty() || !in_range(&text, rules) || !ledger.fits(&bullet.current_text, &text) {
        return None;
    }
    let original = Normalized::new(&bullet.original_text);
    let rewritten = Normalized::new(&text);
    let grounded = requirements.terms().all(|term| {
        rewritten.strength(term) == 0.0
            || original.strength(term) > 0.0
            || backed.iter().any(|b| b.term == term)
    });
    grounded.then_some(text)
}

fn needs_rewrite(bullet: &BulletCandidate, rules: &BulletRules) -> bool {
    !in_range(&bullet.current_text, rules) || bullet.keyword_hits.is_empty()
}

async fn request_rewrite(
    bullet: &BulletCandidate,
    backed: &[BackedTerm],
    llm: &dyn LanguageModel,
    config: &PipelineConfig,
) -> Result<Option<String>, crate::llm_client::LlmError> {
    let rules = &config.bullet_rules;
    let mut keywords: Vec<&str> = bullet.keyword_hits.iter().map(String::as_str).collect();
    keywords.extend(
        backed
            .iter()
            .filter(|b| !bullet.keyword_hits.contains(&b.term))
            .map(|b| b.display.as_str()),
    );
    keywords.truncate(MAX_PROMPT_KEYWORDS);

    let request = LlmRequest {
        system_prompt: bullet_rewrite_system(),
        user_content: BULLET_REWRITE_PROMPT_TEMPLATE
            .replace("{min_words}", &rules.min_words.to_string())
            .replace("{max_words}", &rules.max_words.to_string())
            .replace("{context}", &bullet.context)
            .replace("{keywords}", &keywords.join(", "))
            .replace("{bullet}", &bullet.current_text),
        max_tokens: config.rewrite_max_tokens,
    };

    let completion = complete_with_retry(llm, &request, &config.llm_retry).await?;
    Ok(match completion.parse_json::<RewriteResponse>() {
        ModelOutput::Parsed(response) => Some(response.text),
        ModelOutput::Unparsed(_) => None,
    })
}

/// Refines every bullet in `content` in place at the given aggressiveness.
pub async fn refine(
    content: &mut AlignedContentSet,
    requirements: &RequirementSet,
    profile: &ProfileSnapshot,
    aggressiveness: Aggressiveness,
    llm: &dyn LanguageModel,
    config: &PipelineConfig,
) -> RefineReport {
    let mut report = RefineReport::default();
    if aggressiveness == Aggressiveness::None {
        return report;
    }

    let rules = config.bullet_rules;
    let backed = backed_terms(requirements, profile);
    let mut ledger = KeywordLedger::build(content, requirements, rules.max_keyword_repeats);
    let mut llm_available = aggressiveness == Aggressiveness::LlmAssisted;

    for bullet in content.bullets_mut() {
        let fallback = rule_rewrite(bullet, &backed, &ledger, &rules);
        let mut next = fallback.clone();
        let mut from_model = false;

        if llm_available && needs_rewrite(bullet, &rules) {
            match request_rewrite(bullet, &backed, llm, config).await {
                Ok(Some(raw)) => {
                    match validate_rewrite(bullet, &raw, &backed, &ledger, requirements, &rules) {
                        Some(text) => {
                            next = text;
                            from_model = true;
                            report.llm_accepted += 1;
                        }
                        None => {
                            debug!("Rejected model rewrite that failed validation");
                            report.llm_rejected += 1;
                        }
                    }
                }
                Ok(None) => report.llm_rejected += 1,
                Err(e) => {
                    warn!("Bullet rewrite call failed, continuing rule-only: {e}");
                    llm_available = false;
                    report.llm_unavailable = true;
                }
            }
        }

        if next != bullet.current_text {
            let previous = bullet.current_text.clone();
            ledger.replace(&previous, &next);
            bullet.set_text(&next, requirements);
            bullet.llm_rewritten |= from_model;
            report.rewritten += 1;
        }

        bullet.flag = if in_range(&bullet.current_text, &rules) {
            None
        } else {
            report.unresolved += 1;
            Some(BulletFlag::WordCountUnresolved)
        };
    }

    report.dropped = destuff(content, &mut ledger);
    if report.dropped > 0 {
        report.unresolved = content.bullets().filter(|b| b.flag.is_some()).count();
    }
    report
}

/// Drops the least relevant bullets carrying a term that is still over the cap.
fn destuff(content: &mut AlignedContentSet, ledger: &mut KeywordLedger) -> usize {
    let mut dropped = 0;
    for term in ledger.over_cap() {
        let mut index = content.len();
        while index > 0 && ledger.count(&term) > ledger.cap {
            index -= 1;
            let carries = content.items()[index]
                .bullet
                .as_ref()
                .map(|b| Normalized::new(&b.current_text).count_phrase(&term) > 0)
                .unwrap_or(false);
            if carries {
                let item = content.remove(index);
                if let Some(bullet) = item.bullet {
                    ledger.replace(&bullet.current_text, "");
                }
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        debug!(dropped, "Dropped bullets to respect the keyword repeat cap");
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::alignment::tests::{requirements, scenario_profile};
    use crate::generation::alignment::{AlignedItem, EntityRef};
    use crate::generation::requirements::RequirementCategory;
    use crate::llm_client::LlmError;
    use crate::models::profile::{Skill, SkillGroup};
    use crate::test_support::ScriptedModel;

    const FLASK_BULLET: &str = "Built REST APIs using Flask";

    fn reqs() -> RequirementSet {
        requirements(&[
            ("python", RequirementCategory::Skill, 0.9),
            ("postgresql", RequirementCategory::Skill, 0.8),
            ("kubernetes", RequirementCategory::Skill, 0.1),
            ("backend", RequirementCategory::Responsibility, 0.7),
        ])
    }

    fn profile() -> ProfileSnapshot {
        let mut profile = scenario_profile();
        profile.skills = vec![
            Skill {
                id: "s1".to_string(),
                name: "Python".to_string(),
                group: SkillGroup::Language,
            },
            Skill {
                id: "s2".to_string(),
                name: "PostgreSQL".to_string(),
                group: SkillGroup::Technical,
            },
        ];
        profile
    }

    fn bullet_item(id: &str, text: &str, relevance: f64, reqs: &RequirementSet) -> AlignedItem {
        AlignedItem {
            entity: EntityRef::ProjectBullet {
                project_id: "p1".to_string(),
                bullet_id: id.to_string(),
            },
            label: "Inventory Service".to_string(),
            support_text: String::new(),
            matched_terms: Vec::new(),
            relevance,
            bullet: Some(BulletCandidate::new(text, "for Inventory Service", reqs)),
        }
    }

    fn single(text: &str, reqs: &RequirementSet) -> AlignedContentSet {
        AlignedContentSet::new(vec![bullet_item("b1", text, 0.5, reqs)])
    }

    async fn run(
        content: &mut AlignedContentSet,
        reqs: &RequirementSet,
        aggressiveness: Aggressiveness,
        model: &ScriptedModel,
    ) -> RefineReport {
        refine(content, reqs, &profile(), aggressiveness, model, &PipelineConfig::default()).await
    }

    async fn rule_only(content: &mut AlignedContentSet, reqs: &RequirementSet) -> RefineReport {
        run(content, reqs, Aggressiveness::RuleOnly, &ScriptedModel::new(vec![])).await
    }

    fn only_bullet(content: &AlignedContentSet) -> &BulletCandidate {
        content.bullets().next().unwrap()
    }

    #[tokio::test]
    async fn test_long_bullet_shortened_at_clause_boundary() {
        let reqs = reqs();
        let text = "Designed and built a distributed inventory service in Rust, cutting query \
                    latency by forty percent across regions, and mentored two junior engineers \
                    on testing practices";
        let mut content = single(text, &reqs);
        let model = ScriptedModel::new(vec![]);

        run(&mut content, &reqs, Aggressiveness::RuleOnly, &model).await;

        let bullet = only_bullet(&content);
        assert_eq!(
            bullet.current_text,
            "Designed and built a distributed inventory service in Rust, cutting query latency \
             by forty percent across regions"
        );
        assert_eq!(bullet.word_count, 17);
        assert_eq!(bullet.original_text, text);
        assert!(bullet.flag.is_none());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_unpunctuated_long_bullet_truncated_without_dangling_stop_word() {
        let reqs = reqs();
        let text = "Implemented the caching layer for the service and the scheduler and the queue \
                    and the parser and the lexer and the planner of the engine";
        let mut content = single(text, &reqs);

        rule_only(&mut content, &reqs).await;

        let bullet = only_bullet(&content);
        assert!(bullet.word_count <= 20 && bullet.word_count >= 12);
        assert!(bullet.current_text.ends_with("lexer"));
    }

    #[tokio::test]
    async fn test_short_bullet_lengthened_with_backed_terms_and_context() {
        let reqs = reqs();
        let mut content = single(FLASK_BULLET, &reqs);

        let report = rule_only(&mut content, &reqs).await;

        let bullet = only_bullet(&content);
        assert_eq!(
            bullet.current_text,
            "Built REST APIs using Flask with Python and PostgreSQL for Inventory Service"
        );
        assert_eq!(bullet.word_count, 12);
        assert!(bullet.keyword_hits.contains("python"));
        assert!(!bullet.keyword_hits.contains("kubernetes"));
        assert!(bullet.flag.is_none());
        assert_eq!(report.rewritten, 1);
    }

    #[tokio::test]
    async fn test_unfixable_short_bullet_is_flagged() {
        let reqs = requirements(&[("kubernetes", RequirementCategory::Skill, 1.0)]);
        let mut content = single("Fixed bugs", &reqs);

        let report = rule_only(&mut content, &reqs).await;

        let bullet = only_bullet(&content);
        assert_eq!(bullet.current_text, "Fixed bugs for Inventory Service");
        assert_eq!(bullet.flag, Some(BulletFlag::WordCountUnresolved));
        assert_eq!(report.unresolved, 1);
    }

    #[tokio::test]
    async fn test_keyword_cap_enforced_by_dropping_least_relevant() {
        let reqs = requirements(&[("python", RequirementCategory::Skill, 1.0)]);
        let text = "Wrote Python scripts that automate nightly report generation for the finance \
                    operations team every week";
        let items = [0.9, 0.8, 0.7, 0.6, 0.5]
            .iter()
            .enumerate()
            .map(|(i, r)| bullet_item(&format!("b{i}"), text, *r, &reqs))
            .collect();
        let mut content = AlignedContentSet::new(items);

        let report = rule_only(&mut content, &reqs).await;

        assert_eq!(report.dropped, 2);
        assert_eq!(content.len(), 3);
        assert_eq!(keyword_counts(&content, &reqs)["python"], 3);
        assert!(content.items().iter().all(|i| i.relevance >= 0.7));
    }

    #[tokio::test]
    async fn test_insertion_skips_terms_at_cap() {
        let reqs = reqs();
        let full = "Tuned Python workers and Python jobs and Python schedulers for the nightly batch";
        let mut content = AlignedContentSet::new(vec![
            bullet_item("b0", full, 0.9, &reqs),
            bullet_item("b1", FLASK_BULLET, 0.5, &reqs),
        ]);

        rule_only(&mut content, &reqs).await;

        let counts = keyword_counts(&content, &reqs);
        assert!(counts.values().all(|n| *n <= 3));
        let short = &content.items()[1].bullet.as_ref().unwrap().current_text;
        assert!(!short.contains("Python"));
        assert!(short.contains("PostgreSQL"));
    }

    #[tokio::test]
    async fn test_none_aggressiveness_changes_nothing() {
        let reqs = reqs();
        let mut content = single(FLASK_BULLET, &reqs);
        let before = content.clone();

        let report = run(&mut content, &reqs, Aggressiveness::None, &ScriptedModel::new(vec![]))
            .await;

        assert_eq!(content, before);
        assert_eq!(report, RefineReport::default());
    }

    #[tokio::test]
    async fn test_valid_model_rewrite_accepted() {
        let reqs = reqs();
        let mut content = single(FLASK_BULLET, &reqs);
        let model = ScriptedModel::new(vec![Ok(r#"{"text": "Built and documented REST APIs using Flask and Python for the Inventory Service order workflows"}"#.to_string())]);

        let report = run(&mut content, &reqs, Aggressiveness::LlmAssisted, &model).await;

        let bullet = only_bullet(&content);
        assert!(bullet.llm_rewritten);
        assert_eq!(bullet.word_count, 15);
        assert_eq!(report.llm_accepted, 1);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_overlong_model_rewrite_rejected_for_rule_output() {
        let reqs = reqs();
        let mut content = single(FLASK_BULLET, &reqs);
        let long = "word ".repeat(25);
        let model = ScriptedModel::new(vec![Ok(format!(r#"{{"text": "{}"}}"#, long.trim()))]);

        let report = run(&mut content, &reqs, Aggressiveness::LlmAssisted, &model).await;

        let bullet = only_bullet(&content);
        assert!(!bullet.llm_rewritten);
        assert_eq!(
            bullet.current_text,
            "Built REST APIs using Flask with Python and PostgreSQL for Inventory Service"
        );
        assert_eq!(report.llm_rejected, 1);
    }

    #[tokio::test]
    async fn test_model_rewrite_with_unbacked_term_rejected() {
        let reqs = reqs();
        let mut content = single(FLASK_BULLET, &reqs);
        let model = ScriptedModel::new(vec![Ok(r#"{"text": "Built REST APIs using Flask and deployed them on Kubernetes clusters for the Inventory Service"}"#.to_string())]);

        let report = run(&mut content, &reqs, Aggressiveness::LlmAssisted, &model).await;

        let bullet = only_bullet(&content);
        assert!(!bullet.current_text.contains("Kubernetes"));
        assert_eq!(report.llm_rejected, 1);
    }

    #[tokio::test]
    async fn test_model_failure_degrades_to_rule_only() {
        let reqs = reqs();
        let mut content = AlignedContentSet::new(vec![
            bullet_item("b0", FLASK_BULLET, 0.9, &reqs),
            bullet_item("b1", "Fixed bugs", 0.5, &reqs),
        ]);
        let model = ScriptedModel::new(vec![Err(LlmError::Api {
            status: 400,
            message: "bad request".to_string(),
        })]);

        let report = run(&mut content, &reqs, Aggressiveness::LlmAssisted, &model).await;

        assert!(report.llm_unavailable);
        assert_eq!(model.calls(), 1);
        assert_eq!(
            content.items()[0].bullet.as_ref().unwrap().current_text,
            "Built REST APIs using Flask with Python and PostgreSQL for Inventory Service"
        );
    }

    #[tokio::test]
    async fn test_rewrite_request_uses_configured_budget() {
        let reqs = reqs();
        let mut content = single(FLASK_BULLET, &reqs);
        let model = ScriptedModel::new(vec![Ok(r#"{"text": "too short"}"#.to_string())]);
        let config = PipelineConfig {
            rewrite_max_tokens: 123,
            ..PipelineConfig::default()
        };

        refine(&mut content, &reqs, &profile(), Aggressiveness::LlmAssisted, &model, &config).await;

        assert_eq!(model.max_tokens_seen(), vec![123]);
    }

    #[test]
    fn test_join_terms() {
        assert_eq!(join_terms(&["Python"]), "Python");
        assert_eq!(join_terms(&["Python", "Go"]), "Python and Go");
        assert_eq!(join_terms(&["A", "B", "C"]), "A, B and C");
    }
}

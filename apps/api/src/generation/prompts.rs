// Prompt constants for the generation pipeline.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM};

/// System prompt for requirement extraction.
pub fn extraction_system() -> String {
    format!(
        "You are an expert technical recruiter who reads job descriptions the way an \
        applicant tracking system does. {JSON_ONLY_SYSTEM}"
    )
}

/// Requirement extraction prompt. Replace `{max_terms}` and `{jd_text}` before sending.
pub const EXTRACTION_PROMPT_TEMPLATE: &str = r#"Extract the requirements an applicant tracking system would screen for in the job description below.

Return a JSON object with this EXACT schema (no extra fields):
{
  "requirements": [
    {"term": "python", "category": "skill", "weight": 0.9}
  ]
}

Rules:
- "category" is one of "skill", "qualification", "responsibility".
- skill: a concrete technology, language, framework, tool, or method ("postgresql", "rest api", "docker").
- qualification: a degree, certification, or experience level ("bachelor degree", "3+ years").
- responsibility: a duty the hire performs, as a short noun phrase ("api design", "code review").
- "term" is 1 to 3 words, lowercase, as it would appear on a resume. No sentences.
- "weight" is in (0, 1]: how central the term is to the role. Required items weigh more than nice-to-haves.
- At most {max_terms} terms. Never repeat a term.
- Do not include company names, benefits, locations, or generic words like "team" or "experience".

Job description:
---
{jd_text}
---"#;

/// System prompt for a single bullet rewrite.
pub fn bullet_rewrite_system() -> String {
    format!(
        "You are an expert resume writer who rewrites single bullet points for applicant \
        tracking systems. {GROUNDING_INSTRUCTION} {JSON_ONLY_SYSTEM}"
    )
}

/// Bullet rewrite prompt. Replace `{min_words}`, `{max_words}`, `{context}`,
/// `{keywords}` and `{bullet}` before sending.
pub const BULLET_REWRITE_PROMPT_TEMPLATE: &str = r#"Rewrite this resume bullet point.

Return a JSON object with this EXACT schema:
{"text": "the rewritten bullet"}

Rules:
- Between {min_words} and {max_words} words.
- Start with a strong past-tense action verb.
- Work in these target keywords only where the facts support them: {keywords}
- Use each keyword at most once.
- No first person, no trailing period, no markdown.

Context: {context}

Bullet:
{bullet}"#;

/// System prompt for the professional summary.
pub fn summary_system() -> String {
    format!(
        "You are an expert resume writer who writes short professional summaries that \
        applicant tracking systems rank well. {GROUNDING_INSTRUCTION} {JSON_ONLY_SYSTEM}"
    )
}

/// Summary prompt. Replace `{min_words}`, `{max_words}`, `{keywords}` and `{facts}`
/// before sending.
pub const SUMMARY_PROMPT_TEMPLATE: &str = r#"Write the professional summary that opens this candidate's CV.

Return a JSON object with this EXACT schema:
{"summary": "the summary paragraph"}

Rules:
- Between {min_words} and {max_words} words, one paragraph.
- No first person pronouns, no markdown, no line breaks.
- Work in these target keywords only where the facts below support them: {keywords}
- Use each keyword at most once.
- Mention only skills, projects and roles that appear in the facts.

Facts:
{facts}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_carry_every_placeholder() {
        for placeholder in ["{max_terms}", "{jd_text}"] {
            assert!(EXTRACTION_PROMPT_TEMPLATE.contains(placeholder));
        }
        for placeholder in ["{min_words}", "{max_words}", "{context}", "{keywords}", "{bullet}"] {
            assert!(BULLET_REWRITE_PROMPT_TEMPLATE.contains(placeholder));
        }
        for placeholder in ["{min_words}", "{max_words}", "{keywords}", "{facts}"] {
            assert!(SUMMARY_PROMPT_TEMPLATE.contains(placeholder));
        }
    }

    #[test]
    fn test_system_prompts_demand_json() {
        assert!(extraction_system().contains("valid JSON only"));
        assert!(bullet_rewrite_system().contains("Do NOT invent"));
        assert!(summary_system().contains("Do NOT invent"));
    }
}

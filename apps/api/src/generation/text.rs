//! Text normalisation shared by extraction, alignment, refinement, and scoring.
//!
//! All matching happens on normalised token sequences: lowercase, split on whitespace
//! and `- _ /`, trailing dots trimmed. A term such as "Rest-API" normalises to
//! "rest api" and is matched as a token window, never as a raw byte substring,
//! except for the explicit 0.6 substring tier.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Match strength tiers.
pub const EXACT_MATCH: f64 = 1.0;
pub const VARIANT_MATCH: f64 = 0.8;
pub const SUBSTRING_MATCH: f64 = 0.6;

pub const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
    "used", "it", "its", "this", "that", "these", "those", "i", "you", "he", "she", "we",
    "they", "what", "which", "who", "whom", "when", "where", "why", "how", "all", "each",
    "every", "both", "few", "more", "most", "other", "some", "such", "no", "nor", "not",
    "only", "own", "same", "so", "than", "too", "very", "just", "also", "now", "here",
    "there", "then", "once", "if", "else", "because", "while", "although", "though",
    "after", "before", "above", "below", "between", "into", "through", "during", "out",
    "about", "against", "among", "any", "etc", "our", "your", "their", "his", "her", "up",
    "down", "over", "under", "again", "further", "am", "being", "able", "us", "using",
];

/// Job-ad boilerplate that carries no requirement signal.
pub const FILLER_WORDS: &[&str] = &[
    "seeking", "looking", "experience", "experienced", "candidate", "candidates", "role",
    "position", "team", "teams", "work", "working", "join", "strong", "ability", "including",
    "ideal", "plus", "preferred", "required", "requirements", "responsibilities", "skills",
    "knowledge", "understanding", "familiarity", "years", "year", "opportunity", "company",
    "excellent", "good", "great", "new", "well", "like", "within", "across", "help",
    "hiring", "want", "based", "day", "environment",
];

/// Technology synonym groups. Every member of a group is a variant of the others.
pub const SYNONYM_GROUPS: &[&[&str]] = &[
    &["react", "reactjs", "react.js"],
    &["node", "nodejs", "node.js"],
    &["javascript", "js", "es6", "ecmascript"],
    &["typescript", "ts"],
    &["python", "python3"],
    &["mongodb", "mongo"],
    &["postgresql", "postgres", "psql"],
    &["aws", "amazon web services"],
    &["gcp", "google cloud", "google cloud platform"],
    &["azure", "microsoft azure"],
    &["kubernetes", "k8s"],
    &["machine learning", "ml"],
    &["artificial intelligence", "ai"],
    &["natural language processing", "nlp"],
    &["ci cd", "cicd", "continuous integration"],
    &["rest", "restful", "rest api", "restful api"],
    &["api", "apis"],
    &["html", "html5"],
    &["css", "css3"],
    &["git", "github", "gitlab"],
    &["agile", "scrum", "kanban"],
    &["express", "expressjs", "express.js"],
    &["vue", "vuejs", "vue.js"],
    &["angular", "angularjs"],
    &["next", "nextjs", "next.js"],
    &["elasticsearch", "elastic search"],
    &["graphql", "graph ql"],
    &["pytorch", "torch"],
    &["c++", "cpp"],
    &["c#", "csharp"],
    &[".net", "dotnet"],
    &["golang", "go"],
];

/// Technologies the rule-based extractor treats as skills. Synonym-group members are
/// included implicitly.
pub const TECH_LEXICON: &[&str] = &[
    "java", "rust", "ruby", "php", "scala", "kotlin", "swift", "sql", "nosql", "mysql",
    "sqlite", "redis", "kafka", "rabbitmq", "docker", "terraform", "ansible", "linux",
    "django", "flask", "fastapi", "spring", "rails", "laravel", "tensorflow", "pandas",
    "numpy", "spark", "hadoop", "airflow", "snowflake", "tableau", "figma", "jenkins",
    "microservices", "backend", "frontend", "full stack", "fullstack", "devops", "cloud",
    "serverless", "distributed systems", "data structures", "algorithms", "deep learning",
    "computer vision", "data analysis", "unit testing", "tdd", "oauth", "grpc", "websockets",
    "bash", "power bi", "excel", "selenium", "cypress", "jest", "nginx", "opencv",
];

/// Words that mark a qualification requirement.
pub const QUALIFICATION_WORDS: &[&str] = &[
    "bachelor", "bachelors", "master", "masters", "phd", "doctorate", "degree", "diploma",
    "certification", "certified", "certificate", "b.tech", "m.tech", "bsc", "msc", "mba",
];

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"[a-z0-9+#.]+").expect("valid token regex"))
}

/// Splits text into normalised tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_regex()
        .find_iter(&lowered)
        .filter_map(|m| {
            let token = m.as_str().trim_end_matches('.');
            let token = if token.starts_with('.') && !token.starts_with(".net") {
                token.trim_start_matches('.')
            } else {
                token
            };
            (!token.is_empty()).then(|| token.to_string())
        })
        .collect()
}

/// Canonical form of a term: normalised tokens joined by single spaces.
pub fn normalize_term(term: &str) -> String {
    tokenize(term).join(" ")
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

pub fn is_filler(token: &str) -> bool {
    FILLER_WORDS.contains(&token)
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Every known spelling of `term` (normalised), excluding the term itself.
pub fn variants(term: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for group in SYNONYM_GROUPS {
        let members: Vec<String> = group.iter().map(|m| normalize_term(m)).collect();
        if members.iter().any(|m| m == term) {
            out.extend(members.into_iter().filter(|m| m != term));
        }
    }
    out
}

pub fn is_known_technology(term: &str) -> bool {
    TECH_LEXICON.iter().any(|t| normalize_term(t) == term)
        || SYNONYM_GROUPS
            .iter()
            .any(|g| g.iter().any(|m| normalize_term(m) == term))
}

/// A text prepared for repeated matching.
#[derive(Debug, Clone)]
pub struct Normalized {
    tokens: Vec<String>,
    joined: String,
}

impl Normalized {
    pub fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        let joined = tokens.join(" ");
        Self { tokens, joined }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of non-overlapping occurrences of the token sequence of `term`.
    pub fn count_phrase(&self, term: &str) -> usize {
        let needle: Vec<&str> = term.split(' ').filter(|s| !s.is_empty()).collect();
        if needle.is_empty() || needle.len() > self.tokens.len() {
            return 0;
        }
        let mut count = 0;
        let mut i = 0;
        while i + needle.len() <= self.tokens.len() {
            if self.tokens[i..i + needle.len()]
                .iter()
                .zip(&needle)
                .all(|(a, b)| a == b)
            {
                count += 1;
                i += needle.len();
            } else {
                i += 1;
            }
        }
        count
    }

    pub fn contains_phrase(&self, term: &str) -> bool {
        self.count_phrase(term) > 0
    }

    /// How strongly a normalised requirement term is present in this text.
    pub fn strength(&self, term: &str) -> f64 {
        if term.is_empty() || self.is_empty() {
            return 0.0;
        }
        if self.contains_phrase(term) {
            return EXACT_MATCH;
        }
        if variants(term).iter().any(|v| self.contains_phrase(v)) {
            return VARIANT_MATCH;
        }
        if term.len() > 2 && self.joined.contains(term) {
            return SUBSTRING_MATCH;
        }
        0.0
    }
}

/// Content tokens of a text: stop words and fillers removed.
pub fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.len() > 1 && !is_stop_word(t) && !is_filler(t))
        .collect()
}

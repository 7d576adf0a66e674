//! Requirement terms extracted from a job description.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::generation::text::normalize_term;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementCategory {
    Skill,
    Qualification,
    Responsibility,
}

/// A single weighted requirement. `term` is always normalised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub term: String,
    pub category: RequirementCategory,
    /// In (0, 1]. Weights of one category sum to 1.
    pub weight: f64,
}

/// Unnormalised candidate as produced by either extraction path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequirementCandidate {
    pub term: String,
    pub category: RequirementCategory,
    pub weight: f64,
}

/// Ordered, duplicate-free requirement terms for one pipeline run.
///
/// Invariants (enforced by `from_candidates`, the only constructor):
/// - terms are unique after case/whitespace normalisation
/// - every weight is > 0 and ≤ 1
/// - per-category weights sum to 1, so the total is within [0, N] for N categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementSet {
    requirements: Vec<Requirement>,
    /// True when the rule-based fallback produced this set.
    pub degraded: bool,
}

impl RequirementSet {
    /// Normalises, deduplicates, and weight-normalises raw candidates.
    ///
    /// Duplicate terms keep the first occurrence's category and position and
    /// accumulate weight. Candidates with empty terms or non-positive/non-finite
    /// weights are dropped. At most `max_terms` terms survive, highest raw weight first
    /// with ties kept in input order.
    pub fn from_candidates(
        candidates: Vec<RequirementCandidate>,
        max_terms: usize,
        degraded: bool,
    ) -> Self {
        let mut merged: Vec<Requirement> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for candidate in candidates {
            let term = normalize_term(&candidate.term);
            if term.is_empty() || !candidate.weight.is_finite() || candidate.weight <= 0.0 {
                continue;
            }
            match index.get(&term) {
                Some(&i) => merged[i].weight += candidate.weight,
                None => {
                    index.insert(term.clone(), merged.len());
                    merged.push(Requirement {
                        term,
                        category: candidate.category,
                        weight: candidate.weight,
                    });
                }
            }
        }

        if merged.len() > max_terms {
            let mut ranked: Vec<(usize, f64)> =
                merged.iter().map(|r| r.weight).enumerate().collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            let mut keep: Vec<usize> = ranked.into_iter().take(max_terms).map(|(i, _)| i).collect();
            keep.sort_unstable();
            merged = keep.into_iter().map(|i| merged[i].clone()).collect();
        }

        let mut totals: HashMap<RequirementCategory, f64> = HashMap::new();
        for r in &merged {
            *totals.entry(r.category).or_insert(0.0) += r.weight;
        }
        for r in &mut merged {
            let total = totals.get(&r.category).copied().unwrap_or(1.0);
            r.weight = (r.weight / total).clamp(f64::MIN_POSITIVE, 1.0);
        }

        Self {
            requirements: merged,
            degraded,
        }
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.requirements.iter().map(|r| r.term.as_str())
    }

    pub fn max_weight(&self) -> f64 {
        self.requirements
            .iter()
            .map(|r| r.weight)
            .fold(0.0, f64::max)
    }

    /// Requirements ordered by descending weight, ties in set order.
    pub fn by_weight(&self) -> Vec<&Requirement> {
        let mut sorted: Vec<&Requirement> = self.requirements.iter().collect();
        sorted.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        sorted
    }
}

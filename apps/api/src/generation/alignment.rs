//! Alignment Engine: matches profile entities against the requirement set.
//!
//! Pure and deterministic: identical inputs produce identical ordering and scores.
//! relevance = 0.6 × keyword component + 0.4 × semantic component, both in [0, 1].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::generation::requirements::RequirementSet;
use crate::generation::summary::Summary;
use crate::generation::text::{content_tokens, variants, word_count, Normalized, VARIANT_MATCH};
use crate::models::profile::ProfileSnapshot;

pub const KEYWORD_SHARE: f64 = 0.6;
pub const SEMANTIC_SHARE: f64 = 0.4;

/// Stable pointer back into the `ProfileSnapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRef {
    Skill { skill_id: String },
    ProjectBullet { project_id: String, bullet_id: String },
    InternshipBullet { internship_id: String, bullet_id: String },
    Certification { certification_id: String },
    Achievement { achievement_id: String },
}

/// Marks a bullet whose length could not be brought into range without inventing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletFlag {
    WordCountUnresolved,
}

/// A refinable piece of bullet text. `original_text` never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletCandidate {
    pub original_text: String,
    pub current_text: String,
    pub word_count: usize,
    pub keyword_hits: BTreeSet<String>,
    /// Phrase naming where the work happened ("for Inventory Service", "as Intern at Acme").
    pub context: String,
    pub flag: Option<BulletFlag>,
    pub llm_rewritten: bool,
}

impl BulletCandidate {
    pub fn new(text: &str, context: &str, requirements: &RequirementSet) -> Self {
        let mut bullet = Self {
            original_text: text.to_string(),
            current_text: String::new(),
            word_count: 0,
            keyword_hits: BTreeSet::new(),
            context: context.to_string(),
            flag: None,
            llm_rewritten: false,
        };
        bullet.set_text(text.trim(), requirements);
        bullet
    }

    /// Replaces `current_text` and recomputes the derived fields.
    pub fn set_text(&mut self, text: &str, requirements: &RequirementSet) {
        self.current_text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        self.word_count = word_count(&self.current_text);
        let normalized = Normalized::new(&self.current_text);
        self.keyword_hits = requirements
            .terms()
            .filter(|t| normalized.strength(t) > 0.0)
            .map(str::to_string)
            .collect();
    }
}

/// One profile entity that survived the relevance floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedItem {
    pub entity: EntityRef,
    /// Display text for non-bullet items; the owning project/role for bullets.
    pub label: String,
    /// Text that counts for matching but is not refined (a project's tech stack).
    #[serde(default)]
    pub support_text: String,
    pub matched_terms: Vec<String>,
    /// In (0, 1].
    pub relevance: f64,
    pub bullet: Option<BulletCandidate>,
}

impl AlignedItem {
    /// Everything this item contributes to the rendered document.
    pub fn content_text(&self) -> String {
        let body = match &self.bullet {
            Some(bullet) => bullet.current_text.as_str(),
            None => self.label.as_str(),
        };
        if self.support_text.is_empty() {
            body.to_string()
        } else {
            format!("{body} {}", self.support_text)
        }
    }
}

/// Aligned items ordered by descending relevance, ties in profile order.
/// The summary is written once the items are final and is not part of scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignedContentSet {
    items: Vec<AlignedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<Summary>,
}

impl AlignedContentSet {
    /// Drops zero-relevance items and orders the rest by descending relevance.
    /// The sort is stable, so ties keep their input order.
    pub fn new(items: Vec<AlignedItem>) -> Self {
        let mut items: Vec<AlignedItem> = items
            .into_iter()
            .filter(|i| i.relevance > 0.0 && i.relevance.is_finite())
            .collect();
        items.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        Self {
            items,
            summary: None,
        }
    }

    pub fn items(&self) -> &[AlignedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn bullets(&self) -> impl Iterator<Item = &BulletCandidate> {
        self.items.iter().filter_map(|i| i.bullet.as_ref())
    }

    pub fn bullets_mut(&mut self) -> impl Iterator<Item = &mut BulletCandidate> {
        self.items.iter_mut().filter_map(|i| i.bullet.as_mut())
    }

    /// Mean relevance, 0 when empty.
    pub fn mean_relevance(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.items.iter().map(|i| i.relevance).sum::<f64>() / self.items.len() as f64
    }

    /// Concatenated content of every item, used for keyword coverage.
    pub fn content_text(&self) -> String {
        self.items
            .iter()
            .map(AlignedItem::content_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drops the item at `index`. Order of the rest is preserved.
    pub fn remove(&mut self, index: usize) -> AlignedItem {
        self.items.remove(index)
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    pub fn set_summary(&mut self, summary: Option<Summary>) {
        self.summary = summary;
    }

    #[cfg(test)]
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.items.iter().any(|i| &i.entity == entity)
    }
}

struct Entity {
    entity: EntityRef,
    label: String,
    support_text: String,
    bullet_text: Option<String>,
    context: String,
}

impl Entity {
    fn match_text(&self) -> String {
        let body = self.bullet_text.as_deref().unwrap_or(&self.label);
        format!("{body} {}", self.support_text)
    }
}

/// Every alignable entity of the profile, in profile order.
fn collect_entities(profile: &ProfileSnapshot) -> Vec<Entity> {
    let mut out = Vec::new();

    for skill in &profile.skills {
        out.push(Entity {
            entity: EntityRef::Skill {
                skill_id: skill.id.clone(),
            },
            label: skill.name.clone(),
            support_text: String::new(),
            bullet_text: None,
            context: String::new(),
        });
    }
    for project in &profile.projects {
        for bullet in &project.bullets {
            out.push(Entity {
                entity: EntityRef::ProjectBullet {
                    project_id: project.id.clone(),
                    bullet_id: bullet.id.clone(),
                },
                label: project.name.clone(),
                support_text: project.tech_stack.join(", "),
                bullet_text: Some(bullet.text.clone()),
                context: format!("for {}", project.name),
            });
        }
    }
    for internship in &profile.internships {
        for bullet in &internship.bullets {
            out.push(Entity {
                entity: EntityRef::InternshipBullet {
                    internship_id: internship.id.clone(),
                    bullet_id: bullet.id.clone(),
                },
                label: format!("{} at {}", internship.title, internship.company),
                support_text: String::new(),
                bullet_text: Some(bullet.text.clone()),
                context: format!("as {} at {}", internship.title, internship.company),
            });
        }
    }
    for cert in &profile.certifications {
        let mut label = cert.name.clone();
        if !cert.issuer.is_empty() {
            label = format!("{label}, {}", cert.issuer);
        }
        out.push(Entity {
            entity: EntityRef::Certification {
                certification_id: cert.id.clone(),
            },
            label,
            support_text: cert
                .bullets
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            bullet_text: None,
            context: String::new(),
        });
    }
    for achievement in &profile.achievements {
        out.push(Entity {
            entity: EntityRef::Achievement {
                achievement_id: achievement.id.clone(),
            },
            label: achievement.text.clone(),
            support_text: String::new(),
            bullet_text: None,
            context: String::new(),
        });
    }
    out
}

/// Token bag of the requirement set: each term's tokens at its weight, synonym-variant
/// tokens at `VARIANT_MATCH` of it.
fn requirement_vector(requirements: &RequirementSet) -> BTreeMap<String, f64> {
    let mut bag = BTreeMap::new();
    for req in requirements.requirements() {
        for token in content_tokens(&req.term) {
            *bag.entry(token).or_insert(0.0) += req.weight;
        }
        for variant in variants(&req.term) {
            for token in content_tokens(&variant) {
                *bag.entry(token).or_insert(0.0) += req.weight * VARIANT_MATCH;
            }
        }
    }
    bag
}

fn term_vector(text: &str) -> BTreeMap<String, f64> {
    let mut bag = BTreeMap::new();
    for token in content_tokens(text) {
        *bag.entry(token).or_insert(0.0) += 1.0;
    }
    bag
}

fn cosine(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let norm_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Keyword component: noisy-or over matched terms, each contributing
/// strength × weight / max weight. Returns the component and the matched terms.
fn keyword_component(text: &Normalized, requirements: &RequirementSet) -> (f64, Vec<String>) {
    let max_weight = requirements.max_weight();
    if max_weight <= 0.0 {
        return (0.0, Vec::new());
    }
    let mut miss = 1.0;
    let mut matched = Vec::new();
    for req in requirements.requirements() {
        let strength = text.strength(&req.term);
        if strength > 0.0 {
            miss *= 1.0 - strength * (req.weight / max_weight);
            matched.push(req.term.clone());
        }
    }
    ((1.0 - miss).clamp(0.0, 1.0), matched)
}

/// Aligns `profile` against `requirements`, keeping items with relevance ≥ `floor`
/// (and always > 0).
pub fn align(
    requirements: &RequirementSet,
    profile: &ProfileSnapshot,
    floor: f64,
) -> AlignedContentSet {
    let requirement_bag = requirement_vector(requirements);

    let items: Vec<AlignedItem> = collect_entities(profile)
        .into_iter()
        .filter_map(|entity| {
            let text = entity.match_text();
            let normalized = Normalized::new(&text);
            let (keyword, matched_terms) = keyword_component(&normalized, requirements);
            let semantic = cosine(&term_vector(&text), &requirement_bag);
            let relevance = (KEYWORD_SHARE * keyword + SEMANTIC_SHARE * semantic).clamp(0.0, 1.0);

            if relevance <= 0.0 || relevance < floor {
                return None;
            }

            let bullet = entity
                .bullet_text
                .as_deref()
                .map(|b| BulletCandidate::new(b, &entity.context, requirements));

            Some(AlignedItem {
                entity: entity.entity,
                label: entity.label,
                support_text: entity.support_text,
                matched_terms,
                relevance,
                bullet,
            })
        })
        .collect();

    AlignedContentSet::new(items)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::generation::requirements::{RequirementCandidate, RequirementCategory};
    use crate::models::profile::{
        Achievement, Internship, PersonalDetails, ProfileBullet, Project, Skill, SkillGroup,
    };

    pub(crate) fn requirements(terms: &[(&str, RequirementCategory, f64)]) -> RequirementSet {
        RequirementSet::from_candidates(
            terms
                .iter()
                .map(|(t, c, w)| RequirementCandidate {
                    term: t.to_string(),
                    category: *c,
                    weight: *w,
                })
                .collect(),
            30,
            false,
        )
    }

    pub(crate) fn scenario_requirements() -> RequirementSet {
        requirements(&[
            ("python", RequirementCategory::Skill, 0.9),
            ("postgresql", RequirementCategory::Skill, 0.8),
            ("backend", RequirementCategory::Responsibility, 0.7),
            ("rest api", RequirementCategory::Skill, 0.5),
        ])
    }

    pub(crate) fn scenario_profile() -> ProfileSnapshot {
        ProfileSnapshot {
            user_id: "u-1".to_string(),
            personal_details: PersonalDetails {
                full_name: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                ..PersonalDetails::default()
            },
            education: Vec::new(),
            skills: vec![
                Skill {
                    id: "s1".to_string(),
                    name: "Python".to_string(),
                    group: SkillGroup::Language,
                },
                Skill {
                    id: "s2".to_string(),
                    name: "Photoshop".to_string(),
                    group: SkillGroup::Tool,
                },
            ],
            projects: vec![Project {
                id: "p1".to_string(),
                name: "Inventory Service".to_string(),
                link: String::new(),
                tech_stack: vec!["Flask".to_string()],
                bullets: vec![ProfileBullet {
                    id: "b1".to_string(),
                    text: "Built REST APIs using Flask".to_string(),
                }],
            }],
            internships: vec![Internship {
                id: "i1".to_string(),
                title: "Intern".to_string(),
                company: "Acme".to_string(),
                bullets: vec![ProfileBullet {
                    id: "b2".to_string(),
                    text: "Organised the office holiday party".to_string(),
                }],
            }],
            certifications: Vec::new(),
            achievements: vec![Achievement {
                id: "a1".to_string(),
                text: "Won a regional chess tournament".to_string(),
            }],
        }
    }

    #[test]
    fn test_flask_bullet_aligned_with_partial_match() {
        let set = align(&scenario_requirements(), &scenario_profile(), 0.1);

        let flask = set
            .items()
            .iter()
            .find(|i| {
                i.entity
                    == EntityRef::ProjectBullet {
                        project_id: "p1".to_string(),
                        bullet_id: "b1".to_string(),
                    }
            })
            .expect("flask bullet aligned");
        assert!(flask.relevance > 0.1 && flask.relevance < 1.0);
        assert_eq!(flask.matched_terms, vec!["rest api"]);
        let bullet = flask.bullet.as_ref().unwrap();
        assert_eq!(bullet.word_count, 5);
        assert!(bullet.keyword_hits.contains("rest api"));
    }

    #[test]
    fn test_unrelated_entities_excluded() {
        let set = align(&scenario_requirements(), &scenario_profile(), 0.1);
        assert!(!set.contains(&EntityRef::Skill {
            skill_id: "s2".to_string()
        }));
        assert!(!set.contains(&EntityRef::Achievement {
            achievement_id: "a1".to_string()
        }));
        assert!(set.items().iter().all(|i| i.relevance > 0.0 && i.relevance >= 0.1));
    }

    #[test]
    fn test_zero_floor_still_excludes_zero_relevance() {
        let set = align(&scenario_requirements(), &scenario_profile(), 0.0);
        assert!(set.items().iter().all(|i| i.relevance > 0.0));
        assert!(!set.contains(&EntityRef::Achievement {
            achievement_id: "a1".to_string()
        }));
    }

    #[test]
    fn test_order_descending_and_deterministic() {
        let reqs = scenario_requirements();
        let profile = scenario_profile();
        let first = align(&reqs, &profile, 0.0);
        let second = align(&reqs, &profile, 0.0);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert!(first
            .items()
            .windows(2)
            .all(|w| w[0].relevance >= w[1].relevance));
    }

    #[test]
    fn test_ties_keep_profile_order() {
        let reqs = requirements(&[("python", RequirementCategory::Skill, 1.0)]);
        let mut profile = scenario_profile();
        profile.skills = vec![
            Skill {
                id: "first".to_string(),
                name: "Python".to_string(),
                group: SkillGroup::Language,
            },
            Skill {
                id: "second".to_string(),
                name: "Python".to_string(),
                group: SkillGroup::Technical,
            },
        ];

        let set = align(&reqs, &profile, 0.1);
        let ids: Vec<&EntityRef> = set
            .items()
            .iter()
            .filter(|i| matches!(i.entity, EntityRef::Skill { .. }))
            .map(|i| &i.entity)
            .collect();
        assert_eq!(
            ids,
            vec![
                &EntityRef::Skill {
                    skill_id: "first".to_string()
                },
                &EntityRef::Skill {
                    skill_id: "second".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_no_overlap_yields_empty_set() {
        let reqs = requirements(&[("kubernetes", RequirementCategory::Skill, 1.0)]);
        let set = align(&reqs, &scenario_profile(), 0.1);
        assert!(set.is_empty());
        assert_eq!(set.mean_relevance(), 0.0);
    }

    #[test]
    fn test_exact_skill_scores_highest() {
        let set = align(&scenario_requirements(), &scenario_profile(), 0.1);
        assert_eq!(
            set.items()[0].entity,
            EntityRef::Skill {
                skill_id: "s1".to_string()
            }
        );
    }
}

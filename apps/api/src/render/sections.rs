//! Projects aligned content onto the ordered list of CV sections.
//!
//! Values here are raw text; escaping happens when the source is composed.

use serde::Serialize;

use crate::generation::alignment::{AlignedContentSet, EntityRef};
use crate::models::profile::{Education, ProfileSnapshot, SkillGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Contact,
    Summary,
    Education,
    Skills,
    Experience,
    Projects,
    Certifications,
    Achievements,
}

impl SectionKind {
    pub fn title(&self) -> &'static str {
        match self {
            SectionKind::Contact => "Contact",
            SectionKind::Summary => "Summary",
            SectionKind::Education => "Education",
            SectionKind::Skills => "Skills",
            SectionKind::Experience => "Experience",
            SectionKind::Projects => "Projects",
            SectionKind::Certifications => "Certifications",
            SectionKind::Achievements => "Achievements",
        }
    }
}

/// One block inside a section. Unused fields stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SectionEntry {
    pub heading: String,
    pub subheading: String,
    pub date: String,
    pub detail: String,
    pub links: Vec<String>,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedSection {
    pub kind: SectionKind,
    pub entries: Vec<SectionEntry>,
}

impl RenderedSection {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Higher ranks first. Checked most specific first, so "Master of Science" is a master's.
pub fn degree_rank(degree: &str) -> u8 {
    fn any_of(text: &str, needles: &[&str]) -> bool {
        needles.iter().any(|n| text.contains(n))
    }
    let d = degree.to_lowercase();
    if any_of(&d, &["phd", "ph.d", "doctorate", "doctor of"]) {
        100
    } else if any_of(&d, &["mtech", "m.tech", "mca", "mba", "msc", "m.sc", "master"]) {
        80
    } else if any_of(&d, &["btech", "b.tech", "bca", "bba", "bsc", "b.sc", "bachelor", "b.e", "b.s"]) {
        60
    } else if any_of(&d, &["diploma", "associate"]) {
        50
    } else if any_of(&d, &["xii", "12th", "senior secondary", "intermediate", "high school"]) {
        40
    } else if any_of(&d, &["10th", "secondary", "matriculation"]) {
        30
    } else {
        20
    }
}

fn education_entries(education: &[Education]) -> Vec<SectionEntry> {
    let mut ordered: Vec<&Education> = education.iter().collect();
    ordered.sort_by_key(|e| std::cmp::Reverse(degree_rank(&e.degree)));
    ordered
        .into_iter()
        .map(|e| SectionEntry {
            heading: e.institution.clone(),
            subheading: e.degree.clone(),
            date: e.session.clone(),
            detail: e.grade.clone(),
            ..SectionEntry::default()
        })
        .collect()
}

fn contact_entries(profile: &ProfileSnapshot) -> Vec<SectionEntry> {
    let p = &profile.personal_details;
    let reachable = !p.email.trim().is_empty() || !p.phone.trim().is_empty();
    if p.full_name.trim().is_empty() || !reachable {
        return Vec::new();
    }
    vec![SectionEntry {
        heading: p.full_name.clone(),
        items: [&p.email, &p.phone, &p.location]
            .into_iter()
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .collect(),
        links: [&p.linkedin, &p.github]
            .into_iter()
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .collect(),
        ..SectionEntry::default()
    }]
}

fn summary_entries(content: &AlignedContentSet) -> Vec<SectionEntry> {
    content
        .summary()
        .filter(|s| !s.text.trim().is_empty())
        .map(|s| SectionEntry {
            detail: s.text.clone(),
            ..SectionEntry::default()
        })
        .into_iter()
        .collect()
}

/// Only skills that survived alignment, in relevance order. When none did, the whole
/// profile list is shown so the section never disappears.
fn skill_entries(profile: &ProfileSnapshot, content: &AlignedContentSet) -> Vec<SectionEntry> {
    let mut ordered: Vec<usize> = content
        .items()
        .iter()
        .filter_map(|item| match &item.entity {
            EntityRef::Skill { skill_id } => profile.skills.iter().position(|s| &s.id == skill_id),
            _ => None,
        })
        .collect();
    if ordered.is_empty() {
        ordered = (0..profile.skills.len()).collect();
    }

    [
        (SkillGroup::Language, "Languages"),
        (SkillGroup::Technical, "Technical Skills"),
        (SkillGroup::Tool, "Developer Tools"),
    ]
    .into_iter()
    .filter_map(|(group, heading)| {
        let names: Vec<&str> = ordered
            .iter()
            .map(|&i| &profile.skills[i])
            .filter(|s| s.group == group && !s.name.trim().is_empty())
            .map(|s| s.name.as_str())
            .collect();
        (!names.is_empty()).then(|| SectionEntry {
            heading: heading.to_string(),
            detail: names.join(", "),
            ..SectionEntry::default()
        })
    })
    .collect()
}

/// Groups aligned bullets under their owner, owners in order of first appearance.
fn grouped_bullets<'a>(
    content: &'a AlignedContentSet,
    owner_of: impl Fn(&'a EntityRef) -> Option<&'a str>,
) -> Vec<(&'a str, Vec<&'a str>)> {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for item in content.items() {
        let (Some(owner), Some(bullet)) = (owner_of(&item.entity), item.bullet.as_ref()) else {
            continue;
        };
        match groups.iter_mut().find(|(o, _)| *o == owner) {
            Some((_, bullets)) => bullets.push(&bullet.current_text),
            None => groups.push((owner, vec![&bullet.current_text])),
        }
    }
    groups
}

fn experience_entries(profile: &ProfileSnapshot, content: &AlignedContentSet) -> Vec<SectionEntry> {
    grouped_bullets(content, |e| match e {
        EntityRef::InternshipBullet { internship_id, .. } => Some(internship_id.as_str()),
        _ => None,
    })
    .into_iter()
    .filter_map(|(id, bullets)| {
        let internship = profile.internship(id)?;
        Some(SectionEntry {
            heading: internship.company.clone(),
            subheading: internship.title.clone(),
            items: bullets.into_iter().map(str::to_string).collect(),
            ..SectionEntry::default()
        })
    })
    .collect()
}

fn project_entries(profile: &ProfileSnapshot, content: &AlignedContentSet) -> Vec<SectionEntry> {
    grouped_bullets(content, |e| match e {
        EntityRef::ProjectBullet { project_id, .. } => Some(project_id.as_str()),
        _ => None,
    })
    .into_iter()
    .filter_map(|(id, bullets)| {
        let project = profile.project(id)?;
        Some(SectionEntry {
            heading: project.name.clone(),
            detail: project.tech_stack.join(", "),
            links: if project.link.trim().is_empty() {
                Vec::new()
            } else {
                vec![project.link.clone()]
            },
            items: bullets.into_iter().map(str::to_string).collect(),
            ..SectionEntry::default()
        })
    })
    .collect()
}

fn certification_entries(
    profile: &ProfileSnapshot,
    content: &AlignedContentSet,
) -> Vec<SectionEntry> {
    content
        .items()
        .iter()
        .filter_map(|item| match &item.entity {
            EntityRef::Certification { certification_id } => profile
                .certifications
                .iter()
                .find(|c| &c.id == certification_id),
            _ => None,
        })
        .map(|c| SectionEntry {
            heading: c.name.clone(),
            subheading: c.issuer.clone(),
            items: c.bullets.iter().map(|b| b.text.clone()).collect(),
            ..SectionEntry::default()
        })
        .collect()
}

fn achievement_entries(profile: &ProfileSnapshot, content: &AlignedContentSet) -> Vec<SectionEntry> {
    let items: Vec<String> = content
        .items()
        .iter()
        .filter_map(|item| match &item.entity {
            EntityRef::Achievement { achievement_id } => profile
                .achievements
                .iter()
                .find(|a| &a.id == achievement_id)
                .map(|a| a.text.clone()),
            _ => None,
        })
        .collect();
    if items.is_empty() {
        Vec::new()
    } else {
        vec![SectionEntry {
            items,
            ..SectionEntry::default()
        }]
    }
}

/// Every CV section in document order. Sections with nothing to show have no entries.
pub fn plan_sections(profile: &ProfileSnapshot, content: &AlignedContentSet) -> Vec<RenderedSection> {
    vec![
        RenderedSection {
            kind: SectionKind::Contact,
            entries: contact_entries(profile),
        },
        RenderedSection {
            kind: SectionKind::Summary,
            entries: summary_entries(content),
        },
        RenderedSection {
            kind: SectionKind::Education,
            entries: education_entries(&profile.education),
        },
        RenderedSection {
            kind: SectionKind::Skills,
            entries: skill_entries(profile, content),
        },
        RenderedSection {
            kind: SectionKind::Experience,
            entries: experience_entries(profile, content),
        },
        RenderedSection {
            kind: SectionKind::Projects,
            entries: project_entries(profile, content),
        },
        RenderedSection {
            kind: SectionKind::Certifications,
            entries: certification_entries(profile, content),
        },
        RenderedSection {
            kind: SectionKind::Achievements,
            entries: achievement_entries(profile, content),
        },
    ]
}

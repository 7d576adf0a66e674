//! LaTeX source composition. Every user-controlled value passes through
//! `escape_latex` or `sanitize_url` before it reaches the template.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::render::sections::{RenderedSection, SectionEntry, SectionKind};
use crate::render::templates::Template;
use crate::render::RenderError;

/// Escapes text for a LaTeX body. Control characters are dropped and any run of
/// whitespace (newlines included) collapses to one space.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        match c {
            '&' => out.push_str(r"\&"),
            '%' => out.push_str(r"\%"),
            '$' => out.push_str(r"\$"),
            '#' => out.push_str(r"\#"),
            '_' => out.push_str(r"\_"),
            '{' => out.push_str(r"\{"),
            '}' => out.push_str(r"\}"),
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            '\\' => out.push_str(r"\textbackslash{}"),
            '<' => out.push_str(r"\textless{}"),
            '>' => out.push_str(r"\textgreater{}"),
            other => out.push(other),
        }
    }
    out
}

/// Returns a URL safe to place inside `\href{...}`, or `None`.
/// Only http(s) is allowed; a bare `www.` host gets `https://`.
pub fn sanitize_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    let url = if url.starts_with("www.") {
        format!("https://{url}")
    } else {
        url.to_string()
    };
    let lower = url.to_lowercase();
    if !(lower.starts_with("https://") || lower.starts_with("http://")) {
        return None;
    }
    if url.len() <= "https://".len()
        || url
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '{' | '}' | '\\' | '^' | '~'))
    {
        return None;
    }
    Some(url.replace('%', r"\%").replace('#', r"\#"))
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)+$")
            .expect("valid email regex")
    })
}

fn slot_regex() -> &'static Regex {
    static SLOT: OnceLock<Regex> = OnceLock::new();
    SLOT.get_or_init(|| Regex::new(r"<<([a-z_]+)>>").expect("valid slot regex"))
}

/// Replaces every `<<slot>>` in one pass. Substituted values are never rescanned.
pub fn fill_template(template: &str, slots: &BTreeMap<&str, String>) -> Result<String, RenderError> {
    if let Some(missing) = slot_regex()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .find(|name| !slots.contains_key(name.as_str()))
    {
        return Err(RenderError::InvalidSource(format!(
            "template slot '{missing}' has no value"
        )));
    }
    Ok(slot_regex()
        .replace_all(template, |caps: &regex::Captures| {
            slots.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

fn link(url: &str, label: &str) -> String {
    match sanitize_url(url) {
        Some(safe) => format!(r"\href{{{safe}}}{{{}}}", escape_latex(label)),
        None => escape_latex(label),
    }
}

fn display_host(url: &str) -> &str {
    let trimmed = url.trim();
    trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed)
        .trim_end_matches('/')
}

fn header(sections: &[RenderedSection]) -> String {
    let Some(contact) = sections
        .iter()
        .find(|s| s.kind == SectionKind::Contact)
        .and_then(|s| s.entries.first())
    else {
        return String::new();
    };

    let mut parts: Vec<String> = contact
        .items
        .iter()
        .map(|item| {
            if email_regex().is_match(item.trim()) {
                format!(r"\href{{mailto:{0}}}{{{1}}}", item.trim(), escape_latex(item))
            } else {
                escape_latex(item)
            }
        })
        .collect();
    parts.extend(contact.links.iter().map(|url| link(url, display_host(url))));

    format!(
        "\\begin{{center}}\n{{\\LARGE\\bfseries {}}}\\\\[2pt]\n{}\n\\end{{center}}",
        escape_latex(&contact.heading),
        parts.join(r" $|$ ")
    )
}

fn itemize(items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = items
        .iter()
        .map(|i| format!(r"  \item {}", escape_latex(i)))
        .collect();
    format!("\\begin{{itemize}}\n{}\n\\end{{itemize}}\n", lines.join("\n"))
}

fn entry_block(kind: SectionKind, entry: &SectionEntry) -> String {
    match kind {
        SectionKind::Skills => format!(
            "\\textbf{{{}:}} {}\\par\n",
            escape_latex(&entry.heading),
            escape_latex(&entry.detail)
        ),
        SectionKind::Summary => format!("{}\\par\n", escape_latex(&entry.detail)),
        SectionKind::Achievements => itemize(&entry.items),
        SectionKind::Projects => {
            let mut title = escape_latex(&entry.heading);
            if let Some(url) = entry.links.first() {
                title = format!("{title} {}", link(url, "[link]"));
            }
            format!(
                "\\cventry{{{title}}}{{{}}}{{}}{{}}\n{}",
                escape_latex(&entry.detail),
                itemize(&entry.items)
            )
        }
        _ => format!(
            "\\cventry{{{}}}{{{}}}{{{}}}{{{}}}\n{}",
            escape_latex(&entry.heading),
            escape_latex(&entry.subheading),
            escape_latex(&entry.date),
            escape_latex(&entry.detail),
            itemize(&entry.items)
        ),
    }
}

fn body(sections: &[RenderedSection]) -> String {
    sections
        .iter()
        .filter(|s| s.kind != SectionKind::Contact && !s.is_empty())
        .map(|s| {
            let entries: String = s.entries.iter().map(|e| entry_block(s.kind, e)).collect();
            format!("\\cvsection{{{}}}\n{entries}", s.kind.title())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the complete, deterministic LaTeX source for `sections`.
pub fn compose_source(template: Template, sections: &[RenderedSection]) -> Result<String, RenderError> {
    let mut slots = BTreeMap::new();
    slots.insert("header", header(sections));
    slots.insert("body", body(sections));
    let source = fill_template(template.skeleton(), &slots)?;
    validate_source(&source)?;
    Ok(source)
}

/// Structural checks that catch composition bugs before the compiler runs.
pub fn validate_source(source: &str) -> Result<(), RenderError> {
    let mut issues = Vec::new();
    for marker in [r"\documentclass", r"\begin{document}", r"\end{document}"] {
        if !source.contains(marker) {
            issues.push(format!("missing {marker}"));
        }
    }

    // escaped braces (\{ and \}) do not count
    let mut depth: i64 = 0;
    let mut escaped = false;
    for c in source.chars() {
        match c {
            '\\' if !escaped => {
                escaped = true;
                continue;
            }
            '{' if !escaped => depth += 1,
            '}' if !escaped => depth -= 1,
            _ => {}
        }
        escaped = false;
        if depth < 0 {
            break;
        }
    }
    if depth != 0 {
        issues.push("unbalanced braces".to_string());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(RenderError::InvalidSource(issues.join("; ")))
    }
}

//! Prompt builders and parsers for model output.
//!
//! Models answer in loosely structured text. Every parser here accepts the
//! usual variations (numbering, bullets, bold markers, preambles) and
//! returns an empty result rather than an error when nothing usable is
//! found; callers decide on the fallback.

use std::collections::HashSet;
use std::sync::LazyLock;

use fathom_citations::{domain_of, CitationId};
use regex::Regex;
use url::Url;

use super::quick::QuickSource;
use super::state::SourceInfo;
use crate::knowledge::Learning;

pub const SYSTEM_PROMPT: &str = "You are a meticulous research analyst. You state facts precisely, \
attribute every claim to its source, and never invent citations or URLs.";

/// Characters of accumulated findings shown to the model.
pub const FINDINGS_WINDOW: usize = 3_000;
/// Characters of each source's text shown during analysis.
pub const SOURCE_WINDOW: usize = 4_000;

/// Characters of each source shown to the quick-search summary.
const QUICK_EXCERPT_CHARS: usize = 1_500;

/// Bare names match any host label, dotted names match the host or its subdomains.
const IRRELEVANT_DOMAINS: &[&str] = &[
    "pinterest", "instagram", "facebook", "twitter", "youtube", "tiktok", "reddit", "quora",
    "linkedin", "amazon.com", "ebay.com", "etsy.com", "walmart.com", "target.com",
];

const LOW_QUALITY_DOMAINS: &[&str] = &[
    "blogspot.", "wordpress.com", "medium.com", "tumblr.com", "answers.com", "ehow.com",
    "wikihow.com", "buzzfeed.com",
];

const REFERENCE_HEADINGS: &[&str] = &["references", "sources", "bibliography", "works cited", "citations"];

static NUMBERING: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[\d\s\-\*•\.\)]+").ok());

static PREAMBLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^(here are|i will|i'll|let me|these are|i recommend|completed:|search for:).*?:").ok()
});

static LEARNING_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•]|\d+[.)])?\s*\[(\d{1,4})\]\s*(?:\*\*)?(?:([A-Za-z][\w /-]{0,30}?)(?:\*\*)?\s*:)?\s*(.+)$").ok()
});

static URL_IN_TEXT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'\)\]]+"#).ok());

static LEADING_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:[-*•]\s*)?(?:source\s*)?(\d{1,4})\b").ok());

// ============= Text helpers =============

/// The first `max` characters of `text`.
pub fn head_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// The last `max` characters of `text`.
pub fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

// ============= Prompts =============

pub fn plan_prompt(query: &str) -> String {
    format!(
        "Today's date: {date}\n\n\
         Plan a research investigation of the following question:\n\n{query}\n\n\
         Structure the plan with these headings:\n\
         ## Objectives\n## Key Areas to Investigate\n## Methodology\n## Expected Outcomes\n\n\
         Use short bullet points under each heading.",
        date = today(),
    )
}

pub fn reflection_prompt(query: &str, findings: &str) -> String {
    format!(
        "Today's date: {date}\n\n\
         Research question: {query}\n\n\
         Findings so far:\n{findings}\n\n\
         Reflect on these findings. Your answer must contain these sections:\n\n\
         ## Key Insights\n- the most important findings and how strong their evidence is\n\n\
         ## Knowledge Gaps\n- specific questions that remain open and why they matter\n\n\
         ## Next Steps\n- concrete areas that need deeper research\n\n\
         ## Overall Reflection\nA short assessment of progress and reliability.",
        date = today(),
        findings = tail_chars(findings, FINDINGS_WINDOW),
    )
}

pub fn queries_prompt(query: &str, findings: &str, explored: &[String], breadth: usize) -> String {
    let explored = if explored.is_empty() {
        "(none yet)".to_string()
    } else {
        explored.iter().map(|q| format!("- {}", q)).collect::<Vec<_>>().join("\n")
    };
    format!(
        "Generate {breadth} specific web search queries to research this topic:\n\n\
         Main query: {query}\n\n\
         Requirements:\n\
         1. Exactly {breadth} queries.\n\
         2. Natural phrasing, as someone would type into a search engine.\n\
         3. Each query targets a specific fact, data point or perspective.\n\
         4. Do not repeat any query that was already searched.\n\n\
         Already searched:\n{explored}\n\n\
         Today's date: {date}\n\n\
         Current findings:\n{findings}\n\n\
         Return only the queries, one per line, with no numbering or commentary.",
        date = today(),
        findings = tail_chars(findings, FINDINGS_WINDOW / 3 * 2),
    )
}

pub fn rating_prompt(query: &str, source: &SourceInfo, excerpt: &str) -> String {
    format!(
        "Rate the reliability of this source for research on \"{query}\".\n\n\
         URL: {url}\nDomain: {domain}\nTitle: {title}\n\nExcerpt:\n{excerpt}\n\n\
         Answer with exactly one word: high, medium or low.",
        url = source.url,
        domain = source.domain,
        title = source.best_title(),
        excerpt = head_chars(excerpt, 1_500),
    )
}

/// `sources` are numbered from 1 in the prompt; learnings refer back by number.
pub fn analysis_prompt(subquery: &str, sources: &[&SourceInfo]) -> String {
    let mut blocks = String::new();
    for (i, source) in sources.iter().enumerate() {
        let text = source
            .scraped
            .as_ref()
            .map(|c| c.main_text.as_str())
            .unwrap_or(source.snippet.as_str());
        let reliability = source
            .reliability_score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "unrated".to_string());
        blocks.push_str(&format!(
            "\n### Source {n}\nURL: {url}\nTitle: {title}\nReliability: {reliability}\n\n{text}\n",
            n = i + 1,
            url = source.url,
            title = source.best_title(),
            text = head_chars(text, SOURCE_WINDOW),
        ));
    }
    format!(
        "Analyse the sources below for the search query \"{subquery}\".\n{blocks}\n\
         First list every concrete learning, one per line, in exactly this form:\n\
         - [source number] category: fact\n\
         Categories are single words such as statistic, definition, finding, trend, opinion, example.\n\n\
         Then write a short analysis of what the sources agree and disagree on."
    )
}

pub fn selection_prompt(query: &str, candidates: &[&SourceInfo], max: usize) -> String {
    let listing = candidates
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut entry = format!("Source {}:\nURL: {}\nTitle: {}\n", i + 1, s.url, s.best_title());
            if !s.snippet.is_empty() {
                entry.push_str(&format!("Snippet: {}\n", head_chars(&s.snippet, 300)));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Research question: {query}\n\n\
         Select the {max} most valuable sources for a report on this question. \
         Prefer authoritative, specific and recent sources; avoid near-duplicates.\n\n\
         {listing}\n\n\
         Return only the URLs of the selected sources, one per line, most valuable first."
    )
}

/// Learnings as prompt lines, each tagged with its citation id.
pub fn learning_digest(learnings: &[(CitationId, &Learning)]) -> String {
    learnings
        .iter()
        .map(|(id, l)| format!("[{}] ({}) {}", id, l.category, l.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn report_prompt(query: &str, plan: &str, digest: &str, references: &[String]) -> String {
    format!(
        "Write a comprehensive research report answering:\n\n{query}\n\n\
         Research plan:\n{plan}\n\n\
         Learnings, each tagged with the citation id of its source:\n{digest}\n\n\
         Available references:\n{references}\n\n\
         Rules:\n\
         - Organise the report into sections with `##` headings, starting with an executive summary.\n\
         - Support factual statements with citation markers such as [1] or [2][5], using only the ids above.\n\
         - Do not write a title line and do not write a references section.",
        plan = head_chars(plan, 1_500),
        references = references.join("\n"),
    )
}

pub fn enhance_prompt(query: &str, report: &str, digest: &str) -> String {
    format!(
        "Improve this research report on \"{query}\".\n\n\
         Deepen the analysis, add missing context and comparisons from the learnings, \
         and make sure every factual claim carries a citation marker from the learnings.\n\
         Keep the `##` section structure. Do not add a title or a references section.\n\n\
         Learnings:\n{digest}\n\nReport:\n{report}"
    )
}

pub fn expand_prompt(query: &str, heading: &str, body: &str, digest: &str) -> String {
    format!(
        "The following section of a report on \"{query}\" needs more depth.\n\n\
         Section: {heading}\n\n{body}\n\n\
         Rewrite this section at roughly twice the length, adding specific details, \
         examples and data from the learnings below. Keep existing citation markers and \
         cite new claims the same way. Return only the section body, without its heading.\n\n\
         Learnings:\n{digest}"
    )
}

/// Sources are listed under their citation ids.
pub fn quick_search_prompt(query: &str, sources: &[QuickSource], detailed: bool) -> String {
    let listing: String = sources
        .iter()
        .map(|s| {
            format!(
                "[{id}] {domain}\nTitle: {title}\nURL: {url}\nExcerpt: {excerpt}\n\n",
                id = s.id,
                domain = domain_of(&s.url),
                title = s.title,
                url = s.url,
                excerpt = head_chars(&s.excerpt, QUICK_EXCERPT_CHARS),
            )
        })
        .collect();
    let depth = if detailed {
        "Give a detailed analysis with in-depth explanations, concrete examples and relevant background."
    } else {
        "Give a concise, informative summary focused on the key points."
    };
    format!(
        "Today's date: {date}\n\n\
         Answer the search \"{query}\" from the sources below. {depth}\n\n\
         - If the search is a question, answer it directly; if it is a topic, give an overview.\n\
         - Organise the answer with bullet points or numbered lists where it helps.\n\
         - Point out conflicting views or uncertainty explicitly.\n\
         - Cite sources with bracketed ids such as [1], using only the ids listed below.\n\
         - Do not write a title or a references section.\n\n\
         Sources:\n\n{listing}",
        date = today(),
    )
}

// ============= Parsers =============

/// Clean model-proposed queries: strip numbering, bullets and preambles,
/// drop one-word and label-like lines, drop anything already explored
/// (case- and whitespace-insensitive) or repeated, keep at most `breadth`.
pub fn clean_queries(raw: &str, explored: &[String], breadth: usize) -> Vec<String> {
    let key = super::state::query_key;
    let mut seen: HashSet<String> = explored.iter().map(|q| key(q)).collect();
    let mut queries = Vec::new();

    for line in raw.lines() {
        let mut line = line.trim().to_string();
        if let Some(re) = NUMBERING.as_ref() {
            line = re.replace(&line, "").trim().to_string();
        }
        if let Some(re) = PREAMBLE.as_ref() {
            line = re.replace(&line, "").trim().to_string();
        }
        let line = line
            .trim_matches(|c: char| c == '"' || c == '*' || c == '`')
            .trim()
            .to_string();

        if line.split_whitespace().count() < 2 {
            continue;
        }
        let lower = line.to_lowercase();
        if ["query", "search", "investigate", "explore", "research"]
            .iter()
            .any(|label| lower.starts_with(label))
        {
            continue;
        }
        if !seen.insert(key(&line)) {
            continue;
        }
        queries.push(line);
        if queries.len() == breadth {
            break;
        }
    }
    queries
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reflection {
    pub key_insights: Vec<String>,
    pub knowledge_gaps: Vec<String>,
    pub next_steps: Vec<String>,
    pub overall: String,
}

#[derive(Clone, Copy)]
enum ReflectionPart {
    Insights,
    Gaps,
    Steps,
    Overall,
}

fn classify_heading(line: &str) -> Option<ReflectionPart> {
    let lower = line.to_lowercase();
    let is_heading = line.starts_with('#')
        || line.ends_with(':')
        || (line.starts_with("**") && line.ends_with("**"));
    if !is_heading {
        return None;
    }
    if lower.contains("insight") || lower.contains("key finding") {
        Some(ReflectionPart::Insights)
    } else if lower.contains("gap") || lower.contains("unanswered") || lower.contains("question") {
        Some(ReflectionPart::Gaps)
    } else if lower.contains("next step") || lower.contains("recommendation") || lower.contains("future direction") {
        Some(ReflectionPart::Steps)
    } else if lower.contains("overall") || lower.contains("summary") || lower.contains("conclusion") {
        Some(ReflectionPart::Overall)
    } else {
        None
    }
}

/// Split a reflection into its sections. Missing sections stay empty.
pub fn parse_reflection(raw: &str) -> Reflection {
    let mut reflection = Reflection::default();
    let mut current: Option<ReflectionPart> = None;

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(part) = classify_heading(line) {
            current = Some(part);
            continue;
        }
        if line.starts_with('#') {
            current = None;
            continue;
        }
        let item = line.trim_start_matches(['-', '*', '•', ' ']).trim().to_string();
        if item.is_empty() {
            continue;
        }
        match current {
            Some(ReflectionPart::Insights) => reflection.key_insights.push(item),
            Some(ReflectionPart::Gaps) => reflection.knowledge_gaps.push(item),
            Some(ReflectionPart::Steps) => reflection.next_steps.push(item),
            Some(ReflectionPart::Overall) => {
                if !reflection.overall.is_empty() {
                    reflection.overall.push(' ');
                }
                reflection.overall.push_str(&item);
            }
            None => {}
        }
    }
    reflection
}

impl Reflection {
    pub fn is_empty(&self) -> bool {
        self.key_insights.is_empty()
            && self.knowledge_gaps.is_empty()
            && self.next_steps.is_empty()
            && self.overall.is_empty()
    }

    /// Placeholder used when the model produced nothing usable.
    pub fn minimal(query: &str) -> Self {
        Self {
            key_insights: vec![format!("Research on \"{}\" is in progress", query)],
            knowledge_gaps: vec!["More detail is needed on specific aspects".to_string()],
            next_steps: vec!["Continue with the main aspects of the question".to_string()],
            overall: "Progress has been made but key areas need further research.".to_string(),
        }
    }

    pub fn to_markdown(&self) -> String {
        let list = |items: &[String]| {
            items
                .iter()
                .map(|i| format!("- {}", i))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "### Key Insights\n{}\n\n### Knowledge Gaps\n{}\n\n### Next Steps\n{}\n\n### Overall Reflection\n{}",
            list(&self.key_insights),
            list(&self.knowledge_gaps),
            list(&self.next_steps),
            self.overall
        )
    }
}

/// `high`/`medium`/`low` to a score; the first such word wins.
pub fn parse_rating(raw: &str) -> Option<f64> {
    raw.split(|c: char| !c.is_ascii_alphabetic())
        .find_map(|word| match word.to_ascii_lowercase().as_str() {
            "high" => Some(0.9),
            "medium" | "moderate" => Some(0.6),
            "low" => Some(0.3),
            _ => None,
        })
}

/// Domain-based reliability used when the model cannot rate a source.
pub fn heuristic_reliability(url: &str) -> f64 {
    let domain = domain_of(url);
    let tld_like = |suffix: &str| domain.ends_with(suffix) || domain.contains(&format!("{}.", suffix));
    if tld_like(".gov") || tld_like(".edu") {
        0.85
    } else if domain.ends_with("wikipedia.org") {
        0.75
    } else if LOW_QUALITY_DOMAINS.iter().any(|d| domain.contains(d)) {
        0.2
    } else {
        0.5
    }
}

/// Social and shopping sites never make useful research sources.
pub fn is_irrelevant_url(url: &str) -> bool {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase)) else {
        return false;
    };
    IRRELEVANT_DOMAINS.iter().any(|d| {
        if d.contains('.') {
            host == *d || host.ends_with(&format!(".{d}"))
        } else {
            host.split('.').any(|label| label == *d)
        }
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLearning {
    /// 1-based position in the analysis prompt's source list
    pub source: usize,
    pub category: String,
    pub text: String,
}

/// Extract `- [n] category: fact` lines. Lines citing a source number
/// outside `1..=source_count` are dropped.
pub fn parse_learnings(raw: &str, source_count: usize) -> Vec<ParsedLearning> {
    let Some(re) = LEARNING_LINE.as_ref() else {
        return Vec::new();
    };
    raw.lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let source: usize = caps.get(1)?.as_str().parse().ok()?;
            if source == 0 || source > source_count {
                return None;
            }
            let category = caps
                .get(2)
                .map(|m| m.as_str().trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "finding".to_string());
            let text = caps.get(3)?.as_str().trim().trim_matches('*').trim().to_string();
            (text.split_whitespace().count() >= 2).then_some(ParsedLearning { source, category, text })
        })
        .collect()
}

/// Map a selection answer back onto `candidates`, by URL or by number.
pub fn parse_selection(raw: &str, candidates: &[String], max: usize) -> Vec<String> {
    let mut picked: Vec<String> = Vec::new();
    let push = |url: &String, picked: &mut Vec<String>| {
        if picked.len() < max && !picked.contains(url) {
            picked.push(url.clone());
        }
    };

    for line in raw.lines() {
        let mut matched = false;
        if let Some(re) = URL_IN_TEXT.as_ref() {
            for found in re.find_iter(line) {
                let found = found.as_str().trim_end_matches(['.', ',', ';']);
                let key = crate::search::normalize_url(found);
                if let Some(url) = candidates.iter().find(|c| crate::search::normalize_url(c) == key) {
                    push(url, &mut picked);
                    matched = true;
                }
            }
        }
        if matched {
            continue;
        }
        let number = LEADING_NUMBER
            .as_ref()
            .and_then(|re| re.captures(line))
            .and_then(|caps| caps.get(1)?.as_str().parse::<usize>().ok());
        if let Some(url) = number.and_then(|n| n.checked_sub(1)).and_then(|i| candidates.get(i)) {
            push(url, &mut picked);
        }
    }
    picked
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    rest.starts_with(' ').then(|| (level, rest.trim()))
}

fn is_reference_title(title: &str) -> bool {
    let title = title
        .trim_matches(|c: char| c == '*' || c == ':' || c.is_whitespace())
        .to_lowercase();
    REFERENCE_HEADINGS.contains(&title.as_str())
}

/// Remove any reference list the model wrote; the renderer owns References.
pub fn strip_references(report: &str) -> String {
    let mut out = Vec::new();
    let mut skipping: Option<usize> = None;

    for line in report.lines() {
        if let Some((level, title)) = heading_level(line) {
            if is_reference_title(title) {
                skipping = Some(level);
                continue;
            }
            if skipping.is_some_and(|skip_level| level <= skip_level) {
                skipping = None;
            }
        } else if skipping.is_none() && is_reference_title(line) && line.trim().starts_with("**") {
            // Bold pseudo-heading; references run to the end.
            skipping = Some(1);
            continue;
        }
        if skipping.is_none() {
            out.push(line);
        }
    }
    out.join("\n").trim_end().to_string()
}

/// Drop a leading `# Title` line; the renderer writes its own.
pub fn strip_title(report: &str) -> String {
    let trimmed = report.trim_start();
    match heading_level(trimmed.lines().next().unwrap_or_default()) {
        Some((1, _)) => trimmed
            .split_once('\n')
            .map(|(_, rest)| rest.trim_start().to_string())
            .unwrap_or_default(),
        _ => trimmed.to_string(),
    }
}

/// Drop a leading heading of any level, e.g. one a model repeats when asked
/// for a section body.
pub fn strip_leading_heading(text: &str) -> String {
    let trimmed = text.trim_start();
    match heading_level(trimmed.lines().next().unwrap_or_default()) {
        Some(_) => trimmed
            .split_once('\n')
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default(),
        None => trimmed.trim_end().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Heading text without the `## ` prefix
    pub heading: String,
    pub body: String,
}

/// Split a report into its preamble and `##` sections.
pub fn split_sections(report: &str) -> (String, Vec<Section>) {
    let mut preamble = Vec::new();
    let mut sections: Vec<Section> = Vec::new();
    for line in report.lines() {
        match heading_level(line) {
            Some((2, title)) => sections.push(Section {
                heading: title.to_string(),
                body: String::new(),
            }),
            _ => match sections.last_mut() {
                Some(section) => {
                    section.body.push_str(line);
                    section.body.push('\n');
                }
                None => preamble.push(line),
            },
        }
    }
    for section in &mut sections {
        section.body = section.body.trim().to_string();
    }
    (preamble.join("\n").trim().to_string(), sections)
}

pub fn join_sections(preamble: &str, sections: &[Section]) -> String {
    let mut parts = Vec::new();
    if !preamble.trim().is_empty() {
        parts.push(preamble.trim().to_string());
    }
    parts.extend(sections.iter().map(|s| format!("## {}\n\n{}", s.heading, s.body)));
    parts.join("\n\n")
}

/// Indices of the `n` longest sections, in document order.
pub fn largest_sections(sections: &[Section], n: usize) -> Vec<usize> {
    let mut by_size: Vec<usize> = (0..sections.len()).collect();
    by_size.sort_by(|a, b| {
        sections[*b]
            .body
            .chars()
            .count()
            .cmp(&sections[*a].body.chars().count())
            .then(a.cmp(b))
    });
    by_size.truncate(n);
    by_size.sort_unstable();
    by_size
}

/// Deterministic report built straight from learnings, used when the model
/// cannot draft one.
pub fn fallback_report(query: &str, learnings: &[(CitationId, &Learning)], source_count: usize) -> String {
    if learnings.is_empty() {
        return format!(
            "## Overview\n\nNo findings could be gathered for \"{}\". \
             The searches either returned no usable sources or the sources could not be analysed.",
            query
        );
    }

    let mut categories: Vec<&str> = Vec::new();
    for (_, learning) in learnings {
        if !categories.contains(&learning.category.as_str()) {
            categories.push(&learning.category);
        }
    }

    let mut report = format!(
        "## Overview\n\nThis report collects {} findings on \"{}\" drawn from {} sources.",
        learnings.len(),
        query,
        source_count
    );
    report.push_str("\n\n## Key Findings");
    for category in categories {
        report.push_str(&format!("\n\n### {}\n", capitalize(category)));
        for (id, learning) in learnings.iter().filter(|(_, l)| l.category == category) {
            report.push_str(&format!("\n- {} [{}]", learning.text.trim_end_matches('.'), id));
        }
    }
    report
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_clean_queries() {
        let raw = "Here are 4 search queries:\n\
                   1. Solid state battery energy density 2024\n\
                   2) \"solid-state electrolyte safety\"\n\
                   - Batteries\n\
                   * Research more about batteries\n\
                   • sulfide electrolyte manufacturing cost\n\
                   3. SOLID STATE battery   energy density 2024\n\
                   4. lithium metal anode dendrites";
        let explored = vec!["Lithium metal anode  DENDRITES".to_string()];
        let queries = clean_queries(raw, &explored, 4);
        assert_eq!(
            queries,
            [
                "Solid state battery energy density 2024",
                "solid-state electrolyte safety",
                "sulfide electrolyte manufacturing cost",
            ]
        );
        assert_eq!(clean_queries(raw, &[], 1).len(), 1);
    }

    #[test]
    fn test_parse_reflection() {
        let raw = "## Key Insights\n- Cells are safer\n- Density is higher\n\n\
                   **Knowledge Gaps**\n* Cost at scale\n\n\
                   Next Steps:\n- Look at manufacturing\n\n\
                   ## Overall Reflection\nSolid progress.\nMore data needed.";
        let reflection = parse_reflection(raw);
        assert_eq!(reflection.key_insights, ["Cells are safer", "Density is higher"]);
        assert_eq!(reflection.knowledge_gaps, ["Cost at scale"]);
        assert_eq!(reflection.next_steps, ["Look at manufacturing"]);
        assert_eq!(reflection.overall, "Solid progress. More data needed.");

        assert!(parse_reflection("nothing structured here").is_empty());
    }

    #[rstest]
    #[case("High", Some(0.9))]
    #[case("Reliability: **medium**.", Some(0.6))]
    #[case("I would say low.", Some(0.3))]
    #[case("It follows the standard", None)]
    fn test_parse_rating(#[case] raw: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_rating(raw), expected);
    }

    #[rstest]
    #[case("https://www.energy.gov/article", 0.85)]
    #[case("https://mit.edu/paper", 0.85)]
    #[case("https://en.wikipedia.org/wiki/Battery", 0.75)]
    #[case("https://someone.blogspot.com/post", 0.2)]
    #[case("https://www.nature.com/articles/x", 0.5)]
    fn test_heuristic_reliability(#[case] url: &str, #[case] expected: f64) {
        assert_eq!(heuristic_reliability(url), expected);
    }

    #[test]
    fn test_irrelevant_urls() {
        assert!(is_irrelevant_url("https://www.youtube.com/watch?v=1"));
        assert!(is_irrelevant_url("https://www.amazon.com/dp/123"));
        assert!(!is_irrelevant_url("https://www.nature.com/articles/x"));
        assert!(is_irrelevant_url("https://uk.pinterest.co.uk/pin/1"));
    }

    #[rstest]
    #[case("https://www.nature.com/search?q=youtube+facebook")]
    #[case("https://notamazon.com/review")]
    #[case("https://blog.example.org/reddit-threads")]
    #[case("https://youtubers.example.com/")]
    #[case("not a url")]
    fn test_irrelevant_match_is_host_based(#[case] url: &str) {
        assert!(!is_irrelevant_url(url));
    }

    #[test]
    fn test_parse_learnings() {
        let raw = "- [1] statistic: Energy density reached 400 Wh/kg in 2024.\n\
                   - [2] **Definition**: A solid electrolyte conducts lithium ions.\n\
                   [3] Sulfide electrolytes are moisture sensitive\n\
                   - [7] finding: out of range source\n\
                   Some prose without a marker.";
        let learnings = parse_learnings(raw, 3);
        assert_eq!(learnings.len(), 3);
        assert_eq!(learnings[0].source, 1);
        assert_eq!(learnings[0].category, "statistic");
        assert_eq!(learnings[1].category, "definition");
        assert_eq!(learnings[1].text, "A solid electrolyte conducts lithium ions.");
        assert_eq!(learnings[2].category, "finding");
    }

    #[test]
    fn test_parse_selection() {
        let candidates: Vec<String> = ["https://a.example/x", "https://b.example/y", "https://c.example/"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let raw = "https://b.example/y/\n3. Source three\nhttps://unknown.example\nhttps://b.example/y";
        assert_eq!(parse_selection(raw, &candidates, 5), ["https://b.example/y", "https://c.example/"]);
        assert_eq!(parse_selection(raw, &candidates, 1), ["https://b.example/y"]);
    }

    #[test]
    fn test_strip_references() {
        let report = "## Summary\nText [1].\n\n## References\n[1] a.example, \"A\", https://a.example\n\n## Appendix\nMore.";
        assert_eq!(strip_references(report), "## Summary\nText [1].\n\n## Appendix\nMore.");

        let bold = "Body [2].\n\n**Sources:**\n- https://x.example";
        assert_eq!(strip_references(bold), "Body [2].");
    }

    #[test]
    fn test_strip_title() {
        assert_eq!(strip_title("# Title\n\n## Intro\nx"), "## Intro\nx");
        assert_eq!(strip_title("## Intro\nx"), "## Intro\nx");
        assert_eq!(strip_leading_heading("### Intro\nbody text\n"), "body text");
        assert_eq!(strip_leading_heading("body only"), "body only");
    }

    #[test]
    fn test_sections_round_trip_and_largest() {
        let report = "Lead paragraph.\n\n## A\nshort\n\n## B\nthis body is the longest of all\n\n## C\nmedium body";
        let (preamble, sections) = split_sections(report);
        assert_eq!(preamble, "Lead paragraph.");
        assert_eq!(sections.len(), 3);
        assert_eq!(largest_sections(&sections, 2), [1, 2]);
        assert_eq!(
            join_sections(&preamble, &sections),
            "Lead paragraph.\n\n## A\n\nshort\n\n## B\n\nthis body is the longest of all\n\n## C\n\nmedium body"
        );
    }

    #[test]
    fn test_fallback_report_cites_sources() {
        let a = Learning::new("Density reached 400 Wh/kg.", "https://a.example", "statistic", 0);
        let b = Learning::new("Electrolytes are solid", "https://b.example", "definition", 0);
        let report = fallback_report("batteries", &[(1, &a), (2, &b)], 2);
        assert!(report.contains("- Density reached 400 Wh/kg [1]"));
        assert!(report.contains("### Definition"));
        assert!(fallback_report("batteries", &[], 0).contains("No findings"));
    }

    #[test]
    fn test_text_windows() {
        assert_eq!(head_chars("héllo", 2), "hé");
        assert_eq!(tail_chars("héllo", 3), "llo");
        assert_eq!(tail_chars("ab", 5), "ab");
    }
}

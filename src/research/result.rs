//! The finished research report and its persisted forms.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fathom_citations::{format_reference, scan_markers, Citation, ValidationReport};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::state::{ContentAnalysis, FailureCounters, ResearchState, SourceInfo};
use crate::knowledge::Learning;
use crate::types::{AppError, Result};

/// Thoughts beyond this count are sampled when rendered.
const THOUGHT_SAMPLE_THRESHOLD: usize = 20;
const THOUGHT_SAMPLE: usize = 5;
const MAX_SLUG_CHARS: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchStats {
    pub elapsed_seconds: f64,
    /// Research rounds run (the final value of the 0-based iteration, plus one)
    pub iterations: u32,
    pub reflection_rounds: u32,
    pub subqueries_explored: usize,
    pub sources_found: usize,
    pub sources_analyzed: usize,
    pub learnings: usize,
    pub failures: FailureCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationStats {
    pub total_sources: usize,
    pub total_learnings: usize,
    pub learnings_by_category: BTreeMap<String, usize>,
    pub sources_by_domain: BTreeMap<String, usize>,
    /// Mean reliability score of the scored sources of each domain
    pub reliability_by_domain: BTreeMap<String, f64>,
    pub total_citations: usize,
    pub validation: ValidationReport,
}

/// Immutable outcome of a research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub query: String,
    /// Report body, without title or references
    pub summary: String,
    pub depth: u32,
    pub breadth: usize,
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<SourceInfo>,
    pub subqueries: Vec<String>,
    pub learnings: Vec<Learning>,
    pub content_analysis: Vec<ContentAnalysis>,
    pub chain_of_thought: Vec<String>,
    pub research_stats: ResearchStats,
    pub citation_stats: CitationStats,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl ResearchResult {
    pub(crate) fn from_state(state: ResearchState, citations: Vec<Citation>, validation: ValidationReport) -> Self {
        let timestamp = Utc::now();
        let elapsed_seconds = (timestamp - state.started_at).num_milliseconds().max(0) as f64 / 1000.0;

        let mut sources_by_domain: BTreeMap<String, usize> = BTreeMap::new();
        let mut scores: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for source in state.sources.values() {
            *sources_by_domain.entry(source.domain.clone()).or_insert(0) += 1;
            if let Some(score) = source.reliability_score {
                let entry = scores.entry(source.domain.clone()).or_insert((0.0, 0));
                entry.0 += score;
                entry.1 += 1;
            }
        }
        let reliability_by_domain = scores
            .into_iter()
            .map(|(domain, (sum, n))| (domain, sum / n as f64))
            .collect();

        let research_stats = ResearchStats {
            elapsed_seconds,
            iterations: state.iteration + 1,
            reflection_rounds: state.reflection_rounds,
            subqueries_explored: state.explored_queries.len(),
            sources_found: state.sources.len(),
            sources_analyzed: state.analysed_urls().len(),
            learnings: state.learnings.len(),
            failures: state.failures,
        };
        let citation_stats = CitationStats {
            total_sources: state.sources.len(),
            total_learnings: state.learnings.len(),
            learnings_by_category: state.learnings.category_counts(),
            sources_by_domain,
            reliability_by_domain,
            total_citations: citations.len(),
            validation,
        };

        Self {
            query: state.query,
            summary: state.final_report,
            depth: state.depth,
            breadth: state.breadth,
            timestamp,
            sources: state.sources.into_values().collect(),
            subqueries: state.explored_queries,
            learnings: state.learnings.into_vec(),
            content_analysis: state.content_analysis,
            chain_of_thought: state.chain_of_thought,
            research_stats,
            citation_stats,
            citations,
        }
    }

    pub fn to_dict(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_dict(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Write the result; `.json` stores the full payload, anything else the
    /// Markdown rendering.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.save_with(path, false)
    }

    pub fn save_with<P: AsRef<Path>>(&self, path: P, include_chain_of_thought: bool) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = if is_json(path) {
            serde_json::to_string_pretty(&self.to_dict()?)?
        } else {
            self.to_markdown(include_chain_of_thought)
        };
        fs::write(path, content)?;
        info!(path = %path.display(), "Saved research result");
        Ok(())
    }

    /// Load a result saved as JSON. Markdown is a rendering and cannot be
    /// loaded back.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !is_json(path) {
            return Err(AppError::InvalidInput(format!(
                "{} is not a JSON result; only .json files can be loaded",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        Self::from_dict(serde_json::from_str(&content)?)
    }

    /// `{dir}/{sanitized query}_{YYYYmmdd_HHMMSS}.{ext}`
    pub fn output_path(dir: &Path, query: &str, extension: &str) -> PathBuf {
        let slug: String = query
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .chars()
            .take(MAX_SLUG_CHARS)
            .collect();
        let slug = if slug.is_empty() { "research".to_string() } else { slug };
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        dir.join(format!("{}_{}.{}", slug, stamp, extension.trim_start_matches('.')))
    }

    /// Citation ids used in the report body that resolve to a citation.
    pub fn cited_ids(&self) -> BTreeSet<u32> {
        let known: BTreeSet<u32> = self.citations.iter().map(|c| c.id).collect();
        scan_markers(&self.summary)
            .into_iter()
            .filter(|id| known.contains(id))
            .collect()
    }

    pub fn to_markdown(&self, include_chain_of_thought: bool) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# {}\n", self.query.trim());
        let _ = writeln!(md, "{}\n", self.summary.trim());

        md.push_str("## References\n\n");
        let cited = self.cited_ids();
        if cited.is_empty() {
            md.push_str("_No sources were cited._\n");
        }
        for citation in self.citations.iter().filter(|c| cited.contains(&c.id)) {
            let _ = writeln!(
                md,
                "{}  ",
                format_reference(citation.id, &citation.url, citation.title.as_deref())
            );
        }

        let stats = &self.research_stats;
        md.push_str("\n## Research Process\n\n");
        let _ = writeln!(md, "- **Depth**: {}", self.depth);
        let _ = writeln!(md, "- **Breadth**: {}", self.breadth);
        let _ = writeln!(md, "- **Time Taken**: {}", format_elapsed(stats.elapsed_seconds));
        let _ = writeln!(md, "- **Subqueries Explored**: {}", stats.subqueries_explored);
        let _ = writeln!(md, "- **Sources Analyzed**: {}", stats.sources_analyzed);

        let citations = &self.citation_stats;
        md.push_str("\n### Research Statistics\n\n");
        let _ = writeln!(md, "- **Total Sources**: {}", citations.total_sources);
        let _ = writeln!(md, "- **Total Learnings**: {}", citations.total_learnings);
        let _ = writeln!(
            md,
            "- **Learnings by Category**: {}",
            join_map(&citations.learnings_by_category, |n| n.to_string())
        );
        let _ = writeln!(
            md,
            "- **Sources by Domain**: {}",
            join_map(&citations.sources_by_domain, |n| n.to_string())
        );
        let _ = writeln!(
            md,
            "- **Reliability by Domain**: {}",
            join_map(&citations.reliability_by_domain, |s| format!("{:.2}", s))
        );
        let _ = writeln!(md, "- **Citation Integrity**: {}", integrity(&citations.validation));

        if include_chain_of_thought {
            let thoughts = sample_thoughts(&self.chain_of_thought);
            if !thoughts.is_empty() {
                md.push_str("\n## Chain of Thought\n\n");
                for thought in thoughts {
                    match thought {
                        Some(text) => {
                            let _ = writeln!(md, "- {}", text);
                        }
                        None => md.push_str("- ...\n"),
                    }
                }
            }
        }
        md
    }
}

pub(crate) fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// One-line verdict on a report's citation markers.
pub(crate) fn integrity(validation: &ValidationReport) -> String {
    if validation.valid {
        return format!("all {} citation markers resolve", validation.used_citations.len());
    }
    format!(
        "{} unresolved markers ({})",
        validation.invalid_citations.len(),
        validation
            .invalid_citations
            .iter()
            .map(|id| format!("[{}]", id))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// `key: value` pairs, or `none` for an empty map.
fn join_map<V>(map: &BTreeMap<String, V>, render: impl Fn(&V) -> String) -> String {
    if map.is_empty() {
        return "none".to_string();
    }
    map.iter()
        .map(|(k, v)| format!("{}: {}", k, render(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn format_elapsed(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor();
    if minutes >= 1.0 {
        format!("{}m {:.1}s", minutes as u64, seconds - minutes * 60.0)
    } else {
        format!("{:.1}s", seconds)
    }
}

/// Drop empty and repeated thoughts; long logs keep their head, middle and
/// tail, with `None` marking each gap.
fn sample_thoughts(thoughts: &[String]) -> Vec<Option<&str>> {
    let mut kept: Vec<&str> = Vec::new();
    for thought in thoughts.iter().map(|t| t.trim()) {
        if thought.is_empty() || kept.last() == Some(&thought) {
            continue;
        }
        kept.push(thought);
    }

    if kept.len() <= THOUGHT_SAMPLE_THRESHOLD {
        return kept.into_iter().map(Some).collect();
    }
    let middle = kept.len() / 2 - THOUGHT_SAMPLE / 2;
    let mut sampled: Vec<Option<&str>> = Vec::new();
    sampled.extend(kept[..THOUGHT_SAMPLE].iter().copied().map(Some));
    sampled.push(None);
    sampled.extend(kept[middle..middle + THOUGHT_SAMPLE].iter().copied().map(Some));
    sampled.push(None);
    sampled.extend(kept[kept.len() - THOUGHT_SAMPLE..].iter().copied().map(Some));
    sampled
}

//! Mutable state threaded through a research run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::knowledge::KnowledgeStore;
use crate::types::{EngineId, FetchError, ScrapedContent};

/// A URL seen in search results, enriched as the run progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub domain: String,
    pub engine: EngineId,
    /// Subquery whose search first surfaced this URL
    pub found_by: String,
    /// In `[0, 1]`; `None` until scored
    #[serde(default)]
    pub reliability_score: Option<f64>,
    pub first_seen_iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped: Option<Arc<ScrapedContent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<FetchError>,
}

impl SourceInfo {
    pub fn is_scraped(&self) -> bool {
        self.scraped.is_some()
    }

    /// Scraped title when available, else the search result title.
    pub fn best_title(&self) -> &str {
        self.scraped
            .as_ref()
            .map(|c| c.final_title.trim())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.title.trim())
    }
}

/// Analysis produced for one subquery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub query: String,
    pub sources: Vec<String>,
    pub analysis: String,
}

/// Degradations absorbed during the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounters {
    /// Model calls that exhausted their retries and fell back to a default
    pub llm_fallbacks: u32,
    /// Engines that failed for a subquery
    pub search_failures: u32,
    /// URLs that could not be fetched
    pub fetch_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub query: String,
    pub depth: u32,
    pub breadth: usize,
    /// 0-based research round; never exceeds `depth`
    pub iteration: u32,
    /// Targets of the current round
    pub subqueries: Vec<String>,
    /// Every subquery searched so far, in order
    pub explored_queries: Vec<String>,
    pub sources: BTreeMap<String, SourceInfo>,
    pub learnings: KnowledgeStore,
    pub chain_of_thought: Vec<String>,
    pub plan: String,
    pub findings: String,
    pub content_analysis: Vec<ContentAnalysis>,
    /// New subqueries produced by the latest `GenerateQueries`
    pub round_new_queries: usize,
    pub reflection_rounds: u32,
    pub selected_sources: Vec<String>,
    pub formatted_citations: Vec<String>,
    pub initial_report: String,
    pub enhanced_report: String,
    pub final_report: String,
    pub failures: FailureCounters,
    pub started_at: DateTime<Utc>,
}

impl ResearchState {
    pub fn new(query: impl Into<String>, depth: u32, breadth: usize) -> Self {
        Self {
            query: query.into(),
            depth,
            breadth,
            iteration: 0,
            subqueries: Vec::new(),
            explored_queries: Vec::new(),
            sources: BTreeMap::new(),
            learnings: KnowledgeStore::new(),
            chain_of_thought: Vec::new(),
            plan: String::new(),
            findings: String::new(),
            content_analysis: Vec::new(),
            round_new_queries: 0,
            reflection_rounds: 0,
            selected_sources: Vec::new(),
            formatted_citations: Vec::new(),
            initial_report: String::new(),
            enhanced_report: String::new(),
            final_report: String::new(),
            failures: FailureCounters::default(),
            started_at: Utc::now(),
        }
    }

    /// Append to the chain of thought.
    pub fn think(&mut self, thought: impl Into<String>) {
        let thought = thought.into();
        debug!(iteration = self.iteration, thought = %thought, "Chain of thought");
        self.chain_of_thought.push(thought);
    }

    /// Record a model fallback in both the counters and the chain of thought.
    pub fn degrade(&mut self, what: &str, error: &impl std::fmt::Display) {
        self.failures.llm_fallbacks += 1;
        self.think(format!("{} failed ({}); using a default", what, error));
    }

    pub fn is_explored(&self, query: &str) -> bool {
        let key = query_key(query);
        self.explored_queries.iter().any(|q| query_key(q) == key)
    }

    /// The most recent report draft.
    pub fn latest_report(&self) -> &str {
        [&self.final_report, &self.enhanced_report, &self.initial_report]
            .into_iter()
            .find(|r| !r.trim().is_empty())
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Scraped sources, in URL order.
    pub fn scraped_sources(&self) -> impl Iterator<Item = &SourceInfo> {
        self.sources.values().filter(|s| s.is_scraped())
    }

    /// URLs of sources that contributed to at least one analysis, in
    /// first-analysed order.
    pub fn analysed_urls(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.content_analysis
            .iter()
            .flat_map(|a| a.sources.iter())
            .filter(|url| seen.insert(url.as_str()))
            .cloned()
            .collect()
    }
}

/// Case- and whitespace-insensitive identity of a query.
pub fn query_key(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explored_is_case_and_space_insensitive() {
        let mut state = ResearchState::new("q", 1, 2);
        state.explored_queries.push("Solid  state Batteries".to_string());
        assert!(state.is_explored(" solid state batteries"));
        assert!(!state.is_explored("solid state electrolytes"));
    }

    #[test]
    fn test_latest_report_prefers_newest_draft() {
        let mut state = ResearchState::new("q", 1, 2);
        assert_eq!(state.latest_report(), "");
        state.initial_report = "draft".to_string();
        assert_eq!(state.latest_report(), "draft");
        state.enhanced_report = "better".to_string();
        assert_eq!(state.latest_report(), "better");
    }

    #[test]
    fn test_analysed_urls_dedupes_in_order() {
        let mut state = ResearchState::new("q", 1, 2);
        for (query, sources) in [("a", vec!["u2", "u1"]), ("b", vec!["u1", "u3"])] {
            state.content_analysis.push(ContentAnalysis {
                query: query.to_string(),
                sources: sources.into_iter().map(String::from).collect(),
                analysis: String::new(),
            });
        }
        assert_eq!(state.analysed_urls(), ["u2", "u1", "u3"]);
    }

    #[test]
    fn test_degrade_counts() {
        let mut state = ResearchState::new("q", 1, 2);
        state.degrade("Reflection", &"model offline");
        assert_eq!(state.failures.llm_fallbacks, 1);
        assert!(state.chain_of_thought[0].contains("model offline"));
    }
}

//! Single-pass search with a cited summary.
//!
//! A quick search runs the engines once, reads the top results in full and
//! asks the model for one summary that cites the results by id. There is no
//! planning, reflection or follow-up round.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use fathom_citations::{format_reference, marker_contexts, Citation, CitationId, CitationRegistry, ValidationReport};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::prompts::{self, SYSTEM_PROMPT};
use super::result::{format_elapsed, integrity, is_json};
use crate::llm::LLMClient;
use crate::scrape::{validate_url, Scraper};
use crate::search::SearchAggregator;
use crate::types::{AppError, EngineId, Result};
use crate::utils::config::QuickSearchSettings;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

/// A search result offered to the summary, under its citation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickSource {
    pub id: CitationId,
    pub url: String,
    pub title: String,
    /// Page text when the page was read, the engine snippet otherwise
    pub excerpt: String,
    pub engine: EngineId,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickSearchResult {
    pub query: String,
    pub summary: String,
    pub detailed: bool,
    pub timestamp: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub sources: Vec<QuickSource>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub validation: ValidationReport,
    /// The model could not be reached and the summary lists results instead
    #[serde(default)]
    pub fallback: bool,
}

impl QuickSearchResult {
    pub fn read_count(&self) -> usize {
        self.sources.iter().filter(|s| s.read).count()
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# {}\n", self.query.trim());
        let _ = writeln!(md, "{}\n", self.summary.trim());

        md.push_str("## Sources\n\n");
        if self.citations.is_empty() {
            md.push_str("_No sources were found._\n");
        }
        for citation in &self.citations {
            let _ = writeln!(
                md,
                "{}  ",
                format_reference(citation.id, &citation.url, citation.title.as_deref())
            );
        }

        md.push_str("\n## Search Statistics\n\n");
        let _ = writeln!(
            md,
            "- **Sources**: {} ({} read in full)",
            self.sources.len(),
            self.read_count()
        );
        let _ = writeln!(md, "- **Time Taken**: {}", format_elapsed(self.elapsed_seconds));
        let _ = writeln!(md, "- **Citation Integrity**: {}", integrity(&self.validation));
        md
    }

    /// Write `.json` as the full payload, anything else as Markdown.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            self.to_markdown()
        };
        fs::write(path, content)?;
        info!(path = %path.display(), "Saved search result");
        Ok(())
    }
}

pub struct QuickSearcher {
    llm: Arc<dyn LLMClient>,
    search: Arc<SearchAggregator>,
    scraper: Arc<Scraper>,
    settings: QuickSearchSettings,
    retry: RetryPolicy,
    prefer_dynamic: bool,
}

impl QuickSearcher {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        search: Arc<SearchAggregator>,
        scraper: Arc<Scraper>,
        settings: QuickSearchSettings,
    ) -> Self {
        Self {
            llm,
            search,
            scraper,
            settings,
            retry: RetryPolicy::default(),
            prefer_dynamic: false,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Render pages through the rendering service before static fetching.
    pub fn with_dynamic(mut self, prefer_dynamic: bool) -> Self {
        self.prefer_dynamic = prefer_dynamic;
        self
    }

    /// Search, read the top results and summarise them. Never fails: an
    /// unreachable model yields a summary listing the results.
    pub async fn search(&self, query: &str, detailed: bool) -> QuickSearchResult {
        let started = Instant::now();
        let timestamp = Utc::now();
        let query = query.trim();
        let registry = CitationRegistry::new();

        let engines: BTreeSet<EngineId> = self.search.settings().engines.iter().copied().collect();
        let hits = self
            .search
            .search(query, &engines, self.settings.max_results, false)
            .await;

        let mut sources: Vec<QuickSource> = Vec::new();
        for hit in hits {
            if prompts::is_irrelevant_url(&hit.url) || validate_url(&hit.url).is_err() {
                continue;
            }
            let id = registry.register(&hit.url, "");
            if sources.iter().any(|s| s.id == id) {
                continue;
            }
            let _ = registry.update_metadata(id, Some(&hit.title), None);
            sources.push(QuickSource {
                id,
                url: hit.url,
                title: hit.title,
                excerpt: hit.snippet,
                engine: hit.engine,
                read: false,
            });
        }

        self.read_top_pages(&mut sources, &registry).await;

        let (summary, fallback) = if sources.is_empty() {
            (format!("No search results were found for \"{}\".", query), false)
        } else {
            let prompt = prompts::quick_search_prompt(query, &sources, detailed);
            match self.ask(&prompt).await {
                Ok(text) => (prompts::strip_title(&prompts::strip_references(&text)), false),
                Err(e) => {
                    warn!(error = %e, "Summary failed, listing results instead");
                    (fallback_summary(&sources), true)
                }
            }
        };

        let validation = registry.validate(&summary);
        let resolved = validation.resolved();
        for (id, context) in marker_contexts(&summary) {
            if !resolved.contains(&id) {
                continue;
            }
            if let Some(url) = registry.get_url(id) {
                registry.register(&url, &context);
            }
        }
        if !validation.valid {
            warn!(invalid = ?validation.invalid_citations, "Summary cites unknown sources");
        }

        let result = QuickSearchResult {
            query: query.to_string(),
            summary,
            detailed,
            timestamp,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            sources,
            citations: registry.all_citations(),
            validation,
            fallback,
        };
        info!(
            query = %result.query,
            sources = result.sources.len(),
            read = result.read_count(),
            "Quick search complete"
        );
        result
    }

    async fn read_top_pages(&self, sources: &mut [QuickSource], registry: &CitationRegistry) {
        let urls: Vec<String> = sources
            .iter()
            .take(self.settings.max_pages)
            .map(|s| s.url.clone())
            .collect();
        if urls.is_empty() {
            return;
        }

        let fetched = self.scraper.fetch_many(&urls, self.prefer_dynamic).await;
        for (source, (_, outcome)) in sources.iter_mut().zip(fetched) {
            match outcome {
                Ok(content) => {
                    let title = content.final_title.trim();
                    if !title.is_empty() {
                        source.title = title.to_string();
                    }
                    let _ = registry.update_metadata(source.id, Some(title), content.published());
                    source.excerpt = content.main_text;
                    source.read = true;
                }
                Err(e) => warn!(url = %source.url, error = %e, "Could not read search result"),
            }
        }
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        let llm = &self.llm;
        retry_with_backoff(
            &self.retry,
            "quick summary",
            |_| async move {
                let text = llm.generate_with_system(SYSTEM_PROMPT, prompt).await?;
                if text.trim().is_empty() {
                    return Err(AppError::LLM("empty response".to_string()));
                }
                Ok::<_, AppError>(text)
            },
            AppError::is_transient,
        )
        .await
    }
}

fn fallback_summary(sources: &[QuickSource]) -> String {
    let mut text = String::from("A summary could not be generated. The top results were:\n\n");
    for source in sources {
        let _ = writeln!(text, "- {} [{}]", source.title.trim(), source.id);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: CitationId, read: bool) -> QuickSource {
        QuickSource {
            id,
            url: format!("https://example.com/{}", id),
            title: format!("Result {}", id),
            excerpt: String::new(),
            engine: EngineId::Bing,
            read,
        }
    }

    #[test]
    fn test_fallback_summary_cites_every_source() {
        let summary = fallback_summary(&[source(1, true), source(2, false)]);
        assert!(summary.contains("- Result 1 [1]"));
        assert!(summary.contains("- Result 2 [2]"));
    }

    #[test]
    fn test_markdown_sections() {
        let result = QuickSearchResult {
            query: "rust web frameworks".to_string(),
            summary: "Axum is popular [1].".to_string(),
            detailed: false,
            timestamp: Utc::now(),
            elapsed_seconds: 3.0,
            sources: vec![source(1, true), source(2, false)],
            citations: Vec::new(),
            validation: ValidationReport::from_sets([1].into_iter().collect(), 2),
            fallback: false,
        };
        let markdown = result.to_markdown();
        assert!(markdown.starts_with("# rust web frameworks\n"));
        assert!(markdown.contains("_No sources were found._"));
        assert!(markdown.contains("- **Sources**: 2 (1 read in full)"));
        assert!(markdown.contains("all 1 citation markers resolve"));
    }
}

//! Drives a research run through its stages.
//!
//! The orchestrator owns the [`ResearchState`] for the duration of a run and
//! hands it to one stage handler at a time. Handlers never fail: model calls
//! are retried and then replaced with safe defaults, search and fetch
//! failures are absorbed and counted. A run that starts always produces a
//! [`ResearchResult`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use fathom_citations::{domain_of, format_reference, marker_contexts, CitationId, CitationRegistry};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::machine::Stage;
use super::prompts::{self, Reflection, SYSTEM_PROMPT};
use super::result::ResearchResult;
use super::state::{ContentAnalysis, ResearchState, SourceInfo};
use crate::knowledge::Learning;
use crate::llm::LLMClient;
use crate::scrape::{validate_url, Scraper};
use crate::search::SearchAggregator;
use crate::types::{AppError, EngineId, Result};
use crate::utils::config::ResearchSettings;
use crate::utils::limiter::{collect_ordered, RequestLimiter};
use crate::utils::retry::retry_with_backoff;

/// Reported to the progress callback when a stage starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub iteration: u32,
    pub message: String,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

pub struct ResearchOrchestrator {
    llm: Arc<dyn LLMClient>,
    search: Arc<SearchAggregator>,
    scraper: Arc<Scraper>,
    settings: ResearchSettings,
    llm_slots: Arc<RequestLimiter>,
    progress: Option<ProgressCallback>,
}

impl ResearchOrchestrator {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        search: Arc<SearchAggregator>,
        scraper: Arc<Scraper>,
        settings: ResearchSettings,
    ) -> Self {
        let llm_slots = Arc::new(RequestLimiter::new(settings.max_concurrent_llm));
        Self {
            llm,
            search,
            scraper,
            settings,
            llm_slots,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn settings(&self) -> &ResearchSettings {
        &self.settings
    }

    /// Research `query` from `Init` to `Finalize`.
    pub async fn run(&self, query: &str) -> ResearchResult {
        let registry = CitationRegistry::new();
        let mut state = ResearchState::new(
            query.trim(),
            self.settings.depth,
            self.settings.breadth.max(1),
        );
        info!(
            query = %state.query,
            depth = state.depth,
            breadth = state.breadth,
            model = self.llm.model_name(),
            "Starting research"
        );

        let mut stage = Stage::Init;
        loop {
            self.notify(stage, &state, stage.label());
            if stage.is_terminal() {
                return self.finalize(state, &registry);
            }

            let started = Instant::now();
            state = self.step(stage, state, &registry).await;
            debug!(
                stage = %stage,
                iteration = state.iteration,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage complete"
            );

            let next = stage.next(&state);
            if stage == Stage::ExtractLearnings && next == Stage::Reflect {
                state.iteration += 1;
                info!(iteration = state.iteration, depth = state.depth, "Starting next research round");
            }
            stage = next;
        }
    }

    async fn step(&self, stage: Stage, state: ResearchState, registry: &CitationRegistry) -> ResearchState {
        match stage {
            Stage::Init => self.init(state).await,
            Stage::Reflect => self.reflect(state).await,
            Stage::GenerateQueries => self.generate_queries(state).await,
            Stage::Search => self.search(state).await,
            Stage::ScoreSources => self.score_sources(state).await,
            Stage::ExtractLearnings => self.extract_learnings(state).await,
            Stage::SelectTopSources => self.select_top_sources(state, registry).await,
            Stage::FormatCitations => self.format_citations(state, registry),
            Stage::GenerateInitialReport => self.generate_initial_report(state, registry).await,
            Stage::EnhanceReport => self.enhance_report(state, registry).await,
            Stage::ExpandKeySections => self.expand_key_sections(state, registry).await,
            // Handled by `run`.
            Stage::Finalize => state,
        }
    }

    fn notify(&self, stage: Stage, state: &ResearchState, message: &str) {
        if let Some(callback) = &self.progress {
            callback(&ProgressUpdate {
                stage,
                iteration: state.iteration,
                message: message.to_string(),
            });
        }
    }

    /// One model call with retries. Blank answers count as failures.
    ///
    /// Each attempt holds an `llm_slots` permit; backoff sleeps do not.
    async fn ask(&self, label: &str, prompt: &str) -> Result<String> {
        let llm = &self.llm;
        let slots = &self.llm_slots;
        let policy = self.settings.llm_retry_policy();
        retry_with_backoff(
            &policy,
            label,
            |_| async move {
                let text = slots
                    .run(llm.generate_with_system(SYSTEM_PROMPT, prompt))
                    .await??;
                if text.trim().is_empty() {
                    return Err(AppError::LLM("empty response".to_string()));
                }
                Ok::<_, AppError>(text)
            },
            AppError::is_transient,
        )
        .await
    }

    // ============= Research loop =============

    async fn init(&self, mut state: ResearchState) -> ResearchState {
        state.started_at = Utc::now();
        match self.ask("plan", &prompts::plan_prompt(&state.query)).await {
            Ok(plan) => {
                state.plan = plan.trim().to_string();
                state.think("Drafted a research plan");
            }
            Err(e) => {
                state.degrade("Research planning", &e);
                state.plan = format!(
                    "## Objectives\n- Answer: {}\n\n## Methodology\n- Search the web, read the most relevant sources and extract cited facts",
                    state.query
                );
            }
        }
        state.findings = format!("# Research Plan\n\n{}\n", state.plan);
        state
    }

    async fn reflect(&self, mut state: ResearchState) -> ResearchState {
        state.reflection_rounds += 1;
        let prompt = prompts::reflection_prompt(&state.query, &state.findings);
        let reflection = match self.ask("reflect", &prompt).await {
            Ok(raw) => {
                let parsed = prompts::parse_reflection(&raw);
                if parsed.is_empty() {
                    Reflection::minimal(&state.query)
                } else {
                    parsed
                }
            }
            Err(e) => {
                state.degrade("Reflection", &e);
                Reflection::minimal(&state.query)
            }
        };

        state.findings.push_str(&format!(
            "\n\n## Reflection (round {})\n\n{}\n",
            state.iteration + 1,
            reflection.to_markdown()
        ));
        state.think(format!(
            "Reflection round {}: {} insights, {} knowledge gaps",
            state.reflection_rounds,
            reflection.key_insights.len(),
            reflection.knowledge_gaps.len()
        ));
        state
    }

    async fn generate_queries(&self, mut state: ResearchState) -> ResearchState {
        let prompt = prompts::queries_prompt(
            &state.query,
            &state.findings,
            &state.explored_queries,
            state.breadth,
        );
        let raw = match self.ask("generate_queries", &prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                state.degrade("Query generation", &e);
                String::new()
            }
        };

        let mut queries = prompts::clean_queries(&raw, &state.explored_queries, state.breadth);
        if queries.is_empty() && state.iteration == 0 && !state.is_explored(&state.query) {
            queries.push(state.query.clone());
            state.think("No usable queries; searching the main query instead");
        }

        state.round_new_queries = queries.len();
        state.think(if queries.is_empty() {
            "No new queries to explore".to_string()
        } else {
            format!("Generated {} queries: {}", queries.len(), queries.join("; "))
        });
        state.subqueries = queries;
        state
    }

    /// Configured engines, plus Wikipedia on every other subquery.
    fn engines_for(&self, index: usize) -> BTreeSet<EngineId> {
        let settings = self.search.settings();
        let mut engines: BTreeSet<EngineId> = settings.engines.iter().copied().collect();
        if settings.rotate_wikipedia && index % 2 == 0 {
            engines.insert(EngineId::Wikipedia);
        }
        engines
    }

    async fn search(&self, mut state: ResearchState) -> ResearchState {
        if state.subqueries.is_empty() {
            return state;
        }
        let max_results = self.search.settings().max_results;
        let subqueries = state.subqueries.clone();

        let outcomes = collect_ordered(subqueries.iter().enumerate().map(|(index, query)| {
            let engines = self.engines_for(index);
            async move { self.search.search_detailed(query, &engines, max_results, false).await }
        }))
        .await;

        let mut to_fetch: Vec<String> = Vec::new();
        for (query, outcome) in subqueries.iter().zip(outcomes) {
            state.explored_queries.push(query.clone());
            state.failures.search_failures +=
                outcome.reports.iter().filter(|r| !r.succeeded()).count() as u32;

            let mut new_for_query = 0;
            let mut skipped = 0;
            for hit in outcome.hits {
                if prompts::is_irrelevant_url(&hit.url) || validate_url(&hit.url).is_err() {
                    skipped += 1;
                    continue;
                }
                if state.sources.contains_key(&hit.url) {
                    continue;
                }
                if new_for_query < self.settings.max_urls_per_query {
                    to_fetch.push(hit.url.clone());
                    new_for_query += 1;
                }
                state.sources.insert(
                    hit.url.clone(),
                    SourceInfo {
                        domain: domain_of(&hit.url),
                        url: hit.url,
                        title: hit.title,
                        snippet: hit.snippet,
                        engine: hit.engine,
                        found_by: query.clone(),
                        reliability_score: None,
                        first_seen_iteration: state.iteration,
                        scraped: None,
                        fetch_error: None,
                    },
                );
            }
            state.think(format!(
                "Searched \"{}\": {} new sources to read, {} irrelevant results skipped",
                query, new_for_query, skipped
            ));
        }

        let fetched = self
            .scraper
            .fetch_many(&to_fetch, self.settings.prefer_dynamic)
            .await;
        let mut read = 0;
        for (url, outcome) in fetched {
            let Some(source) = state.sources.get_mut(&url) else {
                continue;
            };
            match outcome {
                Ok(content) => {
                    source.scraped = Some(Arc::new(content));
                    read += 1;
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Source could not be read");
                    source.fetch_error = Some(e);
                    state.failures.fetch_failures += 1;
                }
            }
        }
        state.think(format!("Read {} of {} sources", read, to_fetch.len()));
        state
    }

    async fn score_sources(&self, mut state: ResearchState) -> ResearchState {
        let pending: Vec<String> = state
            .scraped_sources()
            .filter(|s| s.reliability_score.is_none())
            .map(|s| s.url.clone())
            .collect();
        if pending.is_empty() {
            return state;
        }

        let ratings = collect_ordered(pending.iter().map(|url| {
            let prompt = state.sources.get(url).map(|source| {
                let excerpt = source
                    .scraped
                    .as_ref()
                    .map(|c| c.main_text.as_str())
                    .unwrap_or_default();
                prompts::rating_prompt(&state.query, source, excerpt)
            });
            async move {
                match prompt {
                    Some(prompt) => self.ask("score_source", &prompt).await,
                    None => Err(AppError::Internal("source vanished".to_string())),
                }
            }
        }))
        .await;

        let mut fallbacks = 0;
        for (url, rating) in pending.iter().zip(ratings) {
            let score = match rating {
                Ok(raw) => prompts::parse_rating(&raw),
                Err(e) => {
                    debug!(url = %url, error = %e, "Rating failed");
                    state.failures.llm_fallbacks += 1;
                    None
                }
            };
            let score = score.unwrap_or_else(|| {
                fallbacks += 1;
                prompts::heuristic_reliability(url)
            });
            if let Some(source) = state.sources.get_mut(url) {
                source.reliability_score = Some(score.clamp(0.0, 1.0));
            }
        }
        state.think(format!(
            "Scored {} sources ({} by domain heuristic)",
            pending.len(),
            fallbacks
        ));
        state
    }

    async fn extract_learnings(&self, mut state: ResearchState) -> ResearchState {
        // Sources each subquery surfaced and read this round.
        let batches: Vec<(String, Vec<String>, String)> = state
            .subqueries
            .iter()
            .filter_map(|query| {
                let sources: Vec<&SourceInfo> = state
                    .scraped_sources()
                    .filter(|s| &s.found_by == query && s.first_seen_iteration == state.iteration)
                    .collect();
                if sources.is_empty() {
                    return None;
                }
                let urls: Vec<String> = sources.iter().map(|s| s.url.clone()).collect();
                Some((query.clone(), urls, prompts::analysis_prompt(query, &sources)))
            })
            .collect();

        let analyses = collect_ordered(
            batches
                .iter()
                .map(|(_, _, prompt)| self.ask("extract_learnings", prompt)),
        )
        .await;

        for ((query, urls, _), analysis) in batches.into_iter().zip(analyses) {
            let raw = match analysis {
                Ok(raw) => raw,
                Err(e) => {
                    state.degrade(&format!("Analysis of \"{}\"", query), &e);
                    continue;
                }
            };

            let mut added = 0;
            for parsed in prompts::parse_learnings(&raw, urls.len()) {
                let Some(url) = parsed.source.checked_sub(1).and_then(|i| urls.get(i)) else {
                    continue;
                };
                let learning = Learning::new(parsed.text, url.clone(), parsed.category, state.iteration);
                if state.learnings.add(learning) {
                    added += 1;
                }
            }

            state
                .findings
                .push_str(&format!("\n\n## Analysis: {}\n\n{}\n", query, raw.trim()));
            state.content_analysis.push(ContentAnalysis {
                query: query.clone(),
                sources: urls,
                analysis: raw.trim().to_string(),
            });
            state.think(format!("Extracted {} learnings for \"{}\"", added, query));
        }
        state
    }

    // ============= Report =============

    async fn select_top_sources(&self, mut state: ResearchState, registry: &CitationRegistry) -> ResearchState {
        let candidates = state.analysed_urls();
        let max = self.settings.max_selected_sources;

        let selected = if candidates.len() > self.settings.selection_threshold {
            let listing: Vec<&SourceInfo> = candidates
                .iter()
                .filter_map(|url| state.sources.get(url))
                .collect();
            let prompt = prompts::selection_prompt(&state.query, &listing, max);
            let picked = match self.ask("select_sources", &prompt).await {
                Ok(raw) => prompts::parse_selection(&raw, &candidates, max),
                Err(e) => {
                    state.degrade("Source selection", &e);
                    Vec::new()
                }
            };
            if picked.is_empty() {
                candidates.iter().take(max).cloned().collect()
            } else {
                picked
            }
        } else {
            candidates
        };

        registry.bulk_register(&selected);
        state.think(format!("Selected {} sources for the report", selected.len()));
        state.selected_sources = selected;
        state
    }

    fn format_citations(&self, mut state: ResearchState, registry: &CitationRegistry) -> ResearchState {
        let mut lines = Vec::with_capacity(state.selected_sources.len());
        for url in &state.selected_sources {
            let Some(id) = registry.id_for(url) else {
                continue;
            };
            let source = state.sources.get(url);
            let title = source.map(SourceInfo::best_title).filter(|t| !t.is_empty());
            let published = source.and_then(|s| s.scraped.as_ref()).and_then(|c| c.published());
            if let Err(e) = registry.update_metadata(id, title, published) {
                warn!(id, error = %e, "Could not attach citation metadata");
            }
            lines.push(format_reference(id, url, title));
        }
        state.formatted_citations = lines;
        state
    }

    /// Learnings whose source was selected, tagged with its citation id.
    fn cited_learnings<'a>(state: &'a ResearchState, registry: &CitationRegistry) -> Vec<(CitationId, &'a Learning)> {
        state
            .learnings
            .all()
            .iter()
            .filter_map(|l| registry.id_for(&l.source_url).map(|id| (id, l)))
            .collect()
    }

    async fn generate_initial_report(&self, mut state: ResearchState, registry: &CitationRegistry) -> ResearchState {
        let cited = Self::cited_learnings(&state, registry);
        let outcome = if cited.is_empty() {
            Err(AppError::InvalidInput("no cited learnings to report on".to_string()))
        } else {
            let prompt = prompts::report_prompt(
                &state.query,
                &state.plan,
                &prompts::learning_digest(&cited),
                &state.formatted_citations,
            );
            self.ask("initial_report", &prompt)
                .await
                .map(|raw| prompts::strip_title(&prompts::strip_references(&raw)))
        };

        let report = match outcome {
            Ok(report) if !report.trim().is_empty() => report,
            Ok(_) => prompts::fallback_report(&state.query, &cited, state.selected_sources.len()),
            Err(AppError::InvalidInput(_)) => {
                prompts::fallback_report(&state.query, &cited, state.selected_sources.len())
            }
            Err(e) => {
                let report = prompts::fallback_report(&state.query, &cited, state.selected_sources.len());
                state.degrade("Report drafting", &e);
                report
            }
        };
        state.think(format!("Drafted the initial report ({} characters)", report.chars().count()));
        state.initial_report = report;
        state
    }

    async fn enhance_report(&self, mut state: ResearchState, registry: &CitationRegistry) -> ResearchState {
        let cited = Self::cited_learnings(&state, registry);
        if cited.is_empty() {
            state.enhanced_report = state.initial_report.clone();
            return state;
        }
        let prompt = prompts::enhance_prompt(
            &state.query,
            &state.initial_report,
            &prompts::learning_digest(&cited),
        );
        state.enhanced_report = match self.ask("enhance_report", &prompt).await {
            Ok(raw) => {
                let enhanced = prompts::strip_title(&prompts::strip_references(&raw));
                if enhanced.trim().is_empty() {
                    state.initial_report.clone()
                } else {
                    enhanced
                }
            }
            Err(e) => {
                state.degrade("Report enhancement", &e);
                state.initial_report.clone()
            }
        };
        state.think("Enhanced the report");
        state
    }

    async fn expand_key_sections(&self, mut state: ResearchState, registry: &CitationRegistry) -> ResearchState {
        let (preamble, mut sections) = prompts::split_sections(&state.enhanced_report);
        let targets = prompts::largest_sections(&sections, self.settings.expand_sections);
        let cited = Self::cited_learnings(&state, registry);
        if targets.is_empty() || cited.is_empty() {
            state.final_report = state.enhanced_report.clone();
            return state;
        }

        let digest = prompts::learning_digest(&cited);
        let prompts_by_target: Vec<String> = targets
            .iter()
            .map(|&i| prompts::expand_prompt(&state.query, &sections[i].heading, &sections[i].body, &digest))
            .collect();
        let expansions = collect_ordered(
            prompts_by_target
                .iter()
                .map(|prompt| self.ask("expand_section", prompt)),
        )
        .await;

        let mut expanded = 0;
        for (&index, outcome) in targets.iter().zip(expansions) {
            match outcome {
                Ok(raw) => {
                    let body = prompts::strip_leading_heading(&prompts::strip_references(&raw));
                    if !body.is_empty() {
                        sections[index].body = body;
                        expanded += 1;
                    }
                }
                Err(e) => state.degrade(&format!("Expanding \"{}\"", sections[index].heading), &e),
            }
        }

        state.final_report = prompts::join_sections(&preamble, &sections);
        state.think(format!("Expanded {} key sections", expanded));
        state
    }

    fn finalize(&self, mut state: ResearchState, registry: &CitationRegistry) -> ResearchResult {
        let mut body = state.latest_report().trim().to_string();
        if body.is_empty() {
            let cited = Self::cited_learnings(&state, registry);
            body = prompts::fallback_report(&state.query, &cited, state.selected_sources.len());
        }

        let validation = registry.validate(&body);
        let resolved = validation.resolved();
        for (id, context) in marker_contexts(&body) {
            if !resolved.contains(&id) {
                continue;
            }
            if let Some(url) = registry.get_url(id) {
                registry.register(&url, &context);
            }
        }
        if !validation.valid {
            warn!(
                invalid = ?validation.invalid_citations,
                max_valid_id = validation.max_valid_id,
                "Report cites unregistered sources"
            );
            state.think(format!(
                "Citation check: {} markers do not match a source",
                validation.invalid_citations.len()
            ));
        }

        state.final_report = body;
        state.think("Research complete");
        let result = ResearchResult::from_state(state, registry.all_citations(), validation);
        info!(
            query = %result.query,
            sources = result.research_stats.sources_analyzed,
            learnings = result.research_stats.learnings,
            elapsed_secs = result.research_stats.elapsed_seconds,
            "Research finished"
        );
        result
    }
}

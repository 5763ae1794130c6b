//! Fan-out search across engines with caching, retries and a merged result.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::engines::{BingEngine, DuckDuckGoEngine, GoogleEngine, WikipediaEngine};
use super::{dedupe_hits, SearchEngine};
use crate::cache::{cache_key, get_typed, put_typed, ResponseCache};
use crate::types::{AppError, EngineId, Result, SearchHit};
use crate::utils::config::SearchSettings;
use crate::utils::limiter::{collect_ordered, RequestLimiter};
use crate::utils::retry::retry_with_backoff;

/// What happened to one engine during an aggregated search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub engine: EngineId,
    pub from_cache: bool,
    /// Hits returned by this engine before merging
    pub hits: usize,
    pub error: Option<String>,
}

impl EngineReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSearch {
    pub hits: Vec<SearchHit>,
    /// One entry per requested engine, in merge order
    pub reports: Vec<EngineReport>,
}

/// Queries share cache entries when they differ only in case or spacing.
fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub struct SearchAggregator {
    engines: BTreeMap<EngineId, Arc<dyn SearchEngine>>,
    cache: Arc<dyn ResponseCache>,
    limiter: RequestLimiter,
    settings: SearchSettings,
}

impl SearchAggregator {
    /// An aggregator with no engines registered.
    pub fn new(settings: SearchSettings, cache: Arc<dyn ResponseCache>) -> Self {
        Self {
            engines: BTreeMap::new(),
            cache,
            limiter: RequestLimiter::new(settings.max_concurrent),
            settings,
        }
    }

    /// Register every built-in engine with its public endpoint.
    pub fn from_settings(settings: SearchSettings, cache: Arc<dyn ResponseCache>) -> Result<Self> {
        let google = GoogleEngine::new(&settings)?;
        let bing = BingEngine::new(&settings)?;
        let wikipedia = WikipediaEngine::new(&settings)?;
        Ok(Self::new(settings, cache)
            .with_engine(Arc::new(google))
            .with_engine(Arc::new(DuckDuckGoEngine::new()))
            .with_engine(Arc::new(bing))
            .with_engine(Arc::new(wikipedia)))
    }

    /// Register (or replace) the adapter for `engine.id()`.
    pub fn with_engine(mut self, engine: Arc<dyn SearchEngine>) -> Self {
        self.engines.insert(engine.id(), engine);
        self
    }

    pub fn engines(&self) -> impl Iterator<Item = EngineId> + '_ {
        self.engines.keys().copied()
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn limiter(&self) -> &RequestLimiter {
        &self.limiter
    }

    /// Merged, de-duplicated hits from `engines`, at most `max_results`.
    pub async fn search(
        &self,
        query: &str,
        engines: &BTreeSet<EngineId>,
        max_results: usize,
        force_refresh: bool,
    ) -> Vec<SearchHit> {
        self.search_detailed(query, engines, max_results, force_refresh)
            .await
            .hits
    }

    /// Like [`search`](Self::search), also reporting each engine's outcome.
    pub async fn search_detailed(
        &self,
        query: &str,
        engines: &BTreeSet<EngineId>,
        max_results: usize,
        force_refresh: bool,
    ) -> AggregateSearch {
        let query = query.trim();
        if query.is_empty() || engines.is_empty() || max_results == 0 {
            return AggregateSearch::default();
        }

        // BTreeSet iteration is already merge-priority order.
        let outcomes = collect_ordered(
            engines
                .iter()
                .map(|engine| self.search_engine(*engine, query, max_results, force_refresh)),
        )
        .await;

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut merged = Vec::new();
        for (report, hits) in outcomes {
            reports.push(report);
            merged.extend(hits);
        }

        let mut hits = dedupe_hits(merged);
        hits.truncate(max_results);

        let failed = reports.iter().filter(|r| !r.succeeded()).count();
        info!(
            query,
            engines = reports.len(),
            failed,
            hits = hits.len(),
            "Aggregated search"
        );
        AggregateSearch { hits, reports }
    }

    async fn search_engine(
        &self,
        engine: EngineId,
        query: &str,
        max_results: usize,
        force_refresh: bool,
    ) -> (EngineReport, Vec<SearchHit>) {
        let report = |from_cache, hits: &Vec<SearchHit>, error| EngineReport {
            engine,
            from_cache,
            hits: hits.len(),
            error,
        };

        let Some(adapter) = self.engines.get(&engine) else {
            let none = Vec::new();
            return (
                report(false, &none, Some(format!("{} is not configured", engine))),
                none,
            );
        };

        let key = cache_key(
            "search",
            &json!({
                "engine": engine,
                "query": normalize_query(query),
                "max_results": max_results,
            }),
        );
        if !force_refresh {
            if let Some(hits) = get_typed::<Vec<SearchHit>>(self.cache.as_ref(), &key) {
                debug!(%engine, query, "Search cache hit");
                return (report(true, &hits, None), hits);
            }
        }

        let policy = self.settings.retry_policy();
        let outcome = retry_with_backoff(
            &policy,
            engine.as_str(),
            |_| self.attempt(adapter.as_ref(), query, max_results),
            AppError::is_transient,
        )
        .await;

        match outcome {
            Ok(hits) => {
                if let Err(e) = put_typed(self.cache.as_ref(), &key, &hits, self.settings.ttl_secs) {
                    warn!(%engine, error = %e, "Failed to cache search results");
                }
                (report(false, &hits, None), hits)
            }
            Err(e) => {
                warn!(%engine, query, error = %e, "Engine failed");
                let none = Vec::new();
                (report(false, &none, Some(e.to_string())), none)
            }
        }
    }

    /// One request, holding a limiter slot only while it is in flight.
    async fn attempt(
        &self,
        adapter: &dyn SearchEngine,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>> {
        let _permit = self.limiter.acquire().await?;
        let timeout = self.settings.request_timeout();
        tokio::time::timeout(timeout, adapter.search(query, max_results))
            .await
            .unwrap_or_else(|_| {
                Err(AppError::Timeout(format!(
                    "{} did not answer within {} ms",
                    adapter.id(),
                    timeout.as_millis()
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use async_trait::async_trait;

    struct Fixed(EngineId, Vec<&'static str>);

    #[async_trait]
    impl SearchEngine for Fixed {
        fn id(&self) -> EngineId {
            self.0
        }

        async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
            Ok(self
                .1
                .iter()
                .take(max_results)
                .map(|url| SearchHit {
                    url: url.to_string(),
                    title: url.to_string(),
                    snippet: String::new(),
                    engine: self.0,
                })
                .collect())
        }
    }

    fn aggregator() -> SearchAggregator {
        SearchAggregator::new(SearchSettings::default(), Arc::new(MemoryCache::new(16)))
            .with_engine(Arc::new(Fixed(EngineId::Bing, vec!["https://b.example", "https://shared.example/x"])))
            .with_engine(Arc::new(Fixed(EngineId::Google, vec!["https://shared.example/x/", "https://g.example"])))
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  Solid   State\tBatteries "), "solid state batteries");
    }

    #[tokio::test]
    async fn test_merge_uses_engine_priority() {
        let engines = BTreeSet::from([EngineId::Bing, EngineId::Google]);
        let hits = aggregator().search("batteries", &engines, 10, false).await;

        let urls: Vec<_> = hits.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, ["https://shared.example/x/", "https://g.example", "https://b.example"]);
        assert_eq!(hits[0].engine, EngineId::Google);
    }

    #[tokio::test]
    async fn test_unconfigured_engine_is_reported() {
        let engines = BTreeSet::from([EngineId::Google, EngineId::Wikipedia]);
        let result = aggregator().search_detailed("batteries", &engines, 1, false).await;

        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.reports.len(), 2);
        assert!(result.reports[0].succeeded());
        assert!(result.reports[1].error.is_some());
    }

    #[tokio::test]
    async fn test_second_search_comes_from_cache() {
        let aggregator = aggregator();
        let engines = BTreeSet::from([EngineId::Google]);
        let first = aggregator.search_detailed("Batteries", &engines, 5, false).await;
        let second = aggregator.search_detailed("  batteries ", &engines, 5, false).await;
        assert!(!first.reports[0].from_cache);
        assert!(second.reports[0].from_cache);
        assert_eq!(first.hits, second.hits);

        let refreshed = aggregator.search_detailed("batteries", &engines, 5, true).await;
        assert!(!refreshed.reports[0].from_cache);
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        let engines = BTreeSet::from([EngineId::Google]);
        assert!(aggregator().search("   ", &engines, 5, false).await.is_empty());
        assert!(aggregator().search("q", &BTreeSet::new(), 5, false).await.is_empty());
        assert!(aggregator().search("q", &engines, 0, false).await.is_empty());
    }
}

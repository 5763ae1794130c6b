//! Multi-engine web search.
//!
//! Each backend implements [`SearchEngine`]; the [`SearchAggregator`] fans a
//! query out to several engines at once, caches per-engine answers, retries
//! transient failures, and merges everything into one de-duplicated,
//! deterministically ordered hit list.

pub mod aggregator;
pub mod engines;

pub use aggregator::{AggregateSearch, EngineReport, SearchAggregator};
pub use engines::{BingEngine, DuckDuckGoEngine, GoogleEngine, WikipediaEngine};

use std::collections::HashSet;

use async_trait::async_trait;

use crate::types::{EngineId, Result, SearchHit};

/// A single search backend.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn id(&self) -> EngineId;

    /// Return up to `max_results` hits for `query`.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// URL identity used for de-duplication.
///
/// Scheme, host, port and path are kept (host lowercased, `www.` kept,
/// trailing slash and fragment dropped). The query string only counts when
/// the path is empty, since `/?p=42` style URLs identify different pages.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = url::Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_ascii_lowercase();
    };

    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
    let path = parsed.path().trim_end_matches('/');

    let mut key = format!("{}://{}{}{}", parsed.scheme(), host, port, path);
    if path.is_empty() {
        if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
            key.push('?');
            key.push_str(query);
        }
    }
    key
}

/// Keep the first hit for each normalized URL, preserving order.
pub fn dedupe_hits(hits: impl IntoIterator<Item = SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| !hit.url.trim().is_empty() && seen.insert(normalize_url(&hit.url)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://Example.com/Docs/", "https://example.com/Docs")]
    #[case("https://example.com/a?utm_source=x#top", "https://example.com/a")]
    #[case("https://example.com/?p=42", "https://example.com?p=42")]
    #[case("https://example.com", "https://example.com")]
    #[case("http://example.com:8080/x", "http://example.com:8080/x")]
    #[case("not a url/", "not a url")]
    fn test_normalize_url(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_url(raw), expected);
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let hit = |url: &str, engine| SearchHit {
            url: url.to_string(),
            title: url.to_string(),
            snippet: String::new(),
            engine,
        };
        let merged = dedupe_hits(vec![
            hit("https://a.example/page", EngineId::Google),
            hit("https://a.example/page/?ref=ddg", EngineId::DuckDuckGo),
            hit("https://b.example/", EngineId::DuckDuckGo),
            hit("", EngineId::Bing),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].engine, EngineId::Google);
        assert_eq!(merged[1].url, "https://b.example/");
    }
}

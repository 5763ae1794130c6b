//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod mocks;

use std::sync::Arc;

use fathom::cache::MemoryCache;
use fathom::scrape::Scraper;
use fathom::search::{SearchAggregator, SearchEngine};
use fathom::types::EngineId;
use fathom::utils::config::{ResearchSettings, ScraperSettings, SearchSettings};

/// Search settings with a single engine and near-zero retry delays.
pub fn search_settings(engine: EngineId) -> SearchSettings {
    SearchSettings {
        engines: vec![engine],
        rotate_wikipedia: false,
        max_retries: 2,
        retry_base_delay_ms: 1,
        request_timeout_secs: 5,
        ..Default::default()
    }
}

pub fn scraper_settings() -> ScraperSettings {
    ScraperSettings {
        max_retries: 1,
        retry_base_delay_ms: 1,
        ..Default::default()
    }
}

pub fn research_settings(depth: u32, breadth: usize) -> ResearchSettings {
    ResearchSettings {
        depth,
        breadth,
        llm_retries: 0,
        llm_retry_delay_ms: 1,
        ..Default::default()
    }
}

pub fn aggregator(engine: Arc<dyn SearchEngine>) -> Arc<SearchAggregator> {
    let settings = search_settings(engine.id());
    Arc::new(SearchAggregator::new(settings, Arc::new(MemoryCache::new(64))).with_engine(engine))
}

pub fn scraper() -> Arc<Scraper> {
    Arc::new(Scraper::new(scraper_settings(), Arc::new(MemoryCache::new(64))).expect("scraper builds"))
}

/// A readable article page.
pub fn article_html(title: &str, paragraphs: &[&str]) -> String {
    let body: String = paragraphs.iter().map(|p| format!("<p>{}</p>", p)).collect();
    format!(
        "<html><head><title>{title}</title>\
         <meta name=\"description\" content=\"{title}\"></head>\
         <body><nav>Home | About | Contact us</nav>\
         <article>{body}</article>\
         <footer>Copyright notice for the site</footer></body></html>"
    )
}

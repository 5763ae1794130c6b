//! Web content retrieval.
//!
//! [`Scraper`] turns URLs into cleaned [`ScrapedContent`]:
//!
//! 1. reject anything that is not `http(s)`
//! 2. answer from the cache when possible
//! 3. optionally render through a headless-browser service, falling back to
//!    one static fetch if rendering fails
//! 4. fetch with a per-domain adaptive timeout, retrying transient failures
//! 5. refuse non-text content types, extract main content from HTML
//!
//! Every attempt, successful or not, is folded into the shared
//! [`DomainReliability`] statistics that drive the timeouts in step 4.
//! Outbound requests are bounded by a [`RequestLimiter`].

pub mod domain;
pub mod extract;
pub mod render;

pub use domain::{Attempt, DomainReliability, DomainStat, TimeoutPolicy};
pub use render::{PageRenderer, RenderService, RenderedPage};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, get_typed, put_typed, ResponseCache};
use crate::types::{AppError, RenderMode, Result, ScrapedContent};
use crate::utils::config::ScraperSettings;
use crate::utils::limiter::{collect_ordered, RequestLimiter};
use crate::utils::retry::retry_with_backoff;
use extract::{bound_length, extract_page, normalize_text};

/// Typed failure of a single URL fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("body of {0} bytes exceeds the size limit")]
    TooLarge(u64),

    #[error("no readable content")]
    EmptyContent,

    #[error("render failed: {0}")]
    Render(String),
}

impl FetchError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

fn network_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(0)
    } else {
        FetchError::Network(e.to_string())
    }
}

/// Per-call fetch switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub prefer_dynamic: bool,
    pub force_refresh: bool,
}

struct FetchedPage {
    status: u16,
    content_type: String,
    body: String,
}

/// Check that `url` is an absolute http(s) URL.
pub fn validate_url(url: &str) -> std::result::Result<String, FetchError> {
    let trimmed = url.trim();
    match url::Url::parse(trimmed) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some() => {
            Ok(trimmed.to_string())
        }
        _ => Err(FetchError::InvalidUrl(url.to_string())),
    }
}

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/html")
        || content_type.starts_with("application/xhtml+xml")
        || content_type.starts_with("text/plain")
}

pub struct Scraper {
    client: reqwest::Client,
    settings: ScraperSettings,
    domains: Arc<DomainReliability>,
    cache: Arc<dyn ResponseCache>,
    limiter: RequestLimiter,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl Scraper {
    pub fn new(settings: ScraperSettings, cache: Arc<dyn ResponseCache>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let renderer: Option<Arc<dyn PageRenderer>> = settings
            .renderer_url
            .as_ref()
            .map(|endpoint| Arc::new(RenderService::new(client.clone(), endpoint)) as Arc<dyn PageRenderer>);

        Ok(Self {
            domains: Arc::new(DomainReliability::new(TimeoutPolicy::from(&settings))),
            limiter: RequestLimiter::new(settings.max_concurrent),
            client,
            settings,
            cache,
            renderer,
        })
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Share domain statistics with other scrapers (or inspect them in tests).
    pub fn with_domain_stats(mut self, domains: Arc<DomainReliability>) -> Self {
        self.domains = domains;
        self
    }

    pub fn domains(&self) -> &Arc<DomainReliability> {
        &self.domains
    }

    pub fn limiter(&self) -> &RequestLimiter {
        &self.limiter
    }

    /// Fetch one URL, using the cache when possible.
    pub async fn fetch(
        &self,
        url: &str,
        prefer_dynamic: bool,
    ) -> std::result::Result<ScrapedContent, FetchError> {
        self.fetch_with(
            url,
            FetchOptions {
                prefer_dynamic,
                force_refresh: false,
            },
        )
        .await
    }

    pub async fn fetch_with(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> std::result::Result<ScrapedContent, FetchError> {
        let url = validate_url(url)?;
        let key = cache_key("scrape", &json!({ "url": url }));

        if !options.force_refresh {
            if let Some(hit) = get_typed::<ScrapedContent>(self.cache.as_ref(), &key) {
                debug!(url = %url, "Scrape cache hit");
                return Ok(hit);
            }
        }

        let content = if options.prefer_dynamic {
            match self.fetch_dynamic(&url).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(url = %url, error = %e, "Dynamic render failed, falling back to static fetch");
                    self.fetch_static(&url).await?
                }
            }
        } else {
            self.fetch_static(&url).await?
        };

        if let Err(e) = put_typed(self.cache.as_ref(), &key, &content, self.settings.ttl_secs) {
            warn!(url = %url, error = %e, "Failed to cache scraped content");
        }
        Ok(content)
    }

    /// Fetch many URLs concurrently.
    ///
    /// Output order matches `urls`; duplicate URLs are fetched once and
    /// share the outcome. A failed URL never affects the others.
    pub async fn fetch_many(
        &self,
        urls: &[String],
        prefer_dynamic: bool,
    ) -> Vec<(String, std::result::Result<ScrapedContent, FetchError>)> {
        let mut unique: Vec<&str> = Vec::new();
        let mut position: HashMap<&str, usize> = HashMap::new();
        let slots: Vec<usize> = urls
            .iter()
            .map(|url| {
                *position.entry(url.as_str()).or_insert_with(|| {
                    unique.push(url.as_str());
                    unique.len() - 1
                })
            })
            .collect();

        let results = collect_ordered(unique.iter().map(|url| self.fetch(url, prefer_dynamic))).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        info!(requested = urls.len(), unique = unique.len(), succeeded, "Fetched batch");

        urls.iter()
            .zip(slots)
            .map(|(url, slot)| (url.clone(), results[slot].clone()))
            .collect()
    }

    async fn fetch_dynamic(&self, url: &str) -> std::result::Result<ScrapedContent, FetchError> {
        let Some(renderer) = self.renderer.as_ref() else {
            return Err(FetchError::Render("no rendering service configured".to_string()));
        };

        let timeout = self.domains.timeout_for(url);
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let started = Instant::now();
        let rendered = tokio::time::timeout(timeout, renderer.render(url, timeout))
            .await
            .unwrap_or_else(|_| Err(FetchError::Timeout(timeout.as_millis() as u64)));
        let latency = started.elapsed();

        let page = match rendered {
            Ok(page) => {
                self.domains.record(url, Attempt::success(latency, page.status));
                page
            }
            Err(e) => {
                let attempt = match e {
                    FetchError::Timeout(_) => Attempt::timeout(latency),
                    _ => Attempt::failure(latency, e.status()),
                };
                self.domains.record(url, attempt);
                return Err(e);
            }
        };

        let extracted = extract_page(&page.html);
        if extracted.text.is_empty() {
            return Err(FetchError::EmptyContent);
        }
        Ok(ScrapedContent {
            url: url.to_string(),
            final_title: extracted.title,
            main_text: extracted.text,
            raw_html: self.settings.keep_raw_html.then_some(page.html),
            fetched_at: Utc::now(),
            render_mode: RenderMode::Dynamic,
            content_type: "text/html".to_string(),
            metadata: extracted.metadata,
        })
    }

    async fn fetch_static(&self, url: &str) -> std::result::Result<ScrapedContent, FetchError> {
        let policy = self.settings.retry_policy();
        let page = retry_with_backoff(
            &policy,
            "scrape",
            |_| self.fetch_static_once(url),
            FetchError::is_transient,
        )
        .await?;

        let (title, text, metadata) = if page.content_type.starts_with("text/plain") {
            (String::new(), bound_length(normalize_text(&page.body)), BTreeMap::new())
        } else {
            let extracted = extract_page(&page.body);
            (extracted.title, extracted.text, extracted.metadata)
        };
        if text.is_empty() {
            return Err(FetchError::EmptyContent);
        }

        Ok(ScrapedContent {
            url: url.to_string(),
            final_title: title,
            main_text: text,
            raw_html: self.settings.keep_raw_html.then_some(page.body),
            fetched_at: Utc::now(),
            render_mode: RenderMode::Static,
            content_type: page.content_type,
            metadata,
        })
    }

    async fn fetch_static_once(&self, url: &str) -> std::result::Result<FetchedPage, FetchError> {
        let timeout = self.domains.timeout_for(url);
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.get_page(url)).await;
        let latency = started.elapsed();

        match outcome {
            Err(_) => {
                self.domains.record(url, Attempt::timeout(latency));
                Err(FetchError::Timeout(timeout.as_millis() as u64))
            }
            Ok(Err(FetchError::Timeout(_))) => {
                self.domains.record(url, Attempt::timeout(latency));
                Err(FetchError::Timeout(timeout.as_millis() as u64))
            }
            Ok(Err(e)) => {
                self.domains.record(url, Attempt::failure(latency, e.status()));
                Err(e)
            }
            Ok(Ok(page)) => {
                self.domains.record(url, Attempt::success(latency, page.status));
                Ok(page)
            }
        }
    }

    async fn get_page(&self, url: &str) -> std::result::Result<FetchedPage, FetchError> {
        let response = self.client.get(url).send().await.map_err(network_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .trim()
            .to_ascii_lowercase();
        if !is_textual(&content_type) {
            return Err(FetchError::UnsupportedContentType(content_type));
        }

        let limit = self.settings.max_body_bytes;
        if let Some(declared) = response.content_length().filter(|&len| len > limit as u64) {
            return Err(FetchError::TooLarge(declared));
        }
        let body = read_bounded(response, limit).await?;
        Ok(FetchedPage {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

/// Read at most `limit` bytes of the body, decoding lossily as UTF-8.
async fn read_bounded(
    mut response: reqwest::Response,
    limit: usize,
) -> std::result::Result<String, FetchError> {
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(network_error)? {
        let room = limit - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            debug!(limit, "Truncated response body");
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

//! Search engine adapters.
//!
//! DuckDuckGo goes through `daedra`; Google and Bing result pages are parsed
//! with CSS selectors; Wikipedia answers through its OpenSearch JSON API.
//! HTML layouts drift, so each adapter tries a short list of selectors and
//! keeps the first that yields results.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::SearchEngine;
use crate::types::{AppError, EngineId, Result, SearchHit};
use crate::utils::config::SearchSettings;

fn http_client(settings: &SearchSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.request_timeout())
        .build()
        .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef) -> String {
    clean(&element.text().collect::<Vec<_>>().join(" "))
}

/// Selectors describing one result-page layout.
struct Layout {
    container: &'static str,
    link: &'static str,
    title: Option<&'static str>,
    snippet: &'static str,
}

/// Google wraps outbound links as `/url?q=<target>&...` on some layouts.
fn unwrap_redirect(href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if href.starts_with("/url?") {
        let parsed = url::Url::parse(&format!("https://redirect.invalid{}", href)).ok()?;
        return parsed
            .query_pairs()
            .find(|(k, _)| k == "q" || k == "url")
            .map(|(_, v)| v.into_owned())
            .filter(|v| v.starts_with("http"));
    }
    None
}

fn parse_result_page(html: &str, layouts: &[Layout], engine: EngineId, max_results: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    for layout in layouts {
        let (Ok(container), Ok(link)) = (Selector::parse(layout.container), Selector::parse(layout.link)) else {
            continue;
        };
        let title_sel = layout.title.and_then(|css| Selector::parse(css).ok());
        let snippet_sel = Selector::parse(layout.snippet).ok();

        let hits: Vec<SearchHit> = document
            .select(&container)
            .filter_map(|block| {
                let anchor = block.select(&link).next()?;
                let url = unwrap_redirect(anchor.value().attr("href")?)?;
                let title = title_sel
                    .as_ref()
                    .and_then(|sel| block.select(sel).next())
                    .map(element_text)
                    .unwrap_or_else(|| element_text(anchor));
                let snippet = snippet_sel
                    .as_ref()
                    .and_then(|sel| block.select(sel).next())
                    .map(element_text)
                    .unwrap_or_default();
                (!title.is_empty()).then_some(SearchHit {
                    url,
                    title,
                    snippet,
                    engine,
                })
            })
            .take(max_results)
            .collect();

        if !hits.is_empty() {
            return hits;
        }
    }
    Vec::new()
}

// ============= Google =============

const GOOGLE_LAYOUTS: &[Layout] = &[
    Layout {
        container: "div.g",
        link: "a[href]",
        title: Some("h3"),
        snippet: "div.VwiC3b, span.aCOpRe, div[data-sncf]",
    },
    Layout {
        container: "div.tF2Cxc, div.MjjYud",
        link: "a[href]",
        title: Some("h3"),
        snippet: "div.VwiC3b",
    },
];

pub struct GoogleEngine {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleEngine {
    pub fn new(settings: &SearchSettings) -> Result<Self> {
        Self::with_base_url(settings, "https://www.google.com")
    }

    pub fn with_base_url(settings: &SearchSettings, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(settings)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl SearchEngine for GoogleEngine {
    fn id(&self) -> EngineId {
        EngineId::Google
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let html = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", query),
                ("num", max_results.to_string().as_str()),
                ("hl", "en"),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let hits = parse_result_page(&html, GOOGLE_LAYOUTS, EngineId::Google, max_results);
        debug!(engine = "google", query, count = hits.len(), "Parsed results");
        Ok(hits)
    }
}

// ============= Bing =============

const BING_LAYOUTS: &[Layout] = &[
    Layout {
        container: "li.b_algo",
        link: "h2 a[href]",
        title: None,
        snippet: ".b_caption p, p",
    },
    Layout {
        container: ".b_algo",
        link: ".b_title a[href], a[href^='http']",
        title: None,
        snippet: "p",
    },
];

pub struct BingEngine {
    client: reqwest::Client,
    base_url: String,
}

impl BingEngine {
    pub fn new(settings: &SearchSettings) -> Result<Self> {
        Self::with_base_url(settings, "https://www.bing.com")
    }

    pub fn with_base_url(settings: &SearchSettings, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(settings)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl SearchEngine for BingEngine {
    fn id(&self) -> EngineId {
        EngineId::Bing
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let html = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("count", max_results.to_string().as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let hits = parse_result_page(&html, BING_LAYOUTS, EngineId::Bing, max_results);
        debug!(engine = "bing", query, count = hits.len(), "Parsed results");
        Ok(hits)
    }
}

// ============= Wikipedia =============

pub struct WikipediaEngine {
    client: reqwest::Client,
    base_url: String,
}

impl WikipediaEngine {
    pub fn new(settings: &SearchSettings) -> Result<Self> {
        Self::with_base_url(settings, "https://en.wikipedia.org")
    }

    pub fn with_base_url(settings: &SearchSettings, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(settings)?,
            base_url: base_url.into(),
        })
    }
}

/// Decode an OpenSearch reply: `[query, [titles], [descriptions], [urls]]`.
fn parse_opensearch(body: &serde_json::Value, max_results: usize) -> Result<Vec<SearchHit>> {
    let column = |i: usize| -> Result<Vec<String>> {
        let values = body
            .get(i)
            .and_then(|v| v.as_array())
            .ok_or_else(|| AppError::Parse(format!("OpenSearch reply missing column {}", i)))?;
        Ok(values
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect())
    };
    let (titles, descriptions, urls) = (column(1)?, column(2)?, column(3)?);

    Ok(titles
        .into_iter()
        .zip(urls)
        .enumerate()
        .filter(|(_, (_, url))| !url.is_empty())
        .map(|(i, (title, url))| SearchHit {
            url,
            title,
            snippet: descriptions.get(i).cloned().unwrap_or_default(),
            engine: EngineId::Wikipedia,
        })
        .take(max_results)
        .collect())
}

#[async_trait]
impl SearchEngine for WikipediaEngine {
    fn id(&self) -> EngineId {
        EngineId::Wikipedia
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let body: serde_json::Value = self
            .client
            .get(format!("{}/w/api.php", self.base_url))
            .query(&[
                ("action", "opensearch"),
                ("search", query),
                ("limit", max_results.to_string().as_str()),
                ("namespace", "0"),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_opensearch(&body, max_results)
    }
}

// ============= DuckDuckGo =============

/// DuckDuckGo through the `daedra` search backend.
#[derive(Debug, Default)]
pub struct DuckDuckGoEngine;

impl DuckDuckGoEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SearchEngine for DuckDuckGoEngine {
    fn id(&self) -> EngineId {
        EngineId::DuckDuckGo
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let search_args = daedra::SearchArgs {
            query: query.to_string(),
            options: Some(daedra::SearchOptions {
                num_results: max_results,
                ..Default::default()
            }),
        };

        let response = daedra::tools::search::perform_search(&search_args)
            .await
            .map_err(|e| AppError::Network(format!("DuckDuckGo search failed: {}", e)))?;

        Ok(response
            .data
            .iter()
            .filter(|r| r.url.starts_with("http"))
            .take(max_results)
            .map(|r| SearchHit {
                url: r.url.clone(),
                title: clean(&r.title),
                snippet: clean(&r.description),
                engine: EngineId::DuckDuckGo,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_google_layout() {
        let html = r#"<html><body>
            <div class="g"><a href="https://www.rust-lang.org/"><h3>Rust Programming Language</h3></a>
              <div class="VwiC3b">A language empowering everyone.</div></div>
            <div class="g"><a href="/url?q=https://doc.rust-lang.org/book/&amp;sa=U"><h3>The Book</h3></a></div>
            <div class="g"><a href="/search?q=related"><h3>Related searches</h3></a></div>
        </body></html>"#;
        let hits = parse_result_page(html, GOOGLE_LAYOUTS, EngineId::Google, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Rust Programming Language");
        assert_eq!(hits[0].snippet, "A language empowering everyone.");
        assert_eq!(hits[1].url, "https://doc.rust-lang.org/book/");
    }

    #[test]
    fn test_bing_layout_respects_max() {
        let html = r#"<ol>
            <li class="b_algo"><h2><a href="https://a.example">Alpha</a></h2><div class="b_caption"><p>First</p></div></li>
            <li class="b_algo"><h2><a href="https://b.example">Beta</a></h2><p>Second</p></li>
            <li class="b_algo"><h2><a href="https://c.example">Gamma</a></h2></li>
        </ol>"#;
        let hits = parse_result_page(html, BING_LAYOUTS, EngineId::Bing, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet, "First");
        assert_eq!(hits[1].title, "Beta");
    }

    #[test]
    fn test_parse_opensearch() {
        let body = json!([
            "rust",
            ["Rust (programming language)", "Rust"],
            ["A systems language", ""],
            ["https://en.wikipedia.org/wiki/Rust_(programming_language)", "https://en.wikipedia.org/wiki/Rust"]
        ]);
        let hits = parse_opensearch(&body, 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet, "A systems language");
        assert_eq!(hits[1].engine, EngineId::Wikipedia);

        assert!(parse_opensearch(&json!({"error": "x"}), 5).is_err());
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::scrape::FetchError;

// ============= Search Types =============

/// Search backends, declared in merge priority order.
///
/// The derived `Ord` is the deterministic order in which per-engine results
/// are merged, so earlier variants win URL collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineId {
    Google,
    DuckDuckGo,
    Bing,
    Wikipedia,
}

impl EngineId {
    pub const ALL: [EngineId; 4] = [
        EngineId::Google,
        EngineId::DuckDuckGo,
        EngineId::Bing,
        EngineId::Wikipedia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Google => "google",
            EngineId::DuckDuckGo => "duckduckgo",
            EngineId::Bing => "bing",
            EngineId::Wikipedia => "wikipedia",
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(EngineId::Google),
            "duckduckgo" | "ddg" => Ok(EngineId::DuckDuckGo),
            "bing" => Ok(EngineId::Bing),
            "wikipedia" | "wiki" => Ok(EngineId::Wikipedia),
            other => Err(AppError::InvalidInput(format!("Unknown search engine: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub engine: EngineId,
}

// ============= Content Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Static,
    Dynamic,
}

/// Cleaned page content produced by the scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub url: String,
    pub final_title: String,
    pub main_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub render_mode: RenderMode,
    #[serde(default)]
    pub content_type: String,
    /// `<meta>` name/property values (description, author, og:title, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ScrapedContent {
    /// Publication date advertised by the page, if any.
    pub fn published(&self) -> Option<&str> {
        ["article:published_time", "date", "dc.date", "publish_date", "pubdate"]
            .iter()
            .find_map(|key| self.metadata.get(*key))
            .map(String::as_str)
    }
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Citation error: {0}")]
    Citation(#[from] fathom_citations::CitationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::Timeout(_) | AppError::LLM(_) => true,
            AppError::Http { status, .. } => *status == 429 || *status >= 500,
            AppError::Fetch(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            AppError::Http {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            AppError::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

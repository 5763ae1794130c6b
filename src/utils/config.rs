//! TOML-based configuration for Fathom
//!
//! Every field has a default, so an empty (or missing) `fathom.toml` yields a
//! working setup against a local Ollama server. API keys are never stored in
//! the file: `[llm] api_key_env` names the environment variable to read, and
//! a `.env` file is loaded first when present.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::llm::Provider;
use crate::types::{AppError, EngineId, Result};
use crate::utils::retry::RetryPolicy;

/// Root configuration structure loaded from fathom.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FathomConfig {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub scraper: ScraperSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub research: ResearchSettings,
    #[serde(default)]
    pub quick: QuickSearchSettings,
}

// ============= LLM Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAI,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key (OpenAI only)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Ollama
}

fn default_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_llm_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl LlmSettings {
    /// Resolve into a concrete provider, reading the API key from the environment.
    pub fn provider(&self) -> Result<Provider> {
        match self.provider {
            ProviderKind::Ollama => Ok(Provider::Ollama {
                base_url: self.base_url.clone(),
                model: self.model.clone(),
            }),
            ProviderKind::OpenAI => {
                let api_key = std::env::var(&self.api_key_env).map_err(|_| {
                    AppError::Configuration(format!(
                        "Environment variable '{}' referenced in config is not set",
                        self.api_key_env
                    ))
                })?;
                Ok(Provider::OpenAI {
                    api_key,
                    api_base: self.base_url.clone(),
                    model: self.model.clone(),
                })
            }
        }
    }
}

// ============= Search Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_engines")]
    pub engines: Vec<EngineId>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Outbound request slots shared by all engines
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_search_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Add Wikipedia to every other subquery's engine set
    #[serde(default = "default_true")]
    pub rotate_wikipedia: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_search_user_agent")]
    pub user_agent: String,
}

fn default_engines() -> Vec<EngineId> {
    vec![EngineId::Google, EngineId::DuckDuckGo]
}

fn default_max_results() -> usize {
    10
}

fn default_max_concurrent() -> usize {
    5
}

fn default_search_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    86_400
}

fn default_search_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
        .to_string()
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            engines: default_engines(),
            max_results: default_max_results(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_search_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            rotate_wikipedia: default_true(),
            ttl_secs: default_ttl_secs(),
            user_agent: default_search_user_agent(),
        }
    }
}

impl SearchSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_delay_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============= Scraper Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Timeout for domains with no usable history
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_scrape_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_search_user_agent")]
    pub user_agent: String,
    /// Rendering service endpoint for JavaScript-heavy pages
    #[serde(default)]
    pub renderer_url: Option<String>,
    #[serde(default)]
    pub keep_raw_html: bool,
    /// Bodies declared larger than this are refused; longer streams are cut off
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_min_timeout_ms() -> u64 {
    5_000
}

fn default_max_timeout_ms() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_scrape_retries() -> u32 {
    1
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            default_timeout_ms: default_timeout_ms(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            max_retries: default_scrape_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            user_agent: default_search_user_agent(),
            renderer_url: None,
            keep_raw_html: false,
            max_body_bytes: default_max_body_bytes(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl ScraperSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_delay_ms))
    }
}

// ============= Cache Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    /// Maximum entries held by the memory backend
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::File
}

fn default_cache_dir() -> String {
    ".fathom-cache".to_string()
}

fn default_cache_capacity() -> usize {
    1024
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            backend: default_cache_backend(),
            dir: default_cache_dir(),
            capacity: default_cache_capacity(),
        }
    }
}

// ============= Research Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSettings {
    /// Maximum number of follow-up rounds after the first
    #[serde(default = "default_depth")]
    pub depth: u32,
    /// Subqueries generated per round
    #[serde(default = "default_breadth")]
    pub breadth: usize,
    #[serde(default = "default_max_urls_per_query")]
    pub max_urls_per_query: usize,
    #[serde(default = "default_max_selected_sources")]
    pub max_selected_sources: usize,
    /// Above this many analysed sources the model picks the report's sources
    #[serde(default = "default_selection_threshold")]
    pub selection_threshold: usize,
    #[serde(default = "default_llm_retries")]
    pub llm_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub llm_retry_delay_ms: u64,
    /// Model calls allowed in flight at once
    #[serde(default = "default_max_concurrent_llm")]
    pub max_concurrent_llm: usize,
    /// Number of report sections to expand in the last drafting pass
    #[serde(default = "default_expand_sections")]
    pub expand_sections: usize,
    #[serde(default)]
    pub prefer_dynamic: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_depth() -> u32 {
    2
}

fn default_breadth() -> usize {
    4
}

fn default_max_urls_per_query() -> usize {
    3
}

fn default_max_selected_sources() -> usize {
    20
}

fn default_selection_threshold() -> usize {
    25
}

fn default_llm_retries() -> u32 {
    2
}

fn default_max_concurrent_llm() -> usize {
    3
}

fn default_expand_sections() -> usize {
    2
}

fn default_output_dir() -> String {
    "reports".to_string()
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            breadth: default_breadth(),
            max_urls_per_query: default_max_urls_per_query(),
            max_selected_sources: default_max_selected_sources(),
            selection_threshold: default_selection_threshold(),
            llm_retries: default_llm_retries(),
            llm_retry_delay_ms: default_retry_base_delay_ms(),
            max_concurrent_llm: default_max_concurrent_llm(),
            expand_sections: default_expand_sections(),
            prefer_dynamic: false,
            output_dir: default_output_dir(),
        }
    }
}

impl ResearchSettings {
    pub fn llm_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.llm_retries, Duration::from_millis(self.llm_retry_delay_ms))
    }
}

// ============= Quick Search Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickSearchSettings {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Top results read in full before summarising
    #[serde(default = "default_quick_pages")]
    pub max_pages: usize,
    /// Ask for an in-depth answer rather than a brief one
    #[serde(default)]
    pub detailed: bool,
}

fn default_quick_pages() -> usize {
    3
}

impl Default for QuickSearchSettings {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            max_pages: default_quick_pages(),
            detailed: false,
        }
    }
}

// ============= Loading =============

impl FathomConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    ///
    /// Also loads `.env` into the process environment (missing file is fine).
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Ok(env_path) = dotenvy::dotenv() {
            debug!(path = %env_path.display(), "Loaded .env");
        }
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: FathomConfig = toml::from_str(content)
            .map_err(|e| AppError::Configuration(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Configuration(format!("Failed to render TOML: {}", e)))
    }

    /// Reject settings a research run cannot execute with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(AppError::Configuration(msg.to_string()));

        if self.research.breadth == 0 {
            return invalid("research.breadth must be at least 1");
        }
        if self.research.max_urls_per_query == 0 {
            return invalid("research.max_urls_per_query must be at least 1");
        }
        if self.research.max_selected_sources == 0 {
            return invalid("research.max_selected_sources must be at least 1");
        }
        if self.search.engines.is_empty() {
            return invalid("search.engines must name at least one engine");
        }
        if self.quick.max_results == 0 {
            return invalid("quick.max_results must be at least 1");
        }
        if self.search.max_results == 0 {
            return invalid("search.max_results must be at least 1");
        }
        if self.search.max_concurrent == 0
            || self.scraper.max_concurrent == 0
            || self.research.max_concurrent_llm == 0
        {
            return invalid("max_concurrent must be at least 1");
        }
        if self.scraper.min_timeout_ms == 0 || self.scraper.min_timeout_ms > self.scraper.max_timeout_ms {
            return invalid("scraper timeouts must satisfy 0 < min_timeout_ms <= max_timeout_ms");
        }
        if self.scraper.max_body_bytes == 0 {
            return invalid("scraper.max_body_bytes must be at least 1");
        }
        if self.llm.model.trim().is_empty() {
            return invalid("llm.model must not be empty");
        }
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.research.output_dir)
    }
}

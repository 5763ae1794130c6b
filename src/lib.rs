//! # Fathom - iterative research with cited reports
//!
//! Fathom turns one question into a Markdown report in which every claim
//! points at a numbered source. A run plans the research, then repeatedly
//! reflects on what it knows, generates new subqueries, searches several
//! engines, reads the best pages and extracts categorized learnings. Once the
//! rounds are spent it selects the strongest sources, registers them as
//! citations and drafts, enhances and expands the report.
//!
//! ## Overview
//!
//! Fathom can be used in two ways:
//!
//! 1. **As a CLI** - Run the `fathom` binary (`fathom research "..."`)
//! 2. **As a library** - Embed the [`ResearchOrchestrator`] in your own project
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fathom::{cache, FathomConfig, ResearchOrchestrator, Scraper, SearchAggregator};
//!
//! #[tokio::main]
//! async fn main() -> fathom::Result<()> {
//!     let config = FathomConfig::load_or_default("fathom.toml")?;
//!     let cache = cache::from_settings(&config.cache)?;
//!
//!     let llm = config.llm.provider()?.create_client()?;
//!     let search = Arc::new(SearchAggregator::from_settings(config.search.clone(), cache.clone())?);
//!     let scraper = Arc::new(Scraper::new(config.scraper.clone(), cache)?);
//!
//!     let result = ResearchOrchestrator::new(llm, search, scraper, config.research.clone())
//!         .run("How do solid-state batteries fail?")
//!         .await;
//!     result.save("reports/batteries.md")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama local inference (default) |
//! | `openai` | OpenAI API and compatible endpoints |
//!
//! ## Modules
//!
//! - [`research`] - Stage machine, orchestrator, prompts and results
//! - [`search`] - Engine adapters and the multi-engine aggregator
//! - [`scrape`] - Page fetching with per-domain adaptive timeouts
//! - [`knowledge`] - Deduplicated learnings
//! - [`cache`] - Response cache backends
//! - [`llm`] - Text generation clients
//! - [`types`] - Shared types and error handling
//!
//! Citations live in the `fathom-citations` workspace crate.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Response cache with TTL (memory, file and no-op backends).
pub mod cache;
/// Command-line interface definitions and output helpers.
pub mod cli;
/// Learnings extracted from sources.
pub mod knowledge;
/// LLM provider clients and abstractions.
pub mod llm;
/// Research runs: stages, orchestration and results.
pub mod research;
/// Page fetching and content extraction.
pub mod scrape;
/// Web search engines and result aggregation.
pub mod search;
/// Core types (search hits, scraped pages, errors).
pub mod types;
/// Configuration, retry and concurrency utilities.
pub mod utils;

// Re-export commonly used types
pub use fathom_citations::{Citation, CitationRegistry, ValidationReport};
pub use knowledge::{KnowledgeStore, Learning};
pub use llm::{LLMClient, Provider};
pub use research::{ResearchOrchestrator, ResearchResult, ResearchState, Stage};
pub use scrape::Scraper;
pub use search::{SearchAggregator, SearchEngine};
pub use types::{AppError, Result};
pub use utils::config::FathomConfig;

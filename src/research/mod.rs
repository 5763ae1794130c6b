//! Iterative research runs.
//!
//! A run starts from a single question and moves through a fixed set of
//! [`Stage`]s: plan, then rounds of reflect / generate queries / search /
//! score / extract learnings, then select sources, cite and write the report.
//!
//! [`QuickSearcher`] is the one-pass alternative: search once, read the top
//! results and write a single cited summary.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use fathom::research::ResearchOrchestrator;
//!
//! let orchestrator = ResearchOrchestrator::new(llm, search, scraper, config.research.clone());
//! let result = orchestrator
//!     .run("What limits the energy density of solid-state batteries?")
//!     .await;
//!
//! println!("{}", result.to_markdown(false));
//! result.save("reports/batteries.json")?;
//! ```

pub mod machine;
pub mod orchestrator;
pub mod prompts;
pub mod quick;
pub mod result;
pub mod state;

pub use machine::Stage;
pub use orchestrator::{ProgressCallback, ProgressUpdate, ResearchOrchestrator};
pub use quick::{QuickSearchResult, QuickSearcher, QuickSource};
pub use result::{CitationStats, ResearchResult, ResearchStats};
pub use state::{ContentAnalysis, FailureCounters, ResearchState, SourceInfo};

//! Research stages and the transition function between them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::state::ResearchState;

/// Every stage a research run passes through.
///
/// ```text
/// Init -> Reflect -> GenerateQueries -> Search -> ScoreSources -> ExtractLearnings
///           ^                                                          |
///           +------------- iteration < depth && new queries -----------+
///                                                                      |
/// SelectTopSources <---------------------------------------------------+
///   -> FormatCitations -> GenerateInitialReport -> EnhanceReport
///   -> ExpandKeySections -> Finalize
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Reflect,
    GenerateQueries,
    Search,
    ScoreSources,
    ExtractLearnings,
    SelectTopSources,
    FormatCitations,
    GenerateInitialReport,
    EnhanceReport,
    ExpandKeySections,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Reflect => "reflect",
            Stage::GenerateQueries => "generate_queries",
            Stage::Search => "search",
            Stage::ScoreSources => "score_sources",
            Stage::ExtractLearnings => "extract_learnings",
            Stage::SelectTopSources => "select_top_sources",
            Stage::FormatCitations => "format_citations",
            Stage::GenerateInitialReport => "generate_initial_report",
            Stage::EnhanceReport => "enhance_report",
            Stage::ExpandKeySections => "expand_key_sections",
            Stage::Finalize => "finalize",
        }
    }

    /// Human-readable label for progress output.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Init => "Planning research",
            Stage::Reflect => "Reflecting on findings",
            Stage::GenerateQueries => "Generating queries",
            Stage::Search => "Searching and reading sources",
            Stage::ScoreSources => "Scoring source reliability",
            Stage::ExtractLearnings => "Extracting learnings",
            Stage::SelectTopSources => "Selecting sources",
            Stage::FormatCitations => "Formatting citations",
            Stage::GenerateInitialReport => "Drafting report",
            Stage::EnhanceReport => "Enhancing report",
            Stage::ExpandKeySections => "Expanding key sections",
            Stage::Finalize => "Finalizing",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Finalize)
    }

    /// The stage that follows `self` given the current state.
    ///
    /// The only branch is after `ExtractLearnings`. The run loops back to
    /// `Reflect` while rounds remain and the last round found something new
    /// to search; the depth ceiling holds regardless of model output.
    /// `Finalize` maps to itself.
    pub fn next(self, state: &ResearchState) -> Stage {
        match self {
            Stage::Init => Stage::Reflect,
            Stage::Reflect => Stage::GenerateQueries,
            Stage::GenerateQueries => Stage::Search,
            Stage::Search => Stage::ScoreSources,
            Stage::ScoreSources => Stage::ExtractLearnings,
            Stage::ExtractLearnings if should_continue(state) => Stage::Reflect,
            Stage::ExtractLearnings => Stage::SelectTopSources,
            Stage::SelectTopSources => Stage::FormatCitations,
            Stage::FormatCitations => Stage::GenerateInitialReport,
            Stage::GenerateInitialReport => Stage::EnhanceReport,
            Stage::EnhanceReport => Stage::ExpandKeySections,
            Stage::ExpandKeySections | Stage::Finalize => Stage::Finalize,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn should_continue(state: &ResearchState) -> bool {
    state.iteration < state.depth && state.round_new_queries > 0
}

//! Persistence and rendering of research results.

use std::collections::BTreeSet;

use chrono::Utc;
use fathom::knowledge::Learning;
use fathom::research::{CitationStats, ResearchResult, ResearchStats, SourceInfo};
use fathom::types::{AppError, EngineId};
use fathom::{Citation, ValidationReport};

fn source(url: &str, domain: &str, score: f64) -> SourceInfo {
    SourceInfo {
        url: url.to_string(),
        title: format!("Title of {}", domain),
        snippet: String::new(),
        domain: domain.to_string(),
        engine: EngineId::Google,
        found_by: "rust async".to_string(),
        reliability_score: Some(score),
        first_seen_iteration: 0,
        scraped: None,
        fetch_error: None,
    }
}

fn citation(id: u32, url: &str, title: Option<&str>) -> Citation {
    Citation {
        id,
        url: url.to_string(),
        contexts: Vec::new(),
        title: title.map(String::from),
        published: None,
    }
}

fn sample() -> ResearchResult {
    let summary = "## Executive Summary\nTokio dominates async Rust [1].\n\n## Alternatives\nSmol is smaller [2].";
    let citations = vec![
        citation(1, "https://tokio.rs/blog", Some("Tokio blog")),
        citation(2, "https://github.com/smol-rs/smol", None),
        citation(3, "https://unused.example/", None),
    ];
    let used: BTreeSet<u32> = [1, 2].into_iter().collect();
    ResearchResult {
        query: "Rust async runtimes".to_string(),
        summary: summary.to_string(),
        depth: 1,
        breadth: 2,
        timestamp: Utc::now(),
        sources: vec![
            source("https://tokio.rs/blog", "tokio.rs", 0.9),
            source("https://github.com/smol-rs/smol", "github.com", 0.6),
        ],
        subqueries: vec!["tokio runtime design".to_string(), "smol executor".to_string()],
        learnings: vec![Learning::new("Tokio is the most used runtime", "https://tokio.rs/blog", "trend", 0)],
        content_analysis: Vec::new(),
        chain_of_thought: (0..30).map(|i| format!("thought {}", i)).collect(),
        research_stats: ResearchStats {
            elapsed_seconds: 12.5,
            iterations: 2,
            reflection_rounds: 2,
            subqueries_explored: 2,
            sources_found: 2,
            sources_analyzed: 2,
            learnings: 1,
            ..Default::default()
        },
        citation_stats: CitationStats {
            total_sources: 2,
            total_learnings: 1,
            total_citations: 3,
            validation: ValidationReport::from_sets(used, 3),
            ..Default::default()
        },
        citations,
    }
}

#[test]
fn test_dict_round_trip() {
    let result = sample();
    let dict = result.to_dict().unwrap();
    assert_eq!(dict["query"], "Rust async runtimes");
    assert_eq!(dict["research_stats"]["sources_analyzed"], 2);
    assert_eq!(ResearchResult::from_dict(dict).unwrap(), result);
}

#[test]
fn test_citations_default_when_absent() {
    let mut dict = sample().to_dict().unwrap();
    dict.as_object_mut().unwrap().remove("citations");
    let loaded = ResearchResult::from_dict(dict).unwrap();
    assert!(loaded.citations.is_empty());
}

#[test]
fn test_markdown_lists_only_cited_references() {
    let markdown = sample().to_markdown(false);

    assert!(markdown.starts_with("# Rust async runtimes\n"));
    assert!(markdown.contains("[1] tokio.rs, \"Tokio blog\", https://tokio.rs/blog"));
    assert!(markdown.contains(
        "[2] github.com, \"https://github.com/smol-rs/smol\", https://github.com/smol-rs/smol"
    ));
    assert!(!markdown.contains("unused.example"));
    assert!(markdown.contains("- **Depth**: 1"));
    assert!(markdown.contains("- **Time Taken**: 12.5s"));
    assert!(markdown.contains("all 2 citation markers resolve"));

    let references = markdown.find("## References").unwrap();
    let process = markdown.find("## Research Process").unwrap();
    assert!(references < process);
}

#[test]
fn test_statistics_block_is_always_complete() {
    let markdown = sample().to_markdown(false);
    assert!(markdown.contains("- **Learnings by Category**: none\n"));
    assert!(markdown.contains("- **Sources by Domain**: none\n"));
    assert!(markdown.contains("- **Reliability by Domain**: none\n"));

    let mut result = sample();
    result.citation_stats.sources_by_domain.insert("tokio.rs".to_string(), 1);
    result.citation_stats.reliability_by_domain.insert("tokio.rs".to_string(), 0.9);
    let markdown = result.to_markdown(false);
    assert!(markdown.contains("- **Sources by Domain**: tokio.rs: 1\n"));
    assert!(markdown.contains("- **Reliability by Domain**: tokio.rs: 0.90\n"));
    assert!(markdown.contains("- **Learnings by Category**: none\n"));
}

#[test]
fn test_markdown_samples_long_chain_of_thought() {
    let markdown = sample().to_markdown(true);
    assert!(markdown.contains("## Chain of Thought"));
    assert!(markdown.contains("- thought 0\n"));
    assert!(markdown.contains("- thought 29\n"));
    assert!(!markdown.contains("- thought 7\n"));
    assert_eq!(markdown.matches("- ...\n").count(), 2);
}

#[test]
fn test_save_and_load_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let result = sample();

    let json = dir.path().join("nested").join("run.json");
    result.save(&json).unwrap();
    assert_eq!(ResearchResult::load(&json).unwrap(), result);

    let markdown = dir.path().join("run.md");
    result.save(&markdown).unwrap();
    let text = std::fs::read_to_string(&markdown).unwrap();
    assert!(text.contains("## References"));

    let error = ResearchResult::load(&markdown).unwrap_err();
    assert!(matches!(error, AppError::InvalidInput(_)));
}

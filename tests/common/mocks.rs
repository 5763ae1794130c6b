//! Mock implementations for testing.
//!
//! [`ScriptedLLM`] answers each prompt with the response registered for the
//! first keyword the prompt contains, so a whole research run can be driven
//! without a model. [`StaticEngine`] returns the same hits for every query.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fathom::llm::LLMClient;
use fathom::search::SearchEngine;
use fathom::types::{AppError, EngineId, Result, SearchHit};
use parking_lot::Mutex;

// Phrases that identify each research prompt.
pub const PLAN: &str = "Plan a research investigation";
pub const REFLECT: &str = "Reflect on these findings";
pub const QUERIES: &str = "web search queries";
pub const RATE: &str = "Rate the reliability";
pub const ANALYSE: &str = "Analyse the sources below";
pub const SELECT: &str = "most valuable sources";
pub const REPORT: &str = "Write a comprehensive research report";
pub const ENHANCE: &str = "Improve this research report";
pub const EXPAND: &str = "needs more depth";
pub const SUMMARISE: &str = "Answer the search";

struct Rule {
    keyword: String,
    responses: Vec<String>,
    served: usize,
}

/// Mock LLM client with keyword-routed responses.
///
/// A rule with several responses serves them in order and then keeps
/// repeating the last one. Prompts without a matching rule fail.
pub struct ScriptedLLM {
    rules: Mutex<Vec<Rule>>,
    failing: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedLLM {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            failing: false,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// A client whose every call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// Hold every call open for `latency` so overlapping calls are visible.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn on(self, keyword: &str, response: &str) -> Self {
        self.on_sequence(keyword, &[response])
    }

    pub fn on_sequence(self, keyword: &str, responses: &[&str]) -> Self {
        self.rules.lock().push(Rule {
            keyword: keyword.to_string(),
            responses: responses.iter().map(|r| r.to_string()).collect(),
            served: 0,
        });
        self
    }

    /// Responses for a complete, well-behaved run. Query generation is left
    /// to the caller.
    pub fn research_defaults(self) -> Self {
        self.on(PLAN, "## Objectives\n- Understand the topic\n\n## Methodology\n- Read primary sources")
            .on(
                REFLECT,
                "## Key Insights\n- Early evidence is promising\n\n## Knowledge Gaps\n- Long-term durability is unclear\n\n## Next Steps\n- Look for field data\n\n## Overall Reflection\nSteady progress.",
            )
            .on(RATE, "high")
            .on(
                ANALYSE,
                "- [1] statistic: Prototype cells reached 500 Wh/kg in laboratory tests\n\
                 - [2] finding: Lithium dendrites still form at high charging rates\n\n\
                 The sources agree on the energy gains but differ on durability.",
            )
            .on(SELECT, "1\n2")
            .on(
                REPORT,
                "# Draft\n\n## Executive Summary\nPrototype cells have reached 500 Wh/kg [1].\n\n\
                 ## Challenges\nDendrite growth limits fast charging [2].\n\n## References\n[1] ignored",
            )
            .on(
                ENHANCE,
                "## Executive Summary\nPrototype cells have reached 500 Wh/kg in the lab [1].\n\n\
                 ## Challenges\nDendrite growth still limits fast charging [2].",
            )
            .on(EXPAND, "Expanded discussion grounded in the gathered evidence [1][2].")
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// How many prompts contained `keyword`.
    pub fn prompts_containing(&self, keyword: &str) -> usize {
        self.prompts.lock().iter().filter(|p| p.contains(keyword)).count()
    }

    async fn answer(&self, prompt: &str) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let answer = self.respond(prompt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }

    fn respond(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        if self.failing {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }

        let mut rules = self.rules.lock();
        let Some(rule) = rules.iter_mut().find(|r| prompt.contains(&r.keyword)) else {
            return Err(AppError::LLM("no scripted response".to_string()));
        };
        let index = rule.served.min(rule.responses.len().saturating_sub(1));
        rule.served += 1;
        rule.responses
            .get(index)
            .cloned()
            .ok_or_else(|| AppError::LLM("empty script".to_string()))
    }
}

#[async_trait]
impl LLMClient for ScriptedLLM {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.answer(prompt).await
    }

    async fn generate_with_system(&self, _system: &str, prompt: &str) -> Result<String> {
        self.answer(prompt).await
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Search engine returning the same hits for every query.
pub struct StaticEngine {
    id: EngineId,
    hits: Vec<(String, String)>,
    queries: Mutex<Vec<String>>,
}

impl StaticEngine {
    /// `hits` are `(url, title)` pairs.
    pub fn new(id: EngineId, hits: Vec<(String, String)>) -> Self {
        Self {
            id,
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queries received so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchEngine for StaticEngine {
    fn id(&self) -> EngineId {
        self.id
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        self.queries.lock().push(query.to_string());
        Ok(self
            .hits
            .iter()
            .take(max_results)
            .map(|(url, title)| SearchHit {
                url: url.clone(),
                title: title.clone(),
                snippet: format!("Snippet for {}", title),
                engine: self.id,
            })
            .collect())
    }
}

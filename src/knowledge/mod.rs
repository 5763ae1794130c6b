//! Learnings extracted from sources during a research run.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single fact attributed to one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub text: String,
    pub source_url: String,
    pub category: String,
    pub extracted_at_iteration: u32,
}

impl Learning {
    pub fn new(
        text: impl Into<String>,
        source_url: impl Into<String>,
        category: impl Into<String>,
        iteration: u32,
    ) -> Self {
        Self {
            text: text.into(),
            source_url: source_url.into(),
            category: category.into(),
            extracted_at_iteration: iteration,
        }
    }

    /// Dedupe fingerprint: case- and whitespace-insensitive text plus source.
    fn fingerprint(&self) -> String {
        let normalized = self
            .text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update(b"|");
        hasher.update(self.source_url.trim().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Insertion-ordered learnings that rejects exact duplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Learning>", into = "Vec<Learning>")]
pub struct KnowledgeStore {
    learnings: Vec<Learning>,
    hashes: HashSet<String>,
}

impl PartialEq for KnowledgeStore {
    fn eq(&self, other: &Self) -> bool {
        self.learnings == other.learnings
    }
}

impl From<Vec<Learning>> for KnowledgeStore {
    fn from(learnings: Vec<Learning>) -> Self {
        learnings.into_iter().collect()
    }
}

impl From<KnowledgeStore> for Vec<Learning> {
    fn from(store: KnowledgeStore) -> Self {
        store.learnings
    }
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a learning. Returns `false` if an identical one was already stored
    /// or the text is blank.
    pub fn add(&mut self, learning: Learning) -> bool {
        if learning.text.trim().is_empty() {
            return false;
        }
        if !self.hashes.insert(learning.fingerprint()) {
            return false;
        }
        self.learnings.push(learning);
        true
    }

    pub fn all(&self) -> &[Learning] {
        &self.learnings
    }

    pub fn into_vec(self) -> Vec<Learning> {
        self.learnings
    }

    pub fn len(&self) -> usize {
        self.learnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.learnings.is_empty()
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Learning> {
        self.learnings
            .iter()
            .filter(move |l| l.category.eq_ignore_ascii_case(category))
    }

    pub fn for_source<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a Learning> {
        self.learnings.iter().filter(move |l| l.source_url == url)
    }

    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for learning in &self.learnings {
            *counts.entry(learning.category.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Learnings from the most recent `n` insertions, oldest first.
    pub fn recent(&self, n: usize) -> &[Learning] {
        let start = self.learnings.len().saturating_sub(n);
        &self.learnings[start..]
    }
}

impl FromIterator<Learning> for KnowledgeStore {
    fn from_iter<I: IntoIterator<Item = Learning>>(iter: I) -> Self {
        let mut store = Self::new();
        for learning in iter {
            store.add(learning);
        }
        store
    }
}

//! The citation registry.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CitationError, Result};
use crate::validation::{scan_markers, ValidationReport};

/// Numeric citation identifier. The first registered URL receives `1`.
pub type CitationId = u32;

/// A registered citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Stable identifier used in `[id]` markers.
    pub id: CitationId,
    /// Cited URL, as first registered.
    pub url: String,
    /// Snippets of the text the citation supported, in registration order.
    #[serde(default)]
    pub contexts: Vec<String>,
    /// Page title, when known.
    #[serde(default)]
    pub title: Option<String>,
    /// Publication date as reported by the page, when known.
    #[serde(default)]
    pub published: Option<String>,
}

impl Citation {
    fn new(id: CitationId, url: String) -> Self {
        Self {
            id,
            url,
            contexts: Vec::new(),
            title: None,
            published: None,
        }
    }

    fn push_context(&mut self, context: &str) {
        let context = context.trim();
        if context.is_empty() {
            return;
        }
        if self.contexts.last().map(String::as_str) == Some(context) {
            return;
        }
        self.contexts.push(context.to_string());
    }
}

#[derive(Debug, Default)]
struct Inner {
    // Index i holds citation id i + 1.
    entries: Vec<Citation>,
    by_url: HashMap<String, CitationId>,
}

impl Inner {
    fn entry(&self, id: CitationId) -> Option<&Citation> {
        let index = (id as usize).checked_sub(1)?;
        self.entries.get(index)
    }

    fn entry_mut(&mut self, id: CitationId) -> Option<&mut Citation> {
        let index = (id as usize).checked_sub(1)?;
        self.entries.get_mut(index)
    }

    fn register(&mut self, url: &str) -> CitationId {
        if let Some(&id) = self.by_url.get(url) {
            return id;
        }
        let id = self.entries.len() as CitationId + 1;
        self.entries.push(Citation::new(id, url.to_string()));
        self.by_url.insert(url.to_string(), id);
        id
    }
}

/// Registry mapping source URLs to stable citation ids.
///
/// Shared across concurrent tasks behind an `Arc`; every mutation takes the
/// write lock once, so id allocation and the URL index never diverge.
#[derive(Debug, Default)]
pub struct CitationRegistry {
    inner: RwLock<Inner>,
}

impl CitationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `url` (or look it up if already present) and record `context`.
    ///
    /// Returns the URL's id. Leading and trailing whitespace of `url` is
    /// ignored when matching.
    pub fn register(&self, url: &str, context: &str) -> CitationId {
        let url = url.trim();
        let mut inner = self.inner.write();
        let id = inner.register(url);
        if let Some(citation) = inner.entry_mut(id) {
            citation.push_context(context);
        }
        id
    }

    /// Register `url`, rejecting empty URLs.
    pub fn try_register(&self, url: &str, context: &str) -> Result<CitationId> {
        if url.trim().is_empty() {
            return Err(CitationError::InvalidUrl(url.to_string()));
        }
        Ok(self.register(url, context))
    }

    /// Register every URL not yet present, in order, without contexts.
    ///
    /// Returns the ids of all given URLs (existing or new) in input order.
    pub fn bulk_register<I, S>(&self, urls: I) -> Vec<CitationId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.write();
        let ids: Vec<CitationId> = urls
            .into_iter()
            .filter(|url| !url.as_ref().trim().is_empty())
            .map(|url| inner.register(url.as_ref().trim()))
            .collect();
        debug!(count = ids.len(), total = inner.entries.len(), "Bulk registered citations");
        ids
    }

    /// Attach title and publication date to an existing citation.
    ///
    /// `None` leaves the corresponding field untouched.
    pub fn update_metadata(
        &self,
        id: CitationId,
        title: Option<&str>,
        published: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let citation = inner.entry_mut(id).ok_or(CitationError::UnknownId(id))?;
        if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
            citation.title = Some(title.to_string());
        }
        if let Some(published) = published.map(str::trim).filter(|p| !p.is_empty()) {
            citation.published = Some(published.to_string());
        }
        Ok(())
    }

    /// URL registered under `id`.
    pub fn get_url(&self, id: CitationId) -> Option<String> {
        self.inner.read().entry(id).map(|c| c.url.clone())
    }

    /// Full citation record for `id`.
    pub fn get_info(&self, id: CitationId) -> Option<Citation> {
        self.inner.read().entry(id).cloned()
    }

    /// Id assigned to `url`, if registered.
    pub fn id_for(&self, url: &str) -> Option<CitationId> {
        self.inner.read().by_url.get(url.trim()).copied()
    }

    /// Contexts recorded for `id`, in registration order.
    pub fn contexts(&self, id: CitationId) -> Option<Vec<String>> {
        self.inner.read().entry(id).map(|c| c.contexts.clone())
    }

    /// Snapshot of every citation, ordered by id.
    pub fn all_citations(&self) -> Vec<Citation> {
        self.inner.read().entries.clone()
    }

    /// Registered URLs in first-cited order.
    pub fn urls_in_order(&self) -> Vec<String> {
        self.inner.read().entries.iter().map(|c| c.url.clone()).collect()
    }

    /// Number of registered citations.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest id handed out so far (`0` when empty).
    pub fn max_id(&self) -> CitationId {
        self.len() as CitationId
    }

    /// Check every `[n]` marker in `text` against the registered ids.
    pub fn validate(&self, text: &str) -> ValidationReport {
        ValidationReport::from_sets(scan_markers(text), self.max_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_is_idempotent() {
        let registry = CitationRegistry::new();
        let first = registry.register("https://a.example/page", "");
        let again = registry.register("https://a.example/page", "");
        assert_eq!(first, 1);
        assert_eq!(again, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_follow_first_citation_order() {
        let registry = CitationRegistry::new();
        assert_eq!(registry.register("https://a.example", ""), 1);
        assert_eq!(registry.register("https://b.example", ""), 2);
        assert_eq!(registry.register("https://a.example", ""), 1);
        assert_eq!(registry.register("https://c.example", ""), 3);
        assert_eq!(
            registry.urls_in_order(),
            vec!["https://a.example", "https://b.example", "https://c.example"]
        );
    }

    #[test]
    fn test_context_deduplication_against_latest() {
        let registry = CitationRegistry::new();
        let id = registry.register("https://a.example", "alpha");
        registry.register("https://a.example", "alpha");
        registry.register("https://a.example", "");
        registry.register("https://a.example", "beta");
        registry.register("https://a.example", "alpha");

        assert_eq!(
            registry.contexts(id).unwrap(),
            vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()]
        );
    }

    #[test]
    fn test_bulk_register_preserves_existing_ids() {
        let registry = CitationRegistry::new();
        registry.register("https://b.example", "ctx");
        let ids = registry.bulk_register(["https://a.example", "https://b.example", "  ", "https://c.example"]);
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(registry.contexts(1).unwrap(), vec!["ctx".to_string()]);
        assert!(registry.contexts(2).unwrap().is_empty());
    }

    #[test]
    fn test_lookup_of_unknown_ids() {
        let registry = CitationRegistry::new();
        registry.register("https://a.example", "");
        assert!(registry.get_url(0).is_none());
        assert!(registry.get_url(2).is_none());
        assert_eq!(registry.get_url(1).as_deref(), Some("https://a.example"));
        assert_eq!(registry.id_for("https://a.example"), Some(1));
        assert_eq!(registry.id_for("https://missing.example"), None);
    }

    #[test]
    fn test_update_metadata() {
        let registry = CitationRegistry::new();
        let id = registry.register("https://a.example", "");
        registry
            .update_metadata(id, Some("Title A"), Some("2024-03-01"))
            .unwrap();
        registry.update_metadata(id, None, Some("  ")).unwrap();

        let info = registry.get_info(id).unwrap();
        assert_eq!(info.title.as_deref(), Some("Title A"));
        assert_eq!(info.published.as_deref(), Some("2024-03-01"));

        assert_eq!(
            registry.update_metadata(9, Some("x"), None),
            Err(CitationError::UnknownId(9))
        );
    }

    #[test]
    fn test_try_register_rejects_empty_url() {
        let registry = CitationRegistry::new();
        assert!(matches!(
            registry.try_register("   ", "ctx"),
            Err(CitationError::InvalidUrl(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_registration_is_gap_free() {
        let registry = Arc::new(CitationRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| {
                            // Workers overlap on half of the URL space.
                            let n = if i % 2 == 0 { i } else { worker * 100 + i };
                            registry.register(&format!("https://site.example/{n}"), "")
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let citations = registry.all_citations();
        let ids: Vec<CitationId> = citations.iter().map(|c| c.id).collect();
        let expected: Vec<CitationId> = (1..=citations.len() as CitationId).collect();
        assert_eq!(ids, expected);

        let mut urls: Vec<&str> = citations.iter().map(|c| c.url.as_str()).collect();
        urls.sort_unstable();
        urls.dedup();
        assert_eq!(urls.len(), citations.len());
        // 25 shared even URLs + 8 workers * 25 odd URLs each.
        assert_eq!(citations.len(), 25 + 8 * 25);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = CitationRegistry::new();
        registry.register("https://a.example", "ctx");
        let json = serde_json::to_value(registry.all_citations()).unwrap();
        let back: Vec<Citation> = serde_json::from_value(json).unwrap();
        assert_eq!(back, registry.all_citations());
    }
}

//! Reference-list formatting and marker context extraction.

use crate::registry::CitationId;
use crate::validation::scan_markers;

/// Maximum characters kept for a single marker context.
const MAX_CONTEXT_CHARS: usize = 240;

/// Host of `url` without a leading `www.`, or the raw input if it does not parse.
pub fn domain_of(url: &str) -> String {
    match url::Url::parse(url.trim()) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => host.trim_start_matches("www.").to_ascii_lowercase(),
            None => url.trim().to_string(),
        },
        Err(_) => url.trim().to_string(),
    }
}

/// Render one reference line: `[id] domain, "title-or-url", url`.
pub fn format_reference(id: CitationId, url: &str, title: Option<&str>) -> String {
    let label = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(url);
    format!("[{}] {}, \"{}\", {}", id, domain_of(url), label, url)
}

/// Pair every marker in `text` with the sentence it appears in.
///
/// Sentences are split on `.`, `!`, `?` and line breaks. A sentence citing
/// several ids yields one entry per id. Output follows text order.
pub fn marker_contexts(text: &str) -> Vec<(CitationId, String)> {
    let mut out = Vec::new();
    for sentence in sentences(text) {
        let ids = scan_markers(sentence);
        if ids.is_empty() {
            continue;
        }
        let context = truncate_chars(sentence.trim(), MAX_CONTEXT_CHARS);
        out.extend(ids.into_iter().map(|id| (id, context.clone())));
    }
    out
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut start = 0;
    let mut pieces = Vec::new();
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        let boundary = match b {
            b'\n' => true,
            // "[1]." ends a sentence but "3.5" does not.
            b'.' | b'!' | b'?' => bytes.get(i + 1).is_none_or(|next| next.is_ascii_whitespace()),
            _ => false,
        };
        if boundary {
            pieces.push(&text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.into_iter().filter(|s| !s.trim().is_empty())
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

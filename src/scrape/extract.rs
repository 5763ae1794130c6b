//! Main-content extraction from HTML pages.
//!
//! Navigation, boilerplate and scripts are skipped while walking the DOM;
//! the largest content-looking container wins; the resulting text is
//! whitespace-normalized and de-duplicated line by line.

use std::collections::{BTreeMap, HashSet};

use scraper::{ElementRef, Html, Node, Selector};
use text_splitter::TextSplitter;

/// Text longer than this is cut down to its leading chunks.
pub const LONG_TEXT_CHARS: usize = 20_000;
const CHUNK_CHARS: usize = 10_000;
const KEEP_CHUNKS: usize = 5;

const NOISE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "iframe", "svg",
    "template", "button",
];
const NOISE_CLASSES: &[&str] = &["menu", "sidebar", "navigation", "ad", "ads", "advertisement"];
const NOISE_ROLES: &[&str] = &["banner", "navigation"];
const CONTENT_HINTS: &[&str] = &["content", "main", "article", "body", "entry", "post", "text"];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "blockquote", "pre", "tr", "table", "dd", "dt", "figcaption",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    pub title: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// Parse `html` and pull out its title, readable text and meta tags.
pub fn extract_page(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    collect_text(main_container(&document), &mut raw);

    ExtractedPage {
        title: page_title(&document),
        text: bound_length(normalize_text(&raw)),
        metadata: meta_tags(&document),
    }
}

/// Collapse whitespace, drop lines of three characters or fewer, and drop
/// any line that already appeared earlier in the text.
pub fn normalize_text(raw: &str) -> String {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.chars().count() <= 3 {
            continue;
        }
        if seen.insert(line.clone()) {
            lines.push(line);
        }
    }
    lines.join("\n")
}

/// Keep only the first chunks of very long text.
pub fn bound_length(text: String) -> String {
    if text.chars().count() <= LONG_TEXT_CHARS {
        return text;
    }
    let splitter = TextSplitter::new(CHUNK_CHARS);
    splitter
        .chunks(&text)
        .take(KEEP_CHUNKS)
        .collect::<Vec<_>>()
        .join("\n")
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn is_noise(element: &ElementRef) -> bool {
    let el = element.value();
    if NOISE_TAGS.contains(&el.name()) {
        return true;
    }
    if el.classes().any(|c| NOISE_CLASSES.contains(&c.to_ascii_lowercase().as_str())) {
        return true;
    }
    el.attr("role")
        .is_some_and(|role| NOISE_ROLES.contains(&role.to_ascii_lowercase().as_str()))
}

fn is_content_like(element: &ElementRef) -> bool {
    let el = element.value();
    if matches!(el.name(), "main" | "article") {
        return true;
    }
    let class = el.attr("class").unwrap_or_default().to_ascii_lowercase();
    let id = el.attr("id").unwrap_or_default().to_ascii_lowercase();
    CONTENT_HINTS
        .iter()
        .any(|hint| class.contains(hint) || id.contains(hint))
}

fn main_container(document: &Html) -> ElementRef<'_> {
    let mut best: Option<(usize, ElementRef)> = None;
    if let Some(candidates) = selector("main, article, div, section") {
        for element in document.select(&candidates) {
            if is_noise(&element) || !is_content_like(&element) {
                continue;
            }
            let mut text = String::new();
            collect_text(element, &mut text);
            let len = text.split_whitespace().map(str::len).sum::<usize>();
            if len > 0 && best.as_ref().is_none_or(|(best_len, _)| len > *best_len) {
                best = Some((len, element));
            }
        }
    }
    if let Some((_, element)) = best {
        return element;
    }
    selector("body")
        .and_then(|body| document.select(&body).next())
        .unwrap_or_else(|| document.root_element())
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_noise(&child_el) {
                    continue;
                }
                let name = el.name();
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push('\n');
                }
                collect_text(child_el, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn page_title(document: &Html) -> String {
    let from = |css: &str| {
        selector(css)
            .and_then(|s| document.select(&s).next())
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
    };
    from("title")
        .or_else(|| {
            selector(r#"meta[property="og:title"]"#)
                .and_then(|s| document.select(&s).next())
                .and_then(|el| el.value().attr("content"))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        })
        .or_else(|| from("h1"))
        .unwrap_or_default()
}

fn meta_tags(document: &Html) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    let Some(meta) = selector("meta") else {
        return tags;
    };
    for element in document.select(&meta) {
        let el = element.value();
        let key = el.attr("name").or_else(|| el.attr("property"));
        let (Some(key), Some(content)) = (key, el.attr("content")) else {
            continue;
        };
        let (key, content) = (key.trim().to_ascii_lowercase(), content.trim());
        if key.is_empty() || content.is_empty() {
            continue;
        }
        tags.entry(key).or_insert_with(|| content.to_string());
    }
    tags
}

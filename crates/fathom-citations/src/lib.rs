//! # fathom-citations
//!
//! Citation bookkeeping for generated research reports.
//!
//! A [`CitationRegistry`] hands out stable, 1-based numeric identifiers for
//! source URLs in first-cited order. Report text refers to those identifiers
//! with bracketed markers such as `[3]`, and [`CitationRegistry::validate`]
//! checks that every marker in a document resolves to a registered source.
//!
//! ## Quick Start
//!
//! ```rust
//! use fathom_citations::CitationRegistry;
//!
//! let registry = CitationRegistry::new();
//! let a = registry.register("https://example.com/a", "first mention");
//! let b = registry.register("https://example.com/b", "");
//! assert_eq!((a, b), (1, 2));
//!
//! // Registering the same URL again returns the same id.
//! assert_eq!(registry.register("https://example.com/a", "second mention"), 1);
//!
//! let report = registry.validate("See [1] and [3].");
//! assert!(!report.valid);
//! assert!(report.invalid_citations.contains(&3));
//! assert!(report.missing_citations.contains(&2));
//! ```
//!
//! ## Guarantees
//!
//! - Identifiers are allocated under a single write lock, so concurrent
//!   registration from many tasks yields the gap-free sequence `1..=K`.
//! - A URL is assigned exactly one identifier for the registry's lifetime.
//! - Contexts are appended in call order; an empty context or one equal to
//!   the most recent context is not recorded.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod reference;
pub mod registry;
pub mod validation;

// Re-exports for convenience
pub use error::{CitationError, Result};
pub use reference::{domain_of, format_reference, marker_contexts};
pub use registry::{Citation, CitationId, CitationRegistry};
pub use validation::{scan_markers, ValidationReport};

//! LLM Provider Clients
//!
//! The research engine only needs "produce text for this prompt", so the
//! [`LLMClient`] trait is deliberately small. Providers are selected at
//! runtime through [`Provider`] and compiled in via Cargo features:
//! - `ollama` - Local Ollama server (default)
//! - `openai` - OpenAI API and compatible endpoints
//!
//! # Example
//!
//! ```ignore
//! use fathom::llm::Provider;
//!
//! let provider = Provider::Ollama {
//!     base_url: "http://localhost:11434".to_string(),
//!     model: "llama3.2:3b".to_string(),
//! };
//! let client = provider.create_client()?;
//! let plan = client.generate("Outline a research plan on solid-state batteries").await?;
//! ```

/// Core LLM client trait and provider selection.
pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{LLMClient, Provider};

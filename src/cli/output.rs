//! Colored output helpers for the CLI
//!
//! Provides consistent, colored terminal output for the `fathom` binary.

use owo_colors::OwoColorize;

use crate::research::{ProgressUpdate, ResearchResult};

/// Output style configuration
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print the Fathom banner
    pub fn banner(&self) {
        let version = format!("v{}", env!("CARGO_PKG_VERSION"));
        if self.colored {
            println!(
                "\n   {} {}\n",
                "Fathom".bright_cyan().bold(),
                version.dimmed()
            );
        } else {
            println!("\n   Fathom {}\n", version);
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print one stage transition of a running research
    pub fn progress(&self, update: &ProgressUpdate) {
        let round = format!("[round {}]", update.iteration + 1);
        if self.colored {
            println!("  {} {}", round.dimmed(), update.message.bright_white());
        } else {
            println!("  {} {}", round, update.message);
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print a file written by the CLI
    pub fn saved(&self, kind: &str, path: &str) {
        if self.colored {
            println!("  {} {} {}", "✓".green().bold(), kind.dimmed(), path.bright_white());
        } else {
            println!("  [SAVED] {} {}", kind, path);
        }
    }

    /// Print the headline numbers of a finished research
    pub fn summary(&self, result: &ResearchResult) {
        let stats = &result.research_stats;
        self.header("Research Summary");
        self.kv("Query", &result.query);
        self.kv("Rounds", &stats.iterations.to_string());
        self.kv("Subqueries explored", &stats.subqueries_explored.to_string());
        self.kv(
            "Sources",
            &format!("{} found, {} analyzed", stats.sources_found, stats.sources_analyzed),
        );
        self.kv("Learnings", &stats.learnings.to_string());
        self.kv("Citations", &result.citation_stats.total_citations.to_string());
        self.kv("Time", &format!("{:.1}s", stats.elapsed_seconds));

        let failures = stats.failures;
        if failures.llm_fallbacks + failures.search_failures + failures.fetch_failures > 0 {
            self.warning(&format!(
                "Absorbed {} model fallbacks, {} search failures, {} unreadable pages",
                failures.llm_fallbacks, failures.search_failures, failures.fetch_failures
            ));
        }
        if !result.citation_stats.validation.valid {
            self.warning("The report cites sources that are not in the reference list");
        }
    }

    /// Print newline
    pub fn newline(&self) {
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::Stage;

    #[test]
    fn test_output_new() {
        assert!(Output::new().colored);
        assert!(!Output::no_color().colored);
        assert!(Output::default().colored);
    }

    #[test]
    fn test_output_methods_no_panic() {
        // Smoke test - ensure none of the output methods panic
        for output in [Output::no_color(), Output::new()] {
            output.banner();
            output.success("test success");
            output.info("test info");
            output.warning("test warning");
            output.error("test error");
            output.progress(&ProgressUpdate {
                stage: Stage::Search,
                iteration: 1,
                message: Stage::Search.label().to_string(),
            });
            output.header("Test Header");
            output.kv("key", "value");
            output.saved("markdown", "reports/x.md");
            output.newline();
        }
    }
}

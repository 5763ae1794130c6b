use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use fathom::cache::{self, NoOpCache, ResponseCache};
use fathom::cli::{output::Output, Cli, Commands};
use fathom::llm::LLMClient;
use fathom::research::{ProgressCallback, ProgressUpdate, QuickSearcher, ResearchOrchestrator, ResearchResult};
use fathom::scrape::Scraper;
use fathom::search::SearchAggregator;
use fathom::utils::config::FathomConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };
    init_tracing(cli.verbose, cli.log_json);

    if let Err(e) = run(cli, output).await {
        output.error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "fathom=debug" } else { "fathom=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .init();
}

async fn run(cli: Cli, output: Output) -> Result<()> {
    match cli.command {
        Commands::Research {
            query,
            depth,
            breadth,
            output: output_file,
            output_dir,
            dynamic,
            no_cache,
            chain_of_thought,
        } => {
            let mut config = FathomConfig::load_or_default(&cli.config)
                .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;
            if let Some(depth) = depth {
                config.research.depth = depth;
            }
            if let Some(breadth) = breadth {
                config.research.breadth = breadth;
            }
            if dynamic {
                config.research.prefer_dynamic = true;
            }
            config.validate()?;

            output.banner();
            let result = research(&config, &query, no_cache, output).await?;
            output.summary(&result);

            let markdown = match output_file {
                Some(path) => path,
                None => {
                    let dir = output_dir.unwrap_or_else(|| config.output_dir());
                    ResearchResult::output_path(&dir, &result.query, "md")
                }
            };
            let data = markdown.with_extension("json");
            result.save_with(&markdown, chain_of_thought)?;
            result.save(&data)?;
            output.newline();
            output.saved("report", &markdown.display().to_string());
            output.saved("data", &data.display().to_string());
            Ok(())
        }
        Commands::Search {
            query,
            detailed,
            output: output_file,
            dynamic,
            no_cache,
        } => {
            let config = FathomConfig::load_or_default(&cli.config)
                .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;
            let (llm, search, scraper) = components(&config, no_cache)?;
            let searcher = QuickSearcher::new(llm, search, scraper, config.quick.clone())
                .with_retry_policy(config.research.llm_retry_policy())
                .with_dynamic(dynamic || config.research.prefer_dynamic);

            let result = searcher.search(&query, detailed || config.quick.detailed).await;
            if result.fallback {
                output.warning("The model could not be reached; listing results only");
            }
            println!("{}", result.to_markdown());
            if let Some(path) = output_file {
                result.save(&path)?;
                output.saved("result", &path.display().to_string());
            }
            Ok(())
        }
        Commands::Show {
            file,
            chain_of_thought,
        } => show(&file, chain_of_thought),
    }
}

type Components = (Arc<dyn LLMClient>, Arc<SearchAggregator>, Arc<Scraper>);

fn components(config: &FathomConfig, no_cache: bool) -> Result<Components> {
    let cache: Arc<dyn ResponseCache> = if no_cache {
        Arc::new(NoOpCache)
    } else {
        cache::from_settings(&config.cache)?
    };

    let llm = config.llm.provider()?.create_client()?;
    let search = Arc::new(SearchAggregator::from_settings(config.search.clone(), cache.clone())?);
    let scraper = Arc::new(Scraper::new(config.scraper.clone(), cache)?);
    info!(model = llm.model_name(), "Research engine ready");
    Ok((llm, search, scraper))
}

async fn research(config: &FathomConfig, query: &str, no_cache: bool, output: Output) -> Result<ResearchResult> {
    let (llm, search, scraper) = components(config, no_cache)?;

    let progress: ProgressCallback = Arc::new(move |update: &ProgressUpdate| output.progress(update));
    let orchestrator = ResearchOrchestrator::new(llm, search, scraper, config.research.clone())
        .with_progress(progress);
    Ok(orchestrator.run(query).await)
}

fn show(file: &Path, chain_of_thought: bool) -> Result<()> {
    let result = ResearchResult::load(file)
        .with_context(|| format!("Cannot load research result {}", file.display()))?;
    println!("{}", result.to_markdown(chain_of_thought));
    Ok(())
}

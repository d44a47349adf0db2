//! a3s-cse CLI - serve the Custom Search endpoint or run one query.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use a3s_cse::server::{self, AppState};
use a3s_cse::{Orchestrator, SafeSearch, SearchQuery, ServiceConfig};

/// a3s-cse - Custom Search compatible endpoint
#[derive(Parser)]
#[command(name = "a3s-cse")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "CSE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),

    /// Run one query through the pipeline and print the response
    Search(SearchArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Address to bind, overriding the configuration
    #[arg(short, long, env = "CSE_BIND")]
    bind: Option<String>,
}

#[derive(Parser)]
struct SearchArgs {
    /// Search query
    query: String,

    /// Number of results (1-10)
    #[arg(short, long, default_value = "10")]
    num: u32,

    /// 1-based index of the first result
    #[arg(short, long, default_value = "1")]
    start: u32,

    /// Language restriction, e.g. lang_en
    #[arg(long)]
    lr: Option<String>,

    /// Safe search level (off, medium, high)
    #[arg(long)]
    safe: Option<String>,

    /// Date restriction, e.g. d7 or m1
    #[arg(long)]
    date_restrict: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// Full Custom Search JSON payload
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServiceConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Serve(args) => run_serve(config, args).await,
        Commands::Search(args) => run_search(config, args).await,
    }
}

async fn run_serve(mut config: ServiceConfig, args: ServeArgs) -> Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    let maintenance = orchestrator.spawn_maintenance(Duration::from_secs(
        config.cache.sweep_interval_secs.max(1),
    ));

    let bind = config.server.bind.clone();
    let state = AppState::new(Arc::clone(&orchestrator), Arc::new(config));
    server::serve(state, &bind, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
    })
    .await?;

    maintenance.abort();
    orchestrator.shutdown().await;
    Ok(())
}

async fn run_search(config: ServiceConfig, args: SearchArgs) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config)?;

    let mut query = SearchQuery::new(&args.query)
        .with_num(args.num)
        .with_start(args.start);
    if let Some(lr) = args.lr {
        query = query.with_language(lr);
    }
    if let Some(safe) = args.safe {
        query = query.with_safe(SafeSearch::parse(&safe));
    }
    if let Some(date_restrict) = args.date_restrict {
        query = query.with_date_restrict(date_restrict);
    }

    let started = Instant::now();
    let outcome = orchestrator.search(server::ANONYMOUS, query).await;
    orchestrator.shutdown().await;
    let served = outcome?;

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(served.response.as_ref())?);
        }
        OutputFormat::Text => {
            let info = &served.response.search_information;
            println!(
                "\nSearch results for \"{}\" ({} items of ~{} via {} in {}ms):\n",
                args.query,
                served.response.items.len(),
                info.formatted_total_results,
                served.source,
                started.elapsed().as_millis()
            );

            for (i, item) in served.response.items.iter().enumerate() {
                println!("{}. {}", args.start as usize + i, item.title);
                println!("   URL: {}", item.link);
                if !item.snippet.is_empty() {
                    let snippet: String = item.snippet.chars().take(150).collect();
                    if snippet.len() < item.snippet.len() {
                        println!("   {}...", snippet);
                    } else {
                        println!("   {}", snippet);
                    }
                }
                println!();
            }
        }
    }

    Ok(())
}

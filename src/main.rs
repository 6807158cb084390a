//! Assessment recommender CLI
//!
//! Command-line interface for serving, indexing and querying recommendations.

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use assessment_recommender::api::check_health;
use assessment_recommender::evaluate::{read_labelled, read_queries, write_predictions};
use assessment_recommender::{
    build_engine, generate_predictions, ingest, load_catalog, mean_recall_at_k, open_index,
    rebuild_index, ApiServer, AppState, EmbeddingProviders, RecommendationResponse,
    RecommenderConfig, Result,
};

#[derive(Parser)]
#[command(name = "recommender")]
#[command(author, version, about = "Assessment recommendation service", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "RECOMMENDER_CONFIG", default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },

    /// Start the HTTP API
    Serve {
        /// HTTP API listen address (overrides the config file)
        #[arg(long)]
        api_addr: Option<String>,
    },

    /// Embed a catalog JSON file and add it to the index
    Ingest {
        /// Path to the scraped catalog JSON
        #[arg(long = "catalog")]
        catalog: String,

        /// Remove every indexed item first (needed after changing provider)
        #[arg(long)]
        rebuild: bool,
    },

    /// Print recommendations for a query as JSON
    Recommend {
        /// Free-text query or job description
        query: String,

        /// Maximum number of recommendations
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },

    /// Write recommendations for a CSV of queries as Query,Assessment_url rows
    Predict {
        /// CSV file with a Query column
        #[arg(long)]
        queries: String,

        /// Output CSV path
        #[arg(long)]
        out: String,

        /// Recommendations per query
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },

    /// Report Mean Recall@K against a ground-truth CSV
    Evaluate {
        /// Ground-truth CSV with Query and Assessment_url columns
        #[arg(long)]
        truth: String,

        /// Existing predictions CSV; without it the ground-truth queries are run
        #[arg(long)]
        predictions: Option<String>,

        /// Cut-off K
        #[arg(long, default_value_t = 10)]
        k: usize,
    },

    /// Check API health
    Health {
        /// API endpoint to check
        #[arg(long, default_value = "http://localhost:8000")]
        endpoint: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: &str) -> Result<RecommenderConfig> {
    let mut config = if Path::new(path).exists() {
        info!("Loading configuration from: {}", path);
        RecommenderConfig::load(path)?
    } else {
        info!("Using default configuration");
        RecommenderConfig::default()
    };
    config.apply_env_overrides()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { output } => {
            info!("Writing default configuration to: {}", output);
            RecommenderConfig::default().save(&output)?;
            info!("Configuration saved successfully");
        }

        Commands::Serve { api_addr } => {
            let mut config = load_config(&cli.config)?;
            if let Some(addr) = api_addr {
                config.api.listen_address = addr;
            }
            info!(
                "Embedding provider: {}, index backend: {:?}",
                config.embedding.provider, config.index.backend
            );

            let providers = EmbeddingProviders::new(config.embedding.clone());
            let engine = Arc::new(build_engine(&config, &providers).await?);

            let mut state = AppState::new(engine, &config.api);
            match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => state = state.with_metrics(handle),
                Err(e) => warn!("Metrics recorder unavailable: {}", e),
            }

            let addr = config.api.listen_address.clone();
            let server = ApiServer::with_state(config.api.clone(), state);

            tokio::select! {
                result = server.run(&addr) => {
                    if let Err(e) = result {
                        error!("API server error: {}", e);
                        return Err(e);
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal");
                }
            }
            info!("Server stopped");
        }

        Commands::Ingest { catalog, rebuild } => {
            let config = load_config(&cli.config)?;
            let records = load_catalog(&catalog)?;
            info!("Loaded {} catalog records from {}", records.len(), catalog);

            let providers = EmbeddingProviders::new(config.embedding.clone());
            let embedder = providers.active().await?;
            let index = if rebuild {
                info!("Rebuilding index from scratch");
                rebuild_index(&config, embedder.as_ref()).await?
            } else {
                open_index(&config, embedder.as_ref()).await?
            };
            let written = ingest(&records, embedder.as_ref(), index.as_ref()).await?;
            info!("Indexed {} items", written);
        }

        Commands::Recommend { query, top_k } => {
            let config = load_config(&cli.config)?;
            let providers = EmbeddingProviders::new(config.embedding.clone());
            let engine = build_engine(&config, &providers).await?;
            let results = engine.recommend(&query, top_k).await?;

            let recommendations: Vec<_> = results.into_iter().map(Into::into).collect();
            let response = RecommendationResponse {
                query,
                total_results: recommendations.len(),
                recommendations,
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Predict {
            queries,
            out,
            top_k,
        } => {
            let config = load_config(&cli.config)?;
            let queries = read_queries(&queries)?;
            let providers = EmbeddingProviders::new(config.embedding.clone());
            let engine = build_engine(&config, &providers).await?;

            let rows = generate_predictions(&engine, &queries, top_k).await?;
            write_predictions(&out, &rows)?;
            info!("Saved {} rows to {}", rows.len(), out);
        }

        Commands::Evaluate {
            truth,
            predictions,
            k,
        } => {
            let truth = read_labelled(&truth)?;
            let predictions = match predictions {
                Some(path) => read_labelled(&path)?,
                None => {
                    let config = load_config(&cli.config)?;
                    let providers = EmbeddingProviders::new(config.embedding.clone());
                    let engine = build_engine(&config, &providers).await?;
                    let mut queries: Vec<String> = Vec::new();
                    for row in &truth {
                        if !queries.contains(&row.query) {
                            queries.push(row.query.clone());
                        }
                    }
                    generate_predictions(&engine, &queries, k).await?
                }
            };

            let report = mean_recall_at_k(&predictions, &truth, k);
            for q in &report.per_query {
                info!("{}/{} relevant found: {}", q.hits, q.relevant, q.query);
            }
            println!("Mean Recall@{}: {:.4}", report.k, report.mean_recall);
        }

        Commands::Health { endpoint } => {
            info!("Checking API health at: {}", endpoint);

            match check_health(&endpoint, Duration::from_secs(5)).await {
                Ok(response) => {
                    info!("Status: {}", response.status);
                    info!("Message: {}", response.message);
                }
                Err(e) => {
                    error!("Health check failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

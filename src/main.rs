use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use darwin_portfolio::config::AppConfig;
use darwin_portfolio::data::csv_store::CsvDirectorySource;
use darwin_portfolio::data::data_service::DataService;
use darwin_portfolio::data::fees::FeesPreprocessor;
use darwin_portfolio::data::info_api_client::{InfoApiClient, RetryPolicy};
use darwin_portfolio::optimization::constraints::MinimumHistory;
use darwin_portfolio::optimization::objective::BuiltInObjective;
use darwin_portfolio::optimization::portfolio_search::{SearchConfig, WeightingMode};
use darwin_portfolio::optimization::portfolio_service::{PortfolioRequest, PortfolioService};
use darwin_portfolio::web_app::{build_app, AppState};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_START: &str = "2022-01-01";

#[derive(Parser)]
#[command(author, version, about = "DARWIN portfolio construction and ranking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily quotes from the Darwinex Info API
    Download {
        /// Comma-separated list of DARWIN symbols
        #[arg(short, long, value_delimiter = ',', required = true)]
        darwins: Vec<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(short, long, default_value = DEFAULT_START)]
        start: NaiveDate,

        /// End date (YYYY-MM-DD), today when omitted
        #[arg(short, long)]
        end: Option<NaiveDate>,

        /// Directory to save raw CSV files
        #[arg(long)]
        save_path: Option<PathBuf>,
    },
    /// Remove the performance fee from raw series
    CalculateFees {
        /// Performance fee rate (0.2 = 20%)
        #[arg(long, default_value = "0.2")]
        fee_rate: f64,

        /// Directory with raw CSV files
        #[arg(long)]
        raw_path: Option<PathBuf>,

        /// Directory to store processed CSV files
        #[arg(long)]
        processed_path: Option<PathBuf>,
    },
    /// Rank the best portfolios over processed series
    BestPortfolios {
        /// Comma-separated list of DARWIN symbols, every stored one when omitted
        #[arg(short, long, value_delimiter = ',')]
        darwins: Vec<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(short, long, default_value = DEFAULT_START)]
        start: NaiveDate,

        /// End date (YYYY-MM-DD), today when omitted
        #[arg(short, long)]
        end: Option<NaiveDate>,

        /// Directory with processed CSV files
        #[arg(long)]
        save_path: Option<PathBuf>,

        /// Number of distinct portfolios to keep
        #[arg(short = 'x', long, default_value = "10")]
        num_portfolios: usize,

        #[arg(long, default_value = "1.0")]
        leverage: f64,

        /// Score every subset with equal weights instead of optimizing them
        #[arg(long)]
        equal_weights: bool,

        #[arg(long)]
        max_darwins: Option<usize>,

        #[arg(long, value_enum, default_value_t = BuiltInObjective::SharpeRatio)]
        objective: BuiltInObjective,

        /// Minimum history in calendar days instead of one trading year
        #[arg(long)]
        min_history_days: Option<i64>,

        /// Print the result set as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve the HTTP API over processed series
    Serve {
        /// Address to bind, overrides DARWIN_BIND_ADDR
        #[arg(long)]
        bind: Option<String>,

        /// Directory with processed CSV files
        #[arg(long)]
        data_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::Download {
            darwins,
            start,
            end,
            save_path,
        } => {
            let client = InfoApiClient::new(config.require_api_key()?, config.api_base_url.as_str())
                .with_retry_policy(RetryPolicy {
                    max_retries: config.max_retries,
                    ..Default::default()
                });
            let service = DataService::new(client, config.max_concurrent_downloads);
            let save_dir = save_path.unwrap_or(config.raw_dir);
            let summary = service
                .fetch_and_save_quotes(&darwins, start, end.unwrap_or(today), &save_dir)
                .await?;
            info!(
                "Saved {} series, {} empty, {} failed",
                summary.saved.len(),
                summary.empty.len(),
                summary.failed.len()
            );
        }
        Commands::CalculateFees {
            fee_rate,
            raw_path,
            processed_path,
        } => {
            let preprocessor = FeesPreprocessor::new(fee_rate)?;
            let raw_dir = raw_path.unwrap_or(config.raw_dir);
            let processed_dir = processed_path.unwrap_or(config.processed_dir);
            let processed = preprocessor.process_all_files(&raw_dir, &processed_dir)?;
            info!(
                "Processed {} files into {} with a {:.0}% performance fee",
                processed,
                processed_dir.display(),
                preprocessor.fee_rate() * 100.
            );
        }
        Commands::BestPortfolios {
            darwins,
            start,
            end,
            save_path,
            num_portfolios,
            leverage,
            equal_weights,
            max_darwins,
            objective,
            min_history_days,
            json,
        } => {
            let request = PortfolioRequest {
                symbols: darwins,
                start: Some(start),
                end: Some(end.unwrap_or(today)),
                minimum_history: min_history_days
                    .map_or(MinimumHistory::default(), MinimumHistory::CalendarDays),
                search: SearchConfig {
                    num_portfolios,
                    leverage,
                    max_darwins,
                    objective,
                    weighting: if equal_weights {
                        WeightingMode::EqualWeights
                    } else {
                        WeightingMode::Optimized
                    },
                    ..Default::default()
                },
            };
            let source = CsvDirectorySource::new(save_path.unwrap_or(config.processed_dir));
            let service = PortfolioService::new(source);
            let results = service
                .generate_best_portfolios(&request)
                .context("Portfolio search failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("{}", results);
            }
        }
        Commands::Serve { bind, data_path } => {
            let addr = bind.unwrap_or(config.bind_addr);
            let source = CsvDirectorySource::new(data_path.unwrap_or(config.processed_dir));
            info!("Serving series from {}", source.dir().display());
            let state = AppState::new(source);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!("Listening on {}", addr);
            axum::serve(listener, build_app(state)).await?;
        }
    }
    Ok(())
}

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod db;
mod error;
mod models;
mod report;
mod service;
mod stats_api;

use config::{Config, LogFormat};
use db::{PgStatsRepository, StatsRepository};
use service::{CollectOptions, CollectOutcome, StatsAnrService};
use stats_api::StatsApiClient;

#[derive(Parser)]
#[command(name = "anr-stats")]
#[command(about = "Daily statistics collection for risk analysis records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo analysis records and risks
    Seed,
    /// Collect today's stats and send them to the stats API
    Collect {
        /// Restrict collection to these analysis record ids
        #[arg(long = "anr-id")]
        anr_ids: Vec<i32>,
    },
    /// Show the stats that would be sent, without sending them
    Preview {
        #[arg(long = "anr-id")]
        anr_ids: Vec<i32>,
        /// Print the JSON payload instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Show when stats were last collected
    Status,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(config.log_format);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let options = CollectOptions {
        stats_types: config.stats_types.clone(),
        series_limit: config.series_limit,
    };

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Collect { anr_ids } => {
            let api = StatsApiClient::new(&config.stats_api()?)
                .context("failed to build the stats API client")?;
            let service = StatsAnrService::new(PgStatsRepository::new(pool), api, options);

            match service.collect_stats(&anr_ids).await? {
                CollectOutcome::Sent { entries } => {
                    println!("Sent {entries} stats entries.");
                }
                CollectOutcome::NothingToSend => {
                    println!("No stats to send for the selected records.");
                }
            }
        }
        Commands::Preview { anr_ids, json } => {
            let today = Local::now().date_naive();
            let repository = PgStatsRepository::new(pool);
            let stats = service::collect_data(&repository, &anr_ids, &options, today).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", report::build_preview(today, &stats));
            }
        }
        Commands::Status => {
            let repository = PgStatsRepository::new(pool);
            match repository.last_collected_on().await? {
                Some(date) => println!("Stats last collected on {date}."),
                None => println!("Stats have never been collected."),
            }
        }
    }

    Ok(())
}

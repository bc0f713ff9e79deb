//! fare-sweep command line entry point
//!
//! Loads configuration (file, then `FARE_SWEEP__*` environment, then flags),
//! starts logging and runs one search. Ctrl-C stops dispatching new dates;
//! dates already in flight finish and are reported.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fare_sweep::crawling::{FareOrchestrator, JsonFileSink, OrchestratorConfig, OrchestratorError};
use fare_sweep::domain::Market;
use fare_sweep::infrastructure::{AppConfig, HttpSessionFactory, init_logging_with_config};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Departure airport code
    #[arg(long)]
    origin: Option<String>,

    /// Arrival airport code
    #[arg(long)]
    destination: Option<String>,

    /// Open-jaw: airport the return leg departs from
    #[arg(long, requires = "return_destination")]
    return_origin: Option<String>,

    /// Open-jaw: airport the return leg arrives at
    #[arg(long, requires = "return_origin")]
    return_destination: Option<String>,

    /// First departure date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last departure date (YYYY-MM-DD), inclusive
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Stay length in nights
    #[arg(long)]
    nights: Option<u32>,

    /// Maximum leg duration in hours
    #[arg(long)]
    max_hours: Option<u32>,

    /// Allowed stop counts, e.g. `--stops 0,1`
    #[arg(long, value_delimiter = ',')]
    stops: Option<Vec<u8>>,

    /// usa or canada
    #[arg(long)]
    market: Option<Market>,

    #[arg(long)]
    adults: Option<u32>,

    /// Concurrent sessions
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Directory for the JSON output
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Skip the retry pass for missing dates
    #[arg(long)]
    no_reconcile: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Flags win over file and environment values
    fn apply(self, config: &mut AppConfig) {
        let search = &mut config.search;
        if let Some(origin) = self.origin {
            search.origin = origin;
        }
        if let Some(destination) = self.destination {
            search.destination = destination;
        }
        if self.return_origin.is_some() {
            search.return_origin = self.return_origin;
            search.return_destination = self.return_destination;
        }
        if let Some(from) = self.from {
            search.date_from = from;
        }
        if let Some(to) = self.to {
            search.date_to = to;
        }
        if let Some(nights) = self.nights {
            search.stay_nights = nights;
        }
        if let Some(hours) = self.max_hours {
            search.max_duration_hours = hours;
        }
        if let Some(stops) = self.stops {
            search.stops = stops;
        }
        if let Some(market) = self.market {
            search.market = market;
        }
        if let Some(adults) = self.adults {
            search.adults = adults;
        }
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency;
        }
        if self.no_reconcile {
            config.run.reconcile = false;
        }
        if let Some(output) = self.output {
            config.output.directory = output;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
    }
}

fn load_config(cli: Cli) -> Result<AppConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| AppConfig::default_config_path().filter(|path| path.exists()));
    let mut config = AppConfig::load(path.as_deref())
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run(config: AppConfig) -> Result<ExitCode> {
    let factory = HttpSessionFactory::from_config(&config).context("Failed to prepare page inspector")?;
    let sink = JsonFileSink::new(
        config.output.directory.clone(),
        config.search.route_label(),
        config.output.pretty,
    );

    let cancellation = CancellationToken::new();
    let orchestrator = FareOrchestrator::new(
        OrchestratorConfig::from_app_config(&config),
        config.search.clone(),
        Arc::new(factory),
        Arc::new(sink),
    )
    .with_cancellation(cancellation.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, finishing dates already in flight");
            cancellation.cancel();
        }
    });

    match orchestrator.run().await {
        Ok(report) => {
            info!("✅ Run finished with status {:?}", report.status);
            println!("{report}");
            Ok(ExitCode::SUCCESS)
        }
        Err(OrchestratorError::NoUsableResults { expected, report }) => {
            error!("❌ None of {} date(s) produced a usable answer", expected);
            println!("{report}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging_with_config(&config.logging) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

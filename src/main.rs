mod aggregate;
mod config;
mod driver;
mod error;
mod models;
mod pdfgen;
mod qrbill;
mod raster;
mod workbook;

use clap::Parser;
use driver::DateSelection;
use std::path::PathBuf;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::info;
use workbook::Workbook;

/// Generates PDF invoices with Swiss QR payment slips from a workbook of
/// customers and work items.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Workbook to read, overriding the configured one.
    #[arg(long)]
    workbook: Option<PathBuf>,

    /// Directory for the generated PDFs, overriding the configured one.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Only invoice this billing date (`YYYYMMDD` or `today`).
    #[arg(long, value_parser = parse_billing_date)]
    date: Option<Date>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn parse_billing_date(value: &str) -> Result<Date, String> {
    if value.eq_ignore_ascii_case("today") {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        return Ok(now.date());
    }
    Date::parse(value, format_description!("[year][month][day]"))
        .map_err(|e| format!("expected YYYYMMDD or `today`: {e}"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("qr_invoicer=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = config::Config::load(&cli.config)?;
    if let Some(workbook) = cli.workbook {
        cfg.workbook = workbook;
    }
    if let Some(output_dir) = cli.output_dir {
        cfg.output_dir = output_dir;
    }
    info!(config = %cli.config.display(), workbook = %cfg.workbook.display(), "Starting");

    let mut book = Workbook::open(&cfg.workbook)?;
    let loaded = workbook::load(&mut book, &cfg.sheets)?;

    let selection = match cli.date {
        Some(date) => DateSelection::Only(date),
        None => DateSelection::All,
    };
    let report = driver::run(&cfg, &loaded, selection)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

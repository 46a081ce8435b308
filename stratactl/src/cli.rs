use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "stratactl")]
#[command(about = "Run and inspect strata ingestion tasks", version)]
pub struct Cli {
    /// Path to strata.toml (defaults to ./strata.toml or ./config/strata.toml)
    #[arg(long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Explicit .env file to load before reading the environment
    #[arg(long, global = true, conflicts_with = "no_env_file")]
    pub env_file: Option<PathBuf>,

    /// Do not read any .env file
    #[arg(long, global = true, default_value_t = false)]
    pub no_env_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest one dataset into its table
    Run(RunArgs),
    /// Create the dataset's table, indexes and comments if absent
    CreateTable(DatasetArgs),
    /// Print the latest stored date for the dataset's table
    Latest(DatasetArgs),
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Resolve configuration, report warnings and exit
    Check,
}

#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
    /// Dataset definition (TOML)
    #[arg(long, short = 'd')]
    pub dataset: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    /// First date to load (YYYY-MM-DD or YYYYMMDD); defaults to the day after
    /// the latest stored date
    #[arg(long, value_parser = parse_date)]
    pub start: Option<NaiveDate>,

    /// Last date to load; defaults to today
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,

    /// Ignore stored data and reload from the configured default start date
    #[arg(long, default_value_t = false, conflicts_with = "start")]
    pub full_reload: bool,

    /// Extra request filter as key=value; repeatable
    #[arg(long = "filter", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,

    /// Concurrent batches (capped by tasks.max_concurrency)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Rows requested per page
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Retries per stage after the first attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Pause between attempts, e.g. 2s or 500ms
    #[arg(long, value_parser = humantime::parse_duration)]
    pub retry_delay: Option<Duration>,

    /// Where trading days come from
    #[arg(long, value_enum, default_value_t = CalendarSource::Store)]
    pub calendar: CalendarSource,

    /// Delete staged rows identical to stored rows before merging
    #[arg(long, default_value_t = false)]
    pub skip_unchanged: bool,

    /// Print the task result as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CalendarSource {
    /// Open days from the trade_cal table
    Store,
    /// Monday to Friday
    Weekday,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .map_err(|_| format!("'{raw}' is not a date (expected YYYY-MM-DD or YYYYMMDD)"))
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("'{raw}' is not a key=value filter")),
    }
}

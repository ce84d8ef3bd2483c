//! Process wiring for the recrawl engine: flag parsing, configuration
//! loading, and the three operations the core exposes — `run`, `resume`,
//! and `verify`.

mod config_env;
mod run;
mod verify_cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use recrawl_core::RecrawlConfig;
use tracing_subscriber::EnvFilter;

/// High-throughput web recrawler: re-fetch a known seed set, classify
/// domains as alive/dead/timing-out, and verify dead domains slowly.
#[derive(Parser)]
#[command(name = "recrawl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Missing file falls back to
    /// built-in defaults with a warning.
    #[arg(short, long, global = true, default_value = "recrawl.toml")]
    config: PathBuf,

    /// Output format for the final summary.
    #[arg(short, long, value_enum, global = true, default_value = "human")]
    output: OutputFormat,

    /// Increase log verbosity (equivalent to RUST_LOG=debug).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every seed URL once, recording outcomes and dead domains.
    Run(RunArgs),
    /// Same as `run`, but skip URLs already recorded as `done`/`failed`.
    Resume(RunArgs),
    /// Slowly re-check domains the last run marked dead.
    Verify(VerifyArgs),
}

#[derive(Parser, Clone, Default)]
struct RunArgs {
    /// Override `general.workers`.
    #[arg(long)]
    workers: Option<usize>,
    /// Override `general.dns_workers`.
    #[arg(long)]
    dns_workers: Option<usize>,
    /// Override `general.transport_shards`.
    #[arg(long)]
    transport_shards: Option<usize>,
    /// Enable the HTTP probe between DNS and fetch.
    #[arg(long)]
    two_pass: bool,
    /// Override `general.domain_fail_threshold`.
    #[arg(long)]
    domain_fail_threshold: Option<u32>,
    /// Override `fetch.timeout_secs`.
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Use HEAD instead of GET; skip body read and extraction.
    #[arg(long)]
    head_only: bool,
    /// Record status + headers only; skip body + extraction.
    #[arg(long)]
    status_only: bool,
    /// Override `fetch.user_agent`.
    #[arg(long)]
    user_agent: Option<String>,
    /// Disable the failure store for this run.
    #[arg(long)]
    no_failure_store: bool,
}

#[derive(Parser, Clone, Default)]
struct VerifyArgs {
    /// Override `verify.workers`.
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = config_env::load(&cli.config)?;
    config_env::apply_env_overrides(&mut config);

    match cli.command {
        Commands::Run(args) => {
            apply_run_args(&mut config, &args, false);
            let summary = run::run(config).await?;
            print_run_summary(&summary, cli.output);
        }
        Commands::Resume(args) => {
            apply_run_args(&mut config, &args, true);
            let summary = run::run(config).await?;
            print_run_summary(&summary, cli.output);
        }
        Commands::Verify(args) => {
            if let Some(workers) = args.workers {
                config.verify.workers = workers;
            }
            let summary = verify_cmd::run(config).await?;
            print_verify_summary(&summary, cli.output);
        }
    }

    Ok(())
}

fn apply_run_args(config: &mut RecrawlConfig, args: &RunArgs, force_resume: bool) {
    if let Some(workers) = args.workers {
        config.general.workers = workers;
    }
    if let Some(dns_workers) = args.dns_workers {
        config.general.dns_workers = dns_workers;
    }
    if let Some(shards) = args.transport_shards {
        config.general.transport_shards = shards;
    }
    if args.two_pass {
        config.general.two_pass = true;
    }
    if let Some(threshold) = args.domain_fail_threshold {
        config.general.domain_fail_threshold = threshold;
    }
    if let Some(timeout) = args.timeout_secs {
        config.fetch.timeout_secs = timeout;
    }
    if args.head_only {
        config.fetch.head_only = true;
    }
    if args.status_only {
        config.fetch.status_only = true;
    }
    if let Some(ref ua) = args.user_agent {
        config.fetch.user_agent = ua.clone();
    }
    if args.no_failure_store {
        config.general.record_failures = false;
    }
    if force_resume {
        config.general.resume = true;
    }
}

fn print_run_summary(summary: &recrawl_core::RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Human => {
            println!();
            println!("{}", "recrawl run complete".bold());
            println!("  total seeds      : {}", summary.total_seeds);
            println!("  success           : {}", summary.success.to_string().green());
            println!("  failed            : {}", summary.failed.to_string().red());
            println!("  timeout           : {}", summary.timeout.to_string().yellow());
            println!("  resume-skipped    : {}", summary.resume_skipped);
            println!("  domain-skipped    : {}", summary.domain_skipped);
            println!("  elapsed           : {:.1}s", summary.elapsed_secs);
            println!("  throughput        : {:.1}/s", summary.throughput_per_sec);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary).unwrap_or_default());
        }
    }
}

fn print_verify_summary(summary: &recrawl_verify::VerifySummary, format: OutputFormat) {
    match format {
        OutputFormat::Human => {
            println!();
            println!("{}", "recrawl verify complete".bold());
            println!("  total domains     : {}", summary.total);
            println!("  alive             : {}", summary.alive.to_string().green());
            println!("  dead              : {}", summary.dead.to_string().red());
            println!("  false-positive    : {:.2}%", summary.false_positive_rate);
        }
        OutputFormat::Json => {
            #[derive(serde::Serialize)]
            struct Json {
                total: u64,
                alive: u64,
                dead: u64,
                false_positive_rate: f64,
            }
            let json = Json {
                total: summary.total,
                alive: summary.alive,
                dead: summary.dead,
                false_positive_rate: summary.false_positive_rate,
            };
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
    }
}

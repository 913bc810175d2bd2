//! CLI command definitions, routing, and tracing setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vendorlens_core::{
    ChangeEntry, ChangeKind, ChangeLog, Enricher, KeyOutcome, ProgressReporter, SkipReason,
};
use vendorlens_dataset::Dataset;
use vendorlens_shared::{
    AppConfig, IdentifierKey, RunOptions, init_config, load_config, load_config_from,
};
use vendorlens_sources::SourceRegistry;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// VendorLens: enrich a vendor dataset from national company registries.
#[derive(Parser)]
#[command(
    name = "vendorlens",
    version,
    about = "Enrich vendor records with company names and activity codes from FR, BE and DK registries.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.vendorlens/vendorlens.toml.
    #[arg(long, env = "VENDORLENS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch registry data for a set of keys and merge it into a dataset.
    Enrich(EnrichArgs),

    /// List the registered sources and their limits.
    Sources,

    /// Show row counts, classification fill rates and integrity problems.
    Stats {
        /// Dataset file (JSON list of rows).
        #[arg(long)]
        dataset: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct EnrichArgs {
    /// Keys as CC:number or CC,number (e.g. FR:552100554).
    pub keys: Vec<String>,

    /// File with one key per line; blank lines and `#` comments are skipped.
    #[arg(long)]
    pub keys_file: Option<PathBuf>,

    /// Dataset file (JSON list of rows). Created if missing.
    #[arg(long)]
    pub dataset: PathBuf,

    /// Where to write the merged dataset (defaults to --dataset).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Write the change log as JSON to this file.
    #[arg(long)]
    pub audit: Option<PathBuf>,

    /// Attempts per key, including the first.
    #[arg(long)]
    pub retry_limit: Option<u32>,

    /// Timeout for a single fetch attempt, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Maximum fetches in flight per source.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// After Ctrl-C, how long in-flight fetches may keep running.
    #[arg(long)]
    pub cancel_grace_secs: Option<u64>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "vendorlens=info",
        1 => "vendorlens=debug",
        _ => "vendorlens=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Enrich(args) => cmd_enrich(config_path, args).await,
        Command::Sources => cmd_sources(config_path).await,
        Command::Stats { dataset } => cmd_stats(&dataset).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// enrich
// ---------------------------------------------------------------------------

async fn cmd_enrich(config_path: Option<&Path>, args: EnrichArgs) -> Result<()> {
    let config = resolve_config(config_path)?;
    let options = run_options(&config, &args);

    let mut raw = args.keys.clone();
    if let Some(file) = &args.keys_file {
        let content = std::fs::read_to_string(file)
            .map_err(|e| eyre!("cannot read keys file '{}': {e}", file.display()))?;
        raw.extend(keys_from_lines(&content));
    }
    let registry = SourceRegistry::with_defaults(&config.sources)?;
    let keys = parse_keys(&raw, &registry)?;
    if keys.is_empty() {
        return Err(eyre!("no keys given: pass KEYS or --keys-file"));
    }

    let dataset = Arc::new(Dataset::open(&args.dataset)?);
    let enricher = Enricher::new(registry, dataset.clone());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    info!(
        keys = keys.len(),
        dataset = %args.dataset.display(),
        "enriching dataset"
    );

    let reporter = CliProgress::new();
    let log = enricher.run_with(keys, &options, cancel, &reporter).await?;

    let out = args.out.as_deref().unwrap_or(&args.dataset);
    dataset.save(out).await?;
    if let Some(audit) = &args.audit {
        std::fs::write(audit, log.to_json()?)
            .map_err(|e| eyre!("cannot write audit file '{}': {e}", audit.display()))?;
    }

    print_report(&log, out);
    Ok(())
}

/// Config values, then flag overrides.
fn run_options(config: &AppConfig, args: &EnrichArgs) -> RunOptions {
    let mut options = RunOptions::from(config);
    if let Some(n) = args.retry_limit {
        options.retry_limit = n;
    }
    if let Some(secs) = args.timeout_secs {
        options.timeout_per_call = Duration::from_secs(secs);
    }
    if let Some(cap) = args.concurrency {
        options.global_concurrency_cap = cap;
    }
    if let Some(secs) = args.cancel_grace_secs {
        options.cancel_grace = Some(Duration::from_secs(secs));
    }
    options
}

fn keys_from_lines(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
}

/// Parse and deduplicate, keeping first-seen order.
fn parse_keys(raw: &[String], registry: &SourceRegistry) -> Result<Vec<IdentifierKey>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::with_capacity(raw.len());
    for s in raw {
        let key = registry.canonical_key(&s.parse()?);
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    Ok(keys)
}

fn print_report(log: &ChangeLog, out: &Path) {
    let summary = log.summary();
    println!();
    println!("  Run {}", log.run_id);
    println!("  {summary}");
    for (country, counts) in &summary.per_country {
        println!("    {:<8} {counts}", country.display_name());
    }
    println!("  Success rate: {:.1}%", summary.success_rate());
    println!("  Dataset: {}", out.display());

    let problems: Vec<(&IdentifierKey, &str)> = log.iter().filter_map(not_written).collect();
    if !problems.is_empty() {
        println!();
        println!("  Not written:");
        for (key, why) in problems {
            println!("    {:<20} {why}", key.to_string());
        }
    }
    println!();
}

/// Why a fetched or failed key left the dataset untouched.
fn not_written(entry: &ChangeEntry) -> Option<(&IdentifierKey, &str)> {
    match &entry.kind {
        ChangeKind::Fail(_) => Some((&entry.key, entry.reason().unwrap_or("failed"))),
        ChangeKind::Skip(SkipReason::Conflict { detail }) => Some((&entry.key, detail.as_str())),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn key_completed(&self, outcome: &KeyOutcome, completed: usize, total: usize) {
        let status = if outcome.outcome.is_success() {
            "ok"
        } else {
            outcome.outcome.reason().unwrap_or("failed")
        };
        self.spinner
            .set_message(format!("Fetching [{completed}/{total}] {} {status}", outcome.key));
    }

    fn done(&self, _log: &ChangeLog) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// sources / stats / config
// ---------------------------------------------------------------------------

async fn cmd_sources(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let registry = SourceRegistry::with_defaults(&config.sources)?;
    let options = RunOptions::from(&config);

    println!(
        "  {:<4} {:<24} {:>11} {:>10} {:>8}",
        "CC", "SOURCE", "CONCURRENCY", "INTERVAL", "LATENCY"
    );
    for fetcher in registry.iter() {
        let country = fetcher.country();
        let cap = options
            .per_source_caps
            .get(&country)
            .copied()
            .unwrap_or_else(|| fetcher.max_concurrency());
        let interval = options
            .per_source_intervals
            .get(&country)
            .copied()
            .unwrap_or_else(|| fetcher.min_request_interval());
        let latency = if fetcher.base_latency() < Duration::from_secs(1) {
            "fast"
        } else {
            "slow"
        };
        println!(
            "  {:<4} {:<24} {:>11} {:>8}ms {:>8}",
            country.to_string(),
            fetcher.name(),
            cap,
            interval.as_millis(),
            latency
        );
    }
    Ok(())
}

async fn cmd_stats(path: &Path) -> Result<()> {
    let dataset = Dataset::open(path)?;
    let stats = dataset.stats().await;
    let report = dataset.integrity_report().await;

    println!("  Rows:     {}", stats.total_rows);
    for (country, count) in &stats.per_country {
        println!("    {country}: {count}");
    }
    println!(
        "  Enriched: {} ({:.1}%)",
        stats.enriched_rows,
        stats.fill_rate(stats.enriched_rows)
    );
    println!("  L1:       {:.1}%", stats.fill_rate(stats.l1_filled));
    println!("  L2:       {:.1}%", stats.fill_rate(stats.l2_filled));
    println!("  L3:       {:.1}%", stats.fill_rate(stats.l3_filled));

    if !report.incomplete_rows.is_empty() {
        println!("  Incomplete rows: {}", report.incomplete_rows.len());
    }
    for key in &report.invalid_registry_numbers {
        println!("  Invalid registry number: {key}");
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

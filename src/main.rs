mod db;
mod error;
mod export;
mod fetch;
mod parser;
mod persist;
mod pipeline;
mod record;
mod schema;
mod seeds;
mod settings;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use fetch::HttpFetcher;
use persist::Sinks;
use pipeline::{Driver, RunSummary};
use record::RecordStore;
use schema::{EntityKind, Rule, Schema};
use settings::Settings;

#[derive(Parser)]
#[command(name = "zipstat", about = "County and zip code demographics scraper")]
struct Cli {
    /// Settings file (default: ./zipstat.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page per seed key, extract its fields, write CSV + SQLite
    Run {
        #[arg(short, long, value_enum, default_value_t = EntityKind::Zip)]
        kind: EntityKind,
        /// Seed list: whitespace separated zip codes, or `STATE,County` lines
        #[arg(short, long)]
        seeds: PathBuf,
        /// Max keys to process (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[command(flatten)]
        out: Overrides,
    },
    /// Extract saved `<key>.html` documents from a directory without fetching
    Extract {
        #[arg(short, long, value_enum, default_value_t = EntityKind::Zip)]
        kind: EntityKind,
        #[arg(short, long)]
        dir: PathBuf,
        #[command(flatten)]
        out: Overrides,
    },
    /// List the zip codes of each county and write them as a zip seed list
    Discover {
        /// County list (`STATE,County` lines)
        #[arg(short, long)]
        seeds: PathBuf,
        /// Listing CSV
        #[arg(long, default_value = "data/zip-codes-list.csv")]
        csv: PathBuf,
        /// Zip seed list for a later `run --kind zip`
        #[arg(long, default_value = "data/zip-code-list.txt")]
        zip_list: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the field table for a kind
    Fields {
        #[arg(short, long, value_enum, default_value_t = EntityKind::Zip)]
        kind: EntityKind,
        #[arg(long)]
        json: bool,
    },
}

/// Flags that take precedence over the settings file and environment.
#[derive(Args)]
struct Overrides {
    #[arg(long)]
    csv: Option<PathBuf>,
    #[arg(long)]
    db: Option<PathBuf>,
    /// Minimum milliseconds between requests
    #[arg(long)]
    pace_ms: Option<u64>,
    /// Requests in flight at once
    #[arg(long)]
    concurrency: Option<usize>,
    /// Persist every record right after extraction
    #[arg(long)]
    incremental: bool,
}

impl Overrides {
    fn apply(self, settings: &mut Settings) -> anyhow::Result<()> {
        if let Some(csv) = self.csv {
            settings.csv_path = Some(csv);
        }
        if let Some(db) = self.db {
            settings.db_path = db;
        }
        if let Some(pace) = self.pace_ms {
            settings.pace_ms = pace;
        }
        if let Some(n) = self.concurrency {
            settings.concurrency = n;
        }
        settings.incremental |= self.incremental;
        settings.validate()?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run { kind, seeds, limit, out } => {
            out.apply(&mut settings)?;
            let schema = Schema::for_kind(kind);
            let mut keys = seeds::load_keys(&seeds, kind)?;
            if let Some(n) = limit {
                keys.truncate(n);
            }
            if keys.is_empty() {
                println!("No keys in {}.", seeds.display());
                return Ok(());
            }

            let urls = settings.url_template(kind)?;
            let fetcher = Arc::new(HttpFetcher::new(&settings.user_agent, settings.timeout())?);
            let mut sinks = Sinks::open(schema, &settings.csv_path(kind), &settings.db_path)?;
            let driver = Driver::new(fetcher, schema, urls, settings.pace(), settings.concurrency);

            println!("Fetching {} {} pages...", keys.len(), kind);
            let pb = progress_bar(keys.len())?;
            let stop = stop_on_ctrl_c();
            let mut store = RecordStore::new();
            let incremental = settings.incremental;
            let mut summary = driver
                .run(keys, &mut store, incremental.then_some(&mut sinks), &stop, &pb)
                .await;
            pb.finish_and_clear();

            if !incremental {
                summary.persisted = sinks.persist_all(&store);
            }
            sinks.close()?;
            print_summary(&summary);
            Ok(())
        }
        Commands::Extract { kind, dir, out } => {
            out.apply(&mut settings)?;
            let schema = Schema::for_kind(kind);
            let mut sinks = Sinks::open(schema, &settings.csv_path(kind), &settings.db_path)?;

            let pb = progress_bar(0)?;
            let store = pipeline::extract_documents(&dir, schema, &pb)?;
            pb.finish_and_clear();
            if store.is_empty() {
                warn!(dir = %dir.display(), "no .html documents found");
            }

            let report = sinks.persist_all(&store);
            sinks.close()?;
            println!(
                "Extracted {} documents, inserted {} rows ({} failed).",
                store.len(),
                report.inserted,
                report.failures.len()
            );
            for f in &report.failures {
                println!("  {}: {}", f.key, f.reason);
            }
            Ok(())
        }
        Commands::Discover { seeds, csv, zip_list, db } => {
            if let Some(db) = db {
                settings.db_path = db;
            }
            discover(&settings, &seeds, &csv, &zip_list).await
        }
        Commands::Fields { kind, json } => {
            let schema = Schema::for_kind(kind);
            if json {
                println!("{}", serde_json::to_string_pretty(schema)?);
            } else {
                print_fields(schema);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn discover(settings: &Settings, seeds: &Path, csv_path: &Path, zip_list: &Path) -> anyhow::Result<()> {
    let counties = seeds::load_counties(seeds)?;
    if counties.is_empty() {
        println!("No counties in {}.", seeds.display());
        return Ok(());
    }

    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn, Schema::for_kind(EntityKind::County))?;
    let file = File::create(csv_path).with_context(|| format!("Failed to create {:?}", csv_path))?;
    let mut listing = export::listing_writer(BufWriter::new(file))?;

    let urls = settings.url_template(EntityKind::County)?;
    let fetcher = HttpFetcher::new(&settings.user_agent, settings.timeout())?;

    println!("Listing zip codes for {} counties...", counties.len());
    let pb = progress_bar(counties.len())?;
    let stop = stop_on_ctrl_c();
    let (rows, errors) = pipeline::discover(&fetcher, &urls, settings.pace(), &counties, &stop, &pb).await;
    pb.finish_and_clear();

    for r in &rows {
        listing.write_record([&r.state, &r.county, &r.zip_code])?;
    }
    listing.flush()?;

    let report = db::write_listings(&conn, &rows)?;
    let seed_text = seeds::zip_list_text(rows.iter().map(|r| r.zip_code.as_str()));
    std::fs::write(zip_list, seed_text)
        .with_context(|| format!("Failed to write {:?}", zip_list))?;

    println!(
        "Found {} zip codes ({} new, {} already listed), {} county fetch errors.",
        rows.len(),
        report.inserted,
        report.failures.len(),
        errors
    );
    info!(zip_list = %zip_list.display(), "zip seed list written");
    Ok(())
}

fn stop_on_ctrl_c() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current key");
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}

fn progress_bar(len: usize) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

fn print_summary(s: &RunSummary) {
    println!(
        "Done: {} keys ({} fetched, {} fetch errors), {} rows inserted, {} write failures.",
        s.keys,
        s.fetched,
        s.fetch_errors,
        s.persisted.inserted,
        s.persisted.failures.len()
    );
    for f in &s.persisted.failures {
        println!("  {}: {}", f.key, f.reason);
    }
    if s.interrupted {
        println!("Interrupted: remaining keys were not fetched.");
    }
}

fn print_fields(schema: &Schema) {
    println!(
        "{:<24} | {:<24} | {:<7} | {:<13} | {:<10} | {}",
        "Field", "Column", "Type", "Rule", "Normalize", "Default"
    );
    println!("{}", "-".repeat(100));
    println!(
        "{:<24} | {:<24} | {:<7} | {:<13} | {:<10} | -",
        schema.key_name, schema.key_column, "TEXT", "key", "-"
    );
    for f in schema.fields {
        let rule = match f.rule {
            Rule::TagBounded { .. } => "tag-bounded",
            Rule::Parenthesized { .. } => "parenthesized",
            Rule::Badge { .. } => "badge",
        };
        println!(
            "{:<24} | {:<24} | {:<7} | {:<13} | {:<10} | {}",
            f.name,
            f.column,
            f.sql_type.as_sql(),
            rule,
            format!("{:?}", f.normalize),
            f.default
        );
    }
    println!("\n{} fields | table {} | {}", schema.len(), schema.table, schema.url_template);
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

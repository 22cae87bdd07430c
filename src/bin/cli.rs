//! Optics CLI
//!
//! Offline administration of an Optics data directory:
//! - Query and count events
//! - List buckets
//! - Ingest JSON lines
//! - Purge, lock, unlock and sweep
//! - Generate a default config
//!
//! The CLI opens the store directly, so stop the server first when pointing
//! it at a live data directory.

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use optics::config::Config;
use optics::service::OpticsService;
use optics::storage::{open_store, OpticsEvent};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "optics-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and administer an Optics data directory")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory, overrides the config
    #[arg(short, long, global = true)]
    pub data_dir: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print matching events
    Query {
        /// Filter expression, e.g. 'LOG_LEVEL="ERROR" and host="web1"'
        #[arg(default_value = "")]
        query: String,
        /// Time range ending now (e.g., 30m, 6h, 1d)
        #[arg(short, long, default_value = "1h")]
        last: String,
        /// Follow continuation tokens through every page
        #[arg(short, long)]
        all: bool,
    },

    /// Count matching events
    Count {
        #[arg(default_value = "")]
        query: String,
        /// Time range ending now (e.g., 30m, 6h, 1d)
        #[arg(short, long, default_value = "1h")]
        last: String,
    },

    /// List buckets
    Buckets,

    /// Ingest events from a JSON lines file ("-" for stdin)
    Ingest {
        path: PathBuf,
    },

    /// Drop every unlocked bucket
    Purge {
        /// Confirm the purge
        #[arg(long)]
        yes: bool,
    },

    /// Protect all buckets from eviction
    Lock,

    /// Re-enable eviction
    Unlock,

    /// Run the retention sweep now
    Sweep,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "optics=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let config = optics::config::generate_default_config();
        match output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &config)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", config),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }

    let store = open_store(&config.storage).context("opening store")?;
    let service = OpticsService::open(store, config.optics.clone())
        .await
        .context("rebuilding buckets")?;
    let json = cli.format == "json";

    match cli.command {
        Commands::Query { query, last, all } => {
            let (start, end) = range(&last)?;
            let events = if all {
                service.query_all(&query, start, end).await?
            } else {
                let response = service.query(&query, start, end, 0).await;
                if let Some(error) = response.error {
                    bail!("query failed: {}", error);
                }
                if response.continuation_token != 0 && !json {
                    eprintln!(
                        "Showing first {} events, use --all for the rest",
                        response.events.len()
                    );
                }
                response.events
            };
            print_events(&events, json)?;
        }

        Commands::Count { query, last } => {
            let (start, end) = range(&last)?;
            // validate first, query_count reports errors as zero
            optics::query::compile_query(&query)?;
            let count = service.query_count(&query, start, end).await;
            if json {
                println!("{}", serde_json::json!({ "count": count }));
            } else {
                println!("{}", count);
            }
        }

        Commands::Buckets => {
            let buckets = service.set().buckets().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&buckets)?);
            } else {
                println!("{:<12} {:<10} {:>10} {:>10}", "BUCKET", "STATE", "EVENTS", "LAST ID");
                for bucket in &buckets {
                    println!(
                        "{:<12} {:<10} {:>10} {:>10}",
                        bucket.key,
                        format!("{:?}", bucket.state).to_lowercase(),
                        bucket.events,
                        bucket.last_id
                    );
                }
                println!("{} buckets", buckets.len());
            }
        }

        Commands::Ingest { path } => {
            let events = read_events(&path)?;
            let total = events.len();
            let accepted = service.add_batch(events);
            let committed = service.shutdown().await;
            let stats = service.stats().await;
            println!(
                "Read {} events: {} queued, {} committed, {} dropped",
                total, accepted, committed, stats.dropped
            );
        }

        Commands::Purge { yes } => {
            if !yes {
                bail!("refusing to purge without --yes");
            }
            let dropped = service.purge().await?;
            println!("Dropped {} buckets", dropped);
        }

        Commands::Lock => {
            service.lock().await?;
            println!("Locked {} buckets", service.set().bucket_count().await);
        }

        Commands::Unlock => {
            service.unlock().await?;
            println!("Unlocked {} buckets", service.set().bucket_count().await);
        }

        Commands::Sweep => {
            let dropped = service.drop_data(Utc::now()).await?;
            println!("Evicted {} buckets", dropped);
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn range(last: &str) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = Utc::now();
    Ok((end - parse_duration(last)?, end))
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(minutes) = s.strip_suffix('m') {
        Ok(Duration::minutes(minutes.parse()?))
    } else if let Some(hours) = s.strip_suffix('h') {
        Ok(Duration::hours(hours.parse()?))
    } else if let Some(days) = s.strip_suffix('d') {
        Ok(Duration::days(days.parse()?))
    } else {
        bail!("Invalid duration format: {}. Use: 30m, 6h, 1d", s)
    }
}

/// One `OpticsEvent` JSON object per line, blank lines skipped
fn read_events(path: &PathBuf) -> anyhow::Result<Vec<OpticsEvent>> {
    let reader: Box<dyn BufRead> = if path.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(path).with_context(|| format!("opening {:?}", path))?;
        Box::new(BufReader::new(file))
    };

    let mut events = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: OpticsEvent = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid event", number + 1))?;
        events.push(event);
    }
    Ok(events)
}

fn print_events(events: &[OpticsEvent], json: bool) -> anyhow::Result<()> {
    if json {
        for event in events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    for event in events {
        let time = event
            .datetime()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let properties: Vec<String> = event
            .properties
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("{} #{:<6} {}", time, event.id, properties.join(" "));
    }
    println!("{} events", events.len());
    Ok(())
}

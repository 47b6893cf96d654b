//! devicedb - Load a hardware source tree and print the device database as JSON

mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use devicedb_core::DeviceDatabase;
use output::Collection;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "devicedb")]
#[command(about = "Board, device, binding, sample and configuration database for hardware source trees")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "devicedb.toml")]
    config: PathBuf,

    /// Root of the source tree (overrides the configuration file)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Collections to print (all when omitted)
    #[arg(value_enum)]
    collections: Vec<Collection>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries the JSON document
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("devicedb v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(root) = args.root {
        config.database.root = root;
    }
    if args.pretty {
        config.output.pretty = true;
    }

    let mut db = DeviceDatabase::new();
    let report = db.load(&config.database.root, &config.layout);

    if !report.is_clean() {
        warn!(
            failures = report.failures.len(),
            "Some files could not be loaded, see log for details"
        );
    }

    println!("{}", output::render(&db, &args.collections, config.output.pretty)?);

    Ok(())
}

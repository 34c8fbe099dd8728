//! keystack-watch
//!
//! Writes keys through one store handle and watches one of them through
//! another, both backed by the same in-memory storage.
//!
//! Usage:
//!   keystack-watch --set user/sw/keystack/watch/value=42 --interval-ms 100

use anyhow::{Context, Result};
use clap::Parser;
use keystack_io::{IoBinding, TokioBinding};
use keystack_plugin_host::StoreConfig;
use keystack_types::KeyName;
use keystack_watch::{Assignment, Demo, DEFAULT_WATCHED_KEY};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "keystack-watch")]
#[command(about = "Watch a key written through another store handle")]
struct Args {
    /// Store configuration file (keystack.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key bound to the watched variable
    #[arg(short, long, default_value = DEFAULT_WATCHED_KEY)]
    key: String,

    /// Writes to perform, in order
    #[arg(short, long = "set", value_name = "KEY=VALUE")]
    set: Vec<Assignment>,

    /// Reactor timer interval in milliseconds
    #[arg(long, default_value = "200")]
    interval_ms: u64,

    /// Enable verbose debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => StoreConfig::load_from(path),
        None => StoreConfig::default(),
    };
    let watched = KeyName::parse(&args.key).context("invalid --key")?;
    let interval = Duration::from_millis(args.interval_ms.max(1));

    let mut demo = Demo::open(&config, &watched)?;
    let binding = Arc::new(TokioBinding::current()?);
    demo.watch(binding.clone(), interval)?;

    for assignment in &args.set {
        demo.write(assignment)?;
        tokio::time::sleep(interval * 2).await;
    }
    tokio::time::sleep(interval * 2).await;

    binding.cleanup();
    demo.dispatch()?;
    info!(
        key = %watched,
        value = demo.value(),
        callbacks = demo.callback_count(),
        "done"
    );
    println!("{watched} = {}", demo.value());
    demo.close()
}

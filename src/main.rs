//! Strata Cache CLI
//!
//! Builds a cache manager from configuration and runs a single operation
//! against it, printing the result as JSON on stdout.
//!
//! ```text
//! strata-cache [--config FILE] [--log-level L] [--log-json] <command>
//!
//!   health                                   probe every layer
//!   info                                     per-layer size and hit rate
//!   get KEY [--layer L]                      read a value
//!   set KEY JSON [--ttl-ms N] [--layer L] [--propagate]
//!   delete KEY [--layer L] [--propagate]
//!   clear [--layer L]                        clear one or all layers
//!   cleanup                                  sweep expired entries
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strata_cache::{
    CacheManager, CacheManagerConfig, DeleteOptions, GetOptions, HealthStatus, SetOptions,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Strata Cache - Multi-layer cache manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file (environment variables are used otherwise)
    #[arg(long, env = "CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe every layer with a set/get/delete round trip
    Health,

    /// Show per-layer size, capacity and hit rate
    Info,

    /// Read a value
    Get {
        key: String,
        #[arg(long)]
        layer: Option<String>,
    },

    /// Write a JSON value
    Set {
        key: String,
        /// Value as a JSON document
        value: String,
        #[arg(long)]
        ttl_ms: Option<u64>,
        #[arg(long)]
        layer: Option<String>,
        /// Also write to every other layer
        #[arg(long)]
        propagate: bool,
    },

    /// Remove a value
    Delete {
        key: String,
        #[arg(long)]
        layer: Option<String>,
        /// Also remove from every other layer
        #[arg(long)]
        propagate: bool,
    },

    /// Clear one layer, or all of them
    Clear {
        #[arg(long)]
        layer: Option<String>,
    },

    /// Sweep expired entries from every layer
    Cleanup,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => CacheManagerConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CacheManagerConfig::from_env().context("reading configuration from environment")?,
    };

    info!(version = strata_cache::VERSION, "Starting {}", strata_cache::NAME);

    let cache = CacheManager::with_config(config)
        .await
        .context("initializing cache manager")?;

    let result = run(&cache, args.command).await;

    // Let propagation and write-behind tasks finish before exiting
    cache.destroy().await;

    let (output, healthy) = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

/// Run one command, returning its JSON output and whether it succeeded
async fn run(cache: &CacheManager, command: Command) -> anyhow::Result<(Value, bool)> {
    let output = match command {
        Command::Health => {
            let health = cache.health_check().await;
            let healthy = health.status != HealthStatus::Unhealthy;
            return Ok((serde_json::to_value(health)?, healthy));
        }

        Command::Info => json!({
            "version": strata_cache::VERSION,
            "defaultLayer": cache.config().default_layer,
            "layers": cache.layer_info(),
            "metrics": cache.get_metrics(),
        }),

        Command::Get { key, layer } => {
            let mut options = GetOptions::default();
            options.layer = layer;
            let value: Option<Value> = cache.get(&key, options).await?;
            json!({ "key": key, "found": value.is_some(), "value": value })
        }

        Command::Set {
            key,
            value,
            ttl_ms,
            layer,
            propagate,
        } => {
            let value: Value =
                serde_json::from_str(&value).context("value must be a JSON document")?;
            let mut options = SetOptions::default().propagate(propagate);
            options.layer = layer;
            options.ttl = ttl_ms.map(Duration::from_millis);
            let stored = cache.set(&key, &value, options).await?;
            json!({ "key": key, "stored": stored })
        }

        Command::Delete {
            key,
            layer,
            propagate,
        } => {
            let mut options = DeleteOptions::default().propagate(propagate);
            options.layer = layer;
            let deleted = cache.delete(&key, options).await?;
            json!({ "key": key, "deleted": deleted })
        }

        Command::Clear { layer } => {
            cache.clear(layer.as_deref()).await?;
            json!({ "cleared": layer.map(|l| vec![l]).unwrap_or_else(|| cache.layer_names()) })
        }

        Command::Cleanup => {
            let removed = cache.cleanup().await;
            json!({ "removed": removed })
        }
    };

    Ok((output, true))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so stdout stays valid JSON
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

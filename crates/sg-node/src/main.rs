use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use sg_driver::MemDriver;
use sg_exec::{DataConfig, DataServices};
use sg_keys::{ShardChild, ShardKey};

type Key = ShardKey<i16, i64>;
type ChildKey = ShardChild<i16, i64, i32>;

#[derive(clap::Parser, Debug)]
#[command(name = "shardgate", about = "Shard key and data-access configuration tool")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print the external token for a key
    Encode {
        #[arg(long)]
        origin: char,
        #[arg(long)]
        shard: i16,
        #[arg(long)]
        record: i64,
        #[arg(long)]
        child: Option<i32>,
    },
    /// Decode an external token
    Decode { token: String },
    /// Load the configuration and build every connection manager
    CheckConfig,
    /// Print retry delays for a resilience strategy
    Backoff {
        #[arg(long)]
        strategy: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    observability: ObservabilityConfig,
    #[serde(default)]
    data: DataConfig<i16>,
}

fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new()
        .merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("SHARDGATE_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    match cli.command {
        Command::Encode { origin, shard, record, child } => {
            println!("{}", encode(origin, shard, record, child)?);
        }
        Command::Decode { token } => {
            println!("{}", decode(&token)?);
        }
        Command::CheckConfig => check_config(&config.data)?,
        Command::Backoff { strategy } => {
            let resilience = config.data.resilience.resolve(strategy.as_deref());
            tracing::debug!(?resilience, "resolved strategy");
            for attempt in 1..=resilience.retry_count {
                println!("retry {attempt}: {} ms", resilience.backoff(attempt).as_millis());
            }
        }
    }

    Ok(())
}

fn encode(origin: char, shard: i16, record: i64, child: Option<i32>) -> anyhow::Result<String> {
    let token = match child {
        Some(child) => ChildKey::try_new(origin, shard, record, child)?.to_external_string()?,
        None => Key::try_new(origin, shard, record)?.to_external_string()?,
    };
    Ok(token)
}

/// Tries the record shape first, then the child shape.
fn decode(token: &str) -> anyhow::Result<String> {
    if let Ok(key) = Key::from_external_string(token) {
        return Ok(format!(
            "origin={} shard={} record={}",
            key.origin(),
            key.shard_id(),
            key.record_id()
        ));
    }
    let key = ChildKey::from_external_string(token)
        .with_context(|| format!("'{token}' is not a record or child key"))?;
    Ok(format!(
        "origin={} shard={} record={} child={}",
        key.origin(),
        key.shard_id(),
        key.record_id(),
        key.child_id()
    ))
}

fn check_config(data: &DataConfig<i16>) -> anyhow::Result<()> {
    let services = DataServices::build(data, Arc::new(MemDriver::new()))
        .context("data-access configuration is invalid")?;

    let mut databases: Vec<_> = services.database_names().collect();
    databases.sort_unstable();
    for name in databases {
        tracing::info!(database = name, "database ok");
    }

    let mut sets: Vec<_> = services.shard_set_names().collect();
    sets.sort_unstable();
    for name in sets {
        let set = services.shard_set(name)?;
        tracing::info!(
            shard_set = name,
            shards = set.len(),
            default_shard = ?set.default_shard().map(|s| *s.shard_id()),
            "shard set ok"
        );
    }
    println!("configuration ok");
    Ok(())
}

//! shardvault CLI
//!
//! Usage:
//!   shardvault init --class Article --property title:text --property views:int
//!   shardvault stats --class Article
//!   shardvault drop --class Article
//!
//! Root path, shard count, distance and dimensions default to the
//! `SHARDVAULT_*` environment variables.

use clap::{Parser, Subcommand};
use shardvault::{ClassSchema, DataType, EngineConfig, Index, PropertyDef};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardvault")]
#[command(about = "Inspect and manage shardvault class indexes")]
#[command(version)]
struct Args {
    /// Root directory (overrides SHARDVAULT_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Number of shards (overrides SHARDVAULT_SHARDS)
    #[arg(long, global = true)]
    shards: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create (or load) the index of a class
    Init {
        #[arg(long)]
        class: String,

        /// Property as name:type, e.g. title:text
        #[arg(long = "property", value_parser = parse_property)]
        properties: Vec<PropertyDef>,
    },
    /// Print shard status, object counts and persisted files
    Stats {
        #[arg(long)]
        class: String,
    },
    /// Drop the index of a class and delete every file it persisted
    Drop {
        #[arg(long)]
        class: String,
    },
}

fn parse_property(s: &str) -> Result<PropertyDef, String> {
    let (name, data_type) = s
        .split_once(':')
        .ok_or_else(|| format!("expected name:type, got {}", s))?;
    let data_type: DataType = data_type.parse()?;
    Ok(PropertyDef::new(name, data_type))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,shardvault=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut engine = EngineConfig::from_env()?;
    if let Some(root) = args.root {
        engine.root_path = root;
    }
    if let Some(shards) = args.shards {
        anyhow::ensure!(shards > 0, "--shards must be at least 1");
        engine.shard_count = shards;
    }
    tracing::debug!("Loaded config: {:?}", engine);

    match args.command {
        Command::Init { class, properties } => {
            let mut schema = ClassSchema::new(&class);
            schema.properties = properties;
            let index = open(&engine, schema).await?;
            println!(
                "{}: {} shards, {} files",
                class,
                index.shard_names().len(),
                index.artifacts().await?.len()
            );
            index.shutdown().await?;
        }
        Command::Stats { class } => {
            let index = open(&engine, ClassSchema::new(&class)).await?;
            for name in index.shard_names() {
                let shard = index.shard(&name)?;
                println!(
                    "{}/{}: {} objects, status {}, {} files",
                    class,
                    name,
                    shard.object_count().await?,
                    shard.status().await,
                    shard.artifacts().await?.len()
                );
            }
            if let Some(first) = index.shard_names().first() {
                for def in index.shard(first)?.properties().await? {
                    println!("  property {}: {}", def.name, def.data_type);
                }
            }
            index.shutdown().await?;
        }
        Command::Drop { class } => {
            let index = open(&engine, ClassSchema::new(&class)).await?;
            index.drop_index().await?;
            println!("{}: dropped", class);
        }
    }

    Ok(())
}

async fn open(engine: &EngineConfig, schema: ClassSchema) -> anyhow::Result<Index> {
    let config = engine.index_config(&schema.name);
    let index = Index::new(config, engine.sharding_state(), schema).await?;
    Ok(index)
}

//! Aegis CLI.
//!
//! Resolves permissions against MongoDB through the shared cache, and
//! issues or watches invalidations.

use std::sync::Arc;

use aegis::cache::{
    InvalidationBus, LocalBus, MemorySharedTier, PermissionCache, RedisBus, RedisSharedTier,
    SharedTier,
};
use aegis::config::Config;
use aegis::database::{Database, MongoPermissionStore};
use aegis::permissions::{PermissionService, Permissions, Snowflake};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(name = "aegis", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a member's effective permissions.
    Check(Target),

    /// Exit with an error unless the member holds every listed permission.
    Require {
        #[command(flatten)]
        target: Target,

        /// Flag names, e.g. SEND_MESSAGES (case-insensitive).
        #[arg(required = true)]
        permissions: Vec<String>,
    },

    /// Purge cached permissions for a guild, or one member of it.
    Invalidate {
        #[arg(short, long)]
        guild: Snowflake,

        #[arg(short, long)]
        user: Option<Snowflake>,
    },

    /// Stay subscribed to invalidations until interrupted.
    Watch,
}

#[derive(Args)]
struct Target {
    #[arg(short, long)]
    user: Snowflake,

    #[arg(short, long)]
    guild: Snowflake,

    #[arg(short, long)]
    channel: Option<Snowflake>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aegis=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    info!("Connecting to MongoDB...");
    let db = Database::connect(&config.mongodb_uri, &config.mongodb_database).await?;
    db.ensure_indexes().await?;

    let (shared, bus): (Arc<dyn SharedTier>, Arc<dyn InvalidationBus>) = match &config.redis_url {
        Some(url) => {
            info!("Connecting to Redis...");
            (
                Arc::new(RedisSharedTier::connect(url).await?),
                Arc::new(RedisBus::connect(url).await?),
            )
        }
        None => {
            warn!("REDIS_URL not set, shared cache and invalidation stay in-process");
            (Arc::new(MemorySharedTier::new()), Arc::new(LocalBus::new()))
        }
    };

    let cache = Arc::new(PermissionCache::start(config.cache.clone(), shared, bus).await?);
    let service = PermissionService::new(Arc::new(MongoPermissionStore::new(&db)), cache.clone());

    let result = run(cli.command, &service).await;

    cache.shutdown().await;
    db.client().clone().shutdown().await;

    result
}

async fn run(command: Command, service: &PermissionService) -> anyhow::Result<()> {
    match command {
        Command::Check(target) => {
            let perms = resolve(service, &target).await?;
            println!("{perms}");
            for name in perms.names() {
                println!("  {name}");
            }
        }
        Command::Require { target, permissions } => {
            let required = permissions.iter().try_fold(Permissions::none(), |acc, name| {
                Permissions::from_name(name)
                    .map(|flag| acc | flag)
                    .with_context(|| format!("unknown permission {name:?}"))
            })?;

            match target.channel {
                Some(channel) => {
                    service
                        .require_channel_permission(target.user, target.guild, channel, required)
                        .await?
                }
                None => {
                    service
                        .require_guild_permission(target.user, target.guild, required)
                        .await?
                }
            }
            println!("granted");
        }
        Command::Invalidate { guild, user } => {
            match user {
                Some(user) => service.invalidate_permissions(user, guild).await,
                None => service.invalidate_guild_permissions(guild).await,
            }
            info!("Invalidation published for guild {}", guild);
        }
        Command::Watch => {
            info!("Watching invalidations, press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;

            let stats = service.cache().stats();
            info!(
                "Stopping (local hits {}, shared hits {}, computed {}, shared errors {})",
                stats.local_hits, stats.shared_hits, stats.computed, stats.shared_errors
            );
        }
    }

    Ok(())
}

async fn resolve(service: &PermissionService, target: &Target) -> anyhow::Result<Permissions> {
    let perms = match target.channel {
        Some(channel) => {
            service
                .channel_permissions(target.user, target.guild, channel)
                .await?
        }
        None => service.guild_permissions(target.user, target.guild).await?,
    };
    Ok(perms)
}

// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use condaplan::config::Config;
use condaplan::db::models::Revision;
use condaplan::repository::{
    ChannelIndexCache, ChannelIndexLoader, HttpFetcher, Priority, PriorityMode, SubdirHandle,
};
use condaplan::Error;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "condaplan")]
#[command(author, version, about = "Channel index cache and transaction planner for conda environments", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "condaplan.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the history database
    Init {
        /// Database path
        #[arg(short, long, default_value = "condaplan.db")]
        db_path: String,
    },
    /// Load channel indices and print them in solver priority order
    Channels {
        /// Channels to load instead of the configured ones
        channels: Vec<String>,
        /// Target platform subdir
        #[arg(short, long)]
        platform: Option<String>,
        /// Channel priority mode (strict, flexible, disabled)
        #[arg(long)]
        priority: Option<PriorityMode>,
    },
    /// Show what the index cache would do for each subdir, without fetching
    CacheStatus {
        /// Channels to inspect instead of the configured ones
        channels: Vec<String>,
        /// Target platform subdir
        #[arg(short, long)]
        platform: Option<String>,
    },
    /// Show recorded transactions of a prefix
    History {
        /// Prefix path
        prefix: String,
        /// Database path
        #[arg(short, long, default_value = "condaplan.db")]
        db_path: String,
    },
    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Load channels, retrying against later cache roots when a cache write fails
fn load_with_fallback(
    config: &Config,
    channels: &[String],
    platform: &str,
    mode: PriorityMode,
) -> Result<Vec<(SubdirHandle, Priority)>> {
    let fetcher = HttpFetcher::new()?;
    let first = config.writable_cache_dir()?;
    let mut cache_dirs = vec![first.clone()];
    cache_dirs.extend(config.fallback_cache_dirs(&first));

    let mut last_error = None;
    for cache_dir in cache_dirs {
        let cache = ChannelIndexCache::new(&cache_dir);
        let loader = ChannelIndexLoader::from_config(&cache, &fetcher, config)?;
        match loader.load(channels, platform, mode) {
            Err(e @ Error::CacheIo { .. }) => {
                warn!("{}, trying next cache directory", e);
                last_error = Some(e);
            }
            other => return Ok(other?),
        }
    }

    match last_error {
        Some(e) => Err(e.into()),
        None => Err(anyhow::anyhow!("No usable cache directory")),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing history database at: {}", db_path);
            condaplan::db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Channels {
            channels,
            platform,
            priority,
        }) => {
            let config = Config::load(&cli.config)?;
            let channels = if channels.is_empty() { config.channels.clone() } else { channels };
            let platform = platform.unwrap_or_else(|| config.subdir.clone());
            let mode = priority.unwrap_or(config.channel_priority);

            let loaded = load_with_fallback(&config, &channels, &platform, mode)?;
            println!("Subdirs for {} ({} priority):", platform, mode);
            for (handle, priority) in &loaded {
                println!(
                    "  {} {} [{} packages]",
                    priority,
                    handle.url(),
                    handle.records.len()
                );
            }
            println!("\nTotal: {} subdir(s)", loaded.len());
            Ok(())
        }
        Some(Commands::CacheStatus { channels, platform }) => {
            let config = Config::load(&cli.config)?;
            let channels = if channels.is_empty() { config.channels.clone() } else { channels };
            let platform = platform.unwrap_or_else(|| config.subdir.clone());

            let cache = ChannelIndexCache::new(config.writable_cache_dir()?);
            let fetcher = HttpFetcher::new()?;
            let loader = ChannelIndexLoader::from_config(&cache, &fetcher, &config)?;
            let options = config.resolve_options();
            let now = SystemTime::now();

            for (channel, subdir) in loader.expand(&channels, &platform)? {
                let entry = cache.get_or_create(&channel.credentialed_subdir_url(&subdir));
                let decision = cache.decide(&entry, &options, now);
                let age = if entry.has_cached_json() {
                    format!("{}s old", entry.age(now).as_secs())
                } else {
                    "not cached".to_string()
                };
                println!("  {} ({}): {:?}", entry.url(), age, decision);
            }
            Ok(())
        }
        Some(Commands::History { prefix, db_path }) => {
            let conn = condaplan::db::open(&db_path)?;
            let revisions = Revision::list_for_prefix(&conn, &prefix)?;

            if revisions.is_empty() {
                println!("No history for {}.", prefix);
            } else {
                println!("History of {}:", prefix);
                for revision in &revisions {
                    println!("  [{}] {}", revision.id.unwrap_or_default(), revision.created_at);
                    if !revision.specs_to_add.is_empty() {
                        println!("    +specs: {}", revision.specs_to_add.join(", "));
                    }
                    if !revision.specs_to_remove.is_empty() {
                        println!("    -specs: {}", revision.specs_to_remove.join(", "));
                    }
                    for dist in &revision.unlink {
                        println!("    -{}", dist);
                    }
                    for dist in &revision.link {
                        println!("    +{}", dist);
                    }
                }
                println!("\nTotal: {} revision(s)", revisions.len());
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "condaplan", &mut std::io::stdout());
            Ok(())
        }
        None => {
            println!("condaplan v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'condaplan --help' for usage information");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_channels_command() {
        let cli = Cli::parse_from([
            "condaplan",
            "channels",
            "conda-forge",
            "bioconda",
            "--platform",
            "linux-64",
            "--priority",
            "strict",
        ]);
        match cli.command {
            Some(Commands::Channels {
                channels,
                platform,
                priority,
            }) => {
                assert_eq!(channels, vec!["conda-forge", "bioconda"]);
                assert_eq!(platform.as_deref(), Some("linux-64"));
                assert_eq!(priority, Some(PriorityMode::Strict));
            }
            _ => panic!("expected channels command"),
        }
    }
}

//! repo-cache - maintenance tool for the local block cache
//!
//! Inspects and trims a block cache directory without starting a backup
//! client.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use repo_cache::block::local::{BLOCKS_SUBDIRECTORY, CACHE_SHARDS, LIST_CACHE_ID};
use repo_cache::block::sweep;
use repo_cache::{FilesystemStorage, Storage};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Show blob count and size of a cache
    Info { cache_dir: PathBuf },
    /// Trim a cache down to a size budget
    Sweep { cache_dir: PathBuf, max_bytes: u64 },
    /// Delete the cached index listing
    ClearList { cache_dir: PathBuf },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"repo-cache - Maintain the local block cache of a backup client

USAGE:
    repo-cache info [cache_dir]
    repo-cache sweep <max_bytes> [cache_dir]
    repo-cache clear-list [cache_dir]
    repo-cache help

COMMANDS:
    info        Show number of cached blocks and total size
    sweep       Delete oldest cached blocks until the cache fits in <max_bytes>
    clear-list  Delete the cached index listing so it is refetched
    help        Show this help message

If cache_dir is omitted, the platform cache directory is used.

ENVIRONMENT:
    RUST_LOG         Log level (trace, debug, info, warn, error)
"#
    );
}

fn cache_dir_arg(args: &[String], index: usize) -> Result<PathBuf> {
    match args.get(index) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => repo_cache::CachingOptions::default_cache_directory()
            .ok_or_else(|| anyhow!("No cache directory given and no platform default available")),
    }
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "info" => Ok(Command::Info {
            cache_dir: cache_dir_arg(&args, 2)?,
        }),
        "sweep" => {
            let max_bytes = args
                .get(2)
                .ok_or_else(|| anyhow!("Usage: repo-cache sweep <max_bytes> [cache_dir]"))?
                .parse::<u64>()
                .context("max_bytes must be a number of bytes")?;
            Ok(Command::Sweep {
                cache_dir: cache_dir_arg(&args, 3)?,
                max_bytes,
            })
        }
        "clear-list" => Ok(Command::ClearList {
            cache_dir: cache_dir_arg(&args, 2)?,
        }),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

fn open_storage(cache_dir: &Path) -> Result<FilesystemStorage> {
    let blocks_dir = cache_dir.join(BLOCKS_SUBDIRECTORY);
    FilesystemStorage::open(&blocks_dir, CACHE_SHARDS.to_vec())
        .with_context(|| format!("Failed to open block cache at {}", blocks_dir.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Info { cache_dir } => {
            let storage = open_storage(&cache_dir)?;
            let blocks = storage.list("").await.context("Failed to list cached blocks")?;
            let bytes: u64 = blocks.iter().map(|b| b.length).sum();
            let has_listing = blocks.iter().any(|b| b.id == LIST_CACHE_ID);

            println!("Cache directory: {}", cache_dir.display());
            println!("  blocks:        {}", blocks.len());
            println!("  size:          {} bytes ({} MB)", bytes, bytes / (1024 * 1024));
            println!("  index listing: {}", if has_listing { "cached" } else { "none" });
        }
        Command::Sweep {
            cache_dir,
            max_bytes,
        } => {
            let storage = open_storage(&cache_dir)?;
            let stats = sweep(&storage, max_bytes)
                .await
                .context("Failed to sweep block cache")?;

            info!(
                deleted = stats.deleted,
                reclaimed = stats.bytes_reclaimed,
                "Sweep complete"
            );
            println!(
                "Deleted {} of {} blocks, reclaimed {} bytes ({} bytes remain)",
                stats.deleted,
                stats.scanned,
                stats.bytes_reclaimed,
                stats.total_bytes - stats.bytes_reclaimed
            );
        }
        Command::ClearList { cache_dir } => {
            let storage = open_storage(&cache_dir)?;
            storage
                .delete(LIST_CACHE_ID)
                .await
                .context("Failed to delete cached index listing")?;
            println!("Cleared cached index listing in {}", cache_dir.display());
        }
        Command::Help => {
            print_help();
        }
    }

    Ok(())
}

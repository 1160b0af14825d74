//! Command-line driver for the ShellCache offline worker.
//!
//! Runs one worker generation against a real network and an on-disk store,
//! so the lifecycle can be exercised outside a browser.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the manifest and activate the generation
//! shellcache install --config shellcache.json --store .shellcache/
//!
//! # Route one request through the active generation
//! shellcache fetch https://app.example/jjs2025/app.js?v=3 --store .shellcache/
//!
//! # Show the stores and their entries
//! shellcache caches --store .shellcache/
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use http::Method;
use shellcache_common::{init_logging, LogConfig, LogFormat};
use shellcache_net::{LoaderConfig, Request, ResourceLoader, Url};
use shellcache_sw::{CacheStorage, DiskCacheStorage, FetchOutcome, ServiceWorker, ShellCacheConfig};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "shellcache")]
#[command(about = "Offline cache worker for single-page apps")]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate the generation described by the config
    Install {
        /// Config file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Store directory
        #[arg(short, long, default_value = ".shellcache")]
        store: PathBuf,
    },

    /// Route one request through the active generation
    Fetch {
        /// Absolute request URL
        url: String,
        /// Config file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Store directory
        #[arg(short, long, default_value = ".shellcache")]
        store: PathBuf,
        /// Send as a navigation request
        #[arg(long)]
        navigate: bool,
        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// List stores and their entries
    Caches {
        /// Store directory
        #[arg(short, long, default_value = ".shellcache")]
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format));

    match cli.command {
        Commands::Install { config, store } => {
            let worker = open_worker(config.as_deref(), &store).await?;
            worker.install().await.context("install failed")?;
            let reg = worker.registration();
            let reg = reg.read().await;
            println!("Installed {}", worker.cache_name());
            println!("  Active version: {}", reg.active_version().unwrap_or("none"));
        }

        Commands::Fetch {
            url,
            config,
            store,
            navigate,
            method,
            body,
        } => {
            let worker = open_worker(config.as_deref(), &store).await?;
            if !worker.resume().await? {
                warn!(cache = %worker.cache_name(), "No installed generation, request will pass through");
            }

            let request = build_request(&url, &method, navigate)?;
            let (intercepted, response) = match worker.handle_fetch(request).await {
                FetchOutcome::Respond(response) => (true, response),
                FetchOutcome::Passthrough(request) => (false, worker.respond(request).await),
            };

            println!("{} {}", response.status, response.status_text);
            println!("  Source:      {:?}", response.source);
            if let Some(content_type) = response.content_type() {
                println!("  Type:        {content_type}");
            }
            println!("  Intercepted: {intercepted}");
            println!("  Body:        {} bytes", response.body.len());
            if body {
                println!();
                println!("{}", String::from_utf8_lossy(&response.body));
            }
        }

        Commands::Caches { store } => {
            list_caches(&store).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ShellCacheConfig> {
    let config = match path {
        Some(path) => ShellCacheConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ShellCacheConfig::default(),
    };
    info!(scope = %config.scope, cache = %config.cache_name(), "Loaded config");
    Ok(config)
}

async fn open_worker(config: Option<&Path>, store: &Path) -> Result<ServiceWorker> {
    let config = load_config(config)?;
    let storage = DiskCacheStorage::open_dir(store)
        .with_context(|| format!("opening store {}", store.display()))?;
    let loader = ResourceLoader::new(LoaderConfig::default())?;

    let (worker, _events) = ServiceWorker::standalone(config, Arc::new(storage), Arc::new(loader))?;
    Ok(worker)
}

fn build_request(url: &str, method: &str, navigate: bool) -> Result<Request> {
    let url = Url::parse(url).with_context(|| format!("invalid URL {url}"))?;
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("invalid method {method}"))?;
    if navigate && method != Method::GET {
        bail!("navigations are always GET");
    }
    Ok(if navigate {
        Request::navigate(url)
    } else {
        Request::new(method, url)
    })
}

async fn list_caches(store: &Path) -> Result<()> {
    let storage = DiskCacheStorage::open_dir(store)
        .with_context(|| format!("opening store {}", store.display()))?;

    let names = storage.keys().await;
    if names.is_empty() {
        println!("No caches in {}", store.display());
        return Ok(());
    }
    for name in names {
        let entries = storage.entries(&name).await?;
        println!("{name} ({} entries)", entries.len());
        for entry in entries {
            println!("  {} {} ({} bytes)", entry.status, entry.key, entry.body.len());
        }
    }
    Ok(())
}

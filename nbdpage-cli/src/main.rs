//! nbdpaged - paged network block device server
//!
//! Serves NBD exports over TCP, caching pages in memory and persisting them
//! through the selected backend.
//!
//! # Examples
//!
//! ```bash
//! # Scratch exports in process memory
//! nbdpaged mem
//!
//! # Pages as files under /var/lib/nbdpaged
//! nbdpaged --addr 0.0.0.0:10809 fs --root /var/lib/nbdpaged
//!
//! # Pages as objects behind an S3-compatible gateway
//! nbdpaged http --endpoint http://127.0.0.1:9000/exports
//!
//! # Attach from Linux
//! nbd-client -N scratch 127.0.0.1 10809 /dev/nbd0
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use url::Url;

use nbdpage::{ServerConfig, run};
use nbdpage_backends::{FsStore, HttpObjectStore, MemStore};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Paged network block device server")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:10809")]
    addr: String,

    /// Export size in bytes; every export attaches with this size
    #[arg(long, default_value_t = 1 << 30)]
    default_size: u64,

    /// Page size in bytes for the in-memory cache and the page store
    #[arg(long, default_value_t = 4 << 20)]
    page_size: u64,

    /// Export served when a client attaches without a name
    #[arg(long, default_value = "default")]
    default_export: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    backend: Backend,
}

#[derive(Subcommand, Debug)]
enum Backend {
    /// Keep pages in process memory only (exports vanish on exit)
    Mem,
    /// Persist pages as files under a root directory
    Fs {
        /// Directory pages are stored under
        #[arg(long)]
        root: PathBuf,
    },
    /// Persist pages as objects behind an HTTP endpoint
    Http {
        /// Base URL, e.g. http://127.0.0.1:9000/exports
        #[arg(long)]
        endpoint: Url,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    if args.page_size == 0 {
        anyhow::bail!("--page-size must be positive");
    }

    info!("nbdpaged v{}", env!("CARGO_PKG_VERSION"));

    let cfg = ServerConfig {
        addr: args.addr,
        default_size: args.default_size,
        page_size: args.page_size,
        default_export: args.default_export,
    };

    match args.backend {
        Backend::Mem => {
            info!("backend: memory");
            run::<MemStore>(cfg, None).await.context("server failed")
        }
        Backend::Fs { root } => {
            tokio::fs::create_dir_all(&root)
                .await
                .with_context(|| format!("creating store root {}", root.display()))?;
            info!("backend: filesystem at {}", root.display());
            run(cfg, Some(FsStore::new(root)))
                .await
                .context("server failed")
        }
        Backend::Http { endpoint } => {
            info!("backend: http object store at {}", endpoint);
            run(cfg, Some(HttpObjectStore::new(endpoint)))
                .await
                .context("server failed")
        }
    }
}

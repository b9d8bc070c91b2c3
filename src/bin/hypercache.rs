//! hypercache node.
//!
//! Run a three-node cluster over a shared data directory with:
//!   RUST_LOG=info hypercache --me 127.0.0.1:1025 --peer-addrs 127.0.0.1:1025,127.0.0.1:1026,127.0.0.1:1027 --data-dir ./data
//!   RUST_LOG=info hypercache --me 127.0.0.1:1026 --peer-addrs ... --data-dir ./data
//!   RUST_LOG=info hypercache --me 127.0.0.1:1027 --peer-addrs ... --data-dir ./data

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hypercache::backend::DirBackend;
use hypercache::{
    CacheConfig, CacheNode, NodeConfig, PeerClientConfig, PeerId, WarmConfig, WarmScope,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address other peers use to reach this node
    #[arg(long, env = "HYPERCACHE_ME", default_value = "http://localhost:1025")]
    me: String,

    /// Address to listen on; defaults to the resolved `--me` address
    #[arg(long, env = "HYPERCACHE_BIND")]
    bind: Option<SocketAddr>,

    /// Comma-separated addresses of every peer
    #[arg(long, env = "HYPERCACHE_PEER_ADDRS", value_delimiter = ',')]
    peer_addrs: Vec<String>,

    /// Local cache size limit in MiB
    #[arg(long, env = "HYPERCACHE_LIMIT", default_value = "128")]
    limit: u64,

    /// Cache group name
    #[arg(long, env = "HYPERCACHE_GROUP", default_value = "hypercache")]
    group: String,

    /// Directory backing the cache, one file per key
    #[arg(long, env = "HYPERCACHE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Virtual nodes per peer on the hash ring
    #[arg(long, env = "HYPERCACHE_VNODES", default_value = "40")]
    vnodes: usize,

    /// Concurrent loads while warming
    #[arg(long, env = "HYPERCACHE_WARM_CONCURRENCY", default_value = "4")]
    warm_concurrency: usize,

    /// Which keys to warm at startup
    #[arg(long, env = "HYPERCACHE_WARM_SCOPE", value_enum, default_value = "all")]
    warm_scope: Scope,

    /// Skip warming
    #[arg(long, env = "HYPERCACHE_NO_WARM")]
    no_warm: bool,

    /// Deadline for a peer request in milliseconds
    #[arg(long, env = "HYPERCACHE_REQUEST_TIMEOUT_MS", default_value = "5000")]
    request_timeout_ms: u64,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scope {
    All,
    Owned,
}

impl From<Scope> for WarmScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::All => WarmScope::All,
            Scope::Owned => WarmScope::OwnedOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let me = PeerId::new(&args.me);
    let bind_addr = match args.bind {
        Some(addr) => addr,
        None => me
            .resolve()
            .with_context(|| format!("resolving --me address {me}"))?,
    };

    let mut peers: Vec<PeerId> = args
        .peer_addrs
        .iter()
        .filter(|addr| !addr.trim().is_empty())
        .map(PeerId::new)
        .collect();
    if !peers.is_empty() && !peers.contains(&me) {
        peers.push(me.clone());
    }

    info!(me = %me, bind = %bind_addr, peers = peers.len(), limit_mb = args.limit, "Starting hypercache");

    let config = NodeConfig::new(bind_addr)
        .with_advertise_addr(me)
        .with_peers(peers)
        .with_vnodes_per_peer(args.vnodes)
        .with_client_config(
            PeerClientConfig::default()
                .with_request_timeout(Duration::from_millis(args.request_timeout_ms)),
        )
        .with_warm_config(
            WarmConfig::default()
                .with_concurrency(args.warm_concurrency)
                .with_scope(args.warm_scope.into()),
        );

    let node = CacheNode::bind(config)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    let backend = Arc::new(DirBackend::new(&args.data_dir));
    node.new_group(
        CacheConfig::new(&args.group).with_capacity_mb(args.limit),
        backend,
    )?;

    // Serve first: peers warming at the same time fetch their remote keys
    // from us.
    let server = node.serve()?;
    info!(addr = %node.local_addr(), "Serving peer requests");

    if !args.no_warm {
        let report = node
            .warm(&args.group)
            .await
            .with_context(|| format!("warming cache from {}", args.data_dir.display()))?;
        info!(
            keys = report.total,
            failed = report.failed.len(),
            "warmed cache in {:?}",
            report.elapsed
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    let stats = node.group(&args.group)?.stats();
    info!(
        gets = stats.gets,
        hit_rate = stats.hit_rate(),
        loads = stats.loads,
        peer_loads = stats.peer_loads,
        peer_errors = stats.peer_errors,
        served_for_peers = stats.server_requests,
        evictions = stats.evictions,
        mean_latency = ?stats.get_latency_mean,
        p99_latency = ?stats.get_latency_p99,
        "Cache statistics"
    );

    node.shutdown().await;
    server.await.context("joining peer server")?;
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hypercache={}", args.log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

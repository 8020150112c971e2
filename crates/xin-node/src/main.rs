//! xin-node — the kernel full-node binary.
//!
//! Startup sequence:
//!   1. Load `config.toml` and `genesis.json` from the node directory
//!   2. Open (or initialise) the sled graph store and verify its entries
//!   3. Set up the kernel node and its per-chain actors
//!   4. Start the mint and election loops and the JSON-RPC server
//!   5. Shut everything down cleanly on ctrl-c

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use xin_kernel::{election_loop, mint_loop, Custom, Genesis, NoGossip, Node};
use xin_rpc::RpcServer;
use xin_storage::SledStore;

#[derive(Parser, Debug)]
#[command(name = "xin-node", version, about = "XIN kernel node")]
struct Args {
    /// Node directory holding config.toml, genesis.json and the data store.
    #[arg(long, default_value = "~/.xin")]
    dir: PathBuf,

    /// JSON-RPC listen address; overrides the config when set.
    #[arg(long)]
    rpc_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,xin=debug".parse().expect("valid filter")),
        )
        .init();

    let args = Args::parse();
    let dir = expand_tilde(&args.dir);
    info!(dir = %dir.display(), "xin node starting");

    let custom = Custom::load(dir.join("config.toml")).context("loading config.toml")?;
    let genesis = Genesis::load(dir.join("genesis.json")).context("loading genesis.json")?;

    let store = Arc::new(SledStore::open(dir.join("store")).context("opening graph store")?);
    let listener = custom.network.listener.clone();
    let node = Node::setup(custom, store, Arc::new(NoGossip), &genesis, listener)
        .context("setting up kernel node")?;

    // Boot the chain actors for every chain already known to the store.
    node.get_or_create_chain(node.id_for_network)
        .context("booting own chain")?;
    for cn in node.all_nodes_sorted() {
        node.get_or_create_chain(cn.id_for_network)
            .context("booting peer chain")?;
    }

    let mint = tokio::spawn(mint_loop(node.clone()));
    let election = tokio::spawn(election_loop(node.clone()));

    let rpc_handle = match args
        .rpc_addr
        .or_else(|| node.custom.rpc.listener.parse().ok())
    {
        Some(addr) => Some(
            RpcServer::new(node.clone())
                .start(addr)
                .await
                .context("starting rpc server")?,
        ),
        None => {
            info!("no rpc listener configured");
            None
        }
    };

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    node.shutdown();
    if let Some(handle) = rpc_handle {
        let _ = handle.stop();
    }
    let _ = tokio::join!(mint, election);
    node.store.close().ok();
    Ok(())
}

fn expand_tilde(path: &PathBuf) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.clone()
}

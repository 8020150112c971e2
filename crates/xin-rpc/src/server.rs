use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use xin_core::{decompress_unmarshal_versioned_transaction, MINT_GROUP_KERNEL_NODE};
use xin_kernel::Node;

use crate::api::XinApiServer;
use crate::types::{RpcGraphHead, RpcGraphInfo, RpcInfo, RpcMintInfo, RpcNodeEntry};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

const ERR_STORE: i32 = -32010;
const ERR_INVALID_TX: i32 = -32020;

pub struct RpcServer {
    node: Arc<Node>,
}

impl RpcServer {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl XinApiServer for RpcServer {
    async fn get_info(&self) -> RpcResult<RpcInfo> {
        let node = &self.node;
        let pool = node
            .pool_size_remaining()
            .map_err(|e| rpc_err(ERR_STORE, e.to_string()))?;
        let batch = node
            .store
            .read_last_mint_distribution(MINT_GROUP_KERNEL_NODE)
            .map_err(|e| rpc_err(ERR_STORE, e.to_string()))?
            .map(|d| d.batch)
            .unwrap_or(0);

        let consensus: Vec<RpcNodeEntry> = node
            .consensus_nodes()
            .iter()
            .map(RpcNodeEntry::from)
            .collect();
        let heads = graph_heads(node);

        Ok(RpcInfo {
            network: node.network_id.to_hex(),
            node: node.id_for_network.to_hex(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime: format!("{:?}", node.uptime()),
            epoch: node.epoch,
            timestamp: node.graph_timestamp(),
            mint: RpcMintInfo {
                pool: pool.to_string(),
                batch,
            },
            graph: RpcGraphInfo {
                consensus,
                topology: node.store.topology_sequence(),
                heads,
            },
        })
    }

    async fn list_all_nodes(&self) -> RpcResult<Vec<RpcNodeEntry>> {
        Ok(self
            .node
            .all_nodes_sorted()
            .iter()
            .map(RpcNodeEntry::from)
            .collect())
    }

    async fn get_consensus_keys(&self, timestamp: u64) -> RpcResult<Vec<String>> {
        Ok(self
            .node
            .consensus_keys(timestamp)
            .iter()
            .map(|k| k.key().to_hex())
            .collect())
    }

    async fn dump_graph_head(&self) -> RpcResult<Vec<RpcGraphHead>> {
        let mut heads = graph_heads(&self.node);
        heads.sort_by(|a, b| a.node.cmp(&b.node));
        Ok(heads)
    }

    async fn send_raw_transaction(&self, raw: String) -> RpcResult<String> {
        let bytes = hex::decode(&raw).map_err(|e| rpc_err(ERR_INVALID_TX, e.to_string()))?;
        let tx = decompress_unmarshal_versioned_transaction(&bytes)
            .map_err(|e| rpc_err(ERR_INVALID_TX, e.to_string()))?;
        let hash = self
            .node
            .queue_transaction(&tx)
            .map_err(|e| rpc_err(ERR_INVALID_TX, e.to_string()))?;
        Ok(hash.to_hex())
    }
}

fn graph_heads(node: &Arc<Node>) -> Vec<RpcGraphHead> {
    node.build_graph()
        .into_iter()
        .map(|p| RpcGraphHead {
            node: p.node_id.to_hex(),
            round: p.number,
            hash: p.hash.to_hex(),
        })
        .collect()
}

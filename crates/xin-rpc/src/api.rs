use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{RpcGraphHead, RpcInfo, RpcNodeEntry};

/// The kernel's info surface: round state, consensus membership and the
/// mint pool, read-only.
#[rpc(server, namespace = "xin")]
pub trait XinApi {
    #[method(name = "getInfo")]
    async fn get_info(&self) -> RpcResult<RpcInfo>;

    #[method(name = "listAllNodes")]
    async fn list_all_nodes(&self) -> RpcResult<Vec<RpcNodeEntry>>;

    #[method(name = "getConsensusKeys")]
    async fn get_consensus_keys(&self, timestamp: u64) -> RpcResult<Vec<String>>;

    #[method(name = "dumpGraphHead")]
    async fn dump_graph_head(&self) -> RpcResult<Vec<RpcGraphHead>>;

    /// Submit a hex-encoded transaction (compressed or raw canonical form).
    #[method(name = "sendRawTransaction")]
    async fn send_raw_transaction(&self, raw: String) -> RpcResult<String>;
}
